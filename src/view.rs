//! Transient view state: filter, sort and the action awaiting confirmation.
//!
//! Lives only in memory. It shapes queries against the record store but is
//! never written anywhere.

use std::fmt;

use crate::task::{FilterMode, SortMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
    Delete,
    Edit,
    ClearCompleted,
}

impl fmt::Display for PendingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PendingKind::Delete => "delete",
            PendingKind::Edit => "edit",
            PendingKind::ClearCompleted => "clear-completed",
        };
        f.write_str(name)
    }
}

/// An action the user started but has not confirmed yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAction {
    pub kind: PendingKind,
    pub task_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ViewState {
    filter: FilterMode,
    sort: SortMode,
    pending: Option<PendingAction>,
}

impl ViewState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(&self) -> FilterMode {
        self.filter
    }

    pub fn set_filter(&mut self, filter: FilterMode) {
        self.filter = filter;
    }

    pub fn sort(&self) -> SortMode {
        self.sort
    }

    pub fn set_sort(&mut self, sort: SortMode) {
        self.sort = sort;
    }

    pub fn toggle_sort(&mut self) -> SortMode {
        self.sort = match self.sort {
            SortMode::InsertionOrder => SortMode::Alphabetical,
            SortMode::Alphabetical => SortMode::InsertionOrder,
        };
        self.sort
    }

    /// Arguments for `RecordStore::query`
    pub fn query_args(&self) -> (FilterMode, SortMode) {
        (self.filter, self.sort)
    }

    /// Start an action; replaces any earlier unconfirmed one
    pub fn request(&mut self, kind: PendingKind, task_id: Option<String>) {
        self.pending = Some(PendingAction { kind, task_id });
    }

    pub fn pending(&self) -> Option<&PendingAction> {
        self.pending.as_ref()
    }

    /// Consume the pending action for execution
    pub fn take_pending(&mut self) -> Option<PendingAction> {
        self.pending.take()
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }
}
