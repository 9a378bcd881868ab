//! td - offline-first task list library
//!
//! This library provides the core of the td CLI: task records persisted in a
//! quota-limited slot store, image attachments in a separate blob store, a
//! service that keeps the two consistent, and a versioned offline cache for
//! the web front end's static files.
//!
//! # Core Concepts
//!
//! - **Records**: the whole task list, one JSON array in one slot
//! - **Blobs**: attachment bytes keyed by UUID, referenced from records
//! - **Leases**: revocable in-memory handles to blob bytes
//! - **Namespaces**: one asset cache directory per deployed version
//!
//! # Module Organization
//!
//! - `cli`: Command-line interface using clap
//! - `config`: Configuration loading from `.td.toml`
//! - `error`: Error types and result aliases
//! - `storage`: Data directory layout and the slot store
//! - `lock`: File locking and atomic writes
//! - `task`: Task records, validation, migration and projections
//! - `blob`: Attachment blob store and leases
//! - `lifecycle`: Task service coordinating records and blobs
//! - `asset_cache`: Versioned offline cache with fetch policies
//! - `view`: Transient filter, sort and confirmation state
//! - `calendar`: iCalendar export
//! - `output`: Human and JSON output envelopes

pub mod asset_cache;
pub mod blob;
pub mod calendar;
pub mod cli;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod lock;
pub mod output;
pub mod storage;
pub mod task;
pub mod view;

pub use error::{Error, Result};
