//! td task command implementations.

use std::io::Write;
use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;

use crate::calendar;
use crate::cli::{block_on, short_id, Session};
use crate::error::{Error, Result};
use crate::lifecycle::RemovalReport;
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::task::{parse_due_date, FilterMode, SortMode, TaskRecord, TaskStats};

pub struct AddOptions {
    pub text: String,
    pub due: Option<String>,
    pub image: Option<PathBuf>,
    pub dir: Option<PathBuf>,
    pub json: bool,
    pub quiet: bool,
}

pub struct ListOptions {
    pub filter: String,
    pub sort: String,
    pub dir: Option<PathBuf>,
    pub json: bool,
    pub quiet: bool,
}

pub struct IdOptions {
    pub id: String,
    pub dir: Option<PathBuf>,
    pub json: bool,
    pub quiet: bool,
}

pub struct EditOptions {
    pub id: String,
    pub text: String,
    pub dir: Option<PathBuf>,
    pub json: bool,
    pub quiet: bool,
}

pub struct IcsOptions {
    pub id: String,
    pub out: Option<PathBuf>,
    pub dir: Option<PathBuf>,
    pub json: bool,
    pub quiet: bool,
}

#[derive(Serialize)]
struct ListOutput {
    filter: FilterMode,
    sort: SortMode,
    tasks: Vec<TaskRecord>,
    stats: TaskStats,
}

#[derive(Serialize)]
struct IcsOutput {
    id: String,
    path: PathBuf,
    bytes: usize,
}

/// One-line rendering of a task for human output
pub(crate) fn describe(task: &TaskRecord) -> String {
    let mark = if task.completed { "x" } else { " " };
    let mut line = format!("[{mark}] {} {}", short_id(&task.id), task.text);
    if let Some(due) = task.due_date {
        line.push_str(&format!(" (due {})", due.format("%Y-%m-%d %H:%M")));
    }
    if task.attachment_ref.is_some() {
        line.push_str(" [image]");
    }
    line
}

fn parse_due(value: Option<&str>) -> Result<Option<chrono::DateTime<Utc>>> {
    match value {
        None => Ok(None),
        Some(raw) => parse_due_date(raw)
            .map(Some)
            .ok_or_else(|| Error::InvalidArgument(format!("invalid due date '{raw}'"))),
    }
}

pub fn run_add(options: AddOptions) -> Result<()> {
    let session = Session::open(options.dir)?;
    let due = parse_due(options.due.as_deref())?;
    let image = match &options.image {
        Some(path) => Some(std::fs::read(path).map_err(|err| {
            Error::InvalidArgument(format!("cannot read image {}: {err}", path.display()))
        })?),
        None => None,
    };

    let task = block_on(async {
        let mut service = session.task_service().await?;
        service
            .create_task(&options.text, due, image.as_deref())
            .await
    })??;

    let mut human = HumanOutput::new("Task added");
    human.push_summary("ID", task.id.clone());
    human.push_summary("Text", task.text.clone());
    if let Some(due) = task.due_date {
        human.push_summary("Due", due.to_rfc3339());
    }
    if let Some(blob_id) = &task.attachment_ref {
        human.push_summary("Image", blob_id.clone());
    }

    emit_success(
        OutputOptions {
            json: options.json,
            quiet: options.quiet,
        },
        "add",
        &task,
        Some(&human),
    )
}

pub fn run_list(options: ListOptions) -> Result<()> {
    let filter: FilterMode = options.filter.parse()?;
    let sort: SortMode = options.sort.parse()?;
    let session = Session::open(options.dir)?;
    let service = block_on(session.task_service())??;

    let tasks = service.query(filter, sort);
    let stats = service.stats();

    let mut human = HumanOutput::new(format!("td ls: {} task(s)", tasks.len()));
    human.push_summary("filter", filter.to_string());
    human.push_summary("sort", sort.to_string());
    human.push_summary("completed", format!("{}/{}", stats.completed, stats.total));
    for task in &tasks {
        human.push_detail(describe(task));
    }
    if tasks.is_empty() && stats.total == 0 {
        human.push_next_step("td add \"<text>\"");
    }

    let output = ListOutput {
        filter,
        sort,
        tasks,
        stats,
    };
    emit_success(
        OutputOptions {
            json: options.json,
            quiet: options.quiet,
        },
        "ls",
        &output,
        Some(&human),
    )
}

pub fn run_done(options: IdOptions) -> Result<()> {
    let session = Session::open(options.dir)?;
    let mut service = block_on(session.task_service())??;
    let task = service.toggle(&options.id)?;

    let header = if task.completed {
        "Task completed"
    } else {
        "Task reopened"
    };
    let mut human = HumanOutput::new(header);
    human.push_summary("ID", task.id.clone());
    human.push_summary("Text", task.text.clone());

    emit_success(
        OutputOptions {
            json: options.json,
            quiet: options.quiet,
        },
        "done",
        &task,
        Some(&human),
    )
}

pub fn run_edit(options: EditOptions) -> Result<()> {
    let session = Session::open(options.dir)?;
    let mut service = block_on(session.task_service())??;
    let task = service.update_text(&options.id, &options.text)?;

    let mut human = HumanOutput::new("Task updated");
    human.push_summary("ID", task.id.clone());
    human.push_summary("Text", task.text.clone());

    emit_success(
        OutputOptions {
            json: options.json,
            quiet: options.quiet,
        },
        "edit",
        &task,
        Some(&human),
    )
}

fn removal_human(header: &str, report: &RemovalReport) -> HumanOutput {
    let mut human = HumanOutput::new(header);
    human.push_summary("removed", report.removed.len().to_string());
    human.push_summary("images deleted", report.blobs_deleted.to_string());
    for id in &report.removed {
        human.push_detail(id.clone());
    }
    for failure in &report.blob_failures {
        human.push_warning(format!(
            "image {} of task {} not deleted: {}",
            failure.blob_id, failure.task_id, failure.message
        ));
    }
    if !report.blob_failures.is_empty() {
        human.push_next_step("td image gc");
    }
    human
}

pub fn run_rm(options: IdOptions) -> Result<()> {
    let session = Session::open(options.dir)?;
    let report = block_on(async {
        let mut service = session.task_service().await?;
        service.remove_task(&options.id).await
    })??;

    let human = removal_human("Task removed", &report);
    emit_success(
        OutputOptions {
            json: options.json,
            quiet: options.quiet,
        },
        "rm",
        &report,
        Some(&human),
    )
}

pub fn run_clear(dir: Option<PathBuf>, json: bool, quiet: bool) -> Result<()> {
    let session = Session::open(dir)?;
    let report = block_on(async {
        let mut service = session.task_service().await?;
        service.clear_completed().await
    })??;

    let header = if report.removed.is_empty() {
        "td clear: nothing to do"
    } else {
        "td clear: removed completed tasks"
    };
    let human = removal_human(header, &report);
    emit_success(OutputOptions { json, quiet }, "clear", &report, Some(&human))
}

pub fn run_stats(dir: Option<PathBuf>, json: bool, quiet: bool) -> Result<()> {
    let session = Session::open(dir)?;
    let service = block_on(session.task_service())??;
    let stats = service.stats();

    let mut human = HumanOutput::new("td stats");
    human.push_summary("total", stats.total.to_string());
    human.push_summary("completed", stats.completed.to_string());
    human.push_summary("active", (stats.total - stats.completed).to_string());

    emit_success(OutputOptions { json, quiet }, "stats", &stats, Some(&human))
}

pub fn run_ics(options: IcsOptions) -> Result<()> {
    let session = Session::open(options.dir)?;
    let service = block_on(session.task_service())??;
    let task = service.get(&options.id)?;
    let payload = calendar::to_ics(&task, Utc::now())?;

    let to_stdout = options
        .out
        .as_deref()
        .map(|path| path.as_os_str() == "-")
        .unwrap_or(false);
    if to_stdout {
        std::io::stdout().write_all(payload.as_bytes())?;
        return Ok(());
    }

    let path = options
        .out
        .unwrap_or_else(|| PathBuf::from(calendar::file_name(&task)));
    std::fs::write(&path, payload.as_bytes())?;

    let mut human = HumanOutput::new("Calendar entry written");
    human.push_summary("ID", task.id.clone());
    human.push_summary("path", path.display().to_string());

    let output = IcsOutput {
        id: task.id,
        path,
        bytes: payload.len(),
    };
    emit_success(
        OutputOptions {
            json: options.json,
            quiet: options.quiet,
        },
        "ics",
        &output,
        Some(&human),
    )
}
