//! td shell: an interactive session over one task service.
//!
//! Destructive commands (`rm`, `clear`) and `edit` go through the view's
//! pending action, so the next input line confirms or supplies the value.

use std::io::{BufRead, Write};
use std::path::PathBuf;

use crate::cli::task::describe;
use crate::cli::{block_on, short_id, Session};
use crate::error::Result;
use crate::lifecycle::{RemovalReport, TaskService};
use crate::view::{PendingAction, PendingKind, ViewState};

const HELP: &str = "\
commands:
  ls                      list tasks with the current filter and sort
  filter all|active|completed
  sort [insertion-order|alphabetical]   no argument toggles
  add <text>              add a task
  done <id>               toggle completed
  edit <id>               replace text (next line is the new text)
  rm <id>                 delete a task (asks to confirm)
  clear                   delete completed tasks (asks to confirm)
  stats                   show counts
  quit                    leave the shell";

enum Flow {
    Continue,
    Quit,
}

pub fn run(dir: Option<PathBuf>) -> Result<()> {
    let session = Session::open(dir)?;
    block_on(async {
        let mut service = session.task_service().await?;
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        run_session(&mut service, stdin.lock(), &mut stdout).await
    })?
}

/// Read commands from `input` until `quit` or end of input
pub(crate) async fn run_session<R: BufRead, W: Write>(
    service: &mut TaskService,
    input: R,
    out: &mut W,
) -> Result<()> {
    let mut view = ViewState::new();
    writeln!(out, "td shell, type 'help' for commands")?;
    write!(out, "> ")?;
    out.flush()?;

    for line in input.lines() {
        let line = line?;
        match step(service, &mut view, line.trim(), out).await {
            Ok(Flow::Quit) => return Ok(()),
            Ok(Flow::Continue) => {}
            Err(err) => writeln!(out, "error: {err}")?,
        }
        write!(out, "> ")?;
        out.flush()?;
    }
    writeln!(out)?;
    Ok(())
}

async fn step<W: Write>(
    service: &mut TaskService,
    view: &mut ViewState,
    line: &str,
    out: &mut W,
) -> Result<Flow> {
    if let Some(pending) = view.take_pending() {
        confirm(service, pending, line, out).await?;
        return Ok(Flow::Continue);
    }

    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };

    match command {
        "" => {}
        "help" | "?" => writeln!(out, "{HELP}")?,
        "quit" | "exit" | "q" => return Ok(Flow::Quit),
        "ls" => list(service, view, out)?,
        "filter" => {
            view.set_filter(rest.parse()?);
            list(service, view, out)?;
        }
        "sort" => {
            if rest.is_empty() {
                view.toggle_sort();
            } else {
                view.set_sort(rest.parse()?);
            }
            list(service, view, out)?;
        }
        "add" => {
            let task = service.create_task(rest, None, None).await?;
            writeln!(out, "added {} {}", short_id(&task.id), task.text)?;
        }
        "done" => {
            let task = service.toggle(rest)?;
            writeln!(out, "{}", describe(&task))?;
        }
        "edit" => {
            let task = service.get(rest)?;
            writeln!(out, "new text for \"{}\" (empty line cancels):", task.text)?;
            view.request(PendingKind::Edit, Some(task.id));
        }
        "rm" => {
            let task = service.get(rest)?;
            writeln!(out, "delete \"{}\"? [y/N]", task.text)?;
            view.request(PendingKind::Delete, Some(task.id));
        }
        "clear" => {
            let completed = service.stats().completed;
            if completed == 0 {
                writeln!(out, "no completed tasks")?;
            } else {
                writeln!(out, "delete {completed} completed task(s)? [y/N]")?;
                view.request(PendingKind::ClearCompleted, None);
            }
        }
        "stats" => {
            let stats = service.stats();
            writeln!(
                out,
                "{} total, {} completed, {} active",
                stats.total,
                stats.completed,
                stats.total - stats.completed
            )?;
        }
        other => writeln!(out, "unknown command '{other}', type 'help'")?,
    }
    Ok(Flow::Continue)
}

fn is_yes(line: &str) -> bool {
    matches!(line.to_lowercase().as_str(), "y" | "yes")
}

async fn confirm<W: Write>(
    service: &mut TaskService,
    pending: PendingAction,
    line: &str,
    out: &mut W,
) -> Result<()> {
    match (pending.kind, pending.task_id) {
        (PendingKind::Edit, Some(id)) if !line.is_empty() => {
            let task = service.update_text(&id, line)?;
            writeln!(out, "{}", describe(&task))?;
        }
        (PendingKind::Delete, Some(id)) if is_yes(line) => {
            let report = service.remove_task(&id).await?;
            print_removal(&report, out)?;
        }
        (PendingKind::ClearCompleted, _) if is_yes(line) => {
            let report = service.clear_completed().await?;
            print_removal(&report, out)?;
        }
        (kind, _) => writeln!(out, "{kind} cancelled")?,
    }
    Ok(())
}

fn print_removal<W: Write>(report: &RemovalReport, out: &mut W) -> Result<()> {
    writeln!(out, "removed {} task(s)", report.removed.len())?;
    for failure in &report.blob_failures {
        writeln!(
            out,
            "warning: image {} not deleted: {}",
            failure.blob_id, failure.message
        )?;
    }
    Ok(())
}

fn list<W: Write>(service: &TaskService, view: &ViewState, out: &mut W) -> Result<()> {
    let (filter, sort) = view.query_args();
    let tasks = service.query(filter, sort);
    writeln!(out, "{} task(s) [{filter}, {sort}]", tasks.len())?;
    for task in &tasks {
        writeln!(out, "  {}", describe(task))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::BlobStore;
    use crate::storage::MemorySlotStore;
    use crate::task::RecordStore;
    use std::io::Cursor;
    use std::sync::Arc;

    fn service(dir: &std::path::Path) -> TaskService {
        let records = RecordStore::load(Box::new(MemorySlotStore::new()), "tasks");
        let blobs = BlobStore::new(dir.join("blobs"), "images", 1024);
        TaskService::new(records, Arc::new(blobs))
    }

    async fn session(service: &mut TaskService, script: &str) -> String {
        let mut out = Vec::new();
        run_session(service, Cursor::new(script.to_string()), &mut out)
            .await
            .unwrap();
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn delete_requires_confirmation() {
        let temp = tempfile::tempdir().unwrap();
        let mut service = service(temp.path());
        let task = service.create_task("Buy milk", None, None).await.unwrap();

        let script = format!("rm {}\nn\nls\n", short_id(&task.id));
        let output = session(&mut service, &script).await;
        assert!(output.contains("delete \"Buy milk\"? [y/N]"));
        assert!(output.contains("delete cancelled"));
        assert_eq!(service.stats().total, 1);

        let script = format!("rm {}\ny\nquit\n", short_id(&task.id));
        let output = session(&mut service, &script).await;
        assert!(output.contains("removed 1 task(s)"));
        assert_eq!(service.stats().total, 0);
    }

    #[tokio::test]
    async fn edit_takes_text_from_next_line() {
        let temp = tempfile::tempdir().unwrap();
        let mut service = service(temp.path());
        let task = service.create_task("Buy milk", None, None).await.unwrap();

        let script = format!("edit {}\nBuy oat milk\n", task.id);
        session(&mut service, &script).await;
        assert_eq!(service.get(&task.id).unwrap().text, "Buy oat milk");

        let script = format!("edit {}\n\n", task.id);
        let output = session(&mut service, &script).await;
        assert!(output.contains("edit cancelled"));
        assert_eq!(service.get(&task.id).unwrap().text, "Buy oat milk");
    }

    #[tokio::test]
    async fn filter_and_sort_shape_listing() {
        let temp = tempfile::tempdir().unwrap();
        let mut service = service(temp.path());
        service.create_task("banana", None, None).await.unwrap();
        let apple = service.create_task("apple", None, None).await.unwrap();
        service.toggle(&apple.id).unwrap();

        let output = session(&mut service, "filter active\nsort\nfilter all\n").await;
        assert!(output.contains("1 task(s) [active, insertion-order]"));
        assert!(output.contains("1 task(s) [active, alphabetical]"));
        let all = output.rfind("2 task(s) [all, alphabetical]").unwrap();
        let tail = &output[all..];
        assert!(tail.find("apple").unwrap() < tail.find("banana").unwrap());
    }

    #[tokio::test]
    async fn errors_do_not_end_the_session() {
        let temp = tempfile::tempdir().unwrap();
        let mut service = service(temp.path());

        let output = session(&mut service, "done nope\nfilter weird\nadd ok\n").await;
        assert!(output.contains("error: Task not found: nope"));
        assert!(output.contains("error: Invalid argument"));
        assert!(output.contains("added"));
        assert_eq!(service.stats().total, 1);
    }
}
