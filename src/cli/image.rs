//! td image command implementations.

use std::path::PathBuf;

use serde::Serialize;

use crate::cli::{block_on, Session};
use crate::error::{Error, Result};
use crate::output::{emit_success, HumanOutput, OutputOptions};

pub struct GetOptions {
    pub id: String,
    pub out: Option<PathBuf>,
    pub dir: Option<PathBuf>,
    pub json: bool,
    pub quiet: bool,
}

#[derive(Serialize)]
struct ImageOutput {
    task_id: String,
    blob_id: String,
    url: String,
    mime: String,
    bytes: usize,
    path: PathBuf,
}

#[derive(Serialize)]
struct GcOutput {
    swept: Vec<String>,
}

fn extension_for(mime: &str) -> &'static str {
    match mime {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "bin",
    }
}

pub fn run_get(options: GetOptions) -> Result<()> {
    let session = Session::open(options.dir)?;
    let output = block_on(async {
        let service = session.task_service().await?;
        let task = service.get(&options.id)?;
        let lease = service.image(&task.id).await?.ok_or_else(|| {
            Error::InvalidArgument(format!("task {} has no stored image", task.id))
        })?;

        let path = options.out.clone().unwrap_or_else(|| {
            PathBuf::from(format!("{}.{}", lease.blob_id(), extension_for(lease.mime())))
        });
        let written = std::fs::write(&path, lease.bytes());
        let output = ImageOutput {
            task_id: task.id,
            blob_id: lease.blob_id().to_string(),
            url: lease.url().to_string(),
            mime: lease.mime().to_string(),
            bytes: lease.len(),
            path,
        };
        service.release(&lease);
        written?;
        Ok::<_, Error>(output)
    })??;

    let mut human = HumanOutput::new("Image written");
    human.push_summary("task", output.task_id.clone());
    human.push_summary("type", output.mime.clone());
    human.push_summary("bytes", output.bytes.to_string());
    human.push_summary("path", output.path.display().to_string());

    emit_success(
        OutputOptions {
            json: options.json,
            quiet: options.quiet,
        },
        "image get",
        &output,
        Some(&human),
    )
}

pub fn run_gc(dir: Option<PathBuf>, json: bool, quiet: bool) -> Result<()> {
    let session = Session::open(dir)?;
    let swept = block_on(async {
        let service = session.task_service().await?;
        service.sweep_orphans().await
    })??;

    let header = if swept.is_empty() {
        "td image gc: nothing to do".to_string()
    } else {
        format!("td image gc: deleted {} orphaned image(s)", swept.len())
    };
    let mut human = HumanOutput::new(header);
    for id in &swept {
        human.push_detail(id.clone());
    }

    emit_success(
        OutputOptions { json, quiet },
        "image gc",
        &GcOutput { swept },
        Some(&human),
    )
}
