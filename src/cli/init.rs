//! td init command implementation
//!
//! Creates the data directory skeleton and a default `.td.toml`.

use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::storage::Storage;

#[derive(serde::Serialize)]
struct InitReport {
    dir: PathBuf,
    created: InitCreated,
}

#[derive(serde::Serialize)]
struct InitCreated {
    config: bool,
    data_dir: bool,
}

pub fn run(dir: Option<PathBuf>, json: bool, quiet: bool) -> Result<()> {
    let storage = Storage::discover(dir.as_deref())?;
    let created_data_dir = !storage.is_initialized();
    storage.init()?;
    let created_config = ensure_config(&storage.config_file())?;

    let report = InitReport {
        dir: storage.root().to_path_buf(),
        created: InitCreated {
            config: created_config,
            data_dir: created_data_dir,
        },
    };

    let mut created_items = Vec::new();
    if created_config {
        created_items.push(".td.toml");
    }
    if created_data_dir {
        created_items.push("slots/, blobs/, cache/");
    }

    let header = if created_items.is_empty() {
        "td init: nothing to do".to_string()
    } else {
        "td init: initialized data directory".to_string()
    };

    let mut human = HumanOutput::new(header);
    human.push_summary("dir", storage.root().display().to_string());
    human.push_summary(
        "created",
        if created_items.is_empty() {
            "none".to_string()
        } else {
            created_items.join(", ")
        },
    );
    human.push_next_step("td add \"<text>\"");
    human.push_next_step("td cache install");

    emit_success(OutputOptions { json, quiet }, "init", &report, Some(&human))
}

fn ensure_config(path: &Path) -> Result<bool> {
    if path.exists() {
        if !path.is_file() {
            return Err(Error::OperationFailed(format!(
                ".td.toml exists but is not a file: {}",
                path.display()
            )));
        }
        return Ok(false);
    }

    Config::default().save(path)?;
    Ok(true)
}
