//! Command-line interface for td
//!
//! This module defines the CLI structure using clap derive macros.
//! Each group of subcommands is implemented in its own submodule.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::asset_cache::{AssetCache, HttpNetwork, Network};
use crate::blob::BlobStore;
use crate::config::Config;
use crate::error::Result;
use crate::lifecycle::TaskService;
use crate::storage::{FileSlotStore, Storage};
use crate::task::RecordStore;

mod cache;
mod image;
mod init;
mod shell;
mod task;

/// td - offline-first task list
///
/// Tasks with optional due dates and image attachments, kept in a local
/// data directory, plus a versioned offline cache for the web front end.
#[derive(Parser, Debug)]
#[command(name = "td")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Data directory (defaults to the platform data dir)
    #[arg(long, global = true, env = "TD_DIR")]
    pub dir: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the data directory and a default .td.toml
    Init,

    /// Add a task
    Add {
        /// Task text (1-200 characters)
        #[arg(required = true)]
        text: Vec<String>,

        /// Due date: RFC 3339, YYYY-MM-DDTHH:MM or YYYY-MM-DD (UTC)
        #[arg(long)]
        due: Option<String>,

        /// Image file to attach
        #[arg(long)]
        image: Option<PathBuf>,
    },

    /// List tasks
    Ls {
        /// Filter: all, active, completed
        #[arg(long, default_value = "all")]
        filter: String,

        /// Sort: insertion-order, alphabetical
        #[arg(long, default_value = "insertion-order")]
        sort: String,
    },

    /// Toggle a task's completed flag
    Done {
        /// Task id or unique prefix
        id: String,
    },

    /// Replace a task's text
    Edit {
        /// Task id or unique prefix
        id: String,

        /// New text
        #[arg(required = true)]
        text: Vec<String>,
    },

    /// Delete a task and its image
    Rm {
        /// Task id or unique prefix
        id: String,
    },

    /// Delete every completed task
    Clear,

    /// Show task counts
    Stats,

    /// Task image attachments
    #[command(subcommand)]
    Image(ImageCommands),

    /// Export a task's due date as an iCalendar file
    Ics {
        /// Task id or unique prefix
        id: String,

        /// Output path ("-" for stdout; default task-<text>.ics)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Offline asset cache
    #[command(subcommand)]
    Cache(CacheCommands),

    /// Interactive session with filter, sort and confirmations
    Shell,
}

/// Image subcommands
#[derive(Subcommand, Debug)]
pub enum ImageCommands {
    /// Write a task's image to a file
    Get {
        /// Task id or unique prefix
        id: String,

        /// Output path (default <blob-id>.<ext>)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Delete images no task references
    Gc,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Download the asset manifest into the current namespace
    Install {
        /// Leave the new namespace waiting even when skip_waiting is set
        #[arg(long)]
        no_activate: bool,
    },

    /// Make the installed namespace current and purge older ones
    Activate,

    /// Fetch one URL through the cache
    Fetch {
        /// Absolute URL or a path relative to the configured origin
        url: String,

        /// Request method
        #[arg(long, default_value = "GET")]
        method: String,

        /// Write the body to this file
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Show every namespace on disk
    Status,
}

/// Storage and configuration shared by every command
pub(crate) struct Session {
    pub storage: Storage,
    pub config: Config,
}

impl Session {
    pub fn open(dir: Option<PathBuf>) -> Result<Self> {
        let storage = Storage::discover(dir.as_deref())?;
        storage.init()?;
        let config = Config::load_from_dir(storage.root());
        Ok(Self { storage, config })
    }

    /// Wire the record store and blob store into a task service
    pub async fn task_service(&self) -> Result<TaskService> {
        let slots = FileSlotStore::new(self.storage.slots_dir(), self.config.records.quota_bytes);
        let records = RecordStore::load(Box::new(slots), self.config.records.key.clone());
        let blobs = BlobStore::new(
            self.storage.blobs_dir(),
            self.config.blobs.container.clone(),
            self.config.blobs.max_image_bytes,
        )
        .with_quota(self.config.blobs.quota_bytes);

        let mut service = TaskService::new(records, Arc::new(blobs));
        if let Some(legacy) = service.records().migrated_from() {
            let report = service.adopt_legacy_images().await;
            tracing::info!(
                from = legacy,
                adopted = report.adopted,
                failed = report.failed.len(),
                "migrated legacy tasks"
            );
        }
        Ok(service)
    }

    pub fn asset_cache(&self) -> Result<AssetCache> {
        self.asset_cache_with(Arc::new(HttpNetwork::new()))
    }

    pub fn asset_cache_with(&self, network: Arc<dyn Network>) -> Result<AssetCache> {
        AssetCache::new(self.storage.cache_dir(), self.config.cache.clone(), network)
    }
}

/// Run a future on a single-threaded runtime
pub(crate) fn block_on<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    Ok(runtime.block_on(future))
}

/// Short display form of a task id
pub(crate) fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

impl Cli {
    /// Execute the CLI command
    pub fn run(self) -> Result<()> {
        let dir = self.dir;
        let json = self.json;
        let quiet = self.quiet;

        match self.command {
            Commands::Init => init::run(dir, json, quiet),
            Commands::Add { text, due, image } => task::run_add(task::AddOptions {
                text: text.join(" "),
                due,
                image,
                dir,
                json,
                quiet,
            }),
            Commands::Ls { filter, sort } => task::run_list(task::ListOptions {
                filter,
                sort,
                dir,
                json,
                quiet,
            }),
            Commands::Done { id } => task::run_done(task::IdOptions {
                id,
                dir,
                json,
                quiet,
            }),
            Commands::Edit { id, text } => task::run_edit(task::EditOptions {
                id,
                text: text.join(" "),
                dir,
                json,
                quiet,
            }),
            Commands::Rm { id } => task::run_rm(task::IdOptions {
                id,
                dir,
                json,
                quiet,
            }),
            Commands::Clear => task::run_clear(dir, json, quiet),
            Commands::Stats => task::run_stats(dir, json, quiet),
            Commands::Ics { id, out } => task::run_ics(task::IcsOptions {
                id,
                out,
                dir,
                json,
                quiet,
            }),
            Commands::Image(cmd) => match cmd {
                ImageCommands::Get { id, out } => image::run_get(image::GetOptions {
                    id,
                    out,
                    dir,
                    json,
                    quiet,
                }),
                ImageCommands::Gc => image::run_gc(dir, json, quiet),
            },
            Commands::Cache(cmd) => match cmd {
                CacheCommands::Install { no_activate } => {
                    cache::run_install(cache::InstallOptions {
                        activate: !no_activate,
                        dir,
                        json,
                        quiet,
                    })
                }
                CacheCommands::Activate => cache::run_activate(dir, json, quiet),
                CacheCommands::Fetch { url, method, out } => {
                    cache::run_fetch(cache::FetchOptions {
                        url,
                        method,
                        out,
                        dir,
                        json,
                        quiet,
                    })
                }
                CacheCommands::Status => cache::run_status(dir, json, quiet),
            },
            Commands::Shell => shell::run(dir),
        }
    }
}
