//! td cache command implementations.

use std::path::PathBuf;

use serde::Serialize;
use url::Url;

use crate::asset_cache::{
    ActivationReport, AssetRequest, AssetResponse, FetchOutcome, HttpNetwork, InstallReport,
    Network, ResponseSource,
};
use crate::cli::{block_on, Session};
use crate::error::{Error, Result};
use crate::output::{emit_success, HumanOutput, OutputOptions};

pub struct InstallOptions {
    pub activate: bool,
    pub dir: Option<PathBuf>,
    pub json: bool,
    pub quiet: bool,
}

pub struct FetchOptions {
    pub url: String,
    pub method: String,
    pub out: Option<PathBuf>,
    pub dir: Option<PathBuf>,
    pub json: bool,
    pub quiet: bool,
}

#[derive(Serialize)]
struct InstallOutput {
    install: InstallReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    activation: Option<ActivationReport>,
}

#[derive(Serialize)]
struct FetchOutput {
    url: String,
    source: &'static str,
    status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
    bytes: usize,
    revalidated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<PathBuf>,
}

pub fn run_install(options: InstallOptions) -> Result<()> {
    let session = Session::open(options.dir)?;
    let cache = session.asset_cache()?;

    let output = block_on(async {
        let (install, activation) = if options.activate {
            cache.install_and_activate().await?
        } else {
            (cache.install().await?, None)
        };
        Ok::<_, Error>(InstallOutput {
            install,
            activation,
        })
    })??;

    let mut human = HumanOutput::new(format!("td cache install: {}", output.install.namespace));
    human.push_summary("cached", output.install.cached.len().to_string());
    human.push_summary("skipped", output.install.skipped.len().to_string());
    for skipped in &output.install.skipped {
        human.push_warning(format!("{}: {}", skipped.url, skipped.reason));
    }
    match &output.activation {
        Some(activation) => {
            human.push_summary("state", "active");
            for purged in &activation.purged {
                human.push_detail(format!("purged {purged}"));
            }
        }
        None => {
            human.push_summary("state", "waiting");
            human.push_next_step("td cache activate");
        }
    }

    emit_success(
        OutputOptions {
            json: options.json,
            quiet: options.quiet,
        },
        "cache install",
        &output,
        Some(&human),
    )
}

pub fn run_activate(dir: Option<PathBuf>, json: bool, quiet: bool) -> Result<()> {
    let session = Session::open(dir)?;
    let cache = session.asset_cache()?;
    let report = block_on(cache.activate())??;

    let mut human = HumanOutput::new(format!("td cache activate: {}", report.namespace));
    human.push_summary("purged", report.purged.len().to_string());
    for purged in &report.purged {
        human.push_detail(purged.clone());
    }

    emit_success(
        OutputOptions { json, quiet },
        "cache activate",
        &report,
        Some(&human),
    )
}

pub fn run_fetch(options: FetchOptions) -> Result<()> {
    let session = Session::open(options.dir)?;
    let cache = session.asset_cache()?;
    let url = match Url::parse(&options.url) {
        Ok(url) => url,
        Err(_) => cache.resolve(&options.url)?,
    };
    let request = AssetRequest::new(options.method.clone(), url.clone());

    let (response, source, revalidated) = block_on(async {
        match cache.handle(&request).await? {
            FetchOutcome::Served(served) => {
                let revalidated = match served.revalidation {
                    Some(handle) => handle.await.is_ok(),
                    None => false,
                };
                let source = match served.source {
                    ResponseSource::Cache => "cache",
                    ResponseSource::Network => "network",
                    ResponseSource::Placeholder => "placeholder",
                };
                Ok::<(AssetResponse, &'static str, bool), Error>((
                    served.response,
                    source,
                    revalidated,
                ))
            }
            FetchOutcome::Passthrough => {
                let network = HttpNetwork::new();
                let response = network.fetch(&url).await?;
                Ok((response, "passthrough", false))
            }
        }
    })??;

    if let Some(path) = &options.out {
        std::fs::write(path, &response.body)?;
    }

    let output = FetchOutput {
        url: url.to_string(),
        source,
        status: response.status,
        content_type: response.content_type.clone(),
        bytes: response.body.len(),
        revalidated,
        path: options.out.clone(),
    };

    let mut human = HumanOutput::new(format!("{} {}", response.status, url));
    human.push_summary("source", source);
    human.push_summary("bytes", output.bytes.to_string());
    if let Some(content_type) = &output.content_type {
        human.push_summary("type", content_type.clone());
    }
    if let Some(path) = &output.path {
        human.push_summary("path", path.display().to_string());
    }

    emit_success(
        OutputOptions {
            json: options.json,
            quiet: options.quiet,
        },
        "cache fetch",
        &output,
        Some(&human),
    )
}

pub fn run_status(dir: Option<PathBuf>, json: bool, quiet: bool) -> Result<()> {
    let session = Session::open(dir)?;
    let cache = session.asset_cache()?;
    let statuses = block_on(cache.status())??;

    let mut human = HumanOutput::new(format!("td cache status: {}", cache.namespace()));
    if statuses.is_empty() {
        human.push_detail("no namespaces installed");
        human.push_next_step("td cache install");
    }
    for status in &statuses {
        let marker = if status.current { "*" } else { " " };
        human.push_detail(format!(
            "{marker} {} {} ({} entries)",
            status.namespace, status.state, status.entries
        ));
    }

    emit_success(
        OutputOptions { json, quiet },
        "cache status",
        &statuses,
        Some(&human),
    )
}
