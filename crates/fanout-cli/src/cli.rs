use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use fanout_core::config;
use fanout_core::dispatch::Dispatcher;
use fanout_core::downloader;
use fanout_core::request;
use fanout_core::resource::{Resource, TransferStatus};
use fanout_core::telemetry::NoopTelemetry;

/// Proxy fan-out parallel downloader.
#[derive(Debug, Parser)]
#[command(name = "fanout")]
#[command(about = "Download files in parallel byte-range segments over a pool of HTTP proxies", long_about = None)]
pub struct Cli {
    /// Total number of proxied connections to download with.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub connections: u32,

    /// Path to a file listing proxy hosts, one per line.
    #[arg(long)]
    pub proxies: PathBuf,

    /// Path to a file listing download requests, one per line
    /// (`URL`, or `URL > PATH`).
    #[arg(long)]
    pub requests: PathBuf,

    /// Append engine logs to this file; omit to discard logs.
    #[arg(long)]
    pub log: Option<PathBuf>,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        let cfg = config::load_or_init().unwrap_or_else(|e| {
            tracing::warn!("config unavailable ({}), using defaults", e);
            config::EngineConfig::default()
        });

        let proxy_hosts = request::read_non_empty_lines(&self.proxies)?;
        if proxy_hosts.is_empty() {
            anyhow::bail!("no proxy servers in {}", self.proxies.display());
        }

        let request_lines = request::read_non_empty_lines(&self.requests)?;
        let user_requests = request::parse_request_lines(&request_lines)?;
        if user_requests.is_empty() {
            anyhow::bail!("no download requests in {}", self.requests.display());
        }

        let workers = downloader::cluster(&proxy_hosts, self.connections as usize, cfg.proxy_port)?;
        tracing::info!(
            workers = workers.len(),
            requests = user_requests.len(),
            "characterizing requests"
        );
        let (workers, characterized) =
            downloader::characterize(workers, &user_requests, cfg.head_timeout());

        let mut available = Vec::new();
        for request in characterized {
            if request.is_available() {
                available.push(request);
            } else {
                println!("skipping {}: {}", request.url, request.status);
            }
        }
        if available.is_empty() {
            anyhow::bail!("no downloadable resources");
        }

        let total: u64 = available.iter().map(|r| r.content_length).sum();
        let worker_count = workers.len() as u64;
        let chunk_hint = total.div_ceil(worker_count);
        tracing::info!(resources = available.len(), total, chunk_hint, "slicing resources");

        let mut resources = Vec::new();
        let mut segments = Vec::new();
        for request in &available {
            let resource = Resource::new(
                request.url.clone(),
                request.dest.clone(),
                request.content_length,
                request.accepts_range,
            );
            segments.extend(resource.slice_initial(chunk_hint));
            resources.push(resource);
        }

        let dispatcher = Dispatcher::new(cfg, Arc::new(NoopTelemetry));
        dispatcher.download(workers, segments)?;

        report(&resources);
        Ok(())
    }
}

/// One line per resource; failures are surfaced here, not as an exit code.
fn report(resources: &[Arc<Resource>]) {
    let mut failed = 0usize;
    println!("{:<12} {:>12} DEST", "STATUS", "BYTES");
    for resource in resources {
        let status = resource.status();
        if status != TransferStatus::Downloaded {
            failed += 1;
        }
        println!(
            "{:<12} {:>12} {}",
            status.to_string(),
            resource.bytes_acked(),
            resource.dest.display()
        );
    }
    if failed > 0 {
        println!("{} of {} downloads failed", failed, resources.len());
    }
}
