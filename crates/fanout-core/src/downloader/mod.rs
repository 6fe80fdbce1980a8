//! Proxy-bound HTTP workers.
//!
//! A `ProxyDownloader` is the worker capability the dispatcher hands around:
//! one ranged GET (or HEAD probe) at a time, tunneled through its proxy.
//! Workers are cheap identity tokens; each request builds a fresh curl
//! handle configured for the worker's proxy.

mod fetch;
mod probe;

pub use fetch::FetchOutcome;
pub use probe::{characterize, probe, ProbeStatus, ResourceRequest};

use anyhow::Result;
use curl::easy::Easy;
use std::sync::Arc;

use crate::resource::{Segment, StateError};

/// One worker: a proxy-bound HTTP capability.
#[derive(Debug, Clone)]
pub struct ProxyDownloader {
    proxy: Option<String>,
}

impl ProxyDownloader {
    /// Worker tunneling through `http://<host>:<port>` with TLS
    /// verification disabled (the proxies re-terminate TLS).
    pub fn via_proxy(host: &str, port: u16) -> Self {
        Self {
            proxy: Some(format!("http://{}:{}", host, port)),
        }
    }

    /// Worker talking to origins directly. Used by tests and by integrators
    /// that front their own egress.
    pub fn direct() -> Self {
        Self { proxy: None }
    }

    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }

    /// Ranged GET for one segment; see [`fetch::fetch`] for the protocol.
    pub fn fetch(
        &self,
        segment: &Arc<Segment>,
        buffer_bytes: usize,
    ) -> Result<FetchOutcome, StateError> {
        fetch::fetch(self, segment, buffer_bytes)
    }

    /// Fresh curl handle configured for this worker's proxy.
    fn handle(&self) -> Result<Easy, curl::Error> {
        let mut easy = Easy::new();
        if let Some(proxy) = &self.proxy {
            easy.proxy(proxy)?;
        }
        easy.ssl_verify_peer(false)?;
        easy.ssl_verify_host(false)?;
        easy.follow_location(true)?;
        easy.max_redirections(10)?;
        Ok(easy)
    }
}

/// Build a worker pool of exactly `connections` workers, cycling the proxy
/// hosts round-robin. Surplus proxies go unused; a short list backs several
/// workers per proxy.
pub fn cluster(hosts: &[String], connections: usize, port: u16) -> Result<Vec<ProxyDownloader>> {
    if hosts.is_empty() {
        anyhow::bail!("no proxy hosts provided");
    }
    if connections == 0 {
        anyhow::bail!("connection count must be at least 1");
    }

    let mut workers = Vec::with_capacity(connections);
    for host in hosts.iter().cycle() {
        workers.push(ProxyDownloader::via_proxy(host, port));
        if workers.len() == connections {
            break;
        }
    }
    Ok(workers)
}
