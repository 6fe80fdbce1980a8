//! HEAD characterization of user requests.
//!
//! Before any download starts, each request is probed through a worker to
//! learn its content length and whether the server honors byte ranges. The
//! probe carries a short timeout; transport failures become per-request
//! outcomes, never process failures.

use curl::easy::Easy;
use std::cell::RefCell;
use std::str;
use std::time::Duration;

use super::ProxyDownloader;
use crate::jobs::{consume_jobs, Job};
use crate::request::UserRequest;

/// Outcome of characterizing one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStatus {
    Available,
    NotFound,
    ConnectionTimeout,
    ConnectionRefused,
}

impl std::fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProbeStatus::Available => "available",
            ProbeStatus::NotFound => "not found",
            ProbeStatus::ConnectionTimeout => "connection timeout",
            ProbeStatus::ConnectionRefused => "connection refused",
        };
        f.write_str(s)
    }
}

/// A user request enriched with what the HEAD probe learned.
#[derive(Debug, Clone)]
pub struct ResourceRequest {
    pub url: String,
    pub dest: std::path::PathBuf,
    pub content_length: u64,
    pub accepts_range: bool,
    pub status: ProbeStatus,
}

impl ResourceRequest {
    pub fn is_available(&self) -> bool {
        self.status == ProbeStatus::Available
    }

    fn unavailable(request: &UserRequest, status: ProbeStatus) -> Self {
        Self {
            url: request.url.clone(),
            dest: request.dest.clone(),
            content_length: 0,
            accepts_range: false,
            status,
        }
    }
}

/// Probe every request through the worker pool, one worker per in-flight
/// probe, and return the workers alongside the characterizations (ordered
/// like `requests`).
pub fn characterize(
    workers: Vec<ProxyDownloader>,
    requests: &[UserRequest],
    timeout: Duration,
) -> (Vec<ProxyDownloader>, Vec<ResourceRequest>) {
    let jobs: Vec<Job<ProxyDownloader, ResourceRequest>> = requests
        .iter()
        .cloned()
        .map(|request| {
            let job: Job<ProxyDownloader, ResourceRequest> =
                Box::new(move |worker: &mut ProxyDownloader| probe(worker, &request, timeout));
            job
        })
        .collect();

    let (workers, outcomes) = consume_jobs(workers, jobs);
    let characterized = outcomes
        .into_iter()
        .zip(requests)
        .map(|(outcome, request)| match outcome {
            Some(r) => r,
            None => {
                tracing::warn!(url = %request.url, "probe job panicked");
                ResourceRequest::unavailable(request, ProbeStatus::ConnectionRefused)
            }
        })
        .collect();
    (workers, characterized)
}

/// HEAD one request through one worker.
pub fn probe(
    worker: &ProxyDownloader,
    request: &UserRequest,
    timeout: Duration,
) -> ResourceRequest {
    let headers: RefCell<Vec<String>> = RefCell::new(Vec::new());

    let mut easy = match worker.handle() {
        Ok(easy) => easy,
        Err(e) => {
            tracing::debug!(url = %request.url, "probe setup failed: {}", e);
            return ResourceRequest::unavailable(request, ProbeStatus::ConnectionRefused);
        }
    };

    if let Err(e) = configure(&mut easy, &request.url, timeout) {
        tracing::debug!(url = %request.url, "probe setup failed: {}", e);
        return ResourceRequest::unavailable(request, ProbeStatus::ConnectionRefused);
    }

    let performed = {
        let mut transfer = easy.transfer();
        let header = transfer.header_function(|line| {
            if let Ok(line) = str::from_utf8(line) {
                let line = line.trim_end();
                // Keep only the final response's header block across redirects.
                if line.starts_with("HTTP/") {
                    headers.borrow_mut().clear();
                }
                headers.borrow_mut().push(line.to_string());
            }
            true
        });
        match header {
            Ok(()) => transfer.perform(),
            Err(e) => Err(e),
        }
    };

    if let Err(e) = performed {
        let status = if e.is_operation_timedout() {
            ProbeStatus::ConnectionTimeout
        } else {
            ProbeStatus::ConnectionRefused
        };
        tracing::debug!(url = %request.url, %status, "probe failed: {}", e);
        return ResourceRequest::unavailable(request, status);
    }

    let code = easy.response_code().unwrap_or(0);
    if code != 200 {
        tracing::debug!(url = %request.url, code, "probe rejected");
        return ResourceRequest::unavailable(request, ProbeStatus::NotFound);
    }

    let (content_length, accepts_range) = parse_headers(&headers.borrow());
    ResourceRequest {
        url: request.url.clone(),
        dest: request.dest.clone(),
        content_length,
        accepts_range,
        status: ProbeStatus::Available,
    }
}

fn configure(easy: &mut Easy, url: &str, timeout: Duration) -> Result<(), curl::Error> {
    easy.url(url)?;
    easy.nobody(true)?;
    easy.connect_timeout(timeout)?;
    easy.timeout(timeout)?;
    Ok(())
}

/// Extract `Content-Length` (0 when absent or unparsable) and
/// `Accept-Ranges: bytes` from raw header lines.
fn parse_headers(lines: &[String]) -> (u64, bool) {
    let mut content_length = 0u64;
    let mut accepts_range = false;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            let value = value.trim();
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.parse().unwrap_or(0);
            } else if name.eq_ignore_ascii_case("accept-ranges") {
                accepts_range = value.eq_ignore_ascii_case("bytes");
            }
        }
    }
    (content_length, accepts_range)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_headers_full() {
        let (len, ranges) = parse_headers(&lines(&[
            "HTTP/1.1 200 OK",
            "Content-Length: 4096",
            "Accept-Ranges: bytes",
        ]));
        assert_eq!(len, 4096);
        assert!(ranges);
    }

    #[test]
    fn parse_headers_case_insensitive() {
        let (len, ranges) = parse_headers(&lines(&[
            "content-length: 17",
            "ACCEPT-RANGES: BYTES",
        ]));
        assert_eq!(len, 17);
        assert!(ranges);
    }

    #[test]
    fn parse_headers_none_advertised() {
        let (len, ranges) = parse_headers(&lines(&["HTTP/1.1 200 OK", "Server: x"]));
        assert_eq!(len, 0);
        assert!(!ranges);
    }

    #[test]
    fn parse_headers_rejects_non_byte_ranges() {
        let (_, ranges) = parse_headers(&lines(&["Accept-Ranges: none"]));
        assert!(!ranges);
    }

    #[test]
    fn parse_headers_bad_length_is_zero() {
        let (len, _) = parse_headers(&lines(&["Content-Length: banana"]));
        assert_eq!(len, 0);
    }
}
