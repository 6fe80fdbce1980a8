//! Ranged GET for one segment.
//!
//! Streams the response body into positional writes at the segment's `ack`
//! cursor. The segment's `to` may be truncated by a concurrent split, so the
//! limit is re-read before every chunk and writes are clamped to it; once
//! `ack` catches up with the (possibly shrunk) `to`, the transfer is
//! aborted and counted as success.

use curl::easy::Easy;
use std::cell::{Cell, RefCell};
use std::str;
use std::sync::Arc;

use super::ProxyDownloader;
use crate::resource::{Segment, StateError};

/// Result of one fetch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Segment range fully acknowledged, or clean end of stream.
    Success,
    /// Transport failed before a response status was seen. Retryable.
    ClientError,
    /// Response status was neither 200 nor 206. Retryable.
    StatusError,
    /// Stream or positional write died mid-body. Retryable.
    ReadError,
}

/// Download `segment` through `worker`.
///
/// Drives the segment's state machine: PENDING → DOWNLOADING on entry, then
/// DOWNLOADED on success or back to PENDING/FAILED via `cancel_download` on
/// a retryable outcome. Returns `Err` only for state-machine contract
/// breaches, which the dispatcher treats as fatal.
pub(super) fn fetch(
    worker: &ProxyDownloader,
    segment: &Arc<Segment>,
    buffer_bytes: usize,
) -> Result<FetchOutcome, StateError> {
    segment.start_download()?;
    let resource = segment.resource()?;

    let mut easy = match configure(worker, &resource.url, segment, buffer_bytes) {
        Ok(easy) => easy,
        Err(e) => {
            tracing::debug!(url = %resource.url, "fetch setup failed: {}", e);
            segment.cancel_download()?;
            return Ok(FetchOutcome::ClientError);
        }
    };

    // Shared with the transfer callbacks below; read back after perform.
    let status = Cell::new(0u32);
    let finished_early = Cell::new(false);
    let write_error: RefCell<Option<StateError>> = RefCell::new(None);

    let performed = {
        let mut transfer = easy.transfer();

        let header = transfer.header_function(|line| {
            if let Ok(line) = str::from_utf8(line) {
                // Redirects emit several header blocks; keep the last status.
                if line.starts_with("HTTP/") {
                    let code = line
                        .split_whitespace()
                        .nth(1)
                        .and_then(|s| s.parse::<u32>().ok())
                        .unwrap_or(0);
                    status.set(code);
                }
            }
            true
        });
        if let Err(e) = header {
            tracing::debug!(url = %resource.url, "fetch setup failed: {}", e);
            drop(transfer);
            segment.cancel_download()?;
            return Ok(FetchOutcome::ClientError);
        }

        let write = transfer.write_function(|data| {
            let code = status.get();
            if code != 200 && code != 206 {
                // Error body; abort and let the status check classify.
                return Ok(0);
            }

            let limit = segment.to();
            let ack = segment.ack();
            if ack >= limit {
                finished_early.set(true);
                return Ok(0);
            }

            let take = data.len().min((limit - ack) as usize);
            match segment.write_at(&data[..take], ack) {
                Ok(_) => {
                    segment.advance_ack(take as u64);
                    // `to` may have shrunk while this chunk was written.
                    if segment.ack() >= segment.to() {
                        finished_early.set(true);
                        return Ok(0);
                    }
                    Ok(data.len())
                }
                Err(e) => {
                    write_error.borrow_mut().replace(e);
                    Ok(0)
                }
            }
        });
        if let Err(e) = write {
            tracing::debug!(url = %resource.url, "fetch setup failed: {}", e);
            drop(transfer);
            segment.cancel_download()?;
            return Ok(FetchOutcome::ClientError);
        }

        transfer.perform()
    };

    if finished_early.get() {
        segment.finish_download()?;
        return Ok(FetchOutcome::Success);
    }

    let code = status.get();
    if code == 200 || code == 206 {
        match performed {
            // Natural end of stream counts as success even short of `to`.
            Ok(()) => {
                segment.finish_download()?;
                Ok(FetchOutcome::Success)
            }
            Err(e) => {
                match write_error.borrow_mut().take() {
                    Some(io) => tracing::debug!(
                        url = %resource.url,
                        from = segment.from,
                        "segment write failed: {}",
                        io
                    ),
                    None => tracing::debug!(
                        url = %resource.url,
                        from = segment.from,
                        "segment read failed: {}",
                        e
                    ),
                }
                segment.cancel_download()?;
                Ok(FetchOutcome::ReadError)
            }
        }
    } else if code == 0 {
        tracing::debug!(url = %resource.url, from = segment.from, "no response from client");
        segment.cancel_download()?;
        Ok(FetchOutcome::ClientError)
    } else {
        tracing::debug!(url = %resource.url, from = segment.from, code, "unexpected status");
        segment.cancel_download()?;
        Ok(FetchOutcome::StatusError)
    }
}

fn configure(
    worker: &ProxyDownloader,
    url: &str,
    segment: &Arc<Segment>,
    buffer_bytes: usize,
) -> Result<Easy, curl::Error> {
    let mut easy = worker.handle()?;
    easy.url(url)?;
    easy.get(true)?;
    easy.range(&segment.range_spec())?;
    easy.buffer_size(buffer_bytes)?;
    Ok(easy)
}
