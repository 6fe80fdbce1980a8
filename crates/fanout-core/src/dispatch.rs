//! Work-stealing dispatch of segments onto the worker pool.
//!
//! A single dispatcher loop owns two queues: idle workers and pending
//! segments. Each dispatched segment runs on its own fetch thread; when the
//! pending queue drains, idle workers steal work by halving the largest
//! still-downloading segment. The loop exits once every segment in the
//! universe is settled (downloaded or failed).

use anyhow::Result;
use std::sync::mpsc::{self, TryRecvError};
use std::sync::{Arc, Mutex, Weak};
use std::thread;

use crate::config::EngineConfig;
use crate::downloader::{FetchOutcome, ProxyDownloader};
use crate::resource::{Segment, StateError, TransferStatus};
use crate::sorted_list::SortedList;
use crate::telemetry::Telemetry;

/// Splittable-list order: largest segment first, dead handles last.
fn larger_first(a: &Weak<Segment>, b: &Weak<Segment>) -> bool {
    let len = |w: &Weak<Segment>| w.upgrade().map(|s| s.content_length()).unwrap_or(0);
    len(a) > len(b)
}

fn same_segment(a: &Weak<Segment>, b: &Weak<Segment>) -> bool {
    a.ptr_eq(b)
}

/// The scheduling core: matches idle workers with pending or splittable
/// segments until every segment settles.
pub struct Dispatcher {
    config: EngineConfig,
    telemetry: Arc<dyn Telemetry>,
}

impl Dispatcher {
    pub fn new(config: EngineConfig, telemetry: Arc<dyn Telemetry>) -> Self {
        Self { config, telemetry }
    }

    /// Download every segment. `segments` is the full initial universe (all
    /// resources flattened); split siblings join it as they are minted.
    ///
    /// Returns `Ok` when all segments settled, including runs where some
    /// failed; failures surface through segment state and telemetry, not as
    /// process errors. Returns `Err` only on an empty worker pool or a
    /// state-machine contract breach (a scheduler bug, not a runtime
    /// condition).
    pub fn download(
        &self,
        workers: Vec<ProxyDownloader>,
        mut segments: Vec<Arc<Segment>>,
    ) -> Result<()> {
        if workers.is_empty() {
            anyhow::bail!("worker pool is empty");
        }

        // Largest first: big segments start early, so they are the ones
        // still running (and splittable) when the queue drains.
        segments.sort_by(|a, b| b.content_length().cmp(&a.content_length()));

        let worker_count = workers.len();
        let (worker_tx, worker_rx) = mpsc::sync_channel::<ProxyDownloader>(worker_count);
        for worker in workers {
            worker_tx
                .send(worker)
                .expect("idle queue rejected initial worker");
        }

        let (pending_tx, pending_rx) = mpsc::channel::<Arc<Segment>>();
        for segment in &segments {
            pending_tx
                .send(Arc::clone(segment))
                .expect("pending queue closed before start");
        }

        let splittable: Arc<SortedList<Weak<Segment>>> =
            Arc::new(SortedList::new(larger_first, same_segment));
        let fatal: Arc<Mutex<Option<StateError>>> = Arc::new(Mutex::new(None));
        let mut handles = Vec::new();

        tracing::info!(
            workers = worker_count,
            segments = segments.len(),
            "dispatch starting"
        );

        loop {
            let worker = worker_rx.recv().expect("idle worker queue closed");

            if fatal.lock().unwrap().is_some() {
                break;
            }
            if segments.iter().all(|seg| seg.is_settled()) {
                break;
            }

            let segment = match pending_rx.try_recv() {
                Ok(segment) => Some(segment),
                Err(TryRecvError::Empty) => {
                    // Split siblings are new to the universe; queued segments
                    // are already in it.
                    let sibling = self.steal_split(&splittable);
                    if let Some(sibling) = &sibling {
                        segments.push(Arc::clone(sibling));
                    }
                    sibling
                }
                Err(TryRecvError::Disconnected) => {
                    unreachable!("dispatcher holds the pending sender")
                }
            };

            let segment = match segment {
                Some(segment) => segment,
                None => {
                    worker_tx.send(worker).expect("idle queue full");
                    tracing::trace!("no dispatchable work, backing off");
                    self.telemetry.on_dispatcher_idle();
                    thread::sleep(self.config.idle_poll());
                    continue;
                }
            };

            match segment.resource() {
                Ok(resource) if resource.accepts_range => {
                    splittable.add(Arc::downgrade(&segment));
                }
                Ok(_) => {}
                Err(e) => {
                    fatal.lock().unwrap().get_or_insert(e);
                    worker_tx.send(worker).expect("idle queue full");
                    continue;
                }
            }

            let worker_tx = worker_tx.clone();
            let pending_tx = pending_tx.clone();
            let splittable = Arc::clone(&splittable);
            let telemetry = Arc::clone(&self.telemetry);
            let fatal = Arc::clone(&fatal);
            let buffer_bytes = self.config.body_buffer_bytes;
            handles.push(thread::spawn(move || {
                telemetry.on_fetch_start(&segment);
                let outcome = worker.fetch(&segment, buffer_bytes);
                splittable.remove(&Arc::downgrade(&segment));

                match outcome {
                    Ok(FetchOutcome::Success) => {
                        tracing::debug!(
                            from = segment.from,
                            to = segment.to(),
                            "segment downloaded"
                        );
                        telemetry.on_segment_settled(&segment);
                    }
                    Ok(result) => {
                        if segment.ttl() > 0 {
                            tracing::debug!(
                                from = segment.from,
                                to = segment.to(),
                                ttl = segment.ttl(),
                                ?result,
                                "segment requeued for retry"
                            );
                            let _ = pending_tx.send(Arc::clone(&segment));
                        } else {
                            tracing::warn!(
                                from = segment.from,
                                to = segment.to(),
                                ?result,
                                "segment abandoned, retry budget exhausted"
                            );
                            telemetry.on_segment_settled(&segment);
                        }
                    }
                    Err(e) => {
                        tracing::error!("segment contract breached: {}", e);
                        fatal.lock().unwrap().get_or_insert(e);
                    }
                }

                let _ = worker_tx.send(worker);
            }));
        }

        for handle in handles {
            let _ = handle.join();
        }

        if let Some(e) = fatal.lock().unwrap().take() {
            return Err(anyhow::Error::new(e).context("dispatch aborted"));
        }

        let failed = segments
            .iter()
            .filter(|s| s.status() == TransferStatus::Failed)
            .count();
        tracing::info!(
            segments = segments.len(),
            failed,
            "dispatch finished"
        );
        Ok(())
    }

    /// Steal work by splitting: drain the splittable list front-first,
    /// skipping settled or too-small entries, and halve the first usable
    /// one. The sibling is the new unit of work; the popped original keeps
    /// downloading on its current worker and is not re-registered.
    fn steal_split(&self, splittable: &SortedList<Weak<Segment>>) -> Option<Arc<Segment>> {
        let mut candidate = None;
        // Entries registered just before their fetch thread flips them to
        // DOWNLOADING are put back for the next round instead of dropped.
        let mut revisit = Vec::new();

        while let Some(weak) = splittable.pop_front() {
            let Some(segment) = weak.upgrade() else {
                continue;
            };
            if segment.is_settled() || segment.remaining() <= self.config.min_split_bytes {
                continue;
            }
            match segment.split() {
                Ok(sibling) => {
                    tracing::debug!(
                        from = segment.from,
                        mid = sibling.from,
                        to = sibling.to(),
                        "split downloading segment"
                    );
                    self.telemetry.on_segment_added(&sibling);
                    candidate = Some(sibling);
                    break;
                }
                Err(StateError::NotDownloading(TransferStatus::Pending)) => {
                    revisit.push(weak);
                }
                Err(_) => {}
            }
        }

        for weak in revisit {
            splittable.add(weak);
        }
        candidate
    }
}
