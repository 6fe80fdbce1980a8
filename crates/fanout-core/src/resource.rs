//! Resource and segment model.
//!
//! A `Resource` is one remote file; it owns the `Segment`s partitioning its
//! byte range and the lazily opened output file. Segments are the unit of
//! scheduling: they move through the PENDING → DOWNLOADING → DOWNLOADED /
//! FAILED state machine, carry a retry budget, and can be halved while
//! downloading so idle workers can steal the tail.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::config::RETRY_BUDGET;
use crate::storage::OutputFile;

/// Lifecycle status shared by segments and (derived) resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Pending,
    Downloading,
    Downloaded,
    Failed,
}

impl TransferStatus {
    /// Terminal states: nothing will move this segment again.
    pub fn is_settled(self) -> bool {
        matches!(self, TransferStatus::Downloaded | TransferStatus::Failed)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Downloading => "downloading",
            TransferStatus::Downloaded => "downloaded",
            TransferStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// State-machine contract breach or I/O failure inside the model.
///
/// Everything except `Io` indicates a scheduler bug rather than a runtime
/// condition; the dispatcher treats those as fatal.
#[derive(Debug)]
pub enum StateError {
    /// Operation requires PENDING.
    NotPending(TransferStatus),
    /// Operation requires DOWNLOADING.
    NotDownloading(TransferStatus),
    /// Retry budget already exhausted.
    BudgetExhausted,
    /// Write attempted with no open output file.
    FileNotOpen,
    /// Segment outlived its resource.
    Detached,
    /// Opening or writing the output file failed.
    Io(std::io::Error),
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateError::NotPending(s) => write!(f, "segment is {} (expected pending)", s),
            StateError::NotDownloading(s) => {
                write!(f, "segment is {} (expected downloading)", s)
            }
            StateError::BudgetExhausted => write!(f, "segment has no retry budget left"),
            StateError::FileNotOpen => write!(f, "output file is not open"),
            StateError::Detached => write!(f, "segment outlived its resource"),
            StateError::Io(e) => write!(f, "output file: {}", e),
        }
    }
}

impl std::error::Error for StateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StateError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StateError {
    fn from(e: std::io::Error) -> Self {
        StateError::Io(e)
    }
}

/// One remote file being downloaded to one destination path.
#[derive(Debug)]
pub struct Resource {
    pub url: String,
    pub dest: PathBuf,
    pub content_length: u64,
    pub accepts_range: bool,
    state: Mutex<ResourceState>,
}

#[derive(Debug, Default)]
struct ResourceState {
    file: Option<OutputFile>,
    active: Vec<Arc<Segment>>,
    completed: Vec<Arc<Segment>>,
}

impl Resource {
    pub fn new(
        url: impl Into<String>,
        dest: impl Into<PathBuf>,
        content_length: u64,
        accepts_range: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            url: url.into(),
            dest: dest.into(),
            content_length,
            accepts_range,
            state: Mutex::new(ResourceState::default()),
        })
    }

    /// Slice this resource into its initial segments and install them as the
    /// active set.
    ///
    /// Range-accepting resources get contiguous chunks of at most
    /// `chunk_hint` bytes (the final chunk may be shorter); anything else
    /// gets a single whole-range segment. A zero `chunk_hint` is clamped to
    /// one byte.
    pub fn slice_initial(self: &Arc<Self>, chunk_hint: u64) -> Vec<Arc<Segment>> {
        let mut segments = Vec::new();
        if self.accepts_range {
            let chunk = chunk_hint.max(1);
            let mut from = 0u64;
            while from < self.content_length {
                let to = (from + chunk).min(self.content_length);
                segments.push(Segment::new(self, from, to));
                from = to;
            }
        } else {
            segments.push(Segment::new(self, 0, self.content_length));
        }

        let mut state = self.state.lock().unwrap();
        state.active = segments.clone();
        state.completed.clear();
        segments
    }

    /// Derived status over active and completed segments.
    ///
    /// All-PENDING reports PENDING, any DOWNLOADING reports DOWNLOADING,
    /// all-DOWNLOADED reports DOWNLOADED; every other mix (including
    /// PENDING+DOWNLOADED with nothing in flight) reports FAILED.
    pub fn status(&self) -> TransferStatus {
        // Snapshot the sets first; holding the resource lock while taking
        // segment locks would invert the segment→resource lock order used
        // by start_download.
        let segments = self.segments_snapshot();
        let mut all_pending = true;
        let mut all_downloaded = true;
        for seg in &segments {
            let status = seg.status();
            if status == TransferStatus::Downloading {
                return TransferStatus::Downloading;
            }
            if status != TransferStatus::Pending {
                all_pending = false;
            }
            if status != TransferStatus::Downloaded {
                all_downloaded = false;
            }
        }

        if all_pending && !all_downloaded {
            TransferStatus::Pending
        } else if all_downloaded && !all_pending {
            TransferStatus::Downloaded
        } else {
            TransferStatus::Failed
        }
    }

    /// Write `data` at `offset` through the open output file.
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<usize, StateError> {
        let file = {
            let state = self.state.lock().unwrap();
            state.file.clone().ok_or(StateError::FileNotOpen)?
        };
        Ok(file.write_at(offset, data)?)
    }

    pub fn is_file_open(&self) -> bool {
        self.state.lock().unwrap().file.is_some()
    }

    /// Bytes acknowledged across all segments (for reporting).
    pub fn bytes_acked(&self) -> u64 {
        self.segments_snapshot()
            .iter()
            .map(|seg| seg.ack().saturating_sub(seg.from))
            .sum()
    }

    /// Active and completed segments under one short lock hold.
    fn segments_snapshot(&self) -> Vec<Arc<Segment>> {
        let state = self.state.lock().unwrap();
        state
            .active
            .iter()
            .chain(state.completed.iter())
            .cloned()
            .collect()
    }

    /// Open the output file if it is not open yet.
    fn open_file(&self) -> Result<(), StateError> {
        let mut state = self.state.lock().unwrap();
        if state.file.is_none() {
            state.file = Some(OutputFile::open(&self.dest)?);
        }
        Ok(())
    }

    /// Move `seg` from the active set to the completed set; close the file
    /// when nothing active remains.
    fn complete_segment(&self, seg: &Segment) {
        let mut state = self.state.lock().unwrap();
        if let Some(pos) = state
            .active
            .iter()
            .position(|s| std::ptr::eq(Arc::as_ptr(s), seg))
        {
            let owned = state.active.remove(pos);
            state.completed.push(owned);
        }
        if state.active.is_empty() {
            if let Some(file) = state.file.take() {
                if let Err(e) = file.sync() {
                    tracing::warn!(path = %file.path().display(), "sync on close failed: {}", e);
                }
            }
        }
    }

    fn adopt_segment(&self, seg: Arc<Segment>) {
        self.state.lock().unwrap().active.push(seg);
    }
}

/// A contiguous byte interval `[from, to)` of one resource.
///
/// `to` is atomic because the dispatcher truncates it during `split` while
/// the owning fetch thread streams; the fetch loop re-reads it before every
/// write. `ack` is the next offset to write; it is owned by the fetch
/// thread but read by the dispatcher when judging splittability.
#[derive(Debug)]
pub struct Segment {
    resource: Weak<Resource>,
    pub from: u64,
    to: AtomicU64,
    ack: AtomicU64,
    state: Mutex<SegmentState>,
}

#[derive(Debug)]
struct SegmentState {
    status: TransferStatus,
    ttl: u8,
}

impl Segment {
    fn new(resource: &Arc<Resource>, from: u64, to: u64) -> Arc<Self> {
        Arc::new(Self {
            resource: Arc::downgrade(resource),
            from,
            to: AtomicU64::new(to),
            ack: AtomicU64::new(from),
            state: Mutex::new(SegmentState {
                status: TransferStatus::Pending,
                ttl: RETRY_BUDGET,
            }),
        })
    }

    /// The owning resource. Fails only if the resource was dropped while the
    /// segment is still referenced, which no correct scheduler does.
    pub fn resource(&self) -> Result<Arc<Resource>, StateError> {
        self.resource.upgrade().ok_or(StateError::Detached)
    }

    /// Exclusive upper bound. May shrink while the segment downloads.
    pub fn to(&self) -> u64 {
        self.to.load(Ordering::Acquire)
    }

    /// Next byte offset to write; `from` before transfer, `to` on success.
    pub fn ack(&self) -> u64 {
        self.ack.load(Ordering::Acquire)
    }

    pub fn content_length(&self) -> u64 {
        self.to().saturating_sub(self.from)
    }

    /// Bytes not yet acknowledged.
    pub fn remaining(&self) -> u64 {
        self.to().saturating_sub(self.ack())
    }

    pub fn status(&self) -> TransferStatus {
        self.state.lock().unwrap().status
    }

    pub fn ttl(&self) -> u8 {
        self.state.lock().unwrap().ttl
    }

    pub fn is_settled(&self) -> bool {
        self.status().is_settled()
    }

    /// Record `n` freshly written bytes. Only the owning fetch thread calls
    /// this.
    pub fn advance_ack(&self, n: u64) {
        self.ack.fetch_add(n, Ordering::AcqRel);
    }

    /// PENDING → DOWNLOADING. Opens the resource's output file on first use
    /// and re-arms `ack` to `from` for the new attempt.
    pub fn start_download(&self) -> Result<(), StateError> {
        let mut state = self.state.lock().unwrap();
        if state.status != TransferStatus::Pending {
            return Err(StateError::NotPending(state.status));
        }
        if state.ttl == 0 {
            return Err(StateError::BudgetExhausted);
        }
        self.resource()?.open_file()?;
        self.ack.store(self.from, Ordering::Release);
        state.status = TransferStatus::Downloading;
        Ok(())
    }

    /// DOWNLOADING → PENDING (budget left) or FAILED (budget gone). Burns
    /// one ttl and resets `ack`; the next attempt re-fetches the whole
    /// range.
    pub fn cancel_download(&self) -> Result<(), StateError> {
        let mut state = self.state.lock().unwrap();
        if state.status != TransferStatus::Downloading {
            return Err(StateError::NotDownloading(state.status));
        }
        if state.ttl == 0 {
            return Err(StateError::BudgetExhausted);
        }
        state.ttl -= 1;
        self.ack.store(self.from, Ordering::Release);
        state.status = if state.ttl == 0 {
            TransferStatus::Failed
        } else {
            TransferStatus::Pending
        };
        Ok(())
    }

    /// DOWNLOADING → DOWNLOADED. Moves the segment into the resource's
    /// completed set; the resource closes its file when no active segment
    /// remains.
    pub fn finish_download(&self) -> Result<(), StateError> {
        let resource = self.resource()?;
        let mut state = self.state.lock().unwrap();
        if state.status != TransferStatus::Downloading {
            return Err(StateError::NotDownloading(state.status));
        }
        state.status = TransferStatus::Downloaded;
        drop(state);
        resource.complete_segment(self);
        Ok(())
    }

    /// Halve a downloading segment: truncate this one to `[from, mid)` and
    /// return a fresh PENDING sibling `[mid, to)` appended to the resource's
    /// active set.
    ///
    /// Callers gate on `remaining()` exceeding the split threshold; a
    /// segment that settled since that check makes this return
    /// `NotDownloading`, which the dispatcher treats as "skip", not as a
    /// fault.
    pub fn split(&self) -> Result<Arc<Segment>, StateError> {
        let resource = self.resource()?;
        let state = self.state.lock().unwrap();
        if state.status != TransferStatus::Downloading {
            return Err(StateError::NotDownloading(state.status));
        }
        let to = self.to.load(Ordering::Acquire);
        let mid = self.from + (to - self.from) / 2;
        let sibling = Segment::new(&resource, mid, to);
        self.to.store(mid, Ordering::Release);
        drop(state);
        resource.adopt_segment(Arc::clone(&sibling));
        Ok(sibling)
    }

    /// Range spec for `curl::easy::Easy::range` (inclusive end): covers the
    /// current `[from, to)` exactly, so the written file is byte-equal to
    /// the source.
    pub fn range_spec(&self) -> String {
        let to = self.to();
        if self.from >= to {
            "0-0".to_string()
        } else {
            format!("{}-{}", self.from, to - 1)
        }
    }

    /// Write `data` at `offset` through the owning resource's file. Requires
    /// DOWNLOADING.
    pub fn write_at(&self, data: &[u8], offset: u64) -> Result<usize, StateError> {
        let status = self.status();
        if status != TransferStatus::Downloading {
            return Err(StateError::NotDownloading(status));
        }
        self.resource()?.write_at(offset, data)
    }
}
