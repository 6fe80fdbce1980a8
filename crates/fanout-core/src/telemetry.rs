//! Lifecycle observer seam for out-of-core UIs.
//!
//! The engine reports scheduling events through this trait instead of owning
//! any rendering. Implementations must return quickly (callbacks run on the
//! dispatcher and fetch threads) and tolerate event reordering across
//! threads; no callback order is guaranteed beyond per-segment causality.

use crate::resource::Segment;

/// Receiver for engine lifecycle events. Every hook defaults to a no-op, so
/// implementors override only what they render.
pub trait Telemetry: Send + Sync {
    /// A worker began fetching `segment`.
    fn on_fetch_start(&self, _segment: &Segment) {}

    /// A split minted `segment` as a new unit of work.
    fn on_segment_added(&self, _segment: &Segment) {}

    /// `segment` reached a terminal state (downloaded or failed).
    fn on_segment_settled(&self, _segment: &Segment) {}

    /// The dispatcher found no dispatchable work and is backing off.
    fn on_dispatcher_idle(&self) {}
}

/// Headless default: ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Resource;

    #[test]
    fn noop_accepts_events() {
        let dir = tempfile::tempdir().unwrap();
        let resource = Resource::new(
            "http://example.test/file",
            dir.path().join("f.bin"),
            10,
            true,
        );
        let segments = resource.slice_initial(10);

        let telemetry = NoopTelemetry;
        telemetry.on_fetch_start(&segments[0]);
        telemetry.on_segment_added(&segments[0]);
        telemetry.on_segment_settled(&segments[0]);
        telemetry.on_dispatcher_idle();
    }
}
