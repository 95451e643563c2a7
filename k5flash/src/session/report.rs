//! Progress reporting sink for long-running session operations.

/// Something a user may want to see while a session runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Human-readable status line.
    Status(String),
    /// A block transfer is about to start.
    BlockStarted {
        /// Zero-based block index.
        index: usize,
        /// Total blocks in this operation.
        count: usize,
        /// Absolute address of the block.
        address: usize,
        /// Block length in bytes.
        len: usize,
    },
    /// A block was acknowledged.
    BlockDone {
        /// Zero-based block index.
        index: usize,
        /// Total blocks in this operation.
        count: usize,
    },
    /// A beacon arrived while waiting for a write acknowledgement.
    BeaconAbsorbed,
    /// The operation completed.
    Finished,
}

/// Receives session [`Event`]s.
pub trait Reporter {
    /// Handle one event.
    fn report(&mut self, event: &Event);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn report(&mut self, _event: &Event) {}
}

impl<F> Reporter for F
where
    F: FnMut(&Event),
{
    fn report(&mut self, event: &Event) {
        self(event);
    }
}
