pub mod batch;
pub mod queue;

pub use batch::Batch;
pub use queue::{
    BufferError, BufferMetrics, EventBuffer, OverflowPolicy, SharedBuffer, SubmitOutcome,
};
