//! Mask production: the in-thread adapter, its off-thread worker
//! twin, and the external-model interface they both implement against.

pub mod adapter;
pub mod producer;
pub mod worker;

pub use adapter::{MaskAdapter, SegmentOutcome};
pub use producer::{ConfidenceMap, MaskProducer, ScratchSurface};
pub use worker::{CapturedFrame, MaskWorker, WorkerMaskResult};
