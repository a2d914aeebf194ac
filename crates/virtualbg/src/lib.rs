//! virtualbg: GPU-accelerated virtual background processing —
//! background removal, blur, and replacement for a live video frame
//! source, with adaptive quality and auto-framing built in.
//!
//! The external-facing model is [`Processor`]: construct one with a GPU
//! context, a capability report and a [`mask::MaskProducer`] factory,
//! then feed it frames through [`Processor::process_frame`]. Everything
//! else in this crate — the GPU pipeline, the in-thread/off-thread mask
//! adapters, the auto-framer, the adaptive quality controller, and
//! diagnostics — is orchestrated from there.

pub mod autoframe;
pub mod capability;
pub mod config;
pub mod data;
pub mod diagnostics;
pub mod error;
pub mod gpu;
pub mod mask;
pub mod processor;
pub mod quality;

pub use autoframe::{AutoFrameCrop, AutoFramer};
pub use capability::{probe as probe_capability, CapabilityReport};
pub use config::{
    AdaptiveConfig, AutoFrameMode, AutoFrameOptions, BackgroundImageHandle, BackgroundMode, Config,
    ConfigValidationError, DiagnosticsLevel, DiagnosticsOptions, Options, Quality, Rgb,
};
pub use data::{Centroid, CropRegion, FrameSource, MaskBuffer, MotionMap, MotionVector, QualityTier, Surface, TIER_TABLE};
pub use diagnostics::{DiagnosticEvent, Diagnostics, InitEvent, SummaryEvent};
pub use error::{Error, Result};
pub use gpu::{GpuContext, GpuPipeline, OptionsPatch};
pub use mask::{CapturedFrame, ConfidenceMap, MaskAdapter, MaskProducer, MaskWorker, ScratchSurface, SegmentOutcome, WorkerMaskResult};
pub use processor::{Processor, ProducerFactory};
pub use quality::QualityController;
