//! Error types for virtualbg.
//!
//! Defines the error kinds raised at init time (fatal, propagated to the
//! caller) and the handful that are constructed but never surfaced —
//! `ProducerInferenceFailure` and `WorkerInitFailure` are absorbed by the
//! adapter/worker and only ever show up in diagnostics counters.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A required capability reported by the capability probe was not
    /// met. Fatal at init.
    #[error("required capability missing: {0}")]
    CapabilityMissing(String),

    /// A WGSL shader module failed to compile.
    #[error("shader compilation failed: {0}")]
    ShaderCompile(String),

    /// A render/compute pipeline failed to link against its shader modules.
    #[error("pipeline link failed: {0}")]
    ProgramLink(String),

    /// A framebuffer (texture set) could not be created in a usable state.
    #[error("framebuffer incomplete: {0}")]
    FramebufferIncomplete(String),

    /// The GPU context was lost mid-session. The processor stops emitting
    /// frames; the caller must re-init.
    #[error("GPU context lost")]
    ContextLost,

    /// A single external mask-producer call failed. Never propagated past
    /// the adapter; the caller always gets the previous mask back.
    #[error("mask producer inference failed: {0}")]
    ProducerInferenceFailure(String),

    /// The off-thread mask worker failed to initialize. The processor
    /// transparently falls back to the in-thread adapter.
    #[error("mask worker init failed: {0}")]
    WorkerInitFailure(String),

    /// A per-frame GPU upload failed (e.g. zero-sized frame). The frame is
    /// dropped silently by the caller; this only flows into `droppedFrames`.
    #[error("resource upload failed: {0}")]
    ResourceUploadFailure(String),

    #[error("GPU error: {0}")]
    Gpu(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
