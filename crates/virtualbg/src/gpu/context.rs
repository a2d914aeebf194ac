//! Owns the `wgpu` device/queue and platform adapter selection.

use std::sync::Arc;

use crate::capability::{self, CapabilityReport};
use crate::error::{Error, Result};

#[derive(Clone)]
pub struct GpuContext {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
}

impl GpuContext {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
        }
    }

    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    pub fn queue(&self) -> &Arc<wgpu::Queue> {
        &self.queue
    }

    /// Request an adapter/device for the current platform and run the
    /// capability probe against the adapter before creating the device,
    /// so a hard-requirement miss never touches GPU resources.
    pub async fn init_for_platform() -> Result<(Self, CapabilityReport)> {
        let backends = if cfg!(target_os = "macos") || cfg!(target_os = "ios") {
            wgpu::Backends::METAL
        } else if cfg!(target_os = "linux") {
            wgpu::Backends::VULKAN
        } else if cfg!(target_os = "windows") {
            wgpu::Backends::DX12
        } else {
            wgpu::Backends::PRIMARY
        };

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| Error::Gpu(format!("no suitable GPU adapter: {e}")))?;

        tracing::info!(
            adapter = adapter.get_info().name,
            backend = ?adapter.get_info().backend,
            "GPU adapter selected"
        );

        let report = capability::probe(&adapter);
        if let Some(missing) = report.missing_hard_requirement() {
            return Err(Error::CapabilityMissing(missing.to_string()));
        }

        // Mask/motion textures are single-channel R32Float; sampling them
        // with a linear filter (spec's mask-texture invariant) requires
        // this feature. It's soft in the capability report, so request it
        // only when the adapter actually has it and fall back to nearest
        // filtering in the pipeline otherwise.
        let wanted_features = wgpu::Features::FLOAT32_FILTERABLE & adapter.features();

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("virtualbg GPU context"),
                required_features: wanted_features,
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::default(),
                trace: Default::default(),
            })
            .await
            .map_err(|e| Error::Gpu(format!("device request failed: {e}")))?;

        tracing::info!("GPU device and queue created");

        Ok((Self::new(device, queue), report))
    }

    /// Synchronous wrapper around [`Self::init_for_platform`] for
    /// callers that construct the processor outside an async runtime.
    pub fn init_for_platform_sync() -> Result<(Self, CapabilityReport)> {
        pollster::block_on(Self::init_for_platform())
    }

    /// Initialize against the fallback (CPU/software) adapter, used by
    /// tests that need a real device without requiring a GPU in CI.
    pub async fn init_fallback() -> Result<(Self, CapabilityReport)> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::None,
                compatible_surface: None,
                force_fallback_adapter: true,
            })
            .await
            .map_err(|e| Error::Gpu(format!("no fallback adapter: {e}")))?;

        let report = capability::probe(&adapter);
        let wanted_features = wgpu::Features::FLOAT32_FILTERABLE & adapter.features();

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("virtualbg fallback GPU context"),
                required_features: wanted_features,
                required_limits: wgpu::Limits::downlevel_defaults(),
                memory_hints: wgpu::MemoryHints::default(),
                trace: Default::default(),
            })
            .await
            .map_err(|e| Error::Gpu(format!("fallback device request failed: {e}")))?;

        Ok((Self::new(device, queue), report))
    }
}

impl std::fmt::Debug for GpuContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuContext")
            .field("device", &format!("{:p}", self.device.as_ref()))
            .field("queue", &format!("{:p}", self.queue.as_ref()))
            .finish()
    }
}
