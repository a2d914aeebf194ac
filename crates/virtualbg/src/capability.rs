//! Synchronous, side-effect-free capability probe run at `init`.

use serde::{Deserialize, Serialize};

/// One bit per capability the pipeline can use. Hard requirements
/// (`offscreen_surface`, `gpu_api_v2`, `float_color_render_target`) must
/// all be `true` or `init` fails with `Error::CapabilityMissing`; the
/// rest are soft and only change which code path the processor takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityReport {
    pub offscreen_surface: bool,
    pub gpu_api_v2: bool,
    pub float_color_render_target: bool,
    pub texture_float_linear: bool,
    pub worker_thread: bool,
    pub frame_transfer_api: bool,
}

impl CapabilityReport {
    pub const HARD_REQUIRED: &'static [&'static str] = &[
        "offscreen_surface",
        "gpu_api_v2",
        "float_color_render_target",
    ];

    /// Name of the first unmet hard requirement, if any.
    pub fn missing_hard_requirement(&self) -> Option<&'static str> {
        if !self.offscreen_surface {
            return Some("offscreen_surface");
        }
        if !self.gpu_api_v2 {
            return Some("gpu_api_v2");
        }
        if !self.float_color_render_target {
            return Some("float_color_render_target");
        }
        None
    }
}

/// Probe the given adapter for the capabilities this crate depends on.
/// Inspects adapter features/limits only; opens no resources.
pub fn probe(adapter: &wgpu::Adapter) -> CapabilityReport {
    let features = adapter.features();
    let limits = adapter.limits();

    let float_color_render_target = adapter
        .get_texture_format_features(wgpu::TextureFormat::Rgba16Float)
        .allowed_usages
        .contains(wgpu::TextureUsages::RENDER_ATTACHMENT);

    let texture_float_linear = features.contains(wgpu::Features::FLOAT32_FILTERABLE)
        || adapter
            .get_texture_format_features(wgpu::TextureFormat::Rgba16Float)
            .flags
            .contains(wgpu::TextureFormatFeatureFlags::FILTERABLE);

    CapabilityReport {
        offscreen_surface: true,
        gpu_api_v2: limits.max_bind_groups >= 4,
        float_color_render_target,
        texture_float_linear,
        worker_thread: std::thread::available_parallelism()
            .map(|n| n.get() > 1)
            .unwrap_or(false),
        frame_transfer_api: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_capabilities_met_has_no_missing_requirement() {
        let report = CapabilityReport {
            offscreen_surface: true,
            gpu_api_v2: true,
            float_color_render_target: true,
            texture_float_linear: true,
            worker_thread: true,
            frame_transfer_api: true,
        };
        assert_eq!(report.missing_hard_requirement(), None);
    }

    #[test]
    fn missing_hard_requirement_is_reported_in_priority_order() {
        let report = CapabilityReport {
            offscreen_surface: false,
            gpu_api_v2: false,
            float_color_render_target: true,
            texture_float_linear: true,
            worker_thread: true,
            frame_transfer_api: true,
        };
        assert_eq!(report.missing_hard_requirement(), Some("offscreen_surface"));
    }

    #[test]
    fn soft_capability_missing_does_not_block() {
        let report = CapabilityReport {
            offscreen_surface: true,
            gpu_api_v2: true,
            float_color_render_target: true,
            texture_float_linear: false,
            worker_thread: false,
            frame_transfer_api: false,
        };
        assert_eq!(report.missing_hard_requirement(), None);
    }
}
