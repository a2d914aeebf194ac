//! Diagnostics: periodic summary accumulation and emission. Read-only
//! with respect to the hot path — nothing here ever changes what the
//! pipeline or controller do, only what gets reported about them.

use crate::config::{DiagnosticsLevel, DiagnosticsOptions};
use crate::data::roi::CropRegion;
use crate::data::tier::tier_label;

/// One-time event emitted at `init`, describing the GPU context the
/// pipeline ended up with.
#[derive(Clone, Debug, PartialEq)]
pub struct InitEvent {
    pub adapter_name: String,
    pub backend: String,
    pub client_id: Option<String>,
}

/// Recurring event emitted every `interval_ms`.
#[derive(Clone, Debug, PartialEq)]
pub struct SummaryEvent {
    pub fps: f32,
    pub model_fps: f32,
    pub avg_model_ms: f32,
    pub avg_pipeline_ms: f32,
    pub avg_total_ms: f32,
    pub p95_total_ms: f32,
    pub dropped_frames: u64,
    pub quality_tier: usize,
    pub quality_label: &'static str,
    pub roi_crop: Option<CropRegion>,
    pub auto_frame_zoom: f32,
    pub mask_coverage: f32,
    pub bbox_at_edge_count: u64,
    pub mask_empty_count: u64,
    pub context_lost: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DiagnosticEvent {
    Init(InitEvent),
    Summary(SummaryEvent),
}

#[derive(Default)]
struct IntervalAccumulator {
    frame_count: u64,
    model_call_count: u64,
    sum_model_ms: f64,
    sum_pipeline_ms: f64,
    sum_total_ms: f64,
    total_ms_window: Vec<f32>,
    bbox_at_edge_count: u64,
    mask_empty_count: u64,
    mask_coverage_sum: f64,
    mask_coverage_count: u64,
}

impl IntervalAccumulator {
    fn reset(&mut self) {
        *self = Self::default();
    }
}

pub struct Diagnostics {
    options: DiagnosticsOptions,
    callback: Option<Box<dyn FnMut(DiagnosticEvent) + Send>>,
    accum: IntervalAccumulator,
    dropped_frames: u64,
    context_lost: bool,
    last_emit_ms: Option<i64>,
    init_sent: bool,
}

impl Diagnostics {
    pub fn new(options: DiagnosticsOptions, callback: Option<Box<dyn FnMut(DiagnosticEvent) + Send>>) -> Self {
        Self {
            options,
            callback,
            accum: IntervalAccumulator::default(),
            dropped_frames: 0,
            context_lost: false,
            last_emit_ms: None,
            init_sent: false,
        }
    }

    pub fn set_options(&mut self, options: DiagnosticsOptions) {
        self.options = options;
    }

    fn enabled(&self) -> bool {
        self.options.level != DiagnosticsLevel::Off
    }

    pub fn emit_init(&mut self, adapter_name: &str, backend: &str) {
        if !self.enabled() || self.init_sent {
            return;
        }
        self.init_sent = true;
        if let Some(cb) = self.callback.as_mut() {
            cb(DiagnosticEvent::Init(InitEvent {
                adapter_name: adapter_name.to_string(),
                backend: backend.to_string(),
                client_id: self.options.client_id.clone(),
            }));
        }
    }

    pub fn record_dropped_frame(&mut self) {
        self.dropped_frames += 1;
    }

    pub fn set_context_lost(&mut self, lost: bool) {
        self.context_lost = lost;
    }

    /// Record one frame's timing and mask-quality signals. `model_ms` is
    /// `None` on interpolated frames (no fresh inference ran).
    #[allow(clippy::too_many_arguments)]
    pub fn record_frame(
        &mut self,
        model_ms: Option<f32>,
        pipeline_ms: f32,
        total_ms: f32,
        bbox_at_edge: bool,
        mask_empty: bool,
        mask_coverage: Option<f32>,
    ) {
        if !self.enabled() {
            return;
        }
        self.accum.frame_count += 1;
        if let Some(model_ms) = model_ms {
            self.accum.model_call_count += 1;
            self.accum.sum_model_ms += model_ms as f64;
        }
        self.accum.sum_pipeline_ms += pipeline_ms as f64;
        self.accum.sum_total_ms += total_ms as f64;
        self.accum.total_ms_window.push(total_ms);
        if bbox_at_edge {
            self.accum.bbox_at_edge_count += 1;
        }
        if mask_empty {
            self.accum.mask_empty_count += 1;
        }
        if let Some(coverage) = mask_coverage {
            self.accum.mask_coverage_sum += coverage as f64;
            self.accum.mask_coverage_count += 1;
        }
    }

    /// Emit a summary if `interval_ms` has elapsed since the last one,
    /// then reset the accumulator. `now_ms` is the caller's clock.
    pub fn maybe_emit_summary(
        &mut self,
        now_ms: i64,
        quality_tier: usize,
        roi_crop: Option<CropRegion>,
        auto_frame_zoom: f32,
    ) {
        if !self.enabled() {
            return;
        }
        let interval = self.options.interval_ms as i64;
        let due = match self.last_emit_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= interval,
        };
        if !due || self.accum.frame_count == 0 {
            return;
        }

        let frame_count = self.accum.frame_count as f32;
        let elapsed_s = (interval.max(1) as f32) / 1000.0;
        let fps = frame_count / elapsed_s;
        let model_fps = self.accum.model_call_count as f32 / elapsed_s;
        let avg_model_ms = if self.accum.model_call_count > 0 {
            (self.accum.sum_model_ms / self.accum.model_call_count as f64) as f32
        } else {
            0.0
        };
        let avg_pipeline_ms = (self.accum.sum_pipeline_ms / self.accum.frame_count as f64) as f32;
        let avg_total_ms = (self.accum.sum_total_ms / self.accum.frame_count as f64) as f32;
        let p95_total_ms = percentile_95(&self.accum.total_ms_window);
        let mask_coverage = if self.accum.mask_coverage_count > 0 {
            (self.accum.mask_coverage_sum / self.accum.mask_coverage_count as f64) as f32
        } else {
            0.0
        };

        let event = SummaryEvent {
            fps,
            model_fps,
            avg_model_ms,
            avg_pipeline_ms,
            avg_total_ms,
            p95_total_ms,
            dropped_frames: self.dropped_frames,
            quality_tier,
            quality_label: tier_label(quality_tier),
            roi_crop,
            auto_frame_zoom,
            mask_coverage,
            bbox_at_edge_count: self.accum.bbox_at_edge_count,
            mask_empty_count: self.accum.mask_empty_count,
            context_lost: self.context_lost,
        };

        if let Some(cb) = self.callback.as_mut() {
            cb(DiagnosticEvent::Summary(event));
        }
        self.accum.reset();
        self.last_emit_ms = Some(now_ms);
    }
}

fn percentile_95(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let idx = ((sorted.len() as f32 - 1.0) * 0.95).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn options(level: DiagnosticsLevel) -> DiagnosticsOptions {
        DiagnosticsOptions {
            level,
            interval_ms: 1000,
            include_image: false,
            client_id: Some("test-client".into()),
        }
    }

    #[test]
    fn off_level_never_emits() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = events.clone();
        let mut diag = Diagnostics::new(
            options(DiagnosticsLevel::Off),
            Some(Box::new(move |e| events_clone.lock().unwrap().push(e))),
        );
        diag.emit_init("fallback", "vulkan");
        diag.record_frame(Some(5.0), 3.0, 10.0, false, false, Some(0.5));
        diag.maybe_emit_summary(2000, 0, None, 1.0);
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn summary_emits_once_per_interval() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = events.clone();
        let mut diag = Diagnostics::new(
            options(DiagnosticsLevel::Summary),
            Some(Box::new(move |e| events_clone.lock().unwrap().push(e))),
        );
        diag.emit_init("fallback", "vulkan");
        for i in 0..10 {
            diag.record_frame(Some(5.0), 3.0, 10.0, false, false, Some(0.5));
            diag.maybe_emit_summary(i * 50, 0, None, 1.0);
        }
        diag.maybe_emit_summary(1000, 0, None, 1.0);
        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], DiagnosticEvent::Init(_)));
        assert!(matches!(events[1], DiagnosticEvent::Summary(_)));
    }
}
