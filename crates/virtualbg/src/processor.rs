//! Top-level orchestrator: decides fresh-mask vs. interpolation per
//! frame, drives the auto-framer and adaptive controller, and
//! assembles everything the GPU pipeline needs.

use std::time::Instant;

use crate::autoframe::AutoFramer;
use crate::capability::CapabilityReport;
use crate::config::{AutoFrameOptions, BackgroundMode, Options};
use crate::data::centroid::MotionVector;
use crate::data::frame::{FrameSource, Surface};
use crate::data::mask::MaskBuffer;
use crate::data::roi::CropRegion;
use crate::data::tier::TIER_TABLE;
use crate::diagnostics::{DiagnosticEvent, Diagnostics};
use crate::error::{Error, Result};
use crate::gpu::context::GpuContext;
use crate::gpu::pipeline::{GpuPipeline, OptionsPatch};
use crate::mask::adapter::{MaskAdapter, SegmentOutcome};
use crate::mask::producer::MaskProducer;
use crate::mask::worker::{CapturedFrame, MaskWorker, WorkerMaskResult, DEFAULT_INIT_TIMEOUT};
use crate::quality::QualityController;

/// Suppresses noise in the accumulated interpolation shift.
const SHIFT_DEAD_ZONE: f32 = 0.003;
/// Per-axis clamp on the accumulated interpolation shift.
const SHIFT_CLAMP: f32 = 0.12;
/// Minimum possible model interval regardless of motion-driven speedup.
const MIN_MODEL_INTERVAL_MS: f32 = 16.0;
/// ROI dead zone: position-shift threshold above which the smoothed ROI
/// blends toward the candidate rather than holding.
const ROI_POSITION_DEAD_ZONE: f32 = 0.03;
/// ROI dead zone: size-shift threshold, same role as the position one.
const ROI_SIZE_DEAD_ZONE: f32 = 0.015;
/// EMA factor used when the ROI dead zone is exceeded.
const ROI_SMOOTHING: f32 = 0.5;
/// Normalized distance from a frame edge at which a bbox counts as
/// "at the edge" for diagnostics.
const EDGE_EPSILON: f32 = 0.01;

/// Constructs a fresh producer instance. The processor calls this at
/// most twice at init (once for a worker attempt, once more for the
/// in-thread fallback if the worker fails), and potentially again across
/// the session's lifetime if a worker has to be abandoned and
/// reconstructed; it never assumes a single producer instance is shared
/// between the worker thread and the caller's thread.
pub trait ProducerFactory: Send {
    fn create(&self) -> Box<dyn MaskProducer>;
}

impl<F> ProducerFactory for F
where
    F: Fn() -> Box<dyn MaskProducer> + Send,
{
    fn create(&self) -> Box<dyn MaskProducer> {
        (self)()
    }
}

enum MaskSource {
    InThread(MaskAdapter),
    Worker(MaskWorker),
}

/// `processFrame`'s per-frame bookkeeping that doesn't belong on
/// [`Processor`] itself — values computed once per call and threaded
/// through the branch that actually ran.
struct FrameOutcome {
    surface: Surface,
    model_ms: Option<f32>,
    bbox_at_edge: bool,
    mask_empty: bool,
    mask_coverage: Option<f32>,
}

/// Owns the GPU pipeline, whichever mask source is active, the
/// auto-framer, the adaptive controller and diagnostics, and drives
/// all of them from a single `process_frame` entry point.
pub struct Processor {
    pipeline: GpuPipeline,
    mask_source: MaskSource,
    producer_factory: Box<dyn ProducerFactory>,
    quality: QualityController,
    autoframer: AutoFramer,
    diagnostics: Diagnostics,
    options: Options,
    capability: CapabilityReport,
    width: u32,
    height: u32,
    last_model_run_ms: i64,
    interp_frame_count: u32,
    last_roi: Option<CropRegion>,
    last_motion_vector: MotionVector,
    last_tier_index: usize,
    context_lost: bool,
}

impl Processor {
    /// `init(W, H)`: capability probe is the caller's responsibility (it
    /// has already happened by the time a [`GpuContext`] exists, per
    /// [`GpuContext::init_for_platform`]); this constructs the pipeline at
    /// the options' seed tier, the mask source (worker if requested and
    /// available, falling back transparently to in-thread), and seeds the
    /// adaptive controller at that same tier, unlocked unless
    /// `options.adaptive` is false.
    pub fn init(
        ctx: GpuContext,
        capability: CapabilityReport,
        adapter_name: &str,
        backend: &str,
        width: u32,
        height: u32,
        options: Options,
        producer_factory: Box<dyn ProducerFactory>,
        diagnostic_callback: Option<Box<dyn FnMut(DiagnosticEvent) + Send>>,
    ) -> Result<Self> {
        if let Some(missing) = capability.missing_hard_requirement() {
            return Err(Error::CapabilityMissing(missing.to_string()));
        }

        let tier_index = options.quality.tier_index();
        let tier = &TIER_TABLE[tier_index];

        let pipeline = GpuPipeline::init(
            ctx,
            width,
            height,
            tier,
            options.background_mode.clone(),
            options.background_fixed,
        )?;

        let mask_source = Self::build_mask_source(
            &options,
            &capability,
            producer_factory.as_ref(),
            tier.mask_width as usize,
            tier.mask_height as usize,
        );

        let mut quality = QualityController::new(options.adaptive_config);
        quality.set_tier(tier_index);
        if !options.adaptive {
            quality.lock();
        }

        let autoframer = AutoFramer::new(options.auto_frame);

        let mut diagnostics = Diagnostics::new(options.diagnostics.clone(), diagnostic_callback);
        diagnostics.emit_init(adapter_name, backend);

        Ok(Self {
            pipeline,
            mask_source,
            producer_factory,
            quality,
            autoframer,
            diagnostics,
            options,
            capability,
            width,
            height,
            last_model_run_ms: i64::MIN / 2,
            interp_frame_count: 0,
            last_roi: None,
            last_motion_vector: MotionVector::default(),
            last_tier_index: tier_index,
            context_lost: false,
        })
    }

    fn build_mask_source(
        options: &Options,
        capability: &CapabilityReport,
        producer_factory: &dyn ProducerFactory,
        mask_width: usize,
        mask_height: usize,
    ) -> MaskSource {
        if options.use_worker && capability.worker_thread {
            match MaskWorker::init(producer_factory.create(), mask_width, mask_height, DEFAULT_INIT_TIMEOUT) {
                Ok(worker) => return MaskSource::Worker(worker),
                Err(err) => {
                    tracing::warn!(error = %err, "mask worker init failed, falling back to in-thread adapter");
                }
            }
        }
        MaskSource::InThread(MaskAdapter::new(producer_factory.create(), mask_width, mask_height))
    }

    /// `reportFrame`'s companion on the orchestrator side: reconciles a
    /// tier change the adaptive controller (or an explicit override) made
    /// since the last call, propagating it to the pipeline and to the
    /// mask source's model resolution. Tier changes never take effect
    /// mid-frame; this is called once, between frames.
    fn sync_tier(&mut self) -> Result<()> {
        let new_index = self.quality.current_tier_index();
        if new_index == self.last_tier_index {
            return Ok(());
        }
        let tier = &TIER_TABLE[new_index];
        self.pipeline.apply_tier(tier)?;
        match &mut self.mask_source {
            MaskSource::InThread(adapter) => {
                adapter.resize(tier.mask_width as usize, tier.mask_height as usize);
            }
            MaskSource::Worker(worker) => {
                worker.try_resize(tier.mask_width as usize, tier.mask_height as usize);
            }
        }
        self.last_tier_index = new_index;
        Ok(())
    }

    /// Base model interval before the motion-driven speedup: explicit
    /// `modelFps` overrides the current tier's default when non-zero.
    fn base_model_interval_ms(&self) -> f32 {
        let rate = if self.options.model_fps > 0.0 {
            self.options.model_fps
        } else {
            TIER_TABLE[self.last_tier_index].model_rate_hz
        };
        1000.0 / rate.max(1.0)
    }

    /// `speedup = min(4, 1 + 20*motionMag)`; faster motion shortens the
    /// effective model interval down to a 16ms floor.
    fn effective_model_interval_ms(&self) -> f32 {
        let v = self.last_motion_vector;
        let motion_mag = (v.vx.iter().map(|x| x * x).sum::<f32>() + v.vy * v.vy).sqrt();
        let speedup = (1.0 + 20.0 * motion_mag).min(4.0);
        (self.base_model_interval_ms() / speedup).max(MIN_MODEL_INTERVAL_MS)
    }

    /// Weighted accumulation of the three band velocities into a single
    /// dead-zoned, clamped shift.
    fn accumulated_shift(&self) -> (f32, f32) {
        accumulated_shift(self.last_motion_vector, self.interp_frame_count)
    }

    /// ROI smoothing with a dead zone to prevent crop/mask oscillation.
    /// `None` (bbox not found) leaves the ROI untouched.
    fn update_roi(&mut self, candidate: Option<CropRegion>) {
        self.last_roi = smoothed_roi(self.last_roi, candidate);
    }

    /// Pushes the auto-framer's current crop (if any) into the pipeline.
    /// A zoom at or below 1.02 is treated as "no crop".
    fn sync_auto_frame_crop(&mut self) -> f32 {
        let crop = self.autoframer.current_crop();
        if crop.zoom > 1.02 {
            self.pipeline.set_crop_rect(Some(CropRegion {
                x: crop.x,
                y: crop.y,
                w: crop.w,
                h: crop.h,
            }));
        } else {
            self.pipeline.set_crop_rect(None);
        }
        crop.zoom
    }

    /// `processFrame(frame, timestamp) -> Surface | null`. Returns `Ok(None)`
    /// when `backgroundMode = none` (pass-through); propagates
    /// [`Error::ContextLost`] once the pipeline has reported a lost
    /// context, since the caller must re-init at that point.
    pub fn process_frame(&mut self, frame: &dyn FrameSource, timestamp_ms: i64) -> Result<Option<Surface>> {
        if self.context_lost {
            return Err(Error::ContextLost);
        }
        if matches!(self.options.background_mode, BackgroundMode::None) {
            return Ok(None);
        }

        let frame_started = Instant::now();
        let should_run_model =
            (timestamp_ms - self.last_model_run_ms) as f32 >= self.effective_model_interval_ms();
        let auto_frame_zoom = self.sync_auto_frame_crop();

        let outcome = match self.run_mask_source(frame, timestamp_ms, should_run_model) {
            Ok(outcome) => outcome,
            Err(Error::ContextLost) => {
                self.context_lost = true;
                self.diagnostics.set_context_lost(true);
                return Err(Error::ContextLost);
            }
            Err(Error::ResourceUploadFailure(msg)) => {
                tracing::warn!(error = %msg, "frame dropped: resource upload failure");
                self.diagnostics.record_dropped_frame();
                return Ok(None);
            }
            Err(other) => return Err(other),
        };

        let pipeline_ms = frame_started.elapsed().as_secs_f32() * 1000.0;
        let total_ms = pipeline_ms;
        self.diagnostics.record_frame(
            outcome.model_ms,
            pipeline_ms,
            total_ms,
            outcome.bbox_at_edge,
            outcome.mask_empty,
            outcome.mask_coverage,
        );
        self.quality.report_frame(total_ms, timestamp_ms);
        self.sync_tier()?;
        self.diagnostics
            .maybe_emit_summary(timestamp_ms, self.quality.current_tier_index(), self.last_roi, auto_frame_zoom);

        Ok(Some(outcome.surface))
    }

    fn run_mask_source(
        &mut self,
        frame: &dyn FrameSource,
        timestamp_ms: i64,
        should_run_model: bool,
    ) -> Result<FrameOutcome> {
        // Check the discriminant only (no bindings), so nothing borrows
        // `self.mask_source` across the dispatch into the path-specific
        // helper, which needs its own `&mut self`.
        if matches!(self.mask_source, MaskSource::Worker(_)) {
            self.run_worker_path(frame, timestamp_ms, should_run_model)
        } else {
            self.run_in_thread_path(frame, timestamp_ms, should_run_model)
        }
    }

    fn run_worker_path(
        &mut self,
        frame: &dyn FrameSource,
        timestamp_ms: i64,
        should_run_model: bool,
    ) -> Result<FrameOutcome> {
        let fresh = {
            let MaskSource::Worker(worker) = &mut self.mask_source else {
                unreachable!("run_worker_path called with non-worker mask source")
            };
            worker.try_recv()
        };

        let outcome = if let Some(result) = fresh {
            self.apply_worker_result(frame, result)?
        } else {
            self.interp_frame_count += 1;
            let shift = self.accumulated_shift();
            let surface = self.pipeline.process_interpolated(frame, shift)?;
            FrameOutcome {
                surface,
                model_ms: None,
                bbox_at_edge: false,
                mask_empty: false,
                mask_coverage: None,
            }
        };

        if should_run_model {
            let MaskSource::Worker(worker) = &mut self.mask_source else {
                unreachable!("run_worker_path called with non-worker mask source")
            };
            if !worker.is_busy() {
                let captured = CapturedFrame {
                    width: frame.width(),
                    height: frame.height(),
                    bytes: frame.rgba_bytes().to_vec(),
                    timestamp_ms,
                };
                if worker.try_submit(captured, self.last_roi) {
                    self.last_model_run_ms = timestamp_ms;
                }
            }
        }

        Ok(outcome)
    }

    fn apply_worker_result(&mut self, frame: &dyn FrameSource, result: WorkerMaskResult) -> Result<FrameOutcome> {
        self.update_roi(result.bbox);
        self.autoframer.update_from_mask(&result.full_mask);
        self.last_motion_vector = result.motion_vector;
        self.interp_frame_count = 0;

        let mask_empty = result.bbox.is_none();
        let bbox_at_edge = result.bbox.map(is_bbox_at_edge).unwrap_or(false);
        let mask_coverage = Some(mean_coverage(&result.full_mask));

        let surface = self
            .pipeline
            .process(frame, &result.full_mask, result.motion_map.as_ref())?;

        Ok(FrameOutcome {
            surface,
            model_ms: Some(result.inference_ms),
            bbox_at_edge,
            mask_empty,
            mask_coverage,
        })
    }

    fn run_in_thread_path(
        &mut self,
        frame: &dyn FrameSource,
        timestamp_ms: i64,
        should_run_model: bool,
    ) -> Result<FrameOutcome> {
        if !should_run_model {
            self.interp_frame_count += 1;
            let shift = self.accumulated_shift();
            let surface = self.pipeline.process_interpolated(frame, shift)?;
            return Ok(FrameOutcome {
                surface,
                model_ms: None,
                bbox_at_edge: false,
                mask_empty: false,
                mask_coverage: None,
            });
        }

        let started = Instant::now();
        let padding = self.options.auto_frame.padding;
        let (outcome, bbox) = {
            let MaskSource::InThread(adapter) = &mut self.mask_source else {
                unreachable!("run_in_thread_path called with non-in-thread mask source")
            };
            let outcome = adapter.segment(frame, timestamp_ms, self.last_roi);
            (outcome, adapter.get_person_bbox(padding))
        };
        self.last_model_run_ms = timestamp_ms;

        match outcome {
            SegmentOutcome::Fresh => {
                let inference_ms = started.elapsed().as_secs_f32() * 1000.0;
                self.update_roi(bbox);
                let MaskSource::InThread(adapter) = &mut self.mask_source else {
                    unreachable!("run_in_thread_path called with non-in-thread mask source")
                };
                self.autoframer.update_from_mask(adapter.full_mask());
                self.last_motion_vector = adapter.get_mask_motion_vector();
                self.interp_frame_count = 0;

                let mask_empty = bbox.is_none();
                let bbox_at_edge = bbox.map(is_bbox_at_edge).unwrap_or(false);
                let mask_coverage = Some(mean_coverage(adapter.full_mask()));
                let motion_map = adapter.get_motion_map().cloned();
                let full_mask = adapter.full_mask().clone();

                let surface = self.pipeline.process(frame, &full_mask, motion_map.as_ref())?;

                Ok(FrameOutcome {
                    surface,
                    model_ms: Some(inference_ms),
                    bbox_at_edge,
                    mask_empty,
                    mask_coverage,
                })
            }
            SegmentOutcome::ProducerFailed => {
                self.interp_frame_count += 1;
                let shift = self.accumulated_shift();
                let surface = self.pipeline.process_interpolated(frame, shift)?;
                Ok(FrameOutcome {
                    surface,
                    model_ms: None,
                    bbox_at_edge: false,
                    mask_empty: true,
                    mask_coverage: None,
                })
            }
        }
    }

    /// `updateOptions(partial)`: forwards the compositor-facing fields to
    /// the pipeline and the rest to this orchestrator's own state. No
    /// per-call allocation beyond what a background-image re-upload
    /// inherently requires.
    pub fn update_options(&mut self, patch: OptionsPatch, auto_frame: Option<AutoFrameOptions>) -> Result<()> {
        self.pipeline.update_options(patch.clone())?;
        if let Some(mode) = &patch.background_mode {
            self.options.background_mode = mode.clone();
        }
        if let Some(v) = patch.background_fixed {
            self.options.background_fixed = v;
        }
        if let Some(opts) = auto_frame {
            self.options.auto_frame = opts;
            self.autoframer.set_options(opts);
        }
        Ok(())
    }

    /// Switches between the worker and in-thread mask sources at
    /// runtime, rebuilding from the original producer factory at the
    /// current tier's resolution. Drops whichever adapter/worker was
    /// active; its in-flight history (bbox, centroids, motion) is lost,
    /// same as a tier-driven resize.
    pub fn set_use_worker(&mut self, use_worker: bool) {
        if use_worker == self.options.use_worker {
            return;
        }
        self.options.use_worker = use_worker;
        let tier = &TIER_TABLE[self.last_tier_index];
        self.mask_source = Self::build_mask_source(
            &self.options,
            &self.capability,
            self.producer_factory.as_ref(),
            tier.mask_width as usize,
            tier.mask_height as usize,
        );
    }

    /// Explicit tier override, bypassing the adaptive controller's own
    /// hysteresis; still subject to `sync_tier`'s propagation on the next
    /// `process_frame` call.
    pub fn set_tier_override(&mut self, index: usize) {
        self.quality.set_tier(index);
    }

    pub fn lock_quality(&mut self) {
        self.quality.lock();
    }

    pub fn unlock_quality(&mut self) {
        self.quality.unlock();
    }

    pub fn reset(&mut self) {
        self.quality.reset();
        self.autoframer.reset();
        self.interp_frame_count = 0;
        self.last_roi = None;
        self.last_motion_vector = MotionVector::default();
    }

    pub fn current_tier_index(&self) -> usize {
        self.last_tier_index
    }

    pub fn capability(&self) -> &CapabilityReport {
        &self.capability
    }

    pub fn destroy(self) {
        self.pipeline.destroy();
    }
}

/// Weighted accumulation of the three band velocities into a single
/// interpolation shift. Free function (rather than a `Processor` method)
/// so the pure math is testable without a GPU-backed pipeline.
fn accumulated_shift(motion: MotionVector, interp_frame_count: u32) -> (f32, f32) {
    let vx_weighted = 0.6 * motion.vx[0] + 0.3 * motion.vx[1] + 0.1 * motion.vx[2];
    if vx_weighted.abs() < SHIFT_DEAD_ZONE && motion.vy.abs() < SHIFT_DEAD_ZONE {
        return (0.0, 0.0);
    }
    let t = interp_frame_count as f32;
    (
        (vx_weighted * t).clamp(-SHIFT_CLAMP, SHIFT_CLAMP),
        (motion.vy * t).clamp(-SHIFT_CLAMP, SHIFT_CLAMP),
    )
}

/// ROI dead-zone smoothing, extracted as a free function for the same
/// testability reason as [`accumulated_shift`]. `None` candidate (bbox
/// not found) always holds `last_roi` unchanged.
fn smoothed_roi(last_roi: Option<CropRegion>, candidate: Option<CropRegion>) -> Option<CropRegion> {
    let Some(candidate) = candidate else {
        return last_roi;
    };
    Some(match last_roi {
        None => candidate,
        Some(prev) => {
            let position_shift = (candidate.x - prev.x).abs().max((candidate.y - prev.y).abs());
            let size_shift = (candidate.w - prev.w).abs().max((candidate.h - prev.h).abs());
            if position_shift > ROI_POSITION_DEAD_ZONE || size_shift > ROI_SIZE_DEAD_ZONE {
                let s = ROI_SMOOTHING;
                CropRegion {
                    x: prev.x * s + candidate.x * (1.0 - s),
                    y: prev.y * s + candidate.y * (1.0 - s),
                    w: prev.w * s + candidate.w * (1.0 - s),
                    h: prev.h * s + candidate.h * (1.0 - s),
                }
                .clamped()
            } else {
                prev
            }
        }
    })
}

/// Mean of all mask values; for a binary mask this is exactly the
/// fraction of pixels classified as person, matching the coverage ratio
/// the diagnostics summary reports.
fn mean_coverage(mask: &MaskBuffer) -> f32 {
    let data = mask.as_slice();
    if data.is_empty() {
        return 0.0;
    }
    data.iter().sum::<f32>() / data.len() as f32
}

/// Whether a normalized bbox touches (within [`EDGE_EPSILON`]) any of the
/// four frame edges — used only for the diagnostics `bboxAtEdgeCount`.
fn is_bbox_at_edge(bbox: CropRegion) -> bool {
    bbox.x <= EDGE_EPSILON
        || bbox.y <= EDGE_EPSILON
        || bbox.x + bbox.w >= 1.0 - EDGE_EPSILON
        || bbox.y + bbox.h >= 1.0 - EDGE_EPSILON
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_coverage_matches_area_ratio() {
        let mut mask = MaskBuffer::zeros(32, 32);
        for y in 8..24 {
            for x in 8..24 {
                mask.set(x, y, 1.0);
            }
        }
        let coverage = mean_coverage(&mask);
        assert!((coverage - 0.25).abs() < 1e-4);
    }

    #[test]
    fn full_frame_bbox_is_at_edge() {
        assert!(is_bbox_at_edge(CropRegion::FULL));
    }

    #[test]
    fn centered_small_bbox_is_not_at_edge() {
        let bbox = CropRegion {
            x: 0.4,
            y: 0.4,
            w: 0.2,
            h: 0.2,
        };
        assert!(!is_bbox_at_edge(bbox));
    }

    #[test]
    fn accumulated_shift_dead_zone_suppresses_tiny_velocity() {
        let motion = MotionVector {
            vx: [0.001, 0.001, 0.001],
            vy: 0.001,
        };
        assert_eq!(accumulated_shift(motion, 5), (0.0, 0.0));
    }

    #[test]
    fn accumulated_shift_scales_with_frame_count_and_clamps() {
        let motion = MotionVector {
            vx: [0.02, 0.0, 0.0],
            vy: 0.0,
        };
        let (dx, _dy) = accumulated_shift(motion, 3);
        assert!((dx - 0.036).abs() < 1e-4, "0.6 * 0.02 * 3 = 0.036, got {dx}");

        let (dx, _dy) = accumulated_shift(motion, 100);
        assert!((dx - SHIFT_CLAMP).abs() < 1e-4);
    }

    #[test]
    fn roi_holds_when_no_bbox_found() {
        let seed = CropRegion {
            x: 0.1,
            y: 0.1,
            w: 0.3,
            h: 0.3,
        };
        assert_eq!(smoothed_roi(Some(seed), None), Some(seed));
    }

    #[test]
    fn roi_adopts_first_candidate_unconditionally() {
        let candidate = CropRegion {
            x: 0.2,
            y: 0.2,
            w: 0.4,
            h: 0.4,
        };
        assert_eq!(smoothed_roi(None, Some(candidate)), Some(candidate));
    }

    #[test]
    fn roi_within_dead_zone_is_retained() {
        let prev = CropRegion {
            x: 0.2,
            y: 0.2,
            w: 0.4,
            h: 0.4,
        };
        let tiny_move = CropRegion {
            x: 0.205,
            y: 0.2,
            w: 0.4,
            h: 0.4,
        };
        assert_eq!(smoothed_roi(Some(prev), Some(tiny_move)), Some(prev));
    }

    #[test]
    fn roi_beyond_dead_zone_blends_halfway() {
        let prev = CropRegion {
            x: 0.2,
            y: 0.2,
            w: 0.4,
            h: 0.4,
        };
        let moved = CropRegion {
            x: 0.3,
            y: 0.2,
            w: 0.4,
            h: 0.4,
        };
        let after = smoothed_roi(Some(prev), Some(moved)).unwrap();
        assert!((after.x - 0.25).abs() < 1e-4);
    }
}
