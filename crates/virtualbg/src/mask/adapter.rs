//! In-thread mask producer adapter: ROI cropping, inference scheduling,
//! bbox/centroid extraction and motion-map computation, all on the
//! caller's thread. [`crate::mask::worker::MaskWorker`] runs the same
//! algorithm off-thread.

use crate::data::centroid::{Centroid, CentroidTracker, MotionVector};
use crate::data::frame::FrameSource;
use crate::data::mask::MaskBuffer;
use crate::data::motion::MotionMap;
use crate::data::roi::CropRegion;
use crate::mask::producer::{extract_person_channel, MaskProducer, ScratchSurface};

/// Outcome of a single [`MaskAdapter::segment`] call, so the caller (the
/// processor, or diagnostics) can tell a fresh inference apart from a
/// silently absorbed producer failure without the adapter raising an
/// error — `ProducerInferenceFailure` never propagates out of here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentOutcome {
    Fresh,
    ProducerFailed,
}

pub struct MaskAdapter {
    producer: Box<dyn MaskProducer>,
    mask_width: usize,
    mask_height: usize,
    scratch: ScratchSurface,
    last_crop_mask: MaskBuffer,
    last_full_mask: MaskBuffer,
    previous_full_mask: MaskBuffer,
    has_previous: bool,
    motion_buffer: MotionMap,
    motion_valid: bool,
    cached_bbox: Option<(usize, usize, usize, usize)>,
    centroid_tracker: CentroidTracker,
}

impl MaskAdapter {
    pub fn new(producer: Box<dyn MaskProducer>, mask_width: usize, mask_height: usize) -> Self {
        Self {
            producer,
            mask_width,
            mask_height,
            scratch: ScratchSurface::new(mask_width, mask_height),
            last_crop_mask: MaskBuffer::zeros(mask_width, mask_height),
            last_full_mask: MaskBuffer::zeros(mask_width, mask_height),
            previous_full_mask: MaskBuffer::zeros(mask_width, mask_height),
            has_previous: false,
            motion_buffer: MotionMap::zeros(mask_width, mask_height),
            motion_valid: false,
            cached_bbox: None,
            centroid_tracker: CentroidTracker::new(),
        }
    }

    /// Reallocate scratch/mask buffers for a new model resolution (tier
    /// change). Drops motion/bbox/centroid history since it no longer
    /// matches the new resolution.
    pub fn resize(&mut self, mask_width: usize, mask_height: usize) {
        if mask_width == self.mask_width && mask_height == self.mask_height {
            return;
        }
        self.mask_width = mask_width;
        self.mask_height = mask_height;
        self.scratch = ScratchSurface::new(mask_width, mask_height);
        self.last_crop_mask = MaskBuffer::zeros(mask_width, mask_height);
        self.last_full_mask = MaskBuffer::zeros(mask_width, mask_height);
        self.previous_full_mask = MaskBuffer::zeros(mask_width, mask_height);
        self.has_previous = false;
        self.motion_buffer = MotionMap::zeros(mask_width, mask_height);
        self.motion_valid = false;
        self.cached_bbox = None;
        self.centroid_tracker.reset();
    }

    /// The current full-frame mask (the GPU pipeline's required input
    /// shape), valid after at least one `Fresh` segment call.
    pub fn full_mask(&self) -> &MaskBuffer {
        &self.last_full_mask
    }

    pub fn get_motion_map(&self) -> Option<&MotionMap> {
        self.motion_valid.then_some(&self.motion_buffer)
    }

    pub fn get_mask_motion_vector(&self) -> MotionVector {
        self.centroid_tracker.velocity()
    }

    /// Normalized, padded, clamped bbox of the last segmentation, or
    /// `None` if fewer than one pixel scored above 0.5.
    pub fn get_person_bbox(&self, padding: f32) -> Option<CropRegion> {
        let (x0, y0, x1, y1) = self.cached_bbox?;
        let w = self.mask_width as f32;
        let h = self.mask_height as f32;
        let x = x0 as f32 / w;
        let y = y0 as f32 / h;
        let bw = (x1 - x0) as f32 / w;
        let bh = (y1 - y0) as f32 / h;
        Some(
            CropRegion {
                x: x - padding * bw,
                y: y - padding * bh,
                w: bw * (1.0 + 2.0 * padding),
                h: bh * (1.0 + 2.0 * padding),
            }
            .clamped(),
        )
    }

    /// Run one inference cycle. `crop`, when present, is the ROI
    /// rectangle (normalized to the source frame) the scratch surface is
    /// downscaled from; absent, the whole frame is downscaled.
    pub fn segment(
        &mut self,
        frame: &dyn FrameSource,
        timestamp_ms: i64,
        crop: Option<CropRegion>,
    ) -> SegmentOutcome {
        self.rasterize_scratch(frame, crop);

        let maps = match self.producer.produce(&self.scratch, timestamp_ms) {
            Some(maps) if !maps.is_empty() => maps,
            _ => return SegmentOutcome::ProducerFailed,
        };

        let person = extract_person_channel(&maps);
        self.last_crop_mask.as_mut_slice().copy_from_slice(&person);

        if let Some(crop) = crop {
            self.last_full_mask = self
                .last_crop_mask
                .embed_in_full_frame(crop, self.mask_width, self.mask_height);
        } else {
            self.last_full_mask
                .as_mut_slice()
                .copy_from_slice(self.last_crop_mask.as_slice());
        }

        self.cached_bbox = self.last_full_mask.person_bbox_px();
        self.update_centroids();

        if self.has_previous {
            self.last_full_mask
                .diff_into(&self.previous_full_mask, self.motion_buffer.buffer_mut());
            self.motion_valid = true;
        }
        self.previous_full_mask
            .as_mut_slice()
            .copy_from_slice(self.last_full_mask.as_slice());
        self.has_previous = true;

        SegmentOutcome::Fresh
    }

    fn rasterize_scratch(&mut self, frame: &dyn FrameSource, crop: Option<CropRegion>) {
        let frame_w = frame.width() as usize;
        let frame_h = frame.height() as usize;
        let (src_x, src_y, src_w, src_h) = match crop {
            Some(c) => (
                (c.x * frame_w as f32) as usize,
                (c.y * frame_h as f32) as usize,
                (c.w * frame_w as f32) as usize,
                (c.h * frame_h as f32) as usize,
            ),
            None => (0, 0, frame_w, frame_h),
        };
        self.scratch
            .blit_region(frame.rgba_bytes(), frame_w, src_x, src_y, src_w, src_h);
    }

    /// Partition the cached bbox into three vertical bands; the X
    /// centroid of each band is the mean X of qualifying (> 0.5) pixels
    /// within it, falling back to the band's horizontal midpoint if it
    /// contains none. The Y centroid is the mean Y over the whole bbox.
    fn update_centroids(&mut self) {
        let Some((x0, y0, x1, y1)) = self.cached_bbox else {
            return;
        };
        let bbox_h = (y1 - y0).max(1);
        let band_h = (bbox_h + 2) / 3;
        let mut band_sum_x = [0.0f32; 3];
        let mut band_count = [0u32; 3];
        let mut sum_y = 0.0f32;
        let mut count_y = 0u32;

        for y in y0..y1 {
            let band = (((y - y0) / band_h.max(1)).min(2)) as usize;
            for x in x0..x1 {
                if self.last_full_mask.get(x, y) > 0.5 {
                    band_sum_x[band] += x as f32;
                    band_count[band] += 1;
                    sum_y += y as f32;
                    count_y += 1;
                }
            }
        }

        let w = self.mask_width as f32;
        let h = self.mask_height as f32;
        let mid_x = ((x0 + x1) as f32 / 2.0) / w;
        let mut cx = [mid_x; 3];
        for i in 0..3 {
            if band_count[i] > 0 {
                cx[i] = (band_sum_x[i] / band_count[i] as f32) / w;
            }
        }
        let cy = if count_y > 0 {
            (sum_y / count_y as f32) / h
        } else {
            ((y0 + y1) as f32 / 2.0) / h
        };

        self.centroid_tracker.observe(Centroid { cx, cy });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::producer::ConfidenceMap;

    struct SolidFrame {
        width: u32,
        height: u32,
        bytes: Vec<u8>,
    }

    impl FrameSource for SolidFrame {
        fn width(&self) -> u32 {
            self.width
        }
        fn height(&self) -> u32 {
            self.height
        }
        fn rgba_bytes(&self) -> &[u8] {
            &self.bytes
        }
        fn timestamp_ms(&self) -> i64 {
            0
        }
    }

    fn solid_frame(width: u32, height: u32) -> SolidFrame {
        SolidFrame {
            width,
            height,
            bytes: vec![128u8; (width * height * 4) as usize],
        }
    }

    struct ConstantProducer {
        value: f32,
        fail_next: bool,
    }

    impl MaskProducer for ConstantProducer {
        fn produce(&mut self, input: &ScratchSurface, _timestamp_ms: i64) -> Option<Vec<ConfidenceMap>> {
            if self.fail_next {
                return None;
            }
            Some(vec![ConfidenceMap::new(
                input.width(),
                input.height(),
                vec![self.value; input.width() * input.height()],
            )])
        }
    }

    #[test]
    fn producer_failure_is_absorbed_not_propagated() {
        let producer = Box::new(ConstantProducer {
            value: 1.0,
            fail_next: true,
        });
        let mut adapter = MaskAdapter::new(producer, 8, 8);
        let outcome = adapter.segment(&solid_frame(32, 32), 0, None);
        assert_eq!(outcome, SegmentOutcome::ProducerFailed);
    }

    #[test]
    fn full_mask_all_one_yields_full_bbox() {
        let producer = Box::new(ConstantProducer {
            value: 1.0,
            fail_next: false,
        });
        let mut adapter = MaskAdapter::new(producer, 8, 8);
        adapter.segment(&solid_frame(32, 32), 0, None);
        assert_eq!(adapter.get_person_bbox(0.0), Some(CropRegion::FULL));
    }

    #[test]
    fn motion_map_absent_before_second_call() {
        let producer = Box::new(ConstantProducer {
            value: 1.0,
            fail_next: false,
        });
        let mut adapter = MaskAdapter::new(producer, 8, 8);
        assert!(adapter.get_motion_map().is_none());
        adapter.segment(&solid_frame(32, 32), 0, None);
        assert!(adapter.get_motion_map().is_none());
        adapter.segment(&solid_frame(32, 32), 16, None);
        assert!(adapter.get_motion_map().is_some());
    }

    #[test]
    fn centroid_first_detection_has_no_velocity_spike() {
        let producer = Box::new(ConstantProducer {
            value: 1.0,
            fail_next: false,
        });
        let mut adapter = MaskAdapter::new(producer, 8, 8);
        adapter.segment(&solid_frame(32, 32), 0, None);
        assert_eq!(adapter.get_mask_motion_vector(), MotionVector::default());
    }
}
