//! Auto-Framer: derives a smoothed crop rectangle from the mask (or an
//! externally supplied face box) so the subject stays centered and
//! appropriately zoomed as they move.

use crate::config::AutoFrameOptions;
use crate::data::mask::MaskBuffer;

const TARGET_FILL: f32 = 0.9;

/// `{x, y, w, h, zoom}`; `w == h == 1/zoom` always holds. A consumer
/// treats `zoom <= 1.02` as "no crop".
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AutoFrameCrop {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    pub zoom: f32,
}

impl AutoFrameCrop {
    fn full(zoom: f32) -> Self {
        let side = 1.0 / zoom;
        Self {
            x: (1.0 - side) / 2.0,
            y: (1.0 - side) / 2.0,
            w: side,
            h: side,
            zoom,
        }
    }
}

struct WeightedBbox {
    min_x: f32,
    min_y: f32,
    max_x: f32,
    max_y: f32,
    center_x: f32,
    center_y: f32,
    weight: f32,
}

impl WeightedBbox {
    fn w(&self) -> f32 {
        self.max_x - self.min_x
    }
    fn h(&self) -> f32 {
        self.max_y - self.min_y
    }
}

fn weighted_bbox(mask: &MaskBuffer) -> Option<WeightedBbox> {
    let (mw, mh) = (mask.width(), mask.height());
    let mut min_x = f32::MAX;
    let mut min_y = f32::MAX;
    let mut max_x = f32::MIN;
    let mut max_y = f32::MIN;
    let mut sum_wx = 0.0f32;
    let mut sum_wy = 0.0f32;
    let mut weight = 0.0f32;

    for y in 0..mh {
        for x in 0..mw {
            let m = mask.get(x, y);
            if m <= 0.5 {
                continue;
            }
            let nx = x as f32 / mw as f32;
            let ny = y as f32 / mh as f32;
            min_x = min_x.min(nx);
            min_y = min_y.min(ny);
            max_x = max_x.max(nx);
            max_y = max_y.max(ny);
            sum_wx += nx * m;
            sum_wy += ny * m;
            weight += m;
        }
    }

    if weight < 1.0 {
        return None;
    }
    Some(WeightedBbox {
        min_x,
        min_y,
        max_x,
        max_y,
        center_x: sum_wx / weight,
        center_y: sum_wy / weight,
        weight,
    })
}

pub struct AutoFramer {
    options: AutoFrameOptions,
    smoothed: Option<AutoFrameCrop>,
    frame_count: u32,
}

impl AutoFramer {
    pub fn new(options: AutoFrameOptions) -> Self {
        Self {
            options,
            smoothed: None,
            frame_count: 0,
        }
    }

    pub fn set_options(&mut self, options: AutoFrameOptions) {
        self.options = options;
    }

    pub fn current_crop(&self) -> AutoFrameCrop {
        self.smoothed.unwrap_or_else(|| AutoFrameCrop::full(self.options.min_zoom.max(1.0)))
    }

    /// Body-mode update from the current mask. Returns the (possibly
    /// unchanged) smoothed crop.
    pub fn update_from_mask(&mut self, mask: &MaskBuffer) -> AutoFrameCrop {
        let Some(bbox) = weighted_bbox(mask) else {
            return self.current_crop();
        };
        if bbox.w() * bbox.h() < 0.01 {
            return self.current_crop();
        }
        self.update_from_target_box(bbox.center_x, bbox.center_y, bbox.w(), bbox.h())
    }

    /// Face-mode update: the same target math, starting from an
    /// externally supplied face box extended heuristically downward and
    /// outward to approximate the body's extent.
    pub fn update_from_face(&mut self, face_x: f32, face_y: f32, face_w: f32, face_h: f32) -> AutoFrameCrop {
        const BODY_WIDTH_FACTOR: f32 = 1.8;
        const BODY_HEIGHT_FACTOR: f32 = 3.2;
        let center_x = face_x + face_w * 0.5;
        let body_w = (face_w * BODY_WIDTH_FACTOR).min(1.0);
        let body_h = (face_h * BODY_HEIGHT_FACTOR).min(1.0);
        self.update_from_target_box(center_x, face_y + face_h * 0.5, body_w, body_h)
    }

    fn update_from_target_box(&mut self, center_x: f32, center_y: f32, box_w: f32, box_h: f32) -> AutoFrameCrop {
        if !self.options.continuous && self.frame_count > 30 {
            return self.current_crop();
        }
        self.frame_count += 1;

        let extent = box_w.max(box_h).max(1e-4);
        let zoom = (TARGET_FILL / extent).clamp(self.options.min_zoom, self.options.max_zoom);
        let side = 1.0 / zoom;
        let vert_offset = 0.55 + (1.0 - extent) * 0.03;

        let target_x = (center_x - side * 0.5).clamp(0.0, 1.0 - side);
        let target_y = (center_y - side * vert_offset).clamp(0.0, 1.0 - side);
        let target = AutoFrameCrop {
            x: target_x,
            y: target_y,
            w: side,
            h: side,
            zoom,
        };

        let smoothed = match self.smoothed {
            None => target,
            Some(prev) => {
                let s = self.options.smoothing;
                AutoFrameCrop {
                    x: prev.x * s + target.x * (1.0 - s),
                    y: prev.y * s + target.y * (1.0 - s),
                    w: prev.w * s + target.w * (1.0 - s),
                    h: prev.h * s + target.h * (1.0 - s),
                    zoom: prev.zoom * s + target.zoom * (1.0 - s),
                }
            }
        };
        self.smoothed = Some(smoothed);
        smoothed
    }

    pub fn reset(&mut self) {
        self.smoothed = None;
        self.frame_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_mask(center_x: f32, center_y: f32, side: f32) -> MaskBuffer {
        let size = 64usize;
        let mut mask = MaskBuffer::zeros(size, size);
        let half = side / 2.0;
        for y in 0..size {
            for x in 0..size {
                let nx = x as f32 / size as f32;
                let ny = y as f32 / size as f32;
                if (nx - center_x).abs() <= half && (ny - center_y).abs() <= half {
                    mask.set(x, y, 1.0);
                }
            }
        }
        mask
    }

    #[test]
    fn first_frame_snaps_to_target() {
        let mut framer = AutoFramer::new(AutoFrameOptions {
            max_zoom: 4.0,
            ..AutoFrameOptions::default()
        });
        let mask = square_mask(0.5, 0.5, 0.3);
        let crop = framer.update_from_mask(&mask);
        assert!(crop.zoom > 1.0);
        assert!(crop.is_finite_and_valid());
    }

    #[test]
    fn empty_mask_holds_current_crop() {
        let mut framer = AutoFramer::new(AutoFrameOptions::default());
        let before = framer.current_crop();
        let empty = MaskBuffer::zeros(32, 32);
        let after = framer.update_from_mask(&empty);
        assert_eq!(before, after);
    }

    #[test]
    fn zoom_stays_within_configured_bounds() {
        let mut framer = AutoFramer::new(AutoFrameOptions {
            max_zoom: 1.5,
            min_zoom: 1.0,
            ..AutoFrameOptions::default()
        });
        for _ in 0..10 {
            let mask = square_mask(0.5, 0.5, 0.1);
            let crop = framer.update_from_mask(&mask);
            assert!(crop.zoom <= 1.5 + 1e-4 && crop.zoom >= 1.0 - 1e-4);
            assert!(crop.x >= 0.0 && crop.y >= 0.0);
            assert!(crop.x + crop.w <= 1.0 + 1e-4);
            assert!(crop.y + crop.h <= 1.0 + 1e-4);
        }
    }

    impl AutoFrameCrop {
        fn is_finite_and_valid(&self) -> bool {
            self.x.is_finite()
                && self.y.is_finite()
                && self.w.is_finite()
                && self.h.is_finite()
                && (self.w - self.h).abs() < 1e-4
        }
    }
}
