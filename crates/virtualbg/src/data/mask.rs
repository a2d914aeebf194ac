//! Mask buffer: person-confidence map in \[0,1\], single channel.
//!
//! Two logical variants share one type: a crop-space mask straight from the
//! model at its native resolution, and a full-frame mask with the crop-space
//! mask placed back into its ROI rectangle and zeros elsewhere. The GPU
//! pipeline only ever consumes full-frame masks.

use crate::data::roi::CropRegion;

/// Width of the duplicate-extend edge pad applied before GPU upload.
pub const EDGE_PAD: usize = 4;

/// Owned single-channel confidence buffer, row-major, `width * height` long.
#[derive(Clone, Debug, PartialEq)]
pub struct MaskBuffer {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl MaskBuffer {
    /// All-zero mask of the given size.
    pub fn zeros(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width * height],
        }
    }

    /// Mask filled from a row-major buffer. Panics if `data.len() !=
    /// width * height`, mirroring the pipeline's upload precondition.
    pub fn from_vec(width: usize, height: usize, data: Vec<f32>) -> Self {
        assert_eq!(data.len(), width * height, "mask buffer size mismatch");
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, v: f32) {
        self.data[y * self.width + x] = v;
    }

    /// Place `self` (a crop-space mask) back into a zeroed `m_width x
    /// m_height` full-frame buffer at `crop`'s normalized rectangle.
    ///
    /// For each destination pixel inside the bounds, nearest-sample the
    /// source (the adapter's ROI back-map).
    pub fn embed_in_full_frame(
        &self,
        crop: CropRegion,
        m_width: usize,
        m_height: usize,
    ) -> MaskBuffer {
        let mut full = MaskBuffer::zeros(m_width, m_height);

        let cx0 = crop.x * m_width as f32;
        let cy0 = crop.y * m_height as f32;
        let cw = (crop.w * m_width as f32).max(1.0);
        let ch = (crop.h * m_height as f32).max(1.0);

        let x0 = cx0.floor().max(0.0) as usize;
        let y0 = cy0.floor().max(0.0) as usize;
        let x1 = ((cx0 + cw).ceil() as usize).min(m_width);
        let y1 = ((cy0 + ch).ceil() as usize).min(m_height);

        for y in y0..y1 {
            for x in x0..x1 {
                let sx = (((x as f32 - cx0) * self.width as f32 / cw) as usize)
                    .min(self.width - 1);
                let sy = (((y as f32 - cy0) * self.height as f32 / ch) as usize)
                    .min(self.height - 1);
                full.set(x, y, self.get(sx, sy));
            }
        }
        full
    }

    /// Element-wise absolute difference with `other`, reusing `out`'s
    /// backing storage (the adapter's reused motion buffer).
    pub fn diff_into(&self, other: &MaskBuffer, out: &mut MaskBuffer) {
        debug_assert_eq!(self.width, other.width);
        debug_assert_eq!(self.height, other.height);
        debug_assert_eq!(self.width, out.width);
        debug_assert_eq!(self.height, out.height);
        for i in 0..self.data.len() {
            out.data[i] = (self.data[i] - other.data[i]).abs();
        }
    }

    /// Bounding box (in pixel coordinates, inclusive-exclusive) of pixels
    /// with value > 0.5. `None` if fewer than one pixel qualifies.
    pub fn person_bbox_px(&self) -> Option<(usize, usize, usize, usize)> {
        let mut min_x = usize::MAX;
        let mut min_y = usize::MAX;
        let mut max_x = 0usize;
        let mut max_y = 0usize;
        let mut found = false;
        for y in 0..self.height {
            for x in 0..self.width {
                if self.get(x, y) > 0.5 {
                    found = true;
                    min_x = min_x.min(x);
                    min_y = min_y.min(y);
                    max_x = max_x.max(x);
                    max_y = max_y.max(y);
                }
            }
        }
        found.then_some((min_x, min_y, max_x + 1, max_y + 1))
    }

    /// Row-major buffer with `EDGE_PAD` rows/cols duplicate-extended from
    /// their inward neighbor, ready for GPU
    /// upload. Only meaningful for masks wider/taller than `2 * EDGE_PAD`.
    pub fn padded_for_upload(&self) -> MaskBuffer {
        let mut out = self.clone();
        if self.width <= 2 * EDGE_PAD || self.height <= 2 * EDGE_PAD {
            return out;
        }
        for i in 0..EDGE_PAD {
            // Duplicate column EDGE_PAD into columns [0, EDGE_PAD).
            for y in 0..self.height {
                let v = self.get(EDGE_PAD, y);
                out.set(i, y, v);
            }
            // Duplicate column (width - 1 - EDGE_PAD) into the last EDGE_PAD columns.
            let src_x = self.width - 1 - EDGE_PAD;
            let dst_x = self.width - 1 - i;
            for y in 0..self.height {
                let v = self.get(src_x, y);
                out.set(dst_x, y, v);
            }
        }
        for i in 0..EDGE_PAD {
            for x in 0..self.width {
                let v = out.get(x, EDGE_PAD);
                out.set(x, i, v);
            }
            let src_y = self.height - 1 - EDGE_PAD;
            let dst_y = self.height - 1 - i;
            for x in 0..self.width {
                let v = out.get(x, src_y);
                out.set(x, dst_y, v);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_duplicates_fifth_row_and_col() {
        let mut m = MaskBuffer::zeros(16, 16);
        for y in 0..16 {
            for x in 0..16 {
                m.set(x, y, (x + y) as f32);
            }
        }
        let padded = m.padded_for_upload();
        for y in 0..16 {
            for i in 0..EDGE_PAD {
                assert_eq!(padded.get(i, y), m.get(EDGE_PAD, y));
            }
        }
        for x in 0..16 {
            for i in 0..EDGE_PAD {
                assert_eq!(padded.get(x, i), padded.get(x, EDGE_PAD));
            }
        }
    }

    #[test]
    fn bbox_none_when_all_zero() {
        let m = MaskBuffer::zeros(8, 8);
        assert_eq!(m.person_bbox_px(), None);
    }

    #[test]
    fn embed_in_full_frame_places_crop_in_roi() {
        let crop_mask = MaskBuffer::from_vec(2, 2, vec![1.0, 1.0, 1.0, 1.0]);
        let region = CropRegion {
            x: 0.25,
            y: 0.25,
            w: 0.5,
            h: 0.5,
        };
        let full = crop_mask.embed_in_full_frame(region, 8, 8);
        assert_eq!(full.get(0, 0), 0.0);
        assert_eq!(full.get(4, 4), 1.0);
    }
}
