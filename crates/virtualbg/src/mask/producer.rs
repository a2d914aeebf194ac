//! The external segmentation model's interface, named only by the shape
//! the adapter requires — the core never specifies or ships a model.

/// A scratch RGB(A) tile the adapter downscales (and optionally crops)
/// the camera frame into before handing it to the producer. Reused
/// across calls; only reallocated if the tier changes the model
/// resolution.
pub struct ScratchSurface {
    width: usize,
    height: usize,
    data: Vec<u8>,
}

impl ScratchSurface {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0u8; width * height * 4],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn rgba_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Nearest-neighbor resample `(src_x, src_y, src_w, src_h)` of `src`
    /// (row-major RGBA8, `src_stride_w * src_stride_h * 4` long) into
    /// this scratch's full extent.
    pub(crate) fn blit_region(
        &mut self,
        src: &[u8],
        src_stride_w: usize,
        src_x: usize,
        src_y: usize,
        src_w: usize,
        src_h: usize,
    ) {
        let src_w = src_w.max(1);
        let src_h = src_h.max(1);
        for dy in 0..self.height {
            let sy = src_y + (dy * src_h) / self.height.max(1);
            for dx in 0..self.width {
                let sx = src_x + (dx * src_w) / self.width.max(1);
                let src_idx = (sy * src_stride_w + sx) * 4;
                let dst_idx = (dy * self.width + dx) * 4;
                self.data[dst_idx..dst_idx + 4].copy_from_slice(&src[src_idx..src_idx + 4]);
            }
        }
    }
}

/// One class channel of a producer result: a single-channel confidence
/// map the same size as the scratch surface that produced it.
pub struct ConfidenceMap {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl ConfidenceMap {
    pub fn new(width: usize, height: usize, data: Vec<f32>) -> Self {
        assert_eq!(data.len(), width * height, "confidence map size mismatch");
        Self { width, height, data }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn as_float_array(&self) -> &[f32] {
        &self.data
    }
}

/// Any external segmenter: given an RGB(A) tile and a timestamp, returns
/// one confidence map per class. `None` signals an inference failure,
/// which the adapter absorbs rather than propagating as an error.
pub trait MaskProducer: Send {
    fn produce(&mut self, input: &ScratchSurface, timestamp_ms: i64) -> Option<Vec<ConfidenceMap>>;
}

/// Extracts the person-confidence channel: three or more classes means
/// the first channel is background and person is its complement; one
/// or two channels means person is the last channel.
///
/// Which channel is "background" in the multiclass case is a model
/// convention, not a fixed standard; this adopts channel 0, the most
/// common choice among segmentation models.
pub fn extract_person_channel(maps: &[ConfidenceMap]) -> Vec<f32> {
    assert!(!maps.is_empty(), "producer returned zero classes");
    if maps.len() >= 3 {
        maps[0].as_float_array().iter().map(|bg| 1.0 - bg).collect()
    } else {
        maps[maps.len() - 1].as_float_array().to_vec()
    }
}
