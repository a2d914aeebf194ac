//! Motion map: `|mask_t - mask_{t-delta}|` in full-frame space.

use crate::data::mask::MaskBuffer;

/// Newtype over `MaskBuffer` so a motion map can't be passed where a mask
/// is expected. Absent on the first frame after init.
#[derive(Clone, Debug, PartialEq)]
pub struct MotionMap(MaskBuffer);

impl MotionMap {
    pub fn zeros(width: usize, height: usize) -> Self {
        Self(MaskBuffer::zeros(width, height))
    }

    pub fn from_buffer(buffer: MaskBuffer) -> Self {
        Self(buffer)
    }

    pub fn buffer(&self) -> &MaskBuffer {
        &self.0
    }

    pub fn buffer_mut(&mut self) -> &mut MaskBuffer {
        &mut self.0
    }

    pub fn width(&self) -> usize {
        self.0.width()
    }

    pub fn height(&self) -> usize {
        self.0.height()
    }
}
