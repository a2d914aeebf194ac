//! Frame and surface handles at the boundary with the host's frame
//! source/sink, which the core never retains past a single dispatch.

/// An RGBA image usable as the source for a 2D texture upload. The host
/// frame transport implements this; the core treats it as opaque and
/// ephemeral — never retained past one `process`/`processInterpolated`
/// call.
pub trait FrameSource {
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    /// Tightly packed RGBA8 row-major bytes, `width * height * 4` long.
    fn rgba_bytes(&self) -> &[u8];

    /// Monotonic timestamp in milliseconds.
    fn timestamp_ms(&self) -> i64;
}

/// The composited output surface handed back to the caller. Wraps the
/// pipeline's output texture; the caller reads it back or forwards it to
/// its own sink.
pub struct Surface {
    texture: wgpu::Texture,
    width: u32,
    height: u32,
}

impl Surface {
    pub(crate) fn new(texture: wgpu::Texture, width: u32, height: u32) -> Self {
        Self {
            texture,
            width,
            height,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }
}
