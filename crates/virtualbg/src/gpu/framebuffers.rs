//! GPU Framebuffer Set: every intermediate render target the pipeline
//! dispatches into, fixed at init from the current tier's mask
//! resolution and the frame's display resolution. Resized only when a
//! tier change alters the mask resolution; the display-resolution
//! targets never change size for the life of the pipeline.

use crate::error::{Error, Result};

/// Single-channel and RGB intermediates both use a float format so
/// sub-threshold mask values survive the chain without unorm quantization.
pub const FRAMEBUFFER_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

/// A single render-attachment texture plus its view, recreated whenever
/// its backing dimensions change.
pub struct TextureTarget {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
}

impl TextureTarget {
    pub(crate) fn new(device: &wgpu::Device, label: &str, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::FramebufferIncomplete(format!(
                "{label}: zero-sized target ({width}x{height})"
            )));
        }
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: FRAMEBUFFER_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(Self {
            texture,
            view,
            width,
            height,
        })
    }
}

/// Every named framebuffer from spec §3, grouped by the resolution they
/// share: mask-resolution (temporal/previous-mask/morphology/shift),
/// display-resolution (bilateral/feather/composite/pre-crop) and
/// half-display-resolution (the blur ping-pong pair).
pub struct FramebufferSet {
    pub temporal: TextureTarget,
    pub previous_mask: [TextureTarget; 2],
    previous_mask_idx: usize,
    pub morphology: [TextureTarget; 2],
    pub shift: TextureTarget,
    pub bilateral: TextureTarget,
    pub feather: TextureTarget,
    pub composite: TextureTarget,
    pub pre_crop: TextureTarget,
    pub blur: [TextureTarget; 2],
    mask_width: u32,
    mask_height: u32,
    width: u32,
    height: u32,
}

impl FramebufferSet {
    pub fn new(
        device: &wgpu::Device,
        mask_width: u32,
        mask_height: u32,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let half_w = (width / 2).max(1);
        let half_h = (height / 2).max(1);
        Ok(Self {
            temporal: TextureTarget::new(device, "virtualbg.temporal", mask_width, mask_height)?,
            previous_mask: [
                TextureTarget::new(device, "virtualbg.previous_mask.0", mask_width, mask_height)?,
                TextureTarget::new(device, "virtualbg.previous_mask.1", mask_width, mask_height)?,
            ],
            previous_mask_idx: 0,
            morphology: [
                TextureTarget::new(device, "virtualbg.morphology.a", mask_width, mask_height)?,
                TextureTarget::new(device, "virtualbg.morphology.b", mask_width, mask_height)?,
            ],
            shift: TextureTarget::new(device, "virtualbg.shift", mask_width, mask_height)?,
            bilateral: TextureTarget::new(device, "virtualbg.bilateral", width, height)?,
            feather: TextureTarget::new(device, "virtualbg.feather", width, height)?,
            composite: TextureTarget::new(device, "virtualbg.composite", width, height)?,
            pre_crop: TextureTarget::new(device, "virtualbg.pre_crop", width, height)?,
            blur: [
                TextureTarget::new(device, "virtualbg.blur.a", half_w, half_h)?,
                TextureTarget::new(device, "virtualbg.blur.b", half_w, half_h)?,
            ],
            mask_width,
            mask_height,
            width,
            height,
        })
    }

    /// Reallocate only if the requested dimensions differ from what's
    /// already allocated (a tier change that doesn't touch mask
    /// resolution, or a no-op `updateOptions`, never reallocates).
    pub fn ensure_size(
        &mut self,
        device: &wgpu::Device,
        mask_width: u32,
        mask_height: u32,
        width: u32,
        height: u32,
    ) -> Result<()> {
        if mask_width == self.mask_width
            && mask_height == self.mask_height
            && width == self.width
            && height == self.height
        {
            return Ok(());
        }
        *self = Self::new(device, mask_width, mask_height, width, height)?;
        Ok(())
    }

    /// The previous-mask texture holding last call's temporal-smoothed
    /// result (read side of the ping-pong pair).
    pub fn previous_mask_read(&self) -> &TextureTarget {
        &self.previous_mask[self.previous_mask_idx]
    }

    /// The previous-mask texture to blit this call's temporal result
    /// into (write side of the ping-pong pair).
    pub fn previous_mask_write(&self) -> &TextureTarget {
        &self.previous_mask[1 - self.previous_mask_idx]
    }

    /// Commit the just-written side as the new read side for the next call.
    pub fn swap_previous_mask(&mut self) {
        self.previous_mask_idx = 1 - self.previous_mask_idx;
    }

    /// Clear both previous-mask ping-pong textures to zero, as required
    /// at `init`.
    pub fn clear_previous_mask(&self, device: &wgpu::Device, queue: &wgpu::Queue) {
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("virtualbg.clear_previous_mask"),
        });
        for target in &self.previous_mask {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("virtualbg.clear_previous_mask.pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    resolve_target: None,
                    depth_slice: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        queue.submit(std::iter::once(encoder.finish()));
    }

    pub fn mask_size(&self) -> (u32, u32) {
        (self.mask_width, self.mask_height)
    }

    pub fn display_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
