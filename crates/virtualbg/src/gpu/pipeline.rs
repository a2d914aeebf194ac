//! `GpuPipeline`: owns every GPU object the core touches and runs the
//! fresh-mask and interpolated stage orders from spec §4.B. Framebuffer
//! allocation and per-stage dispatch follow the ping-pong,
//! bind-group-per-pass style used throughout the pack's other `wgpu`
//! compositors: a handful of `wgpu::RenderPipeline`s built once at
//! `init`, a uniform buffer per stage updated in place with
//! `Queue::write_buffer`, and bind groups rebuilt per frame since the
//! source/destination views change every call.

use bytemuck::Pod;
use wgpu::util::DeviceExt;

use crate::config::BackgroundMode;
use crate::data::frame::{FrameSource, Surface};
use crate::data::mask::MaskBuffer;
use crate::data::motion::MotionMap;
use crate::data::roi::CropRegion;
use crate::data::tier::QualityTier;
use crate::error::{Error, Result};
use crate::gpu::context::GpuContext;
use crate::gpu::framebuffers::{FramebufferSet, FRAMEBUFFER_FORMAT};
use crate::gpu::shaders;
use crate::gpu::uniforms::*;

/// Softness of the temporal stage's soft-threshold around 0.5, fixed by
/// spec (not tier-dependent).
const TEMPORAL_SOFTNESS: f32 = 0.25;

/// `wgpu::Features::FLOAT32_FILTERABLE` gates whether mask/motion
/// textures (R32Float) can use a linear sampler; absent it, they fall
/// back to nearest, same soft-degrade pattern as the capability probe.
fn mask_filter_mode(device: &wgpu::Device) -> wgpu::FilterMode {
    if device
        .features()
        .contains(wgpu::Features::FLOAT32_FILTERABLE)
    {
        wgpu::FilterMode::Linear
    } else {
        wgpu::FilterMode::Nearest
    }
}

/// Mean R/G/B over an RGBA8 buffer, sampled at a stride so a full-res
/// camera frame or background image doesn't cost a dense per-pixel scan.
fn mean_rgb(rgba: &[u8]) -> [f32; 3] {
    const STRIDE_PX: usize = 31;
    let mut sum = [0.0f64; 3];
    let mut n = 0u64;
    let mut i = 0usize;
    while i + 3 < rgba.len() {
        sum[0] += rgba[i] as f64;
        sum[1] += rgba[i + 1] as f64;
        sum[2] += rgba[i + 2] as f64;
        n += 1;
        i += 4 * STRIDE_PX;
    }
    if n == 0 {
        return [0.5, 0.5, 0.5];
    }
    [
        (sum[0] / n as f64 / 255.0) as f32,
        (sum[1] / n as f64 / 255.0) as f32,
        (sum[2] / n as f64 / 255.0) as f32,
    ]
}

/// One compiled fragment stage: pipeline, the bind group layout its
/// frame-by-frame bind groups must match, and its reused uniform buffer.
struct Stage {
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
}

impl Stage {
    /// `texture_filterable` binds start at binding 2 (0 = uniform, 1 =
    /// sampler), one entry per texture, in order. A texture backed by an
    /// `R32Float`/`Rg32Float`/`Rgba32Float` view is only filterable when
    /// the device has `FLOAT32_FILTERABLE`; every other format used in
    /// this crate (`Rgba16Float`, `Rgba8Unorm`) is filterable
    /// unconditionally, so callers pass `true` for those. The sampler
    /// binding itself can only declare `Filtering` when every texture in
    /// the group is filterable — a single non-filterable entry forces
    /// the whole group's sampler to `NonFiltering`, which remains valid
    /// to bind alongside the filterable entries too.
    fn new(
        device: &wgpu::Device,
        label: &str,
        vertex_module: &wgpu::ShaderModule,
        fragment_source: &str,
        texture_filterable: &[bool],
        uniform_size: u64,
    ) -> Result<Self> {
        let fragment_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(fragment_source.into()),
        });

        let sampler_type = if texture_filterable.iter().all(|&f| f) {
            wgpu::SamplerBindingType::Filtering
        } else {
            wgpu::SamplerBindingType::NonFiltering
        };

        let mut entries = vec![
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(sampler_type),
                count: None,
            },
        ];
        for (i, &filterable) in texture_filterable.iter().enumerate() {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: 2 + i as u32,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
        }

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries: &entries,
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(label),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: vertex_module,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &fragment_module,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: FRAMEBUFFER_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            multiview: None,
            cache: None,
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: uniform_size,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Ok(Self {
            pipeline,
            bind_group_layout,
            uniform_buffer,
        })
    }

    fn write_uniform<U: Pod>(&self, queue: &wgpu::Queue, data: &U) {
        queue.write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(data));
    }

    fn bind_group(
        &self,
        device: &wgpu::Device,
        sampler: &wgpu::Sampler,
        textures: &[&wgpu::TextureView],
    ) -> wgpu::BindGroup {
        let mut entries = vec![
            wgpu::BindGroupEntry {
                binding: 0,
                resource: self.uniform_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
        ];
        for (i, view) in textures.iter().enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: 2 + i as u32,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout: &self.bind_group_layout,
            entries: &entries,
        })
    }

    fn dispatch(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        sampler: &wgpu::Sampler,
        textures: &[&wgpu::TextureView],
        destination: &wgpu::TextureView,
    ) {
        let bind_group = self.bind_group(device, sampler, textures);
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: None,
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: destination,
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
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..3, 0..1);
    }
}

/// A plain input texture the pipeline uploads into every call (camera,
/// raw mask, motion, background image); never rendered into.
struct InputTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

impl InputTexture {
    fn new(device: &wgpu::Device, label: &str, width: u32, height: u32, format: wgpu::TextureFormat) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            width,
            height,
        }
    }
}

/// Non-reallocating mutable pipeline state `updateOptions` touches.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineParams {
    pub feather_radius: f32,
    pub range_sigma: f32,
    pub appear_rate: f32,
    pub disappear_rate: f32,
    pub blur_radius: f32,
    pub morphology: bool,
    pub light_wrap: bool,
    pub background_mode: BackgroundMode,
    pub background_fixed: bool,
    pub background_color: [f32; 3],
}

impl PipelineParams {
    pub fn from_tier(tier: &QualityTier, background_mode: BackgroundMode, background_fixed: bool) -> Self {
        Self {
            feather_radius: tier.feather_radius,
            range_sigma: tier.range_sigma,
            appear_rate: tier.appear_rate,
            disappear_rate: tier.disappear_rate,
            blur_radius: tier.blur_radius,
            morphology: tier.morphology,
            light_wrap: tier.light_wrap,
            background_mode,
            background_fixed,
            background_color: [0.0, 0.0, 0.0],
        }
    }

    fn mode_tag(&self) -> f32 {
        match self.background_mode {
            BackgroundMode::None | BackgroundMode::Blur => COMPOSITE_MODE_BLUR,
            BackgroundMode::Image { .. } => COMPOSITE_MODE_IMAGE,
            BackgroundMode::Color { rgb } => {
                let _ = rgb;
                COMPOSITE_MODE_COLOR
            }
        }
    }
}

/// Partial update applied by `GpuPipeline::update_options`; every field
/// left `None` is left untouched. Never triggers a reallocation — only
/// `apply_tier` (which can change mask resolution) does.
#[derive(Clone, Debug, Default)]
pub struct OptionsPatch {
    pub feather_radius: Option<f32>,
    pub appear_rate: Option<f32>,
    pub disappear_rate: Option<f32>,
    pub blur_radius: Option<f32>,
    pub morphology: Option<bool>,
    pub light_wrap: Option<bool>,
    pub background_mode: Option<BackgroundMode>,
    pub background_fixed: Option<bool>,
    /// Raw RGBA bytes for a new background image. Re-uploaded
    /// unconditionally whenever present; no same-image no-op detection.
    pub background_image: Option<(Vec<u8>, u32, u32)>,
}

pub struct GpuPipeline {
    ctx: GpuContext,
    quad_module: wgpu::ShaderModule,
    linear_sampler: wgpu::Sampler,
    mask_sampler: wgpu::Sampler,

    temporal: Stage,
    morphology: Stage,
    shift: Stage,
    bilateral: Stage,
    feather: Stage,
    blur: Stage,
    composite: Stage,
    light_wrap: Stage,
    crop: Stage,
    color_match: Stage,

    fbos: FramebufferSet,
    output: crate::gpu::framebuffers::TextureTarget,

    camera_tex: InputTexture,
    raw_mask_tex: InputTexture,
    motion_tex: InputTexture,
    background_image_tex: InputTexture,
    background_image_matched: crate::gpu::framebuffers::TextureTarget,
    placeholder_tex: InputTexture,
    has_background_image: bool,
    /// Running estimate of the camera frame's mean RGB, the `fgMean` input
    /// to the color-match stage; updated on every `upload_frame` so the
    /// next background-image upload color-matches against something
    /// better than the init-time neutral default.
    camera_mean: [f32; 3],

    params: PipelineParams,
    crop_rect: Option<CropRegion>,
    first_frame: bool,

    mask_width: u32,
    mask_height: u32,
    width: u32,
    height: u32,
}

impl GpuPipeline {
    pub fn init(
        ctx: GpuContext,
        width: u32,
        height: u32,
        tier: &QualityTier,
        background_mode: BackgroundMode,
        background_fixed: bool,
    ) -> Result<Self> {
        let device = ctx.device().clone();
        let queue = ctx.queue().clone();

        let quad_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("virtualbg.quad"),
            source: wgpu::ShaderSource::Wgsl(shaders::QUAD_VERTEX.into()),
        });

        let linear_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("virtualbg.linear_sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let mask_filter = mask_filter_mode(&device);
        let mask_filterable = mask_filter == wgpu::FilterMode::Linear;
        let mask_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("virtualbg.mask_sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: mask_filter,
            min_filter: mask_filter,
            ..Default::default()
        });

        let temporal = Stage::new(
            &device,
            "virtualbg.stage.temporal",
            &quad_module,
            shaders::TEMPORAL,
            &[mask_filterable, true, mask_filterable],
            std::mem::size_of::<TemporalUniforms>() as u64,
        )?;
        let morphology = Stage::new(
            &device,
            "virtualbg.stage.morphology",
            &quad_module,
            shaders::MORPHOLOGY,
            &[true],
            std::mem::size_of::<MorphUniforms>() as u64,
        )?;
        let shift = Stage::new(
            &device,
            "virtualbg.stage.shift",
            &quad_module,
            shaders::SHIFT,
            &[true],
            std::mem::size_of::<ShiftUniforms>() as u64,
        )?;
        let bilateral = Stage::new(
            &device,
            "virtualbg.stage.bilateral",
            &quad_module,
            shaders::BILATERAL,
            &[true, true],
            std::mem::size_of::<BilateralUniforms>() as u64,
        )?;
        let feather = Stage::new(
            &device,
            "virtualbg.stage.feather",
            &quad_module,
            shaders::FEATHER,
            &[true],
            std::mem::size_of::<FeatherUniforms>() as u64,
        )?;
        let blur = Stage::new(
            &device,
            "virtualbg.stage.blur",
            &quad_module,
            shaders::BLUR,
            &[true],
            std::mem::size_of::<BlurUniforms>() as u64,
        )?;
        let composite = Stage::new(
            &device,
            "virtualbg.stage.composite",
            &quad_module,
            shaders::COMPOSITE,
            &[true, true, true, true],
            std::mem::size_of::<CompositeUniforms>() as u64,
        )?;
        let light_wrap = Stage::new(
            &device,
            "virtualbg.stage.light_wrap",
            &quad_module,
            shaders::LIGHT_WRAP,
            &[true, true, true, true],
            std::mem::size_of::<LightWrapUniforms>() as u64,
        )?;
        let crop = Stage::new(
            &device,
            "virtualbg.stage.crop",
            &quad_module,
            shaders::CROP,
            &[true],
            std::mem::size_of::<CropUniforms>() as u64,
        )?;
        let color_match = Stage::new(
            &device,
            "virtualbg.stage.color_match",
            &quad_module,
            shaders::COLOR_MATCH,
            &[true],
            std::mem::size_of::<ColorMatchUniforms>() as u64,
        )?;

        let mask_width = tier.mask_width;
        let mask_height = tier.mask_height;
        let fbos = FramebufferSet::new(&device, mask_width, mask_height, width, height)?;
        fbos.clear_previous_mask(&device, &queue);

        let output = crate::gpu::framebuffers::TextureTarget::new(&device, "virtualbg.output", width, height)?;

        let camera_tex = InputTexture::new(&device, "virtualbg.camera", width, height, wgpu::TextureFormat::Rgba8Unorm);
        let raw_mask_tex = InputTexture::new(
            &device,
            "virtualbg.raw_mask",
            mask_width,
            mask_height,
            wgpu::TextureFormat::R32Float,
        );
        let motion_tex = InputTexture::new(
            &device,
            "virtualbg.motion",
            mask_width,
            mask_height,
            wgpu::TextureFormat::R32Float,
        );
        let placeholder_tex = InputTexture::new(&device, "virtualbg.bg_placeholder", 1, 1, wgpu::TextureFormat::Rgba8Unorm);
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &placeholder_tex.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &[0u8, 0, 0, 255],
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: Some(1),
            },
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );
        let background_image_tex =
            InputTexture::new(&device, "virtualbg.bg_image", 1, 1, wgpu::TextureFormat::Rgba8Unorm);
        let background_image_matched = crate::gpu::framebuffers::TextureTarget::new(&device, "virtualbg.bg_image_matched", 1, 1)?;

        tracing::info!(width, height, mask_width, mask_height, "GPU pipeline initialized");

        Ok(Self {
            ctx,
            quad_module,
            linear_sampler,
            mask_sampler,
            temporal,
            morphology,
            shift,
            bilateral,
            feather,
            blur,
            composite,
            light_wrap,
            crop,
            color_match,
            fbos,
            output,
            camera_tex,
            raw_mask_tex,
            motion_tex,
            background_image_tex,
            background_image_matched,
            placeholder_tex,
            has_background_image: false,
            camera_mean: [0.5, 0.5, 0.5],
            params: PipelineParams::from_tier(tier, background_mode, background_fixed),
            crop_rect: None,
            first_frame: true,
            mask_width,
            mask_height,
            width,
            height,
        })
    }

    pub fn set_crop_rect(&mut self, rect: Option<CropRegion>) {
        self.crop_rect = rect;
    }

    pub fn update_options(&mut self, patch: OptionsPatch) -> Result<()> {
        if let Some(v) = patch.feather_radius {
            self.params.feather_radius = v;
        }
        if let Some(v) = patch.appear_rate {
            self.params.appear_rate = v;
        }
        if let Some(v) = patch.disappear_rate {
            self.params.disappear_rate = v;
        }
        if let Some(v) = patch.blur_radius {
            self.params.blur_radius = v;
        }
        if let Some(v) = patch.morphology {
            self.params.morphology = v;
        }
        if let Some(v) = patch.light_wrap {
            self.params.light_wrap = v;
        }
        if let Some(v) = patch.background_fixed {
            self.params.background_fixed = v;
        }
        if let Some(mode) = patch.background_mode {
            if let BackgroundMode::Color { rgb } = &mode {
                self.params.background_color =
                    [rgb.r as f32 / 255.0, rgb.g as f32 / 255.0, rgb.b as f32 / 255.0];
            }
            self.params.background_mode = mode;
        }
        if let Some((rgba, w, h)) = patch.background_image {
            self.upload_background_image(&rgba, w, h)?;
        }
        Ok(())
    }

    /// Reallocates mask-resolution framebuffers/input textures if the
    /// tier changes the model resolution; a no-op otherwise.
    pub fn apply_tier(&mut self, tier: &QualityTier) -> Result<()> {
        self.params.feather_radius = tier.feather_radius;
        self.params.range_sigma = tier.range_sigma;
        self.params.appear_rate = tier.appear_rate;
        self.params.disappear_rate = tier.disappear_rate;
        self.params.blur_radius = tier.blur_radius;
        self.params.morphology = tier.morphology;
        self.params.light_wrap = tier.light_wrap;

        if tier.mask_width == self.mask_width && tier.mask_height == self.mask_height {
            return Ok(());
        }

        let device = self.ctx.device().clone();
        let queue = self.ctx.queue().clone();
        self.mask_width = tier.mask_width;
        self.mask_height = tier.mask_height;
        self.fbos
            .ensure_size(&device, self.mask_width, self.mask_height, self.width, self.height)?;
        self.fbos.clear_previous_mask(&device, &queue);
        self.raw_mask_tex = InputTexture::new(
            &device,
            "virtualbg.raw_mask",
            self.mask_width,
            self.mask_height,
            wgpu::TextureFormat::R32Float,
        );
        self.motion_tex = InputTexture::new(
            &device,
            "virtualbg.motion",
            self.mask_width,
            self.mask_height,
            wgpu::TextureFormat::R32Float,
        );
        self.first_frame = true;
        tracing::info!(mask_width = self.mask_width, mask_height = self.mask_height, "pipeline resized for tier change");
        Ok(())
    }

    fn upload_background_image(&mut self, rgba: &[u8], width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 || rgba.len() != (width * height * 4) as usize {
            return Err(Error::ResourceUploadFailure(format!(
                "background image {width}x{height} does not match buffer length {}",
                rgba.len()
            )));
        }
        let device = self.ctx.device().clone();
        let queue = self.ctx.queue().clone();
        self.background_image_tex = InputTexture::new(&device, "virtualbg.bg_image", width, height, wgpu::TextureFormat::Rgba8Unorm);
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.background_image_tex.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            rgba,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.has_background_image = true;

        self.background_image_matched =
            crate::gpu::framebuffers::TextureTarget::new(&device, "virtualbg.bg_image_matched", width, height)?;
        let bg_mean = mean_rgb(rgba);
        self.color_match.write_uniform(
            &queue,
            &ColorMatchUniforms {
                fg_mean: self.camera_mean,
                strength: 0.2,
                bg_mean,
                _pad0: 0.0,
            },
        );
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("virtualbg.color_match"),
        });
        self.color_match.dispatch(
            &device,
            &mut encoder,
            &self.linear_sampler,
            &[&self.background_image_tex.view],
            &self.background_image_matched.view,
        );
        queue.submit(std::iter::once(encoder.finish()));

        Ok(())
    }

    fn upload_frame(&mut self, frame: &dyn FrameSource) -> Result<()> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(Error::ResourceUploadFailure(format!(
                "frame {}x{} does not match configured {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }
        let bytes = frame.rgba_bytes();
        if bytes.is_empty() || bytes.len() != (self.width * self.height * 4) as usize {
            return Err(Error::ResourceUploadFailure("zero-sized or malformed frame".into()));
        }
        self.camera_mean = mean_rgb(bytes);
        self.ctx.queue().write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.camera_tex.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytes,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(self.width * 4),
                rows_per_image: Some(self.height),
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn upload_mask(&self, mask: &MaskBuffer) -> Result<()> {
        if mask.width() != self.mask_width as usize || mask.height() != self.mask_height as usize {
            return Err(Error::ResourceUploadFailure(format!(
                "mask {}x{} does not match configured {}x{}",
                mask.width(),
                mask.height(),
                self.mask_width,
                self.mask_height
            )));
        }
        let padded = mask.padded_for_upload();
        self.ctx.queue().write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.raw_mask_tex.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(padded.as_slice()),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(self.mask_width * 4),
                rows_per_image: Some(self.mask_height),
            },
            wgpu::Extent3d {
                width: self.mask_width,
                height: self.mask_height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn upload_motion(&self, motion: Option<&MotionMap>) {
        if let Some(motion) = motion {
            self.ctx.queue().write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &self.motion_tex.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                bytemuck::cast_slice(motion.buffer().as_slice()),
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.mask_width * 4),
                    rows_per_image: Some(self.mask_height),
                },
                wgpu::Extent3d {
                    width: self.mask_width,
                    height: self.mask_height,
                    depth_or_array_layers: 1,
                },
            );
        }
    }

    fn background_image_view(&self) -> &wgpu::TextureView {
        if self.has_background_image {
            &self.background_image_matched.view
        } else {
            &self.placeholder_tex.view
        }
    }

    fn crop_uniform_rect(&self) -> ([f32; 2], [f32; 2]) {
        match (self.params.background_fixed, self.crop_rect) {
            (true, Some(rect)) => ([rect.x, rect.y], [rect.w, rect.h]),
            _ => ([0.0, 0.0], [1.0, 1.0]),
        }
    }

    /// Runs the dilate-then-erode morphological close (or a bypass) on
    /// the mask-resolution pipeline, returning the view holding the
    /// result to feed into bilateral upsampling.
    fn run_morphology_if_enabled<'a>(
        &'a self,
        encoder: &mut wgpu::CommandEncoder,
        src: &'a wgpu::TextureView,
    ) -> &'a wgpu::TextureView {
        if !self.params.morphology {
            return src;
        }
        let texel = [1.0 / self.mask_width as f32, 1.0 / self.mask_height as f32];
        self.morphology.write_uniform(
            self.ctx.queue(),
            &MorphUniforms {
                operation: 0.0,
                radius: 1.0,
                texel,
            },
        );
        self.morphology.dispatch(
            self.ctx.device(),
            encoder,
            &self.mask_sampler,
            &[src],
            &self.fbos.morphology[0].view,
        );
        self.morphology.write_uniform(
            self.ctx.queue(),
            &MorphUniforms {
                operation: 1.0,
                radius: 1.0,
                texel,
            },
        );
        self.morphology.dispatch(
            self.ctx.device(),
            encoder,
            &self.mask_sampler,
            &[&self.fbos.morphology[0].view],
            &self.fbos.morphology[1].view,
        );
        &self.fbos.morphology[1].view
    }

    /// Bilateral upsample -> feather -> full-resolution erode. Returns
    /// the view holding the final per-pixel mask fed to composite; this
    /// reuses the bilateral framebuffer as erosion scratch since its
    /// contents are fully consumed by feather earlier in the same pass.
    fn run_upsample_chain(&self, encoder: &mut wgpu::CommandEncoder, mask_lowres: &wgpu::TextureView) -> &wgpu::TextureView {
        let device = self.ctx.device();
        let queue = self.ctx.queue();

        self.bilateral.write_uniform(
            queue,
            &BilateralUniforms {
                range_sigma: self.params.range_sigma,
                _pad0: 0.0,
                mask_texel: [1.0 / self.mask_width as f32, 1.0 / self.mask_height as f32],
                guide_texel: [1.0 / self.width as f32, 1.0 / self.height as f32],
            },
        );
        self.bilateral.dispatch(
            device,
            encoder,
            &self.mask_sampler,
            &[mask_lowres, &self.camera_tex.view],
            &self.fbos.bilateral.view,
        );

        self.feather.write_uniform(
            queue,
            &FeatherUniforms {
                radius: self.params.feather_radius,
                _pad0: 0.0,
                _pad1: 0.0,
                _pad2: 0.0,
                texel: [1.0 / self.width as f32, 1.0 / self.height as f32],
                _pad3: [0.0, 0.0],
            },
        );
        self.feather.dispatch(
            device,
            encoder,
            &self.linear_sampler,
            &[&self.fbos.bilateral.view],
            &self.fbos.feather.view,
        );

        self.morphology.write_uniform(
            queue,
            &MorphUniforms {
                operation: 1.0,
                radius: 0.5,
                texel: [1.0 / self.width as f32, 1.0 / self.height as f32],
            },
        );
        self.morphology.dispatch(
            device,
            encoder,
            &self.linear_sampler,
            &[&self.fbos.feather.view],
            &self.fbos.bilateral.view,
        );

        &self.fbos.bilateral.view
    }

    /// Three full horizontal+vertical iterations of the separable blur,
    /// at half resolution, the last two at 0.7x the configured radius.
    /// Result ends up in `blur[1]`.
    fn run_blur_chain(&self, encoder: &mut wgpu::CommandEncoder) {
        let device = self.ctx.device();
        let queue = self.ctx.queue();
        let half_w = (self.width / 2).max(1) as f32;
        let half_h = (self.height / 2).max(1) as f32;
        let radii = [self.params.blur_radius, self.params.blur_radius * 0.7, self.params.blur_radius * 0.7];

        let mut src = &self.camera_tex.view;
        for (i, radius) in radii.iter().enumerate() {
            self.blur.write_uniform(
                queue,
                &BlurUniforms {
                    direction: [1.0 / half_w, 0.0],
                    radius: *radius,
                    _pad: 0.0,
                },
            );
            self.blur.dispatch(device, encoder, &self.linear_sampler, &[src], &self.fbos.blur[0].view);

            self.blur.write_uniform(
                queue,
                &BlurUniforms {
                    direction: [0.0, 1.0 / half_h],
                    radius: *radius,
                    _pad: 0.0,
                },
            );
            self.blur.dispatch(
                device,
                encoder,
                &self.linear_sampler,
                &[&self.fbos.blur[0].view],
                &self.fbos.blur[1].view,
            );
            src = &self.fbos.blur[1].view;
            let _ = i;
        }
    }

    fn run_composite(&self, encoder: &mut wgpu::CommandEncoder, mask: &wgpu::TextureView, destination: &wgpu::TextureView) {
        let (crop_offset, crop_size) = self.crop_uniform_rect();
        self.composite.write_uniform(
            self.ctx.queue(),
            &CompositeUniforms {
                crop_offset,
                crop_size,
                texel: [1.0 / self.width as f32, 1.0 / self.height as f32],
                mode: self.params.mode_tag(),
                _pad0: 0.0,
                background_color: self.params.background_color,
                _pad1: 0.0,
            },
        );
        self.composite.dispatch(
            self.ctx.device(),
            encoder,
            &self.linear_sampler,
            &[&self.camera_tex.view, mask, &self.fbos.blur[1].view, self.background_image_view()],
            destination,
        );
    }

    fn run_light_wrap(&self, encoder: &mut wgpu::CommandEncoder, mask: &wgpu::TextureView, destination: &wgpu::TextureView) {
        let (crop_offset, crop_size) = self.crop_uniform_rect();
        self.light_wrap.write_uniform(
            self.ctx.queue(),
            &LightWrapUniforms {
                crop_offset,
                crop_size,
                mode: self.params.mode_tag(),
                wrap_strength: 0.06,
                _pad0: 0.0,
                _pad1: 0.0,
                background_color: self.params.background_color,
                _pad2: 0.0,
            },
        );
        self.light_wrap.dispatch(
            self.ctx.device(),
            encoder,
            &self.linear_sampler,
            &[&self.fbos.composite.view, mask, &self.fbos.blur[1].view, self.background_image_view()],
            destination,
        );
    }

    fn run_crop(&self, encoder: &mut wgpu::CommandEncoder, rect: CropRegion, destination: &wgpu::TextureView) {
        self.crop.write_uniform(
            self.ctx.queue(),
            &CropUniforms {
                offset: [rect.x, rect.y],
                size: [rect.w, rect.h],
            },
        );
        self.crop.dispatch(
            self.ctx.device(),
            encoder,
            &self.linear_sampler,
            &[&self.fbos.pre_crop.view],
            destination,
        );
    }

    /// Where composite (or light-wrap, if enabled) should write when it
    /// is the last stage before an optional crop pass.
    fn final_stage_destination(&self) -> &wgpu::TextureView {
        if self.crop_rect.is_some() {
            &self.fbos.pre_crop.view
        } else {
            &self.output.view
        }
    }

    fn finish_post_mask_chain(&mut self, encoder: &mut wgpu::CommandEncoder, mask: &wgpu::TextureView) -> Result<Surface> {
        if matches!(self.params.background_mode, BackgroundMode::Blur) {
            self.run_blur_chain(encoder);
        }

        let final_dest_is_composite = self.params.light_wrap;
        if final_dest_is_composite {
            self.run_composite(encoder, mask, &self.fbos.composite.view);
            let dest = self.final_stage_destination();
            self.run_light_wrap(encoder, mask, dest);
        } else {
            let dest = self.final_stage_destination();
            self.run_composite(encoder, mask, dest);
        }

        if let Some(rect) = self.crop_rect {
            self.run_crop(encoder, rect, &self.output.view);
        }

        Ok(Surface::new(self.output.texture.clone(), self.width, self.height))
    }

    /// `process`: fresh-mask path. Runs temporal smoothing, commits the
    /// result into the previous-mask ping-pong pair, then the shared
    /// upsample/composite chain.
    pub fn process(
        &mut self,
        frame: &dyn FrameSource,
        mask: &MaskBuffer,
        motion_map: Option<&MotionMap>,
    ) -> Result<Surface> {
        self.upload_frame(frame)?;
        self.upload_mask(mask)?;
        self.upload_motion(motion_map);

        let device = self.ctx.device().clone();
        let queue = self.ctx.queue().clone();
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("virtualbg.process"),
        });

        self.temporal.write_uniform(
            &queue,
            &TemporalUniforms {
                appear: self.params.appear_rate,
                disappear: self.params.disappear_rate,
                softness: TEMPORAL_SOFTNESS,
                has_motion_map: if motion_map.is_some() { 1.0 } else { 0.0 },
                first_frame: if self.first_frame { 1.0 } else { 0.0 },
                _pad0: 0.0,
                _pad1: 0.0,
                _pad2: 0.0,
            },
        );
        self.temporal.dispatch(
            &device,
            &mut encoder,
            &self.mask_sampler,
            &[&self.raw_mask_tex.view, &self.fbos.previous_mask_read().view, &self.motion_tex.view],
            &self.fbos.temporal.view,
        );

        encoder.copy_texture_to_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.fbos.temporal.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyTextureInfo {
                texture: &self.fbos.previous_mask_write().texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width: self.mask_width,
                height: self.mask_height,
                depth_or_array_layers: 1,
            },
        );

        let mask_src = self.run_morphology_if_enabled(&mut encoder, &self.fbos.temporal.view);
        let upsampled_mask = self.run_upsample_chain(&mut encoder, mask_src);
        let surface = self.finish_post_mask_chain(&mut encoder, upsampled_mask)?;

        queue.submit(std::iter::once(encoder.finish()));
        self.fbos.swap_previous_mask();
        self.first_frame = false;
        Ok(surface)
    }

    /// `processInterpolated`: no new mask upload; shifts the persisted
    /// previous mask toward the predicted position (if the shift is
    /// non-negligible) and runs the shared upsample/composite chain.
    /// Never touches the previous-mask ping-pong pair or morphology.
    pub fn process_interpolated(&mut self, frame: &dyn FrameSource, shift: (f32, f32)) -> Result<Surface> {
        self.upload_frame(frame)?;

        let device = self.ctx.device().clone();
        let queue = self.ctx.queue().clone();
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("virtualbg.process_interpolated"),
        });

        let shift_magnitude_exceeds_threshold = shift.0.abs() > 1e-4 || shift.1.abs() > 1e-4;
        let mask_src: &wgpu::TextureView = if shift_magnitude_exceeds_threshold {
            self.shift.write_uniform(
                &queue,
                &ShiftUniforms {
                    shift: [shift.0, shift.1],
                    _pad: [0.0, 0.0],
                },
            );
            self.shift.dispatch(
                &device,
                &mut encoder,
                &self.mask_sampler,
                &[&self.fbos.previous_mask_read().view],
                &self.fbos.shift.view,
            );
            &self.fbos.shift.view
        } else {
            &self.fbos.previous_mask_read().view
        };

        let upsampled_mask = self.run_upsample_chain(&mut encoder, mask_src);
        let surface = self.finish_post_mask_chain(&mut encoder, upsampled_mask)?;

        queue.submit(std::iter::once(encoder.finish()));
        Ok(surface)
    }

    pub fn destroy(self) {
        tracing::info!("GPU pipeline destroyed");
    }
}
