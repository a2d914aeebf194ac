//! `repr(C)` uniform structs, one per shader in [`crate::gpu::shaders`].
//! Field order and size must byte-match the corresponding WGSL `struct`
//! exactly (WGSL alignment rules, not Rust's) since these are copied
//! verbatim into a uniform buffer with `Queue::write_buffer`.

use bytemuck::{Pod, Zeroable};

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct TemporalUniforms {
    pub appear: f32,
    pub disappear: f32,
    pub softness: f32,
    pub has_motion_map: f32,
    pub first_frame: f32,
    pub _pad0: f32,
    pub _pad1: f32,
    pub _pad2: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct MorphUniforms {
    pub operation: f32,
    pub radius: f32,
    pub texel: [f32; 2],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct ShiftUniforms {
    pub shift: [f32; 2],
    pub _pad: [f32; 2],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct BilateralUniforms {
    pub range_sigma: f32,
    pub _pad0: f32,
    pub mask_texel: [f32; 2],
    pub guide_texel: [f32; 2],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct FeatherUniforms {
    pub radius: f32,
    pub _pad0: f32,
    pub _pad1: f32,
    pub _pad2: f32,
    pub texel: [f32; 2],
    pub _pad3: [f32; 2],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct BlurUniforms {
    pub direction: [f32; 2],
    pub radius: f32,
    pub _pad: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct CompositeUniforms {
    pub crop_offset: [f32; 2],
    pub crop_size: [f32; 2],
    pub texel: [f32; 2],
    pub mode: f32,
    pub _pad0: f32,
    pub background_color: [f32; 3],
    pub _pad1: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct LightWrapUniforms {
    pub crop_offset: [f32; 2],
    pub crop_size: [f32; 2],
    pub mode: f32,
    pub wrap_strength: f32,
    pub _pad0: f32,
    pub _pad1: f32,
    pub background_color: [f32; 3],
    pub _pad2: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct CropUniforms {
    pub offset: [f32; 2],
    pub size: [f32; 2],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct ColorMatchUniforms {
    pub fg_mean: [f32; 3],
    pub strength: f32,
    pub bg_mean: [f32; 3],
    pub _pad0: f32,
}

pub const COMPOSITE_MODE_BLUR: f32 = 0.0;
pub const COMPOSITE_MODE_IMAGE: f32 = 1.0;
pub const COMPOSITE_MODE_COLOR: f32 = 2.0;
