//! WGSL fragment programs for each pipeline stage, plus the shared
//! full-screen-quad vertex stage. Source lives in sibling `.wgsl` files
//! so the uniform layouts and formulas can be checked against spec line
//! by line; this module only exposes them as linkable strings.

pub const QUAD_VERTEX: &str = include_str!("quad.wgsl");
pub const TEMPORAL: &str = include_str!("temporal.wgsl");
pub const MORPHOLOGY: &str = include_str!("morphology.wgsl");
pub const SHIFT: &str = include_str!("shift.wgsl");
pub const BILATERAL: &str = include_str!("bilateral.wgsl");
pub const FEATHER: &str = include_str!("feather.wgsl");
pub const BLUR: &str = include_str!("blur.wgsl");
pub const COMPOSITE: &str = include_str!("composite.wgsl");
pub const LIGHT_WRAP: &str = include_str!("light_wrap.wgsl");
pub const CROP: &str = include_str!("crop.wgsl");
pub const COLOR_MATCH: &str = include_str!("color_match.wgsl");
