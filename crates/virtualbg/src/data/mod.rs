//! Data model shared across components: frames, masks, motion maps,
//! crop regions, centroids and the quality-tier table.

pub mod centroid;
pub mod frame;
pub mod mask;
pub mod motion;
pub mod roi;
pub mod tier;

pub use centroid::{Centroid, MotionVector};
pub use frame::{FrameSource, Surface};
pub use mask::MaskBuffer;
pub use motion::MotionMap;
pub use roi::CropRegion;
pub use tier::{QualityTier, TIER_TABLE};
