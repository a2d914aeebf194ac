//! Quality tier table: ordered ultra..minimal, immutable, indexed by the
//! adaptive controller and explicit overrides.

/// One row of the fixed quality-tier table. Every field is fixed at
/// construction; tiers are never mutated, only swapped by index.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QualityTier {
    pub mask_width: u32,
    pub mask_height: u32,
    pub model_rate_hz: f32,
    pub appear_rate: f32,
    pub disappear_rate: f32,
    pub feather_radius: f32,
    pub range_sigma: f32,
    pub blur_radius: f32,
    pub light_wrap: bool,
    pub morphology: bool,
}

/// Ultra (index 0) down to minimal (index 4), highest to lowest cost.
pub const TIER_TABLE: [QualityTier; 5] = [
    QualityTier {
        mask_width: 256,
        mask_height: 256,
        model_rate_hz: 30.0,
        appear_rate: 0.75,
        disappear_rate: 0.35,
        feather_radius: 3.0,
        range_sigma: 0.12,
        blur_radius: 24.0,
        light_wrap: true,
        morphology: true,
    },
    QualityTier {
        mask_width: 224,
        mask_height: 224,
        model_rate_hz: 24.0,
        appear_rate: 0.72,
        disappear_rate: 0.35,
        feather_radius: 2.5,
        range_sigma: 0.14,
        blur_radius: 18.0,
        light_wrap: true,
        morphology: true,
    },
    QualityTier {
        mask_width: 192,
        mask_height: 192,
        model_rate_hz: 18.0,
        appear_rate: 0.7,
        disappear_rate: 0.3,
        feather_radius: 2.0,
        range_sigma: 0.16,
        blur_radius: 12.0,
        light_wrap: false,
        morphology: true,
    },
    QualityTier {
        mask_width: 160,
        mask_height: 160,
        model_rate_hz: 12.0,
        appear_rate: 0.65,
        disappear_rate: 0.28,
        feather_radius: 1.5,
        range_sigma: 0.18,
        blur_radius: 8.0,
        light_wrap: false,
        morphology: false,
    },
    QualityTier {
        mask_width: 128,
        mask_height: 128,
        model_rate_hz: 8.0,
        appear_rate: 0.6,
        disappear_rate: 0.25,
        feather_radius: 1.0,
        range_sigma: 0.2,
        blur_radius: 4.0,
        light_wrap: false,
        morphology: false,
    },
];

pub const TIER_COUNT: usize = TIER_TABLE.len();

/// Human label for diagnostics (`qualityLabel`).
pub fn tier_label(index: usize) -> &'static str {
    match index {
        0 => "ultra",
        1 => "high",
        2 => "medium",
        3 => "low",
        4 => "minimal",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_ordered_highest_cost_first() {
        for pair in TIER_TABLE.windows(2) {
            assert!(pair[0].mask_width >= pair[1].mask_width);
            assert!(pair[0].model_rate_hz >= pair[1].model_rate_hz);
        }
    }

    #[test]
    fn labels_cover_every_index() {
        for i in 0..TIER_COUNT {
            assert_ne!(tier_label(i), "unknown");
        }
    }
}
