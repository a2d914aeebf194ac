//! Construction-time configuration surface.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Pure-data config types that round-trip through JSON without loss,
/// following the same contract the host's other processor configs use.
pub trait Config: Default + Serialize + DeserializeOwned + PartialEq {
    fn validate_round_trip(&self) -> Result<(), ConfigValidationError> {
        let json = serde_json::to_value(self)
            .map_err(|e| ConfigValidationError::SerializationFailed(e.to_string()))?;
        let round_tripped: Self = serde_json::from_value(json)
            .map_err(|e| ConfigValidationError::DeserializationFailed(e.to_string()))?;
        if self != &round_tripped {
            return Err(ConfigValidationError::RoundTripMismatch);
        }
        Ok(())
    }
}

impl<T> Config for T where T: Default + Serialize + DeserializeOwned + PartialEq {}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValidationError {
    SerializationFailed(String),
    DeserializationFailed(String),
    RoundTripMismatch,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationFailed(e) => write!(f, "config serialization failed: {e}"),
            Self::DeserializationFailed(e) => write!(f, "config deserialization failed: {e}"),
            Self::RoundTripMismatch => {
                write!(f, "config round-trip mismatch: a field was lost or changed")
            }
        }
    }
}

impl std::error::Error for ConfigValidationError {}

/// 24-bit RGB color, used when `mode = color`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// Opaque handle to a host-owned background image, re-uploaded by the
/// pipeline whenever it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundImageHandle(pub String);

/// Compositor background selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum BackgroundMode {
    /// Bypasses processing entirely; `processFrame` returns `None`.
    None,
    Blur,
    Image { handle: BackgroundImageHandle },
    Color { rgb: Rgb },
}

impl Default for BackgroundMode {
    fn default() -> Self {
        BackgroundMode::Blur
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    Medium,
    High,
    Ultra,
}

impl Default for Quality {
    fn default() -> Self {
        Quality::High
    }
}

impl Quality {
    /// Seed tier index into [`crate::data::tier::TIER_TABLE`].
    pub fn tier_index(self) -> usize {
        match self {
            Quality::Ultra => 0,
            Quality::High => 1,
            Quality::Medium => 2,
            Quality::Low => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoFrameMode {
    Body,
    Face,
}

impl Default for AutoFrameMode {
    fn default() -> Self {
        AutoFrameMode::Body
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoFrameOptions {
    pub enabled: bool,
    pub mode: AutoFrameMode,
    pub headroom: f32,
    pub padding: f32,
    pub smoothing: f32,
    pub max_zoom: f32,
    pub min_zoom: f32,
    pub continuous: bool,
    pub dead_zone: f32,
}

impl Default for AutoFrameOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: AutoFrameMode::Body,
            headroom: 0.1,
            padding: 0.08,
            smoothing: 0.75,
            max_zoom: 2.5,
            min_zoom: 1.0,
            continuous: true,
            dead_zone: 0.03,
        }
    }
}

/// Overrides of the adaptive controller's built-in constants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    pub target_ms: f32,
    pub critical_ms: f32,
    pub window_size: usize,
    pub downgrade_threshold: u32,
    pub upgrade_threshold: u32,
    pub cooldown_ms: i64,
    pub critical_in_a_row_limit: u32,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            target_ms: 16.0,
            critical_ms: 40.0,
            window_size: 30,
            downgrade_threshold: 2,
            upgrade_threshold: 5,
            cooldown_ms: 1000,
            critical_in_a_row_limit: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticsLevel {
    Off,
    Summary,
}

impl Default for DiagnosticsLevel {
    fn default() -> Self {
        DiagnosticsLevel::Off
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsOptions {
    pub level: DiagnosticsLevel,
    pub interval_ms: u32,
    pub include_image: bool,
    pub client_id: Option<String>,
}

impl Default for DiagnosticsOptions {
    fn default() -> Self {
        Self {
            level: DiagnosticsLevel::Off,
            interval_ms: 5_000,
            include_image: false,
            client_id: None,
        }
    }
}

/// Construction-time options. `onDiagnostic` is not part of this struct
/// since callbacks aren't serde-representable; it is supplied
/// separately to [`crate::diagnostics::Diagnostics`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    pub background_mode: BackgroundMode,
    pub blur_radius: f32,
    pub model_fps: f32,
    pub output_fps: f32,
    pub quality: Quality,
    pub adaptive: bool,
    pub adaptive_config: AdaptiveConfig,
    pub use_worker: bool,
    pub auto_frame: AutoFrameOptions,
    pub background_fixed: bool,
    pub diagnostics: DiagnosticsOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            background_mode: BackgroundMode::default(),
            blur_radius: 12.0,
            model_fps: 0.0,
            output_fps: 30.0,
            quality: Quality::default(),
            adaptive: true,
            adaptive_config: AdaptiveConfig::default(),
            use_worker: true,
            auto_frame: AutoFrameOptions::default(),
            background_fixed: false,
            diagnostics: DiagnosticsOptions::default(),
        }
    }
}

impl Options {
    /// Clamp `blur_radius` into its documented range.
    pub fn clamped_blur_radius(&self) -> f32 {
        self.blur_radius.clamp(4.0, 24.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_round_trip() {
        Options::default().validate_round_trip().unwrap();
    }

    #[test]
    fn populated_options_round_trip() {
        let opts = Options {
            background_mode: BackgroundMode::Image {
                handle: BackgroundImageHandle("bg-1".into()),
            },
            blur_radius: 20.0,
            quality: Quality::Low,
            auto_frame: AutoFrameOptions {
                enabled: true,
                ..AutoFrameOptions::default()
            },
            diagnostics: DiagnosticsOptions {
                level: DiagnosticsLevel::Summary,
                client_id: Some("abc".into()),
                ..DiagnosticsOptions::default()
            },
            ..Options::default()
        };
        opts.validate_round_trip().unwrap();
    }

    #[test]
    fn blur_radius_clamped_to_documented_range() {
        let mut opts = Options::default();
        opts.blur_radius = 1.0;
        assert_eq!(opts.clamped_blur_radius(), 4.0);
        opts.blur_radius = 99.0;
        assert_eq!(opts.clamped_blur_radius(), 24.0);
    }
}
