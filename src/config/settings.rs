//! Reader settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files. Missing keys fall back
//! to their defaults, so a settings file only needs the values it changes.
//!
//! ```toml
//! [threshold]
//! silence_threshold = 4000
//! auto_threshold_pct = 0   # fixed threshold
//!
//! [[encodings]]
//! name = "ABA"
//! char_length = 5
//! start_sentinel = "11010"
//! end_sentinel = "11111"
//! ```

use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::AppPaths;
use crate::audio::SilenceThreshold;
use crate::decode::{builtin_encodings, DemodConfig, EncodingDescriptor, EncodingError, TrackParser};

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Settings that cannot be used to decode a swipe.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("silence threshold must be greater than zero (got {0})")]
    NonPositiveThreshold(i64),

    #[error("silence threshold {0} exceeds the 16-bit sample range")]
    ThresholdRange(i64),

    #[error("auto-threshold percentage must be within 1..=100 (got {0})")]
    AutoPercent(i64),

    #[error("frequency threshold must be within 1..=100 percent (got {0})")]
    FrequencyThreshold(u32),

    #[error("no track encodings configured")]
    NoEncodings,

    #[error(transparent)]
    Encoding(#[from] EncodingError),
}

// ---------------------------------------------------------------------------
// CaptureConfig
// ---------------------------------------------------------------------------

/// Sound-card selection and swipe wait.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Input device number as listed by `--list-devices`; `None` means the
    /// host default.
    pub device: Option<usize>,
    /// Give up waiting for a swipe after this many seconds; `None` waits
    /// forever.
    pub swipe_timeout_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// ThresholdConfig
// ---------------------------------------------------------------------------

/// Silence threshold selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Magnitude a sample must exceed to count as signal. With auto
    /// thresholding on, only used to find the swipe.
    pub silence_threshold: i64,
    /// Peak-detection level as a percentage of the swipe's peak magnitude.
    /// `0` disables auto thresholding.
    pub auto_threshold_pct: i64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            silence_threshold: 5_000,
            auto_threshold_pct: 30,
        }
    }
}

impl ThresholdConfig {
    /// Fixed threshold at `level`; auto thresholding off.
    pub fn fixed(level: i64) -> Self {
        Self {
            silence_threshold: level,
            auto_threshold_pct: 0,
        }
    }

    pub fn is_auto(&self) -> bool {
        self.auto_threshold_pct != 0
    }

    /// Checked threshold mode.
    pub fn mode(&self) -> Result<SilenceThreshold, ConfigError> {
        if self.is_auto() {
            SilenceThreshold::auto(self.silence_threshold, self.auto_threshold_pct)
        } else {
            SilenceThreshold::fixed(self.silence_threshold)
        }
    }
}

// ---------------------------------------------------------------------------
// SegmentConfig
// ---------------------------------------------------------------------------

/// Swipe boundary detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    /// Continuous silence, in milliseconds, that ends a swipe.
    pub end_length_ms: u32,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self { end_length_ms: 200 }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level reader configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use magstripe_reader::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
/// config.validate().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub capture: CaptureConfig,
    pub threshold: ThresholdConfig,
    pub segment: SegmentConfig,
    pub demod: DemodConfig,
    /// Track formats tried on every swipe, in order.
    pub encodings: Vec<EncodingDescriptor>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            threshold: ThresholdConfig::default(),
            segment: SegmentConfig::default(),
            demod: DemodConfig::default(),
            encodings: builtin_encodings(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check every value the decoder depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.threshold.mode()?;
        if !(1..=100).contains(&self.demod.freq_threshold_pct) {
            return Err(ConfigError::FrequencyThreshold(
                self.demod.freq_threshold_pct,
            ));
        }
        self.track_parsers()?;
        Ok(())
    }

    /// One parser per configured encoding.
    pub fn track_parsers(&self) -> Result<Vec<TrackParser>, ConfigError> {
        if self.encodings.is_empty() {
            return Err(ConfigError::NoEncodings);
        }
        self.encodings
            .iter()
            .cloned()
            .map(|desc| TrackParser::new(desc).map_err(ConfigError::from))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
