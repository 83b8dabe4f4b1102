//! Configuration for the reader.
//!
//! Provides `AppConfig` (top-level settings), sub-configs for capture,
//! thresholding and segmentation, `AppPaths` for the platform config
//! directory, and TOML persistence via `AppConfig::load` / `AppConfig::save`.
//! Command-line flags are applied on top of the loaded values in `main`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{AppConfig, CaptureConfig, ConfigError, SegmentConfig, ThresholdConfig};
