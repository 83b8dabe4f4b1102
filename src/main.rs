//! `mcu`: magnetic stripe card utility.
//!
//! # Startup sequence
//!
//! 1. Parse the command line and initialise logging.
//! 2. `--list-devices`: print the input devices and exit.
//! 3. Load [`AppConfig`] (defaults on first run) and apply flag overrides.
//!    `--write-config` saves the result and exits.
//! 4. Open the capture device and start streaming into a [`SampleBuffer`].
//! 5. `--max-level`: report the running peak level until the timeout.
//!    Otherwise wait for one swipe, decode it and print every track.
//!
//! Exit status is 0 when a swipe was decoded (whether or not any track
//! passed its checks) and 1 for device, configuration or detection errors.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use magstripe_reader::{
    audio::{AudioCapture, PeakLevelMeter, SampleBuffer},
    config::{AppConfig, AppPaths, ThresholdConfig},
    pipeline::PipelineOrchestrator,
};

#[derive(Parser, Debug)]
#[command(name = "mcu")]
#[command(about = "Magnetic stripe Card Utility: decode cards swiped through a sound-card read head")]
#[command(version)]
struct Cli {
    /// Peak-detection threshold as a percentage of the swipe's peak level
    #[arg(short = 'a', long = "auto-thres", value_name = "PCT")]
    auto_thres: Option<i64>,

    /// Input device number (see --list-devices); defaults to the system's default input
    #[arg(short, long, value_name = "N")]
    device: Option<usize>,

    /// List input devices and exit
    #[arg(short, long)]
    list_devices: bool,

    /// Report the maximum input level instead of decoding (use to pick a threshold)
    #[arg(short, long)]
    max_level: bool,

    /// Only log warnings and errors
    #[arg(short, long)]
    silent: bool,

    /// Fixed silence threshold; disables auto thresholding
    #[arg(short, long, value_name = "N", allow_negative_numbers = true)]
    threshold: Option<i64>,

    /// Give up after this many seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Settings file (default: platform config dir)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Write the effective settings (file plus flags) to the settings file and exit
    #[arg(long)]
    write_config: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.silent { "warn" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    log::info!("mcu {}", env!("CARGO_PKG_VERSION"));

    if cli.list_devices {
        let devices = AudioCapture::list_devices().context("listing input devices")?;
        if devices.is_empty() {
            bail!("no input devices found");
        }
        for (index, name) in devices.iter().enumerate() {
            println!("{index}: {name}");
        }
        return Ok(());
    }

    let config = load_config(cli)?;
    config.validate().context("invalid settings")?;

    if cli.write_config {
        let path = write_config(cli, &config)?;
        println!("Settings written to {}", path.display());
        return Ok(());
    }

    let capture = AudioCapture::open(config.capture.device).context("opening input device")?;
    log::info!(
        "Using input device '{}' at {} Hz",
        capture.device_name(),
        capture.sample_rate()
    );

    let buffer = Arc::new(SampleBuffer::new(capture.sample_rate()));
    let _stream = capture
        .start(Arc::clone(&buffer))
        .context("starting audio capture")?;

    let deadline = config
        .capture
        .swipe_timeout_secs
        .map(|secs| Instant::now() + Duration::from_secs(secs));

    if cli.max_level {
        log::info!("Monitoring input level; press Ctrl-C to stop");
        let max =
            PeakLevelMeter::new().run(&buffer, deadline, |peak| println!("Max level: {peak}"));
        println!("Max level: {max}");
        return Ok(());
    }

    let mut orchestrator = PipelineOrchestrator::new(Arc::clone(&buffer), &config)?;
    log::info!("Ready, swipe a card");
    let report = orchestrator.run_once(deadline)?;

    print!("{report}");
    if buffer.overflow_count() > 0 {
        log::warn!(
            "{} capture blocks were dropped; the swipe may be corrupted",
            buffer.overflow_count()
        );
    }
    if !report.has_success() {
        log::warn!("No track passed its checks");
    }
    Ok(())
}

/// Settings file values with command-line overrides applied.
///
/// The default settings file falls back to defaults when unreadable; an
/// explicit `--config` path must load.
fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => AppConfig::load().unwrap_or_else(|e| {
            log::warn!("Failed to load config ({e}); using defaults");
            AppConfig::default()
        }),
    };

    if let Some(pct) = cli.auto_thres {
        config.threshold.auto_threshold_pct = pct;
    }
    if let Some(level) = cli.threshold {
        config.threshold = ThresholdConfig::fixed(level);
    }
    if cli.device.is_some() {
        config.capture.device = cli.device;
    }
    if cli.timeout.is_some() {
        config.capture.swipe_timeout_secs = cli.timeout;
    }
    Ok(config)
}

/// Persist `config` to `--config` when given, otherwise to the default
/// settings file. Returns the path written.
fn write_config(cli: &Cli, config: &AppConfig) -> Result<PathBuf> {
    match &cli.config {
        Some(path) => {
            config
                .save_to(path)
                .with_context(|| format!("writing settings to {}", path.display()))?;
            Ok(path.clone())
        }
        None => {
            config.save().context("writing settings")?;
            Ok(AppPaths::new().settings_file)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tempfile::tempdir;

    fn cli(args: &[&str]) -> Cli {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("missing.toml");
        let mut full = vec!["mcu", "--config", path.to_str().unwrap()];
        full.extend_from_slice(args);
        Cli::parse_from(full)
    }

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults_without_flags() {
        let config = load_config(&cli(&[])).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn threshold_flag_disables_auto() {
        let config = load_config(&cli(&["-t", "1200", "-a", "40"])).unwrap();
        assert_eq!(config.threshold, ThresholdConfig::fixed(1_200));
    }

    #[test]
    fn auto_flag_sets_percentage() {
        let config = load_config(&cli(&["--auto-thres", "45"])).unwrap();
        assert_eq!(config.threshold.auto_threshold_pct, 45);
        assert_eq!(config.threshold.silence_threshold, 5_000);
    }

    #[test]
    fn device_and_timeout_flags() {
        let config = load_config(&cli(&["-d", "3", "--timeout", "10"])).unwrap();
        assert_eq!(config.capture.device, Some(3));
        assert_eq!(config.capture.swipe_timeout_secs, Some(10));
    }

    #[test]
    fn negative_threshold_parses_then_fails_validation() {
        let config = load_config(&cli(&["-t", "-5"])).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn write_config_saves_flag_overrides() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");
        let cli = Cli::parse_from([
            "mcu",
            "--config",
            path.to_str().unwrap(),
            "-t",
            "2500",
            "--write-config",
        ]);
        assert!(cli.write_config);

        let config = load_config(&cli).unwrap();
        assert_eq!(write_config(&cli, &config).unwrap(), path);

        let reloaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(reloaded.threshold, ThresholdConfig::fixed(2_500));
        assert_eq!(reloaded, config);
    }

    #[test]
    fn mode_flags() {
        let parsed = cli(&["-l", "-s"]);
        assert!(parsed.list_devices);
        assert!(parsed.silent);
        assert!(!parsed.max_level);
        assert!(cli(&["-m"]).max_level);
    }
}
