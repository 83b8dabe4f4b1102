//! Signal level helpers: rectified peaks, silence thresholds and the
//! diagnostic peak-level meter.
//!
//! | Item | Purpose |
//! |------|---------|
//! | [`peak_magnitude`] | Largest absolute sample value in a block |
//! | [`auto_threshold`] | `floor(percent * peak / 100)` |
//! | [`SilenceThreshold`] | Fixed or auto-derived threshold mode |
//! | [`PeakLevelMeter`] | Running maximum over live capture (`--max-level`) |
//!
//! # Example
//!
//! ```rust
//! use magstripe_reader::audio::{auto_threshold, peak_magnitude};
//!
//! assert_eq!(peak_magnitude(&[-120, 40, 99]), 120);
//! assert_eq!(auto_threshold(10_000, 30), 3_000);
//! ```

use std::time::Instant;

use crate::audio::buffer::{SampleBuffer, WaitError};
use crate::config::ConfigError;

/// Samples requested per read while metering.
const METER_BLOCK: usize = 4_096;

// ---------------------------------------------------------------------------
// Free functions
// ---------------------------------------------------------------------------

/// Absolute value of one sample. `i16::MIN` maps to `32768`.
#[inline]
pub fn magnitude(sample: i16) -> u16 {
    sample.unsigned_abs()
}

/// Largest absolute sample value in `samples` (`0` when empty).
pub fn peak_magnitude(samples: &[i16]) -> u16 {
    samples.iter().map(|&s| magnitude(s)).max().unwrap_or(0)
}

/// Threshold derived from an observed `peak` as `floor(percent * peak / 100)`.
///
/// Never returns `0`: a window quiet enough to round down to zero still gets
/// a threshold of `1`.
pub fn auto_threshold(peak: u16, percent: u8) -> u16 {
    let derived = u32::from(percent) * u32::from(peak) / 100;
    derived.clamp(1, u32::from(u16::MAX)) as u16
}

// ---------------------------------------------------------------------------
// SilenceThreshold
// ---------------------------------------------------------------------------

/// How the silence threshold is chosen.
///
/// `Fixed` uses one value for both swipe segmentation and peak detection.
/// `Auto` segments with `initial` and then derives the peak-detection level
/// from the swipe's own peak magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SilenceThreshold {
    Fixed(u16),
    Auto { initial: u16, percent: u8 },
}

impl SilenceThreshold {
    /// Build a fixed threshold from a user-supplied value.
    ///
    /// # Errors
    ///
    /// [`ConfigError::NonPositiveThreshold`] for `value <= 0`,
    /// [`ConfigError::ThresholdRange`] above `u16::MAX`.
    pub fn fixed(value: i64) -> Result<Self, ConfigError> {
        Ok(Self::Fixed(checked_level(value)?))
    }

    /// Build an automatic threshold.
    ///
    /// # Errors
    ///
    /// As [`fixed`](Self::fixed) for `initial`, plus
    /// [`ConfigError::AutoPercent`] when `percent` is outside `1..=100`.
    pub fn auto(initial: i64, percent: i64) -> Result<Self, ConfigError> {
        let initial = checked_level(initial)?;
        if !(1..=100).contains(&percent) {
            return Err(ConfigError::AutoPercent(percent));
        }
        Ok(Self::Auto {
            initial,
            percent: percent as u8,
        })
    }

    /// Level used to find the swipe boundaries.
    pub fn segmentation_level(&self) -> u16 {
        match *self {
            Self::Fixed(level) => level,
            Self::Auto { initial, .. } => initial,
        }
    }

    /// Level used for peak detection inside a window whose peak is
    /// `window_peak`.
    pub fn demodulation_level(&self, window_peak: u16) -> u16 {
        match *self {
            Self::Fixed(level) => level,
            Self::Auto { percent, .. } => auto_threshold(window_peak, percent),
        }
    }

    /// Re-check the invariants; values built through the constructors
    /// always pass.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match *self {
            Self::Fixed(0) | Self::Auto { initial: 0, .. } => {
                Err(ConfigError::NonPositiveThreshold(0))
            }
            Self::Auto { percent, .. } if !(1..=100).contains(&percent) => {
                Err(ConfigError::AutoPercent(i64::from(percent)))
            }
            _ => Ok(()),
        }
    }
}

fn checked_level(value: i64) -> Result<u16, ConfigError> {
    if value <= 0 {
        return Err(ConfigError::NonPositiveThreshold(value));
    }
    u16::try_from(value).map_err(|_| ConfigError::ThresholdRange(value))
}

// ---------------------------------------------------------------------------
// PeakLevelMeter
// ---------------------------------------------------------------------------

/// Running maximum over a live [`SampleBuffer`], used to pick a threshold by
/// hand before swiping.
#[derive(Debug, Default)]
pub struct PeakLevelMeter {
    cursor: usize,
    max: u16,
}

impl PeakLevelMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest magnitude seen so far.
    pub fn max(&self) -> u16 {
        self.max
    }

    /// Fold a block into the running maximum; returns the new maximum if it
    /// increased.
    pub fn observe(&mut self, block: &[i16]) -> Option<u16> {
        self.cursor += block.len();
        let peak = peak_magnitude(block);
        if peak > self.max {
            self.max = peak;
            Some(peak)
        } else {
            None
        }
    }

    /// Scan `source` until `deadline` passes or the source closes, calling
    /// `on_new_peak` every time the maximum increases. Returns the final
    /// maximum.
    pub fn run<F>(
        &mut self,
        source: &SampleBuffer,
        deadline: Option<Instant>,
        mut on_new_peak: F,
    ) -> u16
    where
        F: FnMut(u16),
    {
        loop {
            match source.wait_for_len(self.cursor + 1, deadline) {
                Ok(len) => {
                    let end = len.min(self.cursor + METER_BLOCK);
                    let block = source.read(self.cursor..end);
                    if let Some(peak) = self.observe(&block) {
                        log::debug!("level: new peak {peak}");
                        on_new_peak(peak);
                    }
                }
                Err(WaitError::TimedOut) | Err(WaitError::Closed) => return self.max,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magnitude_discards_sign() {
        assert_eq!(magnitude(-300), 300);
        assert_eq!(magnitude(300), 300);
        assert_eq!(magnitude(i16::MIN), 32_768);
    }

    #[test]
    fn peak_of_empty_is_zero() {
        assert_eq!(peak_magnitude(&[]), 0);
    }

    #[test]
    fn auto_threshold_thirty_percent() {
        assert_eq!(auto_threshold(10_000, 30), 3_000);
    }

    #[test]
    fn auto_threshold_floors() {
        assert_eq!(auto_threshold(999, 30), 299);
    }

    #[test]
    fn auto_threshold_never_zero() {
        assert_eq!(auto_threshold(2, 30), 1);
        assert_eq!(auto_threshold(0, 100), 1);
    }

    #[test]
    fn fixed_rejects_non_positive() {
        assert_eq!(
            SilenceThreshold::fixed(0),
            Err(ConfigError::NonPositiveThreshold(0))
        );
        assert_eq!(
            SilenceThreshold::fixed(-5),
            Err(ConfigError::NonPositiveThreshold(-5))
        );
    }

    #[test]
    fn fixed_rejects_out_of_range() {
        assert_eq!(
            SilenceThreshold::fixed(70_000),
            Err(ConfigError::ThresholdRange(70_000))
        );
    }

    #[test]
    fn auto_rejects_bad_percent() {
        assert_eq!(
            SilenceThreshold::auto(5_000, 0),
            Err(ConfigError::AutoPercent(0))
        );
        assert_eq!(
            SilenceThreshold::auto(5_000, 101),
            Err(ConfigError::AutoPercent(101))
        );
    }

    #[test]
    fn levels_per_mode() {
        let fixed = SilenceThreshold::fixed(1_200).unwrap();
        assert_eq!(fixed.segmentation_level(), 1_200);
        assert_eq!(fixed.demodulation_level(20_000), 1_200);

        let auto = SilenceThreshold::auto(5_000, 30).unwrap();
        assert_eq!(auto.segmentation_level(), 5_000);
        assert_eq!(auto.demodulation_level(10_000), 3_000);
        assert!(auto.validate().is_ok());
    }

    #[test]
    fn meter_reports_only_increases() {
        let source = SampleBuffer::from_samples(8_000, vec![10, -50, 20, 40, -80, 5]);
        let mut seen = Vec::new();
        let max = PeakLevelMeter::new().run(&source, None, |p| seen.push(p));
        assert_eq!(max, 80);
        assert_eq!(seen, vec![80]);
    }

    #[test]
    fn meter_observe_tracks_running_max() {
        let mut meter = PeakLevelMeter::new();
        assert_eq!(meter.observe(&[3, -7]), Some(7));
        assert_eq!(meter.observe(&[5]), None);
        assert_eq!(meter.observe(&[-9]), Some(9));
        assert_eq!(meter.max(), 9);
    }
}
