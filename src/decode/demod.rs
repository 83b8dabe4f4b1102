//! Self-clocking biphase (Aiken / F2F) demodulation.
//!
//! A `0` bit cell holds one flux transition, a `1` bit cell holds two, each
//! half as wide. The head signal shows a peak at every transition, so the
//! decoder works on the gaps between successive peaks:
//!
//! ```text
//!   0        0        1        0
//! |────────|────────|────|────|────────|
//!   full     full    half half  full
//! ```
//!
//! There is no fixed clock. The width of a `0` cell is re-estimated after
//! every decoded bit, which lets the decoder follow a hand swipe that speeds
//! up or slows down.
//!
//! ## Algorithm
//!
//! 1. Rectify the window.
//! 2. For each run of samples above the threshold take the index of its
//!    maximum as one peak; the gaps between consecutive peaks are the
//!    *peak intervals*.
//! 3. Skip `preamble_intervals` lead-in gaps and seed `zero_width` with the
//!    next one. Then, per following interval, with `tol = freq_threshold_pct% · zero_width`:
//!    - this and the next interval both within `tol / 2` of `zero_width / 2`
//!      → `1`, `zero_width = 2 · interval`, consume both;
//!    - else within `tol` of `zero_width` → `0`, `zero_width = interval`;
//!    - else no bit; the interval is recorded as a [`Desync`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audio::level::magnitude;
use crate::decode::bits::BitString;

// ---------------------------------------------------------------------------
// DemodConfig
// ---------------------------------------------------------------------------

/// Tuning for the peak-interval decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemodConfig {
    /// Accepted deviation from the expected cell width, in percent of
    /// `zero_width` (`1..=100`).
    pub freq_threshold_pct: u32,
    /// Lead-in peak intervals skipped before `zero_width` is seeded.
    pub preamble_intervals: usize,
}

impl Default for DemodConfig {
    fn default() -> Self {
        Self {
            freq_threshold_pct: 60,
            preamble_intervals: 2,
        }
    }
}

// ---------------------------------------------------------------------------
// DemodError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DemodError {
    /// Not enough peaks above the threshold to seed the decoder.
    #[error("no bits detected ({intervals} peak intervals found)")]
    NoBitsDetected { intervals: usize },

    #[error("frequency threshold must be within 1..=100 percent (got {0})")]
    InvalidFrequencyThreshold(u32),
}

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

/// An interval that matched neither the half nor the full cell width.
///
/// No bit is emitted for it, so everything after it may be shifted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Desync {
    /// Position in the peak-interval sequence.
    pub interval_index: usize,
    pub interval: usize,
    /// Cell width expected at that point.
    pub zero_width: usize,
}

/// Bits recovered from one swipe window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Demodulation {
    pub bits: BitString,
    pub desyncs: Vec<Desync>,
    /// Number of peak intervals the window produced.
    pub intervals: usize,
}

// ---------------------------------------------------------------------------
// Peak extraction
// ---------------------------------------------------------------------------

/// Absolute value of every sample.
pub fn rectify(samples: &[i16]) -> Vec<u16> {
    samples.iter().map(|&s| magnitude(s)).collect()
}

/// Index of the maximum of every run of samples strictly above `threshold`.
///
/// Ties inside a run resolve to the earliest sample.
pub fn peak_positions(rectified: &[u16], threshold: u16) -> Vec<usize> {
    let mut peaks = Vec::new();
    let mut run_peak: Option<(usize, u16)> = None;

    for (i, &m) in rectified.iter().enumerate() {
        if m > threshold {
            match run_peak {
                Some((_, best)) if m <= best => {}
                _ => run_peak = Some((i, m)),
            }
        } else if let Some((at, _)) = run_peak.take() {
            peaks.push(at);
        }
    }
    if let Some((at, _)) = run_peak {
        peaks.push(at);
    }
    peaks
}

/// Sample distances between consecutive peaks.
pub fn peak_intervals(rectified: &[u16], threshold: u16) -> Vec<usize> {
    peak_positions(rectified, threshold)
        .windows(2)
        .map(|pair| pair[1] - pair[0])
        .collect()
}

// ---------------------------------------------------------------------------
// Demodulator
// ---------------------------------------------------------------------------

/// Adaptive peak-interval decoder.
///
/// ```rust
/// use magstripe_reader::decode::{DemodConfig, Demodulator};
///
/// let demod = Demodulator::new(DemodConfig::default()).unwrap();
/// // two lead-in gaps, the 40-sample seed, then 0, 0, 1 (two halves), 0
/// let out = demod.decode_intervals(&[90, 13, 40, 40, 40, 20, 20, 40]).unwrap();
/// assert_eq!(out.bits.to_string(), "0010");
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Demodulator {
    config: DemodConfig,
}

impl Demodulator {
    /// # Errors
    ///
    /// [`DemodError::InvalidFrequencyThreshold`] when `freq_threshold_pct`
    /// is outside `1..=100`.
    pub fn new(config: DemodConfig) -> Result<Self, DemodError> {
        if !(1..=100).contains(&config.freq_threshold_pct) {
            return Err(DemodError::InvalidFrequencyThreshold(
                config.freq_threshold_pct,
            ));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &DemodConfig {
        &self.config
    }

    /// Rectify `samples`, extract peaks above `threshold` and decode them.
    pub fn demodulate(&self, samples: &[i16], threshold: u16) -> Result<Demodulation, DemodError> {
        let rectified = rectify(samples);
        let intervals = peak_intervals(&rectified, threshold);
        log::debug!(
            "demod: {} peak intervals above {threshold} in {} samples",
            intervals.len(),
            samples.len()
        );
        self.decode_intervals(&intervals)
    }

    /// Decode a peak-interval sequence into bits.
    ///
    /// # Errors
    ///
    /// [`DemodError::NoBitsDetected`] with fewer than two intervals, or when
    /// none is left after the preamble to seed the cell width. The seed
    /// itself carries no bit, so a sequence that ends with it decodes to an
    /// empty [`BitString`].
    pub fn decode_intervals(&self, intervals: &[usize]) -> Result<Demodulation, DemodError> {
        let no_bits = DemodError::NoBitsDetected {
            intervals: intervals.len(),
        };
        if intervals.len() < 2 {
            return Err(no_bits);
        }
        let seed_at = self.config.preamble_intervals;
        let mut zero_width = *intervals.get(seed_at).ok_or(no_bits)?;

        let mut bits = BitString::new();
        let mut desyncs = Vec::new();
        let mut i = seed_at + 1;

        while i < intervals.len() {
            let current = intervals[i];

            let pair = intervals
                .get(i + 1)
                .filter(|&&next| {
                    self.is_half(current, zero_width) && self.is_half(next, zero_width)
                })
                .is_some();
            if pair {
                bits.push(true);
                zero_width = current * 2;
                i += 2;
                continue;
            }

            if self.is_full(current, zero_width) {
                bits.push(false);
                zero_width = current;
            } else {
                log::debug!(
                    "demod: interval #{i} ({current}) fits neither half nor full width {zero_width}"
                );
                desyncs.push(Desync {
                    interval_index: i,
                    interval: current,
                    zero_width,
                });
            }
            i += 1;
        }

        if !desyncs.is_empty() {
            log::warn!(
                "demod: {} ambiguous peak intervals skipped; bit stream may be shifted",
                desyncs.len()
            );
        }

        Ok(Demodulation {
            bits,
            desyncs,
            intervals: intervals.len(),
        })
    }

    // |interval - zw/2| < pct·zw/200, kept in integers.
    fn is_half(&self, interval: usize, zero_width: usize) -> bool {
        let diff = (2 * interval as u64).abs_diff(zero_width as u64);
        diff * 100 < u64::from(self.config.freq_threshold_pct) * zero_width as u64
    }

    // |interval - zw| < pct·zw/100
    fn is_full(&self, interval: usize, zero_width: usize) -> bool {
        let diff = (interval as u64).abs_diff(zero_width as u64);
        diff * 100 < u64::from(self.config.freq_threshold_pct) * zero_width as u64
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::synth;

    fn demod() -> Demodulator {
        Demodulator::new(DemodConfig::default()).unwrap()
    }

    fn bits(s: &str) -> BitString {
        s.parse().unwrap()
    }

    #[test]
    fn invalid_frequency_threshold_rejected() {
        for pct in [0, 101] {
            let cfg = DemodConfig {
                freq_threshold_pct: pct,
                ..DemodConfig::default()
            };
            assert_eq!(
                Demodulator::new(cfg).unwrap_err(),
                DemodError::InvalidFrequencyThreshold(pct)
            );
        }
    }

    #[test]
    fn rectify_discards_sign() {
        assert_eq!(rectify(&[-5, 5, 0, i16::MIN]), vec![5, 5, 0, 32_768]);
    }

    #[test]
    fn peak_is_run_maximum() {
        let rect = [0, 10, 30, 20, 0, 0, 15, 40, 40, 5, 0, 50];
        assert_eq!(peak_positions(&rect, 5), vec![2, 7, 11]);
        assert_eq!(peak_intervals(&rect, 5), vec![5, 4]);
    }

    #[test]
    fn all_below_threshold_yields_no_intervals() {
        let samples = vec![100_i16, -200, 300, -50];
        let rect = rectify(&samples);
        assert!(peak_intervals(&rect, 1_000).is_empty());
        assert_eq!(
            demod().demodulate(&samples, 1_000).unwrap_err(),
            DemodError::NoBitsDetected { intervals: 0 }
        );
    }

    #[test]
    fn one_interval_is_not_enough() {
        assert_eq!(
            demod().decode_intervals(&[40]).unwrap_err(),
            DemodError::NoBitsDetected { intervals: 1 }
        );
    }

    #[test]
    fn preamble_longer_than_input() {
        assert_eq!(
            demod().decode_intervals(&[40, 40]).unwrap_err(),
            DemodError::NoBitsDetected { intervals: 2 }
        );
    }

    #[test]
    fn preamble_is_configurable() {
        let d = Demodulator::new(DemodConfig {
            preamble_intervals: 0,
            ..DemodConfig::default()
        })
        .unwrap();
        let out = d.decode_intervals(&[40, 20, 20]).unwrap();
        assert_eq!(out.bits, bits("1"));
    }

    #[test]
    fn seed_alone_decodes_to_no_bits() {
        let out = demod().decode_intervals(&[90, 13, 40]).unwrap();
        assert!(out.bits.is_empty());
        assert!(out.desyncs.is_empty());
    }

    #[test]
    fn leading_one_round_trips() {
        for pattern in ["1", "10", "1101", "11010000011111"] {
            let expected = bits(pattern);
            let out = demod()
                .decode_intervals(&synth::intervals_for_bits(&expected, 40))
                .unwrap();
            assert_eq!(out.bits, expected);
            assert!(out.desyncs.is_empty());
        }
    }

    #[test]
    fn round_trip_every_short_pattern() {
        let demods: Vec<Demodulator> = [1, 30, 60, 100]
            .into_iter()
            .map(|pct| {
                Demodulator::new(DemodConfig {
                    freq_threshold_pct: pct,
                    ..DemodConfig::default()
                })
                .unwrap()
            })
            .collect();

        for len in 0..=10_u32 {
            for word in 0..(1_u32 << len) {
                let expected: BitString = (0..len).map(|k| (word >> k) & 1 == 1).collect();
                let intervals = synth::intervals_for_bits(&expected, 40);
                for d in &demods {
                    let out = d.decode_intervals(&intervals).unwrap();
                    let pct = d.config().freq_threshold_pct;
                    assert_eq!(out.bits, expected, "pattern {expected} at {pct}%");
                    assert!(out.desyncs.is_empty(), "pattern {expected} at {pct}%");
                }
            }
        }
    }

    #[test]
    fn follows_gradual_speed_change() {
        // Cell width drifts from 40 down to ~28 samples over the swipe.
        let mut intervals = vec![120, 9, 40];
        let mut expected = BitString::new();
        let mut width = 40.0_f64;
        for k in 0..60 {
            let one = k % 3 == 1;
            if one {
                let half = (width / 2.0).round() as usize;
                intervals.extend([half, half]);
            } else {
                intervals.push(width.round() as usize);
            }
            expected.push(one);
            width *= 0.994;
        }
        let out = demod().decode_intervals(&intervals).unwrap();
        assert_eq!(out.bits, expected);
    }

    #[test]
    fn ambiguous_interval_is_skipped_and_reported() {
        // seed 40; 100 is far outside both tolerances
        let out = demod().decode_intervals(&[7, 7, 40, 100, 40]).unwrap();
        assert_eq!(out.bits, bits("0"));
        assert_eq!(
            out.desyncs,
            vec![Desync {
                interval_index: 3,
                interval: 100,
                zero_width: 40
            }]
        );
    }

    #[test]
    fn lone_half_interval_falls_back_to_full_test() {
        // 25 is a half candidate (|50-40| < 12) but 60 is not, and 25 is also
        // within the full tolerance of 40.
        let out = demod().decode_intervals(&[1, 1, 40, 25, 60]).unwrap();
        assert_eq!(out.bits, bits("0"));
        assert_eq!(out.desyncs.len(), 1);
    }

    #[test]
    fn demodulates_synthesized_waveform() {
        let expected = bits("000000110100111000");
        let samples = synth::waveform(&synth::intervals_for_bits(&expected, 36), 20_000, 50);
        let out = demod().demodulate(&samples, 6_000).unwrap();
        assert_eq!(out.bits, expected);
    }
}
