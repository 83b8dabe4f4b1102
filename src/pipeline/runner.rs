//! Pipeline orchestrator: drives one swipe through segment → demodulate →
//! parse.
//!
//! [`PipelineOrchestrator`] owns the stage objects and the per-swipe
//! [`DecodeContext`]. Each [`run_once`](PipelineOrchestrator::run_once)
//! call blocks until the next swipe has been found in the sample buffer,
//! then decodes it synchronously.
//!
//! # Pipeline flow
//!
//! ```text
//! run_once(deadline)
//!   └─▶ Segmenter::next_window          [WaitingForSwipe]
//!         └─▶ threshold for the window
//!               └─▶ Demodulator::demodulate  [Demodulating]
//!                     └─▶ decode_all          [Parsing]
//!                           └─▶ SwipeReport   [Done]
//! ```
//!
//! Segmentation and demodulation failures end the swipe with a
//! [`PipelineError`]. Parse failures are per track and reported inside
//! [`SwipeReport::tracks`].

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;

use crate::audio::{peak_magnitude, SampleBuffer};
use crate::config::{AppConfig, ConfigError};
use crate::decode::{decode_all, DemodError, Demodulator, SegmentError, Segmenter, TrackParser};

use super::state::{DecodeContext, PipelineState, SwipeReport};

// ---------------------------------------------------------------------------
// PipelineError
// ---------------------------------------------------------------------------

/// Errors that end a swipe without any track results.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("swipe detection failed: {0}")]
    Segment(#[from] SegmentError),

    #[error("peak detection failed: {0}")]
    Demod(#[from] DemodError),
}

// ---------------------------------------------------------------------------
// PipelineOrchestrator
// ---------------------------------------------------------------------------

/// Decodes swipes from a shared [`SampleBuffer`].
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use magstripe_reader::audio::{AudioCapture, SampleBuffer};
/// use magstripe_reader::config::AppConfig;
/// use magstripe_reader::pipeline::PipelineOrchestrator;
///
/// let capture = AudioCapture::open(None).unwrap();
/// let buffer = Arc::new(SampleBuffer::new(capture.sample_rate()));
/// let _stream = capture.start(Arc::clone(&buffer)).unwrap();
///
/// let mut orchestrator = PipelineOrchestrator::new(buffer, &AppConfig::default()).unwrap();
/// let report = orchestrator.run_once(None).unwrap();
/// print!("{report}");
/// ```
pub struct PipelineOrchestrator {
    context: DecodeContext,
    segmenter: Segmenter,
    demodulator: Demodulator,
    parsers: Vec<TrackParser>,
    state: PipelineState,
}

impl PipelineOrchestrator {
    /// Build the stages from `config`.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Config`] when `config` does not validate.
    pub fn new(source: Arc<SampleBuffer>, config: &AppConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let threshold = config.threshold.mode()?;
        let segmenter = Segmenter::new(
            threshold.segmentation_level(),
            source.sample_rate(),
            config.segment.end_length_ms,
        )?;
        let demodulator = Demodulator::new(config.demod)?;
        let parsers = config.track_parsers()?;

        log::debug!(
            "pipeline: {:?}, silence interval {} samples, {} encodings",
            threshold,
            segmenter.silence_interval(),
            parsers.len()
        );

        Ok(Self {
            context: DecodeContext::new(source, threshold),
            segmenter,
            demodulator,
            parsers,
            state: PipelineState::Idle,
        })
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    /// What the last (or current) swipe produced, including partial results
    /// of a failed one.
    pub fn context(&self) -> &DecodeContext {
        &self.context
    }

    /// Wait for the next swipe and decode it.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Segment`] when `deadline` passes or the source
    /// closes before a swipe completes, [`PipelineError::Demod`] when the
    /// swipe yields no bits.
    pub fn run_once(&mut self, deadline: Option<Instant>) -> Result<SwipeReport, PipelineError> {
        self.context.reset();
        match self.decode_next(deadline) {
            Ok(report) => {
                self.state = PipelineState::Done;
                log::info!(
                    "pipeline: swipe decoded, {} of {} tracks valid",
                    report.successful().count(),
                    report.tracks.len()
                );
                Ok(report)
            }
            Err(e) => {
                self.set_error(&e);
                Err(e)
            }
        }
    }

    fn decode_next(&mut self, deadline: Option<Instant>) -> Result<SwipeReport, PipelineError> {
        // ── 1. Find the swipe ────────────────────────────────────────────
        self.state = PipelineState::WaitingForSwipe;
        log::info!(
            "pipeline: waiting for swipe (silence threshold {})",
            self.segmenter.threshold()
        );
        let window = self
            .segmenter
            .next_window(&self.context.source, deadline)?;
        self.context.window = Some(window);

        // ── 2. Threshold for this window ─────────────────────────────────
        let samples = self.context.source.read(window.range());
        let peak = peak_magnitude(&samples);
        let level = self.context.threshold.demodulation_level(peak);
        self.context.window_peak = Some(peak);
        self.context.demod_threshold = Some(level);
        log::debug!(
            "pipeline: window of {} samples, peak {peak}, detection level {level}",
            samples.len()
        );

        // ── 3. Demodulate ────────────────────────────────────────────────
        self.state = PipelineState::Demodulating;
        let demodulation = self.demodulator.demodulate(&samples, level)?;
        log::debug!("pipeline: {} bits: {}", demodulation.bits.len(), demodulation.bits);

        // ── 4. Parse every combination ───────────────────────────────────
        self.state = PipelineState::Parsing;
        let tracks = decode_all(&demodulation.bits, &self.parsers);

        let report = SwipeReport {
            window,
            sample_rate: self.context.source.sample_rate(),
            threshold: level,
            bits: demodulation.bits.clone(),
            desyncs: demodulation.desyncs.clone(),
            tracks: tracks.clone(),
        };
        self.context.demodulation = Some(demodulation);
        self.context.tracks = tracks;
        Ok(report)
    }

    fn set_error(&mut self, error: &PipelineError) {
        self.state = PipelineState::Error;
        log::error!("pipeline error: {error}");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThresholdConfig;
    use crate::decode::{synth, BitString, Orientation, ABA};

    const RATE: u32 = 8_000;

    /// Head signal for an ABA track carrying `values`, at 30 samples per
    /// cell.
    fn swipe(values: &[u32], reversed: bool) -> Vec<i16> {
        let mut bits = synth::track(&ABA, values, 15);
        if reversed {
            bits = bits.reversed();
        }
        synth::waveform(&synth::intervals_for_bits(&bits, 30), 20_000, 50)
    }

    fn silence(n: usize) -> Vec<i16> {
        vec![0; n]
    }

    /// Default settings give a 200 ms (1 600-sample) silence interval.
    fn buffer(parts: &[Vec<i16>]) -> Arc<SampleBuffer> {
        Arc::new(SampleBuffer::from_samples(RATE, parts.concat()))
    }

    fn orchestrator(source: Arc<SampleBuffer>) -> PipelineOrchestrator {
        PipelineOrchestrator::new(source, &AppConfig::default()).unwrap()
    }

    #[test]
    fn decodes_forward_swipe() {
        let source = buffer(&[silence(500), swipe(&[4, 1, 2, 3], false), silence(2_000)]);
        let mut pipeline = orchestrator(source);

        let report = pipeline.run_once(None).unwrap();
        assert_eq!(pipeline.state(), &PipelineState::Done);
        assert_eq!(report.tracks.len(), 4);
        assert!(report.desyncs.is_empty());
        // auto threshold: 30 % of the 20 000 peak
        assert_eq!(report.threshold, 6_000);

        let ok: Vec<_> = report.successful().collect();
        assert_eq!(ok.len(), 1);
        assert_eq!(ok[0].encoding, "ABA");
        assert_eq!(ok[0].orientation, Orientation::Forward);
        assert_eq!(ok[0].characters, ";4123?");
    }

    #[test]
    fn decodes_reversed_swipe() {
        let source = buffer(&[silence(300), swipe(&[9, 0, 7], true), silence(2_000)]);
        let report = orchestrator(source).run_once(None).unwrap();

        let ok: Vec<_> = report.successful().collect();
        assert_eq!(ok.len(), 1);
        assert_eq!(ok[0].orientation, Orientation::Reversed);
        assert_eq!(ok[0].characters, ";907?");
    }

    #[test]
    fn fixed_threshold_is_used_for_peaks() {
        let mut config = AppConfig::default();
        config.threshold = ThresholdConfig::fixed(8_000);
        let source = buffer(&[silence(100), swipe(&[5, 5], false), silence(2_000)]);

        let report = PipelineOrchestrator::new(source, &config)
            .unwrap()
            .run_once(None)
            .unwrap();
        assert_eq!(report.threshold, 8_000);
        assert!(report.has_success());
    }

    #[test]
    fn consecutive_swipes() {
        let source = buffer(&[
            silence(200),
            swipe(&[1], false),
            silence(2_000),
            swipe(&[2], false),
            silence(2_000),
        ]);
        let mut pipeline = orchestrator(source);

        let first = pipeline.run_once(None).unwrap();
        let second = pipeline.run_once(None).unwrap();
        assert!(second.window.start > first.window.end);
        assert_eq!(first.successful().next().unwrap().characters, ";1?");
        assert_eq!(second.successful().next().unwrap().characters, ";2?");

        let third = pipeline.run_once(None);
        assert_eq!(
            third.unwrap_err(),
            PipelineError::Segment(SegmentError::SourceClosed)
        );
    }

    #[test]
    fn lone_click_yields_no_bits() {
        let mut click = silence(10);
        click[5] = 20_000;
        let source = buffer(&[silence(100), click, silence(2_000)]);
        let mut pipeline = orchestrator(source);

        let err = pipeline.run_once(None).unwrap_err();
        assert_eq!(
            err,
            PipelineError::Demod(DemodError::NoBitsDetected { intervals: 0 })
        );
        assert_eq!(pipeline.state(), &PipelineState::Error);
        assert!(pipeline.context().window.is_some());
        assert_eq!(pipeline.context().window_peak, Some(20_000));
    }

    #[test]
    fn silent_source_times_out() {
        let source = Arc::new(SampleBuffer::new(RATE));
        source.append(&silence(1_000));
        let mut pipeline = orchestrator(source);

        let err = pipeline.run_once(Some(Instant::now())).unwrap_err();
        assert_eq!(err, PipelineError::Segment(SegmentError::TimedOut));
        assert_eq!(pipeline.state(), &PipelineState::Error);
    }

    #[test]
    fn garbage_bits_still_produce_a_report() {
        // a clean clock with no sentinels anywhere
        let bits: BitString = std::iter::repeat(false).take(40).collect();
        let samples = synth::waveform(&synth::intervals_for_bits(&bits, 30), 20_000, 50);
        let source = buffer(&[silence(100), samples, silence(2_000)]);

        let report = orchestrator(source).run_once(None).unwrap();
        assert_eq!(report.bits, bits);
        assert!(report.tracks.iter().all(|t| t.is_no_data()));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = AppConfig::default();
        config.threshold = ThresholdConfig::fixed(-1);
        let result = PipelineOrchestrator::new(Arc::new(SampleBuffer::new(RATE)), &config);
        assert!(matches!(
            result,
            Err(PipelineError::Config(ConfigError::NonPositiveThreshold(-1)))
        ));
    }
}
