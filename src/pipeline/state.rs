//! Pipeline state machine, per-swipe decode context and the swipe report.
//!
//! [`PipelineState`] tracks which stage the orchestrator is in.
//! [`DecodeContext`] carries everything one swipe accumulates as it moves
//! through the stages; each stage fills in only its own fields.
//! [`SwipeReport`] is the finished result handed back to the caller.

use std::fmt;
use std::sync::Arc;

use crate::audio::{SampleBuffer, SilenceThreshold};
use crate::decode::{BitString, DecodedTrack, Demodulation, Desync, SampleWindow};

// ---------------------------------------------------------------------------
// PipelineState
// ---------------------------------------------------------------------------

/// States of the decode pipeline.
///
/// ```text
/// Idle ──run_once──▶ WaitingForSwipe ──window──▶ Demodulating
///                                                  ──bits──▶ Parsing ──▶ Done
/// any stage ──fatal error──▶ Error
/// Done / Error ──run_once──▶ WaitingForSwipe
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub enum PipelineState {
    /// Nothing has run yet.
    #[default]
    Idle,

    /// Scanning the sample buffer for the start and end of a swipe.
    WaitingForSwipe,

    /// A swipe window was found; extracting peak intervals and bits.
    Demodulating,

    /// Running every encoding in both orientations.
    Parsing,

    /// The last swipe was decoded (individual tracks may still have failed).
    Done,

    /// The last swipe could not be decoded at all.
    Error,
}

impl PipelineState {
    /// Returns `true` while a swipe is being waited for or processed.
    ///
    /// ```
    /// use magstripe_reader::pipeline::PipelineState;
    ///
    /// assert!(!PipelineState::Idle.is_busy());
    /// assert!(PipelineState::WaitingForSwipe.is_busy());
    /// assert!(PipelineState::Demodulating.is_busy());
    /// assert!(PipelineState::Parsing.is_busy());
    /// assert!(!PipelineState::Done.is_busy());
    /// assert!(!PipelineState::Error.is_busy());
    /// ```
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            PipelineState::WaitingForSwipe | PipelineState::Demodulating | PipelineState::Parsing
        )
    }

    /// A short human-readable label for status output.
    pub fn label(&self) -> &'static str {
        match self {
            PipelineState::Idle => "Idle",
            PipelineState::WaitingForSwipe => "Waiting for swipe",
            PipelineState::Demodulating => "Demodulating",
            PipelineState::Parsing => "Parsing",
            PipelineState::Done => "Done",
            PipelineState::Error => "Error",
        }
    }
}

// ---------------------------------------------------------------------------
// DecodeContext
// ---------------------------------------------------------------------------

/// Everything one swipe has produced so far.
///
/// | Field | Written by |
/// |-------|------------|
/// | `window` | segmentation |
/// | `window_peak`, `demod_threshold` | threshold selection |
/// | `demodulation` | demodulation |
/// | `tracks` | parsing |
#[derive(Debug, Clone)]
pub struct DecodeContext {
    pub source: Arc<SampleBuffer>,
    pub threshold: SilenceThreshold,
    pub window: Option<SampleWindow>,
    /// Largest sample magnitude inside `window`.
    pub window_peak: Option<u16>,
    /// Level used for peak detection inside `window`.
    pub demod_threshold: Option<u16>,
    pub demodulation: Option<Demodulation>,
    pub tracks: Vec<DecodedTrack>,
}

impl DecodeContext {
    pub fn new(source: Arc<SampleBuffer>, threshold: SilenceThreshold) -> Self {
        Self {
            source,
            threshold,
            window: None,
            window_peak: None,
            demod_threshold: None,
            demodulation: None,
            tracks: Vec::new(),
        }
    }

    /// Forget the previous swipe, keeping the source and threshold mode.
    pub fn reset(&mut self) {
        self.window = None;
        self.window_peak = None;
        self.demod_threshold = None;
        self.demodulation = None;
        self.tracks.clear();
    }
}

// ---------------------------------------------------------------------------
// SwipeReport
// ---------------------------------------------------------------------------

/// Result of decoding one swipe.
#[derive(Debug, Clone, PartialEq)]
pub struct SwipeReport {
    pub window: SampleWindow,
    pub sample_rate: u32,
    /// Peak-detection level that produced `bits`.
    pub threshold: u16,
    pub bits: BitString,
    pub desyncs: Vec<Desync>,
    /// One entry per (orientation, encoding) combination.
    pub tracks: Vec<DecodedTrack>,
}

impl SwipeReport {
    /// Tracks that passed every check.
    pub fn successful(&self) -> impl Iterator<Item = &DecodedTrack> {
        self.tracks.iter().filter(|t| t.is_success())
    }

    pub fn has_success(&self) -> bool {
        self.successful().next().is_some()
    }
}

impl fmt::Display for SwipeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "swipe: samples {}..{} ({:.2} s), threshold {}, {} bits",
            self.window.start,
            self.window.end,
            self.window.duration_secs(self.sample_rate),
            self.threshold,
            self.bits.len()
        )?;
        if !self.desyncs.is_empty() {
            writeln!(f, "warning: {} ambiguous peak intervals", self.desyncs.len())?;
        }
        for track in &self.tracks {
            writeln!(f, "{track}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
