//! Silence-bounded swipe segmentation over a growing sample sequence.
//!
//! [`Segmenter`] finds the index range of one card swipe: the first sample
//! louder than the threshold opens it, and it closes at the first quiet
//! sample that is followed by a full *silence interval* of quiet samples.
//! Shorter quiet gaps inside a swipe do not end it.
//!
//! ## State machine
//!
//! ```text
//! Waiting ──loud──▶ Active ──quiet──▶ Confirming ──silence_interval quiet──▶ Closed
//!                     ▲                   │
//!                     └──────loud─────────┘
//! ```
//!
//! A sample is *loud* when its magnitude is strictly greater than the
//! threshold; everything else is quiet.
//!
//! If the threshold is never exceeded the segmenter keeps waiting. Bounding
//! that wait is up to the caller (a deadline, or closing the source).

use std::time::Instant;

use thiserror::Error;

use crate::audio::buffer::{SampleBuffer, WaitError};
use crate::audio::level::magnitude;

/// Samples copied out of the source per read.
const READ_BLOCK: usize = 8_192;

// ---------------------------------------------------------------------------
// SampleWindow
// ---------------------------------------------------------------------------

/// Half-open index range `[start, end)` of one swipe in the sample source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleWindow {
    pub start: usize,
    pub end: usize,
}

impl SampleWindow {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn range(&self) -> std::ops::Range<usize> {
        self.start..self.end
    }

    /// Window duration in seconds at `sample_rate` Hz.
    pub fn duration_secs(&self, sample_rate: u32) -> f32 {
        if sample_rate == 0 {
            return 0.0;
        }
        self.len() as f32 / sample_rate as f32
    }
}

// ---------------------------------------------------------------------------
// SegmentError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SegmentError {
    /// The threshold must be positive before scanning starts.
    #[error("silence threshold must be greater than zero")]
    InvalidThreshold,

    #[error("timed out waiting for a card swipe")]
    TimedOut,

    #[error("audio source closed before a swipe was completed")]
    SourceClosed,
}

impl From<WaitError> for SegmentError {
    fn from(err: WaitError) -> Self {
        match err {
            WaitError::TimedOut => SegmentError::TimedOut,
            WaitError::Closed => SegmentError::SourceClosed,
        }
    }
}

// ---------------------------------------------------------------------------
// SegmenterState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    /// No loud sample seen yet.
    Waiting,
    /// Inside a swipe that started at `start`.
    Active { start: usize },
    /// A quiet sample at `candidate_end`; `quiet` consecutive quiet samples
    /// (including it) seen so far.
    Confirming {
        start: usize,
        candidate_end: usize,
        quiet: usize,
    },
    /// Swipe found.
    Closed(SampleWindow),
}

impl SegmenterState {
    pub fn label(&self) -> &'static str {
        match self {
            SegmenterState::Waiting => "waiting",
            SegmenterState::Active { .. } => "active",
            SegmenterState::Confirming { .. } => "confirming",
            SegmenterState::Closed(_) => "closed",
        }
    }
}

// ---------------------------------------------------------------------------
// Segmenter
// ---------------------------------------------------------------------------

/// Locates one swipe window at a time in a [`SampleBuffer`].
///
/// # Example
///
/// ```rust
/// use magstripe_reader::audio::SampleBuffer;
/// use magstripe_reader::decode::{SampleWindow, Segmenter};
///
/// // 100 quiet, 50 loud, 200 quiet samples at 1 kHz; 100 ms end length.
/// let mut samples = vec![0_i16; 100];
/// samples.extend(vec![9_000_i16; 50]);
/// samples.extend(vec![0_i16; 200]);
/// let source = SampleBuffer::from_samples(1_000, samples);
///
/// let mut seg = Segmenter::new(5_000, 1_000, 100).unwrap();
/// let window = seg.next_window(&source, None).unwrap();
/// assert_eq!(window, SampleWindow { start: 100, end: 150 });
/// ```
#[derive(Debug, Clone)]
pub struct Segmenter {
    threshold: u16,
    silence_interval: usize,
    state: SegmenterState,
    /// Next sample index to examine.
    cursor: usize,
}

impl Segmenter {
    /// Create a segmenter.
    ///
    /// `silence_interval = sample_rate * end_length_ms / 1000` samples, and at
    /// least one.
    ///
    /// # Errors
    ///
    /// [`SegmentError::InvalidThreshold`] when `threshold == 0`.
    pub fn new(threshold: u16, sample_rate: u32, end_length_ms: u32) -> Result<Self, SegmentError> {
        if threshold == 0 {
            return Err(SegmentError::InvalidThreshold);
        }
        let silence_interval =
            (u64::from(sample_rate) * u64::from(end_length_ms) / 1_000).max(1) as usize;
        Ok(Self {
            threshold,
            silence_interval,
            state: SegmenterState::Waiting,
            cursor: 0,
        })
    }

    pub fn threshold(&self) -> u16 {
        self.threshold
    }

    pub fn silence_interval(&self) -> usize {
        self.silence_interval
    }

    pub fn state(&self) -> SegmenterState {
        self.state
    }

    /// Index of the next sample the segmenter will examine.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    fn is_loud(&self, sample: i16) -> bool {
        magnitude(sample) > self.threshold
    }

    /// Advance the state machine by the sample at `index`.
    ///
    /// Returns the window once the silence interval has been confirmed.
    /// Feeding a segmenter that is already `Closed` starts a new search.
    pub fn feed(&mut self, index: usize, sample: i16) -> Option<SampleWindow> {
        let loud = self.is_loud(sample);
        self.state = match self.state {
            SegmenterState::Waiting | SegmenterState::Closed(_) => {
                if loud {
                    log::trace!("segment: swipe starts at {index}");
                    SegmenterState::Active { start: index }
                } else {
                    SegmenterState::Waiting
                }
            }
            SegmenterState::Active { start } => {
                if loud {
                    SegmenterState::Active { start }
                } else {
                    SegmenterState::Confirming {
                        start,
                        candidate_end: index,
                        quiet: 1,
                    }
                }
            }
            SegmenterState::Confirming {
                start,
                candidate_end,
                quiet,
            } => {
                if loud {
                    SegmenterState::Active { start }
                } else {
                    SegmenterState::Confirming {
                        start,
                        candidate_end,
                        quiet: quiet + 1,
                    }
                }
            }
        };

        if let SegmenterState::Confirming {
            start,
            candidate_end,
            quiet,
        } = self.state
        {
            if quiet >= self.silence_interval {
                let window = SampleWindow {
                    start,
                    end: candidate_end,
                };
                self.state = SegmenterState::Closed(window);
                return Some(window);
            }
        }
        None
    }

    /// Scan `source` from the cursor until one swipe window closes.
    ///
    /// Blocks on the source when it runs out of samples.
    ///
    /// # Errors
    ///
    /// [`SegmentError::TimedOut`] once `deadline` passes,
    /// [`SegmentError::SourceClosed`] if the source ends first.
    pub fn next_window(
        &mut self,
        source: &SampleBuffer,
        deadline: Option<Instant>,
    ) -> Result<SampleWindow, SegmentError> {
        if matches!(self.state, SegmenterState::Closed(_)) {
            self.state = SegmenterState::Waiting;
        }

        loop {
            let available = source.wait_for_len(self.cursor + 1, deadline)?;
            let end = available.min(self.cursor + READ_BLOCK);
            let block = source.read(self.cursor..end);

            for (offset, &sample) in block.iter().enumerate() {
                let index = self.cursor + offset;
                if let Some(window) = self.feed(index, sample) {
                    self.cursor = index + 1;
                    log::debug!(
                        "segment: closed window [{}, {}) ({} samples)",
                        window.start,
                        window.end,
                        window.len()
                    );
                    return Ok(window);
                }
            }
            self.cursor += block.len();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
