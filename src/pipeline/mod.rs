//! Swipe decode pipeline.
//!
//! This module wires segmentation, demodulation and track parsing into a
//! single blocking call per swipe.
//!
//! # Architecture
//!
//! ```text
//! AudioCapture ──▶ SampleBuffer (Arc, condvar)
//!                        │
//!                        ▼
//! PipelineOrchestrator::run_once(deadline)
//!        │
//!        ├─ Segmenter::next_window      → DecodeContext.window
//!        ├─ SilenceThreshold level      → DecodeContext.demod_threshold
//!        ├─ Demodulator::demodulate     → DecodeContext.demodulation
//!        └─ decode_all (2 × encodings)  → DecodeContext.tracks
//!                        │
//!                        ▼
//!                   SwipeReport
//! ```
//!
//! # Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use magstripe_reader::audio::SampleBuffer;
//! use magstripe_reader::config::AppConfig;
//! use magstripe_reader::pipeline::{PipelineError, PipelineOrchestrator};
//!
//! // a closed, silent recording: segmentation reports the end of input
//! let source = Arc::new(SampleBuffer::from_samples(44_100, vec![0; 1_000]));
//! let mut orchestrator = PipelineOrchestrator::new(source, &AppConfig::default()).unwrap();
//! assert!(matches!(orchestrator.run_once(None), Err(PipelineError::Segment(_))));
//! ```

pub mod runner;
pub mod state;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use runner::{PipelineError, PipelineOrchestrator};
pub use state::{DecodeContext, PipelineState, SwipeReport};
