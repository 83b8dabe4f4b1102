//! Audio side of the reader: capture → shared sample buffer → level metering.
//!
//! # Pipeline
//!
//! ```text
//! Read head → sound card → cpal callback → downmix / i16 → feeder thread
//!           → SampleBuffer (append-only, condvar-notified) → decode pipeline
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use magstripe_reader::audio::{AudioCapture, SampleBuffer};
//!
//! let capture = AudioCapture::open(None).unwrap();
//! let buffer = Arc::new(SampleBuffer::new(capture.sample_rate()));
//! let _handle = capture.start(Arc::clone(&buffer)).unwrap(); // drop handle → stops stream
//!
//! let len = buffer.wait_for_len(1_000, None).unwrap();
//! println!("captured {len} samples @ {}Hz", buffer.sample_rate());
//! ```

pub mod buffer;
pub mod capture;
pub mod level;

pub use buffer::{SampleBuffer, WaitError};
pub use capture::{downmix_to_mono, AudioCapture, CaptureError, StreamHandle};
pub use level::{auto_threshold, magnitude, peak_magnitude, PeakLevelMeter, SilenceThreshold};
