//! Magnetic stripe card reader for a read head wired to a sound-card input.
//!
//! | Module | Role |
//! |--------|------|
//! | [`audio`] | cpal capture into a shared [`SampleBuffer`](audio::SampleBuffer), level metering |
//! | [`decode`] | swipe segmentation, biphase demodulation, track parsing |
//! | [`pipeline`] | one-call-per-swipe orchestration and reporting |
//! | [`config`] | `settings.toml` persistence and validation |

pub mod audio;
pub mod config;
pub mod decode;
pub mod pipeline;
