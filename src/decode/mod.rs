//! Swipe decoding: segmentation → biphase demodulation → track parsing.
//!
//! | Stage | Type | Input → Output |
//! |-------|------|----------------|
//! | Segment | [`Segmenter`] | growing [`SampleBuffer`](crate::audio::SampleBuffer) → [`SampleWindow`] |
//! | Demodulate | [`Demodulator`] | window samples → [`BitString`] |
//! | Parse | [`TrackParser`] | bits × [`Orientation`] → [`DecodedTrack`] |
//!
//! Each stage is usable on its own; [`crate::pipeline`] wires them together.
//!
//! # Example
//!
//! ```rust
//! use magstripe_reader::decode::{builtin_encodings, decode_all, BitString, TrackParser};
//!
//! let parsers: Vec<TrackParser> = builtin_encodings()
//!     .into_iter()
//!     .map(|d| TrackParser::new(d).unwrap())
//!     .collect();
//! let bits: BitString = "0000110101000011111101010000".parse().unwrap();
//! let tracks = decode_all(&bits, &parsers);
//! assert_eq!(tracks.len(), 4);
//! assert!(tracks.iter().any(|t| t.is_success() && t.characters == ";1?"));
//! ```

pub mod bits;
pub mod demod;
pub mod segment;
pub mod track;

#[cfg(test)]
pub(crate) mod synth;

pub use bits::{BitParseError, BitString};
pub use demod::{
    peak_intervals, peak_positions, rectify, DemodConfig, DemodError, Demodulation, Demodulator,
    Desync,
};
pub use segment::{SampleWindow, SegmentError, Segmenter, SegmenterState};
pub use track::{
    builtin_encodings, check_parity, decode_all, decode_char, DecodedTrack, EncodingDescriptor,
    EncodingError, Orientation, Parity, ParseError, TrackParser, ABA, IATA,
};
