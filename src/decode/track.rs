//! Sentinel-, parity- and LRC-checked character extraction.
//!
//! A track is a run of fixed-width characters framed by a start and an end
//! sentinel, followed by a longitudinal redundancy check (LRC) character:
//!
//! ```text
//! 000… | SS | c1 | c2 | … | ES | LRC | …000
//! ```
//!
//! Every character is `char_length` bits: the low `char_length - 1` bits are
//! data (least significant first), the last bit is parity. The LRC data bits
//! are the XOR of the data bits of every character from SS through ES.
//!
//! Track formats are plain [`EncodingDescriptor`] values; add one by adding
//! a descriptor, not a type.
//!
//! ```rust
//! use magstripe_reader::decode::{BitString, Orientation, TrackParser, ABA};
//!
//! // ";1?" plus its LRC, with clocking zeros on both sides
//! let bits: BitString = "0000110101000011111101010000".parse().unwrap();
//! let parser = TrackParser::new(ABA).unwrap();
//! let track = parser.decode(&bits, Orientation::Forward);
//! assert!(track.is_success());
//! assert_eq!(track.characters, ";1?");
//! ```

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::decode::bits::{BitParseError, BitString};

/// Widest supported character, parity included.
const MAX_CHAR_LENGTH: usize = 8;

// ---------------------------------------------------------------------------
// Parity
// ---------------------------------------------------------------------------

/// Required 1-bit count over a whole character, parity bit included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    /// Odd number of 1-bits. ISO 7811 tracks, and the built-in sentinels.
    #[default]
    Odd,
    /// Even number of 1-bits: the parity bit equals the data 1-count mod 2.
    Even,
}

/// Check the parity of one `char_length`-bit frame whose last bit is the
/// parity bit.
///
/// ```rust
/// use magstripe_reader::decode::{check_parity, Parity};
///
/// assert!(check_parity(&[true, false, false, false, true], Parity::Even));
/// assert!(check_parity(&[true, true, false, true, false], Parity::Odd));
/// ```
pub fn check_parity(frame: &[bool], parity: Parity) -> bool {
    let Some((&parity_bit, data)) = frame.split_last() else {
        return false;
    };
    let ones = data.iter().filter(|&&b| b).count() + usize::from(parity_bit);
    match parity {
        Parity::Even => ones % 2 == 0,
        Parity::Odd => ones % 2 == 1,
    }
}

/// Numeric value of a frame's data bits, least significant first.
pub fn data_value(frame: &[bool]) -> u32 {
    let data = &frame[..frame.len().saturating_sub(1)];
    data.iter()
        .enumerate()
        .filter(|&(_, &bit)| bit)
        .fold(0, |acc, (i, _)| acc | (1 << i))
}

/// Character for a frame: `'0' + data value`.
pub fn decode_char(frame: &[bool]) -> char {
    char::from_u32(u32::from(b'0') + data_value(frame)).unwrap_or(char::REPLACEMENT_CHARACTER)
}

// ---------------------------------------------------------------------------
// EncodingDescriptor
// ---------------------------------------------------------------------------

/// Named character format: width, sentinels and parity convention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingDescriptor {
    pub name: Cow<'static, str>,
    /// Bits per character, parity bit included.
    pub char_length: usize,
    pub start_sentinel: Cow<'static, str>,
    pub end_sentinel: Cow<'static, str>,
    #[serde(default)]
    pub parity: Parity,
}

/// IATA (track 1): 6 data bits + parity.
pub const IATA: EncodingDescriptor = EncodingDescriptor {
    name: Cow::Borrowed("IATA"),
    char_length: 7,
    start_sentinel: Cow::Borrowed("1010001"),
    end_sentinel: Cow::Borrowed("1111100"),
    parity: Parity::Odd,
};

/// ABA (track 2): 4 data bits + parity.
pub const ABA: EncodingDescriptor = EncodingDescriptor {
    name: Cow::Borrowed("ABA"),
    char_length: 5,
    start_sentinel: Cow::Borrowed("11010"),
    end_sentinel: Cow::Borrowed("11111"),
    parity: Parity::Odd,
};

/// Descriptors tried when nothing else is configured.
pub fn builtin_encodings() -> Vec<EncodingDescriptor> {
    vec![IATA, ABA]
}

/// Problems with a descriptor, found before any decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    #[error("encoding {name}: character length {char_length} outside 2..=8")]
    CharLength { name: String, char_length: usize },

    #[error("encoding {name}: {which} sentinel has {len} bits, expected {char_length}")]
    SentinelLength {
        name: String,
        which: &'static str,
        len: usize,
        char_length: usize,
    },

    #[error("encoding {name}: {which} sentinel: {source}")]
    SentinelBits {
        name: String,
        which: &'static str,
        source: BitParseError,
    },
}

impl EncodingDescriptor {
    /// Check the descriptor and return its parsed sentinels.
    pub fn validate(&self) -> Result<(BitString, BitString), EncodingError> {
        if !(2..=MAX_CHAR_LENGTH).contains(&self.char_length) {
            return Err(EncodingError::CharLength {
                name: self.name.to_string(),
                char_length: self.char_length,
            });
        }
        let start = self.sentinel("start", &self.start_sentinel)?;
        let end = self.sentinel("end", &self.end_sentinel)?;
        Ok((start, end))
    }

    fn sentinel(&self, which: &'static str, pattern: &str) -> Result<BitString, EncodingError> {
        let bits: BitString = pattern.parse().map_err(|source| EncodingError::SentinelBits {
            name: self.name.to_string(),
            which,
            source,
        })?;
        if bits.len() != self.char_length {
            return Err(EncodingError::SentinelLength {
                name: self.name.to_string(),
                which,
                len: bits.len(),
                char_length: self.char_length,
            });
        }
        Ok(bits)
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Bit order in which a track was read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    /// As captured.
    Forward,
    /// Reversed; the card was swiped the other way.
    Reversed,
}

impl Orientation {
    pub const BOTH: [Orientation; 2] = [Orientation::Forward, Orientation::Reversed];

    pub fn label(&self) -> &'static str {
        match self {
            Orientation::Forward => "forward",
            Orientation::Reversed => "reversed",
        }
    }
}

/// Why a single (orientation, encoding) attempt produced no valid track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("start sentinel not found")]
    NoStartSentinel,

    #[error("no frame-aligned end sentinel")]
    NoEndSentinel,

    /// `index` counts characters from the start sentinel (0); `offset` is
    /// the bit position of the failing frame.
    #[error("character parity mismatch at character {index} (bit {offset})")]
    CharacterParity { index: usize, offset: usize },

    #[error("LRC character missing after end sentinel")]
    MissingLrc,

    #[error("information parity mismatch")]
    InformationParity,

    #[error("LRC does not match track data")]
    LrcMismatch,
}

impl ParseError {
    /// `true` for the outcomes that just mean "no track here".
    pub fn is_no_data(&self) -> bool {
        matches!(self, ParseError::NoStartSentinel | ParseError::NoEndSentinel)
    }
}

/// Outcome of one (orientation, encoding) attempt.
///
/// `characters` holds whatever was decoded before a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTrack {
    pub encoding: String,
    pub orientation: Orientation,
    pub characters: String,
    pub outcome: Result<(), ParseError>,
}

impl DecodedTrack {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn is_no_data(&self) -> bool {
        matches!(self.outcome, Err(e) if e.is_no_data())
    }
}

impl fmt::Display for DecodedTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): ", self.encoding, self.orientation.label())?;
        match self.outcome {
            Ok(()) => write!(f, "{}", self.characters),
            Err(e) if e.is_no_data() => write!(f, "no data ({e})"),
            Err(e) if self.characters.is_empty() => write!(f, "error: {e}"),
            Err(e) => write!(f, "{} [error: {e}]", self.characters),
        }
    }
}

// ---------------------------------------------------------------------------
// TrackParser
// ---------------------------------------------------------------------------

/// Decoder for one [`EncodingDescriptor`].
#[derive(Debug, Clone)]
pub struct TrackParser {
    descriptor: EncodingDescriptor,
    start: BitString,
    end: BitString,
}

impl TrackParser {
    pub fn new(descriptor: EncodingDescriptor) -> Result<Self, EncodingError> {
        let (start, end) = descriptor.validate()?;
        Ok(Self {
            descriptor,
            start,
            end,
        })
    }

    pub fn descriptor(&self) -> &EncodingDescriptor {
        &self.descriptor
    }

    /// Decode `bits` read in `orientation`. The caller is responsible for
    /// having reversed them already; `orientation` is only recorded.
    pub fn decode(&self, bits: &BitString, orientation: Orientation) -> DecodedTrack {
        let mut characters = String::new();
        let outcome = self.parse_into(bits, &mut characters);
        match &outcome {
            Ok(()) => log::debug!(
                "track: {} {} decoded {} characters",
                self.descriptor.name,
                orientation.label(),
                characters.chars().count()
            ),
            Err(e) => log::debug!(
                "track: {} {}: {e}",
                self.descriptor.name,
                orientation.label()
            ),
        }
        DecodedTrack {
            encoding: self.descriptor.name.to_string(),
            orientation,
            characters,
            outcome,
        }
    }

    fn parse_into(&self, bits: &BitString, out: &mut String) -> Result<(), ParseError> {
        let n = self.descriptor.char_length;
        let parity = self.descriptor.parity;

        let start = bits.find(&self.start, 0).ok_or(ParseError::NoStartSentinel)?;
        let end = bits
            .find_stepped(&self.end, start + n, n)
            .ok_or(ParseError::NoEndSentinel)?;

        let mut lrc: Vec<bool> = self.start.as_slice()[..n - 1].to_vec();
        out.push(decode_char(self.start.as_slice()));

        for (index, offset) in (start + n..=end).step_by(n).enumerate() {
            let frame = bits.frame(offset, n).ok_or(ParseError::NoEndSentinel)?;
            if !check_parity(frame, parity) {
                return Err(ParseError::CharacterParity {
                    index: index + 1,
                    offset,
                });
            }
            out.push(decode_char(frame));
            for (acc, &bit) in lrc.iter_mut().zip(&frame[..n - 1]) {
                *acc ^= bit;
            }
        }

        let lrc_frame = bits.frame(end + n, n).ok_or(ParseError::MissingLrc)?;
        if !check_parity(lrc_frame, parity) {
            return Err(ParseError::InformationParity);
        }
        if lrc_frame[..n - 1] != lrc[..] {
            return Err(ParseError::LrcMismatch);
        }
        Ok(())
    }
}

/// Run every (orientation × encoding) combination on `bits`.
///
/// Each attempt is independent; a failure never stops the others.
pub fn decode_all(bits: &BitString, parsers: &[TrackParser]) -> Vec<DecodedTrack> {
    let reversed = bits.reversed();
    Orientation::BOTH
        .iter()
        .flat_map(|&orientation| {
            let oriented = match orientation {
                Orientation::Forward => bits,
                Orientation::Reversed => &reversed,
            };
            parsers
                .iter()
                .map(move |parser| parser.decode(oriented, orientation))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
