//! Ordered bit sequence produced by the demodulator and consumed by the
//! track parser.
//!
//! ```rust
//! use magstripe_reader::decode::BitString;
//!
//! let bits: BitString = "0011010".parse().unwrap();
//! assert_eq!(bits.len(), 7);
//! assert_eq!(bits.find(&"11010".parse().unwrap(), 0), Some(2));
//! assert_eq!(bits.reversed().to_string(), "0101100");
//! ```

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// A character other than `0` or `1` in a textual bit pattern.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid bit character {found:?} at position {position}")]
pub struct BitParseError {
    pub position: usize,
    pub found: char,
}

/// Sequence of binary digits in capture order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct BitString {
    bits: Vec<bool>,
}

impl BitString {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bit: bool) {
        self.bits.push(bit);
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.bits
    }

    /// The same bits in the opposite order (card swiped the other way).
    pub fn reversed(&self) -> Self {
        Self {
            bits: self.bits.iter().rev().copied().collect(),
        }
    }

    /// Bits `start..start + len`, or `None` if that runs past the end.
    pub fn frame(&self, start: usize, len: usize) -> Option<&[bool]> {
        self.bits.get(start..start.checked_add(len)?)
    }

    /// First offset `>= from` at which `pattern` occurs literally.
    pub fn find(&self, pattern: &BitString, from: usize) -> Option<usize> {
        self.find_stepped(pattern, from, 1)
    }

    /// First offset `from + k * step` (k ≥ 0) at which `pattern` occurs.
    ///
    /// Used to find a frame-aligned end sentinel.
    pub fn find_stepped(&self, pattern: &BitString, from: usize, step: usize) -> Option<usize> {
        if pattern.is_empty() || step == 0 {
            return None;
        }
        let last = self.bits.len().checked_sub(pattern.len())?;
        (from..=last)
            .step_by(step)
            .find(|&at| self.bits[at..at + pattern.len()] == pattern.bits[..])
    }
}

impl From<Vec<bool>> for BitString {
    fn from(bits: Vec<bool>) -> Self {
        Self { bits }
    }
}

impl FromIterator<bool> for BitString {
    fn from_iter<I: IntoIterator<Item = bool>>(iter: I) -> Self {
        Self {
            bits: iter.into_iter().collect(),
        }
    }
}

impl FromStr for BitString {
    type Err = BitParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.chars()
            .enumerate()
            .map(|(position, c)| match c {
                '0' => Ok(false),
                '1' => Ok(true),
                found => Err(BitParseError { position, found }),
            })
            .collect()
    }
}

impl fmt::Display for BitString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &bit in &self.bits {
            f.write_str(if bit { "1" } else { "0" })?;
        }
        Ok(())
    }
}
