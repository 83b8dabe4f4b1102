//! Synthetic swipes for tests: ideal interval sequences, head waveforms and
//! encoded tracks.

use crate::decode::bits::BitString;
use crate::decode::demod::DemodConfig;
use crate::decode::track::{data_value, EncodingDescriptor, Parity};

/// Peak intervals for `bits` at a constant cell width, preceded by the
/// default preamble and one seed interval.
pub fn intervals_for_bits(bits: &BitString, zero_width: usize) -> Vec<usize> {
    let lead_in = DemodConfig::default().preamble_intervals + 1;
    let mut intervals = vec![zero_width; lead_in];
    for &bit in bits.as_slice() {
        if bit {
            intervals.extend([zero_width / 2, zero_width / 2]);
        } else {
            intervals.push(zero_width);
        }
    }
    intervals
}

/// Head signal with one triangular spike per peak, alternating in sign, and
/// `lead` quiet samples on both sides.
pub fn waveform(intervals: &[usize], amplitude: i16, lead: usize) -> Vec<i16> {
    const HALF_WIDTH: i32 = 3;

    let mut peaks = vec![lead];
    for &gap in intervals {
        let last = peaks[peaks.len() - 1];
        peaks.push(last + gap);
    }
    let len = peaks[peaks.len() - 1] + lead + 1;

    let mut samples = vec![0_i16; len];
    for (n, &at) in peaks.iter().enumerate() {
        let sign = if n % 2 == 0 { 1 } else { -1 };
        for d in -HALF_WIDTH..=HALF_WIDTH {
            let idx = at as i64 + i64::from(d);
            if idx < 0 || idx as usize >= len {
                continue;
            }
            let scale = HALF_WIDTH + 1 - d.abs();
            let value = i32::from(amplitude) * scale / (HALF_WIDTH + 1);
            samples[idx as usize] = (sign * value) as i16;
        }
    }
    samples
}

/// One `char_length`-bit frame for `value` with the parity bit filled in.
pub fn frame(value: u32, char_length: usize, parity: Parity) -> Vec<bool> {
    let mut bits: Vec<bool> = (0..char_length - 1).map(|i| (value >> i) & 1 == 1).collect();
    let ones = bits.iter().filter(|&&b| b).count();
    bits.push(match parity {
        Parity::Odd => ones % 2 == 0,
        Parity::Even => ones % 2 == 1,
    });
    bits
}

/// A complete track: `pad` zeros, start sentinel, `values`, end sentinel,
/// LRC and `pad` zeros.
pub fn track(desc: &EncodingDescriptor, values: &[u32], pad: usize) -> BitString {
    let (start, end) = desc.validate().unwrap();
    let n = desc.char_length;

    let mut lrc = data_value(start.as_slice()) ^ data_value(end.as_slice());
    let mut bits = vec![false; pad];
    bits.extend_from_slice(start.as_slice());
    for &v in values {
        lrc ^= v;
        bits.extend(frame(v, n, desc.parity));
    }
    bits.extend_from_slice(end.as_slice());
    bits.extend(frame(lrc, n, desc.parity));
    bits.extend(std::iter::repeat(false).take(pad));
    BitString::from(bits)
}
