//! Append-only sample store shared between the capture thread and the
//! decode pipeline.
//!
//! The capture side only ever appends; the decode side only reads by index.
//! Already-written samples are never touched again, so a reader that has
//! observed `len() == n` may read `0..n` at any later point and see the same
//! values.
//!
//! Every append notifies a [`Condvar`], so readers that need more data block
//! on [`SampleBuffer::wait_for_len`] instead of sleeping in a poll loop.
//!
//! # Example
//!
//! ```rust
//! use magstripe_reader::audio::SampleBuffer;
//!
//! let buf = SampleBuffer::new(44_100);
//! buf.append(&[10, -20, 30]);
//! assert_eq!(buf.len(), 3);
//! assert_eq!(buf.read(1..3), vec![-20, 30]);
//! assert_eq!(buf.get(5), None);
//! ```

use std::ops::Range;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Instant;

use thiserror::Error;

// ---------------------------------------------------------------------------
// WaitError
// ---------------------------------------------------------------------------

/// Why a wait for more samples ended without the requested data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WaitError {
    /// The caller-supplied deadline passed first.
    #[error("timed out waiting for audio samples")]
    TimedOut,

    /// The producer closed the buffer; no more samples will arrive.
    #[error("audio source closed")]
    Closed,
}

// ---------------------------------------------------------------------------
// SampleBuffer
// ---------------------------------------------------------------------------

struct Inner {
    samples: Vec<i16>,
    overflows: u64,
    closed: bool,
}

/// Growing sequence of signed 16-bit mono samples at a fixed rate.
///
/// Shared as `Arc<SampleBuffer>`: one producer calls [`append`](Self::append),
/// one consumer reads.
pub struct SampleBuffer {
    inner: Mutex<Inner>,
    grown: Condvar,
    sample_rate: u32,
}

impl std::fmt::Debug for SampleBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleBuffer")
            .field("sample_rate", &self.sample_rate)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl SampleBuffer {
    /// Create an empty buffer for audio captured at `sample_rate` Hz.
    pub fn new(sample_rate: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                samples: Vec::new(),
                overflows: 0,
                closed: false,
            }),
            grown: Condvar::new(),
            sample_rate,
        }
    }

    /// Create a buffer that already holds `samples` and is closed.
    ///
    /// Used for offline decoding and tests: readers see the whole sequence
    /// and any wait past its end fails with [`WaitError::Closed`].
    pub fn from_samples(sample_rate: u32, samples: Vec<i16>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                samples,
                overflows: 0,
                closed: true,
            }),
            grown: Condvar::new(),
            sample_rate,
        }
    }

    // The lock is never held across user code, so a poisoned mutex still
    // guards a consistent Vec.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sample rate of the stored audio in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Append a block of samples and wake any waiting reader.
    ///
    /// Appends after [`close`](Self::close) are ignored.
    pub fn append(&self, block: &[i16]) {
        if block.is_empty() {
            return;
        }
        {
            let mut inner = self.lock();
            if inner.closed {
                return;
            }
            inner.samples.extend_from_slice(block);
        }
        self.grown.notify_all();
    }

    /// Record that the capture side dropped a block.
    pub fn note_overflow(&self) {
        self.lock().overflows += 1;
    }

    /// Number of capture blocks dropped so far.
    pub fn overflow_count(&self) -> u64 {
        self.lock().overflows
    }

    /// Mark the producer as finished and wake every waiter.
    pub fn close(&self) {
        self.lock().closed = true;
        self.grown.notify_all();
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Current number of samples.
    pub fn len(&self) -> usize {
        self.lock().samples.len()
    }

    /// Returns `true` when no sample has been appended yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sample at `index`, or `None` if it has not been captured yet.
    pub fn get(&self, index: usize) -> Option<i16> {
        self.lock().samples.get(index).copied()
    }

    /// Copy of the samples in `range`, clamped to the current length.
    pub fn read(&self, range: Range<usize>) -> Vec<i16> {
        let inner = self.lock();
        let end = range.end.min(inner.samples.len());
        let start = range.start.min(end);
        inner.samples[start..end].to_vec()
    }

    /// Block until at least `min_len` samples exist and return the length
    /// observed at wake-up.
    ///
    /// With `deadline == None` and an open buffer this waits indefinitely;
    /// bounding it is the caller's job.
    ///
    /// # Errors
    ///
    /// [`WaitError::TimedOut`] once `deadline` passes, or
    /// [`WaitError::Closed`] if the buffer is closed while still short.
    pub fn wait_for_len(
        &self,
        min_len: usize,
        deadline: Option<Instant>,
    ) -> Result<usize, WaitError> {
        let mut inner = self.lock();
        loop {
            if inner.samples.len() >= min_len {
                return Ok(inner.samples.len());
            }
            if inner.closed {
                return Err(WaitError::Closed);
            }
            inner = match deadline {
                None => self.grown.wait(inner).unwrap_or_else(|e| e.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(WaitError::TimedOut);
                    }
                    let (guard, _) = self
                        .grown
                        .wait_timeout(inner, deadline - now)
                        .unwrap_or_else(|e| e.into_inner());
                    guard
                }
            };
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
