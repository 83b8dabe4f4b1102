//! Read-head capture via `cpal`.
//!
//! [`AudioCapture`] wraps the cpal host/device/stream lifecycle. Call
//! [`AudioCapture::start`] to stream mono `i16` blocks into a shared
//! [`SampleBuffer`]. The returned [`StreamHandle`] is a RAII guard:
//! dropping it stops the cpal stream and closes the buffer.
//!
//! The cpal callback never touches the buffer's lock directly. It converts
//! the block and hands it to a bounded channel; a feeder thread appends it.
//! When the channel is full the block is dropped and counted as an overflow.

use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;

use crate::audio::buffer::SampleBuffer;

/// Capture blocks that may queue between the callback and the feeder.
const BLOCK_QUEUE: usize = 64;

// ---------------------------------------------------------------------------
// Sample conversion
// ---------------------------------------------------------------------------

/// Average interleaved frames down to one channel.
///
/// `channels == 0` yields an empty vector; `1` copies the input.
pub fn downmix_to_mono(samples: &[i16], channels: u16) -> Vec<i16> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| {
                    let sum: i32 = frame.iter().map(|&s| i32::from(s)).sum();
                    (sum / n as i32) as i16
                })
                .collect()
        }
    }
}

/// Convert a `[-1.0, 1.0]` float sample to `i16`, saturating outside that range.
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16
}

/// Convert an offset-binary `u16` sample to `i16`.
#[inline]
pub fn u16_to_i16(sample: u16) -> i16 {
    (i32::from(sample) - 32_768) as i16
}

// ---------------------------------------------------------------------------
// StreamHandle
// ---------------------------------------------------------------------------

/// RAII guard that keeps the cpal stream alive.
///
/// Dropping it stops the hardware stream, closes the [`SampleBuffer`] so
/// blocked readers wake up, and joins the feeder thread.
pub struct StreamHandle {
    stream: Option<cpal::Stream>,
    feeder: Option<JoinHandle<()>>,
    buffer: Arc<SampleBuffer>,
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        // Dropping the stream drops the callback and with it the last sender,
        // which ends the feeder loop.
        drop(self.stream.take());
        if let Some(feeder) = self.feeder.take() {
            if feeder.join().is_err() {
                log::warn!("capture: feeder thread panicked");
            }
        }
        self.buffer.close();
        log::debug!(
            "capture: stopped after {} samples, {} dropped blocks",
            self.buffer.len(),
            self.buffer.overflow_count()
        );
    }
}

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

/// Errors that can occur while opening or starting the capture device.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no input device found on the default audio host")]
    NoDevice,

    #[error("input device #{index} does not exist ({available} available)")]
    DeviceIndex { index: usize, available: usize },

    #[error("failed to enumerate input devices: {0}")]
    Devices(#[from] cpal::DevicesError),

    #[error("failed to query default input config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(cpal::SampleFormat),

    #[error("failed to spawn capture feeder thread: {0}")]
    Spawn(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// AudioCapture
// ---------------------------------------------------------------------------

/// Sound-card input wrapper built on top of `cpal`.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use magstripe_reader::audio::{AudioCapture, SampleBuffer};
///
/// let capture = AudioCapture::open(None).unwrap();
/// let buffer = Arc::new(SampleBuffer::new(capture.sample_rate()));
/// let _handle = capture.start(Arc::clone(&buffer)).unwrap();
/// // `_handle` keeps the stream alive; drop it to stop capturing.
/// ```
pub struct AudioCapture {
    device: cpal::Device,
    config: cpal::StreamConfig,
    format: cpal::SampleFormat,
    name: String,
}

impl AudioCapture {
    /// Names of all input devices on the default host, in selection order.
    pub fn list_devices() -> Result<Vec<String>, CaptureError> {
        let host = cpal::default_host();
        let names = host
            .input_devices()?
            .map(|d| d.name().unwrap_or_else(|_| "Unknown Device".to_string()))
            .collect();
        Ok(names)
    }

    /// Open the input device at `index` (as listed by
    /// [`list_devices`](Self::list_devices)), or the host default when `None`.
    ///
    /// # Errors
    ///
    /// [`CaptureError::NoDevice`] / [`CaptureError::DeviceIndex`] when the
    /// device does not exist, [`CaptureError::DefaultConfig`] when it cannot
    /// report a stream configuration.
    pub fn open(index: Option<usize>) -> Result<Self, CaptureError> {
        let host = cpal::default_host();
        let device = match index {
            Some(index) => {
                let devices: Vec<cpal::Device> = host.input_devices()?.collect();
                let available = devices.len();
                devices
                    .into_iter()
                    .nth(index)
                    .ok_or(CaptureError::DeviceIndex { index, available })?
            }
            None => host.default_input_device().ok_or(CaptureError::NoDevice)?,
        };

        let supported = device.default_input_config()?;
        let format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();
        let name = device
            .name()
            .unwrap_or_else(|_| "Unknown Device".to_string());

        Ok(Self {
            device,
            config,
            format,
            name,
        })
    }

    /// Start capturing into `buffer`.
    ///
    /// # Errors
    ///
    /// [`CaptureError::BuildStream`] or [`CaptureError::PlayStream`] if the
    /// platform rejects the stream, [`CaptureError::UnsupportedFormat`] for
    /// sample formats other than `i16`, `u16` and `f32`.
    pub fn start(&self, buffer: Arc<SampleBuffer>) -> Result<StreamHandle, CaptureError> {
        let channels = self.config.channels;
        let (tx, rx) = mpsc::sync_channel::<Vec<i16>>(BLOCK_QUEUE);

        let feeder_buf = Arc::clone(&buffer);
        let feeder = std::thread::Builder::new()
            .name("capture-feeder".into())
            .spawn(move || {
                while let Ok(block) = rx.recv() {
                    feeder_buf.append(&block);
                }
            })?;

        let stream = match self.format {
            cpal::SampleFormat::I16 => self.build(tx, Arc::clone(&buffer), move |data: &[i16]| {
                downmix_to_mono(data, channels)
            })?,
            cpal::SampleFormat::U16 => self.build(tx, Arc::clone(&buffer), move |data: &[u16]| {
                let signed: Vec<i16> = data.iter().map(|&s| u16_to_i16(s)).collect();
                downmix_to_mono(&signed, channels)
            })?,
            cpal::SampleFormat::F32 => self.build(tx, Arc::clone(&buffer), move |data: &[f32]| {
                let signed: Vec<i16> = data.iter().map(|&s| f32_to_i16(s)).collect();
                downmix_to_mono(&signed, channels)
            })?,
            other => return Err(CaptureError::UnsupportedFormat(other)),
        };

        stream.play()?;
        log::info!(
            "capture: '{}' started ({} Hz, {} ch, {:?})",
            self.name,
            self.sample_rate(),
            channels,
            self.format
        );

        Ok(StreamHandle {
            stream: Some(stream),
            feeder: Some(feeder),
            buffer,
        })
    }

    fn build<T, F>(
        &self,
        tx: SyncSender<Vec<i16>>,
        buffer: Arc<SampleBuffer>,
        convert: F,
    ) -> Result<cpal::Stream, CaptureError>
    where
        T: cpal::SizedSample,
        F: Fn(&[T]) -> Vec<i16> + Send + 'static,
    {
        let stream = self.device.build_input_stream(
            &self.config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                match tx.try_send(convert(data)) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        buffer.note_overflow();
                        log::warn!("capture: input overflow, block dropped");
                    }
                    // Feeder gone; the handle is being dropped.
                    Err(TrySendError::Disconnected(_)) => {}
                }
            },
            |err: cpal::StreamError| {
                log::error!("cpal stream error: {err}");
            },
            None,
        )?;
        Ok(stream)
    }

    /// Native sample rate of the capture stream in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    /// Human-readable device name.
    pub fn device_name(&self) -> &str {
        &self.name
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
