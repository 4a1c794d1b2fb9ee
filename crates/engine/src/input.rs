use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;

use cpal::{
    FromSample, SizedSample,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};
use crossbeam_channel::Sender;

/// Seconds of audio the input ring can hold between drains.
const RING_SECONDS: usize = 4;

/// Why the microphone could not be opened.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InputError {
    #[error("no input device found")]
    NoDevice,
    #[error("microphone access denied: {0}")]
    PermissionDenied(String),
    #[error("input device is busy: {0}")]
    DeviceBusy(String),
    #[error("input device cannot satisfy the requested format: {0}")]
    Unsupported(String),
    #[error("microphone blocked by security policy: {0}")]
    Security(String),
    #[error("input backend error: {0}")]
    Backend(String),
}

impl InputError {
    /// Map a host specific error description onto the closest category.
    pub fn from_backend(description: &str) -> Self {
        let lower = description.to_ascii_lowercase();
        let has = |words: &[&str]| words.iter().any(|w| lower.contains(w));

        if has(&["permission", "denied", "not authorized", "not allowed"]) {
            InputError::PermissionDenied(description.to_owned())
        } else if has(&["busy", "in use", "exclusive"]) {
            InputError::DeviceBusy(description.to_owned())
        } else if has(&["security", "policy", "sandbox"]) {
            InputError::Security(description.to_owned())
        } else if has(&["no such device", "not found", "unavailable"]) {
            InputError::NoDevice
        } else {
            InputError::Backend(description.to_owned())
        }
    }
}

impl From<cpal::DefaultStreamConfigError> for InputError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        match err {
            cpal::DefaultStreamConfigError::DeviceNotAvailable => InputError::NoDevice,
            cpal::DefaultStreamConfigError::StreamTypeNotSupported => {
                InputError::Unsupported(err.to_string())
            }
            cpal::DefaultStreamConfigError::BackendSpecific { err } => {
                InputError::from_backend(&err.description)
            }
        }
    }
}

impl From<cpal::BuildStreamError> for InputError {
    fn from(err: cpal::BuildStreamError) -> Self {
        match err {
            cpal::BuildStreamError::DeviceNotAvailable => InputError::NoDevice,
            cpal::BuildStreamError::StreamConfigNotSupported
            | cpal::BuildStreamError::InvalidArgument => InputError::Unsupported(err.to_string()),
            cpal::BuildStreamError::BackendSpecific { err } => {
                InputError::from_backend(&err.description)
            }
            other => InputError::Backend(other.to_string()),
        }
    }
}

impl From<cpal::PlayStreamError> for InputError {
    fn from(err: cpal::PlayStreamError) -> Self {
        match err {
            cpal::PlayStreamError::DeviceNotAvailable => InputError::NoDevice,
            cpal::PlayStreamError::BackendSpecific { err } => {
                InputError::from_backend(&err.description)
            }
        }
    }
}

/// A running microphone stream.
///
/// The cpal stream lives on its own thread and pushes interleaved f32
/// samples into a lock-free ring; [`InputCapture::drain_into`] empties it.
pub struct InputCapture {
    samples: rtrb::Consumer<f32>,
    sample_rate: u32,
    channels: u16,
    dropped: Arc<AtomicUsize>,
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl InputCapture {
    /// Open the default input device with its default configuration.
    pub fn open() -> Result<Self, InputError> {
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let dropped = Arc::new(AtomicUsize::new(0));
        let dropped_in = Arc::clone(&dropped);

        let thread = std::thread::Builder::new()
            .name("metro-input".into())
            .spawn(move || {
                let opened = open_input(dropped_in);
                let stream = match opened {
                    Ok((stream, consumer, format)) => {
                        let _ = ready_tx.send(Ok((consumer, format)));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let _ = stop_rx.recv();
                if let Err(e) = stream.pause() {
                    log::debug!("pausing input stream failed: {e}");
                }
                drop(stream);
            })
            .map_err(|e| InputError::Backend(e.to_string()))?;

        let (samples, (sample_rate, channels)) = match ready_rx.recv() {
            Ok(Ok(ready)) => ready,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(InputError::Backend("input thread exited early".into()));
            }
        };

        log::info!("microphone open at {sample_rate} Hz, {channels} channel(s)");

        Ok(Self {
            samples,
            sample_rate,
            channels,
            dropped,
            stop_tx,
            thread: Some(thread),
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Move every buffered sample into `out`, returning how many were moved.
    pub fn drain_into(&mut self, out: &mut Vec<f32>) -> usize {
        let available = self.samples.slots();
        if available == 0 {
            return 0;
        }
        match self.samples.read_chunk(available) {
            Ok(chunk) => {
                let (first, second) = chunk.as_slices();
                out.extend_from_slice(first);
                out.extend_from_slice(second);
                chunk.commit_all();
                available
            }
            Err(_) => 0,
        }
    }

    /// Stop the stream and wait for its thread. Samples already in the ring
    /// stay there for a final [`InputCapture::drain_into`].
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.stop_tx.send(());
        if thread.join().is_err() {
            log::error!("input thread panicked");
        }

        let dropped = self.dropped.load(Ordering::Relaxed);
        if dropped > 0 {
            log::warn!("input ring overflowed, {dropped} samples lost");
        }
    }
}

impl Drop for InputCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

type Opened = (cpal::Stream, rtrb::Consumer<f32>, (u32, u16));

fn open_input(dropped: Arc<AtomicUsize>) -> Result<Opened, InputError> {
    let host = cpal::default_host();
    let device = host.default_input_device().ok_or(InputError::NoDevice)?;

    let config = device.default_input_config()?;
    let sample_format = config.sample_format();
    let config: cpal::StreamConfig = config.into();
    let format = (config.sample_rate.0, config.channels);

    let capacity = config.sample_rate.0 as usize * config.channels as usize * RING_SECONDS;
    let (producer, consumer) = rtrb::RingBuffer::<f32>::new(capacity);

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_input::<f32>(&device, &config, producer, dropped)?,
        cpal::SampleFormat::I16 => build_input::<i16>(&device, &config, producer, dropped)?,
        cpal::SampleFormat::U16 => build_input::<u16>(&device, &config, producer, dropped)?,
        other => {
            return Err(InputError::Unsupported(format!(
                "sample format '{other}'"
            )));
        }
    };

    stream.play()?;

    Ok((stream, consumer, format))
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut producer: rtrb::Producer<f32>,
    dropped: Arc<AtomicUsize>,
) -> Result<cpal::Stream, InputError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            for &sample in data {
                if producer.push(f32::from_sample_(sample)).is_err() {
                    dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        },
        |err| log::error!("input stream error: {err}"),
        None,
    )?;

    Ok(stream)
}
