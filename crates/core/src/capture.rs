use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use metro_engine::{InputCapture, InputError};
use metro_store::{Blob, NewRecording};
use metro_transport::AudioArc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

/// An open microphone stream.
pub trait CaptureStream: Send {
    fn sample_rate(&self) -> u32;
    fn channels(&self) -> u16;
    /// Move buffered interleaved samples into `out`.
    fn drain_into(&mut self, out: &mut Vec<f32>) -> usize;
    /// Stop delivering samples. Already buffered samples remain drainable.
    fn stop(&mut self);
}

pub trait Microphone: Send + Sync {
    fn open(&self) -> Result<Box<dyn CaptureStream>, InputError>;
}

impl CaptureStream for InputCapture {
    fn sample_rate(&self) -> u32 {
        InputCapture::sample_rate(self)
    }

    fn channels(&self) -> u16 {
        InputCapture::channels(self)
    }

    fn drain_into(&mut self, out: &mut Vec<f32>) -> usize {
        InputCapture::drain_into(self, out)
    }

    fn stop(&mut self) {
        InputCapture::stop(self)
    }
}

/// The system default input device.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultMicrophone;

impl Microphone for DefaultMicrophone {
    fn open(&self) -> Result<Box<dyn CaptureStream>, InputError> {
        Ok(Box::new(InputCapture::open()?))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("a recording is already in progress")]
    AlreadyRecording,

    #[error("no recording in progress")]
    NotRecording,

    #[error(transparent)]
    Microphone(#[from] InputError),

    #[error("no audio was captured")]
    Empty,

    #[error("could not encode recording: {0}")]
    Encode(#[source] anyhow::Error),
}

impl CaptureError {
    /// Text shown to the user for this failure.
    pub fn user_message(&self) -> &'static str {
        match self {
            CaptureError::AlreadyRecording => "正在录音中",
            CaptureError::NotRecording => "当前没有录音",
            CaptureError::Microphone(InputError::PermissionDenied(_)) => {
                "无法访问麦克风，请确保已授予权限。"
            }
            CaptureError::Microphone(InputError::NoDevice) => "未找到麦克风设备",
            CaptureError::Microphone(InputError::DeviceBusy(_)) => {
                "麦克风正被其他应用占用"
            }
            CaptureError::Microphone(InputError::Unsupported(_)) => {
                "麦克风不支持所需的录音格式"
            }
            CaptureError::Microphone(InputError::Security(_)) => {
                "安全策略禁止访问麦克风"
            }
            CaptureError::Microphone(InputError::Backend(_)) => "录音失败",
            CaptureError::Empty => "没有录到任何声音",
            CaptureError::Encode(_) => "录音保存失败",
        }
    }
}

struct ActiveCapture {
    stream: Arc<Mutex<Box<dyn CaptureStream>>>,
    chunks: Arc<Mutex<Vec<Vec<f32>>>>,
    flusher: JoinHandle<()>,
    mime_type: String,
    sample_rate: u32,
    channels: u16,
    started_at: Instant,
}

/// One microphone capture at a time, buffered into chunks and encoded into
/// a blob on stop.
pub struct Recorder {
    microphone: Arc<dyn Microphone>,
    mime_preferences: Vec<String>,
    flush_interval: Duration,
    active: Option<ActiveCapture>,
}

impl Recorder {
    pub fn new(microphone: Arc<dyn Microphone>) -> Self {
        Self {
            microphone,
            mime_preferences: metro_codec::DEFAULT_PREFERENCES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            active: None,
        }
    }

    pub fn with_mime_preferences(mut self, preferences: Vec<String>) -> Self {
        self.mime_preferences = preferences;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// Time since `start`, for the recording clock.
    pub fn elapsed(&self) -> Option<Duration> {
        self.active.as_ref().map(|a| a.started_at.elapsed())
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.mime_type.as_str())
    }

    /// Open the microphone and start buffering. Must be called inside a
    /// tokio runtime.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        if self.active.is_some() {
            return Err(CaptureError::AlreadyRecording);
        }

        let stream = self.microphone.open()?;
        let sample_rate = stream.sample_rate();
        let channels = stream.channels().max(1);
        let mime_type = metro_codec::negotiate_or_default(&self.mime_preferences);

        let stream = Arc::new(Mutex::new(stream));
        let chunks = Arc::new(Mutex::new(Vec::new()));
        let flusher = tokio::spawn(flush_loop(
            Arc::clone(&stream),
            Arc::clone(&chunks),
            self.flush_interval,
        ));

        log::info!("recording started ({mime_type}, {sample_rate} Hz, {channels} ch)");

        self.active = Some(ActiveCapture {
            stream,
            chunks,
            flusher,
            mime_type,
            sample_rate,
            channels,
            started_at: Instant::now(),
        });
        Ok(())
    }

    /// Stop the microphone and assemble everything captured into a recording.
    pub fn stop(&mut self) -> Result<NewRecording, CaptureError> {
        let active = self.active.take().ok_or(CaptureError::NotRecording)?;
        active.flusher.abort();

        let duration_ms = active.started_at.elapsed().as_millis() as u64;

        // a flush still in flight pushes under the stream lock, so taking the
        // chunks under it too sees every drained sample exactly once
        let chunks = {
            let mut stream = active.stream.lock();
            stream.stop();
            let mut last = Vec::new();
            stream.drain_into(&mut last);
            let mut chunks = std::mem::take(&mut *active.chunks.lock());
            chunks.push(last);
            chunks
        };

        let total: usize = chunks.iter().map(Vec::len).sum();
        let mut samples = Vec::with_capacity(total);
        for chunk in chunks {
            samples.extend_from_slice(&chunk);
        }
        samples.truncate(samples.len() - samples.len() % active.channels as usize);

        if samples.is_empty() {
            log::warn!("recording stopped with no samples");
            return Err(CaptureError::Empty);
        }

        let audio = AudioArc::new(samples, active.sample_rate, active.channels);
        let bytes = metro_codec::encode(&active.mime_type, &audio).map_err(CaptureError::Encode)?;

        log::info!(
            "recording stopped after {duration_ms} ms, {} frames, {} bytes",
            audio.frames(),
            bytes.len()
        );

        Ok(NewRecording {
            date: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            duration_ms,
            blob: Blob::new(active.mime_type, bytes),
        })
    }

    /// Drop the current capture without producing a recording.
    pub fn cancel(&mut self) {
        if let Some(active) = self.active.take() {
            active.flusher.abort();
            active.stream.lock().stop();
            log::info!("recording discarded");
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn flush_loop(
    stream: Arc<Mutex<Box<dyn CaptureStream>>>,
    chunks: Arc<Mutex<Vec<Vec<f32>>>>,
    period: Duration,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let mut guard = stream.lock();
        let mut chunk = Vec::new();
        if guard.drain_into(&mut chunk) > 0 {
            chunks.lock().push(chunk);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::time::sleep;

    /// Produces `samples_per_drain` samples each time it is drained while
    /// running, and `tail` extra samples that only appear after stop.
    pub(crate) struct FakeStream {
        pub samples_per_drain: usize,
        pub tail: usize,
        pub stopped: Arc<AtomicBool>,
    }

    impl CaptureStream for FakeStream {
        fn sample_rate(&self) -> u32 {
            8000
        }

        fn channels(&self) -> u16 {
            1
        }

        fn drain_into(&mut self, out: &mut Vec<f32>) -> usize {
            let n = if self.stopped.load(Ordering::SeqCst) {
                std::mem::take(&mut self.tail)
            } else {
                self.samples_per_drain
            };
            out.extend(std::iter::repeat_n(0.25, n));
            n
        }

        fn stop(&mut self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    pub(crate) enum FakeMicrophone {
        Working { per_drain: usize, tail: usize },
        Failing(InputError),
    }

    impl Microphone for FakeMicrophone {
        fn open(&self) -> Result<Box<dyn CaptureStream>, InputError> {
            match self {
                FakeMicrophone::Working { per_drain, tail } => Ok(Box::new(FakeStream {
                    samples_per_drain: *per_drain,
                    tail: *tail,
                    stopped: Arc::new(AtomicBool::new(false)),
                })),
                FakeMicrophone::Failing(e) => Err(e.clone()),
            }
        }
    }

    fn recorder(mic: FakeMicrophone) -> Recorder {
        Recorder::new(Arc::new(mic))
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_second_capture() {
        let mut rec = recorder(FakeMicrophone::Working {
            per_drain: 800,
            tail: 0,
        });

        rec.start().expect("start");
        sleep(Duration::from_secs(3)).await;
        let recording = rec.stop().expect("stop");

        assert!(recording.duration_ms.abs_diff(3000) <= 5);
        assert_eq!(recording.blob.mime_type, "audio/wav");
        assert!(!recording.blob.is_empty());
        assert!(recording.date.ends_with('Z'));
        assert!(!rec.is_recording());

        let audio = metro_codec::decode_blob(&recording.blob.bytes, &recording.blob.mime_type)
            .expect("decode");
        assert_eq!(audio.sample_rate(), 8000);
        assert!(audio.frames() >= 800 * 30);
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_drain_after_stop_is_kept() {
        let mut rec = recorder(FakeMicrophone::Working {
            per_drain: 0,
            tail: 400,
        });

        rec.start().unwrap();
        sleep(Duration::from_millis(350)).await;
        let recording = rec.stop().expect("tail samples make it non-empty");

        let audio =
            metro_codec::decode_blob(&recording.blob.bytes, "audio/wav").expect("decode");
        assert_eq!(audio.frames(), 400);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_capture_is_empty_error() {
        let mut rec = recorder(FakeMicrophone::Working {
            per_drain: 0,
            tail: 0,
        });

        rec.start().unwrap();
        sleep(Duration::from_millis(500)).await;

        let err = rec.stop().unwrap_err();
        assert!(matches!(err, CaptureError::Empty));
        assert_eq!(err.user_message(), "没有录到任何声音");
    }

    struct CountingMicrophone {
        produced: Arc<std::sync::atomic::AtomicUsize>,
    }

    struct CountingStream {
        produced: Arc<std::sync::atomic::AtomicUsize>,
        stopped: bool,
    }

    impl CaptureStream for CountingStream {
        fn sample_rate(&self) -> u32 {
            8000
        }

        fn channels(&self) -> u16 {
            1
        }

        fn drain_into(&mut self, out: &mut Vec<f32>) -> usize {
            if self.stopped {
                return 0;
            }
            out.extend(std::iter::repeat_n(0.5, 16));
            self.produced.fetch_add(16, Ordering::SeqCst);
            16
        }

        fn stop(&mut self) {
            self.stopped = true;
        }
    }

    impl Microphone for CountingMicrophone {
        fn open(&self) -> Result<Box<dyn CaptureStream>, InputError> {
            Ok(Box::new(CountingStream {
                produced: Arc::clone(&self.produced),
                stopped: false,
            }))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_every_drained_sample_is_kept_across_threads() {
        for _ in 0..20 {
            let produced = Arc::new(std::sync::atomic::AtomicUsize::new(0));
            let mut rec = Recorder::new(Arc::new(CountingMicrophone {
                produced: Arc::clone(&produced),
            }))
            .with_flush_interval(Duration::from_millis(1));

            rec.start().unwrap();
            sleep(Duration::from_millis(15)).await;
            let recording = rec.stop().expect("samples were captured");

            let audio = metro_codec::decode_blob(&recording.blob.bytes, "audio/wav")
                .expect("decode");
            assert_eq!(audio.frames(), produced.load(Ordering::SeqCst));
        }
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let mut rec = recorder(FakeMicrophone::Working {
            per_drain: 10,
            tail: 0,
        });

        rec.start().unwrap();
        assert!(matches!(rec.start(), Err(CaptureError::AlreadyRecording)));
        rec.cancel();
        assert!(matches!(rec.stop(), Err(CaptureError::NotRecording)));
    }

    #[tokio::test]
    async fn test_microphone_errors_keep_their_category() {
        let mut rec = recorder(FakeMicrophone::Failing(InputError::PermissionDenied(
            "denied".into(),
        )));

        let err = rec.start().unwrap_err();
        assert!(matches!(
            err,
            CaptureError::Microphone(InputError::PermissionDenied(_))
        ));
        assert_eq!(err.user_message(), "无法访问麦克风，请确保已授予权限。");
        assert!(!rec.is_recording());
    }

    #[tokio::test]
    async fn test_unsupported_preferences_fall_back_to_wav() {
        let mut rec = recorder(FakeMicrophone::Working {
            per_drain: 10,
            tail: 10,
        })
        .with_mime_preferences(vec!["audio/webm;codecs=opus".into()]);

        rec.start().unwrap();
        assert_eq!(rec.mime_type(), Some("audio/wav"));
        let recording = rec.stop().unwrap();
        assert_eq!(recording.blob.mime_type, "audio/wav");
    }
}
