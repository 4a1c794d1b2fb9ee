use std::sync::Arc;

use metro_engine::AudioContext;
use metro_store::{Recording, RecordingId};
use metro_transport::{AudioArc, Command, Status, TakeId};
use parking_lot::Mutex;
use tokio::sync::watch;

/// Where decoded recordings are played. Implemented by [`AudioContext`].
pub trait PlaybackBackend: Send {
    /// Hand `audio` to the output and start it. Returns its length in the
    /// frames that later [`Status::TakePosition`] reports use.
    fn start(&mut self, take: TakeId, audio: &AudioArc) -> anyhow::Result<u64>;
    /// Resume a paused take.
    fn play(&mut self, take: TakeId);
    fn pause(&mut self, take: TakeId);
    fn release(&mut self, take: TakeId);
    fn poll(&mut self) -> Vec<Status>;
}

impl PlaybackBackend for AudioContext {
    fn start(&mut self, take: TakeId, audio: &AudioArc) -> anyhow::Result<u64> {
        let engine = self
            .ensure_running()
            .ok_or_else(|| anyhow::anyhow!("no audio output available"))?;
        engine.start_take(take, audio)
    }

    fn play(&mut self, take: TakeId) {
        // the output may have been suspended while the take was paused
        let Some(engine) = self.ensure_running() else {
            return;
        };
        if let Err(e) = engine.send(Command::PlayTake(take)) {
            log::warn!("resume of take {} dropped: {e}", take.0);
        }
    }

    fn pause(&mut self, take: TakeId) {
        send(self, Command::PauseTake(take));
    }

    fn release(&mut self, take: TakeId) {
        send(self, Command::ReleaseTake(take));
    }

    fn poll(&mut self) -> Vec<Status> {
        AudioContext::poll(self)
    }
}

fn send(ctx: &mut AudioContext, command: Command) {
    if let Some(engine) = ctx.engine() {
        if let Err(e) = engine.send(command) {
            log::warn!("{command:?} dropped: {e}");
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("could not decode recording: {0}")]
    Decode(#[source] anyhow::Error),

    #[error("could not start playback: {0}")]
    Output(#[source] anyhow::Error),

    #[error("recording {0} not found")]
    NotFound(RecordingId),
}

impl PlaybackError {
    pub fn user_message(&self) -> &'static str {
        match self {
            PlaybackError::NotFound(_) => "录音不存在",
            _ => "播放失败",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    Started,
    Paused,
    Resumed,
}

#[derive(Debug, Clone, Copy)]
struct ActiveTake {
    recording: RecordingId,
    take: TakeId,
    frames: u64,
    playing: bool,
}

/// At most one recording playing at a time, with progress published on a
/// watch channel.
pub struct PlaybackManager {
    backend: Arc<Mutex<dyn PlaybackBackend>>,
    active: Option<ActiveTake>,
    next_take: u64,
    progress: watch::Sender<f64>,
}

impl PlaybackManager {
    pub fn new(backend: Arc<Mutex<dyn PlaybackBackend>>) -> Self {
        let (progress, _) = watch::channel(0.0);
        Self {
            backend,
            active: None,
            next_take: 1,
            progress,
        }
    }

    /// Pause or resume `recording` if it is the active one, otherwise
    /// replace whatever is playing with it.
    pub fn toggle(&mut self, recording: &Recording) -> Result<ToggleOutcome, PlaybackError> {
        if let Some(active) = self.active.as_mut() {
            if active.recording == recording.id {
                let mut backend = self.backend.lock();
                return Ok(if active.playing {
                    backend.pause(active.take);
                    active.playing = false;
                    ToggleOutcome::Paused
                } else {
                    backend.play(active.take);
                    active.playing = true;
                    ToggleOutcome::Resumed
                });
            }
        }

        self.stop();

        let audio = metro_codec::decode_blob(&recording.blob.bytes, &recording.blob.mime_type)
            .map_err(PlaybackError::Decode)?;
        if audio.is_empty() {
            return Err(PlaybackError::Decode(anyhow::anyhow!(
                "recording {} has no audio",
                recording.id
            )));
        }

        let take = TakeId(self.next_take);
        self.next_take += 1;

        let frames = self
            .backend
            .lock()
            .start(take, &audio)
            .map_err(PlaybackError::Output)?;

        log::debug!("playing recording {} as take {}", recording.id, take.0);

        self.active = Some(ActiveTake {
            recording: recording.id,
            take,
            frames,
            playing: true,
        });
        self.progress.send_replace(0.0);
        Ok(ToggleOutcome::Started)
    }

    /// Apply engine reports. Returns the recording that just finished, if any.
    pub fn poll(&mut self) -> Option<RecordingId> {
        let statuses = self.backend.lock().poll();
        let mut finished = None;

        for status in statuses {
            let Some(active) = self.active else {
                continue;
            };
            match status {
                Status::TakePosition { take, frame } if take == active.take => {
                    let percent = if active.frames == 0 {
                        0.0
                    } else {
                        (frame as f64 / active.frames as f64 * 100.0).min(100.0)
                    };
                    self.progress.send_replace(percent);
                }
                Status::TakeEnded(take) if take == active.take => {
                    self.stop();
                    finished = Some(active.recording);
                }
                _ => {}
            }
        }

        finished
    }

    /// Release the active take and zero the progress.
    pub fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            self.backend.lock().release(active.take);
        }
        self.progress.send_replace(0.0);
    }

    /// Stop only if `id` is the active recording.
    pub fn stop_if_active(&mut self, id: RecordingId) -> bool {
        if self.active_recording() == Some(id) {
            self.stop();
            true
        } else {
            false
        }
    }

    pub fn active_recording(&self) -> Option<RecordingId> {
        self.active.map(|a| a.recording)
    }

    pub fn is_playing(&self) -> bool {
        self.active.is_some_and(|a| a.playing)
    }

    pub fn progress(&self) -> f64 {
        *self.progress.borrow()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<f64> {
        self.progress.subscribe()
    }
}

impl Drop for PlaybackManager {
    fn drop(&mut self) {
        self.stop();
    }
}
