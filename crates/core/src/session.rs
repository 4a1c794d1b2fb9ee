use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use metro_engine::AudioContext;
use metro_store::{
    LAST_TEMPO_KEY, PreferenceStore, Recording, RecordingId, RecordingStore, SETTINGS_KEY,
};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::capture::{DEFAULT_FLUSH_INTERVAL, DefaultMicrophone, Microphone, Recorder};
use crate::export;
use crate::library::RecordingLibrary;
use crate::messages::{DEFAULT_NOTICE_TTL, Notice, Notices};
use crate::playback::{PlaybackBackend, PlaybackManager, ToggleOutcome};
use crate::scheduler::TickScheduler;
use crate::settings::{MetronomeSettings, SettingsPatch};
use crate::time::{DEFAULT_PRESETS, DEFAULT_TEMPO, Tempo, TempoRange};
use crate::trigger::{AudioTrigger, ClickOutput};
use crate::view::{self, RecorderView, RecordingRow, SessionSnapshot};

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub tempo_range: TempoRange,
    pub default_tempo: u32,
    pub presets: Vec<u32>,
    /// Holds `preferences.json` and the `recordings/` store.
    pub data_dir: PathBuf,
    pub flush_interval: Duration,
    pub mime_preferences: Vec<String>,
    pub notice_ttl: Duration,
}

impl SessionConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            tempo_range: TempoRange::default(),
            default_tempo: DEFAULT_TEMPO,
            presets: DEFAULT_PRESETS.to_vec(),
            data_dir: data_dir.into(),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            mime_preferences: metro_codec::DEFAULT_PREFERENCES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            notice_ttl: DEFAULT_NOTICE_TTL,
        }
    }

    fn preferences_path(&self) -> PathBuf {
        self.data_dir.join("preferences.json")
    }
}

/// Where clicks go, where recordings play and where they are captured from.
pub struct SessionDevices {
    pub clicks: Arc<Mutex<dyn ClickOutput>>,
    pub playback: Arc<Mutex<dyn PlaybackBackend>>,
    pub microphone: Arc<dyn Microphone>,
    context: Option<Arc<Mutex<AudioContext>>>,
}

impl SessionDevices {
    /// The default output and input devices, sharing one lazily opened
    /// [`AudioContext`].
    pub fn system() -> Self {
        let context = Arc::new(Mutex::new(AudioContext::new()));
        Self {
            clicks: context.clone(),
            playback: context.clone(),
            microphone: Arc::new(DefaultMicrophone),
            context: Some(context),
        }
    }

    pub fn custom(
        clicks: Arc<Mutex<dyn ClickOutput>>,
        playback: Arc<Mutex<dyn PlaybackBackend>>,
        microphone: Arc<dyn Microphone>,
    ) -> Self {
        Self {
            clicks,
            playback,
            microphone,
            context: None,
        }
    }
}

/// Everything the metronome and the practice recorder need, behind one set
/// of operations. Failures never escape: each one is logged and shown as an
/// error notice.
pub struct Session {
    config: SessionConfig,
    settings: watch::Sender<MetronomeSettings>,
    trigger: Arc<AudioTrigger>,
    scheduler: TickScheduler,
    recorder: Recorder,
    library: RecordingLibrary,
    preferences: PreferenceStore,
    notices: Notices,
    context: Option<Arc<Mutex<AudioContext>>>,
    closed: bool,
}

impl Session {
    /// Restore the last tempo and settings and load the recording list.
    /// Must be called inside a tokio runtime.
    pub async fn open(config: SessionConfig, devices: SessionDevices) -> Self {
        let preferences = PreferenceStore::open(config.preferences_path()).await;
        let tempo = restore_tempo(&preferences, &config);
        let settings = preferences
            .get_json::<MetronomeSettings>(SETTINGS_KEY)
            .map(MetronomeSettings::sanitized)
            .unwrap_or_default();

        log::info!(
            "session opened at {tempo}, {} ({})",
            settings.time_signature,
            settings.sound_type.as_str()
        );

        let (settings_tx, settings_rx) = watch::channel(settings);
        let trigger = Arc::new(AudioTrigger::new(settings_rx, devices.clicks));
        let scheduler = TickScheduler::new(
            trigger.clone(),
            tempo,
            settings.time_signature.beats_per_bar(),
        );

        let recorder = Recorder::new(devices.microphone)
            .with_mime_preferences(config.mime_preferences.clone())
            .with_flush_interval(config.flush_interval);

        let mut library = RecordingLibrary::new(
            RecordingStore::new(&config.data_dir),
            PlaybackManager::new(devices.playback),
        );

        let mut notices = Notices::new(config.notice_ttl);
        if let Err(e) = library.init().await {
            log::error!("could not open recording store: {e}");
            notices.error("录音库加载失败");
        }

        Self {
            config,
            settings: settings_tx,
            trigger,
            scheduler,
            recorder,
            library,
            preferences,
            notices,
            context: devices.context,
            closed: false,
        }
    }

    /// Start the metronome. The output is made ready first so the first
    /// bar keeps its spacing.
    pub fn play(&mut self) {
        if !self.scheduler.is_playing() {
            self.trigger.prepare_output();
            self.scheduler.start();
        }
    }

    pub fn stop(&mut self) {
        if self.scheduler.is_playing() {
            self.scheduler.stop();
            self.idle_if_silent();
        }
    }

    fn idle_if_silent(&self) {
        if !self.scheduler.is_playing() && !self.library.playback().is_playing() {
            self.trigger.idle_output();
        }
    }

    pub fn toggle_play(&mut self) {
        if self.scheduler.is_playing() {
            self.stop();
        } else {
            self.play();
        }
    }

    /// Clamp, apply and persist a new tempo.
    pub async fn set_tempo(&mut self, bpm: u32) -> Tempo {
        let tempo = self.config.tempo_range.clamp(bpm);
        self.scheduler.change_tempo(tempo);

        if let Err(e) = self
            .preferences
            .set(LAST_TEMPO_KEY, tempo.bpm().to_string())
            .await
        {
            log::error!("could not save tempo: {e}");
            self.notices.error("设置保存失败");
        }
        tempo
    }

    pub async fn apply_preset(&mut self, bpm: u32) -> Tempo {
        self.set_tempo(bpm).await
    }

    pub fn begin_drag(&mut self) {
        self.scheduler.begin_drag();
    }

    /// Move the tempo control while it is held.
    pub async fn drag_to(&mut self, bpm: u32) -> Tempo {
        self.begin_drag();
        self.set_tempo(bpm).await
    }

    pub fn end_drag(&mut self) {
        self.scheduler.end_drag();
    }

    pub async fn update_settings(&mut self, patch: &SettingsPatch) {
        let mut settings = *self.settings.borrow();
        settings.apply(patch);
        self.replace_settings(settings).await;
    }

    pub async fn reset_settings(&mut self) {
        self.replace_settings(MetronomeSettings::default()).await;
    }

    async fn replace_settings(&mut self, settings: MetronomeSettings) {
        self.settings.send_replace(settings);
        self.scheduler
            .set_beats_per_bar(settings.time_signature.beats_per_bar());

        if let Err(e) = self.preferences.set_json(SETTINGS_KEY, &settings).await {
            log::error!("could not save settings: {e}");
            self.notices.error("设置保存失败");
        }
    }

    /// Start a capture, or stop the running one and save it.
    pub async fn toggle_recording(&mut self) -> Option<RecordingId> {
        if self.recorder.is_recording() {
            self.stop_recording().await
        } else {
            self.start_recording();
            None
        }
    }

    pub fn start_recording(&mut self) -> bool {
        match self.recorder.start() {
            Ok(()) => {
                self.notices.info("开始录音");
                true
            }
            Err(e) => {
                log::error!("recording failed to start: {e}");
                self.notices.error(e.user_message());
                false
            }
        }
    }

    pub async fn stop_recording(&mut self) -> Option<RecordingId> {
        let recording = match self.recorder.stop() {
            Ok(recording) => recording,
            Err(e) => {
                log::error!("recording failed: {e}");
                self.notices.error(e.user_message());
                return None;
            }
        };

        match self.library.add(recording).await {
            Ok(id) => {
                self.notices.success("录音已保存");
                Some(id)
            }
            Err(e) => {
                log::error!("could not store recording: {e}");
                self.notices.error("保存录音失败");
                None
            }
        }
    }

    pub async fn refresh_recordings(&mut self) {
        if let Err(e) = self.library.refresh().await {
            log::error!("could not list recordings: {e}");
            self.notices.error("录音库加载失败");
        }
    }

    pub fn toggle_playback(&mut self, id: RecordingId) -> Option<ToggleOutcome> {
        match self.library.toggle(id) {
            Ok(outcome) => {
                if outcome == ToggleOutcome::Paused {
                    self.idle_if_silent();
                }
                Some(outcome)
            }
            Err(e) => {
                log::error!("playback of recording {id} failed: {e}");
                self.notices.error(e.user_message());
                None
            }
        }
    }

    pub async fn delete_recording(&mut self, id: RecordingId) -> bool {
        match self.library.delete(id).await {
            Ok(true) => {
                self.notices.success("录音已删除");
                true
            }
            Ok(false) => {
                log::warn!("recording {id} was already gone");
                self.notices.warning("录音不存在");
                false
            }
            Err(e) => {
                log::error!("could not delete recording {id}: {e}");
                self.notices.error("删除录音失败");
                false
            }
        }
    }

    pub async fn export_recording(&mut self, id: RecordingId, dir: &Path) -> Option<PathBuf> {
        let Some(recording) = self.library.get(id) else {
            self.notices.warning("录音不存在");
            return None;
        };

        match export::export_to_dir(recording, dir, &Local::now()).await {
            Ok(path) => {
                self.notices.success("录音已导出");
                Some(path)
            }
            Err(e) => {
                log::error!("could not export recording {id}: {e}");
                self.notices.error("导出失败");
                None
            }
        }
    }

    /// Apply playback reports and expire old notices. Call this regularly.
    pub fn poll(&mut self) {
        if let Some(id) = self.library.playback_mut().poll() {
            log::debug!("recording {id} finished playing");
            self.idle_if_silent();
        }
        self.notices.expire();
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let tempo = self.scheduler.tempo();
        let settings = *self.settings.borrow();
        let current_beat = self.trigger.current_beat();
        let playing = self.scheduler.is_playing();
        let dragging = self.scheduler.is_dragging();

        let playback = self.library.playback();
        let now = Local::now();
        let recordings = self
            .library
            .recordings()
            .iter()
            .map(|r| {
                let active = playback.active_recording() == Some(r.id);
                RecordingRow {
                    id: r.id.0,
                    label: export::recording_label(r, &now),
                    duration: export::format_duration(r.duration_ms),
                    playing: active && playback.is_playing(),
                    paused: active && !playback.is_playing(),
                    progress: if active { playback.progress() } else { 0.0 },
                }
            })
            .collect();

        SessionSnapshot {
            tempo: tempo.bpm(),
            tempo_range: self.config.tempo_range,
            playing,
            dragging,
            current_beat,
            beats: view::beat_cells(self.scheduler.beats_per_bar(), current_beat),
            pendulum: view::pendulum(tempo, self.config.tempo_range, playing && !dragging),
            presets: view::preset_buttons(&self.config.presets, tempo),
            settings,
            recorder: RecorderView {
                recording: self.recorder.is_recording(),
                clock: view::format_clock(self.recorder.elapsed().unwrap_or_default()),
            },
            recordings,
            notices: self.notices.active().cloned().collect(),
        }
    }

    pub fn tempo(&self) -> Tempo {
        self.scheduler.tempo()
    }

    pub fn is_playing(&self) -> bool {
        self.scheduler.is_playing()
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    pub fn settings(&self) -> MetronomeSettings {
        *self.settings.borrow()
    }

    pub fn subscribe_settings(&self) -> watch::Receiver<MetronomeSettings> {
        self.settings.subscribe()
    }

    pub fn subscribe_beat(&self) -> watch::Receiver<Option<u32>> {
        self.trigger.subscribe_beat()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<f64> {
        self.library.playback().subscribe_progress()
    }

    pub fn scheduler(&self) -> &TickScheduler {
        &self.scheduler
    }

    pub fn recordings(&self) -> &[Recording] {
        self.library.recordings()
    }

    pub fn library(&self) -> &RecordingLibrary {
        &self.library
    }

    pub fn notices(&self) -> &Notices {
        &self.notices
    }

    pub fn latest_notice(&self) -> Option<&Notice> {
        self.notices.latest()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Stop everything and release the audio devices. Safe to call twice.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.scheduler.stop();
        self.recorder.cancel();
        self.library.playback_mut().stop();
        if let Some(context) = &self.context {
            context.lock().dispose();
        }
        log::info!("session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn restore_tempo(preferences: &PreferenceStore, config: &SessionConfig) -> Tempo {
    let saved = preferences.get(LAST_TEMPO_KEY).and_then(|raw| {
        raw.trim()
            .parse::<u32>()
            .map_err(|e| log::warn!("ignoring saved tempo '{raw}': {e}"))
            .ok()
    });
    config
        .tempo_range
        .clamp(saved.unwrap_or(config.default_tempo))
}
