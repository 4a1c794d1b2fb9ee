pub mod capture;
pub mod export;
pub mod library;
pub mod messages;
pub mod playback;
pub mod scheduler;
pub mod session;
pub mod settings;
pub mod time;
pub mod trigger;
pub mod view;

pub use capture::{CaptureError, CaptureStream, DefaultMicrophone, Microphone, Recorder};
pub use library::RecordingLibrary;
pub use messages::{Notice, NoticeKind, Notices};
pub use playback::{PlaybackBackend, PlaybackError, PlaybackManager, ToggleOutcome};
pub use scheduler::{BeatSink, ScheduleState, TickScheduler};
pub use session::{Session, SessionConfig, SessionDevices};
pub use settings::{MetronomeSettings, SettingsPatch};
pub use time::{BeatCounter, DEFAULT_PRESETS, DEFAULT_TEMPO, Tempo, TempoRange, TimeSignature};
pub use trigger::{AudioTrigger, ClickOutput};
pub use view::SessionSnapshot;

pub use metro_engine::{AudioContext, InputError};
pub use metro_store::{Recording, RecordingId, StoreError};
pub use metro_transport::SoundType;
