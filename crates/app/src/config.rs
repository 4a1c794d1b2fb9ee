use metro_core::{DEFAULT_PRESETS, DEFAULT_TEMPO, SessionConfig, TempoRange};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TempoConfig {
    pub min: u32,
    pub max: u32,
    pub default: u32,
    pub presets: Vec<u32>,
}

impl Default for TempoConfig {
    fn default() -> Self {
        let range = TempoRange::default();
        Self {
            min: range.min,
            max: range.max,
            default: DEFAULT_TEMPO,
            presets: DEFAULT_PRESETS.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tempo: TempoConfig,
    /// Overrides the platform data directory.
    pub data_dir: Option<PathBuf>,
    /// Default target for `export` without a directory.
    pub export_dir: Option<PathBuf>,
    pub flush_interval_ms: u64,
    pub mime_preferences: Vec<String>,
    pub notice_ttl_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        let session = SessionConfig::new(PathBuf::new());
        Self {
            tempo: TempoConfig::default(),
            data_dir: None,
            export_dir: None,
            flush_interval_ms: session.flush_interval.as_millis() as u64,
            mime_preferences: session.mime_preferences,
            notice_ttl_ms: session.notice_ttl.as_millis() as u64,
        }
    }
}

impl Config {
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("metronome").join("config.toml"))
    }

    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };

        match fs::read_to_string(&path) {
            Ok(contents) => Self::parse(&contents).unwrap_or_else(|e| {
                log::warn!("ignoring invalid config {path:?}: {e}");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .or_else(|| dirs::data_dir().map(|p| p.join("metronome")))
            .unwrap_or_else(|| PathBuf::from("metronome-data"))
    }

    pub fn export_dir(&self) -> PathBuf {
        self.export_dir
            .clone()
            .or_else(dirs::download_dir)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn session_config(&self) -> SessionConfig {
        let range = TempoRange::new(self.tempo.min, self.tempo.max);
        let mut config = SessionConfig::new(self.data_dir());
        config.tempo_range = range;
        config.default_tempo = range.clamp(self.tempo.default).bpm();
        config.presets = self
            .tempo
            .presets
            .iter()
            .map(|&bpm| range.clamp(bpm).bpm())
            .collect();
        config.flush_interval = Duration::from_millis(self.flush_interval_ms.max(1));
        if !self.mime_preferences.is_empty() {
            config.mime_preferences = self.mime_preferences.clone();
        }
        config.notice_ttl = Duration::from_millis(self.notice_ttl_ms);
        config
    }
}
