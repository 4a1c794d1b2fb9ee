use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_TEMPO: u32 = 120;
pub const DEFAULT_PRESETS: [u32; 4] = [60, 90, 120, 140];

/// Inclusive BPM bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempoRange {
    pub min: u32,
    pub max: u32,
}

impl TempoRange {
    pub fn new(min: u32, max: u32) -> Self {
        let min = min.max(1);
        Self {
            min,
            max: max.max(min),
        }
    }

    pub fn clamp(&self, bpm: u32) -> Tempo {
        Tempo(bpm.clamp(self.min, self.max))
    }

    /// Position of `tempo` in the range, 0.0 at `min` and 1.0 at `max`.
    pub fn fraction(&self, tempo: Tempo) -> f64 {
        if self.max == self.min {
            return 0.0;
        }
        let t = tempo.bpm().clamp(self.min, self.max);
        (t - self.min) as f64 / (self.max - self.min) as f64
    }
}

impl Default for TempoRange {
    fn default() -> Self {
        Self::new(30, 180)
    }
}

/// Beats per minute. Only built through [`TempoRange::clamp`] or
/// [`Tempo::new`], so it is never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tempo(u32);

impl Tempo {
    pub fn new(bpm: u32) -> Self {
        Self(bpm.max(1))
    }

    pub fn bpm(&self) -> u32 {
        self.0
    }

    /// `60000 / bpm` milliseconds.
    pub fn beat_interval(&self) -> Duration {
        Duration::from_secs_f64(60.0 / self.0 as f64)
    }
}

impl Default for Tempo {
    fn default() -> Self {
        Self(DEFAULT_TEMPO)
    }
}

impl std::fmt::Display for Tempo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} BPM", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TimeSignature {
    #[serde(rename = "3/4")]
    ThreeFour,
    #[default]
    #[serde(rename = "4/4")]
    FourFour,
}

impl TimeSignature {
    pub fn beats_per_bar(&self) -> u32 {
        match self {
            TimeSignature::ThreeFour => 3,
            TimeSignature::FourFour => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeSignature::ThreeFour => "3/4",
            TimeSignature::FourFour => "4/4",
        }
    }
}

impl std::fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TimeSignature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "3/4" => Ok(TimeSignature::ThreeFour),
            "4/4" => Ok(TimeSignature::FourFour),
            other => Err(format!("unsupported time signature '{other}'")),
        }
    }
}

/// Position within the bar. `None` means no beat has sounded since the last
/// reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeatCounter {
    current: Option<u32>,
    beats_per_bar: u32,
}

impl BeatCounter {
    pub fn new(beats_per_bar: u32) -> Self {
        Self {
            current: None,
            beats_per_bar: beats_per_bar.max(1),
        }
    }

    pub fn current(&self) -> Option<u32> {
        self.current
    }

    pub fn beats_per_bar(&self) -> u32 {
        self.beats_per_bar
    }

    /// Move to the next beat and return it. The first call after a reset
    /// yields beat 0.
    pub fn advance(&mut self) -> u32 {
        let next = match self.current {
            None => 0,
            Some(beat) => (beat + 1) % self.beats_per_bar,
        };
        self.current = Some(next);
        next
    }

    pub fn reset(&mut self) {
        self.current = None;
    }

    pub fn set_beats_per_bar(&mut self, beats_per_bar: u32) {
        self.beats_per_bar = beats_per_bar.max(1);
        self.current = None;
    }
}

impl Default for BeatCounter {
    fn default() -> Self {
        Self::new(TimeSignature::default().beats_per_bar())
    }
}
