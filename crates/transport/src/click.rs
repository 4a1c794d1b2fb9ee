use serde::{Deserialize, Serialize};

/// Gain the click envelope ramps down to before the voice stops.
pub const CLICK_FLOOR_GAIN: f32 = 0.001;

/// Timbre presets for the metronome click.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoundType {
    Beep,
    #[default]
    Click,
    Wood,
}

impl SoundType {
    pub const ALL: [SoundType; 3] = [SoundType::Beep, SoundType::Click, SoundType::Wood];

    /// Oscillator frequency in Hz; accents use the higher one of the pair.
    pub fn frequency(self, accent: bool) -> f32 {
        match (self, accent) {
            (SoundType::Beep, false) => 1200.0,
            (SoundType::Beep, true) => 1800.0,
            (SoundType::Click, false) => 1000.0,
            (SoundType::Click, true) => 1500.0,
            (SoundType::Wood, false) => 120.0,
            (SoundType::Wood, true) => 180.0,
        }
    }

    /// Length of the exponential decay, which is also the voice length.
    pub fn decay_secs(self) -> f32 {
        match self {
            SoundType::Beep => 0.15,
            SoundType::Click => 0.05,
            SoundType::Wood => 0.08,
        }
    }

    /// Wood blocks get a second oscillator an octave down.
    pub fn has_sub_oscillator(self) -> bool {
        matches!(self, SoundType::Wood)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SoundType::Beep => "beep",
            SoundType::Click => "click",
            SoundType::Wood => "wood",
        }
    }

    /// Build the voice for one beat at the given gain.
    pub fn voice(self, accent: bool, gain: f32) -> ClickParams {
        let frequency = self.frequency(accent);
        ClickParams {
            frequency,
            sub_frequency: self.has_sub_oscillator().then_some(frequency * 0.5),
            gain,
            decay_secs: self.decay_secs(),
        }
    }
}

impl std::fmt::Display for SoundType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SoundType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "beep" => Ok(SoundType::Beep),
            "click" => Ok(SoundType::Click),
            "wood" => Ok(SoundType::Wood),
            other => Err(format!("unknown sound type '{other}'")),
        }
    }
}

/// Everything the audio thread needs to synthesize one click.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClickParams {
    pub frequency: f32,
    pub sub_frequency: Option<f32>,
    pub gain: f32,
    pub decay_secs: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_click_preset_table() {
        let accent = SoundType::Click.voice(true, 0.3);
        assert_eq!(accent.frequency, 1500.0);
        assert_eq!(accent.sub_frequency, None);
        assert_eq!(accent.decay_secs, 0.05);

        let normal = SoundType::Click.voice(false, 0.5);
        assert_eq!(normal.frequency, 1000.0);
        assert_eq!(normal.gain, 0.5);
    }

    #[test]
    fn test_wood_adds_sub_oscillator_at_half_frequency() {
        let accent = SoundType::Wood.voice(true, 1.0);
        assert_eq!(accent.frequency, 180.0);
        assert_eq!(accent.sub_frequency, Some(90.0));

        let normal = SoundType::Wood.voice(false, 1.0);
        assert_eq!(normal.sub_frequency, Some(60.0));
    }

    #[test]
    fn test_every_preset_decays_within_200ms() {
        for sound in SoundType::ALL {
            assert!(sound.decay_secs() < 0.2, "{sound} decays too slowly");
            assert!(sound.frequency(true) > sound.frequency(false));
        }
    }

    #[test]
    fn test_sound_type_serde_names() {
        let json = serde_json::to_string(&SoundType::Wood).unwrap();
        assert_eq!(json, "\"wood\"");

        let parsed: SoundType = serde_json::from_str("\"beep\"").unwrap();
        assert_eq!(parsed, SoundType::Beep);
    }

    #[test]
    fn test_sound_type_from_str() {
        assert_eq!("Click".parse::<SoundType>(), Ok(SoundType::Click));
        assert!("cowbell".parse::<SoundType>().is_err());
    }
}
