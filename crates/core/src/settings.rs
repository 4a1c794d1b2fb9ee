use metro_transport::SoundType;
use serde::{Deserialize, Serialize};

use crate::time::TimeSignature;

/// User adjustable click settings, persisted as camelCase JSON.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetronomeSettings {
    pub volume: f32,
    pub accent_volume: f32,
    pub sound_type: SoundType,
    pub accent_first: bool,
    pub time_signature: TimeSignature,
}

impl Default for MetronomeSettings {
    fn default() -> Self {
        Self {
            volume: 0.5,
            accent_volume: 0.6,
            sound_type: SoundType::Click,
            accent_first: true,
            time_signature: TimeSignature::FourFour,
        }
    }
}

impl MetronomeSettings {
    /// Merge every field present in `patch`, clamping volumes into `[0, 1]`.
    pub fn apply(&mut self, patch: &SettingsPatch) {
        if let Some(volume) = patch.volume {
            self.volume = clamp_unit(volume);
        }
        if let Some(accent_volume) = patch.accent_volume {
            self.accent_volume = clamp_unit(accent_volume);
        }
        if let Some(sound_type) = patch.sound_type {
            self.sound_type = sound_type;
        }
        if let Some(accent_first) = patch.accent_first {
            self.accent_first = accent_first;
        }
        if let Some(time_signature) = patch.time_signature {
            self.time_signature = time_signature;
        }
    }

    /// Loaded values may come from a hand-edited file.
    pub fn sanitized(mut self) -> Self {
        self.volume = clamp_unit(self.volume);
        self.accent_volume = clamp_unit(self.accent_volume);
        self
    }
}

fn clamp_unit(v: f32) -> f32 {
    if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub volume: Option<f32>,
    pub accent_volume: Option<f32>,
    pub sound_type: Option<SoundType>,
    pub accent_first: Option<bool>,
    pub time_signature: Option<TimeSignature>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = MetronomeSettings::default();
        assert_eq!(s.volume, 0.5);
        assert_eq!(s.accent_volume, 0.6);
        assert_eq!(s.sound_type, SoundType::Click);
        assert!(s.accent_first);
        assert_eq!(s.time_signature, TimeSignature::FourFour);
    }

    #[test]
    fn test_camel_case_json() {
        let json = serde_json::to_value(MetronomeSettings::default()).unwrap();
        assert_eq!(json["accentVolume"], serde_json::json!(0.6f32));
        assert_eq!(json["soundType"], "click");
        assert_eq!(json["accentFirst"], true);
        assert_eq!(json["timeSignature"], "4/4");
    }

    #[test]
    fn test_missing_fields_fall_back_to_defaults() {
        let s: MetronomeSettings =
            serde_json::from_str(r#"{"soundType":"wood","timeSignature":"3/4"}"#).unwrap();
        assert_eq!(s.sound_type, SoundType::Wood);
        assert_eq!(s.time_signature, TimeSignature::ThreeFour);
        assert_eq!(s.volume, 0.5);
    }

    #[test]
    fn test_patch_merges_and_clamps() {
        let mut s = MetronomeSettings::default();
        s.apply(&SettingsPatch {
            volume: Some(1.7),
            accent_first: Some(false),
            ..Default::default()
        });

        assert_eq!(s.volume, 1.0);
        assert!(!s.accent_first);
        assert_eq!(s.accent_volume, 0.6);

        s.apply(&SettingsPatch {
            accent_volume: Some(-0.2),
            ..Default::default()
        });
        assert_eq!(s.accent_volume, 0.0);
    }
}
