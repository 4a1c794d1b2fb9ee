//! Plain data derived from session state, for whatever front end draws it.

use std::time::Duration;

use serde::Serialize;

use crate::messages::Notice;
use crate::settings::MetronomeSettings;
use crate::time::{Tempo, TempoRange};

/// Bob offset at the slowest tempo.
pub const PENDULUM_MIN_POS: u32 = 40;
/// Bob offset at the fastest tempo.
pub const PENDULUM_MAX_POS: u32 = 110;
/// Swing amplitude either side of vertical, in degrees.
pub const PENDULUM_SWING_DEGREES: f32 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BeatCell {
    pub active: bool,
    pub first_beat: bool,
}

pub fn beat_cells(beats_per_bar: u32, current: Option<u32>) -> Vec<BeatCell> {
    (0..beats_per_bar)
        .map(|beat| BeatCell {
            active: current == Some(beat),
            first_beat: beat == 0,
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PendulumView {
    /// Swinging only while playing and the tempo control is not held.
    pub active: bool,
    pub bob_position: u32,
    /// One full swing per beat.
    pub swing_period_ms: u64,
    pub swing_degrees: f32,
}

pub fn pendulum(tempo: Tempo, range: TempoRange, active: bool) -> PendulumView {
    let span = (PENDULUM_MAX_POS - PENDULUM_MIN_POS) as f64;
    let bob = PENDULUM_MIN_POS as f64 + range.fraction(tempo) * span;

    PendulumView {
        active,
        bob_position: bob.round() as u32,
        swing_period_ms: tempo.beat_interval().as_millis() as u64,
        swing_degrees: if active { PENDULUM_SWING_DEGREES } else { 0.0 },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PresetButton {
    pub bpm: u32,
    pub selected: bool,
}

pub fn preset_buttons(presets: &[u32], tempo: Tempo) -> Vec<PresetButton> {
    presets
        .iter()
        .map(|&bpm| PresetButton {
            bpm,
            selected: bpm == tempo.bpm(),
        })
        .collect()
}

/// `MM:SS` clock shown while recording.
pub fn format_clock(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecorderView {
    pub recording: bool,
    pub clock: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordingRow {
    pub id: u64,
    pub label: String,
    pub duration: String,
    pub playing: bool,
    pub paused: bool,
    /// Percent, only meaningful for the active row.
    pub progress: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub tempo: u32,
    pub tempo_range: TempoRange,
    pub playing: bool,
    pub dragging: bool,
    pub current_beat: Option<u32>,
    pub beats: Vec<BeatCell>,
    pub pendulum: PendulumView,
    pub presets: Vec<PresetButton>,
    pub settings: MetronomeSettings,
    pub recorder: RecorderView,
    pub recordings: Vec<RecordingRow>,
    pub notices: Vec<Notice>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_beat_cells_mark_active_and_first() {
        let cells = beat_cells(4, Some(2));
        assert_eq!(cells.len(), 4);
        assert!(cells[0].first_beat && !cells[0].active);
        assert!(cells[2].active && !cells[2].first_beat);
        assert_eq!(cells.iter().filter(|c| c.active).count(), 1);

        assert!(beat_cells(3, None).iter().all(|c| !c.active));
    }

    #[test]
    fn test_bob_position_spans_range() {
        let range = TempoRange::default();

        assert_eq!(pendulum(Tempo::new(30), range, true).bob_position, 40);
        assert_eq!(pendulum(Tempo::new(180), range, true).bob_position, 110);
        // 40 + 90/150 * 70 = 82
        assert_eq!(pendulum(Tempo::new(120), range, true).bob_position, 82);
    }

    #[test]
    fn test_swing_period_is_one_beat() {
        let view = pendulum(Tempo::new(120), TempoRange::default(), true);
        assert_eq!(view.swing_period_ms, 500);
        assert_eq!(view.swing_degrees, 30.0);

        let idle = pendulum(Tempo::new(60), TempoRange::default(), false);
        assert_eq!(idle.swing_period_ms, 1000);
        assert_eq!(idle.swing_degrees, 0.0);
    }

    #[test]
    fn test_preset_selection() {
        let buttons = preset_buttons(&[60, 90, 120, 140], Tempo::new(90));
        let selected: Vec<u32> = buttons.iter().filter(|b| b.selected).map(|b| b.bpm).collect();
        assert_eq!(selected, vec![90]);
    }

    #[test]
    fn test_clock() {
        assert_eq!(format_clock(Duration::from_millis(0)), "00:00");
        assert_eq!(format_clock(Duration::from_millis(65_900)), "01:05");
    }
}
