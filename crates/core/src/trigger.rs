use std::sync::Arc;

use metro_engine::AudioContext;
use metro_transport::{ClickParams, Command};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::scheduler::BeatSink;
use crate::settings::MetronomeSettings;

/// Somewhere clicks can be sent. Implemented by the engine's [`AudioContext`].
pub trait ClickOutput: Send {
    fn click(&mut self, params: ClickParams);

    /// Get ready to click without delay. Opening a device can block, so this
    /// runs before any beat is scheduled rather than inside one.
    fn prepare(&mut self) {}

    /// Nothing will be audible for a while.
    fn idle(&mut self) {}
}

impl ClickOutput for AudioContext {
    fn click(&mut self, params: ClickParams) {
        let Some(engine) = self.ensure_running() else {
            return;
        };
        if let Err(e) = engine.send(Command::Click(params)) {
            log::debug!("click dropped: {e}");
        }
    }

    fn prepare(&mut self) {
        if self.ensure_running().is_none() {
            log::debug!("no output to prepare");
        }
    }

    fn idle(&mut self) {
        self.suspend();
    }
}

/// Click voice for `beat` under the current settings.
pub fn click_params(beat: u32, settings: &MetronomeSettings) -> ClickParams {
    let accent = settings.accent_first && beat == 0;
    let gain = if accent {
        settings.volume * settings.accent_volume
    } else {
        settings.volume
    };
    settings.sound_type.voice(accent, gain)
}

/// Turns beats into clicks and publishes the current beat for the indicator.
pub struct AudioTrigger {
    settings: watch::Receiver<MetronomeSettings>,
    output: Arc<Mutex<dyn ClickOutput>>,
    beat: watch::Sender<Option<u32>>,
}

impl AudioTrigger {
    pub fn new(
        settings: watch::Receiver<MetronomeSettings>,
        output: Arc<Mutex<dyn ClickOutput>>,
    ) -> Self {
        let (beat, _) = watch::channel(None);
        Self {
            settings,
            output,
            beat,
        }
    }

    pub fn subscribe_beat(&self) -> watch::Receiver<Option<u32>> {
        self.beat.subscribe()
    }

    pub fn current_beat(&self) -> Option<u32> {
        *self.beat.borrow()
    }

    pub fn prepare_output(&self) {
        self.output.lock().prepare();
    }

    pub fn idle_output(&self) {
        self.output.lock().idle();
    }
}

impl BeatSink for AudioTrigger {
    fn on_beat(&self, beat: u32) {
        let params = click_params(beat, &self.settings.borrow());
        self.output.lock().click(params);
        self.beat.send_replace(Some(beat));
    }

    fn on_reset(&self) {
        self.beat.send_replace(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::TickScheduler;
    use crate::time::{Tempo, TimeSignature};
    use metro_transport::SoundType;
    use std::time::Duration;
    use tokio::time::{Instant, sleep};

    #[derive(Default)]
    struct CapturedClicks {
        clicks: Vec<(ClickParams, Duration)>,
        origin: Option<Instant>,
    }

    impl ClickOutput for CapturedClicks {
        fn click(&mut self, params: ClickParams) {
            let origin = *self.origin.get_or_insert_with(Instant::now);
            self.clicks.push((params, Instant::now() - origin));
        }
    }

    #[test]
    fn test_accent_only_on_first_beat() {
        let settings = MetronomeSettings::default();

        let first = click_params(0, &settings);
        assert_eq!(first.frequency, 1500.0);
        assert!((first.gain - 0.5 * 0.6).abs() < 1e-6);

        let second = click_params(1, &settings);
        assert_eq!(second.frequency, 1000.0);
        assert_eq!(second.gain, 0.5);
    }

    #[test]
    fn test_accent_disabled() {
        let settings = MetronomeSettings {
            accent_first: false,
            sound_type: SoundType::Beep,
            ..Default::default()
        };

        let first = click_params(0, &settings);
        assert_eq!(first.frequency, 1200.0);
        assert_eq!(first.gain, settings.volume);
    }

    #[test]
    fn test_wood_voice_has_sub_oscillator() {
        let settings = MetronomeSettings {
            sound_type: SoundType::Wood,
            volume: 1.0,
            accent_volume: 1.0,
            ..Default::default()
        };
        let params = click_params(0, &settings);
        assert_eq!(params.frequency, 180.0);
        assert_eq!(params.sub_frequency, Some(90.0));
        assert_eq!(params.decay_secs, 0.08);
    }

    #[test]
    fn test_beat_channel_follows_trigger() {
        let (_settings_tx, settings_rx) = watch::channel(MetronomeSettings::default());
        let output: Arc<Mutex<CapturedClicks>> = Arc::default();
        let trigger = AudioTrigger::new(settings_rx, output.clone());
        let beat = trigger.subscribe_beat();

        trigger.on_beat(2);
        assert_eq!(*beat.borrow(), Some(2));

        trigger.on_reset();
        assert_eq!(*beat.borrow(), None);
        assert_eq!(output.lock().clicks.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_click_preset_at_120_bpm() {
        let (_settings_tx, settings_rx) = watch::channel(MetronomeSettings::default());
        let output: Arc<Mutex<CapturedClicks>> = Arc::default();
        let trigger = Arc::new(AudioTrigger::new(settings_rx, output.clone()));

        let mut scheduler = TickScheduler::new(
            trigger,
            Tempo::new(120),
            TimeSignature::FourFour.beats_per_bar(),
        );
        scheduler.start();
        sleep(Duration::from_millis(1800)).await;
        scheduler.stop();

        let captured = output.lock();
        let clicks = &captured.clicks;
        let freqs: Vec<f32> = clicks.iter().map(|(p, _)| p.frequency).collect();
        assert_eq!(freqs, vec![1500.0, 1000.0, 1000.0, 1000.0]);

        for (i, (_, at)) in clicks.iter().enumerate() {
            let expected = 500 * i as u128;
            assert!(at.as_millis().abs_diff(expected) <= 1, "click {i} at {at:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_settings_change_applies_to_next_beat() {
        let (settings_tx, settings_rx) = watch::channel(MetronomeSettings::default());
        let output: Arc<Mutex<CapturedClicks>> = Arc::default();
        let trigger = Arc::new(AudioTrigger::new(settings_rx, output.clone()));

        let mut scheduler = TickScheduler::new(trigger, Tempo::new(120), 4);
        scheduler.start();
        sleep(Duration::from_millis(250)).await;

        settings_tx.send_modify(|s| s.sound_type = SoundType::Beep);
        sleep(Duration::from_millis(500)).await;
        scheduler.stop();

        let freqs: Vec<f32> = output.lock().clicks.iter().map(|(p, _)| p.frequency).collect();
        assert_eq!(freqs, vec![1500.0, 1200.0]);
    }
}
