use std::f32::consts::TAU;

use metro_transport::{CLICK_FLOOR_GAIN, ClickParams};

/// Maximum number of clicks that can ring at once.
pub(crate) const MAX_CLICK_VOICES: usize = 16;

/// One decaying sine burst, optionally doubled by a sub oscillator that
/// shares the same envelope.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ClickVoice {
    phase: f32,
    phase_inc: f32,
    sub_phase: f32,
    sub_phase_inc: Option<f32>,
    envelope: f32,
    decay_factor: f32,
    remaining: u32,
}

impl ClickVoice {
    /// Returns `None` for silent or zero-length clicks.
    pub(crate) fn new(params: &ClickParams, sample_rate: u32) -> Option<Self> {
        if params.gain <= 0.0 || params.decay_secs <= 0.0 || sample_rate == 0 {
            return None;
        }

        let length = (params.decay_secs * sample_rate as f32).round().max(1.0) as u32;
        // gain * factor^length == CLICK_FLOOR_GAIN
        let decay_factor = (CLICK_FLOOR_GAIN / params.gain).powf(1.0 / length as f32);

        Some(Self {
            phase: 0.0,
            phase_inc: params.frequency / sample_rate as f32,
            sub_phase: 0.0,
            sub_phase_inc: params.sub_frequency.map(|f| f / sample_rate as f32),
            envelope: params.gain,
            decay_factor,
            remaining: length,
        })
    }

    #[inline]
    pub(crate) fn is_done(&self) -> bool {
        self.remaining == 0
    }

    /// Next mono sample, or `None` once the decay has elapsed.
    #[inline]
    pub(crate) fn next_sample(&mut self) -> Option<f32> {
        if self.remaining == 0 {
            return None;
        }

        let mut out = (self.phase * TAU).sin();
        self.phase = (self.phase + self.phase_inc).fract();

        if let Some(inc) = self.sub_phase_inc {
            out += (self.sub_phase * TAU).sin();
            self.sub_phase = (self.sub_phase + inc).fract();
        }

        out *= self.envelope;
        self.envelope *= self.decay_factor;
        self.remaining -= 1;

        Some(out)
    }
}

/// Fixed pool of click voices; a new click steals the oldest slot when full.
pub(crate) struct ClickBank {
    voices: [Option<ClickVoice>; MAX_CLICK_VOICES],
    next: usize,
}

impl ClickBank {
    pub(crate) fn new() -> Self {
        Self {
            voices: [None; MAX_CLICK_VOICES],
            next: 0,
        }
    }

    pub(crate) fn trigger(&mut self, params: &ClickParams, sample_rate: u32) {
        let Some(voice) = ClickVoice::new(params, sample_rate) else {
            return;
        };

        let slot = self
            .voices
            .iter()
            .position(|v| v.is_none())
            .unwrap_or(self.next);
        self.voices[slot] = Some(voice);
        self.next = (slot + 1) % MAX_CLICK_VOICES;
    }

    /// Sum of every active voice for one frame.
    #[inline]
    pub(crate) fn next_sample(&mut self) -> f32 {
        let mut mixed = 0.0;
        for slot in self.voices.iter_mut() {
            if let Some(voice) = slot {
                if let Some(sample) = voice.next_sample() {
                    mixed += sample;
                }
                if voice.is_done() {
                    *slot = None;
                }
            }
        }
        mixed
    }

    pub(crate) fn active(&self) -> usize {
        self.voices.iter().filter(|v| v.is_some()).count()
    }
}
