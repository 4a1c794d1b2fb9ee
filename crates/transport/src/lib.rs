mod click;

use std::sync::Arc;

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

pub use click::{CLICK_FLOOR_GAIN, ClickParams, SoundType};

/// Interleaved `f32` audio behind an `Arc`, so captured or decoded
/// recordings move between the recorder, the player and the audio thread
/// without copying.
///
/// ```
/// use metro_transport::AudioArc;
///
/// let take = AudioArc::new(vec![0.1, -0.1, 0.2, -0.2], 48000, 2);
/// assert_eq!(take.frames(), 2);
/// assert_eq!(take.clone().samples(), take.samples());
/// ```
#[derive(Clone)]
pub struct AudioArc {
    samples: Arc<[f32]>,
    sample_rate: u32,
    channels: u16,
}

impl AudioArc {
    /// # Panics
    ///
    /// If `channels` is zero or `samples` does not hold whole frames.
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        assert!(channels != 0, "audio needs at least one channel");
        assert!(
            samples.len() % channels as usize == 0,
            "{} samples do not split into {channels}-channel frames",
            samples.len()
        );
        Self {
            samples: samples.into(),
            sample_rate,
            channels,
        }
    }

    #[inline]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn channels(&self) -> u16 {
        self.channels
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Convert to `target_rate`. Audio already at that rate is shared, not
    /// copied.
    pub fn resample(&self, target_rate: u32) -> anyhow::Result<Self> {
        if self.sample_rate == target_rate || self.is_empty() {
            return Ok(Self {
                sample_rate: target_rate,
                ..self.clone()
            });
        }

        let channels = self.channels as usize;
        let frames = self.frames();
        let ratio = target_rate as f64 / self.sample_rate as f64;

        let mut planar = vec![Vec::with_capacity(frames); channels];
        for frame in self.samples.chunks_exact(channels) {
            for (lane, sample) in planar.iter_mut().zip(frame) {
                lane.push(*sample);
            }
        }

        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };
        let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, frames, channels)?;
        let planar = resampler.process(&planar, None)?;

        let out_frames = planar.first().map_or(0, Vec::len);
        let mut interleaved = Vec::with_capacity(out_frames * channels);
        for i in 0..out_frames {
            interleaved.extend(planar.iter().map(|lane| lane[i]));
        }

        Ok(Self::new(interleaved, target_rate, self.channels))
    }
}

impl std::fmt::Debug for AudioArc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "AudioArc({} frames, {} Hz, {} ch)",
            self.frames(),
            self.sample_rate,
            self.channels
        )
    }
}

/// Identifies a recording loaded into the engine for playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TakeId(pub u64);

/// Messages from the control side to the audio thread.
#[derive(Debug, Clone, Copy)]
pub enum Command {
    /// Start one click voice right away.
    Click(ClickParams),
    /// Start or resume a take previously delivered on the takes ring.
    PlayTake(TakeId),
    PauseTake(TakeId),
    /// Drop the take; its buffer is reclaimed by the collector.
    ReleaseTake(TakeId),
}

/// Messages from the audio thread back to the control side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Status {
    /// Playback position of a take, in frames at the engine sample rate.
    TakePosition { take: TakeId, frame: u64 },
    /// The take reached its last frame.
    TakeEnded(TakeId),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(rate: u32, secs: f32, channels: u16) -> AudioArc {
        let frames = (rate as f32 * secs) as usize;
        let samples = (0..frames)
            .flat_map(|i| {
                let s = (i as f32 * 440.0 * std::f32::consts::TAU / rate as f32).sin() * 0.5;
                std::iter::repeat_n(s, channels as usize)
            })
            .collect();
        AudioArc::new(samples, rate, channels)
    }

    #[test]
    fn test_frames_and_len() {
        let take = AudioArc::new(vec![0.0; 48000 * 2 * 3], 48000, 2);
        assert_eq!(take.frames(), 144_000);
        assert_eq!(take.len(), 288_000);
    }

    #[test]
    #[should_panic(expected = "at least one channel")]
    fn test_zero_channels_panics() {
        AudioArc::new(vec![0.0], 44100, 0);
    }

    #[test]
    #[should_panic(expected = "do not split")]
    fn test_partial_frame_panics() {
        AudioArc::new(vec![0.0; 3], 44100, 2);
    }

    #[test]
    fn test_same_rate_shares_samples() {
        let take = tone(44100, 0.05, 1);
        let same = take.resample(44100).unwrap();
        assert!(Arc::ptr_eq(&take.samples, &same.samples));
    }

    #[test]
    fn test_microphone_rate_to_output_rate() {
        let take = tone(8000, 0.5, 2);
        let out = take.resample(48000).unwrap();

        assert_eq!(out.sample_rate(), 48000);
        assert_eq!(out.channels(), 2);
        let expected = take.frames() as f64 * 6.0;
        assert!((out.frames() as f64 - expected).abs() <= expected * 0.03);
    }

    #[test]
    fn test_empty_take_resamples_to_empty() {
        let out = AudioArc::new(Vec::new(), 44100, 2).resample(48000).unwrap();
        assert!(out.is_empty());
        assert_eq!(out.sample_rate(), 48000);
    }

    #[test]
    fn test_debug_is_a_summary() {
        let take = AudioArc::new(vec![0.0; 800], 8000, 1);
        assert_eq!(format!("{take:?}"), "AudioArc(800 frames, 8000 Hz, 1 ch)");
    }
}
