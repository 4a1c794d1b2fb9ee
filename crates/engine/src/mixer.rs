use basedrop::Shared;
use cpal::{FromSample, Sample};
use metro_transport::{AudioArc, Command, Status, TakeId};

use crate::synth::ClickBank;

/// Number of recordings the audio thread can hold at once.
pub(crate) const MAX_TAKES: usize = 4;

pub(crate) type SharedTake = (TakeId, Shared<AudioArc>);

struct TakeSlot {
    id: TakeId,
    audio: Shared<AudioArc>,
    frame: usize,
    playing: bool,
    ended: bool,
}

/// Everything the output callback owns: ringing clicks and loaded takes.
pub(crate) struct OutputMixer {
    clicks: ClickBank,
    takes: [Option<TakeSlot>; MAX_TAKES],
    sample_rate: u32,
    channels: usize,
}

impl OutputMixer {
    pub(crate) fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            clicks: ClickBank::new(),
            takes: std::array::from_fn(|_| None),
            sample_rate,
            channels: channels.max(1) as usize,
        }
    }

    /// Install delivered takes, then apply queued commands.
    ///
    /// A take is audible as soon as it arrives, so a start never depends on
    /// the take and a command landing in the same callback.
    pub(crate) fn receive(
        &mut self,
        takes_rx: &mut rtrb::Consumer<SharedTake>,
        command_rx: &mut rtrb::Consumer<Command>,
    ) {
        while let Ok((id, audio)) = takes_rx.pop() {
            let slot = self.takes.iter().position(Option::is_none).unwrap_or(0);
            // an evicted take is reclaimed by the collector, not here
            self.takes[slot] = Some(TakeSlot {
                id,
                audio,
                frame: 0,
                playing: true,
                ended: false,
            });
        }

        while let Ok(cmd) = command_rx.pop() {
            match cmd {
                Command::Click(params) => self.clicks.trigger(&params, self.sample_rate),
                Command::PlayTake(id) => {
                    if let Some(take) = self.find(id) {
                        if take.ended {
                            take.frame = 0;
                            take.ended = false;
                        }
                        take.playing = true;
                    }
                }
                Command::PauseTake(id) => {
                    if let Some(take) = self.find(id) {
                        take.playing = false;
                    }
                }
                Command::ReleaseTake(id) => {
                    for slot in self.takes.iter_mut() {
                        if slot.as_ref().is_some_and(|t| t.id == id) {
                            *slot = None;
                        }
                    }
                }
            }
        }
    }

    /// Fill one interleaved output buffer and report take positions.
    pub(crate) fn render<T>(&mut self, data: &mut [T], status_tx: &mut rtrb::Producer<Status>)
    where
        T: Sample + FromSample<f32>,
    {
        for frame in data.chunks_mut(self.channels) {
            let click = self.clicks.next_sample();

            for (ch, sample) in frame.iter_mut().enumerate() {
                let mut mixed = click;
                for take in self.takes.iter().flatten().filter(|t| t.playing) {
                    let take_channels = take.audio.channels() as usize;
                    let idx = take.frame * take_channels + ch % take_channels;
                    if let Some(s) = take.audio.samples().get(idx) {
                        mixed += *s;
                    }
                }
                *sample = T::from_sample(mixed.clamp(-1.0, 1.0));
            }

            for take in self.takes.iter_mut().flatten().filter(|t| t.playing) {
                take.frame += 1;
                if take.frame >= take.audio.frames() {
                    take.playing = false;
                    take.ended = true;
                    let _ = status_tx.push(Status::TakeEnded(take.id));
                }
            }
        }

        for take in self.takes.iter().flatten().filter(|t| t.playing) {
            let _ = status_tx.push(Status::TakePosition {
                take: take.id,
                frame: take.frame as u64,
            });
        }
    }

    fn find(&mut self, id: TakeId) -> Option<&mut TakeSlot> {
        self.takes.iter_mut().flatten().find(|t| t.id == id)
    }
}
