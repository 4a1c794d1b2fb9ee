//! Bar-at-a-time beat scheduling on tokio timers.
//!
//! Each bar gets one independent timer per beat, all measured from the bar
//! start, so a late beat does not push the following ones. A continuation
//! task sleeps until the end of the bar and schedules the next one.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::time::{BeatCounter, Tempo};

/// Receives every beat the scheduler fires.
pub trait BeatSink: Send + Sync + 'static {
    fn on_beat(&self, beat: u32);

    /// The counter went back to "no beat".
    fn on_reset(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleState {
    /// No timers; either never started or suspended by a drag.
    Idle,
    Scheduled,
    Stopped,
}

struct Shared {
    live: AtomicBool,
    generation: AtomicU64,
    counter: Mutex<BeatCounter>,
    pending: Mutex<Vec<AbortHandle>>,
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.live.load(Ordering::Acquire) && self.generation.load(Ordering::Acquire) == generation
    }
}

pub struct TickScheduler {
    shared: Arc<Shared>,
    sink: Arc<dyn BeatSink>,
    tempo: Tempo,
    beats_per_bar: u32,
    playing: bool,
    dragging: bool,
    state: ScheduleState,
}

impl TickScheduler {
    pub fn new(sink: Arc<dyn BeatSink>, tempo: Tempo, beats_per_bar: u32) -> Self {
        let beats_per_bar = beats_per_bar.max(1);
        Self {
            shared: Arc::new(Shared {
                live: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                counter: Mutex::new(BeatCounter::new(beats_per_bar)),
                pending: Mutex::new(Vec::new()),
            }),
            sink,
            tempo,
            beats_per_bar,
            playing: false,
            dragging: false,
            state: ScheduleState::Idle,
        }
    }

    /// Begin playback from beat 0. Must be called inside a tokio runtime.
    pub fn start(&mut self) {
        self.playing = true;
        if self.dragging {
            return;
        }
        self.restart();
    }

    /// Cancel every pending timer and clear the beat.
    pub fn stop(&mut self) {
        self.playing = false;
        self.cancel_all();
        self.reset_counter();
        self.state = ScheduleState::Stopped;
    }

    /// Restarts the bar at the new tempo if playing. While the tempo control
    /// is held only the value is stored.
    pub fn change_tempo(&mut self, tempo: Tempo) {
        if tempo == self.tempo {
            return;
        }
        self.tempo = tempo;
        if self.playing && !self.dragging {
            self.restart();
        }
    }

    pub fn set_beats_per_bar(&mut self, beats_per_bar: u32) {
        let beats_per_bar = beats_per_bar.max(1);
        if beats_per_bar == self.beats_per_bar {
            return;
        }
        self.beats_per_bar = beats_per_bar;
        self.shared.counter.lock().set_beats_per_bar(beats_per_bar);

        if self.playing && !self.dragging {
            self.restart();
        } else {
            self.sink.on_reset();
        }
    }

    /// Suspend scheduling while the tempo control is being dragged.
    pub fn begin_drag(&mut self) {
        if self.dragging {
            return;
        }
        self.dragging = true;
        if self.state == ScheduleState::Scheduled {
            self.cancel_all();
            self.reset_counter();
            self.state = ScheduleState::Idle;
        }
    }

    /// Resume scheduling, but only if playback is still on.
    pub fn end_drag(&mut self) {
        if !self.dragging {
            return;
        }
        self.dragging = false;
        if self.playing {
            self.restart();
        }
    }

    pub fn tempo(&self) -> Tempo {
        self.tempo
    }

    pub fn beats_per_bar(&self) -> u32 {
        self.beats_per_bar
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn is_dragging(&self) -> bool {
        self.dragging
    }

    pub fn state(&self) -> ScheduleState {
        self.state
    }

    pub fn is_scheduled(&self) -> bool {
        self.state == ScheduleState::Scheduled
    }

    pub fn current_beat(&self) -> Option<u32> {
        self.shared.counter.lock().current()
    }

    /// Timers (beats and bar continuations) that have not fired or been
    /// cancelled yet.
    pub fn pending_timers(&self) -> usize {
        self.shared
            .pending
            .lock()
            .iter()
            .filter(|h| !h.is_finished())
            .count()
    }

    fn restart(&mut self) {
        self.cancel_all();
        self.reset_counter();

        let generation = {
            let _pending = self.shared.pending.lock();
            let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
            self.shared.live.store(true, Ordering::Release);
            generation
        };

        let interval = self.tempo.beat_interval();
        let origin = Instant::now();

        log::debug!(
            "scheduling {} at {} beats per bar, interval {interval:?}",
            self.tempo,
            self.beats_per_bar
        );

        let bar = tokio::spawn(run_bars(
            Arc::clone(&self.shared),
            Arc::clone(&self.sink),
            generation,
            interval,
            self.beats_per_bar,
            origin,
        ));
        self.shared.pending.lock().push(bar.abort_handle());
        self.state = ScheduleState::Scheduled;
    }

    fn cancel_all(&self) {
        let mut pending = self.shared.pending.lock();
        self.shared.live.store(false, Ordering::Release);
        self.shared.generation.fetch_add(1, Ordering::AcqRel);
        for handle in pending.drain(..) {
            handle.abort();
        }
    }

    fn reset_counter(&self) {
        self.shared.counter.lock().reset();
        self.sink.on_reset();
    }
}

impl Drop for TickScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

async fn run_bars(
    shared: Arc<Shared>,
    sink: Arc<dyn BeatSink>,
    generation: u64,
    interval: Duration,
    beats_per_bar: u32,
    origin: Instant,
) {
    let mut bar_start = origin;

    loop {
        {
            let mut pending = shared.pending.lock();
            if !shared.is_current(generation) {
                return;
            }
            pending.retain(|h| !h.is_finished());

            for i in 0..beats_per_bar {
                let beat = tokio::spawn(fire_beat(
                    Arc::clone(&shared),
                    Arc::clone(&sink),
                    generation,
                    bar_start + interval * i,
                ));
                pending.push(beat.abort_handle());
            }
        }

        bar_start += interval * beats_per_bar;
        tokio::time::sleep_until(bar_start).await;
    }
}

async fn fire_beat(shared: Arc<Shared>, sink: Arc<dyn BeatSink>, generation: u64, at: Instant) {
    tokio::time::sleep_until(at).await;

    if !shared.is_current(generation) {
        return;
    }
    let beat = shared.counter.lock().advance();
    sink.on_beat(beat);
}
