mod context;
mod input;
mod mixer;
mod synth;

use std::thread::JoinHandle;

use basedrop::{Collector, Handle, Shared};
use cpal::{
    FromSample, SizedSample,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};
use crossbeam_channel::{Receiver, Sender};
use metro_transport::{AudioArc, Command, Status, TakeId};

use mixer::{MAX_TAKES, OutputMixer, SharedTake};

pub use context::{AudioContext, ContextState};
pub use input::{InputCapture, InputError};

enum StreamControl {
    Suspend,
    Resume,
    Shutdown,
}

/// Control side of the output stream. The stream itself lives on the
/// `metro-audio` thread and is dropped when this handle is.
pub struct AudioEngineHandle {
    commands: rtrb::Producer<Command>,
    status: rtrb::Consumer<Status>,
    takes: rtrb::Producer<SharedTake>,
    collector: Collector,
    handle: Handle,
    sample_rate: u32,
    channels: u16,
    control: Sender<StreamControl>,
    thread: Option<JoinHandle<()>>,
}

pub fn start() -> anyhow::Result<AudioEngineHandle> {
    let collector = Collector::new();
    let handle = collector.handle();

    let (command_tx, command_rx) = rtrb::RingBuffer::<Command>::new(64);
    let (status_tx, status_rx) = rtrb::RingBuffer::<Status>::new(256);
    let (takes_tx, takes_rx) = rtrb::RingBuffer::<SharedTake>::new(MAX_TAKES);

    let (control_tx, control_rx) = crossbeam_channel::unbounded();
    let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);

    let thread = std::thread::Builder::new()
        .name("metro-audio".into())
        .spawn(move || {
            run_output_thread(command_rx, takes_rx, status_tx, control_rx, ready_tx)
        })?;

    let (sample_rate, channels) = match ready_rx.recv() {
        Ok(Ok(format)) => format,
        Ok(Err(e)) => {
            let _ = thread.join();
            return Err(e);
        }
        Err(_) => {
            let _ = thread.join();
            anyhow::bail!("audio thread exited before the stream was ready");
        }
    };

    log::info!("output stream running at {sample_rate} Hz, {channels} channel(s)");

    Ok(AudioEngineHandle {
        commands: command_tx,
        status: status_rx,
        takes: takes_tx,
        collector,
        handle,
        sample_rate,
        channels,
        control: control_tx,
        thread: Some(thread),
    })
}

fn run_output_thread(
    command_rx: rtrb::Consumer<Command>,
    takes_rx: rtrb::Consumer<SharedTake>,
    status_tx: rtrb::Producer<Status>,
    control_rx: Receiver<StreamControl>,
    ready_tx: Sender<anyhow::Result<(u32, u16)>>,
) {
    let stream = match open_output(command_rx, takes_rx, status_tx) {
        Ok((stream, format)) => {
            let _ = ready_tx.send(Ok(format));
            stream
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    for control in control_rx.iter() {
        let result = match control {
            StreamControl::Suspend => stream.pause().map_err(anyhow::Error::from),
            StreamControl::Resume => stream.play().map_err(anyhow::Error::from),
            StreamControl::Shutdown => break,
        };
        if let Err(e) = result {
            log::warn!("output stream control failed: {e}");
        }
    }

    log::debug!("output stream closed");
}

fn open_output(
    command_rx: rtrb::Consumer<Command>,
    takes_rx: rtrb::Consumer<SharedTake>,
    status_tx: rtrb::Producer<Status>,
) -> anyhow::Result<(cpal::Stream, (u32, u16))> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow::anyhow!("no output device found"))?;

    let config = device.default_output_config()?;
    let sample_format = config.sample_format();
    let config: cpal::StreamConfig = config.into();
    let format = (config.sample_rate.0, config.channels);

    let stream = match sample_format {
        cpal::SampleFormat::F32 => {
            build_stream::<f32>(&device, &config, command_rx, takes_rx, status_tx)?
        }
        cpal::SampleFormat::I16 => {
            build_stream::<i16>(&device, &config, command_rx, takes_rx, status_tx)?
        }
        cpal::SampleFormat::U16 => {
            build_stream::<u16>(&device, &config, command_rx, takes_rx, status_tx)?
        }
        sample_format => anyhow::bail!("unsupported sample format '{sample_format}'"),
    };

    stream.play()?;

    Ok((stream, format))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut command_rx: rtrb::Consumer<Command>,
    mut takes_rx: rtrb::Consumer<SharedTake>,
    mut status_tx: rtrb::Producer<Status>,
) -> anyhow::Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let mut mixer = OutputMixer::new(config.sample_rate.0, config.channels);

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            mixer.receive(&mut takes_rx, &mut command_rx);
            mixer.render(data, &mut status_tx);
        },
        |err| log::error!("output stream error: {err}"),
        None,
    )?;

    Ok(stream)
}

impl AudioEngineHandle {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn send(&mut self, command: Command) -> anyhow::Result<()> {
        self.commands
            .push(command)
            .map_err(|_| anyhow::anyhow!("engine command queue is full"))
    }

    /// Resample `audio` to the output rate and hand it to the audio thread,
    /// which starts playing it on arrival. Returns its length in output
    /// frames.
    pub fn start_take(&mut self, id: TakeId, audio: &AudioArc) -> anyhow::Result<u64> {
        let audio = audio.resample(self.sample_rate)?;
        let frames = audio.frames() as u64;
        let shared = Shared::new(&self.handle, audio);
        self.takes
            .push((id, shared))
            .map_err(|_| anyhow::anyhow!("engine take queue is full"))?;
        Ok(frames)
    }

    /// Everything the audio thread reported since the last call.
    pub fn drain_status(&mut self) -> Vec<Status> {
        let mut out = Vec::new();
        while let Ok(status) = self.status.pop() {
            out.push(status);
        }
        out
    }

    /// Free take buffers the audio thread has let go of.
    pub fn collect(&mut self) {
        self.collector.collect();
    }

    pub fn suspend(&self) -> anyhow::Result<()> {
        self.control
            .send(StreamControl::Suspend)
            .map_err(|_| anyhow::anyhow!("audio thread is gone"))
    }

    pub fn resume(&self) -> anyhow::Result<()> {
        self.control
            .send(StreamControl::Resume)
            .map_err(|_| anyhow::anyhow!("audio thread is gone"))
    }
}

impl Drop for AudioEngineHandle {
    fn drop(&mut self) {
        let _ = self.control.send(StreamControl::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("audio thread panicked");
            }
        }
        self.collector.collect();
    }
}
