mod commands;
mod config;

use std::time::Duration;

use anyhow::Context;
use commands::Command;
use config::Config;
use metro_core::{NoticeKind, Session, SessionDevices, SessionSnapshot};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::MissedTickBehavior;

const POLL_INTERVAL: Duration = Duration::from_millis(16);

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::load();
    let session_config = config.session_config();
    log::info!("data directory {:?}", session_config.data_dir);

    let mut session = Session::open(session_config, SessionDevices::system()).await;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_notice = 0;

    println!("{}", commands::HELP);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                session.poll();
            }
            line = lines.next_line() => {
                let Some(line) = line.context("reading commands")? else {
                    break;
                };
                match commands::parse(&line) {
                    Ok(Some(Command::Quit)) => break,
                    Ok(Some(command)) => run(&mut session, &config, command).await,
                    Ok(None) => {}
                    Err(e) => println!("{e:#}"),
                }
            }
        }
        last_notice = print_notices(&session, last_notice);
    }

    session.shutdown();
    Ok(())
}

async fn run(session: &mut Session, config: &Config, command: Command) {
    match command {
        Command::Play => session.play(),
        Command::Stop => session.stop(),
        Command::Tempo(bpm) => println!("{}", session.set_tempo(bpm).await),
        Command::Preset(bpm) => {
            if session.config().presets.contains(&bpm) {
                println!("{}", session.apply_preset(bpm).await);
            } else {
                println!("no preset at {bpm}, presets are {:?}", session.config().presets);
            }
        }
        Command::Drag(bpm) => println!("{} (held)", session.drag_to(bpm).await),
        Command::Release => session.end_drag(),
        Command::Settings(patch) => session.update_settings(&patch).await,
        Command::Reset => session.reset_settings().await,
        Command::Record => match session.toggle_recording().await {
            Some(id) => println!("saved recording #{id}"),
            None if session.is_recording() => println!("recording, 'record' again to stop"),
            None => {}
        },
        Command::List => print_recordings(&session.snapshot()),
        Command::Toggle(id) => {
            if let Some(outcome) = session.toggle_playback(id) {
                println!("#{id}: {outcome:?}");
            }
        }
        Command::Delete(id) => {
            session.delete_recording(id).await;
        }
        Command::Export(id, dir) => {
            let dir = dir.unwrap_or_else(|| config.export_dir());
            if let Some(path) = session.export_recording(id, &dir).await {
                println!("{}", path.display());
            }
        }
        Command::Status => print_status(&session.snapshot()),
        Command::Help => println!("{}", commands::HELP),
        Command::Quit => {}
    }
}

fn print_status(snapshot: &SessionSnapshot) {
    let settings = &snapshot.settings;
    println!(
        "{} BPM ({}-{}) {}{}",
        snapshot.tempo,
        snapshot.tempo_range.min,
        snapshot.tempo_range.max,
        if snapshot.playing { "playing" } else { "stopped" },
        if snapshot.dragging { ", held" } else { "" },
    );
    println!(
        "{} {} volume {:.2} accent {:.2} ({})",
        settings.time_signature,
        settings.sound_type.as_str(),
        settings.volume,
        settings.accent_volume,
        if settings.accent_first { "on" } else { "off" },
    );

    let beats: Vec<&str> = snapshot
        .beats
        .iter()
        .map(|cell| match (cell.active, cell.first_beat) {
            (true, true) => "[X]",
            (true, false) => "[x]",
            (false, true) => "[.]",
            (false, false) => "[ ]",
        })
        .collect();
    println!("beats {}", beats.join(""));

    let pendulum = &snapshot.pendulum;
    println!(
        "pendulum bob {} swing {} ms{}",
        pendulum.bob_position,
        pendulum.swing_period_ms,
        if pendulum.active { "" } else { " (still)" },
    );

    let presets: Vec<String> = snapshot
        .presets
        .iter()
        .map(|p| if p.selected { format!("[{}]", p.bpm) } else { p.bpm.to_string() })
        .collect();
    println!("presets {}", presets.join(" "));

    if snapshot.recorder.recording {
        println!("recording {}", snapshot.recorder.clock);
    }
}

fn print_recordings(snapshot: &SessionSnapshot) {
    if snapshot.recordings.is_empty() {
        println!("暂无录音");
        return;
    }
    for row in &snapshot.recordings {
        let state = if row.playing {
            format!(" playing {:.0}%", row.progress)
        } else if row.paused {
            format!(" paused {:.0}%", row.progress)
        } else {
            String::new()
        };
        println!("#{:<4} {}  {}{state}", row.id, row.label, row.duration);
    }
}

/// Print notices newer than `last_seen` and return the newest id.
fn print_notices(session: &Session, last_seen: u64) -> u64 {
    let mut newest = last_seen;
    for notice in session.notices().active().filter(|n| n.id > last_seen) {
        let tag = match notice.kind {
            NoticeKind::Info => "info",
            NoticeKind::Success => "ok",
            NoticeKind::Warning => "warn",
            NoticeKind::Error => "error",
        };
        println!("[{tag}] {}", notice.text);
        newest = newest.max(notice.id);
    }
    newest
}
