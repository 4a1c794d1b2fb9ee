use std::path::PathBuf;

use anyhow::{Context, anyhow, bail};
use metro_core::{RecordingId, SettingsPatch, SoundType, TimeSignature};

pub const HELP: &str = "\
commands:
  play | stop
  tempo <bpm> | preset <bpm> | drag <bpm> | release
  sound <beep|click|wood> | volume <0-1> | accent-volume <0-1>
  accent <on|off> | signature <3/4|4/4> | reset
  record | list | toggle <id> | delete <id> | export <id> [dir]
  status | help | quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Play,
    Stop,
    Tempo(u32),
    Preset(u32),
    Drag(u32),
    Release,
    Settings(SettingsPatch),
    Reset,
    Record,
    List,
    Toggle(RecordingId),
    Delete(RecordingId),
    Export(RecordingId, Option<PathBuf>),
    Status,
    Help,
    Quit,
}

/// Parse one input line. Blank lines give `None`.
pub fn parse(line: &str) -> anyhow::Result<Option<Command>> {
    let mut words = line.split_whitespace();
    let Some(name) = words.next() else {
        return Ok(None);
    };
    let mut arg = |what: &str| words.next().ok_or_else(|| anyhow!("{name}: missing {what}"));

    let command = match name.to_ascii_lowercase().as_str() {
        "play" | "start" => Command::Play,
        "stop" => Command::Stop,
        "tempo" => Command::Tempo(number(arg("bpm")?)?),
        "preset" => Command::Preset(number(arg("bpm")?)?),
        "drag" => Command::Drag(number(arg("bpm")?)?),
        "release" => Command::Release,
        "sound" => {
            let sound: SoundType = arg("sound type")?.parse().map_err(anyhow::Error::msg)?;
            Command::Settings(SettingsPatch {
                sound_type: Some(sound),
                ..Default::default()
            })
        }
        "volume" => Command::Settings(SettingsPatch {
            volume: Some(level(arg("level")?)?),
            ..Default::default()
        }),
        "accent-volume" => Command::Settings(SettingsPatch {
            accent_volume: Some(level(arg("level")?)?),
            ..Default::default()
        }),
        "accent" => {
            let on = match arg("on or off")? {
                "on" => true,
                "off" => false,
                other => bail!("accent: expected on or off, got '{other}'"),
            };
            Command::Settings(SettingsPatch {
                accent_first: Some(on),
                ..Default::default()
            })
        }
        "signature" => {
            let signature: TimeSignature =
                arg("time signature")?.parse().map_err(anyhow::Error::msg)?;
            Command::Settings(SettingsPatch {
                time_signature: Some(signature),
                ..Default::default()
            })
        }
        "reset" => Command::Reset,
        "record" => Command::Record,
        "list" => Command::List,
        "toggle" => Command::Toggle(id(arg("recording id")?)?),
        "delete" => Command::Delete(id(arg("recording id")?)?),
        "export" => {
            let id = id(arg("recording id")?)?;
            Command::Export(id, arg("directory").ok().map(PathBuf::from))
        }
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => bail!("unknown command '{other}', try 'help'"),
    };

    Ok(Some(command))
}

fn number(raw: &str) -> anyhow::Result<u32> {
    raw.parse()
        .with_context(|| format!("'{raw}' is not a whole number"))
}

fn level(raw: &str) -> anyhow::Result<f32> {
    let value: f32 = raw
        .parse()
        .with_context(|| format!("'{raw}' is not a number"))?;
    if !value.is_finite() {
        bail!("'{raw}' is not a finite number");
    }
    Ok(value)
}

fn id(raw: &str) -> anyhow::Result<RecordingId> {
    raw.trim_start_matches('#')
        .parse()
        .map(RecordingId)
        .with_context(|| format!("'{raw}' is not a recording id"))
}
