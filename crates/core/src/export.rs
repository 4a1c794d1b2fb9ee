use std::fmt::Display;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, TimeZone};
use metro_store::Recording;

/// `今天 HH:MM`, `昨天 HH:MM` or `M月D日 HH:MM`, relative to `now`.
pub fn format_recording_date<Tz: TimeZone>(date: &DateTime<Tz>, now: &DateTime<Tz>) -> String
where
    Tz::Offset: Display,
{
    let day = date.date_naive();
    let today = now.date_naive();
    let time = date.format("%H:%M");

    if day == today {
        format!("今天 {time}")
    } else if today.pred_opt() == Some(day) {
        format!("昨天 {time}")
    } else {
        format!("{}月{}日 {time}", date.month(), date.day())
    }
}

/// Minutes and zero-padded seconds: `3'07"`.
pub fn format_duration(ms: u64) -> String {
    let seconds = ms / 1000;
    format!("{}'{:02}\"", seconds / 60, seconds % 60)
}

/// Display date for a stored recording in the time zone of `now`.
pub fn recording_label<Tz: TimeZone>(recording: &Recording, now: &DateTime<Tz>) -> String
where
    Tz::Offset: Display,
{
    match DateTime::parse_from_rfc3339(&recording.date) {
        Ok(date) => format_recording_date(&date.with_timezone(&now.timezone()), now),
        Err(e) => {
            log::warn!("recording {} has an unreadable date: {e}", recording.id);
            recording.date.clone()
        }
    }
}

/// `录音_<date>.<ext>`
pub fn export_file_name<Tz: TimeZone>(recording: &Recording, now: &DateTime<Tz>) -> String
where
    Tz::Offset: Display,
{
    format!(
        "录音_{}.{}",
        recording_label(recording, now),
        metro_codec::extension_for(&recording.blob.mime_type)
    )
}

/// Write the recording's blob into `dir`. An existing file is never
/// overwritten; a numeric suffix is added instead.
pub async fn export_to_dir<Tz: TimeZone>(
    recording: &Recording,
    dir: &Path,
    now: &DateTime<Tz>,
) -> std::io::Result<PathBuf>
where
    Tz::Offset: Display,
{
    tokio::fs::create_dir_all(dir).await?;

    let name = export_file_name(recording, now);
    let mut path = dir.join(&name);
    let mut n = 1;
    while tokio::fs::try_exists(&path).await? {
        let stem = name.rsplit_once('.').map_or(name.as_str(), |(s, _)| s);
        let ext = metro_codec::extension_for(&recording.blob.mime_type);
        path = dir.join(format!("{stem} ({n}).{ext}"));
        n += 1;
    }

    tokio::fs::write(&path, &recording.blob.bytes).await?;
    log::info!("exported recording {} to {path:?}", recording.id);
    Ok(path)
}
