//! MIME negotiation for recorded blobs.

/// Container types to try for a new recording, most preferred first.
pub const DEFAULT_PREFERENCES: [&str; 5] = [
    "audio/webm;codecs=opus",
    "audio/webm",
    "audio/ogg;codecs=opus",
    "audio/mp4",
    "audio/wav",
];

/// Used when nothing in the preference list has an encoder.
pub const PLATFORM_DEFAULT_MIME: &str = "audio/wav";

/// The type without parameters: `audio/webm;codecs=opus` -> `audio/webm`.
pub fn essence(mime_type: &str) -> &str {
    mime_type.split(';').next().unwrap_or_default().trim()
}

/// Whether [`crate::encode`] can produce this type.
pub fn is_type_supported(mime_type: &str) -> bool {
    let base = essence(mime_type).to_ascii_lowercase();
    matches!(base.as_str(), "audio/wav" | "audio/wave" | "audio/x-wav")
}

/// First supported entry of `preferences`, or `None` when nothing matches.
pub fn negotiate<S: AsRef<str>>(preferences: &[S]) -> Option<String> {
    preferences
        .iter()
        .map(AsRef::as_ref)
        .find(|mime| is_type_supported(mime))
        .map(str::to_owned)
}

/// Like [`negotiate`], falling back to [`PLATFORM_DEFAULT_MIME`].
pub fn negotiate_or_default<S: AsRef<str>>(preferences: &[S]) -> String {
    negotiate(preferences).unwrap_or_else(|| {
        log::info!("no preferred recording type supported, using {PLATFORM_DEFAULT_MIME}");
        PLATFORM_DEFAULT_MIME.to_owned()
    })
}

/// File extension for exported recordings. Unknown types export as `webm`.
pub fn extension_for(mime_type: &str) -> &'static str {
    let base = essence(mime_type).to_ascii_lowercase();
    match base.as_str() {
        "audio/webm" => "webm",
        "audio/ogg" => "ogg",
        "audio/mp4" => "m4a",
        "audio/mpeg" => "mp3",
        "audio/wav" | "audio/wave" | "audio/x-wav" => "wav",
        _ => "webm",
    }
}
