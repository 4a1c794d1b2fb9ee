pub mod mime;

use std::io::Cursor;

use anyhow::Context;
use metro_transport::AudioArc;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

pub use mime::{
    DEFAULT_PREFERENCES, PLATFORM_DEFAULT_MIME, extension_for, is_type_supported, negotiate,
    negotiate_or_default,
};

/// Encode captured audio into a blob of the given MIME type.
pub fn encode(mime_type: &str, audio: &AudioArc) -> anyhow::Result<Vec<u8>> {
    if is_type_supported(mime_type) {
        encode_wav(audio)
    } else {
        anyhow::bail!("no encoder for '{mime_type}'")
    }
}

/// 16-bit PCM WAV, written into memory.
pub fn encode_wav(audio: &AudioArc) -> anyhow::Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: audio.channels(),
        sample_rate: audio.sample_rate(),
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(44 + audio.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &sample in audio.samples() {
            let scaled = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer.write_sample(scaled)?;
        }
        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}

/// Decode a stored blob back into interleaved f32 samples.
pub fn decode_blob(bytes: &[u8], mime_type: &str) -> anyhow::Result<AudioArc> {
    if bytes.is_empty() {
        anyhow::bail!("recording is empty");
    }

    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());

    let mut hint = Hint::new();
    hint.mime_type(mime::essence(mime_type));
    hint.with_extension(extension_for(mime_type));

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .with_context(|| format!("unrecognized audio data ({mime_type})"))?;

    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| anyhow::anyhow!("no default track"))?;

    let sample_rate = track.codec_params.sample_rate.unwrap_or(44100);
    let channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(1) as u16;
    let track_id = track.id;

    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(reason)) => {
                log::debug!("skipping corrupt packet: {reason}");
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let spec = *decoded.spec();
        let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(sample_buf.samples());
    }

    Ok(AudioArc::new(samples, sample_rate, channels.max(1)))
}
