use std::io::Cursor;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

use crate::error::PlaybackError;

/// A synthesized clip decoded to interleaved f32 PCM
#[derive(Debug, Clone)]
pub struct DecodedClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedClip {
    pub fn duration_secs(&self) -> f64 {
        let frames = self.samples.len() as f64 / self.channels.max(1) as f64;
        frames / self.sample_rate.max(1) as f64
    }

    /// Mono mix of the clip
    pub fn mono(&self) -> Vec<f32> {
        let mut mono = Vec::with_capacity(self.samples.len() / self.channels.max(1) as usize);
        crate::audio::resample::downmix_into(&mut mono, &self.samples, self.channels as usize, |s| s);
        mono
    }
}

/// Decode any container/codec symphonia can probe (WAV, MP3, OGG, FLAC, ...)
pub fn decode_clip(bytes: Vec<u8>) -> Result<DecodedClip, PlaybackError> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| PlaybackError::Decode(e.to_string()))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| PlaybackError::Decode("no audio track in clip".to_string()))?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| PlaybackError::Decode(e.to_string()))?;

    let mut samples = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(PlaybackError::Decode(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                channels = spec.channels.count() as u16;
                let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buffer.samples());
            }
            Err(SymphoniaError::DecodeError(e)) => debug!("Skipping corrupt packet: {}", e),
            Err(e) => return Err(PlaybackError::Decode(e.to_string())),
        }
    }

    if samples.is_empty() || sample_rate == 0 || channels == 0 {
        return Err(PlaybackError::Decode("clip contains no audio".to_string()));
    }

    Ok(DecodedClip {
        samples,
        sample_rate,
        channels,
    })
}
