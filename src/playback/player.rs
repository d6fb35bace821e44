use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use tracing::{debug, info};

use super::decode::decode_clip;
use crate::audio::resample::{resample, upmix};
use crate::error::PlaybackError;

/// Extra time allowed past a clip's nominal duration before giving up
const PLAYBACK_GRACE: Duration = Duration::from_secs(2);

/// Output device buffers still hold audio when the last sample is handed over
const DRAIN_TAIL: Duration = Duration::from_millis(80);

/// Playback backend: plays one clip to completion or fails. No queueing.
#[async_trait::async_trait]
pub trait AudioPlayer: Send + Sync {
    async fn play(&self, clip: Vec<u8>) -> Result<(), PlaybackError>;

    fn name(&self) -> &str;
}

/// Accepts clips and discards them (headless sessions)
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPlayer;

#[async_trait::async_trait]
impl AudioPlayer for NullPlayer {
    async fn play(&self, clip: Vec<u8>) -> Result<(), PlaybackError> {
        debug!("Discarding {} byte clip (playback disabled)", clip.len());
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// Plays clips on a cpal output device
#[derive(Debug, Default, Clone)]
pub struct CpalPlayer {
    device_name: Option<String>,
}

impl CpalPlayer {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

#[async_trait::async_trait]
impl AudioPlayer for CpalPlayer {
    async fn play(&self, clip: Vec<u8>) -> Result<(), PlaybackError> {
        let device_name = self.device_name.clone();
        tokio::task::spawn_blocking(move || play_blocking(clip, device_name.as_deref()))
            .await
            .map_err(|e| PlaybackError::Rejected(format!("playback task failed: {}", e)))?
    }

    fn name(&self) -> &str {
        "cpal"
    }
}

fn play_blocking(bytes: Vec<u8>, device_name: Option<&str>) -> Result<(), PlaybackError> {
    let clip = decode_clip(bytes)?;

    let host = cpal::default_host();
    let device = match device_name {
        Some(name) => host
            .output_devices()
            .map_err(|e| PlaybackError::Unavailable(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| PlaybackError::Unavailable(format!("output device '{}' not found", name)))?,
        None => host
            .default_output_device()
            .ok_or_else(|| PlaybackError::Unavailable("no default output device".to_string()))?,
    };

    let supported = device
        .default_output_config()
        .map_err(|e| PlaybackError::Unavailable(e.to_string()))?;
    let format = supported.sample_format();
    let config: StreamConfig = supported.into();
    let out_rate = config.sample_rate.0;
    let out_channels = usize::from(config.channels.max(1));

    let resampled = resample(&clip.mono(), clip.sample_rate, out_rate);
    let samples = upmix(&resampled, out_channels);

    info!(
        "Playing {:.2}s clip ({}Hz -> {}Hz, {} channels)",
        clip.duration_secs(),
        clip.sample_rate,
        out_rate,
        out_channels
    );

    let (done_tx, done_rx) = std_mpsc::channel();
    let stream = match format {
        SampleFormat::F32 => build_output::<f32>(&device, &config, samples, done_tx),
        SampleFormat::I16 => build_output::<i16>(&device, &config, samples, done_tx),
        SampleFormat::U16 => build_output::<u16>(&device, &config, samples, done_tx),
        other => Err(PlaybackError::Unavailable(format!(
            "unsupported output format {:?}",
            other
        ))),
    }?;

    stream
        .play()
        .map_err(|e| PlaybackError::Rejected(e.to_string()))?;

    let timeout = Duration::from_secs_f64(clip.duration_secs()) + PLAYBACK_GRACE;
    let result = match done_rx.recv_timeout(timeout) {
        Ok(Ok(())) => {
            std::thread::sleep(DRAIN_TAIL);
            Ok(())
        }
        Ok(Err(e)) => Err(PlaybackError::Rejected(e)),
        Err(_) => Err(PlaybackError::Rejected("playback timed out".to_string())),
    };
    drop(stream);
    result
}

fn build_output<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    samples: Vec<f32>,
    done_tx: std_mpsc::Sender<Result<(), String>>,
) -> Result<cpal::Stream, PlaybackError>
where
    T: SizedSample + FromSample<f32>,
{
    let err_tx = done_tx.clone();
    let mut position = 0usize;
    let mut finished = false;

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                for out in data.iter_mut() {
                    let sample = samples.get(position).copied().unwrap_or(0.0);
                    position = position.saturating_add(1);
                    *out = T::from_sample(sample);
                }
                if !finished && position >= samples.len() {
                    finished = true;
                    let _ = done_tx.send(Ok(()));
                }
            },
            move |err| {
                let _ = err_tx.send(Err(err.to_string()));
            },
            None,
        )
        .map_err(|e| PlaybackError::Unavailable(e.to_string()))
}
