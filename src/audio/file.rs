use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame, CaptureMode};
use super::resample::{downmix_into, resample};
use crate::error::DeviceError;

/// A WAV file decoded to normalized f32 samples
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).context("Failed to open WAV file")?;

        let spec = reader.spec();
        let samples: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read audio samples")?,
            SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<Vec<_>, _>>()
                    .context("Failed to read audio samples")?
            }
        };

        let duration_seconds =
            samples.len() as f64 / (spec.sample_rate as f64 * spec.channels.max(1) as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Downmix to mono and resample to `target_rate`
    pub fn to_mono(&self, target_rate: u32) -> Vec<f32> {
        let mut mono = Vec::with_capacity(self.samples.len() / self.channels.max(1) as usize);
        downmix_into(&mut mono, &self.samples, self.channels as usize, |s| s);
        resample(&mono, self.sample_rate, target_rate)
    }
}

/// Replays a WAV file as if it were a live capture device.
///
/// Frames are paced at real-time cadence unless pacing is disabled. The
/// trailing partial block is zero-padded. End of file ends the stream.
pub struct FileBackend {
    path: PathBuf,
    mode: CaptureMode,
    config: AudioBackendConfig,
    realtime: bool,
    task: Option<JoinHandle<()>>,
}

impl FileBackend {
    pub fn new(path: PathBuf, mode: CaptureMode, config: AudioBackendConfig) -> Self {
        Self {
            path,
            mode,
            config,
            realtime: true,
            task: None,
        }
    }

    /// Emit frames as fast as the session consumes them
    pub fn without_pacing(mut self) -> Self {
        self.realtime = false;
        self
    }
}

#[async_trait::async_trait]
impl AudioBackend for FileBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, DeviceError> {
        if self.task.is_some() {
            return Err(DeviceError::Backend("Already capturing".to_string()));
        }

        let path = self.path.clone();
        let target_rate = self.config.target_sample_rate;
        let samples = tokio::task::spawn_blocking(move || {
            AudioFile::open(&path).map(|file| file.to_mono(target_rate))
        })
        .await
        .map_err(|e| DeviceError::Backend(e.to_string()))?
        .map_err(|e| DeviceError::DeviceNotFound(format!("{}: {:#}", self.path.display(), e)))?;

        let block_size = self.config.block_size.max(1);
        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let source = self.mode;
        let realtime = self.realtime;
        let block_duration =
            Duration::from_micros(block_size as u64 * 1_000_000 / target_rate.max(1) as u64);

        info!(
            "Replaying {} ({} blocks of {} samples)",
            self.path.display(),
            samples.len().div_ceil(block_size),
            block_size
        );

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(block_duration);
            for (index, block) in samples.chunks(block_size).enumerate() {
                if realtime {
                    ticker.tick().await;
                }
                let mut block = block.to_vec();
                block.resize(block_size, 0.0);
                let frame = AudioFrame {
                    samples: block,
                    sample_rate: target_rate,
                    timestamp_ms: (index * block_size) as u64 * 1000 / target_rate.max(1) as u64,
                    source,
                };
                if tx.send(frame).await.is_err() {
                    break;
                }
            }
            debug!("File source reached end of stream");
        }));

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), DeviceError> {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("File source stopped");
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    fn name(&self) -> &str {
        "WAV file"
    }
}
