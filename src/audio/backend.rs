use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::DeviceError;

/// Canonical capture rate expected by the translation service
pub const CANONICAL_SAMPLE_RATE: u32 = 16000;

/// Samples per outbound block (~256ms at 16kHz)
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// What to capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    /// Microphone input with voice processing
    #[default]
    Microphone,
    /// System output loopback (applications, browser, etc.)
    SystemAudio,
}

impl fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureMode::Microphone => write!(f, "microphone"),
            CaptureMode::SystemAudio => write!(f, "system_audio"),
        }
    }
}

/// Voice-processing flags requested from the capture device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AudioProcessing {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl AudioProcessing {
    /// Microphones get full voice processing; loopback capture gets none,
    /// since it degrades the fidelity of already-mixed output audio.
    pub fn for_mode(mode: CaptureMode) -> Self {
        let enabled = mode == CaptureMode::Microphone;
        Self {
            echo_cancellation: enabled,
            noise_suppression: enabled,
            auto_gain_control: enabled,
        }
    }

    /// No voice processing at all
    pub fn disabled() -> Self {
        Self::for_mode(CaptureMode::SystemAudio)
    }

    pub fn is_enabled(&self) -> bool {
        self.echo_cancellation || self.noise_suppression || self.auto_gain_control
    }
}

/// One fixed-size block of mono f32 samples
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Samples in the nominal [-1.0, 1.0] range
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Milliseconds since capture started
    pub timestamp_ms: u64,
    /// Capture mode that produced this frame
    pub source: CaptureMode,
}

impl AudioFrame {
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }
}

/// Configuration for audio backends
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Output sample rate (device audio is resampled to this)
    pub target_sample_rate: u32,
    /// Samples per emitted frame
    pub block_size: usize,
    /// Frames buffered between the capture callback and the session;
    /// the callback drops frames when this fills up
    pub queue_capacity: usize,
    /// Preferred device name (input device, or loopback device for system audio)
    pub device_name: Option<String>,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: CANONICAL_SAMPLE_RATE,
            block_size: DEFAULT_BLOCK_SIZE,
            queue_capacity: 16,
            device_name: None,
        }
    }
}

/// Audio capture backend
///
/// Implementations:
/// - `CpalBackend`: microphone and output loopback through cpal
/// - `FileBackend`: replays a WAV file at real-time cadence
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Open the device and start capturing.
    ///
    /// The returned receiver yields frames until capture stops. A receiver
    /// that ends while the session is still running means the device was
    /// lost or revoked.
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, DeviceError>;

    /// Stop all capture tracks. Calling this when not capturing is a no-op.
    async fn stop(&mut self) -> Result<(), DeviceError>;

    /// Release the device context once tracks are stopped.
    async fn release(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Frames dropped because the session fell behind the capture callback
    fn dropped_frames(&self) -> usize {
        0
    }

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Builds audio backends for a session
pub trait AudioBackendFactory: Send + Sync {
    fn create(
        &self,
        mode: CaptureMode,
        config: &AudioBackendConfig,
    ) -> Result<Box<dyn AudioBackend>, DeviceError>;
}

/// Default factory: a WAV file when one is configured, otherwise cpal devices
#[derive(Debug, Clone, Default)]
pub struct PlatformBackendFactory {
    file: Option<PathBuf>,
}

impl PlatformBackendFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Self {
            file: Some(path.into()),
        }
    }
}

impl AudioBackendFactory for PlatformBackendFactory {
    fn create(
        &self,
        mode: CaptureMode,
        config: &AudioBackendConfig,
    ) -> Result<Box<dyn AudioBackend>, DeviceError> {
        match &self.file {
            Some(path) => {
                let backend = super::file::FileBackend::new(path.clone(), mode, config.clone());
                Ok(Box::new(backend))
            }
            None => {
                let backend = super::cpal_backend::CpalBackend::new(mode, config.clone());
                Ok(Box::new(backend))
            }
        }
    }
}
