use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::audio::{AudioBackendConfig, CaptureMode};
use crate::session::{LanguageChangePolicy, SessionConfig};

/// Default config file, looked up with any extension the `config` crate knows
pub const DEFAULT_CONFIG_PATH: &str = "config/loqa-interpreter";

/// Environment prefix, e.g. `LOQA_TRANSPORT__URL`
pub const ENV_PREFIX: &str = "LOQA";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub transport: TransportConfig,
    pub audio: AudioConfig,
    pub session: SessionSettings,
    pub playback: PlaybackConfig,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// Websocket endpoint of the translation service
    pub url: String,
    /// Outbound frames buffered before audio chunks start dropping
    pub outbound_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    pub mode: CaptureMode,
    pub sample_rate: u32,
    pub block_size: usize,
    pub frame_queue_capacity: usize,
    #[serde(default)]
    pub input_device: Option<String>,
    /// Replay this WAV file instead of opening a device
    #[serde(default)]
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionSettings {
    pub source_lang: String,
    pub target_lang: String,
    pub language_change: LanguageChangePolicy,
    pub teardown_step_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaybackConfig {
    pub enabled: bool,
    #[serde(default)]
    pub output_device: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Config {
    /// Load compiled defaults, then the optional file at `path`, then
    /// `LOQA_*` environment variables
    pub fn load(path: &str) -> Result<Self> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    pub fn load_with_prefix(path: &str, env_prefix: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .set_default("service.name", "loqa-interpreter")?
            .set_default("transport.url", "ws://localhost:8001/ws")?
            .set_default("transport.outbound_capacity", 32_i64)?
            .set_default("audio.mode", "microphone")?
            .set_default("audio.sample_rate", 16000_i64)?
            .set_default("audio.block_size", 4096_i64)?
            .set_default("audio.frame_queue_capacity", 16_i64)?
            .set_default("session.source_lang", "en")?
            .set_default("session.target_lang", "ja")?
            .set_default("session.language_change", "live_update")?
            .set_default("session.teardown_step_timeout_ms", 2000_i64)?
            .set_default("playback.enabled", true)?
            .set_default("http.bind", "127.0.0.1")?
            .set_default("http.port", 8090_i64)?
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(env_prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path))?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }

    pub fn audio_backend_config(&self) -> AudioBackendConfig {
        AudioBackendConfig {
            target_sample_rate: self.audio.sample_rate,
            block_size: self.audio.block_size,
            queue_capacity: self.audio.frame_queue_capacity,
            device_name: self.audio.input_device.clone(),
        }
    }

    /// Template for sessions created from this configuration
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            source_lang: self.session.source_lang.clone(),
            target_lang: self.session.target_lang.clone(),
            mode: self.audio.mode,
            language_change: self.session.language_change,
            audio: self.audio_backend_config(),
            teardown_step_timeout: Duration::from_millis(self.session.teardown_step_timeout_ms),
            ..SessionConfig::default()
        }
    }
}
