use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::audio::{AudioBackendConfig, CaptureMode};

/// How a language change reaches the translation service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LanguageChangePolicy {
    /// Send a new config message on the open channel
    #[default]
    LiveUpdate,
    /// Close the channel and reconnect; the new channel starts with the
    /// updated config
    ResetChannel,
}

/// Configuration for a streaming session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Unique session identifier (e.g., "interpreter-7f3a...")
    pub session_id: String,

    /// Language tag of the captured speech
    pub source_lang: String,

    /// Language tag to translate into
    pub target_lang: String,

    pub mode: CaptureMode,

    pub language_change: LanguageChangePolicy,

    /// Capture settings handed to the audio backend
    pub audio: AudioBackendConfig,

    /// Upper bound for each teardown step
    /// Default: 2 seconds
    pub teardown_step_timeout: Duration,

    /// Buffered session events per subscriber
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: format!("interpreter-{}", uuid::Uuid::new_v4()),
            source_lang: "en".to_string(),
            target_lang: "ja".to_string(),
            mode: CaptureMode::Microphone,
            language_change: LanguageChangePolicy::LiveUpdate,
            audio: AudioBackendConfig::default(),
            teardown_step_timeout: Duration::from_secs(2),
            event_capacity: 256,
        }
    }
}
