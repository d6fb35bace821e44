use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

/// Outbound JSON control message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    Config {
        source_lang: String,
        target_lang: String,
    },
}

impl ControlMessage {
    pub fn config(source_lang: impl Into<String>, target_lang: impl Into<String>) -> Self {
        ControlMessage::Config {
            source_lang: source_lang.into(),
            target_lang: target_lang.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, ChannelError> {
        serde_json::to_string(self).map_err(|e| ChannelError::Send(e.to_string()))
    }
}

/// Inbound JSON event from the translation service
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundEvent {
    /// Recognized source-language text fragment
    Transcript {
        text: String,
        #[serde(default)]
        is_final: Option<bool>,
    },
    /// Translated target-language text fragment
    Translation { text: String },
    /// Synthesized speech, base64-encoded audio bytes
    Audio { payload: String },
    /// Any discriminant this client does not know
    #[serde(other)]
    Unknown,
}

impl InboundEvent {
    /// Parse one inbound text frame.
    ///
    /// Unknown `type` values parse to [`InboundEvent::Unknown`]; anything
    /// that is not a JSON object with a string `type` is malformed.
    pub fn parse(text: &str) -> Result<Self, ChannelError> {
        serde_json::from_str(text).map_err(|e| ChannelError::Malformed(e.to_string()))
    }
}
