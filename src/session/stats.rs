use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::SessionState;
use crate::audio::CaptureMode;

/// Statistics about a streaming session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub session_id: String,

    /// Lifecycle state when the stats were taken
    pub state: SessionState,

    pub source_lang: String,
    pub target_lang: String,
    pub mode: CaptureMode,

    /// When `start()` was first accepted
    pub started_at: Option<DateTime<Utc>>,

    /// Seconds between start and close (or now, while running)
    pub duration_secs: f64,

    /// Audio chunks accepted by the channel
    pub chunks_sent: usize,

    /// Audio chunks dropped because the channel was not open or its queue was full
    pub chunks_dropped: usize,

    /// Frames dropped between the capture callback and the session
    pub capture_frames_dropped: usize,

    /// Inbound messages received
    pub inbound_events: usize,

    /// Inbound messages that failed to decode
    pub malformed_events: usize,

    /// Inbound messages with an unrecognized type
    pub ignored_events: usize,

    pub clips_queued: usize,
    pub clips_played: usize,
    pub clips_failed: usize,
}

/// Which text stream a segment belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    Transcript,
    Translation,
}

/// A single text fragment from the translation service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub kind: SegmentKind,

    /// Fragment text as received
    pub text: String,

    /// Final flag, when the service sends one
    pub is_final: Option<bool>,

    /// When this segment was received
    pub received_at: DateTime<Utc>,
}

/// Stats plus everything accumulated since the last language change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub stats: SessionStats,
    pub transcript: String,
    pub translation: String,
    pub segments: Vec<TranscriptSegment>,
}
