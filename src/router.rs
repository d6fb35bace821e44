//! Event Router
//!
//! Classifies inbound JSON messages by their `type` field. Text fragments are
//! accumulated into the transcript log, synthesized clips go to the playback
//! queue, anything else is ignored.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::error::ChannelError;
use crate::playback::{PlaybackCounts, PlaybackQueue};
use crate::session::{SegmentKind, TranscriptSegment};
use crate::transport::InboundEvent;

/// What one inbound message turned into
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    Transcript { text: String, is_final: Option<bool> },
    Translation { text: String },
    /// A decoded clip was queued for playback
    Clip { bytes: usize },
    /// Unknown discriminant
    Ignored,
    Malformed(ChannelError),
}

/// Accumulated transcript and translation text
#[derive(Debug, Clone, Default)]
pub struct TranscriptLog {
    transcript: String,
    translation: String,
    segments: Vec<TranscriptSegment>,
}

impl TranscriptLog {
    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    pub fn translation(&self) -> &str {
        &self.translation
    }

    pub fn segments(&self) -> &[TranscriptSegment] {
        &self.segments
    }

    /// Append a fragment to its stream, separated by a space. Never replaces.
    pub fn append(&mut self, kind: SegmentKind, text: &str, is_final: Option<bool>) {
        let target = match kind {
            SegmentKind::Transcript => &mut self.transcript,
            SegmentKind::Translation => &mut self.translation,
        };
        if !text.is_empty() {
            if !target.is_empty() {
                target.push(' ');
            }
            target.push_str(text);
        }

        self.segments.push(TranscriptSegment {
            kind,
            text: text.to_string(),
            is_final,
            received_at: Utc::now(),
        });
    }

    pub fn clear(&mut self) {
        self.transcript.clear();
        self.translation.clear();
        self.segments.clear();
    }
}

/// Router counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RouterCounts {
    pub received: usize,
    pub malformed: usize,
    pub ignored: usize,
}

pub struct EventRouter {
    log: TranscriptLog,
    playback: PlaybackQueue,
    counts: RouterCounts,
}

impl EventRouter {
    pub fn new(playback: PlaybackQueue) -> Self {
        Self {
            log: TranscriptLog::default(),
            playback,
            counts: RouterCounts::default(),
        }
    }

    /// Route one inbound text frame
    pub fn route(&mut self, message: &str) -> Routed {
        self.counts.received += 1;

        let event = match InboundEvent::parse(message) {
            Ok(event) => event,
            Err(e) => return self.malformed(e),
        };

        match event {
            InboundEvent::Transcript { text, is_final } => {
                trace!("Transcript fragment: {:?}", text);
                self.log.append(SegmentKind::Transcript, &text, is_final);
                Routed::Transcript { text, is_final }
            }
            InboundEvent::Translation { text } => {
                trace!("Translation fragment: {:?}", text);
                self.log.append(SegmentKind::Translation, &text, None);
                Routed::Translation { text }
            }
            InboundEvent::Audio { payload } => match decode_payload(&payload) {
                Ok(clip) => {
                    let bytes = clip.len();
                    if !self.playback.enqueue(clip) {
                        debug!("Playback queue closed, {} byte clip discarded", bytes);
                    }
                    Routed::Clip { bytes }
                }
                Err(e) => self.malformed(e),
            },
            InboundEvent::Unknown => {
                self.counts.ignored += 1;
                debug!("Ignoring inbound message with unrecognized type");
                Routed::Ignored
            }
        }
    }

    fn malformed(&mut self, error: ChannelError) -> Routed {
        self.counts.malformed += 1;
        warn!(
            "Dropping inbound message ({} malformed so far): {}",
            self.counts.malformed, error
        );
        Routed::Malformed(error)
    }

    pub fn log(&self) -> &TranscriptLog {
        &self.log
    }

    /// Start a fresh linguistic context
    pub fn clear(&mut self) {
        self.log.clear();
    }

    pub fn counts(&self) -> RouterCounts {
        self.counts
    }

    pub fn playback(&self) -> &PlaybackQueue {
        &self.playback
    }

    pub fn playback_counts(&self) -> PlaybackCounts {
        self.playback.counts()
    }

    pub fn shutdown_playback(&mut self) {
        self.playback.shutdown();
    }
}

/// Decode a base64 clip payload. A `data:` URL prefix is tolerated.
fn decode_payload(payload: &str) -> Result<Vec<u8>, ChannelError> {
    let encoded = match payload.strip_prefix("data:") {
        Some(url) => url.split_once(',').map(|(_, data)| data).unwrap_or(""),
        None => payload,
    };
    STANDARD
        .decode(encoded.trim())
        .map_err(|e| ChannelError::Malformed(format!("audio payload is not base64: {}", e)))
}
