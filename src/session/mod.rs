//! Streaming session management
//!
//! This module provides the `Session` actor that manages:
//! - The lifecycle (idle -> connecting -> active -> closing -> closed)
//! - Audio capture wired through the PCM encoder into the channel
//! - Inbound events routed to transcript sinks and playback
//! - Live language changes
//! - Session statistics

mod config;
mod session;
mod state;
mod stats;

pub use config::{LanguageChangePolicy, SessionConfig};
pub use session::{Session, SessionDeps, SessionEvent, SessionHandle};
pub use state::SessionState;
pub use stats::{SegmentKind, SessionSnapshot, SessionStats, TranscriptSegment};
