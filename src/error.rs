//! Error taxonomy for a streaming session.
//!
//! Every error here is scoped to one session. Device and channel failures end
//! the session; malformed inbound messages and playback failures are logged
//! and skipped by the component that hit them.

use std::fmt;

use crate::session::SessionState;

/// Audio capture failures (permission, missing track, device loss)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The platform refused access to the capture device
    PermissionDenied(String),
    /// A system-audio request found no audio track to capture
    NoAudioTrack,
    /// A named device could not be found
    DeviceNotFound(String),
    /// The device exists but cannot deliver a usable stream
    Unsupported(String),
    /// The device disappeared or the stream was revoked mid-session
    Disconnected(String),
    /// Any other backend failure
    Backend(String),
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::PermissionDenied(e) => write!(f, "Audio device permission denied: {}", e),
            DeviceError::NoAudioTrack => {
                write!(f, "No audio track available for system audio capture")
            }
            DeviceError::DeviceNotFound(name) => write!(f, "Audio device '{}' not found", name),
            DeviceError::Unsupported(e) => write!(f, "Audio device unsupported: {}", e),
            DeviceError::Disconnected(e) => write!(f, "Audio device disconnected: {}", e),
            DeviceError::Backend(e) => write!(f, "Audio backend error: {}", e),
        }
    }
}

impl std::error::Error for DeviceError {}

/// Transport failures (connect, unexpected close, malformed payloads)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Failed to establish the connection
    Connect(String),
    /// The connection was closed or is not open for writing
    Closed(String),
    /// An inbound message could not be decoded
    Malformed(String),
    /// The outbound queue rejected a message
    Send(String),
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::Connect(e) => write!(f, "Failed to connect: {}", e),
            ChannelError::Closed(e) => write!(f, "Channel closed: {}", e),
            ChannelError::Malformed(e) => write!(f, "Malformed inbound message: {}", e),
            ChannelError::Send(e) => write!(f, "Failed to send: {}", e),
        }
    }
}

impl std::error::Error for ChannelError {}

/// Failures playing a single synthesized clip
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    /// Clip bytes could not be decoded to PCM
    Decode(String),
    /// The playback runtime refused or aborted playback
    Rejected(String),
    /// No output device is available
    Unavailable(String),
}

impl fmt::Display for PlaybackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackError::Decode(e) => write!(f, "Failed to decode clip: {}", e),
            PlaybackError::Rejected(e) => write!(f, "Playback rejected: {}", e),
            PlaybackError::Unavailable(e) => write!(f, "Playback unavailable: {}", e),
        }
    }
}

impl std::error::Error for PlaybackError {}

/// Errors surfaced through [`crate::SessionHandle`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Start aborted because the audio source could not be opened
    Device(DeviceError),
    /// Start aborted because the channel could not be opened
    Channel(ChannelError),
    /// The operation is not allowed in the current lifecycle state
    NotActive(SessionState),
    /// The session task is gone
    Terminated,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Device(e) => write!(f, "Session start failed: {}", e),
            SessionError::Channel(e) => write!(f, "Session start failed: {}", e),
            SessionError::NotActive(state) => write!(f, "Session is {}", state),
            SessionError::Terminated => write!(f, "Session task terminated"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Device(e) => Some(e),
            SessionError::Channel(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DeviceError> for SessionError {
    fn from(e: DeviceError) -> Self {
        SessionError::Device(e)
    }
}

impl From<ChannelError> for SessionError {
    fn from(e: ChannelError) -> Self {
        SessionError::Channel(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DeviceError::DeviceNotFound("USB Mic".to_string());
        assert!(err.to_string().contains("USB Mic"));

        let err = ChannelError::Connect("connection refused".to_string());
        assert!(err.to_string().contains("connection refused"));

        let err = SessionError::NotActive(SessionState::Closed);
        assert_eq!(err.to_string(), "Session is closed");
    }

    #[test]
    fn test_session_error_wraps_source() {
        use std::error::Error;

        let err = SessionError::from(DeviceError::NoAudioTrack);
        assert!(err.source().is_some());
        assert!(err.to_string().contains("No audio track"));
    }
}
