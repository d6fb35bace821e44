pub mod audio;
pub mod config;
pub mod error;
pub mod http;
pub mod playback;
pub mod router;
pub mod session;
pub mod transport;

pub use audio::{
    encode, AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, CaptureMode,
    EncodedChunk, PlatformBackendFactory,
};
pub use config::Config;
pub use error::{ChannelError, DeviceError, PlaybackError, SessionError};
pub use http::{create_router, AppState};
pub use playback::{AudioPlayer, CpalPlayer, NullPlayer, PlaybackQueue};
pub use router::{EventRouter, TranscriptLog};
pub use session::{
    LanguageChangePolicy, Session, SessionConfig, SessionDeps, SessionEvent, SessionHandle,
    SessionSnapshot, SessionState, SessionStats, TranscriptSegment,
};
pub use transport::{Connector, ControlMessage, InboundEvent, WebSocketConnector};
