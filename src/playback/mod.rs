//! Playback of synthesized speech
//!
//! - `decode`: clip bytes -> PCM via symphonia
//! - `player`: the playback backend contract plus cpal and null backends
//! - `queue`: arrival-ordered, one-at-a-time playback

pub mod decode;
pub mod player;
pub mod queue;

pub use decode::{decode_clip, DecodedClip};
pub use player::{AudioPlayer, CpalPlayer, NullPlayer};
pub use queue::{PlaybackCounts, PlaybackItem, PlaybackQueue};
