pub mod assembler;
pub mod backend;
pub mod cpal_backend;
pub mod file;
pub mod pcm;
pub mod processing;
pub mod resample;

pub use assembler::{FrameAssembler, FrameSender};
pub use backend::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioProcessing,
    CaptureMode, PlatformBackendFactory, CANONICAL_SAMPLE_RATE, DEFAULT_BLOCK_SIZE,
};
pub use cpal_backend::{list_devices, CpalBackend, DeviceList};
pub use file::{AudioFile, FileBackend};
pub use pcm::{encode, EncodedChunk};
pub use processing::VoiceProcessor;
pub use resample::StreamResampler;
