//! PCM encoder: normalized f32 samples -> 16-bit little-endian bytes.
//!
//! This is the only place the wire sample format is defined. Anything that
//! changes rate or channel layout happens upstream in the assembler.

/// Full-scale multiplier for 16-bit output
pub const PCM_SCALE: f32 = 32767.0;

/// Immutable buffer of i16 little-endian samples, one per input sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk(Vec<u8>);

impl EncodedChunk {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn sample_count(&self) -> usize {
        self.0.len() / 2
    }

    /// Decode back to i16 samples
    pub fn samples(&self) -> impl Iterator<Item = i16> + '_ {
        self.0
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
    }
}

/// Clamp each sample to [-1, 1], scale by 32767 and truncate toward zero.
///
/// NaN encodes as silence.
pub fn encode(frame: &[f32]) -> EncodedChunk {
    let mut bytes = Vec::with_capacity(frame.len() * 2);
    for &sample in frame {
        bytes.extend_from_slice(&quantize(sample).to_le_bytes());
    }
    EncodedChunk(bytes)
}

#[inline]
fn quantize(sample: f32) -> i16 {
    // `as` saturates and maps NaN to 0
    (sample.clamp(-1.0, 1.0) * PCM_SCALE) as i16
}
