//! Turns device callback buffers into fixed-size canonical frames.
//!
//! Device callbacks deliver whatever the hardware gives us: any rate, any
//! channel count, any buffer length. The assembler downmixes, resamples to
//! the target rate, applies voice processing and cuts the result into
//! `block_size` frames. Resampler and processor state live as long as the
//! stream, so nothing is lost or duplicated at callback boundaries.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

use super::backend::{AudioFrame, AudioProcessing, CaptureMode};
use super::processing::VoiceProcessor;
use super::resample::{downmix_into, StreamResampler};

pub struct FrameAssembler {
    device_channels: usize,
    target_rate: u32,
    block_size: usize,
    source: CaptureMode,
    resampler: StreamResampler,
    processor: VoiceProcessor,
    pending: Vec<f32>,
    mono: Vec<f32>,
    resampled: Vec<f32>,
    emitted_samples: u64,
}

impl FrameAssembler {
    pub fn new(
        device_rate: u32,
        device_channels: usize,
        target_rate: u32,
        block_size: usize,
        source: CaptureMode,
        processing: AudioProcessing,
    ) -> Self {
        let block_size = block_size.max(1);
        Self {
            device_channels: device_channels.max(1),
            target_rate,
            block_size,
            source,
            resampler: StreamResampler::new(device_rate, target_rate),
            processor: VoiceProcessor::new(processing, target_rate),
            pending: Vec::with_capacity(block_size * 2),
            mono: Vec::new(),
            resampled: Vec::new(),
            emitted_samples: 0,
        }
    }

    /// Feed one interleaved callback buffer, returning every frame it completed
    pub fn push<T, F>(&mut self, data: &[T], convert: F) -> Vec<AudioFrame>
    where
        T: Copy,
        F: FnMut(T) -> f32,
    {
        self.mono.clear();
        downmix_into(&mut self.mono, data, self.device_channels, convert);

        self.resampled.clear();
        self.resampler.process(&self.mono, &mut self.resampled);
        self.processor.process(&self.resampled, &mut self.pending);

        let mut frames = Vec::new();
        while self.pending.len() >= self.block_size {
            let samples: Vec<f32> = self.pending.drain(..self.block_size).collect();
            let timestamp_ms = self.emitted_samples * 1000 / self.target_rate.max(1) as u64;
            self.emitted_samples += samples.len() as u64;
            frames.push(AudioFrame {
                samples,
                sample_rate: self.target_rate,
                timestamp_ms,
                source: self.source,
            });
        }
        frames
    }

    /// Whether voice processing runs on this stream
    pub fn is_processing(&self) -> bool {
        self.processor.is_active()
    }

    /// Samples waiting for the next full block
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Non-blocking hand-off from a capture callback to the session.
///
/// A full queue drops the frame instead of blocking the audio thread.
pub struct FrameSender {
    tx: mpsc::Sender<AudioFrame>,
    dropped: Arc<AtomicUsize>,
}

impl FrameSender {
    pub fn new(tx: mpsc::Sender<AudioFrame>, dropped: Arc<AtomicUsize>) -> Self {
        Self { tx, dropped }
    }

    /// Returns false once the receiving side is gone
    pub fn send(&self, frame: AudioFrame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!("Capture queue full, dropped frame ({} total)", dropped);
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}
