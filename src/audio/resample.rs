// Sample-rate and channel-layout conversion
//
// Capture and playback both cross between the device's native format and
// 16kHz mono. Rate conversion uses rubato's sinc resampler. Capture keeps one
// `StreamResampler` per stream so filter state and leftover input carry over
// from one device callback to the next.

use rubato::{
    InterpolationParameters, InterpolationType, Resampler, SincFixedIn, WindowFunction,
};
use tracing::{debug, warn};

/// Input samples handed to rubato per call
const RESAMPLE_CHUNK: usize = 1024;

/// Average interleaved channels into mono, converting each sample with `convert`
pub fn downmix_into<T, F>(out: &mut Vec<f32>, data: &[T], channels: usize, mut convert: F)
where
    T: Copy,
    F: FnMut(T) -> f32,
{
    if channels <= 1 {
        out.extend(data.iter().copied().map(&mut convert));
        return;
    }

    for frame in data.chunks(channels) {
        let sum: f32 = frame.iter().copied().map(&mut convert).sum();
        out.push(sum / frame.len() as f32);
    }
}

/// Duplicate mono samples across `channels` interleaved outputs
pub fn upmix(mono: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return mono.to_vec();
    }
    let mut out = Vec::with_capacity(mono.len() * channels);
    for &sample in mono {
        out.extend(std::iter::repeat(sample).take(channels));
    }
    out
}

/// Mono resampler that keeps its state across calls.
///
/// Input is buffered until a full rubato chunk is available; the remainder
/// waits for the next call. Equal rates pass straight through.
pub struct StreamResampler {
    inner: Option<SincFixedIn<f32>>,
    pending: Vec<f32>,
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        let inner = if from_rate == to_rate || from_rate == 0 || to_rate == 0 {
            None
        } else {
            let params = InterpolationParameters {
                sinc_len: 64,
                f_cutoff: 0.90,
                interpolation: InterpolationType::Cubic,
                oversampling_factor: 256,
                window: WindowFunction::BlackmanHarris2,
            };
            let ratio = to_rate as f64 / from_rate as f64;
            match SincFixedIn::<f32>::new(ratio, 2.0, params, RESAMPLE_CHUNK, 1) {
                Ok(resampler) => {
                    debug!("Resampling {}Hz -> {}Hz", from_rate, to_rate);
                    Some(resampler)
                }
                Err(e) => {
                    warn!(
                        "Failed to create resampler {}Hz -> {}Hz, passing audio through: {}",
                        from_rate, to_rate, e
                    );
                    None
                }
            }
        };

        Self {
            inner,
            pending: Vec::with_capacity(RESAMPLE_CHUNK * 2),
        }
    }

    /// Whether samples are actually being converted
    pub fn is_active(&self) -> bool {
        self.inner.is_some()
    }

    /// Input samples waiting for a full chunk
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Resample `input`, appending whatever output is ready to `out`
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        let Some(resampler) = self.inner.as_mut() else {
            out.extend_from_slice(input);
            return;
        };

        self.pending.extend_from_slice(input);
        loop {
            let needed = resampler.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let chunk: Vec<f32> = self.pending.drain(..needed).collect();
            match resampler.process(std::slice::from_ref(&chunk), None) {
                Ok(mut channels) => {
                    if let Some(samples) = channels.pop() {
                        out.extend_from_slice(&samples);
                    }
                }
                Err(e) => warn!("Resampler dropped {} samples: {}", needed, e),
            }
        }
    }

    /// Push out buffered input, padding the last chunk with silence
    pub fn flush(&mut self, out: &mut Vec<f32>) {
        let Some(resampler) = self.inner.as_ref() else {
            return;
        };
        let needed = resampler.input_frames_next();
        // One extra chunk of silence drains the filter delay
        let padding = needed - self.pending.len() % needed + needed;
        let silence = vec![0.0; padding];
        self.process(&silence, out);
        self.pending.clear();
    }
}

/// Resample a whole mono buffer; the output length is the input length
/// scaled by `to_rate / from_rate`
pub fn resample(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 || input.is_empty() {
        return input.to_vec();
    }

    let expected = (input.len() as f64 * to_rate as f64 / from_rate as f64).round() as usize;
    let mut resampler = StreamResampler::new(from_rate, to_rate);
    let mut out = Vec::with_capacity(expected + RESAMPLE_CHUNK);
    resampler.process(input, &mut out);
    resampler.flush(&mut out);

    let last = out.last().copied().unwrap_or(0.0);
    out.resize(expected, last);
    out
}
