// Voice processing for microphone capture
//
// WebRTC's audio processing module works on 10ms frames, so samples are
// buffered until a full frame is available. Microphone capture runs noise
// suppression, gain control and echo cancellation behind a high-pass
// filter. System audio is already-mixed output and passes through untouched.

use webrtc_audio_processing::config::{
    EchoCanceller, GainController, GainController2, HighPassFilter, NoiseSuppression,
    NoiseSuppressionLevel,
};
use webrtc_audio_processing::{Config, Processor};
use tracing::{debug, warn};

use super::backend::AudioProcessing;

pub struct VoiceProcessor {
    apm: Option<Processor>,
    frame_len: usize,
    pending: Vec<f32>,
    errors: usize,
}

impl VoiceProcessor {
    /// Build a processor for mono audio at `sample_rate`. When no processing
    /// is requested, or the rate is one WebRTC cannot handle, samples pass
    /// through unchanged.
    pub fn new(settings: AudioProcessing, sample_rate: u32) -> Self {
        let apm = if settings.is_enabled() {
            create_apm(settings, sample_rate)
        } else {
            None
        };
        let frame_len = apm
            .as_ref()
            .map(|apm| apm.num_samples_per_frame())
            .unwrap_or(0);

        Self {
            apm,
            frame_len,
            pending: Vec::with_capacity(frame_len * 2),
            errors: 0,
        }
    }

    /// Whether samples go through WebRTC processing
    pub fn is_active(&self) -> bool {
        self.apm.is_some()
    }

    /// Samples waiting for a full 10ms frame
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Process `input`, appending every completed frame to `out`
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        let Some(apm) = self.apm.as_mut() else {
            out.extend_from_slice(input);
            return;
        };

        self.pending.extend_from_slice(input);
        let mut consumed = 0;
        while self.pending.len() - consumed >= self.frame_len {
            let frame = &mut self.pending[consumed..consumed + self.frame_len];
            if let Err(e) = apm.process_capture_frame([&mut *frame]) {
                self.errors += 1;
                // Unprocessed audio is still better than a gap
                if self.errors == 1 {
                    warn!("Voice processing failed, passing frame through: {}", e);
                }
            }
            out.extend_from_slice(frame);
            consumed += self.frame_len;
        }
        self.pending.drain(..consumed);
    }
}

fn create_apm(settings: AudioProcessing, sample_rate: u32) -> Option<Processor> {
    let apm = match Processor::new(sample_rate) {
        Ok(apm) => apm,
        Err(e) => {
            warn!(
                "Voice processing unavailable at {}Hz, capturing unprocessed audio: {}",
                sample_rate, e
            );
            return None;
        }
    };

    let mut config = Config::default();
    config.high_pass_filter = Some(HighPassFilter::default());
    config.noise_suppression = settings.noise_suppression.then(|| NoiseSuppression {
        level: NoiseSuppressionLevel::High,
        analyze_linear_aec_output: false,
    });
    config.gain_controller = settings
        .auto_gain_control
        .then(|| GainController::GainController2(GainController2::default()));
    config.echo_canceller = settings
        .echo_cancellation
        .then(|| EchoCanceller::Full {
            stream_delay_ms: None,
        });
    apm.set_config(config);

    debug!(
        "Voice processing at {}Hz: aec={} ns={} agc={}",
        sample_rate,
        settings.echo_cancellation,
        settings.noise_suppression,
        settings.auto_gain_control
    );
    Some(apm)
}
