// Integration tests for the WAV file audio source
//
// These tests verify that we can read WAV files, normalize them to 16kHz mono
// and replay them as fixed-size capture blocks.

use anyhow::Result;
use loqa_interpreter::audio::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFile, CaptureMode, FileBackend,
    PlatformBackendFactory,
};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn write_wav(dir: &Path, name: &str, sample_rate: u32, channels: u16, samples: &[i16]) -> Result<PathBuf> {
    let path = dir.join(name);
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(path)
}

fn small_config() -> AudioBackendConfig {
    AudioBackendConfig {
        block_size: 1600,
        ..AudioBackendConfig::default()
    }
}

#[test]
fn test_audio_file_open() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_wav(dir.path(), "speech.wav", 16000, 1, &vec![8192; 8000])?;

    let audio = AudioFile::open(&path)?;

    assert!((audio.duration_seconds - 0.5).abs() < 1e-6, "Duration should be 0.5s");
    assert_eq!(audio.sample_rate, 16000);
    assert_eq!(audio.channels, 1);
    assert_eq!(audio.samples.len(), 8000);
    assert!((audio.samples[0] - 0.25).abs() < 1e-4, "Samples normalized to [-1, 1]");
    assert!(audio.path.contains("speech.wav"));

    Ok(())
}

#[test]
fn test_audio_file_to_mono_resamples() -> Result<()> {
    let dir = TempDir::new()?;
    // 0.25s of 48kHz stereo
    let stereo: Vec<i16> = (0..12000).flat_map(|_| [16384, 0]).collect();
    let path = write_wav(dir.path(), "stereo.wav", 48000, 2, &stereo)?;

    let audio = AudioFile::open(&path)?;
    let mono = audio.to_mono(16000);

    let diff = (mono.len() as i64 - 4000).abs();
    assert!(diff <= 1, "Expected ~4000 samples at 16kHz, got {}", mono.len());
    assert!((mono[2000] - 0.25).abs() < 0.01, "Channels averaged");

    Ok(())
}

#[test]
fn test_audio_file_nonexistent() {
    let path = PathBuf::from("/nonexistent/path/to/audio.wav");
    let result = AudioFile::open(&path);

    assert!(result.is_err(), "Opening nonexistent file should fail");
}

#[tokio::test]
async fn test_file_backend_emits_padded_blocks() -> Result<()> {
    let dir = TempDir::new()?;
    let path = write_wav(dir.path(), "short.wav", 16000, 1, &vec![1000; 4000])?;

    let mut backend =
        FileBackend::new(path, CaptureMode::Microphone, small_config()).without_pacing();
    let mut frames = backend.start().await?;

    let mut received = Vec::new();
    while let Some(frame) = frames.recv().await {
        received.push(frame);
    }

    assert_eq!(received.len(), 3, "4000 samples -> 3 blocks of 1600");
    assert!(received.iter().all(|f| f.samples.len() == 1600));
    assert_eq!(received[2].samples[800], 0.0, "Last block zero-padded");
    assert_ne!(received[2].samples[0], 0.0);
    assert_eq!(received[1].timestamp_ms, 100);
    assert_eq!(received[0].sample_rate, 16000);

    backend.stop().await?;
    backend.stop().await?;
    assert!(!backend.is_capturing());

    Ok(())
}

#[tokio::test]
async fn test_missing_file_is_device_error() -> Result<()> {
    let factory = PlatformBackendFactory::with_file("/nonexistent/input.wav");
    let mut backend = factory.create(CaptureMode::SystemAudio, &small_config())?;

    assert!(backend.start().await.is_err(), "Missing file cannot start");
    assert!(backend.stop().await.is_ok(), "Stop when not started is a no-op");

    Ok(())
}
