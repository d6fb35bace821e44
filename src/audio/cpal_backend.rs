// Device capture through cpal
//
// Microphone: the named or default input device.
// System audio: a loopback/monitor source. PulseAudio and PipeWire expose
// these as input devices named "Monitor of ..."; WASAPI opens the default
// output device for loopback when an input stream is built on it.
//
// cpal streams are not Send on every platform, so each capture runs on its
// own thread that owns the stream until told to stop or until the stream
// reports an error. Dropping the stream drops the frame sender, which ends
// the session's frame receiver.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::assembler::{FrameAssembler, FrameSender};
use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame, AudioProcessing, CaptureMode};
use crate::error::DeviceError;

const LOOPBACK_HINTS: [&str; 4] = ["monitor", "loopback", "stereo mix", "what u hear"];

enum WorkerSignal {
    Stop,
    StreamError(String),
}

struct CaptureWorker {
    control: std_mpsc::Sender<WorkerSignal>,
    thread: Option<JoinHandle<()>>,
    stopped: bool,
}

/// cpal capture backend for both capture modes
pub struct CpalBackend {
    mode: CaptureMode,
    config: AudioBackendConfig,
    worker: Option<CaptureWorker>,
    dropped_frames: Arc<AtomicUsize>,
}

impl CpalBackend {
    pub fn new(mode: CaptureMode, config: AudioBackendConfig) -> Self {
        Self {
            mode,
            config,
            worker: None,
            dropped_frames: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for CpalBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, DeviceError> {
        if self.worker.is_some() {
            return Err(DeviceError::Backend("Already capturing".to_string()));
        }

        let processing = AudioProcessing::for_mode(self.mode);
        info!(
            "Starting cpal {} capture ({}Hz mono, {} sample blocks, aec={}, ns={}, agc={})",
            self.mode,
            self.config.target_sample_rate,
            self.config.block_size,
            processing.echo_cancellation,
            processing.noise_suppression,
            processing.auto_gain_control
        );

        let (frame_tx, frame_rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let (ready_tx, ready_rx) = oneshot::channel();
        let (control_tx, control_rx) = std_mpsc::channel();

        let mode = self.mode;
        let config = self.config.clone();
        let sender = FrameSender::new(frame_tx, Arc::clone(&self.dropped_frames));
        let error_tx = control_tx.clone();

        let thread = std::thread::Builder::new()
            .name("loqa-capture".to_string())
            .spawn(move || {
                run_capture(mode, config, processing, sender, ready_tx, control_rx, error_tx)
            })
            .map_err(|e| DeviceError::Backend(format!("Failed to spawn capture thread: {}", e)))?;

        match ready_rx.await {
            Ok(Ok(device_name)) => {
                info!("Capturing from '{}'", device_name);
                self.worker = Some(CaptureWorker {
                    control: control_tx,
                    thread: Some(thread),
                    stopped: false,
                });
                Ok(frame_rx)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(DeviceError::Backend(
                "Capture thread exited before the stream opened".to_string(),
            )),
        }
    }

    async fn stop(&mut self) -> Result<(), DeviceError> {
        let Some(worker) = self.worker.as_mut() else {
            return Ok(());
        };
        if worker.stopped {
            return Ok(());
        }

        info!("Stopping cpal capture");
        worker.stopped = true;
        // The worker may already have exited on a stream error
        let _ = worker.control.send(WorkerSignal::Stop);

        let dropped = self.dropped_frames();
        if dropped > 0 {
            warn!("{} capture frames were dropped (session queue full)", dropped);
        }
        Ok(())
    }

    async fn release(&mut self) -> Result<(), DeviceError> {
        let Some(mut worker) = self.worker.take() else {
            return Ok(());
        };
        let _ = worker.control.send(WorkerSignal::Stop);

        if let Some(thread) = worker.thread.take() {
            tokio::task::spawn_blocking(move || thread.join())
                .await
                .map_err(|e| DeviceError::Backend(format!("Release task failed: {}", e)))?
                .map_err(|_| DeviceError::Backend("Capture thread panicked".to_string()))?;
        }

        debug!("cpal capture device released");
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.worker.as_ref().map(|w| !w.stopped).unwrap_or(false)
    }

    fn dropped_frames(&self) -> usize {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    fn name(&self) -> &str {
        match self.mode {
            CaptureMode::Microphone => "cpal microphone",
            CaptureMode::SystemAudio => "cpal loopback",
        }
    }
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        if let Some(worker) = &self.worker {
            let _ = worker.control.send(WorkerSignal::Stop);
        }
    }
}

fn run_capture(
    mode: CaptureMode,
    config: AudioBackendConfig,
    processing: AudioProcessing,
    sender: FrameSender,
    ready_tx: oneshot::Sender<Result<String, DeviceError>>,
    control_rx: std_mpsc::Receiver<WorkerSignal>,
    error_tx: std_mpsc::Sender<WorkerSignal>,
) {
    let (stream, device_name) = match open_stream(mode, &config, processing, sender, error_tx) {
        Ok(opened) => opened,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(classify(e.to_string())));
        return;
    }
    if ready_tx.send(Ok(device_name)).is_err() {
        // start() was cancelled
        return;
    }

    match control_rx.recv() {
        Ok(WorkerSignal::Stop) | Err(_) => debug!("Capture worker stopping"),
        Ok(WorkerSignal::StreamError(e)) => warn!("Capture stream failed: {}", e),
    }

    if let Err(e) = stream.pause() {
        debug!("Failed to pause capture stream: {}", e);
    }
    drop(stream);
}

fn open_stream(
    mode: CaptureMode,
    config: &AudioBackendConfig,
    processing: AudioProcessing,
    sender: FrameSender,
    error_tx: std_mpsc::Sender<WorkerSignal>,
) -> Result<(cpal::Stream, String), DeviceError> {
    let host = cpal::default_host();
    let device = select_device(&host, mode, config.device_name.as_deref())?;
    let device_name = device
        .name()
        .unwrap_or_else(|_| "unknown device".to_string());

    // Loopback on WASAPI uses the output device's own format
    let supported = device
        .default_input_config()
        .or_else(|_| device.default_output_config())
        .map_err(|e| classify(e.to_string()))?;
    let format = supported.sample_format();
    let stream_config: StreamConfig = supported.into();
    let device_rate = stream_config.sample_rate.0;
    let channels = usize::from(stream_config.channels.max(1));

    debug!(
        "Capture device '{}': format={:?} rate={}Hz channels={}",
        device_name, format, device_rate, channels
    );

    let assembler = FrameAssembler::new(
        device_rate,
        channels,
        config.target_sample_rate,
        config.block_size,
        mode,
        processing,
    );
    let err_fn = move |err: cpal::StreamError| {
        let _ = error_tx.send(WorkerSignal::StreamError(err.to_string()));
    };

    let stream = match format {
        SampleFormat::F32 => {
            build_input::<f32>(&device, &stream_config, assembler, sender, err_fn, |s| s)
        }
        SampleFormat::I16 => build_input::<i16>(
            &device,
            &stream_config,
            assembler,
            sender,
            err_fn,
            |s| s as f32 / 32768.0,
        ),
        SampleFormat::U16 => build_input::<u16>(
            &device,
            &stream_config,
            assembler,
            sender,
            err_fn,
            |s| (s as f32 - 32768.0) / 32768.0,
        ),
        other => {
            return Err(DeviceError::Unsupported(format!(
                "sample format {:?}",
                other
            )))
        }
    }?;

    Ok((stream, device_name))
}

fn build_input<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut assembler: FrameAssembler,
    sender: FrameSender,
    err_fn: impl FnMut(cpal::StreamError) + Send + 'static,
    convert: fn(T) -> f32,
) -> Result<cpal::Stream, DeviceError>
where
    T: cpal::SizedSample + 'static,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                for frame in assembler.push(data, convert) {
                    if !sender.send(frame) {
                        break;
                    }
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| classify(e.to_string()))
}

fn select_device(
    host: &cpal::Host,
    mode: CaptureMode,
    preferred: Option<&str>,
) -> Result<cpal::Device, DeviceError> {
    match (mode, preferred) {
        (CaptureMode::Microphone, Some(name)) => find_input(host, |n| n == name)
            .ok_or_else(|| DeviceError::DeviceNotFound(name.to_string())),
        (CaptureMode::Microphone, None) => host
            .default_input_device()
            .ok_or_else(|| DeviceError::DeviceNotFound("default input".to_string())),
        (CaptureMode::SystemAudio, Some(name)) => find_input(host, |n| n == name)
            .or_else(|| find_output(host, name))
            .ok_or_else(|| DeviceError::DeviceNotFound(name.to_string())),
        (CaptureMode::SystemAudio, None) => {
            if let Some(device) = find_input(host, is_loopback_name) {
                return Ok(device);
            }
            if cfg!(target_os = "windows") {
                if let Some(device) = host.default_output_device() {
                    return Ok(device);
                }
            }
            Err(DeviceError::NoAudioTrack)
        }
    }
}

fn find_input(host: &cpal::Host, matches: impl Fn(&str) -> bool) -> Option<cpal::Device> {
    host.input_devices()
        .ok()?
        .find(|d| d.name().map(|n| matches(&n)).unwrap_or(false))
}

fn find_output(host: &cpal::Host, name: &str) -> Option<cpal::Device> {
    host.output_devices()
        .ok()?
        .find(|d| d.name().map(|n| n == name).unwrap_or(false))
}

fn is_loopback_name(name: &str) -> bool {
    let name = name.to_lowercase();
    LOOPBACK_HINTS.iter().any(|hint| name.contains(hint))
}

fn classify(message: String) -> DeviceError {
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized") {
        DeviceError::PermissionDenied(message)
    } else if lower.contains("no longer available") || lower.contains("not available") {
        DeviceError::Disconnected(message)
    } else {
        DeviceError::Backend(message)
    }
}

/// Input and output device names known to the default host
#[derive(Debug, Clone, Default)]
pub struct DeviceList {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

pub fn list_devices() -> Result<DeviceList, DeviceError> {
    let host = cpal::default_host();
    let inputs = host
        .input_devices()
        .map_err(|e| classify(e.to_string()))?
        .filter_map(|d| d.name().ok())
        .collect();
    let outputs = host
        .output_devices()
        .map_err(|e| classify(e.to_string()))?
        .filter_map(|d| d.name().ok())
        .collect();
    Ok(DeviceList { inputs, outputs })
}
