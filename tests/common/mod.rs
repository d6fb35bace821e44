// Shared fakes for integration tests: an in-memory connector, a scripted
// audio backend and a player that records how clips were played.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use loqa_interpreter::audio::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, CaptureMode,
};
use loqa_interpreter::error::{ChannelError, DeviceError, PlaybackError};
use loqa_interpreter::playback::AudioPlayer;
use loqa_interpreter::session::{SessionConfig, SessionDeps, SessionEvent, SessionStats};
use loqa_interpreter::transport::{channel_pair, ChannelEnds, Connection, Connector};
use loqa_interpreter::SessionHandle;
use tokio::sync::{broadcast, mpsc};

pub const WAIT: Duration = Duration::from_secs(2);

// ============================================================================
// Connector
// ============================================================================

/// Hands every opened channel's transport ends to the test
pub struct FakeConnector {
    pub connects: AtomicUsize,
    ends: mpsc::UnboundedSender<ChannelEnds>,
    /// Ends nobody is listening for stay open here
    unclaimed: Mutex<Vec<ChannelEnds>>,
    fail: bool,
}

impl FakeConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ChannelEnds>) {
        Self::build(false)
    }

    pub fn failing() -> (Arc<Self>, mpsc::UnboundedReceiver<ChannelEnds>) {
        Self::build(true)
    }

    fn build(fail: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<ChannelEnds>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            connects: AtomicUsize::new(0),
            ends: tx,
            unclaimed: Mutex::new(Vec::new()),
            fail,
        });
        (connector, rx)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Connector for FakeConnector {
    async fn connect(&self) -> Result<Connection, ChannelError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ChannelError::Connect("connection refused".to_string()));
        }
        let (connection, ends) = channel_pair(64);
        ends.mark_open();
        if let Err(mpsc::error::SendError(ends)) = self.ends.send(ends) {
            self.unclaimed.lock().unwrap().push(ends);
        }
        Ok(connection)
    }
}

// ============================================================================
// Audio
// ============================================================================

/// What the fake backends were asked to do
#[derive(Default)]
pub struct AudioProbe {
    pub created: AtomicUsize,
    pub started: AtomicUsize,
    pub stopped: AtomicUsize,
    pub released: AtomicUsize,
    frames: Mutex<Option<mpsc::Sender<AudioFrame>>>,
}

impl AudioProbe {
    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    /// Push one captured block into the running backend
    pub async fn send_frame(&self, samples: Vec<f32>) {
        let tx = self
            .frames
            .lock()
            .unwrap()
            .clone()
            .expect("backend not started");
        tx.send(AudioFrame {
            samples,
            sample_rate: 16000,
            timestamp_ms: 0,
            source: CaptureMode::Microphone,
        })
        .await
        .expect("session stopped reading frames");
    }

    /// Simulate the platform revoking the device
    pub fn revoke(&self) {
        self.frames.lock().unwrap().take();
    }
}

#[derive(Clone, Default)]
pub struct FakeAudioFactory {
    pub probe: Arc<AudioProbe>,
    pub fail_with: Option<DeviceError>,
    pub hang_on_stop: bool,
}

impl AudioBackendFactory for FakeAudioFactory {
    fn create(
        &self,
        _mode: CaptureMode,
        _config: &AudioBackendConfig,
    ) -> Result<Box<dyn AudioBackend>, DeviceError> {
        self.probe.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeBackend {
            probe: Arc::clone(&self.probe),
            fail_with: self.fail_with.clone(),
            hang_on_stop: self.hang_on_stop,
            capturing: false,
        }))
    }
}

struct FakeBackend {
    probe: Arc<AudioProbe>,
    fail_with: Option<DeviceError>,
    hang_on_stop: bool,
    capturing: bool,
}

#[async_trait::async_trait]
impl AudioBackend for FakeBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, DeviceError> {
        if let Some(e) = self.fail_with.clone() {
            return Err(e);
        }
        self.probe.started.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(16);
        *self.probe.frames.lock().unwrap() = Some(tx);
        self.capturing = true;
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), DeviceError> {
        if !self.capturing {
            return Ok(());
        }
        self.capturing = false;
        self.probe.stopped.fetch_add(1, Ordering::SeqCst);
        self.probe.frames.lock().unwrap().take();
        if self.hang_on_stop {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn release(&mut self) -> Result<(), DeviceError> {
        self.probe.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "fake"
    }
}

// ============================================================================
// Playback
// ============================================================================

/// One `play` call as observed by the recording player
#[derive(Debug, Clone)]
pub struct PlayRecord {
    pub clip: Vec<u8>,
    pub started: Instant,
    pub finished: Instant,
}

/// Sleeps for `delay` per clip; clips whose bytes are `fail` are rejected
pub struct RecordingPlayer {
    delay: Duration,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub plays: Mutex<Vec<PlayRecord>>,
}

impl RecordingPlayer {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            plays: Mutex::new(Vec::new()),
        })
    }

    pub fn plays(&self) -> Vec<PlayRecord> {
        self.plays.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl AudioPlayer for RecordingPlayer {
    async fn play(&self, clip: Vec<u8>) -> Result<(), PlaybackError> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);

        let started = Instant::now();
        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        let failed = clip == b"fail";
        self.plays.lock().unwrap().push(PlayRecord {
            clip,
            started,
            finished: Instant::now(),
        });
        if failed {
            return Err(PlaybackError::Rejected("autoplay blocked".to_string()));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub fn session_config() -> SessionConfig {
    SessionConfig {
        session_id: "test-session".to_string(),
        source_lang: "en".to_string(),
        target_lang: "ja".to_string(),
        teardown_step_timeout: Duration::from_millis(200),
        ..SessionConfig::default()
    }
}

pub fn deps(
    connector: Arc<FakeConnector>,
    audio: FakeAudioFactory,
    player: Arc<dyn AudioPlayer>,
) -> SessionDeps {
    SessionDeps {
        connector,
        audio: Arc::new(audio),
        player,
    }
}

/// Wait for the first event matching `pred`
pub async fn wait_for<F>(events: &mut broadcast::Receiver<SessionEvent>, mut pred: F) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("session event stream closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for session event")
}

/// Poll stats until `pred` holds
pub async fn wait_for_stats<F>(handle: &SessionHandle, pred: F) -> SessionStats
where
    F: Fn(&SessionStats) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            let stats = handle.stats().await.expect("session task alive");
            if pred(&stats) {
                return stats;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timed out waiting for session stats")
}
