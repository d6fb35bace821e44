use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

use super::config::{LanguageChangePolicy, SessionConfig};
use super::state::SessionState;
use super::stats::{SessionSnapshot, SessionStats};
use crate::audio::{encode, AudioBackend, AudioBackendFactory, AudioFrame};
use crate::error::{ChannelError, DeviceError, SessionError};
use crate::playback::{AudioPlayer, PlaybackQueue};
use crate::router::{EventRouter, Routed};
use crate::transport::{Channel, ChannelEvent, Connection, Connector, ControlMessage};

/// Collaborators injected into a session
#[derive(Clone)]
pub struct SessionDeps {
    pub connector: Arc<dyn Connector>,
    pub audio: Arc<dyn AudioBackendFactory>,
    pub player: Arc<dyn AudioPlayer>,
}

/// Observable session activity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    Transcript { text: String, is_final: Option<bool> },
    Translation { text: String },
    TranscriptCleared,
    LanguagesChanged { source_lang: String, target_lang: String },
    Ended { reason: String },
}

enum Command {
    Start(oneshot::Sender<Result<(), SessionError>>),
    Stop(oneshot::Sender<SessionStats>),
    SetLanguages {
        source_lang: String,
        target_lang: String,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    SwapLanguages(oneshot::Sender<Result<(), SessionError>>),
    Snapshot(oneshot::Sender<SessionSnapshot>),
}

/// Cloneable handle to a running session task
#[derive(Clone)]
pub struct SessionHandle {
    session_id: String,
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Whether both handles drive the same actor
    pub fn same_session(&self, other: &SessionHandle) -> bool {
        self.commands.same_channel(&other.commands)
    }

    /// Open the channel, send the language config, then start capture.
    ///
    /// Resolves once the session is active or has failed to start. Calling
    /// it on a session that already left `idle` is a no-op.
    pub async fn start(&self) -> Result<(), SessionError> {
        self.request(Command::Start).await?
    }

    /// Tear the session down and return its final stats
    pub async fn stop(&self) -> Result<SessionStats, SessionError> {
        self.request(Command::Stop).await
    }

    pub async fn set_languages(
        &self,
        source_lang: impl Into<String>,
        target_lang: impl Into<String>,
    ) -> Result<(), SessionError> {
        let source_lang = source_lang.into();
        let target_lang = target_lang.into();
        self.request(|reply| Command::SetLanguages {
            source_lang,
            target_lang,
            reply,
        })
        .await?
    }

    /// Exchange source and target languages
    pub async fn swap_languages(&self) -> Result<(), SessionError> {
        self.request(Command::SwapLanguages).await?
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        self.request(Command::Snapshot).await
    }

    pub async fn stats(&self) -> Result<SessionStats, SessionError> {
        Ok(self.snapshot().await?.stats)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| SessionError::Terminated)?;
        rx.await.map_err(|_| SessionError::Terminated)
    }
}

/// Resources held while the session streams
struct Live {
    channel: Option<Channel>,
    inbound: mpsc::UnboundedReceiver<ChannelEvent>,
    backend: Box<dyn AudioBackend>,
    frames: Option<mpsc::Receiver<AudioFrame>>,
}

enum Opening {
    Opened(Connection),
    Failed(ChannelError),
    /// Stop arrived (or every handle was dropped) before the channel opened
    Cancelled(Option<oneshot::Sender<SessionStats>>),
}

enum Step {
    Command(Option<Command>),
    Channel(Option<ChannelEvent>),
    Frame(Option<AudioFrame>),
}

#[derive(Default)]
struct Counters {
    chunks_sent: usize,
    chunks_dropped: usize,
    capture_frames_dropped: usize,
}

/// Session actor. Owns every piece of session state; commands, inbound
/// channel traffic and captured frames are handled one at a time.
pub struct Session {
    config: SessionConfig,
    deps: SessionDeps,
    state: SessionState,
    commands: mpsc::Receiver<Command>,
    events: broadcast::Sender<SessionEvent>,
    router: EventRouter,
    live: Option<Live>,
    counters: Counters,
    /// Languages changed while the channel could not take a config message
    config_pending: bool,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Spawn the session task in `idle`. Must be called inside a tokio runtime.
    pub fn spawn(config: SessionConfig, deps: SessionDeps) -> SessionHandle {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        let handle = SessionHandle {
            session_id: config.session_id.clone(),
            commands: command_tx,
            events: events.clone(),
        };

        let router = EventRouter::new(PlaybackQueue::new(Arc::clone(&deps.player)));
        info!(
            "Creating session {} ({} -> {}, {})",
            config.session_id, config.source_lang, config.target_lang, config.mode
        );

        let session = Session {
            config,
            deps,
            state: SessionState::Idle,
            commands: command_rx,
            events,
            router,
            live: None,
            counters: Counters::default(),
            config_pending: false,
            started_at: None,
            ended_at: None,
        };
        tokio::spawn(session.run());

        handle
    }

    async fn run(mut self) {
        loop {
            let (inbound, frames) = match self.live.as_mut() {
                Some(live) => (Some(&mut live.inbound), live.frames.as_mut()),
                None => (None, None),
            };

            let step = tokio::select! {
                biased;
                command = self.commands.recv() => Step::Command(command),
                event = next_event(inbound) => Step::Channel(event),
                frame = next_frame(frames) => Step::Frame(frame),
            };

            match step {
                Step::Command(Some(command)) => self.handle_command(command).await,
                Step::Command(None) => {
                    if self.live.is_some() {
                        self.teardown("all session handles dropped").await;
                    }
                    break;
                }
                Step::Channel(Some(ChannelEvent::Message(text))) => self.route(&text),
                Step::Channel(Some(ChannelEvent::Closed(reason))) => {
                    warn!("Channel {}, ending session", reason);
                    self.teardown(&format!("channel {}", reason)).await;
                }
                Step::Channel(None) => {
                    self.teardown("channel transport went away").await;
                }
                Step::Frame(Some(frame)) => self.forward_frame(frame),
                Step::Frame(None) => {
                    let lost = DeviceError::Disconnected("capture stream ended".to_string());
                    warn!("{}, ending session", lost);
                    self.teardown(&lost.to_string()).await;
                }
            }
        }

        debug!("Session {} task finished", self.config.session_id);
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start(reply) => {
                let result = self.start().await;
                let _ = reply.send(result);
            }
            Command::Stop(reply) => {
                self.stop().await;
                let _ = reply.send(self.stats());
            }
            Command::SetLanguages {
                source_lang,
                target_lang,
                reply,
            } => {
                let result = self.set_languages(source_lang, target_lang).await;
                let _ = reply.send(result);
            }
            Command::SwapLanguages(reply) => {
                let source = self.config.target_lang.clone();
                let target = self.config.source_lang.clone();
                let result = self.set_languages(source, target).await;
                let _ = reply.send(result);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    async fn start(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Idle {
            debug!("start() ignored, session is {}", self.state);
            return Ok(());
        }

        self.started_at = Some(Utc::now());
        self.transition(SessionState::Connecting);

        let connection = match self.open_channel().await {
            Opening::Opened(connection) => connection,
            Opening::Failed(e) => {
                error!("Failed to open channel: {}", e);
                self.finish(&format!("start failed: {}", e));
                return Err(e.into());
            }
            Opening::Cancelled(stop_reply) => {
                info!("Start cancelled before the channel opened");
                self.finish("stopped while connecting");
                if let Some(reply) = stop_reply {
                    let _ = reply.send(self.stats());
                }
                return Err(SessionError::NotActive(self.state));
            }
        };
        let Connection { channel, events } = connection;

        // Config goes out before the audio source even exists
        if let Err(e) = channel.send_control(&self.config_message()) {
            error!("Failed to send initial config: {}", e);
            channel.close();
            self.finish(&format!("start failed: {}", e));
            return Err(e.into());
        }

        let mut backend = match self.deps.audio.create(self.config.mode, &self.config.audio) {
            Ok(backend) => backend,
            Err(e) => {
                error!("Failed to create audio source: {}", e);
                channel.close();
                self.finish(&format!("start failed: {}", e));
                return Err(e.into());
            }
        };

        let frames = match backend.start().await {
            Ok(frames) => frames,
            Err(e) => {
                error!("Failed to open {} source: {}", backend.name(), e);
                channel.close();
                let step = self.config.teardown_step_timeout;
                bounded("stop audio capture", step, backend.stop()).await;
                bounded("release audio device", step, backend.release()).await;
                self.finish(&format!("start failed: {}", e));
                return Err(e.into());
            }
        };

        info!(
            "Session {} active: streaming {} via {}",
            self.config.session_id,
            self.config.mode,
            backend.name()
        );
        self.live = Some(Live {
            channel: Some(channel),
            inbound: events,
            backend,
            frames: Some(frames),
        });
        self.transition(SessionState::Active);
        Ok(())
    }

    /// Connect while still answering commands, so a stop issued during a
    /// slow connect is not stuck behind it
    async fn open_channel(&mut self) -> Opening {
        let connector = Arc::clone(&self.deps.connector);
        let connect = connector.connect();
        tokio::pin!(connect);

        loop {
            tokio::select! {
                result = &mut connect => {
                    return match result {
                        Ok(connection) => Opening::Opened(connection),
                        Err(e) => Opening::Failed(e),
                    };
                }
                command = self.commands.recv() => match command {
                    Some(Command::Stop(reply)) => return Opening::Cancelled(Some(reply)),
                    Some(Command::Start(reply)) => {
                        let _ = reply.send(Ok(()));
                    }
                    Some(Command::SetLanguages { source_lang, target_lang, reply }) => {
                        self.apply_languages(source_lang, target_lang);
                        let _ = reply.send(Ok(()));
                    }
                    Some(Command::SwapLanguages(reply)) => {
                        let source = self.config.target_lang.clone();
                        let target = self.config.source_lang.clone();
                        self.apply_languages(source, target);
                        let _ = reply.send(Ok(()));
                    }
                    Some(Command::Snapshot(reply)) => {
                        let _ = reply.send(self.snapshot());
                    }
                    None => return Opening::Cancelled(None),
                },
            }
        }
    }

    async fn stop(&mut self) {
        match self.state {
            SessionState::Idle => {
                info!("Session {} stopped before start", self.config.session_id);
                self.finish("stopped before start");
            }
            SessionState::Active => self.teardown("stopped").await,
            state => debug!("stop() ignored, session is {}", state),
        }
    }

    async fn set_languages(
        &mut self,
        source_lang: String,
        target_lang: String,
    ) -> Result<(), SessionError> {
        if !self.state.accepts_language_change() {
            return Err(SessionError::NotActive(self.state));
        }

        self.apply_languages(source_lang, target_lang);
        if self.state != SessionState::Active {
            return Ok(());
        }

        let channel_open = self
            .live
            .as_ref()
            .and_then(|live| live.channel.as_ref())
            .map(Channel::is_open)
            .unwrap_or(false);
        if !channel_open {
            debug!("Channel not open, language change sent once it reopens");
            self.config_pending = true;
            return Ok(());
        }

        match self.config.language_change {
            LanguageChangePolicy::LiveUpdate => {
                let message = self.config_message();
                if let Some(channel) = self.live.as_ref().and_then(|live| live.channel.as_ref()) {
                    match channel.send_control(&message) {
                        Ok(()) => self.config_pending = false,
                        Err(e) => {
                            warn!("Language update not sent, retrying before the next chunk: {}", e);
                            self.config_pending = true;
                        }
                    }
                }
            }
            LanguageChangePolicy::ResetChannel => self.reset_channel().await,
        }
        Ok(())
    }

    /// Update languages and start a fresh linguistic context
    fn apply_languages(&mut self, source_lang: String, target_lang: String) {
        info!("Languages: {} -> {}", source_lang, target_lang);
        self.config.source_lang = source_lang;
        self.config.target_lang = target_lang;

        self.router.clear();
        self.emit(SessionEvent::TranscriptCleared);
        self.emit(SessionEvent::LanguagesChanged {
            source_lang: self.config.source_lang.clone(),
            target_lang: self.config.target_lang.clone(),
        });
    }

    /// Replace the channel with a fresh one that starts with the current
    /// config. Capture keeps running; frames captured meanwhile are dropped.
    async fn reset_channel(&mut self) {
        let Some(live) = self.live.as_mut() else {
            return;
        };
        if let Some(old) = live.channel.take() {
            old.close();
        }
        info!("Resetting channel for language change");

        let connection = match self.deps.connector.connect().await {
            Ok(connection) => connection,
            Err(e) => {
                error!("Reconnect failed: {}", e);
                self.teardown(&format!("reconnect failed: {}", e)).await;
                return;
            }
        };

        if let Err(e) = connection.channel.send_control(&self.config_message()) {
            error!("Failed to send config on new channel: {}", e);
            connection.channel.close();
            self.teardown(&format!("reconnect failed: {}", e)).await;
            return;
        }

        self.config_pending = false;
        let Some(live) = self.live.as_mut() else {
            return;
        };
        live.channel = Some(connection.channel);
        live.inbound = connection.events;

        let mut stale = 0;
        if let Some(frames) = live.frames.as_mut() {
            while frames.try_recv().is_ok() {
                stale += 1;
            }
        }
        if stale > 0 {
            debug!("Discarded {} frames captured during reconnect", stale);
            self.counters.chunks_dropped += stale;
        }
    }

    fn route(&mut self, text: &str) {
        match self.router.route(text) {
            Routed::Transcript { text, is_final } => {
                self.emit(SessionEvent::Transcript { text, is_final })
            }
            Routed::Translation { text } => self.emit(SessionEvent::Translation { text }),
            Routed::Clip { bytes } => trace!("Queued {} byte clip", bytes),
            Routed::Ignored | Routed::Malformed(_) => {}
        }
    }

    fn forward_frame(&mut self, frame: AudioFrame) {
        let channel = match (self.state, self.live.as_ref()) {
            (SessionState::Active, Some(live)) => live.channel.as_ref(),
            _ => None,
        };

        let mut config_sent = false;
        let sent = match channel {
            Some(channel) if self.config_pending && channel.is_open() => {
                // Audio never goes out ahead of the languages it belongs to
                match channel.send_control(&self.config_message()) {
                    Ok(()) => {
                        config_sent = true;
                        channel.send_audio(encode(&frame.samples))
                    }
                    Err(e) => {
                        debug!("Pending language config not sent yet: {}", e);
                        false
                    }
                }
            }
            Some(channel) => channel.send_audio(encode(&frame.samples)),
            None => false,
        };
        if config_sent {
            info!(
                "Sent pending config ({} -> {})",
                self.config.source_lang, self.config.target_lang
            );
            self.config_pending = false;
        }

        if sent {
            self.counters.chunks_sent += 1;
            trace!(
                "Sent chunk {} ({} samples @ {}ms)",
                self.counters.chunks_sent,
                frame.samples.len(),
                frame.timestamp_ms
            );
        } else {
            self.counters.chunks_dropped += 1;
            debug!("Dropped audio chunk ({} total)", self.counters.chunks_dropped);
        }
    }

    /// Closing path shared by stop(), channel close and device loss. Every
    /// step runs, each bounded, whatever happened to the previous one.
    async fn teardown(&mut self, reason: &str) {
        let Some(mut live) = self.live.take() else {
            return;
        };
        info!("Session {} closing: {}", self.config.session_id, reason);
        self.transition(SessionState::Closing);
        let step = self.config.teardown_step_timeout;

        if let Some(channel) = live.channel.take() {
            channel.close();
        }
        debug!("Teardown 1/4: channel closed");

        bounded("stop audio capture", step, live.backend.stop()).await;
        debug!("Teardown 2/4: capture stopped");

        live.frames.take();
        debug!("Teardown 3/4: encoder disconnected");

        bounded("release audio device", step, live.backend.release()).await;
        debug!("Teardown 4/4: device released");

        self.counters.capture_frames_dropped = live.backend.dropped_frames();
        self.finish(reason);
    }

    fn finish(&mut self, reason: &str) {
        self.router.shutdown_playback();
        self.ended_at = Some(Utc::now());
        self.transition(SessionState::Closed);

        let stats = self.stats();
        info!(
            "Session {} closed after {:.1}s: {} chunks sent, {} dropped, {} inbound events",
            stats.session_id,
            stats.duration_secs,
            stats.chunks_sent,
            stats.chunks_dropped,
            stats.inbound_events
        );
        self.emit(SessionEvent::Ended {
            reason: reason.to_string(),
        });
    }

    fn transition(&mut self, next: SessionState) {
        if !self.state.can_transition_to(next) {
            warn!("Ignoring invalid transition {} -> {}", self.state, next);
            return;
        }
        info!("Session {}: {} -> {}", self.config.session_id, self.state, next);
        self.state = next;
        self.emit(SessionEvent::StateChanged(next));
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn config_message(&self) -> ControlMessage {
        ControlMessage::config(&self.config.source_lang, &self.config.target_lang)
    }

    fn stats(&self) -> SessionStats {
        let routing = self.router.counts();
        let playback = self.router.playback_counts();
        let capture_frames_dropped = match &self.live {
            Some(live) => live.backend.dropped_frames(),
            None => self.counters.capture_frames_dropped,
        };
        let duration_secs = self
            .started_at
            .map(|start| {
                let end = self.ended_at.unwrap_or_else(Utc::now);
                end.signed_duration_since(start).num_milliseconds() as f64 / 1000.0
            })
            .unwrap_or(0.0);

        SessionStats {
            session_id: self.config.session_id.clone(),
            state: self.state,
            source_lang: self.config.source_lang.clone(),
            target_lang: self.config.target_lang.clone(),
            mode: self.config.mode,
            started_at: self.started_at,
            duration_secs,
            chunks_sent: self.counters.chunks_sent,
            chunks_dropped: self.counters.chunks_dropped,
            capture_frames_dropped,
            inbound_events: routing.received,
            malformed_events: routing.malformed,
            ignored_events: routing.ignored,
            clips_queued: playback.queued,
            clips_played: playback.played,
            clips_failed: playback.failed,
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        let log = self.router.log();
        SessionSnapshot {
            stats: self.stats(),
            transcript: log.transcript().to_string(),
            translation: log.translation().to_string(),
            segments: log.segments().to_vec(),
        }
    }
}

async fn next_event(rx: Option<&mut mpsc::UnboundedReceiver<ChannelEvent>>) -> Option<ChannelEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_frame(rx: Option<&mut mpsc::Receiver<AudioFrame>>) -> Option<AudioFrame> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Run one teardown step with an upper bound; failures are logged only
async fn bounded<F>(step: &str, timeout: Duration, fut: F)
where
    F: Future<Output = Result<(), DeviceError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Teardown step '{}' failed: {}", step, e),
        Err(_) => warn!("Teardown step '{}' timed out after {:?}", step, timeout),
    }
}
