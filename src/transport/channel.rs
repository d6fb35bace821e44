//! Transport-agnostic duplex channel.
//!
//! The session holds a [`Channel`] for writing and a receiver of
//! [`ChannelEvent`]s for reading. A transport implementation (websocket, or
//! an in-memory pair in tests) holds the matching [`ChannelEnds`] and pumps
//! bytes between them and the network.
//!
//! All outbound traffic goes through one bounded FIFO queue, so a control
//! message is always written before any audio chunk queued after it.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace};

use super::messages::ControlMessage;
use crate::audio::EncodedChunk;
use crate::error::ChannelError;

/// Connection status; only `Open` accepts writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelStatus {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ChannelStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ChannelStatus::Connecting,
            1 => ChannelStatus::Open,
            2 => ChannelStatus::Closing,
            _ => ChannelStatus::Closed,
        }
    }
}

/// One queued outbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Raw PCM, sent as a binary frame
    Audio(EncodedChunk),
    /// JSON control message, sent as a text frame
    Control(String),
}

/// Why a channel closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// This client closed it
    Local,
    /// The service closed it
    Remote(String),
    /// The connection failed
    Error(ChannelError),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Local => write!(f, "closed locally"),
            CloseReason::Remote(reason) if reason.is_empty() => write!(f, "closed by peer"),
            CloseReason::Remote(reason) => write!(f, "closed by peer: {}", reason),
            CloseReason::Error(e) => write!(f, "{}", e),
        }
    }
}

/// Inbound traffic delivered to the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// One JSON text frame
    Message(String),
    /// The channel closed; delivered exactly once
    Closed(CloseReason),
}

#[derive(Debug)]
struct Shared {
    status: AtomicU8,
    close_notified: AtomicBool,
}

impl Shared {
    fn status(&self) -> ChannelStatus {
        ChannelStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, status: ChannelStatus) {
        self.status.store(status as u8, Ordering::Release);
    }
}

/// Session-side write handle
#[derive(Debug)]
pub struct Channel {
    outbound: mpsc::Sender<Outbound>,
    shared: Arc<Shared>,
}

impl Channel {
    pub fn status(&self) -> ChannelStatus {
        self.shared.status()
    }

    pub fn is_open(&self) -> bool {
        self.status() == ChannelStatus::Open
    }

    /// Queue one audio chunk without waiting.
    ///
    /// Returns false when the chunk was dropped: channel not open, or the
    /// outbound queue is full. Dropped chunks are never retried.
    pub fn send_audio(&self, chunk: EncodedChunk) -> bool {
        if !self.is_open() {
            trace!("Channel not open, dropping {} byte chunk", chunk.len());
            return false;
        }
        match self.outbound.try_send(Outbound::Audio(chunk)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("Outbound queue full, dropping audio chunk");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Queue a control message behind everything already queued
    pub fn send_control(&self, message: &ControlMessage) -> Result<(), ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::Closed(format!(
                "channel is {:?}",
                self.status()
            )));
        }
        let json = message.to_json()?;
        self.outbound
            .try_send(Outbound::Control(json))
            .map_err(|e| match e {
                TrySendError::Full(_) => ChannelError::Send("outbound queue full".to_string()),
                TrySendError::Closed(_) => ChannelError::Closed("transport gone".to_string()),
            })
    }

    /// Close the channel. Already-queued frames are flushed by the transport
    /// before it closes the connection.
    pub fn close(self) {
        let status = self.status();
        if matches!(status, ChannelStatus::Connecting | ChannelStatus::Open) {
            self.shared.set_status(ChannelStatus::Closing);
        }
        debug!("Channel close requested (was {:?})", status);
    }
}

/// Transport-side ends of a channel
#[derive(Debug)]
pub struct ChannelEnds {
    outbound: mpsc::Receiver<Outbound>,
    inbound: InboundSink,
}

impl ChannelEnds {
    pub fn mark_open(&self) {
        self.inbound.mark_open();
    }

    pub fn set_status(&self, status: ChannelStatus) {
        self.inbound.set_status(status);
    }

    /// Next outbound frame; `None` once the session closed the channel and
    /// the queue is drained
    pub async fn next_outbound(&mut self) -> Option<Outbound> {
        self.outbound.recv().await
    }

    pub fn try_next_outbound(&mut self) -> Option<Outbound> {
        self.outbound.try_recv().ok()
    }

    pub fn deliver(&self, text: impl Into<String>) -> bool {
        self.inbound.deliver(text)
    }

    pub fn notify_closed(&self, reason: CloseReason) -> bool {
        self.inbound.notify_closed(reason)
    }

    pub fn split(self) -> (mpsc::Receiver<Outbound>, InboundSink) {
        (self.outbound, self.inbound)
    }
}

/// Delivers inbound traffic and close notifications to the session
#[derive(Debug, Clone)]
pub struct InboundSink {
    events: mpsc::UnboundedSender<ChannelEvent>,
    shared: Arc<Shared>,
}

impl InboundSink {
    pub fn status(&self) -> ChannelStatus {
        self.shared.status()
    }

    pub fn mark_open(&self) {
        let _ = self.shared.status.compare_exchange(
            ChannelStatus::Connecting as u8,
            ChannelStatus::Open as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub fn set_status(&self, status: ChannelStatus) {
        self.shared.set_status(status);
    }

    /// Forward one text frame; false once the session stopped listening
    pub fn deliver(&self, text: impl Into<String>) -> bool {
        if self.shared.close_notified.load(Ordering::Acquire) {
            return false;
        }
        self.events.send(ChannelEvent::Message(text.into())).is_ok()
    }

    /// Mark the channel closed and notify the session. Only the first call
    /// has any effect, whichever side initiated the close.
    pub fn notify_closed(&self, reason: CloseReason) -> bool {
        self.shared.set_status(ChannelStatus::Closed);
        if self.shared.close_notified.swap(true, Ordering::AcqRel) {
            return false;
        }
        debug!("Channel closed: {}", reason);
        let _ = self.events.send(ChannelEvent::Closed(reason));
        true
    }
}

/// An opened channel as handed to the session
#[derive(Debug)]
pub struct Connection {
    pub channel: Channel,
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
}

/// Create a connected channel pair in `Connecting` state
pub fn channel_pair(capacity: usize) -> (Connection, ChannelEnds) {
    let (outbound_tx, outbound_rx) = mpsc::channel(capacity.max(1));
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        status: AtomicU8::new(ChannelStatus::Connecting as u8),
        close_notified: AtomicBool::new(false),
    });

    let connection = Connection {
        channel: Channel {
            outbound: outbound_tx,
            shared: Arc::clone(&shared),
        },
        events: events_rx,
    };
    let ends = ChannelEnds {
        outbound: outbound_rx,
        inbound: InboundSink {
            events: events_tx,
            shared,
        },
    };
    (connection, ends)
}

/// Opens channels to the translation service
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    /// Resolve once the channel is open for writing
    async fn connect(&self) -> Result<Connection, ChannelError>;
}
