// Websocket transport for the translation service
//
// Binary frames carry raw PCM chunks, text frames carry JSON. One writer task
// drains the channel's outbound queue in order; one reader task forwards
// text frames and reports the close, whichever side started it.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use super::channel::{
    channel_pair, ChannelEnds, ChannelStatus, CloseReason, Connection, Connector, Outbound,
};
use crate::error::ChannelError;

/// How long to wait for the peer's close reply after a local close
const CLOSE_GRACE: Duration = Duration::from_secs(2);

pub struct WebSocketConnector {
    url: String,
    outbound_capacity: usize,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>, outbound_capacity: usize) -> Self {
        Self {
            url: url.into(),
            outbound_capacity,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Connection, ChannelError> {
        info!("Connecting to {}", self.url);

        let (ws, response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| ChannelError::Connect(format!("{}: {}", self.url, e)))?;

        info!("Connected to {} (HTTP {})", self.url, response.status());

        let (connection, ends) = channel_pair(self.outbound_capacity);
        ends.mark_open();
        spawn_pumps(ws, ends);
        Ok(connection)
    }
}

/// Pump a websocket to and from a channel until either side closes
pub fn spawn_pumps<S>(ws: WebSocketStream<S>, ends: ChannelEnds)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut stream) = ws.split();
    let (mut outbound, inbound) = ends.split();
    let writer_inbound = inbound.clone();

    let mut reader = tokio::spawn(async move {
        let reason = loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    if !inbound.deliver(text) {
                        break CloseReason::Local;
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    warn!("Ignoring unexpected {} byte binary frame", data.len());
                }
                Some(Ok(Message::Close(frame))) => {
                    break CloseReason::Remote(
                        frame.map(|f| f.reason.to_string()).unwrap_or_default(),
                    );
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break CloseReason::Error(ChannelError::Closed(e.to_string())),
                None => break CloseReason::Remote(String::new()),
            }
        };

        let reason = if inbound.status() == ChannelStatus::Closing {
            CloseReason::Local
        } else {
            reason
        };
        inbound.notify_closed(reason);
    });

    tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let message = match frame {
                Outbound::Audio(chunk) => Message::Binary(chunk.into_bytes()),
                Outbound::Control(json) => {
                    debug!("-> {}", json);
                    Message::Text(json)
                }
            };
            if let Err(e) = sink.send(message).await {
                warn!("Websocket send failed: {}", e);
                writer_inbound.notify_closed(CloseReason::Error(ChannelError::Send(e.to_string())));
                reader.abort();
                return;
            }
        }

        // Session closed the channel and the queue is drained
        if let Err(e) = sink.send(Message::Close(None)).await {
            debug!("Close frame not sent: {}", e);
        }
        let _ = sink.close().await;
        writer_inbound.notify_closed(CloseReason::Local);

        // A peer that never answers the close frame would keep the socket alive
        if tokio::time::timeout(CLOSE_GRACE, &mut reader).await.is_err() {
            debug!("No close reply within {:?}, dropping connection", CLOSE_GRACE);
            reader.abort();
        }
    });
}
