pub mod channel;
pub mod messages;
pub mod websocket;

pub use channel::{
    channel_pair, Channel, ChannelEnds, ChannelEvent, ChannelStatus, CloseReason, Connection,
    Connector, InboundSink, Outbound,
};
pub use messages::{ControlMessage, InboundEvent};
pub use websocket::{spawn_pumps, WebSocketConnector};
