//! Socket layer: wire protocol, transport and connection manager

pub mod connection;
pub mod protocol;
pub mod transport;

pub use connection::{ConnectionManager, ConnectionState, Listener, Outbox, ReconnectPolicy};
pub use protocol::{InboundMessage, MessageKind, OutboundMessage, ProtocolError};
pub use transport::{Connector, SocketEvent, SocketEventKind, Transport, WsConnector};
