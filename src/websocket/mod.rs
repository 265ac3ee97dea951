mod memory;
mod message;
mod transport;

pub use memory::{ClientEvent, MemoryConnector, MemoryPeer, MemoryServer};
pub use message::{parse_frame, ClientFrame, InboundFrame, InboundMessage, KEEPALIVE_ACK};
pub use transport::{Connector, Transport, WsConnector, WsTransport};
