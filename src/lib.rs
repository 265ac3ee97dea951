// Shared infrastructure
pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

// Transport and connection lifecycle
pub mod connection_manager;
pub mod websocket;

// Application layer
pub mod notification;
pub mod refetch;
pub mod token;

pub use connection_manager::{ConnectionManager, ConnectionState, MessageStream};
pub use error::ClientError;
pub use notification::{MountOutcome, NotificationBridge};
