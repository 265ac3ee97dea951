mod settings;

pub use settings::{
    EndpointConfig, KeepAliveConfig, LogFormat, NotificationConfig, OtelConfig, QuotesConfig,
    ReconnectConfig, Settings, TokenConfig, MAX_KEEPALIVE_SECS,
};
