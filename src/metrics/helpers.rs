//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    CONNECTIONS_CLOSED_TOTAL, CONNECTIONS_OPENED_TOTAL, CONNECTION_STATE, CONNECT_ATTEMPTS_TOTAL,
    CONNECT_FAILURES_TOTAL, DESKTOP_NOTIFICATIONS_TOTAL, MESSAGES_RECEIVED_TOTAL,
    PINGS_SENT_TOTAL, PINGS_SKIPPED_TOTAL, RECONNECTS_TOTAL, REFETCH_REQUESTS_TOTAL,
    TRANSPORT_ERRORS_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording connection lifecycle metrics
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn record_attempt() {
        CONNECT_ATTEMPTS_TOTAL.inc();
    }

    pub fn record_failure(reason: &str) {
        CONNECT_FAILURES_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn record_opened() {
        CONNECTIONS_OPENED_TOTAL.inc();
    }

    pub fn record_closed(reason: &str) {
        CONNECTIONS_CLOSED_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn record_reconnect() {
        RECONNECTS_TOTAL.inc();
    }

    pub fn record_transport_error() {
        TRANSPORT_ERRORS_TOTAL.inc();
    }

    /// Record the current state as a gauge value
    pub fn set_state(code: i64) {
        CONNECTION_STATE.set(code);
    }
}

/// Helper struct for recording keep-alive metrics
pub struct KeepAliveMetrics;

impl KeepAliveMetrics {
    pub fn record_ping_sent() {
        PINGS_SENT_TOTAL.inc();
    }

    pub fn record_ping_skipped() {
        PINGS_SKIPPED_TOTAL.inc();
    }
}

/// Helper struct for recording inbound messages and their side effects
pub struct DeliveryMetrics;

impl DeliveryMetrics {
    pub fn record_notification() {
        MESSAGES_RECEIVED_TOTAL.with_label_values(&["notification"]).inc();
    }

    pub fn record_pong() {
        MESSAGES_RECEIVED_TOTAL.with_label_values(&["pong"]).inc();
    }

    pub fn record_malformed() {
        MESSAGES_RECEIVED_TOTAL.with_label_values(&["malformed"]).inc();
    }

    pub fn record_desktop_notification() {
        DESKTOP_NOTIFICATIONS_TOTAL.inc();
    }

    pub fn record_refetch() {
        REFETCH_REQUESTS_TOTAL.inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_metrics_includes_prefix() {
        ConnectionMetrics::record_attempt();
        KeepAliveMetrics::record_ping_sent();
        DeliveryMetrics::record_pong();

        let text = encode_metrics().unwrap();
        assert!(text.contains("meridian_notify_connect_attempts_total"));
        assert!(text.contains("meridian_notify_pings_sent_total"));
    }

    #[test]
    fn test_counters_increase() {
        let before = REFETCH_REQUESTS_TOTAL.get();
        DeliveryMetrics::record_refetch();
        assert!(REFETCH_REQUESTS_TOTAL.get() > before);
    }
}
