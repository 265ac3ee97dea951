//! Prometheus metrics for the notification client.
//!
//! Covers the connection lifecycle (attempts, opens, closes, reconnects),
//! inbound traffic by kind, keep-alive pings and the side effects raised
//! for each notification (desktop notifications, refetch requests).

mod helpers;

pub use helpers::{encode_metrics, ConnectionMetrics, DeliveryMetrics, KeepAliveMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter,
    IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "meridian_notify";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Connection attempts (including reconnects)
    pub static ref CONNECT_ATTEMPTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connect_attempts_total", METRIC_PREFIX),
        "Total WebSocket connection attempts"
    ).unwrap();

    /// Failed connection attempts by reason
    pub static ref CONNECT_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_connect_failures_total", METRIC_PREFIX),
        "Total failed WebSocket connection attempts",
        &["reason"]
    ).unwrap();

    /// Connections that completed the handshake
    pub static ref CONNECTIONS_OPENED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connections_opened_total", METRIC_PREFIX),
        "Total WebSocket connections opened"
    ).unwrap();

    /// Connections closed by reason (local, remote, error, idle)
    pub static ref CONNECTIONS_CLOSED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_connections_closed_total", METRIC_PREFIX),
        "Total WebSocket connections closed",
        &["reason"]
    ).unwrap();

    /// Scheduled reconnects
    pub static ref RECONNECTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_reconnects_total", METRIC_PREFIX),
        "Total scheduled reconnects"
    ).unwrap();

    /// Current connection state (0=idle, 1=connecting, 2=open, 3=closed)
    pub static ref CONNECTION_STATE: IntGauge = register_int_gauge!(
        format!("{}_connection_state", METRIC_PREFIX),
        "Current connection state (0=idle, 1=connecting, 2=open, 3=closed)"
    ).unwrap();

    // ============================================================================
    // Message Metrics
    // ============================================================================

    /// Inbound frames by kind (notification, pong, malformed)
    pub static ref MESSAGES_RECEIVED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_messages_received_total", METRIC_PREFIX),
        "Total inbound frames by kind",
        &["kind"]
    ).unwrap();

    /// Transport errors reported while a connection was open
    pub static ref TRANSPORT_ERRORS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_transport_errors_total", METRIC_PREFIX),
        "Total transport errors"
    ).unwrap();

    /// Keep-alive pings sent
    pub static ref PINGS_SENT_TOTAL: IntCounter = register_int_counter!(
        format!("{}_pings_sent_total", METRIC_PREFIX),
        "Total keep-alive pings sent"
    ).unwrap();

    /// Keep-alive ticks skipped because the connection was not open
    pub static ref PINGS_SKIPPED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_pings_skipped_total", METRIC_PREFIX),
        "Total keep-alive ticks skipped"
    ).unwrap();

    // ============================================================================
    // Delivery Metrics
    // ============================================================================

    /// Desktop notifications raised
    pub static ref DESKTOP_NOTIFICATIONS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_desktop_notifications_total", METRIC_PREFIX),
        "Total desktop notifications raised"
    ).unwrap();

    /// Refetch requests issued to the quotes cache
    pub static ref REFETCH_REQUESTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_refetch_requests_total", METRIC_PREFIX),
        "Total quote refetch requests"
    ).unwrap();
}
