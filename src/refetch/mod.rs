//! Quotes cache refresh trigger.
//!
//! The client never fetches quote data itself. It only signals the cache
//! that its data is stale.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

/// External quotes data cache
pub trait QuotesCache: Send + Sync {
    /// Mark the cached quotes stale. Must not block.
    fn refetch(&self);
}

impl<F> QuotesCache for F
where
    F: Fn() + Send + Sync,
{
    fn refetch(&self) {
        self()
    }
}

/// Refresh request published to cache subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefetchRequest {
    /// Status filter the cached quote list is keyed by
    pub status: String,
    pub sequence: u64,
    pub requested_at: DateTime<Utc>,
}

/// Publishes a `RefetchRequest` to every subscriber on each `refetch()`.
///
/// Requests made while nobody is subscribed are dropped.
#[derive(Debug)]
pub struct RefetchBroadcaster {
    status: String,
    sender: broadcast::Sender<RefetchRequest>,
    sequence: AtomicU64,
}

impl RefetchBroadcaster {
    pub fn new(status: impl Into<String>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            status: status.into(),
            sender,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RefetchRequest> {
        self.sender.subscribe()
    }

    /// Number of refetches requested so far
    pub fn request_count(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> &str {
        &self.status
    }
}

impl QuotesCache for RefetchBroadcaster {
    fn refetch(&self) {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;

        let request = RefetchRequest {
            status: self.status.clone(),
            sequence,
            requested_at: Utc::now(),
        };
        match self.sender.send(request) {
            Ok(receivers) => {
                tracing::debug!(
                    status = %self.status,
                    sequence,
                    receivers,
                    "Quotes refetch requested"
                );
            }
            Err(_) => {
                tracing::debug!(
                    status = %self.status,
                    sequence,
                    "Quotes refetch requested with no subscribers"
                );
            }
        }
    }
}
