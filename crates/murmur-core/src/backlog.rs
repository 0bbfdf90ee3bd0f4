//! Missed-content loader.
//!
//! Runs once per admission, before the receive loop starts. The store marks
//! the backlog read in the same transaction that selects it, so a connection
//! that breaks halfway through does not get the rest re-sent later.

use murmur_store::EventStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::error::Result;

/// Outcome of one backlog push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BacklogReport {
    /// Items fetched from the store.
    pub total: usize,
    /// Items written to the transport.
    pub delivered: usize,
    /// True if the transport broke before the end.
    pub aborted: bool,
}

/// Pushes everything a newly connected identity missed.
#[derive(Clone)]
pub struct MissedContentLoader {
    store: Arc<dyn EventStore>,
}

impl MissedContentLoader {
    #[must_use]
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// Fetch the backlog of `conn`'s identity and push it oldest first.
    ///
    /// A send failure stops the push; the receive loop owns cleanup of the
    /// broken connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the backlog cannot be fetched. Nothing was pushed.
    pub async fn deliver_backlog(&self, conn: &Connection) -> Result<BacklogReport> {
        let identity = conn.identity();
        let items = self.store.fetch_undelivered_backlog(identity).await?;
        let mut report = BacklogReport {
            total: items.len(),
            ..BacklogReport::default()
        };
        if items.is_empty() {
            debug!(identity, "No missed content");
            return Ok(report);
        }

        for item in &items {
            if let Err(e) = conn.send(&item.to_event()).await {
                warn!(
                    identity,
                    connection = %conn.id(),
                    delivered = report.delivered,
                    remaining = report.total - report.delivered,
                    "Backlog push aborted: {}", e
                );
                report.aborted = true;
                return Ok(report);
            }
            report.delivered += 1;
        }

        info!(
            identity,
            connection = %conn.id(),
            count = report.delivered,
            "Missed content delivered"
        );
        Ok(report)
    }
}
