//! Fan-out of chat lines to every live session.
//!
//! A broadcast takes a snapshot of the registry, writes to all recipients
//! concurrently and evicts every recipient whose write failed or timed out.
//! The registry is never locked while writes are in flight.

use crate::connection::{Registry, Session, SessionId};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

/// One line to deliver, optionally skipping its sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastMessage {
    pub text: String,
    pub exclude: Option<SessionId>,
}

impl BroadcastMessage {
    pub fn to_all(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            exclude: None,
        }
    }

    pub fn excluding(text: impl Into<String>, sender: SessionId) -> Self {
        Self {
            text: text.into(),
            exclude: Some(sender),
        }
    }
}

/// Outcome of a single broadcast.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Recipients the line was written to
    pub delivered: usize,
    /// Recipients whose write failed and who were evicted
    pub evicted: Vec<SessionId>,
}

#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<Registry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Delivers `message` to every registered session except the excluded
    /// one. Each recipient gets the line at most once.
    pub async fn broadcast(&self, message: &BroadcastMessage) -> BroadcastReport {
        let recipients: Vec<Arc<Session>> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|session| Some(session.id()) != message.exclude)
            .collect();

        let text = message.text.as_str();
        let results = join_all(recipients.into_iter().map(|session| async move {
            let delivered = session.send(text).await;
            (session, delivered)
        }))
        .await;

        let mut report = BroadcastReport::default();
        for (session, delivered) in results {
            if delivered {
                report.delivered += 1;
            } else {
                self.evict(&session).await;
                report.evicted.push(session.id());
            }
        }

        debug!(
            "Broadcast delivered to {} session(s), evicted {}",
            report.delivered,
            report.evicted.len()
        );
        report
    }

    /// Removes a session that can no longer be written to and tells its
    /// handling unit to stop.
    async fn evict(&self, session: &Session) {
        if self.registry.remove(session.id()).is_some() {
            warn!(
                "Evicting session {} ({}) after failed write",
                session.id(),
                session.remote_addr()
            );
        }
        session.signal_eviction();
        session.close().await;
    }
}
