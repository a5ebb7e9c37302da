//! The queue seam.
//!
//! Four durable queues with at-least-once delivery and manual
//! acknowledgement. An implementation acks after a handler returns `Ok`
//! and rejects *without requeue* after `Err` (poison messages must not
//! loop; the stale-pending sweep mops up the fallout). Prefetch is one
//! message per subscription, which is the only load-balancing mechanism
//! across worker replicas.

use crate::Result;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueName {
    Requests,
    Started,
    Results,
    Failures,
}

impl QueueName {
    pub const ALL: [QueueName; 4] = [
        QueueName::Requests,
        QueueName::Started,
        QueueName::Results,
        QueueName::Failures,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            QueueName::Requests => "scrape.requests",
            QueueName::Started => "scrape.started",
            QueueName::Results => "scrape.results",
            QueueName::Failures => "scrape.failures",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Consumer callback. Handlers must be idempotent: the same message may be
/// redelivered.
#[async_trait::async_trait]
pub trait QueueHandler: Send + Sync {
    async fn handle(&self, payload: &[u8]) -> Result<()>;
}

#[async_trait::async_trait]
pub trait QueueBus: Send + Sync {
    /// Publish a persistent message; returns only after the broker
    /// accepted it.
    async fn publish(&self, queue: QueueName, payload: Vec<u8>) -> Result<()>;

    /// Register a consumer with prefetch=1. Each call opens one consumer
    /// channel; call it N times for N-way concurrency.
    async fn subscribe(&self, queue: QueueName, handler: Arc<dyn QueueHandler>) -> Result<()>;
}
