//! In-process queue bus.
//!
//! Same contract as the AMQP binding — one in-flight message per
//! subscription, expired messages dropped on dequeue, handler errors drop
//! the message instead of requeueing it — but scoped to a single process.
//! Used by tests and the `standalone` mode.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use webtrawl_core::{Error, QueueBus, QueueHandler, QueueName, Result};

struct Envelope {
    payload: Vec<u8>,
    enqueued: Instant,
}

type SharedRx = Arc<Mutex<mpsc::UnboundedReceiver<Envelope>>>;

pub struct MemoryQueueBus {
    senders: HashMap<QueueName, mpsc::UnboundedSender<Envelope>>,
    receivers: HashMap<QueueName, SharedRx>,
    ttl: Duration,
}

impl MemoryQueueBus {
    pub fn new(ttl: Duration) -> Self {
        let mut senders = HashMap::new();
        let mut receivers = HashMap::new();
        for queue in QueueName::ALL {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.insert(queue, tx);
            receivers.insert(queue, Arc::new(Mutex::new(rx)));
        }
        Self {
            senders,
            receivers,
            ttl,
        }
    }
}

impl Default for MemoryQueueBus {
    fn default() -> Self {
        Self::new(Duration::from_secs(60 * 60))
    }
}

#[async_trait::async_trait]
impl QueueBus for MemoryQueueBus {
    async fn publish(&self, queue: QueueName, payload: Vec<u8>) -> Result<()> {
        let tx = self
            .senders
            .get(&queue)
            .ok_or_else(|| Error::Queue(format!("unknown queue {queue}")))?;
        tx.send(Envelope {
            payload,
            enqueued: Instant::now(),
        })
        .map_err(|_| Error::Queue(format!("queue {queue} is closed")))
    }

    async fn subscribe(&self, queue: QueueName, handler: Arc<dyn QueueHandler>) -> Result<()> {
        let rx = self
            .receivers
            .get(&queue)
            .cloned()
            .ok_or_else(|| Error::Queue(format!("unknown queue {queue}")))?;
        let ttl = self.ttl;
        tokio::spawn(async move {
            loop {
                // Hold the lock only across recv so competing subscribers
                // interleave; handling happens outside it, which is what
                // gives each subscription its one-at-a-time behavior.
                let envelope = {
                    let mut rx = rx.lock().await;
                    rx.recv().await
                };
                let Some(envelope) = envelope else {
                    break;
                };
                if envelope.enqueued.elapsed() > ttl {
                    tracing::debug!(queue = %queue, "dropping expired message");
                    continue;
                }
                if let Err(e) = handler.handle(&envelope.payload).await {
                    tracing::warn!(queue = %queue, error = %e, "handler failed; message dropped");
                }
            }
        });
        Ok(())
    }
}
