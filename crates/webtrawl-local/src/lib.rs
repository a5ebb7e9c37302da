//! Concrete backends for the webtrawl seams:
//!
//! - [`store::RecordStore`]: the repository, in-memory with optional
//!   sharded-JSON persistence (the control plane is the store's only
//!   writer, so single-process persistence is sound).
//! - [`bus::MemoryQueueBus`]: in-process queue bus for tests and the
//!   standalone mode.
//! - `amqp::AmqpQueueBus` (feature `amqp`): the RabbitMQ binding.
//! - [`browser::ChromiumRenderer`]: headless-Chromium page backend.

#[cfg(feature = "amqp")]
pub mod amqp;
pub mod browser;
pub mod bus;
pub mod store;

pub use browser::ChromiumRenderer;
pub use bus::MemoryQueueBus;
pub use store::RecordStore;
