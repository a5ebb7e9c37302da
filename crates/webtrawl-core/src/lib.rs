pub mod bus;
pub mod classify;
pub mod config;
pub mod message;
pub mod normalize;
pub mod record;
pub mod render;
pub mod repository;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("render failed: {0}")]
    Render(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("queue error: {0}")]
    Queue(String),
    #[error("codec error: {0}")]
    Codec(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
}

pub type Result<T> = std::result::Result<T, Error>;

pub use bus::{QueueBus, QueueHandler, QueueName};
pub use classify::{classify_error, classify_status, Classification, FailureKind};
pub use config::Config;
pub use record::{FetchRecord, NewFetchRecord, Patch, RecordFilter, RecordPatch, ScrapeStatus};
pub use render::{PageBackend, RenderRequest, RenderedPage, WaitStrategy};
pub use repository::Repository;
