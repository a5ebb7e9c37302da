//! The two planes of the scraping pipeline and their surfaces.
//!
//! The control plane ([`control`], [`consumers`], [`maintenance`], [`api`])
//! owns the record store: it dedups submissions, emits scrape requests,
//! and folds started/result/failure events back into records. The worker
//! plane ([`worker`]) is stateless against the store; it consumes requests,
//! drives a browser page, and reports classified outcomes.

pub mod api;
pub mod consumers;
pub mod control;
pub mod maintenance;
pub mod worker;
