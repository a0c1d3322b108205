pub mod augment;
pub mod config;
pub mod models;
pub mod pending_cache;
pub mod persistence;
pub mod pipeline;
pub mod server;
pub mod source;

pub use pending_cache::PendingCache;
pub use pipeline::{ProposalsPipeline, ReconcileError, View};
