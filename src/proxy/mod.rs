// src/proxy/mod.rs
mod engine;
mod error;
mod merge;
mod target;

pub use engine::{ProxyEngine, STATUS_SELECTOR};
pub use error::{aggregate_status, severity, RemoteError};
pub use merge::{merge_at, subtree_at};
pub use target::{ProxyTarget, TargetState, TargetStatus, TargetView, JSON_CONTENT_TYPE, METADATA_ACCEPT};
