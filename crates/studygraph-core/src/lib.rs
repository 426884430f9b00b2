//! Studygraph Core Library
//!
//! This crate provides the core functionality for Studygraph, including:
//! - Canonical identity resolution across resource variants
//! - Source registry sync against the resource catalog
//! - Chunk/entity/relation/evidence extraction
//! - Background extraction jobs with per-source fault isolation
//! - Graph assembly with dedup, visibility scoping and a TTL cache
//! - Semantic ranking with an adaptive acceptance threshold
//! - Evidence-grounded question answering

pub mod ai;
pub mod canonical;
pub mod config;
pub mod domain;
pub mod error;
pub mod extract;
pub mod graph;
pub mod infrastructure;
pub mod jobs;
pub mod qa;
pub mod registry;
pub mod search;
pub mod service;
pub mod storage;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::service::GraphService;
    pub use crate::storage::Database;
}
