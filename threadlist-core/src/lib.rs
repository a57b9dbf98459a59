//! # threadlist-core
//!
//! Core library for threadlist - the conversation-list engine of a local-first
//! chat client.
//!
//! This library provides:
//! - Domain types for threads, recipients and group (fence) records
//! - The group lifecycle state machine and the partition predicate table
//! - SQLite storage with windowed count/fetch queries per partition
//! - A segment-composing pager that presents pinned rows, unpinned rows,
//!   section headers and an archived footer as one offset-addressable list
//! - Batched recipient resolution for each fetched page
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! ```text
//! PagedSource (count / fetch / key_of)
//!     -> ConversationPager (segment composition)
//!         -> ConversationStore (windowed queries, partition predicates)
//!     -> ResolutionBatcher (one resolve call per page)
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use threadlist_core::{Config, ConversationLists, Database, Partition, PagedSource};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = Config::load().expect("failed to load config");
//! let db = Arc::new(Database::open(&Config::database_path()).expect("failed to open database"));
//! db.migrate().expect("failed to run migrations");
//!
//! let lists = ConversationLists::new(db.clone(), db, &config.pager);
//! let open = lists.pager(Partition::Open);
//! let total = open.count().expect("count failed");
//! let page = open
//!     .fetch(0, total.min(20).max(1), &CancellationToken::new())
//!     .expect("fetch failed");
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use db::{ConversationStore, Database, PinFilter};
pub use error::{Error, Result};
pub use pager::{ConversationLists, ConversationPager, PagedSource};
pub use partition::{
    GroupMode, LifecycleEvent, ListQuery, Partition, PartitionPredicate, RecipientFilter,
};
pub use recipients::{RecipientCache, RecipientResolver, ResolutionBatcher};
pub use types::*;

// Public modules
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod pager;
pub mod partition;
pub mod recipients;
pub mod types;
