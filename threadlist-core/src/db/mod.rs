//! Database layer for threadlist
//!
//! This module provides the storage layer using SQLite with:
//! - Schema migrations
//! - Repository pattern for recipients, groups and threads
//! - Windowed partition queries backing the pager

pub mod repo;
pub mod schema;
pub mod window;

pub use repo::Database;
pub use window::{ConversationStore, PinFilter};
