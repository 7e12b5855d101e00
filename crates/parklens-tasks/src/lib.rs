//! Task registry for analysis tasks.
//!
//! This crate provides:
//! - The [`TaskStore`] abstraction with insert/get/transition/remove
//! - An in-memory store backed by `DashMap` (default)
//! - A Redis store for records that outlive the process
//! - Eviction policies and a periodic sweeper for terminal records

pub mod error;
pub mod eviction;
pub mod memory;
pub mod redis_store;
pub mod store;

pub use error::{TaskStoreError, TaskStoreResult};
pub use eviction::{EvictionPolicy, NeverEvict, TaskSweeper, TerminalTtl};
pub use memory::InMemoryTaskStore;
pub use redis_store::{RedisStoreConfig, RedisTaskStore};
pub use store::TaskStore;
