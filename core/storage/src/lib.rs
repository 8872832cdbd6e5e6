//! Local State Store for StepSync.
//!
//! This module provides a trait-based interface for persisting the device
//! snapshot (local state plus outbox) and picks a backend from the state
//! path at runtime.
//!
//! # Design Principles
//! - State and outbox are always written together in one atomic save
//! - A missing store loads as defaults; a corrupt one is an error
//! - One open store per state path, enforced with a lock file
//! - Backends never touch the network

pub mod store;
pub mod lock;
pub mod open;
pub mod memory;
pub mod file;
pub mod sqlite;

pub use store::{Snapshot, StateStore};
pub use lock::StateLock;
pub use open::{open_store, store_kind_for_path};
pub use memory::MemoryStore;
pub use file::FileStore;
pub use sqlite::SqliteStore;
