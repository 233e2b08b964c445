//! Database Layer
//!
//! This module handles all storage interactions:
//!
//! - [`NodeBackend`] / [`HistoryStore`] - async traits the services program against
//! - [`MemoryBackend`] - in-memory tables with failure injection for tests
//! - [`TursoBackend`] - libsql/Turso embedded database (WAL mode, busy timeout)
//! - [`ItemStore`] - contract with the external store of classified items
//!
//! Backends persist rows verbatim. Structural rules are enforced by the
//! service layer before anything reaches `NodeBackend::apply`.

mod backend;
mod error;
mod item_store;
mod memory;
mod turso;

pub use backend::{HistoryStore, NodeBackend, NodeWrite};
pub use error::DatabaseError;
pub use item_store::{ItemPlacement, ItemStore, MemoryItemStore};
pub use memory::MemoryBackend;
pub use turso::TursoBackend;
