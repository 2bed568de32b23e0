//! # Storage Backends
//!
//! Persistent implementations of [`crate::store::CatalogStore`].
//! The in-memory backend lives next to the trait in [`crate::store`].

mod redb_store;

pub use redb_store::RedbStore;
