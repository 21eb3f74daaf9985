//! # Storage Module
//!
//! Disk-backed implementation of the store traits.

mod redb_store;

pub use redb_store::{RedbSnapshot, RedbStore, RedbTxn};
