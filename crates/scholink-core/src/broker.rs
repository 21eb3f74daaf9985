//! # Broker Module
//!
//! The library's entry point: a store backend plus the scheme validator.
//!
//! ## Storage Backends
//!
//! - `InMemory`: [`MemoryStore`], snapshot-swap transactions (volatile unless
//!   saved through [`Broker::export_canonical`])
//! - `Persistent`: [`RedbStore`], disk-backed ACID transactions
//!
//! Every event is applied inside one write transaction, committed only when
//! the whole event succeeded. Reads run against a snapshot and never observe
//! a half-applied event.

use crate::citations::{CitationEngine, CitationQuery, Citations, GroupCitation};
use crate::event::{Event, IdentifierRef, RawEvent};
use crate::export::{self, CanonicalGraph};
use crate::ingestor::{IngestOutcome, Ingestor};
use crate::scheme::{DetectedSchemes, SchemeValidator};
use crate::storage::RedbStore;
use crate::store::{MemoryStore, StoreRead, Tables};
use crate::system::{BrokerMetrics, Violation, verify_integrity};
use crate::{GroupType, ScholinkError};
use std::path::Path;

/// Storage backend for a [`Broker`].
#[derive(Debug)]
enum StorageBackend {
    /// In-memory tables (fast, volatile).
    InMemory(MemoryStore),
    /// Disk-backed tables using redb (ACID, persistent).
    Persistent(RedbStore),
}

/// Ingests events and answers citation queries over one store.
pub struct Broker {
    backend: StorageBackend,
    validator: Box<dyn SchemeValidator>,
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}

impl Broker {
    /// Create an empty broker with in-memory storage.
    pub fn in_memory() -> Result<Self, ScholinkError> {
        Self::with_tables(Tables::new())
    }

    /// Create a broker over existing in-memory tables.
    pub fn with_tables(tables: Tables) -> Result<Self, ScholinkError> {
        Ok(Self {
            backend: StorageBackend::InMemory(MemoryStore::with_tables(tables)),
            validator: Box::new(DetectedSchemes::new()?),
        })
    }

    /// Create a broker with persistent redb storage.
    ///
    /// Opens or creates a redb database at the given path.
    pub fn with_redb(path: impl AsRef<Path>) -> Result<Self, ScholinkError> {
        Ok(Self {
            backend: StorageBackend::Persistent(RedbStore::open(path)?),
            validator: Box::new(DetectedSchemes::new()?),
        })
    }

    /// Create an in-memory broker from a canonical export.
    pub fn from_canonical(data: &[u8]) -> Result<Self, ScholinkError> {
        let canonical = export::import_canonical(data)?;
        Self::with_tables(canonical.to_tables()?)
    }

    /// Check if using persistent storage.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, StorageBackend::Persistent(_))
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    /// Validate and apply one event as delivered.
    ///
    /// Validation failures are returned before any transaction is opened.
    pub fn ingest_raw(&self, raw: &RawEvent) -> Result<IngestOutcome, ScholinkError> {
        let event = Event::load(raw, self.validator.as_ref())?;
        self.ingest(&event)
    }

    /// Apply one validated event in its own transaction.
    ///
    /// On `Err` nothing the event did is visible.
    pub fn ingest(&self, event: &Event) -> Result<IngestOutcome, ScholinkError> {
        let result = match &self.backend {
            StorageBackend::InMemory(store) => store.begin().and_then(|mut txn| {
                let outcome = Ingestor::ingest_event(&mut *txn, event)?;
                if !outcome.is_duplicate() {
                    txn.commit()?;
                }
                Ok(outcome)
            }),
            StorageBackend::Persistent(store) => store.begin().and_then(|mut txn| {
                let outcome = Ingestor::ingest_event(&mut txn, event)?;
                if !outcome.is_duplicate() {
                    txn.commit()?;
                }
                Ok(outcome)
            }),
        };
        if let Err(e) = &result {
            tracing::warn!(event = %event.id, error = %e, "event rolled back");
        }
        result
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// Run `f` against a consistent snapshot of the store.
    pub fn read<T>(
        &self,
        f: impl FnOnce(&dyn StoreRead) -> Result<T, ScholinkError>,
    ) -> Result<T, ScholinkError> {
        match &self.backend {
            StorageBackend::InMemory(store) => {
                let snapshot = store.snapshot()?;
                f(&*snapshot)
            }
            StorageBackend::Persistent(store) => {
                let snapshot = store.snapshot()?;
                f(&snapshot)
            }
        }
    }

    /// Citations of an identifier, counting its aliases and versions.
    pub fn get_citations(
        &self,
        identifier: &IdentifierRef,
        query: CitationQuery,
    ) -> Result<Citations, ScholinkError> {
        self.read(|store| CitationEngine::get_citations(store, identifier, query))
    }

    /// Group-level edges of `relation` pointing at the identifier's group.
    pub fn get_citations2(
        &self,
        identifier: &IdentifierRef,
        relation: &str,
        grouping: GroupType,
    ) -> Result<Vec<GroupCitation>, ScholinkError> {
        self.read(|store| CitationEngine::get_citations2(store, identifier, relation, grouping))
    }

    pub fn metrics(&self) -> Result<BrokerMetrics, ScholinkError> {
        self.read(|store| BrokerMetrics::from_store(store))
    }

    /// Every broken structural invariant; empty when consistent.
    pub fn verify(&self) -> Result<Vec<Violation>, ScholinkError> {
        self.read(|store| verify_integrity(store))
    }

    /// Bit-exact export of the current state.
    pub fn export_canonical(&self) -> Result<Vec<u8>, ScholinkError> {
        self.read(|store| export::export_canonical(store))
    }

    pub fn canonical(&self) -> Result<CanonicalGraph, ScholinkError> {
        self.read(|store| CanonicalGraph::from_store(store))
    }

    pub fn canonical_checksum(&self) -> Result<u64, ScholinkError> {
        self.read(|store| export::canonical_checksum(store))
    }

    /// BLAKE3 hash of the canonical export.
    #[cfg(feature = "crypto-hash")]
    pub fn canonical_crypto_hash(&self) -> Result<String, ScholinkError> {
        self.read(|store| export::canonical_crypto_hash(store))
    }
}

// =============================================================================
// TESTS
// =============================================================================
