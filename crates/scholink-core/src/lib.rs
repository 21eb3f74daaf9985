//! # scholink-core
//!
//! The deterministic grouping engine for scholink.
//!
//! Scholarly identifiers (DOIs, arXiv ids, handles, ...) that name the same
//! work are clustered into Identity Groups; Identity Groups that are versions
//! of one another are clustered into Version Groups. Raw relationship claims
//! are folded into deduplicated group-level edges with full provenance, so
//! "who cites this work, counting all its aliases and versions" is a walk over
//! a few edges.
//!
//! ## Architectural Constraints
//!
//! - Membership changes only on explicit `IsIdenticalTo`/`HasVersion` claims
//! - Deterministic: ordered maps only, lower id survives every merge
//! - One transaction per event: an event applies fully or not at all
//! - No async, no network dependencies

// =============================================================================
// MODULES
// =============================================================================

pub mod broker;
pub mod citations;
pub mod event;
pub mod export;
pub mod grouping;
pub mod ingestor;
pub mod primitives;
pub mod relation;
pub mod scheme;
pub mod storage;
pub mod store;
pub mod system;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    Claim, ClaimId, EventRecord, EventType, Group, GroupId, GroupRelationship,
    GroupRelationshipId, GroupType, Identifier, IdentifierId, Relation, Relationship,
    RelationshipId, Retraction, ScholinkError,
};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use broker::Broker;
pub use citations::{
    CitationEngine, CitationEntry, CitationQuery, Citations, GroupCitation, RelationshipView,
};
pub use event::{Event, IdentifierRef, RawEvent};
pub use export::{
    CanonicalGraph, CanonicalHeader, canonical_checksum, export_canonical, import_canonical,
};
pub use grouping::{GroupingEngine, Placement};
pub use ingestor::{IngestOutcome, IngestReport, Ingestor};
pub use scheme::{DetectedSchemes, SchemeValidator};
pub use storage::RedbStore;
pub use store::{MemoryStore, StoreRead, StoreWrite, Table, Tables};

// =============================================================================
// RE-EXPORTS: System (from system module)
// =============================================================================

pub use system::{BrokerMetrics, Violation, verify_integrity};
