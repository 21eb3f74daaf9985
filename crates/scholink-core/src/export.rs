//! # Canonical Export Module
//!
//! Deterministic, bit-exact serialization of the whole grouping graph.
//!
//! redb files are not bit-identical across runs or backends; the canonical
//! export is. Every table is written in ascending key order together with the
//! id sequences, so two stores that ingested the same events export the same
//! bytes whichever backend they use.
//!
//! The `file` backend of the CLI persists a [`MemoryStore`](crate::MemoryStore)
//! as one of these exports.

use crate::primitives::{FORMAT_VERSION, MAGIC_BYTES};
use crate::store::{Sequences, StoreRead, Tables};
use crate::{
    Claim, EventRecord, Group, GroupId, GroupRelationship, GroupRelationshipId, Identifier,
    IdentifierId, Relationship, RelationshipId, Retraction, ScholinkError,
};
use serde::{Deserialize, Serialize};

// =============================================================================
// CANONICAL FORMAT
// =============================================================================

/// Maximum number of records of any one kind accepted on import.
///
/// Checked against the header before the body is decoded.
pub const MAX_IMPORT_RECORD_COUNT: u64 = 50_000_000;

/// Header for canonical export files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonicalHeader {
    pub magic: [u8; 4],
    pub version: u8,
    pub identifier_count: u64,
    pub relationship_count: u64,
    pub group_relationship_count: u64,
    /// FNV-1a over the encoded body.
    pub checksum: u64,
}

impl CanonicalHeader {
    /// Validate magic and version.
    ///
    /// Error messages are kept generic.
    pub fn validate(&self) -> Result<(), ScholinkError> {
        if &self.magic != MAGIC_BYTES {
            return Err(ScholinkError::Serialization(
                "Invalid file format".to_string(),
            ));
        }
        if self.version != FORMAT_VERSION {
            return Err(ScholinkError::Serialization(
                "Unsupported file version".to_string(),
            ));
        }
        for count in [
            self.identifier_count,
            self.relationship_count,
            self.group_relationship_count,
        ] {
            if count > MAX_IMPORT_RECORD_COUNT {
                return Err(ScholinkError::Serialization(format!(
                    "Record count {count} exceeds maximum allowed {MAX_IMPORT_RECORD_COUNT}"
                )));
            }
        }
        Ok(())
    }
}

/// Every table of the store, each sorted by its primary key.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonicalGraph {
    pub identifiers: Vec<Identifier>,
    pub groups: Vec<Group>,
    pub identifier_links: Vec<(IdentifierId, GroupId)>,
    pub subgroup_links: Vec<(GroupId, GroupId)>,
    pub relationships: Vec<Relationship>,
    pub claims: Vec<Claim>,
    pub retractions: Vec<Retraction>,
    pub events: Vec<EventRecord>,
    pub group_relationships: Vec<GroupRelationship>,
    pub relationship_links: Vec<(RelationshipId, GroupRelationshipId)>,
    pub rollup_links: Vec<(GroupRelationshipId, GroupRelationshipId)>,
    pub sequences: Sequences,
}

impl CanonicalGraph {
    /// Read every table of a store snapshot.
    pub fn from_store<R: StoreRead + ?Sized>(store: &R) -> Result<Self, ScholinkError> {
        Ok(Self {
            identifiers: store.identifiers()?,
            groups: store.groups()?,
            identifier_links: store.identifier_links()?,
            subgroup_links: store.subgroup_links()?,
            relationships: store.relationships()?,
            claims: store.claims()?,
            retractions: store.retractions()?,
            events: store.events()?,
            group_relationships: store.group_relationships()?,
            relationship_links: store.relationship_links()?,
            rollup_links: store.rollup_links()?,
            sequences: store.sequences()?,
        })
    }

    /// Rebuild in-memory tables, preserving every id.
    pub fn to_tables(&self) -> Result<Tables, ScholinkError> {
        Tables::from_canonical(self)
    }

    fn encode(&self) -> Result<Vec<u8>, ScholinkError> {
        postcard::to_allocvec(self).map_err(|e| ScholinkError::Serialization(format!("Data: {e}")))
    }

    /// Deterministic checksum of the encoded body.
    pub fn checksum(&self) -> Result<u64, ScholinkError> {
        Ok(checksum_bytes(&self.encode()?))
    }
}

/// 64-bit FNV-1a. Detects accidental corruption; it is not a cryptographic
/// hash (see `canonical_crypto_hash`).
#[must_use]
pub fn checksum_bytes(data: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    data.iter().fold(OFFSET, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(PRIME)
    })
}

// =============================================================================
// EXPORT FUNCTIONS
// =============================================================================

/// Export a store snapshot.
///
/// Format:
/// ```text
/// [header_len: u32 LE] [CanonicalHeader (postcard)] [CanonicalGraph (postcard)]
/// ```
pub fn export_canonical<R: StoreRead + ?Sized>(store: &R) -> Result<Vec<u8>, ScholinkError> {
    let canonical = CanonicalGraph::from_store(store)?;
    let data_bytes = canonical.encode()?;

    let header = CanonicalHeader {
        magic: *MAGIC_BYTES,
        version: FORMAT_VERSION,
        identifier_count: canonical.identifiers.len() as u64,
        relationship_count: canonical.relationships.len() as u64,
        group_relationship_count: canonical.group_relationships.len() as u64,
        checksum: checksum_bytes(&data_bytes),
    };
    let header_bytes = postcard::to_allocvec(&header)
        .map_err(|e| ScholinkError::Serialization(format!("Header: {e}")))?;

    let mut result = Vec::with_capacity(4 + header_bytes.len() + data_bytes.len());
    result.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
    result.extend_from_slice(&header_bytes);
    result.extend_from_slice(&data_bytes);
    Ok(result)
}

/// Decode and verify an export.
pub fn import_canonical(data: &[u8]) -> Result<CanonicalGraph, ScholinkError> {
    let Some((len_bytes, rest)) = data.split_first_chunk::<4>() else {
        return Err(ScholinkError::Serialization("Data too short".to_string()));
    };
    let header_len = u32::from_le_bytes(*len_bytes) as usize;
    if rest.len() < header_len {
        return Err(ScholinkError::Serialization(
            "Data too short for header".to_string(),
        ));
    }
    let (header_bytes, body) = rest.split_at(header_len);

    let header: CanonicalHeader = postcard::from_bytes(header_bytes)
        .map_err(|e| ScholinkError::Serialization(format!("Header: {e}")))?;
    header.validate()?;

    let computed = checksum_bytes(body);
    if computed != header.checksum {
        return Err(ScholinkError::Serialization(format!(
            "Checksum mismatch: expected {}, got {}",
            header.checksum, computed
        )));
    }

    let canonical: CanonicalGraph = postcard::from_bytes(body)
        .map_err(|e| ScholinkError::Serialization(format!("Data: {e}")))?;

    if canonical.identifiers.len() as u64 != header.identifier_count
        || canonical.relationships.len() as u64 != header.relationship_count
        || canonical.group_relationships.len() as u64 != header.group_relationship_count
    {
        return Err(ScholinkError::Serialization(
            "Record count mismatch".to_string(),
        ));
    }
    Ok(canonical)
}

/// Checksum of a store's canonical form.
pub fn canonical_checksum<R: StoreRead + ?Sized>(store: &R) -> Result<u64, ScholinkError> {
    CanonicalGraph::from_store(store)?.checksum()
}

// =============================================================================
// CRYPTOGRAPHIC HASH SUPPORT
// =============================================================================

/// BLAKE3 hash of the canonical export, as 64 hex characters.
///
/// Only available with the `crypto-hash` feature.
#[cfg(feature = "crypto-hash")]
pub fn canonical_crypto_hash<R: StoreRead + ?Sized>(store: &R) -> Result<String, ScholinkError> {
    Ok(compute_blake3_hash(&export_canonical(store)?))
}

/// BLAKE3 hash of raw bytes, as 64 hex characters.
#[cfg(feature = "crypto-hash")]
#[must_use]
pub fn compute_blake3_hash(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, RawEvent};
    use crate::ingestor::Ingestor;
    use crate::scheme::DetectedSchemes;
    use crate::store::Table;
    use crate::EventType;

    fn populated() -> Tables {
        let validator = DetectedSchemes::new().expect("patterns");
        let mut tables = Tables::new();
        for raw in [
            RawEvent::new(EventType::RelationshipCreated, "acme")
                .with_payload("A", "Cites", "B")
                .with_payload("C", "IsVersionOf", "B"),
            RawEvent::new(EventType::RelationshipCreated, "acme")
                .with_payload("A", "IsIdenticalTo", "A2"),
        ] {
            let event = Event::load(&raw, &validator).expect("event");
            Ingestor::ingest_event(&mut tables, &event).expect("ingest");
        }
        tables
    }

    #[test]
    fn export_is_deterministic() {
        let tables = populated();
        let first = export_canonical(&tables).expect("export");
        let second = export_canonical(&tables).expect("export");
        assert_eq!(first, second, "Exports must be bit-identical");
    }

    #[test]
    fn import_rebuilds_identical_tables() {
        let tables = populated();
        let exported = export_canonical(&tables).expect("export");
        let rebuilt = import_canonical(&exported)
            .expect("import")
            .to_tables()
            .expect("tables");

        assert_eq!(
            export_canonical(&rebuilt).expect("export"),
            exported,
            "Re-export must match"
        );
        assert_eq!(
            rebuilt.count(Table::GroupRelationships).expect("count"),
            tables.count(Table::GroupRelationships).expect("count")
        );
        assert_eq!(
            rebuilt.sequences().expect("seq"),
            tables.sequences().expect("seq")
        );
    }

    #[test]
    fn corruption_is_detected() {
        let mut exported = export_canonical(&populated()).expect("export");
        if let Some(last) = exported.last_mut() {
            *last ^= 0xFF;
        }
        assert!(import_canonical(&exported).is_err());
    }

    #[test]
    fn rejects_bad_magic_and_short_input() {
        assert!(import_canonical(&[1, 2]).is_err());

        let mut exported = export_canonical(&Tables::new()).expect("export");
        // First header byte after the length prefix is the magic.
        exported[4] = b'X';
        assert!(import_canonical(&exported).is_err());
    }

    #[test]
    fn checksum_tracks_content() {
        let empty = canonical_checksum(&Tables::new()).expect("checksum");
        let full = canonical_checksum(&populated()).expect("checksum");
        assert_ne!(empty, full);
        assert_eq!(checksum_bytes(b""), 0xcbf2_9ce4_8422_2325);
    }

    #[cfg(feature = "crypto-hash")]
    #[test]
    fn crypto_hash_is_stable() {
        let tables = populated();
        let h1 = canonical_crypto_hash(&tables).expect("hash");
        let h2 = canonical_crypto_hash(&tables).expect("hash");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }
}
