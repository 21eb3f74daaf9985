//! # Core Type Definitions
//!
//! This module contains all record types for the scholink grouping graph:
//! - Record identifiers (`IdentifierId`, `GroupId`, `RelationshipId`, ...)
//! - Canonical vocabularies (`Relation`, `GroupType`, `EventType`)
//! - Stored records (`Identifier`, `Group`, `Relationship`, `GroupRelationship`)
//! - Provenance records (`Claim`, `Retraction`, `EventRecord`)
//! - Error types (`ScholinkError`)
//!
//! ## Determinism Guarantees
//!
//! Every id is an integer handed out by a monotonically increasing sequence,
//! and every type implements `Ord` so that `BTreeMap`/`BTreeSet` iteration
//! (and therefore every query result) is reproducible.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

// =============================================================================
// RECORD IDENTIFIERS
// =============================================================================

/// Internal id of an [`Identifier`] record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IdentifierId(pub u64);

/// Internal id of a [`Group`]. Groups are only ever referenced by id, so a
/// merge rewrites index entries instead of chasing live references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupId(pub u64);

/// Internal id of a raw [`Relationship`] claim target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelationshipId(pub u64);

/// Internal id of a deduplicated [`GroupRelationship`] edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupRelationshipId(pub u64);

/// Internal id of a [`Claim`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClaimId(pub u64);

// =============================================================================
// VOCABULARIES
// =============================================================================

/// Canonical relation stored on every edge.
///
/// Inverse external names (`IsCitedBy`, `IsVersionOf`, ...) never reach the
/// store; see [`crate::relation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Relation {
    Cites,
    IsSupplementTo,
    HasVersion,
    IsIdenticalTo,
    IsRelatedTo,
}

impl Relation {
    /// All canonical relations in code order.
    pub const ALL: [Relation; 5] = [
        Relation::Cites,
        Relation::IsSupplementTo,
        Relation::HasVersion,
        Relation::IsIdenticalTo,
        Relation::IsRelatedTo,
    ];

    /// Stable one-byte code used in storage keys.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Relation::Cites => 0,
            Relation::IsSupplementTo => 1,
            Relation::HasVersion => 2,
            Relation::IsIdenticalTo => 3,
            Relation::IsRelatedTo => 4,
        }
    }

    /// Inverse of [`Relation::code`].
    pub fn from_code(code: u8) -> Result<Self, ScholinkError> {
        Self::ALL
            .into_iter()
            .find(|r| r.code() == code)
            .ok_or_else(|| ScholinkError::Serialization(format!("unknown relation code {code}")))
    }

    /// Canonical name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Relation::Cites => "Cites",
            Relation::IsSupplementTo => "IsSupplementTo",
            Relation::HasVersion => "HasVersion",
            Relation::IsIdenticalTo => "IsIdenticalTo",
            Relation::IsRelatedTo => "IsRelatedTo",
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Granularity of a [`Group`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GroupType {
    /// Identifiers that name exactly the same work instance.
    Identity,
    /// Identity groups that are versions or parts of one work.
    Version,
}

impl GroupType {
    /// Stable one-byte code used in storage keys.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            GroupType::Identity => 0,
            GroupType::Version => 1,
        }
    }

    /// Inverse of [`GroupType::code`].
    pub fn from_code(code: u8) -> Result<Self, ScholinkError> {
        match code {
            0 => Ok(GroupType::Identity),
            1 => Ok(GroupType::Version),
            other => Err(ScholinkError::Serialization(format!(
                "unknown group type code {other}"
            ))),
        }
    }
}

impl fmt::Display for GroupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupType::Identity => f.write_str("Identity"),
            GroupType::Version => f.write_str("Version"),
        }
    }
}

/// Kind of an incoming event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventType {
    RelationshipCreated,
    RelationshipDeleted,
}

// =============================================================================
// STORED RECORDS
// =============================================================================

/// An external identifier for a work, unique by `(value, scheme)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Identifier {
    pub id: IdentifierId,
    pub value: String,
    /// Always lower-case.
    pub scheme: String,
}

/// A cluster of identifiers (Identity) or of identity groups (Version).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub kind: GroupType,
}

/// A raw claim between two identifiers, unique by `(source, relation, target)`.
///
/// Immutable once created. Whether it is still asserted is decided by its
/// [`Claim`]s and their [`Retraction`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Relationship {
    pub id: RelationshipId,
    pub source: IdentifierId,
    pub relation: Relation,
    pub target: IdentifierId,
}

/// A deduplicated edge between two groups of the same type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupRelationship {
    pub id: GroupRelationshipId,
    pub source: GroupId,
    pub target: GroupId,
    pub relation: Relation,
    pub kind: GroupType,
}

/// One assertion of a relationship by one event.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Claim {
    pub id: ClaimId,
    pub relationship: RelationshipId,
    pub event: Uuid,
    pub creator: String,
    pub time: DateTime<Utc>,
}

/// Logical retraction of a [`Claim`] by a later deletion event.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Retraction {
    pub claim: ClaimId,
    pub event: Uuid,
    pub time: DateTime<Utc>,
}

/// Header of an ingested event, kept so that redelivery is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: Uuid,
    pub kind: EventType,
    pub creator: String,
    pub source: String,
    pub time: DateTime<Utc>,
    pub payload_count: u32,
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the scholink system.
///
/// - No silent failures
/// - Use `Result<T, ScholinkError>` for fallible operations
/// - Any error raised while an event is being folded aborts that event's
///   transaction, leaving the store in its pre-event state
#[derive(Debug, Error)]
pub enum ScholinkError {
    /// An identifier value failed validation against its declared scheme.
    #[error("Invalid identifier {value:?} for scheme {scheme:?}: {reason}")]
    InvalidIdentifier {
        value: String,
        scheme: String,
        reason: String,
    },

    /// The event timestamp is not an ISO-8601 UTC instant.
    #[error("Invalid time format: {0}. ISO 8601 UTC timestamp required.")]
    InvalidTimestamp(String),

    /// The event envelope is malformed.
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// A merge would violate a grouping invariant.
    #[error("Merge conflict between {left:?} and {right:?}: {reason}")]
    MergeConflict {
        left: GroupId,
        right: GroupId,
        reason: String,
    },

    /// A deletion event references a claim that was never created.
    #[error("No live claim by {creator:?} for {source_value} {relation} {target_value}")]
    ClaimNotFound {
        creator: String,
        source_value: String,
        relation: Relation,
        target_value: String,
    },

    /// The queried identifier is unknown.
    #[error("Identifier not found: {scheme}:{value}")]
    IdentifierNotFound { value: String, scheme: String },

    /// A group id no longer resolves (it was merged away or never existed).
    #[error("Group not found: {0:?}")]
    GroupNotFound(GroupId),

    /// A group relationship id no longer resolves.
    #[error("Group relationship not found: {0:?}")]
    GroupRelationshipNotFound(GroupRelationshipId),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The storage backend failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relation_codes_round_trip() {
        for relation in Relation::ALL {
            assert_eq!(Relation::from_code(relation.code()).expect("code"), relation);
        }
        assert!(Relation::from_code(42).is_err());
    }

    #[test]
    fn group_type_codes_are_stable() {
        assert_eq!(GroupType::Identity.code(), 0);
        assert_eq!(GroupType::Version.code(), 1);
        assert!(GroupType::from_code(7).is_err());
    }

    #[test]
    fn ids_order_numerically() {
        let mut ids = vec![GroupId(3), GroupId(1), GroupId(2)];
        ids.sort();
        assert_eq!(ids, vec![GroupId(1), GroupId(2), GroupId(3)]);
    }

    #[test]
    fn errors_render_context() {
        let err = ScholinkError::IdentifierNotFound {
            value: "10.1234/a".to_string(),
            scheme: "doi".to_string(),
        };
        assert_eq!(err.to_string(), "Identifier not found: doi:10.1234/a");
    }
}
