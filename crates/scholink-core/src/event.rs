//! # Event Loader
//!
//! Wire types for incoming Scholix-style events and their validation into a
//! typed [`Event`].
//!
//! - Validate the whole event before any store mutation
//! - Normalize relations and swap inverted claims here, once
//! - Reject the whole event if any payload is malformed
//!
//! Nothing in this module touches the store.

use crate::primitives::{
    MAX_IDENTIFIER_LENGTH, MAX_PAYLOADS_PER_EVENT, MAX_PROVENANCE_LENGTH, MAX_SCHEME_LENGTH,
};
use crate::relation::{RelationshipType, from_scholix_relation};
use crate::scheme::SchemeValidator;
use crate::{EventRecord, EventType, Relation, ScholinkError};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// WIRE TYPES
// =============================================================================

/// `{ID, IDScheme}` as delivered.
///
/// A Scholix object envelope, `{"Identifier": {ID, IDScheme}, "Type": ...}`,
/// is unwrapped on deserialization; only the identifier is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "WireObject")]
pub struct RawIdentifier {
    #[serde(rename = "ID", alias = "id")]
    pub id: String,
    #[serde(rename = "IDScheme", alias = "scheme")]
    pub scheme: String,
}

#[derive(Deserialize)]
struct FlatIdentifier {
    #[serde(rename = "ID", alias = "id")]
    id: String,
    #[serde(rename = "IDScheme", alias = "scheme")]
    scheme: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireObject {
    Enveloped {
        #[serde(rename = "Identifier")]
        identifier: FlatIdentifier,
    },
    Flat(FlatIdentifier),
}

impl From<WireObject> for RawIdentifier {
    fn from(object: WireObject) -> Self {
        let (WireObject::Enveloped { identifier: flat } | WireObject::Flat(flat)) = object;
        Self {
            id: flat.id,
            scheme: flat.scheme,
        }
    }
}

/// One claim inside an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPayload {
    #[serde(rename = "Source")]
    pub source: RawIdentifier,
    #[serde(rename = "RelationshipType")]
    pub relationship_type: RelationshipType,
    #[serde(rename = "Target")]
    pub target: RawIdentifier,
}

/// An event as delivered by the event source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(rename = "ID", alias = "id")]
    pub id: String,
    #[serde(rename = "EventType", alias = "event_type", alias = "type")]
    pub event_type: String,
    #[serde(rename = "Creator", alias = "creator")]
    pub creator: String,
    #[serde(rename = "Source", alias = "source")]
    pub source: String,
    #[serde(rename = "Time", alias = "time")]
    pub time: String,
    #[serde(rename = "Payload", alias = "payload")]
    pub payload: Vec<RawPayload>,
}

impl RawEvent {
    /// Start an event with a fresh id and the current time.
    #[must_use]
    pub fn new(kind: EventType, creator: impl Into<String>) -> Self {
        let event_type = match kind {
            EventType::RelationshipCreated => "RelationshipCreated",
            EventType::RelationshipDeleted => "RelationshipDeleted",
        };
        Self {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.to_string(),
            creator: creator.into(),
            source: "scholink".to_string(),
            time: Utc::now().to_rfc3339(),
            payload: Vec::new(),
        }
    }

    /// Append a DOI-to-DOI claim. The relation travels as a DataCite
    /// sub-type, the way link providers send it.
    #[must_use]
    pub fn with_payload(mut self, source: &str, relation: &str, target: &str) -> Self {
        self.payload.push(RawPayload {
            source: RawIdentifier {
                id: source.to_string(),
                scheme: "DOI".to_string(),
            },
            relationship_type: RelationshipType {
                name: "IsRelatedTo".to_string(),
                sub_type: Some(relation.to_string()),
                sub_type_schema: Some(crate::primitives::DATACITE_SCHEMA.to_string()),
            },
            target: RawIdentifier {
                id: target.to_string(),
                scheme: "DOI".to_string(),
            },
        });
        self
    }
}

// =============================================================================
// VALIDATED TYPES
// =============================================================================

/// A validated `(value, scheme)` pair; scheme is lower-case.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IdentifierRef {
    pub value: String,
    pub scheme: String,
}

impl IdentifierRef {
    #[must_use]
    pub fn new(value: impl Into<String>, scheme: impl AsRef<str>) -> Self {
        Self {
            value: value.into(),
            scheme: scheme.as_ref().to_lowercase(),
        }
    }
}

/// A payload after normalization: stored direction, canonical relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimedRelationship {
    pub source: IdentifierRef,
    pub relation: Relation,
    pub target: IdentifierRef,
}

/// A fully validated event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub kind: EventType,
    pub creator: String,
    pub source: String,
    pub time: DateTime<Utc>,
    pub payloads: Vec<ClaimedRelationship>,
}

impl Event {
    /// Validate a raw event.
    ///
    /// The timestamp and envelope are checked first; then every payload. The
    /// first failure rejects the whole event.
    pub fn load(raw: &RawEvent, validator: &dyn SchemeValidator) -> Result<Self, ScholinkError> {
        let id = Uuid::parse_str(raw.id.trim())
            .map_err(|e| ScholinkError::InvalidEvent(format!("event id {:?}: {e}", raw.id)))?;
        let kind = parse_event_type(&raw.event_type)?;
        let time = parse_time(&raw.time)?;

        let creator = bounded_text("Creator", &raw.creator)?;
        let source = bounded_text("Source", &raw.source)?;

        if raw.payload.is_empty() {
            return Err(ScholinkError::InvalidEvent("empty payload".to_string()));
        }
        if raw.payload.len() > MAX_PAYLOADS_PER_EVENT {
            return Err(ScholinkError::InvalidEvent(format!(
                "{} payloads exceed maximum {}",
                raw.payload.len(),
                MAX_PAYLOADS_PER_EVENT
            )));
        }

        let payloads = raw
            .payload
            .iter()
            .map(|p| load_payload(p, validator))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            id,
            kind,
            creator,
            source,
            time,
            payloads,
        })
    }

    /// The header persisted for duplicate detection.
    #[must_use]
    pub fn record(&self) -> EventRecord {
        EventRecord {
            id: self.id,
            kind: self.kind,
            creator: self.creator.clone(),
            source: self.source.clone(),
            time: self.time,
            payload_count: u32::try_from(self.payloads.len()).unwrap_or(u32::MAX),
        }
    }
}

fn load_payload(
    raw: &RawPayload,
    validator: &dyn SchemeValidator,
) -> Result<ClaimedRelationship, ScholinkError> {
    let (relation, inverted) = from_scholix_relation(&raw.relationship_type);
    let mut source = load_identifier(&raw.source, validator)?;
    let mut target = load_identifier(&raw.target, validator)?;
    if inverted {
        std::mem::swap(&mut source, &mut target);
    }
    Ok(ClaimedRelationship {
        source,
        relation,
        target,
    })
}

fn load_identifier(
    raw: &RawIdentifier,
    validator: &dyn SchemeValidator,
) -> Result<IdentifierRef, ScholinkError> {
    let value = raw.id.trim();
    let scheme = raw.scheme.trim().to_lowercase();
    let invalid = |reason: &str| ScholinkError::InvalidIdentifier {
        value: raw.id.clone(),
        scheme: raw.scheme.clone(),
        reason: reason.to_string(),
    };

    if value.is_empty() {
        return Err(invalid("empty value"));
    }
    if value.len() > MAX_IDENTIFIER_LENGTH {
        return Err(invalid("value too long"));
    }
    if scheme.is_empty() || scheme.len() > MAX_SCHEME_LENGTH {
        return Err(invalid("bad scheme"));
    }
    if !validator.is_valid(value, &scheme) {
        return Err(invalid("scheme does not match value"));
    }

    Ok(IdentifierRef {
        value: value.to_string(),
        scheme,
    })
}

fn parse_event_type(token: &str) -> Result<EventType, ScholinkError> {
    let folded: String = token
        .chars()
        .filter(|c| *c != '_')
        .flat_map(char::to_lowercase)
        .collect();
    match folded.as_str() {
        "relationshipcreated" | "created" => Ok(EventType::RelationshipCreated),
        "relationshipdeleted" | "deleted" => Ok(EventType::RelationshipDeleted),
        _ => Err(ScholinkError::InvalidEvent(format!(
            "unknown event type {token:?}"
        ))),
    }
}

/// Parse an ISO-8601 instant. Offsets are converted to UTC; a timestamp
/// without an offset is taken to be UTC already.
pub fn parse_time(raw: &str) -> Result<DateTime<Utc>, ScholinkError> {
    let raw = raw.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| ScholinkError::InvalidTimestamp(raw.to_string()))
}

fn bounded_text(field: &str, raw: &str) -> Result<String, ScholinkError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(ScholinkError::InvalidEvent(format!("{field} is empty")));
    }
    if text.len() > MAX_PROVENANCE_LENGTH {
        return Err(ScholinkError::InvalidEvent(format!("{field} is too long")));
    }
    Ok(text.to_string())
}

// =============================================================================
// TESTS
// =============================================================================
