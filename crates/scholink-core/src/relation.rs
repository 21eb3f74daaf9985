//! # Relation Normalizer
//!
//! Pure mapping from an external relation token to a canonical [`Relation`]
//! plus a direction-inversion flag.
//!
//! When the flag is set the caller must swap the claim's source and target,
//! so that stored edges always point one way: "Y IsCitedBy X" is stored as
//! `Cites(X, Y)`.

use crate::Relation;
use crate::primitives::DATACITE_SCHEMA;
use serde::{Deserialize, Serialize};

/// External token → (canonical relation, inverted).
///
/// Tokens missing from this table map to `IsRelatedTo`, not inverted.
const DATACITE_RELATIONS: &[(&str, Relation, bool)] = &[
    ("Cites", Relation::Cites, false),
    ("IsCitedBy", Relation::Cites, true),
    ("References", Relation::Cites, false),
    ("IsReferencedBy", Relation::Cites, true),
    ("IsSupplementTo", Relation::IsSupplementTo, false),
    ("IsSupplementedBy", Relation::IsSupplementTo, true),
    ("HasVersion", Relation::HasVersion, false),
    ("IsVersionOf", Relation::HasVersion, true),
    ("HasPart", Relation::HasVersion, false),
    ("IsPartOf", Relation::HasVersion, true),
    ("IsIdenticalTo", Relation::IsIdenticalTo, false),
];

/// The `RelationshipType` object of a Scholix payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipType {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "SubType", default, skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<String>,
    #[serde(
        rename = "SubTypeSchema",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sub_type_schema: Option<String>,
}

impl RelationshipType {
    /// A type carrying only a `Name`.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sub_type: None,
            sub_type_schema: None,
        }
    }

    /// The token that decides the relation: `SubType` when the sub-type
    /// schema is DataCite, otherwise `Name`.
    #[must_use]
    pub fn token(&self) -> &str {
        match (&self.sub_type, &self.sub_type_schema) {
            (Some(sub_type), Some(schema)) if schema == DATACITE_SCHEMA => sub_type,
            _ => &self.name,
        }
    }
}

/// Normalize a DataCite relation token.
#[must_use]
pub fn from_datacite_relation(token: &str) -> (Relation, bool) {
    DATACITE_RELATIONS
        .iter()
        .find(|(name, _, _)| *name == token)
        .map_or((Relation::IsRelatedTo, false), |&(_, relation, inverted)| {
            (relation, inverted)
        })
}

/// Normalize a Scholix `RelationshipType` object.
#[must_use]
pub fn from_scholix_relation(relationship_type: &RelationshipType) -> (Relation, bool) {
    from_datacite_relation(relationship_type.token())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn citation_tokens_normalize_to_cites() {
        assert_eq!(from_datacite_relation("Cites"), (Relation::Cites, false));
        assert_eq!(from_datacite_relation("IsCitedBy"), (Relation::Cites, true));
        assert_eq!(from_datacite_relation("References"), (Relation::Cites, false));
        assert_eq!(
            from_datacite_relation("IsReferencedBy"),
            (Relation::Cites, true)
        );
    }

    #[test]
    fn version_and_part_tokens_share_has_version() {
        assert_eq!(
            from_datacite_relation("HasVersion"),
            (Relation::HasVersion, false)
        );
        assert_eq!(
            from_datacite_relation("IsVersionOf"),
            (Relation::HasVersion, true)
        );
        assert_eq!(from_datacite_relation("HasPart"), (Relation::HasVersion, false));
        assert_eq!(from_datacite_relation("IsPartOf"), (Relation::HasVersion, true));
    }

    #[test]
    fn supplement_and_identity_tokens() {
        assert_eq!(
            from_datacite_relation("IsSupplementedBy"),
            (Relation::IsSupplementTo, true)
        );
        assert_eq!(
            from_datacite_relation("IsIdenticalTo"),
            (Relation::IsIdenticalTo, false)
        );
    }

    #[test]
    fn unknown_tokens_fall_back_to_related() {
        assert_eq!(
            from_datacite_relation("IsDocumentedBy"),
            (Relation::IsRelatedTo, false)
        );
        assert_eq!(from_datacite_relation(""), (Relation::IsRelatedTo, false));
        // Matching is case-sensitive.
        assert_eq!(from_datacite_relation("cites"), (Relation::IsRelatedTo, false));
    }

    #[test]
    fn datacite_sub_type_overrides_name() {
        let rel = RelationshipType {
            name: "IsRelatedTo".to_string(),
            sub_type: Some("IsVersionOf".to_string()),
            sub_type_schema: Some("DataCite".to_string()),
        };
        assert_eq!(from_scholix_relation(&rel), (Relation::HasVersion, true));
    }

    #[test]
    fn foreign_sub_type_schema_is_ignored() {
        let rel = RelationshipType {
            name: "References".to_string(),
            sub_type: Some("IsVersionOf".to_string()),
            sub_type_schema: Some("Other".to_string()),
        };
        assert_eq!(from_scholix_relation(&rel), (Relation::Cites, false));
        assert_eq!(
            from_scholix_relation(&RelationshipType::named("IsSupplementTo")),
            (Relation::IsSupplementTo, false)
        );
    }

    #[test]
    fn every_canonical_relation_but_fallback_has_a_forward_name() {
        for relation in Relation::ALL {
            let forward = DATACITE_RELATIONS
                .iter()
                .any(|&(_, r, inverted)| r == relation && !inverted);
            assert_eq!(forward, relation != Relation::IsRelatedTo, "{relation}");
        }
    }
}
