//! # Broker Metrics
//!
//! Row counts and a structural integrity check over any store snapshot.
//!
//! | Check | Holds when |
//! |-------|-----------|
//! | membership | every Identifier has one Identity Group, every Identity Group one Version Group |
//! | non-empty groups | no Group is left without members after a merge |
//! | edge keys | no two edges share `(source, target, relation, type)`, no self-loops |
//! | provenance | active Relationships are linked unless both ends share an Identity Group |
//! | rollups | Identity edges are rolled up unless both ends share a Version Group |

use crate::store::{StoreRead, Table};
use crate::{
    GroupId, GroupRelationshipId, GroupType, IdentifierId, RelationshipId, ScholinkError,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// =============================================================================
// METRICS
// =============================================================================

/// Counts extracted from a store snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerMetrics {
    pub identifiers: usize,
    pub identity_groups: usize,
    pub version_groups: usize,
    pub relationships: usize,
    /// Relationships with at least one unretracted claim.
    pub active_relationships: usize,
    pub claims: usize,
    pub retractions: usize,
    pub events: usize,
    pub identity_edges: usize,
    pub version_edges: usize,
    /// Identifiers per Identity Group, as fixed-point thousandths.
    pub aliases_per_thousand: u64,
}

impl BrokerMetrics {
    /// Compute metrics from a snapshot.
    pub fn from_store<R: StoreRead + ?Sized>(store: &R) -> Result<Self, ScholinkError> {
        let identifiers = store.count(Table::Identifiers)?;
        let identity_groups = store.count_groups(GroupType::Identity)?;

        let mut active_relationships = 0;
        for relationship in store.relationships()? {
            if store.is_active(relationship.id)? {
                active_relationships += 1;
            }
        }

        let (identity_edges, version_edges) = store.group_relationships()?.iter().fold(
            (0, 0),
            |(identity, version), edge| match edge.kind {
                GroupType::Identity => (identity + 1, version),
                GroupType::Version => (identity, version + 1),
            },
        );

        let aliases_per_thousand = if identity_groups > 0 {
            (identifiers as u64).saturating_mul(1000) / (identity_groups as u64)
        } else {
            0
        };

        Ok(Self {
            identifiers,
            identity_groups,
            version_groups: store.count_groups(GroupType::Version)?,
            relationships: store.count(Table::Relationships)?,
            active_relationships,
            claims: store.count(Table::Claims)?,
            retractions: store.count(Table::Retractions)?,
            events: store.count(Table::Events)?,
            identity_edges,
            version_edges,
            aliases_per_thousand,
        })
    }
}

// =============================================================================
// INTEGRITY
// =============================================================================

/// One broken structural invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Violation {
    UnplacedIdentifier(IdentifierId),
    UnplacedIdentityGroup(GroupId),
    EmptyGroup(GroupId),
    WrongMemberKind { member: GroupId, group: GroupId },
    SelfLoop(GroupRelationshipId),
    DuplicateEdge(GroupRelationshipId),
    /// An edge left with no supporting Relationship or rolled-up child.
    UnsupportedEdge(GroupRelationshipId),
    UnlinkedRelationship(RelationshipId),
    InactiveRelationshipLinked(RelationshipId),
    /// The link points at an edge that does not join the endpoints' groups.
    MisfiledRelationship(RelationshipId),
    MissingRollup(GroupRelationshipId),
    MisfiledRollup(GroupRelationshipId),
}

/// Walk every table and report each broken invariant. An empty result
/// means the store is consistent.
pub fn verify_integrity<R: StoreRead + ?Sized>(
    store: &R,
) -> Result<Vec<Violation>, ScholinkError> {
    let mut violations = Vec::new();

    for identifier in store.identifiers()? {
        if store.identity_group_of(identifier.id)?.is_none() {
            violations.push(Violation::UnplacedIdentifier(identifier.id));
        }
    }

    for group in store.groups()? {
        match group.kind {
            GroupType::Identity => {
                if store.members_of(group.id)?.is_empty() {
                    violations.push(Violation::EmptyGroup(group.id));
                }
                match store.version_group_of(group.id)? {
                    None => violations.push(Violation::UnplacedIdentityGroup(group.id)),
                    Some(parent) => {
                        if store.group(parent)?.map(|g| g.kind) != Some(GroupType::Version) {
                            violations.push(Violation::WrongMemberKind {
                                member: group.id,
                                group: parent,
                            });
                        }
                    }
                }
            }
            GroupType::Version => {
                if store.subgroups_of(group.id)?.is_empty() {
                    violations.push(Violation::EmptyGroup(group.id));
                }
            }
        }
    }

    let mut keys = BTreeSet::new();
    for edge in store.group_relationships()? {
        if edge.source == edge.target {
            violations.push(Violation::SelfLoop(edge.id));
        }
        if !keys.insert((edge.source, edge.target, edge.relation, edge.kind)) {
            violations.push(Violation::DuplicateEdge(edge.id));
        }
        let supported = match edge.kind {
            GroupType::Identity => !store.supporting_relationships(edge.id)?.is_empty(),
            GroupType::Version => !store.rolled_up(edge.id)?.is_empty(),
        };
        if !supported {
            violations.push(Violation::UnsupportedEdge(edge.id));
        }
        if edge.kind == GroupType::Identity {
            check_rollup(store, &edge, &mut violations)?;
        }
    }

    for relationship in store.relationships()? {
        let source = store.identity_group_of(relationship.source)?;
        let target = store.identity_group_of(relationship.target)?;
        let link = store.group_relationship_of(relationship.id)?;

        if !store.is_active(relationship.id)? {
            if link.is_some() {
                violations.push(Violation::InactiveRelationshipLinked(relationship.id));
            }
            continue;
        }
        match link {
            None if source != target => {
                violations.push(Violation::UnlinkedRelationship(relationship.id));
            }
            None => {}
            Some(edge_id) => {
                let filed = store.group_relationship(edge_id)?.is_some_and(|edge| {
                    Some(edge.source) == source
                        && Some(edge.target) == target
                        && edge.relation == relationship.relation
                });
                if !filed {
                    violations.push(Violation::MisfiledRelationship(relationship.id));
                }
            }
        }
    }

    Ok(violations)
}

fn check_rollup<R: StoreRead + ?Sized>(
    store: &R,
    edge: &crate::GroupRelationship,
    violations: &mut Vec<Violation>,
) -> Result<(), ScholinkError> {
    let source = store.version_group_of(edge.source)?;
    let target = store.version_group_of(edge.target)?;
    match store.rollup_of(edge.id)? {
        None if source != target => violations.push(Violation::MissingRollup(edge.id)),
        None => {}
        Some(parent) => {
            let filed = store.group_relationship(parent)?.is_some_and(|p| {
                p.kind == GroupType::Version
                    && Some(p.source) == source
                    && Some(p.target) == target
                    && p.relation == edge.relation
            });
            if !filed {
                violations.push(Violation::MisfiledRollup(edge.id));
            }
        }
    }
    Ok(())
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
    use crate::store::{StoreWrite, Tables};
    use crate::EventType;

    fn ingest(tables: &mut Tables, kind: EventType, payloads: &[(&str, &str, &str)]) {
        let validator = DetectedSchemes::new().expect("patterns");
        let mut raw = RawEvent::new(kind, "acme");
        for (s, r, t) in payloads {
            raw = raw.with_payload(s, r, t);
        }
        let event = Event::load(&raw, &validator).expect("event");
        Ingestor::ingest_event(tables, &event).expect("ingest");
    }

    #[test]
    fn empty_store_has_zero_metrics() {
        let metrics = BrokerMetrics::from_store(&Tables::new()).expect("metrics");
        assert_eq!(metrics, BrokerMetrics::default());
        assert!(verify_integrity(&Tables::new()).expect("verify").is_empty());
    }

    #[test]
    fn metrics_count_groups_and_edges() {
        let mut tables = Tables::new();
        ingest(
            &mut tables,
            EventType::RelationshipCreated,
            &[
                ("A", "Cites", "B"),
                ("A", "IsIdenticalTo", "A2"),
                ("C", "IsVersionOf", "B"),
            ],
        );
        let metrics = BrokerMetrics::from_store(&tables).expect("metrics");
        assert_eq!(metrics.identifiers, 4);
        assert_eq!(metrics.identity_groups, 3);
        assert_eq!(metrics.version_groups, 2);
        assert_eq!(metrics.relationships, 3);
        assert_eq!(metrics.active_relationships, 3);
        // A→B Cites and B→C HasVersion at Identity level; only Cites rolls up.
        assert_eq!(metrics.identity_edges, 2);
        assert_eq!(metrics.version_edges, 1);
        assert_eq!(metrics.aliases_per_thousand, 1333);
        assert!(verify_integrity(&tables).expect("verify").is_empty());
    }

    #[test]
    fn retraction_lowers_active_count() {
        let mut tables = Tables::new();
        ingest(&mut tables, EventType::RelationshipCreated, &[("A", "Cites", "B")]);
        ingest(&mut tables, EventType::RelationshipDeleted, &[("A", "Cites", "B")]);
        let metrics = BrokerMetrics::from_store(&tables).expect("metrics");
        assert_eq!(metrics.relationships, 1);
        assert_eq!(metrics.active_relationships, 0);
        assert_eq!(metrics.retractions, 1);
        assert!(verify_integrity(&tables).expect("verify").is_empty());
    }

    #[test]
    fn detects_unlinked_relationship() {
        let mut tables = Tables::new();
        ingest(&mut tables, EventType::RelationshipCreated, &[("A", "Cites", "B")]);
        let relationship = tables.relationships().expect("scan")[0].id;
        let edge = tables
            .group_relationship_of(relationship)
            .expect("lookup")
            .expect("linked");
        tables.unlink_relationship(relationship).expect("unlink");

        let violations = verify_integrity(&tables).expect("verify");
        assert_eq!(
            violations,
            vec![
                Violation::UnsupportedEdge(edge),
                Violation::UnlinkedRelationship(relationship),
            ]
        );
    }
}
