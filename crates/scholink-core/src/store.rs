//! # Store Abstraction
//!
//! The persistence contract of the grouping core, and its in-memory backend.
//!
//! The core needs only exact-match lookups by (compound) key, inserts,
//! foreign-key updates, deletes and counts. [`StoreRead`] carries the lookups
//! and is all the query engine ever sees; [`StoreWrite`] adds mutation and is
//! only reachable through a transaction.
//!
//! All tables are ordered maps for deterministic iteration. The in-memory
//! tables are persistent (`im::OrdMap`), so a write transaction starts from a
//! structurally shared copy of the last commit instead of a deep clone.

use crate::export::CanonicalGraph;
use crate::primitives::FIRST_ID;
use crate::{
    Claim, ClaimId, EventRecord, Group, GroupId, GroupRelationship, GroupRelationshipId,
    GroupType, Identifier, IdentifierId, Relation, Relationship, RelationshipId, Retraction,
    ScholinkError,
};
use chrono::{DateTime, Utc};
use im::{OrdMap, OrdSet};
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use uuid::Uuid;

// =============================================================================
// CONTRACT
// =============================================================================

/// Tables that can be counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Table {
    Identifiers,
    Groups,
    /// Identifier → Identity Group links.
    IdentifierLinks,
    /// Identity Group → Version Group links.
    SubgroupLinks,
    Relationships,
    Claims,
    Retractions,
    Events,
    GroupRelationships,
    /// Relationship → Identity-level GroupRelationship provenance links.
    RelationshipLinks,
    /// Identity-level → Version-level GroupRelationship provenance links.
    RollupLinks,
}

/// Next value of every id sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequences {
    pub identifier: u64,
    pub group: u64,
    pub relationship: u64,
    pub group_relationship: u64,
    pub claim: u64,
}

impl Default for Sequences {
    fn default() -> Self {
        Self {
            identifier: FIRST_ID,
            group: FIRST_ID,
            relationship: FIRST_ID,
            group_relationship: FIRST_ID,
            claim: FIRST_ID,
        }
    }
}

/// Read side of the store.
///
/// Every list is returned in ascending key order.
pub trait StoreRead {
    fn identifier(&self, id: IdentifierId) -> Result<Option<Identifier>, ScholinkError>;

    /// Exact match on the unique `(value, scheme)` key.
    fn find_identifier(&self, value: &str, scheme: &str)
    -> Result<Option<Identifier>, ScholinkError>;

    /// The Identity Group an identifier belongs to.
    fn identity_group_of(&self, identifier: IdentifierId)
    -> Result<Option<GroupId>, ScholinkError>;

    /// Identifiers of an Identity Group.
    fn members_of(&self, group: GroupId) -> Result<Vec<IdentifierId>, ScholinkError>;

    fn group(&self, id: GroupId) -> Result<Option<Group>, ScholinkError>;

    /// The Version Group an Identity Group belongs to.
    fn version_group_of(&self, group: GroupId) -> Result<Option<GroupId>, ScholinkError>;

    /// Identity Groups of a Version Group.
    fn subgroups_of(&self, group: GroupId) -> Result<Vec<GroupId>, ScholinkError>;

    fn relationship(&self, id: RelationshipId) -> Result<Option<Relationship>, ScholinkError>;

    /// Exact match on the unique `(source, relation, target)` key.
    fn find_relationship(
        &self,
        source: IdentifierId,
        relation: Relation,
        target: IdentifierId,
    ) -> Result<Option<Relationship>, ScholinkError>;

    fn relationships_from(
        &self,
        source: IdentifierId,
        relation: Relation,
    ) -> Result<Vec<Relationship>, ScholinkError>;

    fn relationships_to(
        &self,
        target: IdentifierId,
        relation: Relation,
    ) -> Result<Vec<Relationship>, ScholinkError>;

    /// Claims of a relationship, oldest first.
    fn claims_of(&self, relationship: RelationshipId) -> Result<Vec<Claim>, ScholinkError>;

    fn retraction_of(&self, claim: ClaimId) -> Result<Option<Retraction>, ScholinkError>;

    fn event(&self, id: Uuid) -> Result<Option<EventRecord>, ScholinkError>;

    fn group_relationship(
        &self,
        id: GroupRelationshipId,
    ) -> Result<Option<GroupRelationship>, ScholinkError>;

    /// Exact match on the unique `(source, target, relation, type)` key.
    fn find_group_relationship(
        &self,
        source: GroupId,
        target: GroupId,
        relation: Relation,
        kind: GroupType,
    ) -> Result<Option<GroupRelationship>, ScholinkError>;

    fn group_relationships_from(
        &self,
        group: GroupId,
    ) -> Result<Vec<GroupRelationship>, ScholinkError>;

    fn group_relationships_to(
        &self,
        group: GroupId,
    ) -> Result<Vec<GroupRelationship>, ScholinkError>;

    /// The Identity-level edge a relationship is folded into.
    fn group_relationship_of(
        &self,
        relationship: RelationshipId,
    ) -> Result<Option<GroupRelationshipId>, ScholinkError>;

    /// Relationships folded into an Identity-level edge.
    fn supporting_relationships(
        &self,
        group_relationship: GroupRelationshipId,
    ) -> Result<Vec<RelationshipId>, ScholinkError>;

    /// The Version-level edge an Identity-level edge rolls up into.
    fn rollup_of(
        &self,
        group_relationship: GroupRelationshipId,
    ) -> Result<Option<GroupRelationshipId>, ScholinkError>;

    /// Identity-level edges rolled up into a Version-level edge.
    fn rolled_up(
        &self,
        group_relationship: GroupRelationshipId,
    ) -> Result<Vec<GroupRelationshipId>, ScholinkError>;

    fn count(&self, table: Table) -> Result<usize, ScholinkError>;

    fn count_groups(&self, kind: GroupType) -> Result<usize, ScholinkError>;

    // -------------------------------------------------------------------------
    // Ordered scans (export, metrics, invariant checks)
    // -------------------------------------------------------------------------

    fn identifiers(&self) -> Result<Vec<Identifier>, ScholinkError>;
    fn groups(&self) -> Result<Vec<Group>, ScholinkError>;
    fn identifier_links(&self) -> Result<Vec<(IdentifierId, GroupId)>, ScholinkError>;
    fn subgroup_links(&self) -> Result<Vec<(GroupId, GroupId)>, ScholinkError>;
    fn relationships(&self) -> Result<Vec<Relationship>, ScholinkError>;
    fn claims(&self) -> Result<Vec<Claim>, ScholinkError>;
    fn retractions(&self) -> Result<Vec<Retraction>, ScholinkError>;
    fn events(&self) -> Result<Vec<EventRecord>, ScholinkError>;
    fn group_relationships(&self) -> Result<Vec<GroupRelationship>, ScholinkError>;
    fn relationship_links(
        &self,
    ) -> Result<Vec<(RelationshipId, GroupRelationshipId)>, ScholinkError>;
    fn rollup_links(
        &self,
    ) -> Result<Vec<(GroupRelationshipId, GroupRelationshipId)>, ScholinkError>;
    fn sequences(&self) -> Result<Sequences, ScholinkError>;

    // -------------------------------------------------------------------------
    // Derived
    // -------------------------------------------------------------------------

    /// Claims of a relationship that have not been retracted, oldest first.
    fn live_claims(&self, relationship: RelationshipId) -> Result<Vec<Claim>, ScholinkError> {
        let mut live = Vec::new();
        for claim in self.claims_of(relationship)? {
            if self.retraction_of(claim.id)?.is_none() {
                live.push(claim);
            }
        }
        Ok(live)
    }

    /// A relationship is active while at least one of its claims stands.
    fn is_active(&self, relationship: RelationshipId) -> Result<bool, ScholinkError> {
        Ok(!self.live_claims(relationship)?.is_empty())
    }
}

/// Write side of the store. Only reachable inside a transaction; dropping the
/// transaction without committing discards every write.
pub trait StoreWrite: StoreRead {
    fn insert_identifier(&mut self, value: &str, scheme: &str)
    -> Result<Identifier, ScholinkError>;

    fn insert_group(&mut self, kind: GroupType) -> Result<Group, ScholinkError>;

    fn delete_group(&mut self, id: GroupId) -> Result<(), ScholinkError>;

    /// Insert or re-point the identifier's Identity Group link.
    fn link_identifier(
        &mut self,
        identifier: IdentifierId,
        group: GroupId,
    ) -> Result<(), ScholinkError>;

    /// Insert or re-point the Identity Group's Version Group link.
    fn link_subgroup(&mut self, subgroup: GroupId, group: GroupId) -> Result<(), ScholinkError>;

    fn unlink_subgroup(&mut self, subgroup: GroupId) -> Result<(), ScholinkError>;

    fn insert_relationship(
        &mut self,
        source: IdentifierId,
        relation: Relation,
        target: IdentifierId,
    ) -> Result<Relationship, ScholinkError>;

    fn insert_claim(
        &mut self,
        relationship: RelationshipId,
        event: Uuid,
        creator: &str,
        time: DateTime<Utc>,
    ) -> Result<Claim, ScholinkError>;

    fn insert_retraction(&mut self, retraction: Retraction) -> Result<(), ScholinkError>;

    fn insert_event(&mut self, record: EventRecord) -> Result<(), ScholinkError>;

    fn insert_group_relationship(
        &mut self,
        source: GroupId,
        target: GroupId,
        relation: Relation,
        kind: GroupType,
    ) -> Result<GroupRelationship, ScholinkError>;

    /// Foreign-key update of both endpoints of an edge.
    fn repoint_group_relationship(
        &mut self,
        id: GroupRelationshipId,
        source: GroupId,
        target: GroupId,
    ) -> Result<GroupRelationship, ScholinkError>;

    fn delete_group_relationship(&mut self, id: GroupRelationshipId) -> Result<(), ScholinkError>;

    /// Insert or re-point a relationship's provenance link.
    fn link_relationship(
        &mut self,
        relationship: RelationshipId,
        group_relationship: GroupRelationshipId,
    ) -> Result<(), ScholinkError>;

    fn unlink_relationship(&mut self, relationship: RelationshipId) -> Result<(), ScholinkError>;

    /// Insert or re-point an Identity-level edge's rollup link.
    fn link_rollup(
        &mut self,
        group_relationship: GroupRelationshipId,
        rollup: GroupRelationshipId,
    ) -> Result<(), ScholinkError>;

    fn unlink_rollup(&mut self, group_relationship: GroupRelationshipId)
    -> Result<(), ScholinkError>;
}

// =============================================================================
// IN-MEMORY TABLES
// =============================================================================

type GroupRelationshipKey = (GroupId, GroupId, Relation, GroupType);

/// The in-memory table set. Implements both halves of the contract directly;
/// [`MemoryStore`] wraps it with transactions.
#[derive(Debug, Clone, Default)]
pub struct Tables {
    identifiers: OrdMap<IdentifierId, Identifier>,
    /// (scheme, value) -> identifier
    identifier_keys: OrdMap<(String, String), IdentifierId>,
    groups: OrdMap<GroupId, Group>,
    identifier_groups: OrdMap<IdentifierId, GroupId>,
    group_members: OrdMap<GroupId, OrdSet<IdentifierId>>,
    subgroup_groups: OrdMap<GroupId, GroupId>,
    group_subgroups: OrdMap<GroupId, OrdSet<GroupId>>,
    relationships: OrdMap<RelationshipId, Relationship>,
    relationship_keys: OrdMap<(IdentifierId, Relation, IdentifierId), RelationshipId>,
    relationships_by_source: OrdMap<(IdentifierId, Relation), OrdSet<RelationshipId>>,
    relationships_by_target: OrdMap<(IdentifierId, Relation), OrdSet<RelationshipId>>,
    claims: OrdMap<ClaimId, Claim>,
    relationship_claims: OrdMap<RelationshipId, OrdSet<ClaimId>>,
    retractions: OrdMap<ClaimId, Retraction>,
    events: OrdMap<Uuid, EventRecord>,
    group_relationships: OrdMap<GroupRelationshipId, GroupRelationship>,
    group_relationship_keys: OrdMap<GroupRelationshipKey, GroupRelationshipId>,
    group_relationships_by_source: OrdMap<GroupId, OrdSet<GroupRelationshipId>>,
    group_relationships_by_target: OrdMap<GroupId, OrdSet<GroupRelationshipId>>,
    relationship_links: OrdMap<RelationshipId, GroupRelationshipId>,
    group_relationship_support: OrdMap<GroupRelationshipId, OrdSet<RelationshipId>>,
    rollups: OrdMap<GroupRelationshipId, GroupRelationshipId>,
    rollup_children: OrdMap<GroupRelationshipId, OrdSet<GroupRelationshipId>>,
    sequences: Sequences,
}

fn attach<K: Ord + Clone, V: Ord + Clone>(
    index: &mut OrdMap<K, OrdSet<V>>,
    key: K,
    value: V,
) {
    let mut set = index.get(&key).cloned().unwrap_or_default();
    set.insert(value);
    index.insert(key, set);
}

fn detach<K: Ord + Clone, V: Ord + Clone>(
    index: &mut OrdMap<K, OrdSet<V>>,
    key: &K,
    value: &V,
) {
    if let Some(set) = index.get_mut(key) {
        set.remove(value);
        if set.is_empty() {
            index.remove(key);
        }
    }
}

fn listed<K: Ord + Clone, V: Ord + Copy>(index: &OrdMap<K, OrdSet<V>>, key: &K) -> Vec<V> {
    index
        .get(key)
        .map(|set| set.iter().copied().collect())
        .unwrap_or_default()
}

fn next(counter: &mut u64) -> u64 {
    let id = *counter;
    *counter = counter.saturating_add(1);
    id
}

impl Tables {
    /// Create an empty table set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a table set from a canonical export, preserving every id and
    /// sequence.
    pub fn from_canonical(canonical: &CanonicalGraph) -> Result<Self, ScholinkError> {
        let mut tables = Self::new();

        for identifier in &canonical.identifiers {
            tables.identifier_keys.insert(
                (identifier.scheme.clone(), identifier.value.clone()),
                identifier.id,
            );
            tables.identifiers.insert(identifier.id, identifier.clone());
        }
        for group in &canonical.groups {
            tables.groups.insert(group.id, *group);
        }
        for &(identifier, group) in &canonical.identifier_links {
            tables.link_identifier(identifier, group)?;
        }
        for &(subgroup, group) in &canonical.subgroup_links {
            tables.link_subgroup(subgroup, group)?;
        }
        for relationship in &canonical.relationships {
            tables.index_relationship(*relationship);
        }
        for claim in &canonical.claims {
            attach(&mut tables.relationship_claims, claim.relationship, claim.id);
            tables.claims.insert(claim.id, claim.clone());
        }
        for retraction in &canonical.retractions {
            tables.retractions.insert(retraction.claim, retraction.clone());
        }
        for event in &canonical.events {
            tables.events.insert(event.id, event.clone());
        }
        for edge in &canonical.group_relationships {
            tables.index_group_relationship(*edge);
        }
        for &(relationship, edge) in &canonical.relationship_links {
            tables.link_relationship(relationship, edge)?;
        }
        for &(edge, rollup) in &canonical.rollup_links {
            tables.link_rollup(edge, rollup)?;
        }
        tables.sequences = canonical.sequences;

        Ok(tables)
    }

    fn index_relationship(&mut self, relationship: Relationship) {
        let Relationship {
            id,
            source,
            relation,
            target,
        } = relationship;
        self.relationship_keys.insert((source, relation, target), id);
        attach(&mut self.relationships_by_source, (source, relation), id);
        attach(&mut self.relationships_by_target, (target, relation), id);
        self.relationships.insert(id, relationship);
    }

    fn index_group_relationship(&mut self, edge: GroupRelationship) {
        self.group_relationship_keys
            .insert((edge.source, edge.target, edge.relation, edge.kind), edge.id);
        attach(&mut self.group_relationships_by_source, edge.source, edge.id);
        attach(&mut self.group_relationships_by_target, edge.target, edge.id);
        self.group_relationships.insert(edge.id, edge);
    }

    fn unindex_group_relationship(&mut self, edge: &GroupRelationship) {
        self.group_relationship_keys
            .remove(&(edge.source, edge.target, edge.relation, edge.kind));
        detach(&mut self.group_relationships_by_source, &edge.source, &edge.id);
        detach(&mut self.group_relationships_by_target, &edge.target, &edge.id);
        self.group_relationships.remove(&edge.id);
    }

    fn require_group(&self, id: GroupId) -> Result<(), ScholinkError> {
        if self.groups.contains_key(&id) {
            Ok(())
        } else {
            Err(ScholinkError::GroupNotFound(id))
        }
    }

    fn require_group_relationship(
        &self,
        id: GroupRelationshipId,
    ) -> Result<GroupRelationship, ScholinkError> {
        self.group_relationships
            .get(&id)
            .copied()
            .ok_or(ScholinkError::GroupRelationshipNotFound(id))
    }

    fn edges(&self, ids: Vec<GroupRelationshipId>) -> Vec<GroupRelationship> {
        ids.iter()
            .filter_map(|id| self.group_relationships.get(id).copied())
            .collect()
    }

    fn relationships_in(&self, ids: Vec<RelationshipId>) -> Vec<Relationship> {
        ids.iter()
            .filter_map(|id| self.relationships.get(id).copied())
            .collect()
    }
}

impl StoreRead for Tables {
    fn identifier(&self, id: IdentifierId) -> Result<Option<Identifier>, ScholinkError> {
        Ok(self.identifiers.get(&id).cloned())
    }

    fn find_identifier(
        &self,
        value: &str,
        scheme: &str,
    ) -> Result<Option<Identifier>, ScholinkError> {
        Ok(self
            .identifier_keys
            .get(&(scheme.to_string(), value.to_string()))
            .and_then(|id| self.identifiers.get(id))
            .cloned())
    }

    fn identity_group_of(
        &self,
        identifier: IdentifierId,
    ) -> Result<Option<GroupId>, ScholinkError> {
        Ok(self.identifier_groups.get(&identifier).copied())
    }

    fn members_of(&self, group: GroupId) -> Result<Vec<IdentifierId>, ScholinkError> {
        Ok(listed(&self.group_members, &group))
    }

    fn group(&self, id: GroupId) -> Result<Option<Group>, ScholinkError> {
        Ok(self.groups.get(&id).copied())
    }

    fn version_group_of(&self, group: GroupId) -> Result<Option<GroupId>, ScholinkError> {
        Ok(self.subgroup_groups.get(&group).copied())
    }

    fn subgroups_of(&self, group: GroupId) -> Result<Vec<GroupId>, ScholinkError> {
        Ok(listed(&self.group_subgroups, &group))
    }

    fn relationship(&self, id: RelationshipId) -> Result<Option<Relationship>, ScholinkError> {
        Ok(self.relationships.get(&id).copied())
    }

    fn find_relationship(
        &self,
        source: IdentifierId,
        relation: Relation,
        target: IdentifierId,
    ) -> Result<Option<Relationship>, ScholinkError> {
        Ok(self
            .relationship_keys
            .get(&(source, relation, target))
            .and_then(|id| self.relationships.get(id))
            .copied())
    }

    fn relationships_from(
        &self,
        source: IdentifierId,
        relation: Relation,
    ) -> Result<Vec<Relationship>, ScholinkError> {
        Ok(self.relationships_in(listed(&self.relationships_by_source, &(source, relation))))
    }

    fn relationships_to(
        &self,
        target: IdentifierId,
        relation: Relation,
    ) -> Result<Vec<Relationship>, ScholinkError> {
        Ok(self.relationships_in(listed(&self.relationships_by_target, &(target, relation))))
    }

    fn claims_of(&self, relationship: RelationshipId) -> Result<Vec<Claim>, ScholinkError> {
        Ok(listed(&self.relationship_claims, &relationship)
            .iter()
            .filter_map(|id| self.claims.get(id).cloned())
            .collect())
    }

    fn retraction_of(&self, claim: ClaimId) -> Result<Option<Retraction>, ScholinkError> {
        Ok(self.retractions.get(&claim).cloned())
    }

    fn event(&self, id: Uuid) -> Result<Option<EventRecord>, ScholinkError> {
        Ok(self.events.get(&id).cloned())
    }

    fn group_relationship(
        &self,
        id: GroupRelationshipId,
    ) -> Result<Option<GroupRelationship>, ScholinkError> {
        Ok(self.group_relationships.get(&id).copied())
    }

    fn find_group_relationship(
        &self,
        source: GroupId,
        target: GroupId,
        relation: Relation,
        kind: GroupType,
    ) -> Result<Option<GroupRelationship>, ScholinkError> {
        Ok(self
            .group_relationship_keys
            .get(&(source, target, relation, kind))
            .and_then(|id| self.group_relationships.get(id))
            .copied())
    }

    fn group_relationships_from(
        &self,
        group: GroupId,
    ) -> Result<Vec<GroupRelationship>, ScholinkError> {
        Ok(self.edges(listed(&self.group_relationships_by_source, &group)))
    }

    fn group_relationships_to(
        &self,
        group: GroupId,
    ) -> Result<Vec<GroupRelationship>, ScholinkError> {
        Ok(self.edges(listed(&self.group_relationships_by_target, &group)))
    }

    fn group_relationship_of(
        &self,
        relationship: RelationshipId,
    ) -> Result<Option<GroupRelationshipId>, ScholinkError> {
        Ok(self.relationship_links.get(&relationship).copied())
    }

    fn supporting_relationships(
        &self,
        group_relationship: GroupRelationshipId,
    ) -> Result<Vec<RelationshipId>, ScholinkError> {
        Ok(listed(&self.group_relationship_support, &group_relationship))
    }

    fn rollup_of(
        &self,
        group_relationship: GroupRelationshipId,
    ) -> Result<Option<GroupRelationshipId>, ScholinkError> {
        Ok(self.rollups.get(&group_relationship).copied())
    }

    fn rolled_up(
        &self,
        group_relationship: GroupRelationshipId,
    ) -> Result<Vec<GroupRelationshipId>, ScholinkError> {
        Ok(listed(&self.rollup_children, &group_relationship))
    }

    fn count(&self, table: Table) -> Result<usize, ScholinkError> {
        Ok(match table {
            Table::Identifiers => self.identifiers.len(),
            Table::Groups => self.groups.len(),
            Table::IdentifierLinks => self.identifier_groups.len(),
            Table::SubgroupLinks => self.subgroup_groups.len(),
            Table::Relationships => self.relationships.len(),
            Table::Claims => self.claims.len(),
            Table::Retractions => self.retractions.len(),
            Table::Events => self.events.len(),
            Table::GroupRelationships => self.group_relationships.len(),
            Table::RelationshipLinks => self.relationship_links.len(),
            Table::RollupLinks => self.rollups.len(),
        })
    }

    fn count_groups(&self, kind: GroupType) -> Result<usize, ScholinkError> {
        Ok(self.groups.values().filter(|g| g.kind == kind).count())
    }

    fn identifiers(&self) -> Result<Vec<Identifier>, ScholinkError> {
        Ok(self.identifiers.values().cloned().collect())
    }

    fn groups(&self) -> Result<Vec<Group>, ScholinkError> {
        Ok(self.groups.values().copied().collect())
    }

    fn identifier_links(&self) -> Result<Vec<(IdentifierId, GroupId)>, ScholinkError> {
        Ok(self.identifier_groups.iter().map(|(k, v)| (*k, *v)).collect())
    }

    fn subgroup_links(&self) -> Result<Vec<(GroupId, GroupId)>, ScholinkError> {
        Ok(self.subgroup_groups.iter().map(|(k, v)| (*k, *v)).collect())
    }

    fn relationships(&self) -> Result<Vec<Relationship>, ScholinkError> {
        Ok(self.relationships.values().copied().collect())
    }

    fn claims(&self) -> Result<Vec<Claim>, ScholinkError> {
        Ok(self.claims.values().cloned().collect())
    }

    fn retractions(&self) -> Result<Vec<Retraction>, ScholinkError> {
        Ok(self.retractions.values().cloned().collect())
    }

    fn events(&self) -> Result<Vec<EventRecord>, ScholinkError> {
        Ok(self.events.values().cloned().collect())
    }

    fn group_relationships(&self) -> Result<Vec<GroupRelationship>, ScholinkError> {
        Ok(self.group_relationships.values().copied().collect())
    }

    fn relationship_links(
        &self,
    ) -> Result<Vec<(RelationshipId, GroupRelationshipId)>, ScholinkError> {
        Ok(self.relationship_links.iter().map(|(k, v)| (*k, *v)).collect())
    }

    fn rollup_links(
        &self,
    ) -> Result<Vec<(GroupRelationshipId, GroupRelationshipId)>, ScholinkError> {
        Ok(self.rollups.iter().map(|(k, v)| (*k, *v)).collect())
    }

    fn sequences(&self) -> Result<Sequences, ScholinkError> {
        Ok(self.sequences)
    }
}

impl StoreWrite for Tables {
    fn insert_identifier(
        &mut self,
        value: &str,
        scheme: &str,
    ) -> Result<Identifier, ScholinkError> {
        let key = (scheme.to_string(), value.to_string());
        if let Some(existing) = self.identifier_keys.get(&key) {
            return Err(ScholinkError::Storage(format!(
                "identifier {scheme}:{value} already exists as {existing:?}"
            )));
        }
        let identifier = Identifier {
            id: IdentifierId(next(&mut self.sequences.identifier)),
            value: value.to_string(),
            scheme: scheme.to_string(),
        };
        self.identifier_keys.insert(key, identifier.id);
        self.identifiers.insert(identifier.id, identifier.clone());
        Ok(identifier)
    }

    fn insert_group(&mut self, kind: GroupType) -> Result<Group, ScholinkError> {
        let group = Group {
            id: GroupId(next(&mut self.sequences.group)),
            kind,
        };
        self.groups.insert(group.id, group);
        Ok(group)
    }

    fn delete_group(&mut self, id: GroupId) -> Result<(), ScholinkError> {
        self.groups
            .remove(&id)
            .map(|_| ())
            .ok_or(ScholinkError::GroupNotFound(id))
    }

    fn link_identifier(
        &mut self,
        identifier: IdentifierId,
        group: GroupId,
    ) -> Result<(), ScholinkError> {
        self.require_group(group)?;
        if let Some(previous) = self.identifier_groups.insert(identifier, group) {
            detach(&mut self.group_members, &previous, &identifier);
        }
        attach(&mut self.group_members, group, identifier);
        Ok(())
    }

    fn link_subgroup(&mut self, subgroup: GroupId, group: GroupId) -> Result<(), ScholinkError> {
        self.require_group(group)?;
        if let Some(previous) = self.subgroup_groups.insert(subgroup, group) {
            detach(&mut self.group_subgroups, &previous, &subgroup);
        }
        attach(&mut self.group_subgroups, group, subgroup);
        Ok(())
    }

    fn unlink_subgroup(&mut self, subgroup: GroupId) -> Result<(), ScholinkError> {
        if let Some(previous) = self.subgroup_groups.remove(&subgroup) {
            detach(&mut self.group_subgroups, &previous, &subgroup);
        }
        Ok(())
    }

    fn insert_relationship(
        &mut self,
        source: IdentifierId,
        relation: Relation,
        target: IdentifierId,
    ) -> Result<Relationship, ScholinkError> {
        if self
            .relationship_keys
            .contains_key(&(source, relation, target))
        {
            return Err(ScholinkError::Storage(format!(
                "relationship {source:?} {relation} {target:?} already exists"
            )));
        }
        let relationship = Relationship {
            id: RelationshipId(next(&mut self.sequences.relationship)),
            source,
            relation,
            target,
        };
        self.index_relationship(relationship);
        Ok(relationship)
    }

    fn insert_claim(
        &mut self,
        relationship: RelationshipId,
        event: Uuid,
        creator: &str,
        time: DateTime<Utc>,
    ) -> Result<Claim, ScholinkError> {
        let claim = Claim {
            id: ClaimId(next(&mut self.sequences.claim)),
            relationship,
            event,
            creator: creator.to_string(),
            time,
        };
        attach(&mut self.relationship_claims, relationship, claim.id);
        self.claims.insert(claim.id, claim.clone());
        Ok(claim)
    }

    fn insert_retraction(&mut self, retraction: Retraction) -> Result<(), ScholinkError> {
        self.retractions.insert(retraction.claim, retraction);
        Ok(())
    }

    fn insert_event(&mut self, record: EventRecord) -> Result<(), ScholinkError> {
        self.events.insert(record.id, record);
        Ok(())
    }

    fn insert_group_relationship(
        &mut self,
        source: GroupId,
        target: GroupId,
        relation: Relation,
        kind: GroupType,
    ) -> Result<GroupRelationship, ScholinkError> {
        if self
            .group_relationship_keys
            .contains_key(&(source, target, relation, kind))
        {
            return Err(ScholinkError::Storage(format!(
                "group relationship {source:?} {relation} {target:?} ({kind}) already exists"
            )));
        }
        let edge = GroupRelationship {
            id: GroupRelationshipId(next(&mut self.sequences.group_relationship)),
            source,
            target,
            relation,
            kind,
        };
        self.index_group_relationship(edge);
        Ok(edge)
    }

    fn repoint_group_relationship(
        &mut self,
        id: GroupRelationshipId,
        source: GroupId,
        target: GroupId,
    ) -> Result<GroupRelationship, ScholinkError> {
        let edge = self.require_group_relationship(id)?;
        if let Some(&other) =
            self.group_relationship_keys
                .get(&(source, target, edge.relation, edge.kind))
        {
            if other != id {
                return Err(ScholinkError::Storage(format!(
                    "re-pointing {id:?} would duplicate {other:?}"
                )));
            }
        }
        self.unindex_group_relationship(&edge);
        let moved = GroupRelationship {
            source,
            target,
            ..edge
        };
        self.index_group_relationship(moved);
        Ok(moved)
    }

    fn delete_group_relationship(&mut self, id: GroupRelationshipId) -> Result<(), ScholinkError> {
        let edge = self.require_group_relationship(id)?;
        self.unindex_group_relationship(&edge);
        Ok(())
    }

    fn link_relationship(
        &mut self,
        relationship: RelationshipId,
        group_relationship: GroupRelationshipId,
    ) -> Result<(), ScholinkError> {
        self.require_group_relationship(group_relationship)?;
        if let Some(previous) = self
            .relationship_links
            .insert(relationship, group_relationship)
        {
            detach(&mut self.group_relationship_support, &previous, &relationship);
        }
        attach(
            &mut self.group_relationship_support,
            group_relationship,
            relationship,
        );
        Ok(())
    }

    fn unlink_relationship(&mut self, relationship: RelationshipId) -> Result<(), ScholinkError> {
        if let Some(previous) = self.relationship_links.remove(&relationship) {
            detach(&mut self.group_relationship_support, &previous, &relationship);
        }
        Ok(())
    }

    fn link_rollup(
        &mut self,
        group_relationship: GroupRelationshipId,
        rollup: GroupRelationshipId,
    ) -> Result<(), ScholinkError> {
        self.require_group_relationship(rollup)?;
        if let Some(previous) = self.rollups.insert(group_relationship, rollup) {
            detach(&mut self.rollup_children, &previous, &group_relationship);
        }
        attach(&mut self.rollup_children, rollup, group_relationship);
        Ok(())
    }

    fn unlink_rollup(
        &mut self,
        group_relationship: GroupRelationshipId,
    ) -> Result<(), ScholinkError> {
        if let Some(previous) = self.rollups.remove(&group_relationship) {
            detach(&mut self.rollup_children, &previous, &group_relationship);
        }
        Ok(())
    }
}

// =============================================================================
// IN-MEMORY STORE
// =============================================================================

/// In-memory store with snapshot isolation.
///
/// Readers clone an `Arc` of the current table set and never block writers.
/// A writer holds the writer mutex, mutates a private copy, and publishes it
/// on commit; dropping the transaction discards the copy. The copy shares
/// every untouched node with the published tables, so an event costs the
/// same on a large store as on an empty one.
#[derive(Debug, Default)]
pub struct MemoryStore {
    current: RwLock<Arc<Tables>>,
    writer: Mutex<()>,
}

/// A write transaction over a [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryTxn<'a> {
    store: &'a MemoryStore,
    _writer: MutexGuard<'a, ()>,
    tables: Tables,
}

fn poisoned<E: std::fmt::Display>(e: E) -> ScholinkError {
    ScholinkError::Storage(format!("memory store lock poisoned: {e}"))
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing table set.
    #[must_use]
    pub fn with_tables(tables: Tables) -> Self {
        Self {
            current: RwLock::new(Arc::new(tables)),
            writer: Mutex::new(()),
        }
    }

    /// A consistent read-only view of the last committed state.
    pub fn snapshot(&self) -> Result<Arc<Tables>, ScholinkError> {
        Ok(Arc::clone(&*self.current.read().map_err(poisoned)?))
    }

    /// Begin the single write transaction. Blocks while another is open.
    pub fn begin(&self) -> Result<MemoryTxn<'_>, ScholinkError> {
        let writer = self.writer.lock().map_err(poisoned)?;
        let tables = Tables::clone(&*self.snapshot()?);
        Ok(MemoryTxn {
            store: self,
            _writer: writer,
            tables,
        })
    }
}

impl MemoryTxn<'_> {
    /// Publish every write made in this transaction.
    pub fn commit(self) -> Result<(), ScholinkError> {
        let mut current = self.store.current.write().map_err(poisoned)?;
        *current = Arc::new(self.tables);
        Ok(())
    }
}

impl Deref for MemoryTxn<'_> {
    type Target = Tables;

    fn deref(&self) -> &Tables {
        &self.tables
    }
}

impl DerefMut for MemoryTxn<'_> {
    fn deref_mut(&mut self) -> &mut Tables {
        &mut self.tables
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_lookup_by_compound_key() {
        let mut tables = Tables::new();
        let a = tables.insert_identifier("10.1/a", "doi").expect("insert");

        assert_eq!(
            tables.find_identifier("10.1/a", "doi").expect("find"),
            Some(a.clone())
        );
        assert_eq!(tables.find_identifier("10.1/a", "url").expect("find"), None);
        assert!(tables.insert_identifier("10.1/a", "doi").is_err());
    }

    #[test]
    fn relinking_moves_membership() {
        let mut tables = Tables::new();
        let a = tables.insert_identifier("A", "doi").expect("insert");
        let g1 = tables.insert_group(GroupType::Identity).expect("group");
        let g2 = tables.insert_group(GroupType::Identity).expect("group");

        tables.link_identifier(a.id, g1.id).expect("link");
        tables.link_identifier(a.id, g2.id).expect("relink");

        assert!(tables.members_of(g1.id).expect("members").is_empty());
        assert_eq!(tables.members_of(g2.id).expect("members"), vec![a.id]);
        assert_eq!(tables.count(Table::IdentifierLinks).expect("count"), 1);
    }

    #[test]
    fn repoint_refuses_to_duplicate_key() {
        let mut tables = Tables::new();
        let g1 = tables.insert_group(GroupType::Identity).expect("group");
        let g2 = tables.insert_group(GroupType::Identity).expect("group");
        let g3 = tables.insert_group(GroupType::Identity).expect("group");
        let e1 = tables
            .insert_group_relationship(g1.id, g2.id, Relation::Cites, GroupType::Identity)
            .expect("edge");
        tables
            .insert_group_relationship(g3.id, g2.id, Relation::Cites, GroupType::Identity)
            .expect("edge");

        assert!(tables.repoint_group_relationship(e1.id, g3.id, g2.id).is_err());

        let moved = tables
            .repoint_group_relationship(e1.id, g1.id, g3.id)
            .expect("repoint");
        assert_eq!(moved.target, g3.id);
        assert!(tables.group_relationships_to(g2.id).expect("to").len() == 1);
        assert_eq!(tables.group_relationships_to(g3.id).expect("to"), vec![moved]);
    }

    #[test]
    fn retraction_deactivates_relationship() {
        let mut tables = Tables::new();
        let a = tables.insert_identifier("A", "doi").expect("insert");
        let b = tables.insert_identifier("B", "doi").expect("insert");
        let rel = tables
            .insert_relationship(a.id, Relation::Cites, b.id)
            .expect("rel");
        let claim = tables
            .insert_claim(rel.id, Uuid::nil(), "acme", Utc::now())
            .expect("claim");
        assert!(tables.is_active(rel.id).expect("active"));

        tables
            .insert_retraction(Retraction {
                claim: claim.id,
                event: Uuid::nil(),
                time: Utc::now(),
            })
            .expect("retract");
        assert!(!tables.is_active(rel.id).expect("active"));
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let store = MemoryStore::new();
        {
            let mut txn = store.begin().expect("begin");
            txn.insert_identifier("A", "doi").expect("insert");
        }
        assert_eq!(
            store.snapshot().expect("snap").count(Table::Identifiers).expect("count"),
            0
        );
    }

    #[test]
    fn transaction_shares_untouched_tables() {
        let store = MemoryStore::new();
        {
            let mut txn = store.begin().expect("begin");
            for n in 0..500 {
                txn.insert_identifier(&format!("10.1/{n}"), "doi").expect("insert");
            }
            txn.commit().expect("commit");
        }
        let before = store.snapshot().expect("snap");

        let mut txn = store.begin().expect("begin");
        assert!(txn.identifiers.ptr_eq(&before.identifiers));
        txn.insert_event(EventRecord {
            id: Uuid::nil(),
            kind: crate::EventType::RelationshipCreated,
            creator: "acme".to_string(),
            source: "test".to_string(),
            time: Utc::now(),
            payload_count: 1,
        })
        .expect("event");
        txn.commit().expect("commit");

        let after = store.snapshot().expect("snap");
        assert!(after.identifiers.ptr_eq(&before.identifiers));
        assert!(after.identifier_keys.ptr_eq(&before.identifier_keys));
        assert!(!after.events.ptr_eq(&before.events));
        assert_eq!(before.count(Table::Events).expect("count"), 0);
        assert_eq!(after.count(Table::Events).expect("count"), 1);
    }

    #[test]
    fn snapshot_is_isolated_from_later_commit() {
        let store = MemoryStore::new();
        let before = store.snapshot().expect("snap");

        let mut txn = store.begin().expect("begin");
        txn.insert_identifier("A", "doi").expect("insert");
        txn.commit().expect("commit");

        assert_eq!(before.count(Table::Identifiers).expect("count"), 0);
        assert_eq!(
            store.snapshot().expect("snap").count(Table::Identifiers).expect("count"),
            1
        );
    }
}
