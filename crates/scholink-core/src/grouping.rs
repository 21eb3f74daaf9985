//! # Grouping Engine
//!
//! Identity and Version clustering over any [`StoreWrite`].
//!
//! - An identifier is born in a singleton Identity Group inside a singleton
//!   Version Group
//! - Merges keep the lower group id and re-point every structure that
//!   referenced the loser before deleting it
//! - Relationships fold into deduplicated Identity edges; Identity edges roll
//!   up into Version edges; both layers are reference counted
//!
//! An edge whose endpoints would coincide is never stored. A Relationship
//! inside one Identity Group has no Identity edge, and an Identity edge inside
//! one Version Group has no Version rollup.

use crate::event::IdentifierRef;
use crate::store::{StoreRead, StoreWrite};
use crate::{
    GroupId, GroupRelationship, GroupRelationshipId, GroupType, Identifier, IdentifierId,
    Relation, Relationship, ScholinkError,
};

/// The Identity and Version Group of one identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub identity: GroupId,
    pub version: GroupId,
}

/// Stateless grouping operations.
pub struct GroupingEngine;

impl GroupingEngine {
    // =========================================================================
    // IDENTIFIERS
    // =========================================================================

    /// Find an identifier by `(value, scheme)`, creating it together with its
    /// singleton groups on first reference.
    pub fn resolve_or_create<S: StoreWrite>(
        store: &mut S,
        reference: &IdentifierRef,
    ) -> Result<(Identifier, Placement), ScholinkError> {
        if let Some(identifier) = store.find_identifier(&reference.value, &reference.scheme)? {
            let placement = Self::placement(store, identifier.id)?;
            return Ok((identifier, placement));
        }

        let identifier = store.insert_identifier(&reference.value, &reference.scheme)?;
        let identity = store.insert_group(GroupType::Identity)?;
        let version = store.insert_group(GroupType::Version)?;
        store.link_identifier(identifier.id, identity.id)?;
        store.link_subgroup(identity.id, version.id)?;

        tracing::trace!(
            identifier = identifier.id.0,
            identity = identity.id.0,
            version = version.id.0,
            "created identifier"
        );

        Ok((
            identifier,
            Placement {
                identity: identity.id,
                version: version.id,
            },
        ))
    }

    /// Current groups of an existing identifier.
    pub fn placement<S: StoreRead + ?Sized>(
        store: &S,
        identifier: IdentifierId,
    ) -> Result<Placement, ScholinkError> {
        let identity = store.identity_group_of(identifier)?.ok_or_else(|| {
            ScholinkError::Storage(format!("identifier {identifier:?} has no identity group"))
        })?;
        let version = store.version_group_of(identity)?.ok_or_else(|| {
            ScholinkError::Storage(format!("identity group {identity:?} has no version group"))
        })?;
        Ok(Placement { identity, version })
    }

    // =========================================================================
    // EDGES
    // =========================================================================

    /// Get or create the edge with key `(source, target, relation, kind)`.
    pub fn upsert_group_edge<S: StoreWrite>(
        store: &mut S,
        source: GroupId,
        target: GroupId,
        relation: Relation,
        kind: GroupType,
    ) -> Result<GroupRelationship, ScholinkError> {
        if source == target {
            return Err(ScholinkError::MergeConflict {
                left: source,
                right: target,
                reason: format!("{relation} edge would be a self-loop"),
            });
        }
        match store.find_group_relationship(source, target, relation, kind)? {
            Some(edge) => Ok(edge),
            None => store.insert_group_relationship(source, target, relation, kind),
        }
    }

    // =========================================================================
    // MERGES
    // =========================================================================

    /// Merge two Identity Groups. Returns the survivor (the lower id).
    ///
    /// When the two groups sat in different Version Groups those are merged
    /// as well.
    pub fn merge_identity_groups<S: StoreWrite>(
        store: &mut S,
        g1: GroupId,
        g2: GroupId,
    ) -> Result<GroupId, ScholinkError> {
        if g1 == g2 {
            return Ok(g1);
        }
        Self::require_kind(store, g1, g2, GroupType::Identity)?;
        let (survivor, loser) = (g1.min(g2), g1.max(g2));

        let survivor_version = Self::require_version(store, survivor, loser)?;
        let loser_version = Self::require_version(store, loser, survivor)?;

        for identifier in store.members_of(loser)? {
            store.link_identifier(identifier, survivor)?;
        }
        Self::repoint_edges(store, loser, survivor)?;
        store.unlink_subgroup(loser)?;
        store.delete_group(loser)?;

        tracing::debug!(
            survivor = survivor.0,
            loser = loser.0,
            "merged identity groups"
        );

        if survivor_version != loser_version {
            Self::merge_version_groups(store, survivor_version, loser_version)?;
        }
        Ok(survivor)
    }

    /// Merge two Version Groups. Returns the survivor (the lower id).
    pub fn merge_version_groups<S: StoreWrite>(
        store: &mut S,
        g1: GroupId,
        g2: GroupId,
    ) -> Result<GroupId, ScholinkError> {
        if g1 == g2 {
            return Ok(g1);
        }
        Self::require_kind(store, g1, g2, GroupType::Version)?;
        let (survivor, loser) = (g1.min(g2), g1.max(g2));

        for subgroup in store.subgroups_of(loser)? {
            store.link_subgroup(subgroup, survivor)?;
        }
        Self::repoint_edges(store, loser, survivor)?;
        store.delete_group(loser)?;

        tracing::debug!(
            survivor = survivor.0,
            loser = loser.0,
            "merged version groups"
        );
        Ok(survivor)
    }

    fn require_kind<S: StoreWrite>(
        store: &S,
        g1: GroupId,
        g2: GroupId,
        kind: GroupType,
    ) -> Result<(), ScholinkError> {
        for (id, other) in [(g1, g2), (g2, g1)] {
            match store.group(id)? {
                None => {
                    return Err(ScholinkError::MergeConflict {
                        left: id,
                        right: other,
                        reason: "group no longer exists".to_string(),
                    });
                }
                Some(group) if group.kind != kind => {
                    return Err(ScholinkError::MergeConflict {
                        left: id,
                        right: other,
                        reason: format!("expected a {kind} group, found {}", group.kind),
                    });
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    fn require_version<S: StoreWrite>(
        store: &S,
        group: GroupId,
        other: GroupId,
    ) -> Result<GroupId, ScholinkError> {
        store
            .version_group_of(group)?
            .ok_or_else(|| ScholinkError::MergeConflict {
                left: group,
                right: other,
                reason: "identity group has no version group".to_string(),
            })
    }

    /// Move every edge incident to `loser` onto `survivor`.
    fn repoint_edges<S: StoreWrite>(
        store: &mut S,
        loser: GroupId,
        survivor: GroupId,
    ) -> Result<(), ScholinkError> {
        let mut edges = store.group_relationships_from(loser)?;
        edges.extend(store.group_relationships_to(loser)?);
        edges.sort();
        edges.dedup();

        for edge in edges {
            let source = if edge.source == loser {
                survivor
            } else {
                edge.source
            };
            let target = if edge.target == loser {
                survivor
            } else {
                edge.target
            };

            if source == target {
                Self::drop_edge(store, &edge)?;
                continue;
            }
            match store.find_group_relationship(source, target, edge.relation, edge.kind)? {
                Some(existing) => Self::absorb_edge(store, &edge, existing.id)?,
                None => {
                    store.repoint_group_relationship(edge.id, source, target)?;
                }
            }
        }
        Ok(())
    }

    /// Delete an edge that collapsed into a self-loop. Its provenance is
    /// detached, not moved.
    fn drop_edge<S: StoreWrite>(
        store: &mut S,
        edge: &GroupRelationship,
    ) -> Result<(), ScholinkError> {
        match edge.kind {
            GroupType::Identity => {
                for relationship in store.supporting_relationships(edge.id)? {
                    store.unlink_relationship(relationship)?;
                }
                Self::detach_rollup(store, edge.id)?;
            }
            GroupType::Version => {
                for child in store.rolled_up(edge.id)? {
                    store.unlink_rollup(child)?;
                }
            }
        }
        store.delete_group_relationship(edge.id)?;
        tracing::debug!(edge = edge.id.0, relation = %edge.relation, kind = %edge.kind, "dropped self-loop");
        Ok(())
    }

    /// Union an edge's provenance into the survivor edge of the same key and
    /// delete it.
    fn absorb_edge<S: StoreWrite>(
        store: &mut S,
        edge: &GroupRelationship,
        into: GroupRelationshipId,
    ) -> Result<(), ScholinkError> {
        match edge.kind {
            GroupType::Identity => {
                for relationship in store.supporting_relationships(edge.id)? {
                    store.link_relationship(relationship, into)?;
                }
                Self::detach_rollup(store, edge.id)?;
            }
            GroupType::Version => {
                for child in store.rolled_up(edge.id)? {
                    store.link_rollup(child, into)?;
                }
            }
        }
        store.delete_group_relationship(edge.id)
    }

    /// Remove an Identity edge's rollup link, deleting the Version edge when
    /// that was its last child.
    fn detach_rollup<S: StoreWrite>(
        store: &mut S,
        edge: GroupRelationshipId,
    ) -> Result<(), ScholinkError> {
        let Some(parent) = store.rollup_of(edge)? else {
            return Ok(());
        };
        store.unlink_rollup(edge)?;
        if store.rolled_up(parent)?.is_empty() {
            store.delete_group_relationship(parent)?;
            tracing::debug!(edge = parent.0, "removed unsupported version edge");
        }
        Ok(())
    }

    // =========================================================================
    // FOLDING
    // =========================================================================

    /// Apply a Relationship that has just become active.
    pub fn fold_relationship<S: StoreWrite>(
        store: &mut S,
        relationship: &Relationship,
    ) -> Result<(), ScholinkError> {
        let source = Self::placement(store, relationship.source)?;
        let target = Self::placement(store, relationship.target)?;

        match relationship.relation {
            Relation::IsIdenticalTo => {
                Self::merge_identity_groups(store, source.identity, target.identity)?;
            }
            Relation::HasVersion => {
                Self::merge_version_groups(store, source.version, target.version)?;
                if source.identity != target.identity {
                    let edge = Self::upsert_group_edge(
                        store,
                        source.identity,
                        target.identity,
                        Relation::HasVersion,
                        GroupType::Identity,
                    )?;
                    store.link_relationship(relationship.id, edge.id)?;
                }
            }
            relation => {
                if source.identity == target.identity {
                    return Ok(());
                }
                let edge = Self::upsert_group_edge(
                    store,
                    source.identity,
                    target.identity,
                    relation,
                    GroupType::Identity,
                )?;
                store.link_relationship(relationship.id, edge.id)?;

                if source.version != target.version && store.rollup_of(edge.id)?.is_none() {
                    let rollup = Self::upsert_group_edge(
                        store,
                        source.version,
                        target.version,
                        relation,
                        GroupType::Version,
                    )?;
                    store.link_rollup(edge.id, rollup.id)?;
                }
            }
        }
        Ok(())
    }

    /// Undo the edge contribution of a Relationship that lost its last live
    /// claim. Edges left without support are deleted, one layer at a time.
    ///
    /// Group membership is never split: retracting an identity or version
    /// claim leaves the merged groups in place.
    pub fn unfold_relationship<S: StoreWrite>(
        store: &mut S,
        relationship: &Relationship,
    ) -> Result<(), ScholinkError> {
        if matches!(
            relationship.relation,
            Relation::IsIdenticalTo | Relation::HasVersion
        ) {
            tracing::warn!(
                relationship = relationship.id.0,
                relation = %relationship.relation,
                "retracted a grouping claim; merged groups are not split"
            );
        }

        let Some(edge) = store.group_relationship_of(relationship.id)? else {
            return Ok(());
        };
        store.unlink_relationship(relationship.id)?;
        if store.supporting_relationships(edge)?.is_empty() {
            Self::detach_rollup(store, edge)?;
            store.delete_group_relationship(edge)?;
            tracing::debug!(edge = edge.0, "removed unsupported identity edge");
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
