//! # Citation Query Engine
//!
//! Read-only queries over a [`StoreRead`] snapshot.
//!
//! [`CitationEngine::get_citations`] expands a frontier of identifiers across
//! identity and version boundaries and reports every active `Cites`
//! relationship into it, aggregated by the citing work's alias set.
//!
//! [`CitationEngine::get_citations2`] skips the frontier and answers with the
//! direct group-level edges of one relation at one granularity.

use crate::event::IdentifierRef;
use crate::grouping::GroupingEngine;
use crate::relation::from_datacite_relation;
use crate::store::StoreRead;
use crate::{
    Group, GroupId, GroupRelationship, GroupType, Identifier, IdentifierId, Relation,
    Relationship, RelationshipId, ScholinkError,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// RESULT TYPES
// =============================================================================

/// A relationship with both endpoints resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipView {
    pub id: RelationshipId,
    pub source: Identifier,
    pub relation: Relation,
    pub target: Identifier,
}

/// One entry of a citation result: a set of identifiers and the relationships
/// reported for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationEntry {
    /// Sorted by value, then scheme.
    pub identifiers: Vec<Identifier>,
    /// Sorted by relationship id.
    pub relationships: Vec<RelationshipView>,
}

/// Frontier expansion switches for [`CitationEngine::get_citations`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CitationQuery {
    /// Include the parents (HasVersion sources) of the queried work.
    pub with_parents: bool,
    /// Include every child of those parents.
    pub with_siblings: bool,
    /// Append the frontier itself as a final entry.
    pub expand_target: bool,
}

#[derive(Debug, Clone)]
struct Row {
    alias_set: usize,
    relationship: RelationshipView,
}

/// A finite, restartable citation result.
///
/// Citing relationships are kept sorted by the citing alias set; entries are
/// assembled from consecutive runs as [`Citations::iter`] advances.
#[derive(Debug, Clone, Default)]
pub struct Citations {
    alias_sets: Vec<Vec<Identifier>>,
    rows: Vec<Row>,
    frontier: Option<CitationEntry>,
}

impl Citations {
    /// Iterate from the first entry. May be called any number of times.
    #[must_use]
    pub fn iter(&self) -> CitationIter<'_> {
        CitationIter {
            citations: self,
            position: 0,
            frontier_done: false,
        }
    }

    /// Number of citing alias sets, not counting the frontier entry.
    #[must_use]
    pub fn citing_sets(&self) -> usize {
        let mut sets: Vec<usize> = self.rows.iter().map(|r| r.alias_set).collect();
        sets.dedup();
        sets.len()
    }

    /// The frontier entry, present when the query asked for it.
    #[must_use]
    pub fn frontier(&self) -> Option<&CitationEntry> {
        self.frontier.as_ref()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() && self.frontier.is_none()
    }
}

impl<'a> IntoIterator for &'a Citations {
    type Item = CitationEntry;
    type IntoIter = CitationIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over [`Citations`].
#[derive(Debug, Clone)]
pub struct CitationIter<'a> {
    citations: &'a Citations,
    position: usize,
    frontier_done: bool,
}

impl Iterator for CitationIter<'_> {
    type Item = CitationEntry;

    fn next(&mut self) -> Option<CitationEntry> {
        let rows = &self.citations.rows;
        if let Some(first) = rows.get(self.position) {
            let start = self.position;
            while rows
                .get(self.position)
                .is_some_and(|r| r.alias_set == first.alias_set)
            {
                self.position += 1;
            }
            let identifiers = self
                .citations
                .alias_sets
                .get(first.alias_set)
                .cloned()
                .unwrap_or_default();
            let relationships = rows[start..self.position]
                .iter()
                .map(|r| r.relationship.clone())
                .collect();
            return Some(CitationEntry {
                identifiers,
                relationships,
            });
        }
        if !self.frontier_done {
            self.frontier_done = true;
            return self.citations.frontier.clone();
        }
        None
    }
}

/// Direct edges to one neighbouring group, from [`CitationEngine::get_citations2`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCitation {
    pub group: Group,
    /// Member identifiers of the neighbouring group, sorted by value.
    pub identifiers: Vec<Identifier>,
    pub edges: Vec<GroupRelationship>,
}

// =============================================================================
// ENGINE
// =============================================================================

/// Stateless query operations.
pub struct CitationEngine;

impl CitationEngine {
    /// Who cites this work, counting its aliases and, on request, its
    /// parent and sibling versions.
    pub fn get_citations<R: StoreRead + ?Sized>(
        store: &R,
        identifier: &IdentifierRef,
        query: CitationQuery,
    ) -> Result<Citations, ScholinkError> {
        let root = Self::require_identifier(store, identifier)?;
        let placement = GroupingEngine::placement(store, root.id)?;

        let mut frontier: BTreeSet<IdentifierId> =
            store.members_of(placement.identity)?.into_iter().collect();
        let mut frontier_relations: BTreeSet<Relationship> = BTreeSet::new();

        if query.with_parents || query.with_siblings {
            let mut parents: BTreeSet<IdentifierId> = BTreeSet::new();
            let mut parent_relations = Vec::new();
            for member in &frontier {
                for rel in Self::active(store, store.relationships_to(*member, Relation::HasVersion)?)?
                {
                    parents.extend(Self::aliases(store, rel.source)?);
                    parent_relations.push(rel);
                }
            }

            if query.with_parents {
                frontier.extend(parents.iter().copied());
                frontier_relations.extend(parent_relations);
            }

            if query.with_siblings {
                for parent in &parents {
                    for rel in
                        Self::active(store, store.relationships_from(*parent, Relation::HasVersion)?)?
                    {
                        frontier.extend(Self::aliases(store, rel.target)?);
                        frontier_relations.insert(rel);
                    }
                }
            }
        }

        let mut citing: BTreeSet<Relationship> = BTreeSet::new();
        for member in &frontier {
            citing.extend(Self::active(store, store.relationships_to(*member, Relation::Cites)?)?);
        }

        let mut set_of_group: BTreeMap<GroupId, usize> = BTreeMap::new();
        let mut alias_sets: Vec<Vec<Identifier>> = Vec::new();
        let mut rows = Vec::with_capacity(citing.len());
        for rel in citing {
            let group = GroupingEngine::placement(store, rel.source)?.identity;
            let alias_set = match set_of_group.get(&group) {
                Some(&index) => index,
                None => {
                    let members = Self::resolve_sorted(store, store.members_of(group)?)?;
                    alias_sets.push(members);
                    set_of_group.insert(group, alias_sets.len() - 1);
                    alias_sets.len() - 1
                }
            };
            rows.push(Row {
                alias_set,
                relationship: Self::view(store, &rel)?,
            });
        }
        rows.sort_by(|a, b| {
            alias_key(&alias_sets, a.alias_set)
                .cmp(&alias_key(&alias_sets, b.alias_set))
                .then(a.relationship.id.cmp(&b.relationship.id))
        });

        let frontier = if query.expand_target {
            // aliases are in the frontier because of these
            for member in &frontier {
                let identities = store
                    .relationships_from(*member, Relation::IsIdenticalTo)?
                    .into_iter()
                    .chain(store.relationships_to(*member, Relation::IsIdenticalTo)?);
                let aliases = Self::active(store, identities.collect())?;
                frontier_relations.extend(aliases.into_iter().filter(|rel| {
                    frontier.contains(&rel.source) && frontier.contains(&rel.target)
                }));
            }
            Some(CitationEntry {
                identifiers: Self::resolve_sorted(store, frontier.into_iter().collect())?,
                relationships: frontier_relations
                    .iter()
                    .map(|rel| Self::view(store, rel))
                    .collect::<Result<Vec<_>, _>>()?,
            })
        } else {
            None
        };

        tracing::trace!(
            identifier = %root.value,
            citations = rows.len(),
            "resolved citations"
        );

        Ok(Citations {
            alias_sets,
            rows,
            frontier,
        })
    }

    /// Direct group-level edges of one relation at one granularity, grouped
    /// by the neighbouring group in ascending id order.
    ///
    /// `relation` is an external token; an inverse token (`IsCitedBy`) walks
    /// the stored edges backwards.
    pub fn get_citations2<R: StoreRead + ?Sized>(
        store: &R,
        identifier: &IdentifierRef,
        relation: &str,
        grouping: GroupType,
    ) -> Result<Vec<GroupCitation>, ScholinkError> {
        let root = Self::require_identifier(store, identifier)?;
        let placement = GroupingEngine::placement(store, root.id)?;
        let group = match grouping {
            GroupType::Identity => placement.identity,
            GroupType::Version => placement.version,
        };
        let (relation, inverted) = from_datacite_relation(relation);

        let edges = if inverted {
            store.group_relationships_to(group)?
        } else {
            store.group_relationships_from(group)?
        };

        let mut by_neighbour: BTreeMap<GroupId, Vec<GroupRelationship>> = BTreeMap::new();
        for edge in edges
            .into_iter()
            .filter(|e| e.relation == relation && e.kind == grouping)
        {
            let neighbour = if inverted { edge.source } else { edge.target };
            by_neighbour.entry(neighbour).or_default().push(edge);
        }

        let mut results = Vec::with_capacity(by_neighbour.len());
        for (neighbour, edges) in by_neighbour {
            let group = store
                .group(neighbour)?
                .ok_or(ScholinkError::GroupNotFound(neighbour))?;
            let members = match group.kind {
                GroupType::Identity => store.members_of(neighbour)?,
                GroupType::Version => {
                    let mut members = Vec::new();
                    for subgroup in store.subgroups_of(neighbour)? {
                        members.extend(store.members_of(subgroup)?);
                    }
                    members
                }
            };
            results.push(GroupCitation {
                group,
                identifiers: Self::resolve_sorted(store, members)?,
                edges,
            });
        }
        Ok(results)
    }

    fn require_identifier<R: StoreRead + ?Sized>(
        store: &R,
        identifier: &IdentifierRef,
    ) -> Result<Identifier, ScholinkError> {
        store
            .find_identifier(&identifier.value, &identifier.scheme)?
            .ok_or_else(|| ScholinkError::IdentifierNotFound {
                value: identifier.value.clone(),
                scheme: identifier.scheme.clone(),
            })
    }

    fn active<R: StoreRead + ?Sized>(
        store: &R,
        relationships: Vec<Relationship>,
    ) -> Result<Vec<Relationship>, ScholinkError> {
        let mut active = Vec::with_capacity(relationships.len());
        for rel in relationships {
            if store.is_active(rel.id)? {
                active.push(rel);
            }
        }
        Ok(active)
    }

    /// Every identifier in the same Identity Group.
    fn aliases<R: StoreRead + ?Sized>(
        store: &R,
        identifier: IdentifierId,
    ) -> Result<Vec<IdentifierId>, ScholinkError> {
        let group = GroupingEngine::placement(store, identifier)?.identity;
        store.members_of(group)
    }

    fn resolve<R: StoreRead + ?Sized>(
        store: &R,
        id: IdentifierId,
    ) -> Result<Identifier, ScholinkError> {
        store
            .identifier(id)?
            .ok_or_else(|| ScholinkError::Storage(format!("dangling identifier {id:?}")))
    }

    fn resolve_sorted<R: StoreRead + ?Sized>(
        store: &R,
        ids: Vec<IdentifierId>,
    ) -> Result<Vec<Identifier>, ScholinkError> {
        let mut identifiers = ids
            .into_iter()
            .map(|id| Self::resolve(store, id))
            .collect::<Result<Vec<_>, _>>()?;
        identifiers.sort_by(|a, b| (&a.value, &a.scheme).cmp(&(&b.value, &b.scheme)));
        Ok(identifiers)
    }

    fn view<R: StoreRead + ?Sized>(
        store: &R,
        rel: &Relationship,
    ) -> Result<RelationshipView, ScholinkError> {
        Ok(RelationshipView {
            id: rel.id,
            source: Self::resolve(store, rel.source)?,
            relation: rel.relation,
            target: Self::resolve(store, rel.target)?,
        })
    }
}

fn alias_key(alias_sets: &[Vec<Identifier>], index: usize) -> Vec<(&str, &str)> {
    alias_sets
        .get(index)
        .map(|set| {
            set.iter()
                .map(|i| (i.value.as_str(), i.scheme.as_str()))
                .collect()
        })
        .unwrap_or_default()
}

// =============================================================================
// TESTS
// =============================================================================
