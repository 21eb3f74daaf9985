//! # redb-backed Store
//!
//! A disk-backed implementation of [`StoreRead`]/[`StoreWrite`] on the redb
//! embedded database.
//!
//! - ACID transactions: one broker transaction is one redb write transaction
//! - MVCC: readers hold a `ReadTransaction` and see a consistent snapshot
//! - Single writer: `begin` blocks while another write is open
//!
//! Records with free-form text are postcard-encoded; everything else is
//! stored as native redb tuples so that every compound key is a real index.

use crate::store::{Sequences, StoreRead, StoreWrite, Table};
use crate::{
    Claim, ClaimId, EventRecord, Group, GroupId, GroupRelationship, GroupRelationshipId,
    GroupType, Identifier, IdentifierId, Relation, Relationship, RelationshipId, Retraction,
    ScholinkError,
};
use chrono::{DateTime, Utc};
use redb::{
    Database, MultimapTableDefinition, ReadTransaction, ReadableDatabase, ReadableMultimapTable,
    ReadableTable, ReadableTableMetadata, TableDefinition, WriteTransaction,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use uuid::Uuid;

// =============================================================================
// TABLES
// =============================================================================

/// IdentifierId -> postcard `Identifier`
const IDENTIFIERS: TableDefinition<u64, &[u8]> = TableDefinition::new("identifiers");

/// (scheme, value) -> IdentifierId
const IDENTIFIER_KEYS: TableDefinition<(&str, &str), u64> =
    TableDefinition::new("identifier_keys");

/// GroupId -> GroupType code
const GROUPS: TableDefinition<u64, u8> = TableDefinition::new("groups");

/// IdentifierId -> Identity GroupId
const IDENTIFIER_GROUP: TableDefinition<u64, u64> = TableDefinition::new("identifier_group");

/// Identity GroupId -> {IdentifierId}
const GROUP_IDENTIFIERS: MultimapTableDefinition<u64, u64> =
    MultimapTableDefinition::new("group_identifiers");

/// Identity GroupId -> Version GroupId
const SUBGROUP_GROUP: TableDefinition<u64, u64> = TableDefinition::new("subgroup_group");

/// Version GroupId -> {Identity GroupId}
const GROUP_SUBGROUPS: MultimapTableDefinition<u64, u64> =
    MultimapTableDefinition::new("group_subgroups");

/// RelationshipId -> (source, relation code, target)
const RELATIONSHIPS: TableDefinition<u64, (u64, u8, u64)> = TableDefinition::new("relationships");

/// (source, relation code, target) -> RelationshipId
const RELATIONSHIP_KEYS: TableDefinition<(u64, u8, u64), u64> =
    TableDefinition::new("relationship_keys");

/// (source, relation code) -> {RelationshipId}
const RELATIONSHIPS_BY_SOURCE: MultimapTableDefinition<(u64, u8), u64> =
    MultimapTableDefinition::new("relationships_by_source");

/// (target, relation code) -> {RelationshipId}
const RELATIONSHIPS_BY_TARGET: MultimapTableDefinition<(u64, u8), u64> =
    MultimapTableDefinition::new("relationships_by_target");

/// ClaimId -> postcard `Claim`
const CLAIMS: TableDefinition<u64, &[u8]> = TableDefinition::new("claims");

/// RelationshipId -> {ClaimId}
const RELATIONSHIP_CLAIMS: MultimapTableDefinition<u64, u64> =
    MultimapTableDefinition::new("relationship_claims");

/// ClaimId -> postcard `Retraction`
const RETRACTIONS: TableDefinition<u64, &[u8]> = TableDefinition::new("retractions");

/// Event uuid -> postcard `EventRecord`
const EVENTS: TableDefinition<u128, &[u8]> = TableDefinition::new("events");

/// GroupRelationshipId -> (source, target, relation code, type code)
const GROUP_RELATIONSHIPS: TableDefinition<u64, (u64, u64, u8, u8)> =
    TableDefinition::new("group_relationships");

/// (source, target, relation code, type code) -> GroupRelationshipId
const GROUP_RELATIONSHIP_KEYS: TableDefinition<(u64, u64, u8, u8), u64> =
    TableDefinition::new("group_relationship_keys");

/// Source GroupId -> {GroupRelationshipId}
const GROUP_RELATIONSHIPS_BY_SOURCE: MultimapTableDefinition<u64, u64> =
    MultimapTableDefinition::new("group_relationships_by_source");

/// Target GroupId -> {GroupRelationshipId}
const GROUP_RELATIONSHIPS_BY_TARGET: MultimapTableDefinition<u64, u64> =
    MultimapTableDefinition::new("group_relationships_by_target");

/// RelationshipId -> Identity-level GroupRelationshipId
const RELATIONSHIP_LINKS: TableDefinition<u64, u64> = TableDefinition::new("relationship_links");

/// Identity-level GroupRelationshipId -> {RelationshipId}
const GROUP_RELATIONSHIP_SUPPORT: MultimapTableDefinition<u64, u64> =
    MultimapTableDefinition::new("group_relationship_support");

/// Identity-level GroupRelationshipId -> Version-level GroupRelationshipId
const ROLLUPS: TableDefinition<u64, u64> = TableDefinition::new("rollups");

/// Version-level GroupRelationshipId -> {Identity-level GroupRelationshipId}
const ROLLUP_CHILDREN: MultimapTableDefinition<u64, u64> =
    MultimapTableDefinition::new("rollup_children");

/// Sequence name -> next id
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

const SEQ_IDENTIFIER: &str = "next_identifier_id";
const SEQ_GROUP: &str = "next_group_id";
const SEQ_RELATIONSHIP: &str = "next_relationship_id";
const SEQ_GROUP_RELATIONSHIP: &str = "next_group_relationship_id";
const SEQ_CLAIM: &str = "next_claim_id";

// =============================================================================
// HELPERS
// =============================================================================

fn storage<E: std::fmt::Display>(e: E) -> ScholinkError {
    ScholinkError::Storage(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ScholinkError> {
    postcard::to_allocvec(value).map_err(|e| ScholinkError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ScholinkError> {
    postcard::from_bytes(bytes).map_err(|e| ScholinkError::Serialization(e.to_string()))
}

fn len(table: &impl ReadableTableMetadata) -> Result<usize, ScholinkError> {
    let n = table.len().map_err(storage)?;
    Ok(usize::try_from(n).unwrap_or(usize::MAX))
}

fn get_u64(table: &impl ReadableTable<u64, u64>, key: u64) -> Result<Option<u64>, ScholinkError> {
    Ok(table.get(key).map_err(storage)?.map(|v| v.value()))
}

fn get_record<T: DeserializeOwned>(
    table: &impl ReadableTable<u64, &'static [u8]>,
    key: u64,
) -> Result<Option<T>, ScholinkError> {
    table
        .get(key)
        .map_err(storage)?
        .map(|v| decode(v.value()))
        .transpose()
}

fn scan_records<T: DeserializeOwned>(
    table: &impl ReadableTable<u64, &'static [u8]>,
) -> Result<Vec<T>, ScholinkError> {
    let mut out = Vec::new();
    for entry in table.iter().map_err(storage)? {
        let (_, value) = entry.map_err(storage)?;
        out.push(decode(value.value())?);
    }
    Ok(out)
}

fn scan_links(table: &impl ReadableTable<u64, u64>) -> Result<Vec<(u64, u64)>, ScholinkError> {
    let mut out = Vec::new();
    for entry in table.iter().map_err(storage)? {
        let (key, value) = entry.map_err(storage)?;
        out.push((key.value(), value.value()));
    }
    Ok(out)
}

fn get_set(
    table: &impl ReadableMultimapTable<u64, u64>,
    key: u64,
) -> Result<Vec<u64>, ScholinkError> {
    let mut out = Vec::new();
    for value in table.get(key).map_err(storage)? {
        out.push(value.map_err(storage)?.value());
    }
    Ok(out)
}

fn get_pair_set(
    table: &impl ReadableMultimapTable<(u64, u8), u64>,
    key: (u64, u8),
) -> Result<Vec<u64>, ScholinkError> {
    let mut out = Vec::new();
    for value in table.get(key).map_err(storage)? {
        out.push(value.map_err(storage)?.value());
    }
    Ok(out)
}

fn group_from(id: u64, code: u8) -> Result<Group, ScholinkError> {
    Ok(Group {
        id: GroupId(id),
        kind: GroupType::from_code(code)?,
    })
}

fn relationship_from(
    id: u64,
    (source, relation, target): (u64, u8, u64),
) -> Result<Relationship, ScholinkError> {
    Ok(Relationship {
        id: RelationshipId(id),
        source: IdentifierId(source),
        relation: Relation::from_code(relation)?,
        target: IdentifierId(target),
    })
}

fn group_relationship_from(
    id: u64,
    (source, target, relation, kind): (u64, u64, u8, u8),
) -> Result<GroupRelationship, ScholinkError> {
    Ok(GroupRelationship {
        id: GroupRelationshipId(id),
        source: GroupId(source),
        target: GroupId(target),
        relation: Relation::from_code(relation)?,
        kind: GroupType::from_code(kind)?,
    })
}

fn group_relationship_key(edge: &GroupRelationship) -> (u64, u64, u8, u8) {
    (
        edge.source.0,
        edge.target.0,
        edge.relation.code(),
        edge.kind.code(),
    )
}

// =============================================================================
// DATABASE
// =============================================================================

/// A redb database holding the full grouping graph.
pub struct RedbStore {
    db: Database,
    path: PathBuf,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// A read-only snapshot of a [`RedbStore`].
pub struct RedbSnapshot {
    txn: ReadTransaction,
}

/// A write transaction over a [`RedbStore`]. Dropping it aborts.
pub struct RedbTxn {
    txn: WriteTransaction,
}

impl RedbStore {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ScholinkError> {
        let path = path.as_ref().to_path_buf();
        let db = Database::create(&path).map_err(|e| ScholinkError::Io(e.to_string()))?;

        // Create every table so that read transactions never miss one.
        let write_txn = db.begin_write().map_err(storage)?;
        {
            for def in [
                IDENTIFIER_GROUP,
                SUBGROUP_GROUP,
                RELATIONSHIP_LINKS,
                ROLLUPS,
            ] {
                write_txn.open_table(def).map_err(storage)?;
            }
            for def in [IDENTIFIERS, CLAIMS, RETRACTIONS] {
                write_txn.open_table(def).map_err(storage)?;
            }
            for def in [
                GROUP_IDENTIFIERS,
                GROUP_SUBGROUPS,
                RELATIONSHIP_CLAIMS,
                GROUP_RELATIONSHIPS_BY_SOURCE,
                GROUP_RELATIONSHIPS_BY_TARGET,
                GROUP_RELATIONSHIP_SUPPORT,
                ROLLUP_CHILDREN,
            ] {
                write_txn.open_multimap_table(def).map_err(storage)?;
            }
            write_txn.open_table(IDENTIFIER_KEYS).map_err(storage)?;
            write_txn.open_table(GROUPS).map_err(storage)?;
            write_txn.open_table(RELATIONSHIPS).map_err(storage)?;
            write_txn.open_table(RELATIONSHIP_KEYS).map_err(storage)?;
            write_txn
                .open_multimap_table(RELATIONSHIPS_BY_SOURCE)
                .map_err(storage)?;
            write_txn
                .open_multimap_table(RELATIONSHIPS_BY_TARGET)
                .map_err(storage)?;
            write_txn.open_table(EVENTS).map_err(storage)?;
            write_txn.open_table(GROUP_RELATIONSHIPS).map_err(storage)?;
            write_txn.open_table(GROUP_RELATIONSHIP_KEYS).map_err(storage)?;
            write_txn.open_table(METADATA).map_err(storage)?;
        }
        write_txn.commit().map_err(storage)?;

        tracing::debug!(path = %path.display(), "opened redb store");
        Ok(Self { db, path })
    }

    /// Path of the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A consistent read-only view of the last committed state.
    pub fn snapshot(&self) -> Result<RedbSnapshot, ScholinkError> {
        Ok(RedbSnapshot {
            txn: self.db.begin_read().map_err(storage)?,
        })
    }

    /// Begin the single write transaction. Blocks while another is open.
    pub fn begin(&self) -> Result<RedbTxn, ScholinkError> {
        Ok(RedbTxn {
            txn: self.db.begin_write().map_err(storage)?,
        })
    }
}

// =============================================================================
// READ SIDE
// =============================================================================

/// Both transaction kinds expose `open_table`/`open_multimap_table` with
/// readable results, so the read side is written once for each.
macro_rules! impl_store_read {
    ($ty:ty) => {
        impl StoreRead for $ty {
            fn identifier(&self, id: IdentifierId) -> Result<Option<Identifier>, ScholinkError> {
                let table = self.txn.open_table(IDENTIFIERS).map_err(storage)?;
                get_record(&table, id.0)
            }

            fn find_identifier(
                &self,
                value: &str,
                scheme: &str,
            ) -> Result<Option<Identifier>, ScholinkError> {
                let id = {
                    let keys = self.txn.open_table(IDENTIFIER_KEYS).map_err(storage)?;
                    keys.get((scheme, value)).map_err(storage)?.map(|v| v.value())
                };
                match id {
                    Some(id) => self.identifier(IdentifierId(id)),
                    None => Ok(None),
                }
            }

            fn identity_group_of(
                &self,
                identifier: IdentifierId,
            ) -> Result<Option<GroupId>, ScholinkError> {
                let table = self.txn.open_table(IDENTIFIER_GROUP).map_err(storage)?;
                Ok(get_u64(&table, identifier.0)?.map(GroupId))
            }

            fn members_of(&self, group: GroupId) -> Result<Vec<IdentifierId>, ScholinkError> {
                let table = self
                    .txn
                    .open_multimap_table(GROUP_IDENTIFIERS)
                    .map_err(storage)?;
                Ok(get_set(&table, group.0)?.into_iter().map(IdentifierId).collect())
            }

            fn group(&self, id: GroupId) -> Result<Option<Group>, ScholinkError> {
                let table = self.txn.open_table(GROUPS).map_err(storage)?;
                let code = table.get(id.0).map_err(storage)?.map(|v| v.value());
                code.map(|c| group_from(id.0, c)).transpose()
            }

            fn version_group_of(&self, group: GroupId) -> Result<Option<GroupId>, ScholinkError> {
                let table = self.txn.open_table(SUBGROUP_GROUP).map_err(storage)?;
                Ok(get_u64(&table, group.0)?.map(GroupId))
            }

            fn subgroups_of(&self, group: GroupId) -> Result<Vec<GroupId>, ScholinkError> {
                let table = self
                    .txn
                    .open_multimap_table(GROUP_SUBGROUPS)
                    .map_err(storage)?;
                Ok(get_set(&table, group.0)?.into_iter().map(GroupId).collect())
            }

            fn relationship(
                &self,
                id: RelationshipId,
            ) -> Result<Option<Relationship>, ScholinkError> {
                let table = self.txn.open_table(RELATIONSHIPS).map_err(storage)?;
                let row = table.get(id.0).map_err(storage)?.map(|v| v.value());
                row.map(|r| relationship_from(id.0, r)).transpose()
            }

            fn find_relationship(
                &self,
                source: IdentifierId,
                relation: Relation,
                target: IdentifierId,
            ) -> Result<Option<Relationship>, ScholinkError> {
                let key = (source.0, relation.code(), target.0);
                let id = {
                    let keys = self.txn.open_table(RELATIONSHIP_KEYS).map_err(storage)?;
                    keys.get(key).map_err(storage)?.map(|v| v.value())
                };
                Ok(id.map(|id| Relationship {
                    id: RelationshipId(id),
                    source,
                    relation,
                    target,
                }))
            }

            fn relationships_from(
                &self,
                source: IdentifierId,
                relation: Relation,
            ) -> Result<Vec<Relationship>, ScholinkError> {
                let ids = {
                    let table = self
                        .txn
                        .open_multimap_table(RELATIONSHIPS_BY_SOURCE)
                        .map_err(storage)?;
                    get_pair_set(&table, (source.0, relation.code()))?
                };
                ids.into_iter()
                    .filter_map(|id| self.relationship(RelationshipId(id)).transpose())
                    .collect()
            }

            fn relationships_to(
                &self,
                target: IdentifierId,
                relation: Relation,
            ) -> Result<Vec<Relationship>, ScholinkError> {
                let ids = {
                    let table = self
                        .txn
                        .open_multimap_table(RELATIONSHIPS_BY_TARGET)
                        .map_err(storage)?;
                    get_pair_set(&table, (target.0, relation.code()))?
                };
                ids.into_iter()
                    .filter_map(|id| self.relationship(RelationshipId(id)).transpose())
                    .collect()
            }

            fn claims_of(&self, relationship: RelationshipId) -> Result<Vec<Claim>, ScholinkError> {
                let ids = {
                    let table = self
                        .txn
                        .open_multimap_table(RELATIONSHIP_CLAIMS)
                        .map_err(storage)?;
                    get_set(&table, relationship.0)?
                };
                let table = self.txn.open_table(CLAIMS).map_err(storage)?;
                let mut claims = Vec::with_capacity(ids.len());
                for id in ids {
                    if let Some(claim) = get_record(&table, id)? {
                        claims.push(claim);
                    }
                }
                Ok(claims)
            }

            fn retraction_of(&self, claim: ClaimId) -> Result<Option<Retraction>, ScholinkError> {
                let table = self.txn.open_table(RETRACTIONS).map_err(storage)?;
                get_record(&table, claim.0)
            }

            fn event(&self, id: Uuid) -> Result<Option<EventRecord>, ScholinkError> {
                let table = self.txn.open_table(EVENTS).map_err(storage)?;
                table
                    .get(id.as_u128())
                    .map_err(storage)?
                    .map(|v| decode(v.value()))
                    .transpose()
            }

            fn group_relationship(
                &self,
                id: GroupRelationshipId,
            ) -> Result<Option<GroupRelationship>, ScholinkError> {
                let table = self.txn.open_table(GROUP_RELATIONSHIPS).map_err(storage)?;
                let row = table.get(id.0).map_err(storage)?.map(|v| v.value());
                row.map(|r| group_relationship_from(id.0, r)).transpose()
            }

            fn find_group_relationship(
                &self,
                source: GroupId,
                target: GroupId,
                relation: Relation,
                kind: GroupType,
            ) -> Result<Option<GroupRelationship>, ScholinkError> {
                let key = (source.0, target.0, relation.code(), kind.code());
                let table = self
                    .txn
                    .open_table(GROUP_RELATIONSHIP_KEYS)
                    .map_err(storage)?;
                let id = table.get(key).map_err(storage)?.map(|v| v.value());
                Ok(id.map(|id| GroupRelationship {
                    id: GroupRelationshipId(id),
                    source,
                    target,
                    relation,
                    kind,
                }))
            }

            fn group_relationships_from(
                &self,
                group: GroupId,
            ) -> Result<Vec<GroupRelationship>, ScholinkError> {
                let ids = {
                    let table = self
                        .txn
                        .open_multimap_table(GROUP_RELATIONSHIPS_BY_SOURCE)
                        .map_err(storage)?;
                    get_set(&table, group.0)?
                };
                ids.into_iter()
                    .filter_map(|id| self.group_relationship(GroupRelationshipId(id)).transpose())
                    .collect()
            }

            fn group_relationships_to(
                &self,
                group: GroupId,
            ) -> Result<Vec<GroupRelationship>, ScholinkError> {
                let ids = {
                    let table = self
                        .txn
                        .open_multimap_table(GROUP_RELATIONSHIPS_BY_TARGET)
                        .map_err(storage)?;
                    get_set(&table, group.0)?
                };
                ids.into_iter()
                    .filter_map(|id| self.group_relationship(GroupRelationshipId(id)).transpose())
                    .collect()
            }

            fn group_relationship_of(
                &self,
                relationship: RelationshipId,
            ) -> Result<Option<GroupRelationshipId>, ScholinkError> {
                let table = self.txn.open_table(RELATIONSHIP_LINKS).map_err(storage)?;
                Ok(get_u64(&table, relationship.0)?.map(GroupRelationshipId))
            }

            fn supporting_relationships(
                &self,
                group_relationship: GroupRelationshipId,
            ) -> Result<Vec<RelationshipId>, ScholinkError> {
                let table = self
                    .txn
                    .open_multimap_table(GROUP_RELATIONSHIP_SUPPORT)
                    .map_err(storage)?;
                Ok(get_set(&table, group_relationship.0)?
                    .into_iter()
                    .map(RelationshipId)
                    .collect())
            }

            fn rollup_of(
                &self,
                group_relationship: GroupRelationshipId,
            ) -> Result<Option<GroupRelationshipId>, ScholinkError> {
                let table = self.txn.open_table(ROLLUPS).map_err(storage)?;
                Ok(get_u64(&table, group_relationship.0)?.map(GroupRelationshipId))
            }

            fn rolled_up(
                &self,
                group_relationship: GroupRelationshipId,
            ) -> Result<Vec<GroupRelationshipId>, ScholinkError> {
                let table = self
                    .txn
                    .open_multimap_table(ROLLUP_CHILDREN)
                    .map_err(storage)?;
                Ok(get_set(&table, group_relationship.0)?
                    .into_iter()
                    .map(GroupRelationshipId)
                    .collect())
            }

            fn count(&self, table: Table) -> Result<usize, ScholinkError> {
                let txn = &self.txn;
                match table {
                    Table::Identifiers => len(&txn.open_table(IDENTIFIERS).map_err(storage)?),
                    Table::Groups => len(&txn.open_table(GROUPS).map_err(storage)?),
                    Table::IdentifierLinks => {
                        len(&txn.open_table(IDENTIFIER_GROUP).map_err(storage)?)
                    }
                    Table::SubgroupLinks => len(&txn.open_table(SUBGROUP_GROUP).map_err(storage)?),
                    Table::Relationships => len(&txn.open_table(RELATIONSHIPS).map_err(storage)?),
                    Table::Claims => len(&txn.open_table(CLAIMS).map_err(storage)?),
                    Table::Retractions => len(&txn.open_table(RETRACTIONS).map_err(storage)?),
                    Table::Events => len(&txn.open_table(EVENTS).map_err(storage)?),
                    Table::GroupRelationships => {
                        len(&txn.open_table(GROUP_RELATIONSHIPS).map_err(storage)?)
                    }
                    Table::RelationshipLinks => {
                        len(&txn.open_table(RELATIONSHIP_LINKS).map_err(storage)?)
                    }
                    Table::RollupLinks => len(&txn.open_table(ROLLUPS).map_err(storage)?),
                }
            }

            fn count_groups(&self, kind: GroupType) -> Result<usize, ScholinkError> {
                let table = self.txn.open_table(GROUPS).map_err(storage)?;
                let mut count = 0;
                for entry in table.iter().map_err(storage)? {
                    let (_, code) = entry.map_err(storage)?;
                    if code.value() == kind.code() {
                        count += 1;
                    }
                }
                Ok(count)
            }

            fn identifiers(&self) -> Result<Vec<Identifier>, ScholinkError> {
                scan_records(&self.txn.open_table(IDENTIFIERS).map_err(storage)?)
            }

            fn groups(&self) -> Result<Vec<Group>, ScholinkError> {
                let table = self.txn.open_table(GROUPS).map_err(storage)?;
                let mut out = Vec::new();
                for entry in table.iter().map_err(storage)? {
                    let (id, code) = entry.map_err(storage)?;
                    out.push(group_from(id.value(), code.value())?);
                }
                Ok(out)
            }

            fn identifier_links(&self) -> Result<Vec<(IdentifierId, GroupId)>, ScholinkError> {
                let table = self.txn.open_table(IDENTIFIER_GROUP).map_err(storage)?;
                Ok(scan_links(&table)?
                    .into_iter()
                    .map(|(i, g)| (IdentifierId(i), GroupId(g)))
                    .collect())
            }

            fn subgroup_links(&self) -> Result<Vec<(GroupId, GroupId)>, ScholinkError> {
                let table = self.txn.open_table(SUBGROUP_GROUP).map_err(storage)?;
                Ok(scan_links(&table)?
                    .into_iter()
                    .map(|(s, g)| (GroupId(s), GroupId(g)))
                    .collect())
            }

            fn relationships(&self) -> Result<Vec<Relationship>, ScholinkError> {
                let table = self.txn.open_table(RELATIONSHIPS).map_err(storage)?;
                let mut out = Vec::new();
                for entry in table.iter().map_err(storage)? {
                    let (id, row) = entry.map_err(storage)?;
                    out.push(relationship_from(id.value(), row.value())?);
                }
                Ok(out)
            }

            fn claims(&self) -> Result<Vec<Claim>, ScholinkError> {
                scan_records(&self.txn.open_table(CLAIMS).map_err(storage)?)
            }

            fn retractions(&self) -> Result<Vec<Retraction>, ScholinkError> {
                scan_records(&self.txn.open_table(RETRACTIONS).map_err(storage)?)
            }

            fn events(&self) -> Result<Vec<EventRecord>, ScholinkError> {
                let table = self.txn.open_table(EVENTS).map_err(storage)?;
                let mut out = Vec::new();
                for entry in table.iter().map_err(storage)? {
                    let (_, value) = entry.map_err(storage)?;
                    out.push(decode(value.value())?);
                }
                Ok(out)
            }

            fn group_relationships(&self) -> Result<Vec<GroupRelationship>, ScholinkError> {
                let table = self.txn.open_table(GROUP_RELATIONSHIPS).map_err(storage)?;
                let mut out = Vec::new();
                for entry in table.iter().map_err(storage)? {
                    let (id, row) = entry.map_err(storage)?;
                    out.push(group_relationship_from(id.value(), row.value())?);
                }
                Ok(out)
            }

            fn relationship_links(
                &self,
            ) -> Result<Vec<(RelationshipId, GroupRelationshipId)>, ScholinkError> {
                let table = self.txn.open_table(RELATIONSHIP_LINKS).map_err(storage)?;
                Ok(scan_links(&table)?
                    .into_iter()
                    .map(|(r, g)| (RelationshipId(r), GroupRelationshipId(g)))
                    .collect())
            }

            fn rollup_links(
                &self,
            ) -> Result<Vec<(GroupRelationshipId, GroupRelationshipId)>, ScholinkError> {
                let table = self.txn.open_table(ROLLUPS).map_err(storage)?;
                Ok(scan_links(&table)?
                    .into_iter()
                    .map(|(c, p)| (GroupRelationshipId(c), GroupRelationshipId(p)))
                    .collect())
            }

            fn sequences(&self) -> Result<Sequences, ScholinkError> {
                let table = self.txn.open_table(METADATA).map_err(storage)?;
                let read = |name: &str| -> Result<u64, ScholinkError> {
                    Ok(table
                        .get(name)
                        .map_err(storage)?
                        .map_or(crate::primitives::FIRST_ID, |v| v.value()))
                };
                Ok(Sequences {
                    identifier: read(SEQ_IDENTIFIER)?,
                    group: read(SEQ_GROUP)?,
                    relationship: read(SEQ_RELATIONSHIP)?,
                    group_relationship: read(SEQ_GROUP_RELATIONSHIP)?,
                    claim: read(SEQ_CLAIM)?,
                })
            }
        }
    };
}

impl_store_read!(RedbSnapshot);
impl_store_read!(RedbTxn);

// =============================================================================
// WRITE SIDE
// =============================================================================

impl RedbTxn {
    /// Commit every write made in this transaction.
    pub fn commit(self) -> Result<(), ScholinkError> {
        self.txn.commit().map_err(storage)
    }

    /// Hand out the next value of a sequence.
    fn next_id(&self, sequence: &str) -> Result<u64, ScholinkError> {
        let mut table = self.txn.open_table(METADATA).map_err(storage)?;
        let id = table
            .get(sequence)
            .map_err(storage)?
            .map_or(crate::primitives::FIRST_ID, |v| v.value());
        table
            .insert(sequence, id.saturating_add(1))
            .map_err(storage)?;
        Ok(id)
    }

    fn require_group(&self, id: GroupId) -> Result<(), ScholinkError> {
        match self.group(id)? {
            Some(_) => Ok(()),
            None => Err(ScholinkError::GroupNotFound(id)),
        }
    }

    fn require_group_relationship(
        &self,
        id: GroupRelationshipId,
    ) -> Result<GroupRelationship, ScholinkError> {
        self.group_relationship(id)?
            .ok_or(ScholinkError::GroupRelationshipNotFound(id))
    }

    /// Insert or replace a single-valued link and keep its reverse multimap
    /// in step.
    fn relink(
        &self,
        forward: TableDefinition<u64, u64>,
        reverse: MultimapTableDefinition<u64, u64>,
        from: u64,
        to: u64,
    ) -> Result<(), ScholinkError> {
        let previous = {
            let mut table = self.txn.open_table(forward).map_err(storage)?;
            let old = table.insert(from, to).map_err(storage)?.map(|v| v.value());
            old
        };
        let mut table = self.txn.open_multimap_table(reverse).map_err(storage)?;
        if let Some(previous) = previous {
            table.remove(previous, from).map_err(storage)?;
        }
        table.insert(to, from).map_err(storage)?;
        Ok(())
    }

    fn unlink(
        &self,
        forward: TableDefinition<u64, u64>,
        reverse: MultimapTableDefinition<u64, u64>,
        from: u64,
    ) -> Result<(), ScholinkError> {
        let previous = {
            let mut table = self.txn.open_table(forward).map_err(storage)?;
            let old = table.remove(from).map_err(storage)?.map(|v| v.value());
            old
        };
        if let Some(previous) = previous {
            let mut table = self.txn.open_multimap_table(reverse).map_err(storage)?;
            table.remove(previous, from).map_err(storage)?;
        }
        Ok(())
    }

    fn index_group_relationship(&self, edge: &GroupRelationship) -> Result<(), ScholinkError> {
        let key = group_relationship_key(edge);
        {
            let mut rows = self.txn.open_table(GROUP_RELATIONSHIPS).map_err(storage)?;
            rows.insert(edge.id.0, key).map_err(storage)?;
        }
        {
            let mut keys = self
                .txn
                .open_table(GROUP_RELATIONSHIP_KEYS)
                .map_err(storage)?;
            keys.insert(key, edge.id.0).map_err(storage)?;
        }
        {
            let mut by_source = self
                .txn
                .open_multimap_table(GROUP_RELATIONSHIPS_BY_SOURCE)
                .map_err(storage)?;
            by_source.insert(edge.source.0, edge.id.0).map_err(storage)?;
        }
        let mut by_target = self
            .txn
            .open_multimap_table(GROUP_RELATIONSHIPS_BY_TARGET)
            .map_err(storage)?;
        by_target.insert(edge.target.0, edge.id.0).map_err(storage)?;
        Ok(())
    }

    fn unindex_group_relationship(&self, edge: &GroupRelationship) -> Result<(), ScholinkError> {
        {
            let mut rows = self.txn.open_table(GROUP_RELATIONSHIPS).map_err(storage)?;
            rows.remove(edge.id.0).map_err(storage)?;
        }
        {
            let mut keys = self
                .txn
                .open_table(GROUP_RELATIONSHIP_KEYS)
                .map_err(storage)?;
            keys.remove(group_relationship_key(edge)).map_err(storage)?;
        }
        {
            let mut by_source = self
                .txn
                .open_multimap_table(GROUP_RELATIONSHIPS_BY_SOURCE)
                .map_err(storage)?;
            by_source.remove(edge.source.0, edge.id.0).map_err(storage)?;
        }
        let mut by_target = self
            .txn
            .open_multimap_table(GROUP_RELATIONSHIPS_BY_TARGET)
            .map_err(storage)?;
        by_target.remove(edge.target.0, edge.id.0).map_err(storage)?;
        Ok(())
    }
}

impl StoreWrite for RedbTxn {
    fn insert_identifier(
        &mut self,
        value: &str,
        scheme: &str,
    ) -> Result<Identifier, ScholinkError> {
        if self.find_identifier(value, scheme)?.is_some() {
            return Err(ScholinkError::Storage(format!(
                "identifier {scheme}:{value} already exists"
            )));
        }
        let identifier = Identifier {
            id: IdentifierId(self.next_id(SEQ_IDENTIFIER)?),
            value: value.to_string(),
            scheme: scheme.to_string(),
        };
        let bytes = encode(&identifier)?;
        {
            let mut rows = self.txn.open_table(IDENTIFIERS).map_err(storage)?;
            rows.insert(identifier.id.0, bytes.as_slice())
                .map_err(storage)?;
        }
        let mut keys = self.txn.open_table(IDENTIFIER_KEYS).map_err(storage)?;
        keys.insert((scheme, value), identifier.id.0)
            .map_err(storage)?;
        drop(keys);
        Ok(identifier)
    }

    fn insert_group(&mut self, kind: GroupType) -> Result<Group, ScholinkError> {
        let group = Group {
            id: GroupId(self.next_id(SEQ_GROUP)?),
            kind,
        };
        let mut rows = self.txn.open_table(GROUPS).map_err(storage)?;
        rows.insert(group.id.0, kind.code()).map_err(storage)?;
        drop(rows);
        Ok(group)
    }

    fn delete_group(&mut self, id: GroupId) -> Result<(), ScholinkError> {
        let mut rows = self.txn.open_table(GROUPS).map_err(storage)?;
        let removed = rows.remove(id.0).map_err(storage)?.is_some();
        drop(rows);
        if removed {
            Ok(())
        } else {
            Err(ScholinkError::GroupNotFound(id))
        }
    }

    fn link_identifier(
        &mut self,
        identifier: IdentifierId,
        group: GroupId,
    ) -> Result<(), ScholinkError> {
        self.require_group(group)?;
        self.relink(IDENTIFIER_GROUP, GROUP_IDENTIFIERS, identifier.0, group.0)
    }

    fn link_subgroup(&mut self, subgroup: GroupId, group: GroupId) -> Result<(), ScholinkError> {
        self.require_group(group)?;
        self.relink(SUBGROUP_GROUP, GROUP_SUBGROUPS, subgroup.0, group.0)
    }

    fn unlink_subgroup(&mut self, subgroup: GroupId) -> Result<(), ScholinkError> {
        self.unlink(SUBGROUP_GROUP, GROUP_SUBGROUPS, subgroup.0)
    }

    fn insert_relationship(
        &mut self,
        source: IdentifierId,
        relation: Relation,
        target: IdentifierId,
    ) -> Result<Relationship, ScholinkError> {
        if self.find_relationship(source, relation, target)?.is_some() {
            return Err(ScholinkError::Storage(format!(
                "relationship {source:?} {relation} {target:?} already exists"
            )));
        }
        let relationship = Relationship {
            id: RelationshipId(self.next_id(SEQ_RELATIONSHIP)?),
            source,
            relation,
            target,
        };
        let id = relationship.id.0;
        let row = (source.0, relation.code(), target.0);
        {
            let mut rows = self.txn.open_table(RELATIONSHIPS).map_err(storage)?;
            rows.insert(id, row).map_err(storage)?;
        }
        {
            let mut keys = self.txn.open_table(RELATIONSHIP_KEYS).map_err(storage)?;
            keys.insert(row, id).map_err(storage)?;
        }
        {
            let mut by_source = self
                .txn
                .open_multimap_table(RELATIONSHIPS_BY_SOURCE)
                .map_err(storage)?;
            by_source
                .insert((source.0, relation.code()), id)
                .map_err(storage)?;
        }
        let mut by_target = self
            .txn
            .open_multimap_table(RELATIONSHIPS_BY_TARGET)
            .map_err(storage)?;
        by_target
            .insert((target.0, relation.code()), id)
            .map_err(storage)?;
        drop(by_target);
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
            id: ClaimId(self.next_id(SEQ_CLAIM)?),
            relationship,
            event,
            creator: creator.to_string(),
            time,
        };
        let bytes = encode(&claim)?;
        {
            let mut rows = self.txn.open_table(CLAIMS).map_err(storage)?;
            rows.insert(claim.id.0, bytes.as_slice()).map_err(storage)?;
        }
        let mut index = self
            .txn
            .open_multimap_table(RELATIONSHIP_CLAIMS)
            .map_err(storage)?;
        index.insert(relationship.0, claim.id.0).map_err(storage)?;
        drop(index);
        Ok(claim)
    }

    fn insert_retraction(&mut self, retraction: Retraction) -> Result<(), ScholinkError> {
        let bytes = encode(&retraction)?;
        let mut rows = self.txn.open_table(RETRACTIONS).map_err(storage)?;
        rows.insert(retraction.claim.0, bytes.as_slice())
            .map_err(storage)?;
        Ok(())
    }

    fn insert_event(&mut self, record: EventRecord) -> Result<(), ScholinkError> {
        let bytes = encode(&record)?;
        let mut rows = self.txn.open_table(EVENTS).map_err(storage)?;
        rows.insert(record.id.as_u128(), bytes.as_slice())
            .map_err(storage)?;
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
            .find_group_relationship(source, target, relation, kind)?
            .is_some()
        {
            return Err(ScholinkError::Storage(format!(
                "group relationship {source:?} {relation} {target:?} ({kind}) already exists"
            )));
        }
        let edge = GroupRelationship {
            id: GroupRelationshipId(self.next_id(SEQ_GROUP_RELATIONSHIP)?),
            source,
            target,
            relation,
            kind,
        };
        self.index_group_relationship(&edge)?;
        Ok(edge)
    }

    fn repoint_group_relationship(
        &mut self,
        id: GroupRelationshipId,
        source: GroupId,
        target: GroupId,
    ) -> Result<GroupRelationship, ScholinkError> {
        let edge = self.require_group_relationship(id)?;
        if let Some(other) =
            self.find_group_relationship(source, target, edge.relation, edge.kind)?
        {
            if other.id != id {
                return Err(ScholinkError::Storage(format!(
                    "re-pointing {id:?} would duplicate {:?}",
                    other.id
                )));
            }
        }
        self.unindex_group_relationship(&edge)?;
        let moved = GroupRelationship {
            source,
            target,
            ..edge
        };
        self.index_group_relationship(&moved)?;
        Ok(moved)
    }

    fn delete_group_relationship(&mut self, id: GroupRelationshipId) -> Result<(), ScholinkError> {
        let edge = self.require_group_relationship(id)?;
        self.unindex_group_relationship(&edge)
    }

    fn link_relationship(
        &mut self,
        relationship: RelationshipId,
        group_relationship: GroupRelationshipId,
    ) -> Result<(), ScholinkError> {
        self.require_group_relationship(group_relationship)?;
        self.relink(
            RELATIONSHIP_LINKS,
            GROUP_RELATIONSHIP_SUPPORT,
            relationship.0,
            group_relationship.0,
        )
    }

    fn unlink_relationship(&mut self, relationship: RelationshipId) -> Result<(), ScholinkError> {
        self.unlink(RELATIONSHIP_LINKS, GROUP_RELATIONSHIP_SUPPORT, relationship.0)
    }

    fn link_rollup(
        &mut self,
        group_relationship: GroupRelationshipId,
        rollup: GroupRelationshipId,
    ) -> Result<(), ScholinkError> {
        self.require_group_relationship(rollup)?;
        self.relink(ROLLUPS, ROLLUP_CHILDREN, group_relationship.0, rollup.0)
    }

    fn unlink_rollup(
        &mut self,
        group_relationship: GroupRelationshipId,
    ) -> Result<(), ScholinkError> {
        self.unlink(ROLLUPS, ROLLUP_CHILDREN, group_relationship.0)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open() -> (TempDir, RedbStore) {
        let dir = TempDir::new().expect("tempdir");
        let store = RedbStore::open(dir.path().join("scholink.redb")).expect("open");
        (dir, store)
    }

    #[test]
    fn committed_writes_are_visible_to_new_snapshots() {
        let (_dir, store) = open();
        let mut txn = store.begin().expect("begin");
        let a = txn.insert_identifier("10.1/a", "doi").expect("insert");
        let g = txn.insert_group(GroupType::Identity).expect("group");
        txn.link_identifier(a.id, g.id).expect("link");
        txn.commit().expect("commit");

        let snap = store.snapshot().expect("snapshot");
        assert_eq!(snap.find_identifier("10.1/a", "doi").expect("find"), Some(a.clone()));
        assert_eq!(snap.identity_group_of(a.id).expect("group"), Some(g.id));
        assert_eq!(snap.members_of(g.id).expect("members"), vec![a.id]);
    }

    #[test]
    fn dropped_transaction_aborts() {
        let (_dir, store) = open();
        {
            let mut txn = store.begin().expect("begin");
            txn.insert_identifier("A", "doi").expect("insert");
        }
        let snap = store.snapshot().expect("snapshot");
        assert_eq!(snap.count(Table::Identifiers).expect("count"), 0);
        assert_eq!(snap.sequences().expect("seq"), Sequences::default());
    }

    #[test]
    fn relink_moves_reverse_index() {
        let (_dir, store) = open();
        let mut txn = store.begin().expect("begin");
        let a = txn.insert_identifier("A", "doi").expect("insert");
        let b = txn.insert_identifier("B", "doi").expect("insert");
        let rel = txn
            .insert_relationship(a.id, Relation::Cites, b.id)
            .expect("rel");
        let g1 = txn.insert_group(GroupType::Identity).expect("group");
        let g2 = txn.insert_group(GroupType::Identity).expect("group");
        let e1 = txn
            .insert_group_relationship(g1.id, g2.id, Relation::Cites, GroupType::Identity)
            .expect("edge");
        let e2 = txn
            .insert_group_relationship(g2.id, g1.id, Relation::Cites, GroupType::Identity)
            .expect("edge");

        txn.link_relationship(rel.id, e1.id).expect("link");
        txn.link_relationship(rel.id, e2.id).expect("relink");

        assert!(txn.supporting_relationships(e1.id).expect("support").is_empty());
        assert_eq!(txn.supporting_relationships(e2.id).expect("support"), vec![rel.id]);
        assert_eq!(txn.relationships_to(b.id, Relation::Cites).expect("to"), vec![rel]);
    }

    #[test]
    fn repoint_updates_adjacency() {
        let (_dir, store) = open();
        let mut txn = store.begin().expect("begin");
        let g1 = txn.insert_group(GroupType::Version).expect("group");
        let g2 = txn.insert_group(GroupType::Version).expect("group");
        let g3 = txn.insert_group(GroupType::Version).expect("group");
        let edge = txn
            .insert_group_relationship(g1.id, g2.id, Relation::Cites, GroupType::Version)
            .expect("edge");

        let moved = txn
            .repoint_group_relationship(edge.id, g1.id, g3.id)
            .expect("repoint");
        txn.commit().expect("commit");

        let snap = store.snapshot().expect("snapshot");
        assert!(snap.group_relationships_to(g2.id).expect("to").is_empty());
        assert_eq!(snap.group_relationships_to(g3.id).expect("to"), vec![moved]);
        assert_eq!(
            snap.find_group_relationship(g1.id, g3.id, Relation::Cites, GroupType::Version)
                .expect("find"),
            Some(moved)
        );
        assert_eq!(snap.count_groups(GroupType::Version).expect("count"), 3);
    }

    #[test]
    fn events_round_trip_by_uuid() {
        let (_dir, store) = open();
        let record = EventRecord {
            id: Uuid::new_v4(),
            kind: crate::EventType::RelationshipCreated,
            creator: "acme".to_string(),
            source: "test".to_string(),
            time: Utc::now(),
            payload_count: 2,
        };
        let mut txn = store.begin().expect("begin");
        txn.insert_event(record.clone()).expect("event");
        txn.commit().expect("commit");

        let snap = store.snapshot().expect("snapshot");
        assert_eq!(snap.event(record.id).expect("event"), Some(record));
        assert_eq!(snap.event(Uuid::nil()).expect("event"), None);
    }
}
