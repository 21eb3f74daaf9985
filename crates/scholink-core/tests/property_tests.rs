//! # Property-Based Tests
//!
//! Random claim streams must keep every structural invariant, and the result
//! must not depend on the backend or on how claims are split into events.

use proptest::collection::vec;
use proptest::prelude::*;
use scholink_core::{
    Broker, CitationQuery, EventType, GroupType, IdentifierRef, RawEvent, StoreRead, Table,
};

const RELATIONS: &[&str] = &[
    "Cites",
    "IsCitedBy",
    "References",
    "IsSupplementTo",
    "HasVersion",
    "IsVersionOf",
    "HasPart",
    "IsIdenticalTo",
    "Documents",
];

/// `(source, relation index, target)` over a small alphabet so merges and
/// collapses actually happen.
fn claims() -> impl Strategy<Value = Vec<(u8, usize, u8)>> {
    vec((0u8..8, 0..RELATIONS.len(), 0u8..8), 1..24)
}

fn value(n: u8) -> String {
    format!("10.1234/w{n}")
}

fn event(kind: EventType, claims: &[(u8, usize, u8)]) -> RawEvent {
    claims.iter().fold(RawEvent::new(kind, "acme"), |raw, (s, r, t)| {
        raw.with_payload(&value(*s), RELATIONS[*r], &value(*t))
    })
}

/// Structure that does not depend on event ids or timestamps.
fn structure(broker: &Broker) -> impl PartialEq + std::fmt::Debug {
    let canonical = broker.canonical().expect("canonical");
    (
        canonical.identifiers,
        canonical.groups,
        canonical.identifier_links,
        canonical.subgroup_links,
        canonical.relationships,
        canonical.group_relationships,
        canonical.relationship_links,
        canonical.rollup_links,
    )
}

proptest! {
    /// Any stream of claims leaves a consistent store.
    #[test]
    fn invariants_hold_for_any_claim_stream(claims in claims()) {
        let broker = Broker::in_memory().expect("broker");
        for claim in &claims {
            broker.ingest_raw(&event(EventType::RelationshipCreated, &[*claim])).expect("ingest");
        }

        let violations = broker.verify().expect("verify");
        prop_assert!(violations.is_empty(), "violations: {:?}", violations);

        let (identifiers, links, subgroups, identity) = broker
            .read(|store| {
                Ok((
                    store.count(Table::Identifiers)?,
                    store.count(Table::IdentifierLinks)?,
                    store.count(Table::SubgroupLinks)?,
                    store.count_groups(GroupType::Identity)?,
                ))
            })
            .expect("counts");
        prop_assert_eq!(identifiers, links);
        prop_assert_eq!(subgroups, identity);
    }

    /// One event or one event per claim produce the same structure.
    #[test]
    fn batching_does_not_change_structure(claims in claims()) {
        let single = Broker::in_memory().expect("broker");
        single.ingest_raw(&event(EventType::RelationshipCreated, &claims)).expect("ingest");

        let split = Broker::in_memory().expect("broker");
        for claim in &claims {
            split.ingest_raw(&event(EventType::RelationshipCreated, &[*claim])).expect("ingest");
        }

        prop_assert_eq!(structure(&single), structure(&split));
    }

    /// The redb backend builds exactly what the in-memory backend builds.
    #[test]
    fn backends_agree(claims in claims()) {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let memory = Broker::in_memory().expect("broker");
        let redb = Broker::with_redb(dir.path().join("p.redb")).expect("broker");

        for claim in &claims {
            let raw = event(EventType::RelationshipCreated, &[*claim]);
            memory.ingest_raw(&raw).expect("memory");
            redb.ingest_raw(&raw).expect("redb");
        }

        prop_assert_eq!(
            memory.export_canonical().expect("export"),
            redb.export_canonical().expect("export")
        );
    }

    /// Retracting every claim leaves no edges and no citations.
    #[test]
    fn retracting_everything_clears_edges(claims in claims()) {
        let broker = Broker::in_memory().expect("broker");
        for claim in &claims {
            broker.ingest_raw(&event(EventType::RelationshipCreated, &[*claim])).expect("ingest");
        }
        for claim in &claims {
            broker.ingest_raw(&event(EventType::RelationshipDeleted, &[*claim])).expect("retract");
        }

        let edges = broker.read(|store| store.count(Table::GroupRelationships)).expect("count");
        prop_assert_eq!(edges, 0);
        prop_assert!(broker.verify().expect("verify").is_empty());

        for claim in &claims {
            let citations = broker
                .get_citations(&IdentifierRef::new(value(claim.2), "doi"), CitationQuery::default())
                .expect("query");
            prop_assert!(citations.is_empty());
        }
    }
}
