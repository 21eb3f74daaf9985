//! # Ingestor Module
//!
//! Relationship ingestion pipeline.
//!
//! - One validated [`Event`] is applied inside one store transaction
//! - Created payloads record a claim and fold newly active relationships
//! - Deleted payloads retract a claim and unfold relationships left with none
//! - Redelivered events are detected by id and skipped
//!
//! The caller owns the transaction: an `Err` from [`Ingestor::ingest_event`]
//! means the transaction must be dropped, not committed.

use crate::event::{ClaimedRelationship, Event};
use crate::grouping::GroupingEngine;
use crate::store::StoreWrite;
use crate::{EventType, Retraction, ScholinkError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What one applied event changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub event: Uuid,
    pub payloads: usize,
    /// Relationships seen for the first time.
    pub relationships_created: usize,
    pub claims_recorded: usize,
    pub retractions_recorded: usize,
    /// Relationships that became active and were folded into groups.
    pub folded: usize,
    /// Relationships that lost their last live claim.
    pub unfolded: usize,
}

/// Result of ingesting one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IngestOutcome {
    Applied(IngestReport),
    /// The event id was already recorded; nothing was written.
    Duplicate(Uuid),
}

impl IngestOutcome {
    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        matches!(self, IngestOutcome::Duplicate(_))
    }
}

/// The Ingestor applies validated events to a store.
pub struct Ingestor;

impl Ingestor {
    /// Apply one event. Payloads are applied in order; the first failure
    /// aborts the whole event.
    pub fn ingest_event<S: StoreWrite>(
        store: &mut S,
        event: &Event,
    ) -> Result<IngestOutcome, ScholinkError> {
        if store.event(event.id)?.is_some() {
            tracing::debug!(event = %event.id, "skipping already ingested event");
            return Ok(IngestOutcome::Duplicate(event.id));
        }

        let mut report = IngestReport {
            event: event.id,
            payloads: event.payloads.len(),
            ..IngestReport::default()
        };

        for claim in &event.payloads {
            match event.kind {
                EventType::RelationshipCreated => {
                    Self::apply_created(store, event, claim, &mut report)?;
                }
                EventType::RelationshipDeleted => {
                    Self::apply_deleted(store, event, claim, &mut report)?;
                }
            }
        }

        store.insert_event(event.record())?;

        tracing::debug!(
            event = %event.id,
            kind = ?event.kind,
            payloads = report.payloads,
            folded = report.folded,
            unfolded = report.unfolded,
            "ingested event"
        );
        Ok(IngestOutcome::Applied(report))
    }

    fn apply_created<S: StoreWrite>(
        store: &mut S,
        event: &Event,
        claim: &ClaimedRelationship,
        report: &mut IngestReport,
    ) -> Result<(), ScholinkError> {
        let (source, _) = GroupingEngine::resolve_or_create(store, &claim.source)?;
        let (target, _) = GroupingEngine::resolve_or_create(store, &claim.target)?;

        let relationship = match store.find_relationship(source.id, claim.relation, target.id)? {
            Some(existing) => existing,
            None => {
                report.relationships_created += 1;
                store.insert_relationship(source.id, claim.relation, target.id)?
            }
        };

        let was_active = store.is_active(relationship.id)?;
        store.insert_claim(relationship.id, event.id, &event.creator, event.time)?;
        report.claims_recorded += 1;

        if !was_active {
            GroupingEngine::fold_relationship(store, &relationship)?;
            report.folded += 1;
        }
        Ok(())
    }

    fn apply_deleted<S: StoreWrite>(
        store: &mut S,
        event: &Event,
        claim: &ClaimedRelationship,
        report: &mut IngestReport,
    ) -> Result<(), ScholinkError> {
        let not_found = || ScholinkError::ClaimNotFound {
            creator: event.creator.clone(),
            source_value: claim.source.value.clone(),
            relation: claim.relation,
            target_value: claim.target.value.clone(),
        };

        let source = store
            .find_identifier(&claim.source.value, &claim.source.scheme)?
            .ok_or_else(not_found)?;
        let target = store
            .find_identifier(&claim.target.value, &claim.target.scheme)?
            .ok_or_else(not_found)?;
        let relationship = store
            .find_relationship(source.id, claim.relation, target.id)?
            .ok_or_else(not_found)?;

        let live = store.live_claims(relationship.id)?;
        // Most recent live claim of the same creator.
        let retracted = live
            .iter()
            .filter(|c| c.creator == event.creator)
            .max_by_key(|c| c.id)
            .ok_or_else(not_found)?;

        store.insert_retraction(Retraction {
            claim: retracted.id,
            event: event.id,
            time: event.time,
        })?;
        report.retractions_recorded += 1;

        if live.len() == 1 {
            GroupingEngine::unfold_relationship(store, &relationship)?;
            report.unfolded += 1;
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
