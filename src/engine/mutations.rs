use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use tokio::sync::{oneshot, RwLock};
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::validate_span;
use super::lifecycle::normalize_notes;
use super::{Engine, EngineError, JournalCommand, SharedBooking, SharedResourceState};

impl Engine {
    pub async fn create_resource(
        &self,
        id: Ulid,
        name: Option<String>,
        contact_email: Option<String>,
    ) -> Result<(), EngineError> {
        if self.resources.len() >= MAX_RESOURCES {
            return Err(EngineError::LimitExceeded("too many resources"));
        }
        if name.as_ref().is_some_and(|n| n.len() > MAX_NAME_LEN) {
            return Err(EngineError::LimitExceeded("resource name too long"));
        }
        if let Some(ref email) = contact_email {
            if email.len() > MAX_GUEST_FIELD_LEN {
                return Err(EngineError::LimitExceeded("contact email too long"));
            }
            if !email.contains('@') {
                return Err(EngineError::Validation("contact email is invalid"));
            }
        }

        let _gate = self.compaction_gate.read().await;
        let event = Event::ResourceCreated {
            id,
            name: name.clone(),
            contact_email: contact_email.clone(),
        };
        let rs: SharedResourceState = Arc::new(RwLock::new(ResourceState::new(id, name, contact_email)));
        // Publish locked so nobody reads the record before it is durable.
        let guard = rs.clone().write_owned().await;
        match self.resources.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(rs);
            }
        }
        if let Err(e) = self.journal_append(&event).await {
            self.resources.remove(&id);
            return Err(e);
        }
        drop(guard);
        info!(resource = %id, "resource created");
        Ok(())
    }

    /// Upsert one entry of the resource's rate sheet.
    pub async fn set_rate(
        &self,
        resource_id: Ulid,
        option: &str,
        price_per_night: Price,
    ) -> Result<(), EngineError> {
        let option = option.trim();
        if option.is_empty() {
            return Err(EngineError::Validation("booking option is required"));
        }
        if option.len() > MAX_OPTION_LEN {
            return Err(EngineError::LimitExceeded("booking option too long"));
        }
        let _gate = self.compaction_gate.read().await;
        let rs = self.resource_or_not_found(resource_id)?;
        let mut guard = rs.write().await;
        let event = Event::RateSet {
            resource_id,
            option: option.to_string(),
            price_per_night,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Flip the kill switch. Committed and blackout ranges are untouched, and
    /// already-approved bookings stay approved.
    pub async fn toggle_availability(
        &self,
        resource_id: Ulid,
        is_available: bool,
        message: Option<String>,
    ) -> Result<(), EngineError> {
        let note = normalize_notes(message)?;
        let _gate = self.compaction_gate.read().await;
        let rs = self.resource_or_not_found(resource_id)?;
        let mut guard = rs.write().await;
        let event = Event::AvailabilityToggled {
            resource_id,
            is_available,
            note,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(resource = %resource_id, is_available, "availability switched");
        Ok(())
    }

    /// Add a blackout window.
    ///
    /// Existing blackouts and committed ranges are not checked; the outcome
    /// lists every committed range the window covers so the caller can flag it.
    pub async fn manually_block(
        &self,
        resource_id: Ulid,
        span: Span,
        reason: Option<String>,
    ) -> Result<BlockOutcome, EngineError> {
        validate_span(&span)?;
        let reason = normalize_notes(reason)?;
        let _gate = self.compaction_gate.read().await;
        let rs = self.resource_or_not_found(resource_id)?;
        let mut guard = rs.write().await;
        if guard.range_count() >= MAX_RANGES_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many ranges on resource"));
        }

        let outcome = BlockOutcome {
            overlapping_booked: guard.booked_overlapping(&span).copied().collect(),
        };
        if !outcome.overlapping_booked.is_empty() {
            warn!(
                resource = %resource_id,
                %span,
                covered = outcome.overlapping_booked.len(),
                "blackout covers approved stays"
            );
        }

        let event = Event::BlackoutAdded {
            resource_id,
            span,
            reason,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(resource = %resource_id, %span, "dates blocked");
        Ok(outcome)
    }

    /// Remove blackouts whose bounds equal `span` exactly. Returns how many
    /// were removed; zero matches writes nothing.
    pub async fn unblock(&self, resource_id: Ulid, span: Span) -> Result<usize, EngineError> {
        validate_span(&span)?;
        let _gate = self.compaction_gate.read().await;
        let rs = self.resource_or_not_found(resource_id)?;
        let mut guard = rs.write().await;
        let matching = guard.blackouts.iter().filter(|b| b.span == span).count();
        if matching == 0 {
            return Ok(0);
        }
        let event = Event::BlackoutRemoved { resource_id, span };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(resource = %resource_id, %span, removed = matching, "dates unblocked");
        Ok(matching)
    }

    /// Recompute the derived status of every resource. Not journaled; status
    /// is a pure function of the stored ranges and the clock.
    pub async fn refresh_statuses(&self, now: Ms) -> usize {
        let handles: Vec<SharedResourceState> =
            self.resources.iter().map(|e| e.value().clone()).collect();
        let mut changed = 0;
        for rs in handles {
            if rs.write().await.refresh_status(now) {
                changed += 1;
            }
        }
        changed
    }

    /// Rewrite the journal with only the records needed to recreate the
    /// current state.
    pub async fn compact_journal(&self) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.write().await;
        let mut events = Vec::new();

        let resources: Vec<SharedResourceState> =
            self.resources.iter().map(|e| e.value().clone()).collect();
        let bookings: Vec<SharedBooking> =
            self.bookings.iter().map(|e| e.value().clone()).collect();

        let mut resource_snapshots = Vec::with_capacity(resources.len());
        for rs in resources {
            resource_snapshots.push(rs.read().await.clone());
        }
        resource_snapshots.sort_by_key(|rs| rs.id);
        for rs in &resource_snapshots {
            events.push(Event::ResourceCreated {
                id: rs.id,
                name: rs.name.clone(),
                contact_email: rs.contact_email.clone(),
            });
            for (option, price) in &rs.rates {
                events.push(Event::RateSet {
                    resource_id: rs.id,
                    option: option.clone(),
                    price_per_night: *price,
                });
            }
            if !rs.is_available || rs.availability_note.is_some() {
                events.push(Event::AvailabilityToggled {
                    resource_id: rs.id,
                    is_available: rs.is_available,
                    note: rs.availability_note.clone(),
                });
            }
            for blackout in &rs.blackouts {
                events.push(Event::BlackoutAdded {
                    resource_id: rs.id,
                    span: blackout.span,
                    reason: blackout.reason.clone(),
                });
            }
        }

        let mut booking_snapshots = Vec::with_capacity(bookings.len());
        for b in bookings {
            booking_snapshots.push(b.read().await.clone());
        }
        booking_snapshots.sort_by_key(|b| (b.created_at, b.id));
        for b in booking_snapshots {
            let decision = match b.status {
                BookingStatus::Pending => None,
                BookingStatus::Approved => Some(Event::BookingApproved {
                    booking_id: b.id,
                    resource_id: b.resource_id,
                    span: b.span,
                    at: b.approved_at.unwrap_or(b.created_at),
                    admin_notes: b.admin_notes.clone(),
                }),
                BookingStatus::Rejected => Some(Event::BookingRejected {
                    booking_id: b.id,
                    resource_id: b.resource_id,
                    at: b.rejected_at.unwrap_or(b.created_at),
                    reason: b.admin_notes.clone().unwrap_or_default(),
                }),
            };
            let pending = Booking {
                status: BookingStatus::Pending,
                approved_at: None,
                rejected_at: None,
                admin_notes: None,
                ..b
            };
            events.push(Event::BookingCreated {
                booking: Box::new(pending),
            });
            events.extend(decision);
        }

        let records = events.len();
        let (tx, rx) = oneshot::channel();
        self.journal_tx
            .send(JournalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Journal("journal writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Journal("journal writer dropped response".into()))?
            .map_err(|e| EngineError::Journal(e.to_string()))?;
        info!(records, "journal compacted");
        Ok(())
    }

    pub async fn journal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .journal_tx
            .send(JournalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
