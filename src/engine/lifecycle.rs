use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{BOOKINGS_CREATED_TOTAL, BOOKINGS_REFUSED_TOTAL, DECISIONS_TOTAL};

use super::conflict::{check_admissible, now_ms, validate_span};
use super::{apply_to_booking, Engine, EngineError, Inadmissible};

fn required_field(value: &str, missing: &'static str) -> Result<String, EngineError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(EngineError::Validation(missing));
    }
    if value.len() > MAX_GUEST_FIELD_LEN {
        return Err(EngineError::LimitExceeded("guest field too long"));
    }
    Ok(value.to_string())
}

/// Trim free-form admin text; blank becomes `None`.
pub(super) fn normalize_notes(notes: Option<String>) -> Result<Option<String>, EngineError> {
    let Some(notes) = notes else { return Ok(None) };
    let notes = notes.trim();
    if notes.len() > MAX_NOTES_LEN {
        return Err(EngineError::LimitExceeded("notes too long"));
    }
    Ok((!notes.is_empty()).then(|| notes.to_string()))
}

/// Validate a guest request and return its normalized guest info and stay.
fn validate_request(req: &BookingRequest) -> Result<(GuestInfo, Span), EngineError> {
    let guest = GuestInfo {
        full_name: required_field(&req.guest.full_name, "guest name is required")?,
        email: required_field(&req.guest.email, "guest email is required")?,
        phone: required_field(&req.guest.phone, "guest phone is required")?,
        id_photo: req.guest.id_photo.clone(),
    };
    if !guest.email.contains('@') {
        return Err(EngineError::Validation("guest email is invalid"));
    }
    if req.option.trim().is_empty() {
        return Err(EngineError::Validation("booking option is required"));
    }
    if req.option.len() > MAX_OPTION_LEN {
        return Err(EngineError::LimitExceeded("booking option too long"));
    }
    if req.guests == 0 {
        return Err(EngineError::Validation("number of guests must be positive"));
    }
    if req.guests > MAX_GUESTS {
        return Err(EngineError::LimitExceeded("too many guests"));
    }
    let span = Span::from_dates(req.check_in, req.check_out)
        .ok_or(EngineError::Validation("check-out must be after check-in"))?;
    validate_span(&span)?;
    if span.whole_days() > MAX_STAY_NIGHTS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok((guest, span))
}

impl Engine {
    /// Admit or refuse a guest request.
    ///
    /// An admitted request is persisted as a pending booking; the calendar is
    /// not touched until approval. A refused request persists nothing.
    pub async fn create_booking(&self, req: BookingRequest) -> Result<Booking, EngineError> {
        let (guest, span) = validate_request(&req)?;
        let nights = span.whole_days();
        let total_price = req
            .price_per_night
            .checked_mul(nights as Price)
            .ok_or(EngineError::Validation("total price overflows"))?;
        if self.bookings.len() >= MAX_BOOKINGS {
            return Err(EngineError::LimitExceeded("too many bookings"));
        }

        let _gate = self.compaction_gate.read().await;
        let rs = self.resource_or_not_found(req.resource_id)?;
        let contact = {
            let guard = rs.read().await;
            if let Err(reason) = check_admissible(&guard, &span) {
                metrics::counter!(BOOKINGS_REFUSED_TOTAL, "reason" => reason.label()).increment(1);
                info!(resource = %req.resource_id, %span, "booking refused: {reason}");
                return Err(EngineError::ResourceUnavailable {
                    resource_id: req.resource_id,
                    reason,
                });
            }
            guard.contact_email.clone()
        };

        let booking = Booking {
            id: Ulid::new(),
            resource_id: req.resource_id,
            guest,
            span,
            nights,
            guests: req.guests,
            option: req.option.trim().to_string(),
            price_per_night: req.price_per_night,
            total_price,
            status: BookingStatus::Pending,
            created_at: now_ms(),
            approved_at: None,
            rejected_at: None,
            admin_notes: None,
        };
        self.journal_append(&Event::BookingCreated {
            booking: Box::new(booking.clone()),
        })
        .await?;
        self.bookings
            .insert(booking.id, Arc::new(RwLock::new(booking.clone())));

        metrics::counter!(BOOKINGS_CREATED_TOTAL).increment(1);
        info!(booking = %booking.id, resource = %booking.resource_id, %span, "booking pending");
        self.notify.booking_received(&booking, contact.as_deref());
        Ok(booking)
    }

    /// Approve a pending booking, committing its range to the resource.
    ///
    /// A snapshot check refuses early without the write lock. The check is
    /// then repeated under the resource write lock, and that verdict decides:
    /// concurrent writes elsewhere on the calendar never refuse free dates.
    pub async fn approve_booking(
        &self,
        booking_id: Ulid,
        admin_notes: Option<String>,
    ) -> Result<Booking, EngineError> {
        let admin_notes = normalize_notes(admin_notes)?;

        let _gate = self.compaction_gate.read().await;
        let handle = self
            .get_booking_handle(&booking_id)
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        let mut booking = handle.write().await;
        if !booking.is_pending() {
            return Err(EngineError::InvalidState {
                id: booking_id,
                status: booking.status,
            });
        }
        let (resource_id, span) = (booking.resource_id, booking.span);
        let rs = self.resource_or_not_found(resource_id)?;

        let no_longer_available = |reason: Inadmissible| {
            info!(booking = %booking_id, %span, "approval refused: {reason}");
            EngineError::ResourceNoLongerAvailable { booking_id, reason }
        };

        let seen_version = {
            let snapshot = rs.read().await;
            check_admissible(&snapshot, &span).map_err(no_longer_available)?;
            snapshot.version
        };
        let at = now_ms();
        let event = self
            .run_transaction(&rs, seen_version, |current| {
                check_admissible(current, &span).map_err(no_longer_available)?;
                Ok(Event::BookingApproved {
                    booking_id,
                    resource_id,
                    span,
                    at,
                    admin_notes,
                })
            })
            .await?;

        apply_to_booking(&mut booking, &event);
        let approved = booking.clone();
        drop(booking);

        metrics::counter!(DECISIONS_TOTAL, "decision" => "approved").increment(1);
        info!(booking = %booking_id, resource = %resource_id, %span, "booking approved");
        self.notify.booking_approved(&approved);
        Ok(approved)
    }

    /// Reject a pending booking. `reason` is required and becomes the admin notes.
    pub async fn reject_booking(&self, booking_id: Ulid, reason: &str) -> Result<Booking, EngineError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(EngineError::Validation("rejection reason is required"));
        }
        if reason.len() > MAX_NOTES_LEN {
            return Err(EngineError::LimitExceeded("notes too long"));
        }

        let _gate = self.compaction_gate.read().await;
        let handle = self
            .get_booking_handle(&booking_id)
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        let mut booking = handle.write().await;
        if !booking.is_pending() {
            return Err(EngineError::InvalidState {
                id: booking_id,
                status: booking.status,
            });
        }

        let event = Event::BookingRejected {
            booking_id,
            resource_id: booking.resource_id,
            at: now_ms(),
            reason: reason.to_string(),
        };
        self.journal_append(&event).await?;
        apply_to_booking(&mut booking, &event);
        let rejected = booking.clone();
        drop(booking);

        metrics::counter!(DECISIONS_TOTAL, "decision" => "rejected").increment(1);
        info!(booking = %booking_id, "booking rejected");
        self.notify.booking_rejected(&rejected);
        Ok(rejected)
    }
}
