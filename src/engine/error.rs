use std::fmt;

use serde::Serialize;
use thiserror::Error;
use ulid::Ulid;

use crate::model::{BookingStatus, Span};

/// Why a candidate range cannot be accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "range", rename_all = "snake_case")]
pub enum Inadmissible {
    /// The resource's kill switch is off.
    Disabled,
    /// Overlaps a committed range.
    Booked(Span),
    /// Overlaps a blackout window.
    Blackout(Span),
}

impl Inadmissible {
    pub fn label(&self) -> &'static str {
        match self {
            Inadmissible::Disabled => "disabled",
            Inadmissible::Booked(_) => "booked",
            Inadmissible::Blackout(_) => "blackout",
        }
    }
}

impl fmt::Display for Inadmissible {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Inadmissible::Disabled => f.write_str("resource is switched off"),
            Inadmissible::Booked(span) => write!(f, "overlaps booked range {span}"),
            Inadmissible::Blackout(span) => write!(f, "overlaps blackout {span}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(&'static str),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("resource {resource_id} unavailable: {reason}")]
    ResourceUnavailable { resource_id: Ulid, reason: Inadmissible },
    #[error("booking {booking_id} can no longer be approved: {reason}")]
    ResourceNoLongerAvailable { booking_id: Ulid, reason: Inadmissible },
    #[error("booking {id} is already {status}")]
    InvalidState { id: Ulid, status: BookingStatus },
    #[error("resource not found: {0}")]
    ResourceNotFound(Ulid),
    #[error("booking not found: {0}")]
    BookingNotFound(Ulid),
    #[error("resource already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("journal error: {0}")]
    Journal(String),
}

impl EngineError {
    /// Stable label for wire replies and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation_error",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::ResourceUnavailable { .. } => "resource_unavailable",
            EngineError::ResourceNoLongerAvailable { .. } => "resource_no_longer_available",
            EngineError::InvalidState { .. } => "invalid_state",
            EngineError::ResourceNotFound(_) | EngineError::BookingNotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::Journal(_) => "journal_error",
        }
    }
}
