use crate::limits::*;
use crate::model::*;

use super::{EngineError, Inadmissible};

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as Ms)
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start >= span.end {
        return Err(EngineError::Validation("range end must be after its start"));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

/// Decide whether `candidate` can be accepted on the resource snapshot `rs`.
///
/// Checks run in order: kill switch, committed ranges, blackout windows. The
/// first failing check names the reason.
pub fn check_admissible(rs: &ResourceState, candidate: &Span) -> Result<(), Inadmissible> {
    if !rs.is_available {
        return Err(Inadmissible::Disabled);
    }
    if let Some(booked) = rs.booked_overlapping(candidate).next() {
        return Err(Inadmissible::Booked(*booked));
    }
    if let Some(blackout) = rs.blackouts_overlapping(candidate).next() {
        return Err(Inadmissible::Blackout(blackout.span));
    }
    Ok(())
}

pub fn is_admissible(rs: &ResourceState, candidate: &Span) -> bool {
    check_admissible(rs, candidate).is_ok()
}
