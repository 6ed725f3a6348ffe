use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::free_spans;
use super::conflict::validate_span;
use super::{Engine, EngineError, SharedBooking, SharedResourceState};

impl Engine {
    pub async fn resource_info(&self, resource_id: Ulid) -> Result<ResourceInfo, EngineError> {
        let rs = self.resource_or_not_found(resource_id)?;
        let guard = rs.read().await;
        Ok(ResourceInfo::from(&*guard))
    }

    pub async fn list_resources(&self) -> Vec<ResourceInfo> {
        let handles: Vec<SharedResourceState> =
            self.resources.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(handles.len());
        for rs in handles {
            out.push(ResourceInfo::from(&*rs.read().await));
        }
        out.sort_by_key(|r| r.id);
        out
    }

    /// Rate-sheet price for `option`, if the resource lists one.
    pub async fn price_for(&self, resource_id: Ulid, option: &str) -> Result<Option<Price>, EngineError> {
        let rs = self.resource_or_not_found(resource_id)?;
        let guard = rs.read().await;
        Ok(guard.rates.get(option.trim()).copied())
    }

    /// Free sub-intervals of `window` on the resource's calendar.
    pub async fn compute_availability(&self, resource_id: Ulid, window: Span) -> Result<Vec<Span>, EngineError> {
        validate_span(&window)?;
        if window.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let rs = self.resource_or_not_found(resource_id)?;
        let guard = rs.read().await;
        Ok(free_spans(&guard, &window))
    }

    pub async fn get_booking(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        let handle = self
            .get_booking_handle(&booking_id)
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        let booking = handle.read().await;
        Ok(booking.clone())
    }

    /// Bookings matching `filter`, newest first.
    pub async fn list_bookings(&self, filter: &BookingFilter) -> Vec<Booking> {
        let handles: Vec<SharedBooking> = self.bookings.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for handle in handles {
            let booking = handle.read().await;
            if filter.matches(&booking) {
                out.push(booking.clone());
            }
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        out
    }

    /// Counts and approved totals, across all resources or one.
    pub async fn booking_stats(&self, resource_id: Option<Ulid>) -> BookingStats {
        let filter = BookingFilter {
            resource_id,
            status: None,
        };
        let mut stats = BookingStats::default();
        for booking in self.list_bookings(&filter).await {
            stats.total += 1;
            match booking.status {
                BookingStatus::Pending => stats.pending += 1,
                BookingStatus::Rejected => stats.rejected += 1,
                BookingStatus::Approved => {
                    stats.approved += 1;
                    stats.approved_nights += booking.nights;
                    stats.approved_revenue = stats.approved_revenue.saturating_add(booking.total_price);
                }
            }
        }
        stats
    }
}
