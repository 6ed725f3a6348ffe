use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds (UTC) — the only instant type.
pub type Ms = i64;

/// Price in minor currency units.
pub type Price = u64;

pub const DAY_MS: Ms = 86_400_000;

/// Instant of UTC midnight starting `date`.
pub fn date_to_ms(date: NaiveDate) -> Ms {
    date.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}

/// Calendar date (UTC) containing instant `t`.
pub fn ms_to_date(t: Ms) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(t).map(|dt| dt.date_naive())
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Checked constructor for untrusted input.
    pub fn try_new(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    /// Stay from check-in date to check-out date, both at UTC midnight.
    pub fn from_dates(check_in: NaiveDate, check_out: NaiveDate) -> Option<Self> {
        Self::try_new(date_to_ms(check_in), date_to_ms(check_out))
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Number of whole days (nights) covered.
    pub fn whole_days(&self) -> i64 {
        self.duration_ms() / DAY_MS
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (ms_to_date(self.start), ms_to_date(self.end)) {
            (Some(s), Some(e)) if self.start % DAY_MS == 0 && self.end % DAY_MS == 0 => {
                write!(f, "{s}..{e}")
            }
            _ => write!(f, "[{}, {})", self.start, self.end),
        }
    }
}

/// Coarse, derived view of a resource at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Available,
    Booked,
    Maintenance,
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResourceStatus::Available => "available",
            ResourceStatus::Booked => "booked",
            ResourceStatus::Maintenance => "maintenance",
        })
    }
}

/// Administrator-imposed window during which the resource cannot be booked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blackout {
    pub span: Span,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResourceState {
    pub id: Ulid,
    pub name: Option<String>,
    /// Recipient for "booking received" notifications.
    pub contact_email: Option<String>,
    /// Kill switch. Orthogonal to `status`.
    pub is_available: bool,
    pub availability_note: Option<String>,
    /// Derived from `booked`/`blackouts` at the last refresh. Not authoritative.
    pub status: ResourceStatus,
    /// Committed ranges of approved bookings, sorted by `start`.
    pub booked: Vec<Span>,
    /// Blackout windows, sorted by `span.start`.
    pub blackouts: Vec<Blackout>,
    /// Rate sheet: booking option tag → price per night.
    pub rates: BTreeMap<String, Price>,
    /// Bumped on every applied mutation; the optimistic concurrency token.
    pub version: u64,
}

impl ResourceState {
    pub fn new(id: Ulid, name: Option<String>, contact_email: Option<String>) -> Self {
        Self {
            id,
            name,
            contact_email,
            is_available: true,
            availability_note: None,
            status: ResourceStatus::Available,
            booked: Vec::new(),
            blackouts: Vec::new(),
            rates: BTreeMap::new(),
            version: 0,
        }
    }

    pub fn range_count(&self) -> usize {
        self.booked.len() + self.blackouts.len()
    }

    /// Insert a committed range maintaining sort order.
    pub fn insert_booked(&mut self, span: Span) {
        let pos = self.booked.partition_point(|s| s.start <= span.start);
        self.booked.insert(pos, span);
    }

    /// Insert a blackout maintaining sort order. Duplicates are kept.
    pub fn insert_blackout(&mut self, blackout: Blackout) {
        let pos = self
            .blackouts
            .partition_point(|b| b.span.start <= blackout.span.start);
        self.blackouts.insert(pos, blackout);
    }

    /// Remove every blackout whose bounds equal `span` exactly.
    pub fn remove_blackouts_matching(&mut self, span: &Span) -> usize {
        let before = self.blackouts.len();
        self.blackouts.retain(|b| b.span != *span);
        before - self.blackouts.len()
    }

    pub fn booked_overlapping<'a>(&'a self, query: &'a Span) -> impl Iterator<Item = &'a Span> + 'a {
        // Everything at index >= right_bound starts at or after query.end.
        let right_bound = self.booked.partition_point(|s| s.start < query.end);
        self.booked[..right_bound]
            .iter()
            .filter(move |s| s.end > query.start)
    }

    pub fn blackouts_overlapping<'a>(&'a self, query: &'a Span) -> impl Iterator<Item = &'a Blackout> + 'a {
        let right_bound = self.blackouts.partition_point(|b| b.span.start < query.end);
        self.blackouts[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }

    pub fn derive_status(&self, now: Ms) -> ResourceStatus {
        if self.booked.iter().any(|s| s.contains_instant(now)) {
            ResourceStatus::Booked
        } else if self.blackouts.iter().any(|b| b.span.contains_instant(now)) {
            ResourceStatus::Maintenance
        } else {
            ResourceStatus::Available
        }
    }

    /// Recompute `status`; returns true if it changed.
    pub fn refresh_status(&mut self, now: Ms) -> bool {
        let status = self.derive_status(now);
        let changed = status != self.status;
        self.status = status;
        changed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Approved => "approved",
            BookingStatus::Rejected => "rejected",
        })
    }
}

/// Location of an uploaded identification photo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRef {
    pub url: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestInfo {
    pub full_name: String,
    pub email: String,
    pub phone: String,
    #[serde(default)]
    pub id_photo: Option<BlobRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub guest: GuestInfo,
    pub span: Span,
    pub nights: i64,
    pub guests: u32,
    pub option: String,
    pub price_per_night: Price,
    pub total_price: Price,
    pub status: BookingStatus,
    pub created_at: Ms,
    pub approved_at: Option<Ms>,
    pub rejected_at: Option<Ms>,
    pub admin_notes: Option<String>,
}

impl Booking {
    pub fn check_in(&self) -> Option<NaiveDate> {
        ms_to_date(self.span.start)
    }

    pub fn check_out(&self) -> Option<NaiveDate> {
        ms_to_date(self.span.end)
    }

    pub fn is_pending(&self) -> bool {
        self.status == BookingStatus::Pending
    }
}

/// Guest-submitted reservation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub resource_id: Ulid,
    pub guest: GuestInfo,
    pub option: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub guests: u32,
    pub price_per_night: Price,
}

/// The journal record types — flat, one record per committed mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourceCreated {
        id: Ulid,
        name: Option<String>,
        contact_email: Option<String>,
    },
    RateSet {
        resource_id: Ulid,
        option: String,
        price_per_night: Price,
    },
    AvailabilityToggled {
        resource_id: Ulid,
        is_available: bool,
        note: Option<String>,
    },
    BlackoutAdded {
        resource_id: Ulid,
        span: Span,
        reason: Option<String>,
    },
    BlackoutRemoved {
        resource_id: Ulid,
        span: Span,
    },
    BookingCreated {
        booking: Box<Booking>,
    },
    /// Commits `span` to the resource and approves the booking in one record.
    BookingApproved {
        booking_id: Ulid,
        resource_id: Ulid,
        span: Span,
        at: Ms,
        admin_notes: Option<String>,
    },
    BookingRejected {
        booking_id: Ulid,
        resource_id: Ulid,
        at: Ms,
        reason: String,
    },
}

impl Event {
    /// Resource whose availability record this event mutates, if any.
    pub fn mutated_resource(&self) -> Option<Ulid> {
        match self {
            Event::RateSet { resource_id, .. }
            | Event::AvailabilityToggled { resource_id, .. }
            | Event::BlackoutAdded { resource_id, .. }
            | Event::BlackoutRemoved { resource_id, .. }
            | Event::BookingApproved { resource_id, .. } => Some(*resource_id),
            Event::ResourceCreated { .. }
            | Event::BookingCreated { .. }
            | Event::BookingRejected { .. } => None,
        }
    }

    /// Booking whose record this event decides, if any.
    pub fn decided_booking(&self) -> Option<Ulid> {
        match self {
            Event::BookingApproved { booking_id, .. } | Event::BookingRejected { booking_id, .. } => {
                Some(*booking_id)
            }
            _ => None,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceInfo {
    pub id: Ulid,
    pub name: Option<String>,
    pub contact_email: Option<String>,
    pub is_available: bool,
    pub availability_note: Option<String>,
    pub status: ResourceStatus,
    pub booked_dates: Vec<Span>,
    pub blackout_dates: Vec<Blackout>,
    pub rates: BTreeMap<String, Price>,
}

impl From<&ResourceState> for ResourceInfo {
    fn from(rs: &ResourceState) -> Self {
        Self {
            id: rs.id,
            name: rs.name.clone(),
            contact_email: rs.contact_email.clone(),
            is_available: rs.is_available,
            availability_note: rs.availability_note.clone(),
            status: rs.status,
            booked_dates: rs.booked.clone(),
            blackout_dates: rs.blackouts.clone(),
            rates: rs.rates.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BookingFilter {
    pub resource_id: Option<Ulid>,
    pub status: Option<BookingStatus>,
}

impl BookingFilter {
    pub fn matches(&self, booking: &Booking) -> bool {
        self.resource_id.is_none_or(|rid| rid == booking.resource_id)
            && self.status.is_none_or(|s| s == booking.status)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BookingStats {
    pub total: usize,
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
    pub approved_nights: i64,
    pub approved_revenue: Price,
}

/// Result of a manual block. Lists committed ranges the new blackout covers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BlockOutcome {
    pub overlapping_booked: Vec<Span>,
}
