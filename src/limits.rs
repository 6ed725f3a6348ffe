use crate::model::Ms;

pub const MAX_RESOURCES: usize = 10_000;
pub const MAX_RANGES_PER_RESOURCE: usize = 10_000;
pub const MAX_BOOKINGS: usize = 1_000_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_GUEST_FIELD_LEN: usize = 256;
pub const MAX_OPTION_LEN: usize = 64;
pub const MAX_NOTES_LEN: usize = 2_000;

pub const MAX_STAY_NIGHTS: i64 = 366;
pub const MAX_GUESTS: u32 = 64;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Widest window accepted by availability calendar queries (two years).
pub const MAX_QUERY_WINDOW_MS: Ms = 2 * 366 * crate::model::DAY_MS;

pub const MAX_LINE_LEN: usize = 64 * 1024;
