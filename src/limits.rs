//! Hard limits enforced at the engine and wire boundaries.

pub const MAX_ROOMS: usize = 10_000;
pub const MAX_GUESTS: usize = 1_000_000;
pub const MAX_RESERVATIONS_PER_ROOM: usize = 100_000;

/// Highest nightly rate a room may carry.
pub const MAX_NIGHTLY_PRICE: i64 = 1_000_000;

/// Longest bookable stay in nights.
pub const MAX_STAY_NIGHTS: i64 = 30;

pub const MAX_ROOM_NUMBER_LEN: usize = 16;
pub const MAX_ROOM_TYPE_LEN: usize = 64;
pub const MAX_NAME_LEN: usize = 128;
pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_CONTACT_LEN: usize = 256;

/// Upper bound on ids or types listed in a single search filter.
pub const MAX_FILTER_ITEMS: usize = 1_000;

/// Largest encoded journal record. A longer length prefix on replay is corruption.
pub const MAX_EVENT_BYTES: usize = 1024 * 1024;

/// Longest accepted request line on a session, in bytes.
pub const MAX_REQUEST_LINE_LEN: usize = 64 * 1024;
