/// Hard caps on what a single engine accepts.
pub const MAX_ITEMS: usize = 100_000;
pub const MAX_RESERVATIONS: usize = 1_000_000;
pub const MAX_LINE_ITEMS: usize = 256;
pub const MAX_PAYMENTS_PER_RESERVATION: usize = 1_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_UNIT_LEN: usize = 32;
pub const MAX_CUSTOMER_LEN: usize = 256;
pub const MAX_NOTES_LEN: usize = 8_192;

/// Longest range the day-by-day evaluator will walk (roughly five years).
pub const MAX_RANGE_DAYS: i64 = 5 * 366;
