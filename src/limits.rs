use crate::model::Ms;

const DAY_MS: Ms = 86_400_000;

/// 2000-01-01T00:00:00Z. Anything earlier is a client bug, not a booking.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 9999-12-31T00:00:00Z.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_214_400_000;

/// Longest single reservation a vehicle can be booked for.
pub const MAX_RESERVATION_DURATION_MS: Ms = 366 * DAY_MS;
/// Widest window accepted by the conflict/availability queries.
pub const MAX_QUERY_WINDOW_MS: Ms = 5 * 366 * DAY_MS;

pub const MAX_PURPOSE_LEN: usize = 512;
pub const MAX_NOTES_LEN: usize = 4096;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_ACTOR_LEN: usize = 128;

pub const MAX_VEHICLES_PER_FLEET: usize = 50_000;
pub const MAX_DRIVERS_PER_FLEET: usize = 50_000;
/// Non-terminal reservations per vehicle; completed, cancelled and rejected ones are free.
pub const MAX_OPEN_RESERVATIONS_PER_VEHICLE: usize = 100_000;

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 64;
