use crate::model::Minutes;

/// Bookable slot granularity.
pub const SLOT_MINUTES: Minutes = 30;

/// How far the availability resolver walks forward, in days.
pub const LOOKAHEAD_DAYS: usize = 365;

/// How many qualifying days the resolver collects before stopping.
pub const SCHEDULE_DAYS: usize = 7;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_EXTRA_SERVICES: usize = 16;

/// Upper bound on a single service's duration. Also bounds how far back the
/// conflict check must look for an earlier appointment that could still
/// overlap a new one.
pub const MAX_SERVICE_DURATION_MIN: Minutes = 24 * 60;

pub const MAX_WINDOWS_PER_SALON: usize = 512;
pub const MAX_APPOINTMENTS_PER_DIARY: usize = 100_000;
pub const MAX_IDS_PER_QUERY: usize = 256;

/// Longest accepted request line on the wire.
pub const MAX_LINE_BYTES: usize = 64 * 1024;
