use chrono::{NaiveDateTime, NaiveTime};
use ulid::Ulid;

use crate::model::TimeSpan;

use super::EngineError;

/// The single source of "now" — salon-local wall clock. Pure functions take
/// the value explicitly; engine entry points read it here.
pub(crate) fn now_naive() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

/// Reject `candidate` if it overlaps any existing active interval. `existing`
/// carries true derived spans (primary service plus extras); the caller holds
/// the diary write lock, so check and insert are atomic.
///
/// The overlap test is symmetric: an earlier appointment reaching into the
/// candidate conflicts just like one starting inside it.
pub(crate) fn check_no_conflict(
    existing: &[(Ulid, TimeSpan)],
    candidate: &TimeSpan,
) -> Result<(), EngineError> {
    for (id, span) in existing {
        if span.overlaps(candidate) {
            return Err(EngineError::Conflict(*id));
        }
    }
    Ok(())
}

/// Window invariants: `opens < closes`, weekdays Sunday-indexed 0–6.
pub(crate) fn validate_window(
    opens: NaiveTime,
    closes: NaiveTime,
    weekdays: &[u8],
) -> Result<(), EngineError> {
    if opens >= closes {
        return Err(EngineError::WindowInverted { opens, closes });
    }
    for &d in weekdays {
        if d > 6 {
            return Err(EngineError::InvalidWeekday(d));
        }
    }
    Ok(())
}
