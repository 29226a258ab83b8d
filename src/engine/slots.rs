use chrono::{Days, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::model::{Minutes, TimeSpan};

// ── Slot arithmetic ───────────────────────────────────────────────

/// Bookable start times within `[opens, closes)` at fixed `slot_minutes`
/// increments. The final slot's start is strictly before `closes`; no partial
/// trailing slot is emitted.
///
/// With `suppress_past` set and `date` equal to `now`'s date, slots not
/// strictly after the current time are dropped. Client-facing candidate
/// generation passes `true`; pass `false` wherever committed time must keep
/// blocking even once it lies in the past.
///
/// Pure function of its inputs. `opens >= closes` yields an empty sequence.
pub fn generate_slots(
    opens: NaiveTime,
    closes: NaiveTime,
    date: NaiveDate,
    slot_minutes: Minutes,
    suppress_past: bool,
    now: NaiveDateTime,
) -> Vec<NaiveTime> {
    if slot_minutes <= 0 || opens >= closes {
        return Vec::new();
    }

    // Work in minutes-of-day so the step never wraps past midnight.
    let open_min = i64::from(opens.num_seconds_from_midnight()) / 60;
    let close_min = i64::from(closes.num_seconds_from_midnight()) / 60;

    let mut slots = Vec::new();
    let mut t = open_min;
    while t < close_min {
        let slot = NaiveTime::from_hms_opt((t / 60) as u32, (t % 60) as u32, 0)
            .expect("minute-of-day below 1440");
        if !(suppress_past && date == now.date() && slot <= now.time()) {
            slots.push(slot);
        }
        t += slot_minutes;
    }
    slots
}

/// Candidates that survive occupancy: slot `t` is kept only if its probe
/// interval `[t, t + probe_min)` overlaps no busy span. Interval containment,
/// not exact-start matching — a booking blocks every slot it reaches into.
pub fn free_slots(
    candidates: &[NaiveTime],
    busy: &[TimeSpan],
    date: NaiveDate,
    probe_min: Minutes,
) -> Vec<NaiveTime> {
    if probe_min <= 0 {
        return candidates.to_vec();
    }
    candidates
        .iter()
        .copied()
        .filter(|&t| {
            let start = date.and_time(t);
            let probe = TimeSpan::new(start, start + Duration::minutes(probe_min));
            !busy.iter().any(|b| b.overlaps(&probe))
        })
        .collect()
}

/// Concrete calendar date of a Sunday-indexed weekday within the week
/// starting at `week_start` (a Sunday).
pub fn weekday_to_date(week_start: NaiveDate, weekday: u8) -> NaiveDate {
    week_start + Days::new(u64::from(weekday % 7))
}
