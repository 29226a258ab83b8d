use std::collections::HashMap;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{Appointment, AppointmentStatus, Minutes, TimeSpan};

use super::{Engine, EngineError};

/// Midnight-to-midnight span of one calendar day.
pub(super) fn day_span(date: NaiveDate) -> Result<TimeSpan, EngineError> {
    let next = date
        .succ_opt()
        .ok_or(EngineError::LimitExceeded("date out of range"))?;
    Ok(TimeSpan::new(
        date.and_hms_opt(0, 0, 0).expect("midnight exists"),
        next.and_hms_opt(0, 0, 0).expect("midnight exists"),
    ))
}

impl Engine {
    /// Derived appointment duration: primary service plus every extra.
    /// Services are soft-deleted only, so the lookups stay resolvable for the
    /// lifetime of the appointment.
    pub(crate) fn derived_duration(&self, appt: &Appointment) -> Result<Minutes, EngineError> {
        let mut total = self
            .services
            .get(&appt.service_id)
            .ok_or(EngineError::NotFound(appt.service_id))?
            .duration_min;
        for sid in &appt.extra_service_ids {
            total += self
                .services
                .get(sid)
                .ok_or(EngineError::NotFound(*sid))?
                .duration_min;
        }
        Ok(total)
    }

    pub(crate) fn appointment_span(&self, appt: &Appointment) -> Result<TimeSpan, EngineError> {
        Ok(appt.span_with(self.derived_duration(appt)?))
    }

    /// Occupied intervals per staff member for one day, in a single batched
    /// pass: each diary is read-locked once, never once per appointment.
    /// Cancelled appointments don't occupy anything; staff with no occupancy
    /// are absent from the map and callers treat absence as free.
    pub(super) async fn busy_spans(
        &self,
        staff_ids: &[Ulid],
        date: NaiveDate,
    ) -> Result<HashMap<Ulid, Vec<TimeSpan>>, EngineError> {
        let day = day_span(date)?;
        let mut out = HashMap::new();

        for &staff_id in staff_ids {
            let Some(diary) = self.diary(&staff_id) else {
                continue;
            };
            let guard = diary.read().await;
            let mut spans = Vec::new();
            for appt in guard.starting_within(&day) {
                if appt.status != AppointmentStatus::Active {
                    continue;
                }
                spans.push(self.appointment_span(appt)?);
            }
            if !spans.is_empty() {
                out.insert(staff_id, spans);
            }
        }

        Ok(out)
    }
}
