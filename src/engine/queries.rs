use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::occupancy::day_span;
use super::{Engine, EngineError};

impl Engine {
    pub fn get_service(&self, id: Ulid) -> Result<Service, EngineError> {
        self.services
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(id))
    }

    /// All working-hour windows configured for a salon.
    pub fn list_windows(&self, salon_id: Ulid) -> Result<Vec<WorkingWindow>, EngineError> {
        if !self.salons.contains_key(&salon_id) {
            return Err(EngineError::NotFound(salon_id));
        }
        let ids = self
            .salon_windows
            .get(&salon_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        Ok(ids
            .iter()
            .filter_map(|id| self.windows.get(id).map(|e| e.value().clone()))
            .collect())
    }

    /// Active appointments for one staff member whose start falls within
    /// `[from, to]` (whole days, inclusive).
    pub async fn list_appointments(
        &self,
        staff_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Appointment>, EngineError> {
        if from > to {
            return Err(EngineError::LimitExceeded("date range inverted"));
        }
        let diary = self
            .diary(&staff_id)
            .ok_or(EngineError::NotFound(staff_id))?;
        let range = TimeSpan::new(day_span(from)?.start, day_span(to)?.end);

        let guard = diary.read().await;
        Ok(guard
            .starting_within(&range)
            .iter()
            .filter(|a| a.status == AppointmentStatus::Active)
            .cloned()
            .collect())
    }

    /// Display summaries for the given staff members, preserving input order.
    /// Names are trimmed to their first whitespace token; unknown ids are
    /// skipped.
    pub fn staff_summaries(&self, ids: &[Ulid]) -> Vec<StaffSummary> {
        ids.iter()
            .take(MAX_IDS_PER_QUERY)
            .filter_map(|id| {
                self.staff.get(id).map(|entry| {
                    let s = entry.value();
                    StaffSummary {
                        id: s.id,
                        name: s
                            .name
                            .split_whitespace()
                            .next()
                            .unwrap_or_default()
                            .to_string(),
                        photo: s.photo.clone(),
                    }
                })
            })
            .collect()
    }
}
