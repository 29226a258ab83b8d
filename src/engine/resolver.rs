use std::collections::{BTreeMap, BTreeSet};

use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::now_naive;
use super::slots::{free_slots, generate_slots};
use super::{Engine, EngineError};

impl Engine {
    /// The read path: walk forward from `from`, day by day, collecting up to
    /// `SCHEDULE_DAYS` days that have at least one bookable slot for
    /// `service_id`, within a `LOOKAHEAD_DAYS` horizon.
    ///
    /// Advisory only — it reflects a point-in-time view and takes read locks
    /// exclusively. The booking commit re-checks conflicts under the diary
    /// write lock, which closes the gap between "shown" and "booked".
    ///
    /// Zero qualifying days is a valid empty result, not an error.
    pub async fn find_availability(
        &self,
        salon_id: Ulid,
        service_id: Ulid,
        from: NaiveDate,
        staff_filter: Option<Ulid>,
    ) -> Result<AvailabilityPage, EngineError> {
        if !self.salons.contains_key(&salon_id) {
            return Err(EngineError::NotFound(salon_id));
        }
        let service = self.get_service(service_id)?;
        if service.status == ServiceStatus::Retired {
            // Soft-deleted services are invisible to resolution.
            return Err(EngineError::NotFound(service_id));
        }
        let probe = service.duration_min;

        let window_ids = self
            .salon_windows
            .get(&salon_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let windows: Vec<WorkingWindow> = window_ids
            .iter()
            .filter_map(|id| self.windows.get(id).map(|e| e.value().clone()))
            .collect();

        let now = now_naive();
        let mut days: Vec<DaySchedule> = Vec::new();
        let mut seen_staff: Vec<Ulid> = Vec::new();
        let mut scanned = 0usize;

        let mut date = from;
        for _ in 0..LOOKAHEAD_DAYS {
            if days.len() == SCHEDULE_DAYS {
                break;
            }
            scanned += 1;

            // Candidate slots per staff member. Overlapping windows merge into
            // one ordered, deduplicated set.
            let mut candidates: BTreeMap<Ulid, BTreeSet<NaiveTime>> = BTreeMap::new();
            for window in &windows {
                if !window.applies_on(date, service_id) {
                    continue;
                }
                for &staff_id in &window.staff {
                    if staff_filter.is_some_and(|f| f != staff_id) {
                        continue;
                    }
                    let slots = generate_slots(
                        window.opens,
                        window.closes,
                        date,
                        SLOT_MINUTES,
                        true,
                        now,
                    );
                    if slots.is_empty() {
                        continue;
                    }
                    candidates.entry(staff_id).or_default().extend(slots);
                }
            }

            if !candidates.is_empty() {
                // One occupancy lookup for all of the day's staff.
                let ids: Vec<Ulid> = candidates.keys().copied().collect();
                let busy = self.busy_spans(&ids, date).await?;

                let mut by_staff: BTreeMap<Ulid, Vec<NaiveTime>> = BTreeMap::new();
                for (staff_id, slots) in candidates {
                    let slots: Vec<NaiveTime> = slots.into_iter().collect();
                    let free = match busy.get(&staff_id) {
                        Some(spans) => free_slots(&slots, spans, date, probe),
                        None => slots,
                    };
                    if !free.is_empty() {
                        by_staff.insert(staff_id, free);
                    }
                }

                if !by_staff.is_empty() {
                    for staff_id in by_staff.keys() {
                        if !seen_staff.contains(staff_id) {
                            seen_staff.push(*staff_id);
                        }
                    }
                    days.push(DaySchedule { date, by_staff });
                }
            }

            date = match date.succ_opt() {
                Some(next) => next,
                None => break,
            };
        }

        metrics::histogram!(crate::observability::AVAILABILITY_DAYS_SCANNED)
            .record(scanned as f64);

        Ok(AvailabilityPage {
            staff: self.staff_summaries(&seen_staff),
            days,
        })
    }
}
