use chrono::{Duration, NaiveDateTime, NaiveTime};
use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, now_naive, validate_window};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    pub async fn create_salon(&self, id: Ulid, name: String) -> Result<(), EngineError> {
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("salon name too long"));
        }
        if self.salons.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        self.persist_table(&Event::SalonCreated { id, name }).await
    }

    pub async fn register_client(
        &self,
        id: Ulid,
        name: String,
        phone: Option<String>,
    ) -> Result<(), EngineError> {
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("client name too long"));
        }
        if self.clients.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        self.persist_table(&Event::ClientRegistered { id, name, phone })
            .await
    }

    /// Hiring also creates the staff member's empty diary.
    pub async fn hire_staff(
        &self,
        id: Ulid,
        salon_id: Ulid,
        name: String,
        photo: Option<String>,
    ) -> Result<(), EngineError> {
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("staff name too long"));
        }
        if !self.salons.contains_key(&salon_id) {
            return Err(EngineError::NotFound(salon_id));
        }
        if self.staff.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        self.persist_table(&Event::StaffHired {
            id,
            salon_id,
            name,
            photo,
        })
        .await
    }

    pub async fn add_service(
        &self,
        id: Ulid,
        salon_id: Ulid,
        name: String,
        price_cents: i64,
        duration_min: Minutes,
    ) -> Result<(), EngineError> {
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("service name too long"));
        }
        if duration_min < 1 || duration_min > MAX_SERVICE_DURATION_MIN {
            return Err(EngineError::InvalidDuration(duration_min));
        }
        if !self.salons.contains_key(&salon_id) {
            return Err(EngineError::NotFound(salon_id));
        }
        if self.services.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        self.persist_table(&Event::ServiceAdded {
            id,
            salon_id,
            name,
            price_cents,
            duration_min,
        })
        .await
    }

    pub async fn set_service_status(
        &self,
        id: Ulid,
        status: ServiceStatus,
    ) -> Result<(), EngineError> {
        if !self.services.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        self.persist_table(&Event::ServiceStatusChanged { id, status })
            .await
    }

    pub async fn add_window(
        &self,
        id: Ulid,
        salon_id: Ulid,
        weekdays: Vec<u8>,
        services: Vec<Ulid>,
        staff: Vec<Ulid>,
        opens: NaiveTime,
        closes: NaiveTime,
    ) -> Result<(), EngineError> {
        validate_window(opens, closes, &weekdays)?;
        if !self.salons.contains_key(&salon_id) {
            return Err(EngineError::NotFound(salon_id));
        }
        if self.windows.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if self
            .salon_windows
            .get(&salon_id)
            .is_some_and(|w| w.len() >= MAX_WINDOWS_PER_SALON)
        {
            return Err(EngineError::LimitExceeded("too many windows for salon"));
        }
        self.check_window_refs(&services, &staff)?;
        self.persist_table(&Event::WindowAdded {
            id,
            salon_id,
            weekdays,
            services,
            staff,
            opens,
            closes,
        })
        .await
    }

    pub async fn update_window(
        &self,
        id: Ulid,
        weekdays: Vec<u8>,
        services: Vec<Ulid>,
        staff: Vec<Ulid>,
        opens: NaiveTime,
        closes: NaiveTime,
    ) -> Result<(), EngineError> {
        validate_window(opens, closes, &weekdays)?;
        if !self.windows.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        self.check_window_refs(&services, &staff)?;
        self.persist_table(&Event::WindowUpdated {
            id,
            weekdays,
            services,
            staff,
            opens,
            closes,
        })
        .await
    }

    /// Hard delete. Slots the window generated are simply no longer offered;
    /// committed appointments are untouched.
    pub async fn remove_window(&self, id: Ulid) -> Result<(), EngineError> {
        if !self.windows.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        self.persist_table(&Event::WindowRemoved { id }).await
    }

    fn check_window_refs(&self, services: &[Ulid], staff: &[Ulid]) -> Result<(), EngineError> {
        for sid in services {
            if !self.services.contains_key(sid) {
                return Err(EngineError::NotFound(*sid));
            }
        }
        for sid in staff {
            if !self.staff.contains_key(sid) {
                return Err(EngineError::NotFound(*sid));
            }
        }
        Ok(())
    }

    /// The write path. Re-validates the requested interval against every
    /// active appointment of the staff member and commits only if free —
    /// conflict check, WAL append, and apply all happen under the diary write
    /// lock, so concurrent attempts for the same staff member serialize.
    #[allow(clippy::too_many_arguments)]
    pub async fn book_appointment(
        &self,
        id: Ulid,
        salon_id: Ulid,
        client_id: Ulid,
        staff_id: Ulid,
        service_id: Ulid,
        extra_service_ids: Vec<Ulid>,
        start: NaiveDateTime,
    ) -> Result<Appointment, EngineError> {
        let now = now_naive();
        if start < now {
            return Err(EngineError::PastStart(start));
        }
        if extra_service_ids.len() > MAX_EXTRA_SERVICES {
            return Err(EngineError::LimitExceeded("too many extra services"));
        }
        if self.appointment_staff.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if !self.salons.contains_key(&salon_id) {
            return Err(EngineError::NotFound(salon_id));
        }
        if !self.clients.contains_key(&client_id) {
            return Err(EngineError::NotFound(client_id));
        }
        if !self.staff.contains_key(&staff_id) {
            return Err(EngineError::NotFound(staff_id));
        }

        let mut duration = 0;
        let mut price_cents = 0;
        for sid in std::iter::once(&service_id).chain(&extra_service_ids) {
            let service = self
                .services
                .get(sid)
                .ok_or(EngineError::NotFound(*sid))?;
            if service.status == ServiceStatus::Retired {
                return Err(EngineError::ServiceRetired(*sid));
            }
            duration += service.duration_min;
            price_cents += service.price_cents;
        }

        let candidate = TimeSpan::new(start, start + Duration::minutes(duration));

        let diary = self.diary(&staff_id).ok_or(EngineError::NotFound(staff_id))?;
        let mut guard = diary.write().await;
        if guard.appointments.len() >= MAX_APPOINTMENTS_PER_DIARY {
            return Err(EngineError::LimitExceeded("too many appointments for staff"));
        }

        // Earliest start whose derived interval could still reach into the
        // candidate, given the duration caps.
        let lookback =
            Duration::minutes(MAX_SERVICE_DURATION_MIN * (1 + MAX_EXTRA_SERVICES as i64));
        let search = TimeSpan::new(candidate.start - lookback, candidate.end);

        let mut existing = Vec::new();
        for appt in guard.starting_within(&search) {
            if appt.status != AppointmentStatus::Active {
                continue;
            }
            existing.push((appt.id, self.appointment_span(appt)?));
        }
        check_no_conflict(&existing, &candidate)?;

        let event = Event::AppointmentBooked {
            id,
            salon_id,
            client_id,
            staff_id,
            service_id,
            extra_service_ids: extra_service_ids.clone(),
            start,
            price_cents,
        };
        self.persist_to_diary(&mut guard, &event).await?;
        metrics::counter!(crate::observability::BOOKINGS_TOTAL).increment(1);

        Ok(Appointment {
            id,
            salon_id,
            client_id,
            staff_id,
            service_id,
            extra_service_ids,
            start,
            price_cents,
            status: AppointmentStatus::Active,
        })
    }

    /// Soft cancel: the record flips to Cancelled and its time is freed.
    pub async fn cancel_appointment(&self, id: Ulid) -> Result<Appointment, EngineError> {
        let staff_id = self
            .staff_for_appointment(&id)
            .ok_or(EngineError::NotFound(id))?;
        let diary = self.diary(&staff_id).ok_or(EngineError::NotFound(staff_id))?;
        let mut guard = diary.write().await;

        let event = Event::AppointmentCancelled { id };
        self.persist_to_diary(&mut guard, &event).await?;
        guard
            .get(id)
            .cloned()
            .ok_or(EngineError::NotFound(id))
    }

    /// Rewrite the WAL with only the events needed to recreate current state.
    /// Cancelled appointments survive — they are records, not tombstones.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        for entry in self.salons.iter() {
            let s = entry.value();
            events.push(Event::SalonCreated {
                id: s.id,
                name: s.name.clone(),
            });
        }
        for entry in self.clients.iter() {
            let c = entry.value();
            events.push(Event::ClientRegistered {
                id: c.id,
                name: c.name.clone(),
                phone: c.phone.clone(),
            });
        }
        // Staff before appointments: replay needs the diaries in place.
        for entry in self.staff.iter() {
            let s = entry.value();
            events.push(Event::StaffHired {
                id: s.id,
                salon_id: s.salon_id,
                name: s.name.clone(),
                photo: s.photo.clone(),
            });
        }
        for entry in self.services.iter() {
            let s = entry.value();
            events.push(Event::ServiceAdded {
                id: s.id,
                salon_id: s.salon_id,
                name: s.name.clone(),
                price_cents: s.price_cents,
                duration_min: s.duration_min,
            });
            if s.status != ServiceStatus::Available {
                events.push(Event::ServiceStatusChanged {
                    id: s.id,
                    status: s.status,
                });
            }
        }
        for entry in self.windows.iter() {
            let w = entry.value();
            events.push(Event::WindowAdded {
                id: w.id,
                salon_id: w.salon_id,
                weekdays: w.weekdays.clone(),
                services: w.services.clone(),
                staff: w.staff.clone(),
                opens: w.opens,
                closes: w.closes,
            });
        }

        let diaries: Vec<_> = self.diaries.iter().map(|e| e.value().clone()).collect();
        for diary in diaries {
            let guard = diary.read().await;
            for appt in &guard.appointments {
                events.push(Event::AppointmentBooked {
                    id: appt.id,
                    salon_id: appt.salon_id,
                    client_id: appt.client_id,
                    staff_id: appt.staff_id,
                    service_id: appt.service_id,
                    extra_service_ids: appt.extra_service_ids.clone(),
                    start: appt.start,
                    price_cents: appt.price_cents,
                });
                if appt.status == AppointmentStatus::Cancelled {
                    events.push(Event::AppointmentCancelled { id: appt.id });
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
