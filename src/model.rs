use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Elapsed minutes — the only duration type.
pub type Minutes = i64;

/// Half-open interval `[start, end)` in salon-local wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSpan {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeSpan {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        debug_assert!(start < end, "TimeSpan start must be before end");
        Self { start, end }
    }

    pub fn duration_min(&self) -> Minutes {
        (self.end - self.start).num_minutes()
    }

    pub fn overlaps(&self, other: &TimeSpan) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: NaiveDateTime) -> bool {
        self.start <= t && t < self.end
    }
}

// ── Documents ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Salon {
    pub id: Ulid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: Ulid,
    pub name: String,
    pub phone: Option<String>,
}

/// A collaborator working at a salon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Staff {
    pub id: Ulid,
    pub salon_id: Ulid,
    /// Full display name; availability responses expose only the first token.
    pub name: String,
    pub photo: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Available,
    Unavailable,
    /// Soft delete — invisible to resolution and booking.
    Retired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub salon_id: Ulid,
    pub name: String,
    pub price_cents: i64,
    pub duration_min: Minutes,
    pub status: ServiceStatus,
}

/// A recurring weekly availability window: on the listed weekdays, the listed
/// staff can perform the listed services between `opens` and `closes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingWindow {
    pub id: Ulid,
    pub salon_id: Ulid,
    /// Sunday-indexed weekdays, 0–6.
    pub weekdays: Vec<u8>,
    pub services: Vec<Ulid>,
    pub staff: Vec<Ulid>,
    pub opens: NaiveTime,
    pub closes: NaiveTime,
}

impl WorkingWindow {
    /// Does this window offer `service_id` on `date`?
    pub fn applies_on(&self, date: NaiveDate, service_id: Ulid) -> bool {
        let weekday = date.weekday().num_days_from_sunday() as u8;
        self.weekdays.contains(&weekday) && self.services.contains(&service_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Active,
    /// Soft cancel — the record is kept, the time is freed.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub salon_id: Ulid,
    pub client_id: Ulid,
    pub staff_id: Ulid,
    pub service_id: Ulid,
    pub extra_service_ids: Vec<Ulid>,
    pub start: NaiveDateTime,
    /// Price snapshot taken at booking time.
    pub price_cents: i64,
    pub status: AppointmentStatus,
}

impl Appointment {
    /// The occupied interval, given the derived duration (primary service plus
    /// extras). Duration is never stored on the appointment itself.
    pub fn span_with(&self, duration: Minutes) -> TimeSpan {
        TimeSpan::new(self.start, self.start + Duration::minutes(duration))
    }
}

/// All appointments ever booked for one staff member, sorted by `start`.
/// The surrounding `RwLock` is the synchronization point for booking commits.
#[derive(Debug, Clone)]
pub struct StaffDiary {
    pub staff_id: Ulid,
    pub appointments: Vec<Appointment>,
}

impl StaffDiary {
    pub fn new(staff_id: Ulid) -> Self {
        Self {
            staff_id,
            appointments: Vec::new(),
        }
    }

    /// Insert an appointment maintaining sort order by start.
    pub fn insert(&mut self, appt: Appointment) {
        let pos = self
            .appointments
            .binary_search_by_key(&appt.start, |a| a.start)
            .unwrap_or_else(|e| e);
        self.appointments.insert(pos, appt);
    }

    /// Mark an appointment Cancelled. Records are never removed.
    pub fn cancel(&mut self, id: Ulid) -> bool {
        match self.appointments.iter_mut().find(|a| a.id == id) {
            Some(appt) => {
                appt.status = AppointmentStatus::Cancelled;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: Ulid) -> Option<&Appointment> {
        self.appointments.iter().find(|a| a.id == id)
    }

    /// Appointments whose `start` falls within `span`, via binary search on
    /// both bounds. Status filtering is left to the caller.
    pub fn starting_within(&self, span: &TimeSpan) -> &[Appointment] {
        let left = self.appointments.partition_point(|a| a.start < span.start);
        let right = self.appointments.partition_point(|a| a.start < span.end);
        &self.appointments[left..right]
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SalonCreated {
        id: Ulid,
        name: String,
    },
    ClientRegistered {
        id: Ulid,
        name: String,
        phone: Option<String>,
    },
    StaffHired {
        id: Ulid,
        salon_id: Ulid,
        name: String,
        photo: Option<String>,
    },
    ServiceAdded {
        id: Ulid,
        salon_id: Ulid,
        name: String,
        price_cents: i64,
        duration_min: Minutes,
    },
    ServiceStatusChanged {
        id: Ulid,
        status: ServiceStatus,
    },
    WindowAdded {
        id: Ulid,
        salon_id: Ulid,
        weekdays: Vec<u8>,
        services: Vec<Ulid>,
        staff: Vec<Ulid>,
        opens: NaiveTime,
        closes: NaiveTime,
    },
    WindowUpdated {
        id: Ulid,
        weekdays: Vec<u8>,
        services: Vec<Ulid>,
        staff: Vec<Ulid>,
        opens: NaiveTime,
        closes: NaiveTime,
    },
    WindowRemoved {
        id: Ulid,
    },
    AppointmentBooked {
        id: Ulid,
        salon_id: Ulid,
        client_id: Ulid,
        staff_id: Ulid,
        service_id: Ulid,
        extra_service_ids: Vec<Ulid>,
        start: NaiveDateTime,
        price_cents: i64,
    },
    AppointmentCancelled {
        id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaffSummary {
    pub id: Ulid,
    /// First whitespace token of the staff member's display name.
    pub name: String,
    pub photo: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaySchedule {
    pub date: NaiveDate,
    pub by_staff: std::collections::BTreeMap<Ulid, Vec<NaiveTime>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityPage {
    pub staff: Vec<StaffSummary>,
    pub days: Vec<DaySchedule>,
}
