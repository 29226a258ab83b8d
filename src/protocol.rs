use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;
use ulid::Ulid;

use crate::model::{Minutes, ServiceStatus};

/// One request line on the wire, tagged by `op`.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    CreateSalon {
        #[serde(default)]
        id: Option<Ulid>,
        name: String,
    },
    RegisterClient {
        #[serde(default)]
        id: Option<Ulid>,
        name: String,
        #[serde(default)]
        phone: Option<String>,
    },
    HireStaff {
        #[serde(default)]
        id: Option<Ulid>,
        salon_id: Ulid,
        name: String,
        #[serde(default)]
        photo: Option<String>,
    },
    AddService {
        #[serde(default)]
        id: Option<Ulid>,
        salon_id: Ulid,
        name: String,
        price_cents: i64,
        duration: ServiceDuration,
    },
    SetServiceStatus {
        id: Ulid,
        status: ServiceStatus,
    },
    AddWindow {
        #[serde(default)]
        id: Option<Ulid>,
        salon_id: Ulid,
        weekdays: Vec<u8>,
        services: Vec<Ulid>,
        staff: Vec<Ulid>,
        #[serde(deserialize_with = "de_hhmm")]
        opens: NaiveTime,
        #[serde(deserialize_with = "de_hhmm")]
        closes: NaiveTime,
    },
    UpdateWindow {
        id: Ulid,
        weekdays: Vec<u8>,
        services: Vec<Ulid>,
        staff: Vec<Ulid>,
        #[serde(deserialize_with = "de_hhmm")]
        opens: NaiveTime,
        #[serde(deserialize_with = "de_hhmm")]
        closes: NaiveTime,
    },
    RemoveWindow {
        id: Ulid,
    },
    Availability {
        salon_id: Ulid,
        service_id: Ulid,
        date: NaiveDate,
        #[serde(default)]
        staff_id: Option<Ulid>,
    },
    Book {
        client_id: Ulid,
        salon_id: Ulid,
        service_id: Ulid,
        #[serde(default)]
        extra_service_ids: Vec<Ulid>,
        staff_id: Ulid,
        start: NaiveDateTime,
    },
    Cancel {
        id: Ulid,
    },
    ListWindows {
        salon_id: Ulid,
    },
    ListAppointments {
        staff_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    },
}

/// Service duration as it arrives on the wire. Older clients send durations
/// as time-of-day-shaped values; both shapes are accepted and normalized to
/// integer minutes, the only internal representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceDuration(pub Minutes);

impl<'de> Deserialize<'de> for ServiceDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DurationVisitor;

        impl Visitor<'_> for DurationVisitor {
            type Value = ServiceDuration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("minutes as an integer, or an \"HH:MM\"-shaped duration")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                Ok(ServiceDuration(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(ServiceDuration(v as Minutes))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                parse_legacy_duration(v)
                    .map(ServiceDuration)
                    .ok_or_else(|| E::custom(format!("unparseable duration: {v:?}")))
            }
        }

        deserializer.deserialize_any(DurationVisitor)
    }
}

/// `"HH:MM"`, `"HH:MM:SS"`, or a full timestamp whose clock part encodes the
/// elapsed duration.
fn parse_legacy_duration(s: &str) -> Option<Minutes> {
    let time = NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
                .ok()
                .map(|dt| dt.time())
        })?;
    use chrono::Timelike;
    Some(i64::from(time.hour()) * 60 + i64::from(time.minute()))
}

fn de_hhmm<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    NaiveTime::parse_from_str(&s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(&s, "%H:%M:%S"))
        .map_err(|_| de::Error::custom(format!("expected \"HH:MM\", got {s:?}")))
}

/// Wire rendering of a slot or window bound.
pub fn fmt_hhmm(t: NaiveTime) -> String {
    t.format("%H:%M").to_string()
}

pub fn fmt_date(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

pub fn fmt_datetime(dt: NaiveDateTime) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S").to_string()
}
