use chrono::{NaiveDateTime, NaiveTime};
use ulid::Ulid;

use crate::model::Minutes;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Booking start lies in the past.
    PastStart(NaiveDateTime),
    WindowInverted {
        opens: NaiveTime,
        closes: NaiveTime,
    },
    InvalidWeekday(u8),
    InvalidDuration(Minutes),
    /// The service has been soft-deleted.
    ServiceRetired(Ulid),
    /// The requested interval overlaps an existing active appointment.
    Conflict(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::PastStart(start) => {
                write!(f, "appointment start {start} is in the past")
            }
            EngineError::WindowInverted { opens, closes } => {
                write!(f, "window opens at {opens} but closes at {closes}")
            }
            EngineError::InvalidWeekday(d) => {
                write!(f, "weekday {d} out of range (0 = Sunday .. 6 = Saturday)")
            }
            EngineError::InvalidDuration(min) => {
                write!(f, "invalid service duration: {min} minutes")
            }
            EngineError::ServiceRetired(id) => write!(f, "service retired: {id}"),
            EngineError::Conflict(id) => {
                write!(f, "time slot already taken by appointment {id}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl EngineError {
    /// Stable error kind exposed on the wire, so clients can distinguish a
    /// conflict (re-prompt for a slot) from a validation failure.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "not_found",
            EngineError::Conflict(_) => "conflict",
            EngineError::LimitExceeded(_) => "limit",
            EngineError::WalError(_) => "persistence",
            _ => "validation",
        }
    }
}
