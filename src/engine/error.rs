use rust_decimal::Decimal;
use ulid::Ulid;

use crate::model::ReservationStatus;

#[derive(Debug)]
pub enum EngineError {
    Validation(String),
    NotFound(&'static str, Ulid),
    AlreadyExists(String),
    LimitExceeded(&'static str),
    /// An occupying reservation already holds the room for these dates.
    Conflict(Ulid),
    InvalidState {
        id: Ulid,
        status: ReservationStatus,
        action: &'static str,
    },
    /// Right status, wrong time (e.g. check-in before the daily check-in hour).
    OutsideWindow {
        id: Ulid,
        action: &'static str,
        detail: String,
    },
    /// Check-in needs payment first; retry with `confirm_payment`.
    PaymentRequired {
        id: Ulid,
        amount: Decimal,
    },
    WalError(String),
}

/// Coarse error class reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    Conflict,
    State,
    PaymentRequired,
    Storage,
}

impl ErrorClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::Validation => "validation",
            ErrorClass::Conflict => "conflict",
            ErrorClass::State => "state",
            ErrorClass::PaymentRequired => "payment_required",
            ErrorClass::Storage => "storage",
        }
    }
}

impl EngineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            EngineError::Validation(_)
            | EngineError::NotFound(..)
            | EngineError::AlreadyExists(_)
            | EngineError::LimitExceeded(_) => ErrorClass::Validation,
            EngineError::Conflict(_) => ErrorClass::Conflict,
            EngineError::InvalidState { .. } | EngineError::OutsideWindow { .. } => ErrorClass::State,
            EngineError::PaymentRequired { .. } => ErrorClass::PaymentRequired,
            EngineError::WalError(_) => ErrorClass::Storage,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid request: {msg}"),
            EngineError::NotFound(kind, id) => write!(f, "{kind} does not exist: {id}"),
            EngineError::AlreadyExists(what) => write!(f, "already exists: {what}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Conflict(id) => write!(
                f,
                "room is no longer available for the selected dates (held by reservation {id})"
            ),
            EngineError::InvalidState { id, status, action } => {
                write!(f, "cannot {action} reservation {id} while it is {status}")
            }
            EngineError::OutsideWindow { id, action, detail } => {
                write!(f, "cannot {action} reservation {id} now: {detail}")
            }
            EngineError::PaymentRequired { id, amount } => write!(
                f,
                "payment of {amount} is required before reservation {id} can check in"
            ),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
