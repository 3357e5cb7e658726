use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::MAX_STAY_NIGHTS;
use crate::model::*;

use super::EngineError;

/// Check-out strictly after check-in, and not longer than the maximum stay.
pub(crate) fn validate_stay(check_in: NaiveDate, check_out: NaiveDate) -> Result<Stay, EngineError> {
    if check_out <= check_in {
        return Err(EngineError::Validation(format!(
            "check_out ({check_out}) must be after check_in ({check_in})"
        )));
    }
    let stay = Stay::new(check_in, check_out);
    if stay.nights() > MAX_STAY_NIGHTS {
        return Err(EngineError::Validation(format!(
            "stay of {} nights exceeds the {MAX_STAY_NIGHTS}-night maximum",
            stay.nights()
        )));
    }
    Ok(stay)
}

/// The in-lock re-check. Only occupying reservations hold the room.
pub(crate) fn check_no_conflict(rs: &RoomState, stay: &Stay, exclude: Option<Ulid>) -> Result<(), EngineError> {
    match rs.occupying_conflict(stay, exclude) {
        Some(existing) => Err(EngineError::Conflict(existing.reservation_id)),
        None => Ok(()),
    }
}

/// Searches and availability checks accept inverted or partial ranges, so
/// they only need the overlap itself.
pub(crate) fn has_occupying_overlap(rs: &RoomState, stay: &Stay) -> bool {
    rs.occupying_conflict(stay, None).is_some()
}
