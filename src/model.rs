use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Half-open stay `[check_in, check_out)` in calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stay {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

impl Stay {
    pub fn new(check_in: NaiveDate, check_out: NaiveDate) -> Self {
        debug_assert!(check_in < check_out, "Stay check_in must be before check_out");
        Self { check_in, check_out }
    }

    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }

    /// Back-to-back stays (one ends the day the other starts) do not overlap.
    pub fn overlaps(&self, other: &Stay) -> bool {
        !(self.check_out <= other.check_in || self.check_in >= other.check_out)
    }

    pub fn contains_night(&self, date: NaiveDate) -> bool {
        self.check_in <= date && date < self.check_out
    }
}

/// Reservation lifecycle. Cancelled and CheckedOut are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Confirmed,
    #[serde(rename = "Checked-in")]
    CheckedIn,
    Late,
    #[serde(rename = "Late Check-out")]
    LateCheckout,
    #[serde(rename = "Checked-out", alias = "Complete")]
    CheckedOut,
    Cancelled,
}

impl ReservationStatus {
    pub const ALL: [ReservationStatus; 6] = [
        ReservationStatus::Confirmed,
        ReservationStatus::CheckedIn,
        ReservationStatus::Late,
        ReservationStatus::LateCheckout,
        ReservationStatus::CheckedOut,
        ReservationStatus::Cancelled,
    ];

    /// Statuses that hold the room for overlap purposes.
    pub fn is_occupying(self) -> bool {
        matches!(self, ReservationStatus::Confirmed | ReservationStatus::CheckedIn)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ReservationStatus::CheckedOut | ReservationStatus::Cancelled)
    }

    pub fn is_pre_arrival(self) -> bool {
        matches!(self, ReservationStatus::Confirmed)
    }

    /// The lifecycle transition table. Anything not listed here is rejected.
    pub fn can_transition_to(self, next: ReservationStatus) -> bool {
        use ReservationStatus::*;
        matches!(
            (self, next),
            (Confirmed, CheckedIn)
                | (Confirmed, Late)
                | (Confirmed, Cancelled)
                | (Late, CheckedIn)
                | (Late, Cancelled)
                | (CheckedIn, CheckedOut)
                | (CheckedIn, LateCheckout)
                | (LateCheckout, CheckedOut)
                | (LateCheckout, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Confirmed => "Confirmed",
            ReservationStatus::CheckedIn => "Checked-in",
            ReservationStatus::Late => "Late",
            ReservationStatus::LateCheckout => "Late Check-out",
            ReservationStatus::CheckedOut => "Checked-out",
            ReservationStatus::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        ReservationStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(wanted))
            .or_else(|| match wanted.to_ascii_lowercase().as_str() {
                "complete" => Some(ReservationStatus::CheckedOut),
                _ => None,
            })
            .ok_or_else(|| format!("unknown reservation status: {s}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub room_id: Ulid,
    pub room_number: String,
    pub room_type: String,
    pub capacity: u32,
    /// Nightly rate.
    pub price: Decimal,
    pub smoking: bool,
    /// Inventory flag: false while the room is pulled from service.
    pub is_available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guest {
    pub guest_id: Ulid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
}

impl Guest {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub reservation_id: Ulid,
    pub guest_id: Ulid,
    pub room_id: Ulid,
    pub check_in_date: NaiveDate,
    pub check_out_date: NaiveDate,
    pub num_guests: u32,
    pub total_price: Decimal,
    pub status: ReservationStatus,
    pub is_paid: bool,
    pub created_at: NaiveDateTime,
}

impl Reservation {
    pub fn stay(&self) -> Stay {
        Stay::new(self.check_in_date, self.check_out_date)
    }
}

/// A room and every reservation ever placed on it, sorted by check-in date.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    pub reservations: Vec<Reservation>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            reservations: Vec::new(),
        }
    }

    /// Insert reservation maintaining sort order by check-in date.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.check_in_date <= reservation.check_in_date);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.reservation_id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.reservation_id == id)
    }

    pub fn reservation_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.reservation_id == id)
    }

    /// Reservations (of any status) whose stay overlaps the query.
    /// Everything at or after the partition point checks in on or after
    /// `query.check_out`, so it cannot overlap.
    pub fn overlapping(&self, query: &Stay) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.check_in_date < query.check_out);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.stay().overlaps(query))
    }

    /// First occupying reservation overlapping `query`, ignoring `exclude`.
    pub fn occupying_conflict(&self, query: &Stay, exclude: Option<Ulid>) -> Option<&Reservation> {
        self.overlapping(query).find(|r| {
            r.status.is_occupying() && Some(r.reservation_id) != exclude
        })
    }

    pub fn has_occupying(&self) -> bool {
        self.reservations.iter().any(|r| r.status.is_occupying())
    }
}

/// Journal record format. Each variant is a complete, replayable state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        room: Room,
    },
    RoomUpdated {
        room_id: Ulid,
        price: Decimal,
        is_available: bool,
    },
    GuestRegistered {
        guest: Guest,
    },
    ReservationCreated {
        reservation: Reservation,
    },
    ReservationStatusChanged {
        id: Ulid,
        room_id: Ulid,
        status: ReservationStatus,
    },
    ReservationCancelled {
        id: Ulid,
        room_id: Ulid,
        fee: Decimal,
    },
    ReservationCheckedIn {
        id: Ulid,
        room_id: Ulid,
        is_paid: bool,
    },
    ReservationCheckedOut {
        id: Ulid,
        room_id: Ulid,
        final_price: Decimal,
    },
    /// Full post-edit row; `from_room` differs from `reservation.room_id` on a room move.
    ReservationModified {
        from_room: Ulid,
        reservation: Reservation,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReservationInfo {
    pub reservation_id: Ulid,
    pub guest_id: Ulid,
    pub guest_name: Option<String>,
    pub room_id: Ulid,
    pub room_number: String,
    pub check_in_date: NaiveDate,
    pub check_out_date: NaiveDate,
    pub num_guests: u32,
    pub total_price: Decimal,
    pub status: ReservationStatus,
    pub is_paid: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancellationReceipt {
    pub reservation_id: Ulid,
    pub original_price: Decimal,
    pub cancellation_fee: Decimal,
    pub refund_amount: Decimal,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckInReceipt {
    pub message: String,
    pub checked_in_at: NaiveDateTime,
    pub payment_settled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckOutReceipt {
    pub message: String,
    pub original_price: Decimal,
    pub late_fee: Decimal,
    pub final_price: Decimal,
    pub is_paid: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateReceipt {
    pub old_price: Decimal,
    pub new_price: Decimal,
    pub difference: Decimal,
    pub is_paid: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub marked_late: usize,
    pub marked_late_checkout: usize,
    pub cancelled: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.marked_late + self.marked_late_checkout + self.cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn room() -> Room {
        Room {
            room_id: Ulid::new(),
            room_number: "101".into(),
            room_type: "Double".into(),
            capacity: 2,
            price: Decimal::from(120),
            smoking: false,
            is_available: true,
        }
    }

    fn reservation(room_id: Ulid, ci: &str, co: &str, status: ReservationStatus) -> Reservation {
        Reservation {
            reservation_id: Ulid::new(),
            guest_id: Ulid::new(),
            room_id,
            check_in_date: d(ci),
            check_out_date: d(co),
            num_guests: 1,
            total_price: Decimal::from(240),
            status,
            is_paid: false,
            created_at: d("2025-11-01").and_hms_opt(9, 0, 0).unwrap(),
        }
    }

    #[test]
    fn stay_nights() {
        let s = Stay::new(d("2025-12-10"), d("2025-12-12"));
        assert_eq!(s.nights(), 2);
        assert!(s.contains_night(d("2025-12-10")));
        assert!(s.contains_night(d("2025-12-11")));
        assert!(!s.contains_night(d("2025-12-12"))); // half-open
    }

    #[test]
    fn stay_overlap() {
        let a = Stay::new(d("2025-12-10"), d("2025-12-12"));
        let b = Stay::new(d("2025-12-11"), d("2025-12-13"));
        let c = Stay::new(d("2025-12-12"), d("2025-12-15"));
        let inside = Stay::new(d("2025-12-09"), d("2025-12-20"));
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // back-to-back
        assert!(!c.overlaps(&a));
        assert!(inside.overlaps(&a));
    }

    #[test]
    fn status_transition_table() {
        use ReservationStatus::*;
        assert!(Confirmed.can_transition_to(CheckedIn));
        assert!(Confirmed.can_transition_to(Late));
        assert!(Late.can_transition_to(Cancelled));
        assert!(CheckedIn.can_transition_to(LateCheckout));
        assert!(LateCheckout.can_transition_to(CheckedOut));

        assert!(!Late.can_transition_to(Confirmed));
        assert!(!CheckedIn.can_transition_to(Cancelled));
        assert!(!Confirmed.can_transition_to(LateCheckout));
        for next in ReservationStatus::ALL {
            assert!(!Cancelled.can_transition_to(next));
            assert!(!CheckedOut.can_transition_to(next));
        }
    }

    #[test]
    fn status_sets() {
        use ReservationStatus::*;
        let occupying: Vec<_> = ReservationStatus::ALL.into_iter().filter(|s| s.is_occupying()).collect();
        assert_eq!(occupying, vec![Confirmed, CheckedIn]);
        assert!(Cancelled.is_terminal());
        assert!(CheckedOut.is_terminal());
        assert!(!LateCheckout.is_terminal());
    }

    #[test]
    fn status_parse() {
        assert_eq!("checked-in".parse::<ReservationStatus>(), Ok(ReservationStatus::CheckedIn));
        assert_eq!("Late Check-out".parse::<ReservationStatus>(), Ok(ReservationStatus::LateCheckout));
        assert_eq!("Complete".parse::<ReservationStatus>(), Ok(ReservationStatus::CheckedOut));
        assert!("No-show".parse::<ReservationStatus>().is_err());
    }

    #[test]
    fn status_json_names() {
        let json = serde_json::to_string(&ReservationStatus::LateCheckout).unwrap();
        assert_eq!(json, "\"Late Check-out\"");
    }

    #[test]
    fn reservations_kept_sorted() {
        let r = room();
        let mut rs = RoomState::new(r.clone());
        rs.insert_reservation(reservation(r.room_id, "2025-12-20", "2025-12-22", ReservationStatus::Confirmed));
        rs.insert_reservation(reservation(r.room_id, "2025-12-01", "2025-12-03", ReservationStatus::Confirmed));
        rs.insert_reservation(reservation(r.room_id, "2025-12-10", "2025-12-12", ReservationStatus::Confirmed));
        let starts: Vec<_> = rs.reservations.iter().map(|r| r.check_in_date).collect();
        assert_eq!(starts, vec![d("2025-12-01"), d("2025-12-10"), d("2025-12-20")]);
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let r = room();
        let mut rs = RoomState::new(r.clone());
        rs.insert_reservation(reservation(r.room_id, "2025-12-01", "2025-12-03", ReservationStatus::Confirmed));
        rs.insert_reservation(reservation(r.room_id, "2025-12-09", "2025-12-11", ReservationStatus::Confirmed));
        rs.insert_reservation(reservation(r.room_id, "2025-12-20", "2025-12-22", ReservationStatus::Confirmed));

        let query = Stay::new(d("2025-12-10"), d("2025-12-15"));
        let hits: Vec<_> = rs.overlapping(&query).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].check_in_date, d("2025-12-09"));
    }

    #[test]
    fn occupying_conflict_ignores_cancelled_and_excluded() {
        let r = room();
        let mut rs = RoomState::new(r.clone());
        let cancelled = reservation(r.room_id, "2025-12-10", "2025-12-12", ReservationStatus::Cancelled);
        let late = reservation(r.room_id, "2025-12-10", "2025-12-12", ReservationStatus::Late);
        rs.insert_reservation(cancelled);
        rs.insert_reservation(late);
        let query = Stay::new(d("2025-12-10"), d("2025-12-12"));
        assert!(rs.occupying_conflict(&query, None).is_none());

        let confirmed = reservation(r.room_id, "2025-12-11", "2025-12-12", ReservationStatus::Confirmed);
        let confirmed_id = confirmed.reservation_id;
        rs.insert_reservation(confirmed);
        assert_eq!(
            rs.occupying_conflict(&query, None).map(|r| r.reservation_id),
            Some(confirmed_id)
        );
        assert!(rs.occupying_conflict(&query, Some(confirmed_id)).is_none());
    }

    #[test]
    fn remove_reservation_by_id() {
        let r = room();
        let mut rs = RoomState::new(r.clone());
        let res = reservation(r.room_id, "2025-12-10", "2025-12-12", ReservationStatus::Confirmed);
        let id = res.reservation_id;
        rs.insert_reservation(res);
        assert!(rs.remove_reservation(Ulid::new()).is_none());
        assert_eq!(rs.remove_reservation(id).map(|r| r.reservation_id), Some(id));
        assert!(rs.reservations.is_empty());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let r = room();
        let event = Event::ReservationCreated {
            reservation: reservation(r.room_id, "2025-12-10", "2025-12-12", ReservationStatus::Confirmed),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
