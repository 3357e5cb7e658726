use std::collections::HashSet;

use chrono::NaiveDate;
use serde::Deserialize;
use ulid::Ulid;

use crate::model::*;

use super::conflict::has_occupying_overlap;
use super::{Engine, EngineError, RoomFilter, SharedRoomState};

/// Reservation lookup criteria; unset fields do not filter.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReservationFilter {
    pub reservation_id: Option<Ulid>,
    pub guest_id: Option<Ulid>,
    pub email: Option<String>,
    pub room_id: Option<Ulid>,
    pub status: Option<ReservationStatus>,
}

#[derive(Debug, Clone)]
pub enum GuestLookup {
    Id(Ulid),
    Email(String),
}

impl Engine {
    fn room_snapshot(&self) -> Vec<SharedRoomState> {
        self.rooms.iter().map(|e| e.value().clone()).collect()
    }

    pub async fn get_room(&self, room_id: Ulid) -> Result<Room, EngineError> {
        let rs = self.room_state(room_id)?;
        let guard = rs.read().await;
        Ok(guard.room.clone())
    }

    /// Every room, ordered by room number.
    pub async fn list_rooms(&self) -> Vec<Room> {
        let mut rooms = Vec::with_capacity(self.rooms.len());
        for rs in self.room_snapshot() {
            rooms.push(rs.read().await.room.clone());
        }
        rooms.sort_by(|a, b| a.room_number.cmp(&b.room_number));
        rooms
    }

    pub async fn search_rooms(&self, filter: &RoomFilter) -> Result<Vec<Room>, EngineError> {
        let clauses = filter.compile()?;

        let candidates = if filter.room_ids.is_empty() {
            self.room_snapshot()
        } else {
            let wanted: HashSet<Ulid> = filter.room_ids.iter().copied().collect();
            wanted.iter().filter_map(|id| self.get_room_state(id)).collect()
        };

        let mut matched = Vec::new();
        for rs in candidates {
            let guard = rs.read().await;
            if clauses.iter().all(|clause| clause.matches(&guard)) {
                matched.push(guard.room.clone());
            }
        }
        matched.sort_by(|a, b| filter.compare(a, b));
        Ok(matched)
    }

    /// Inventory availability: the room is in service and, when both dates are
    /// given, no occupying reservation overlaps them. Without a date pair any
    /// occupying reservation makes the room unavailable.
    pub async fn room_availability(
        &self,
        room_id: Ulid,
        check_in: Option<NaiveDate>,
        check_out: Option<NaiveDate>,
    ) -> Result<bool, EngineError> {
        let rs = self.room_state(room_id)?;
        let guard = rs.read().await;
        if !guard.room.is_available {
            return Ok(false);
        }
        match (check_in, check_out) {
            (Some(ci), Some(co)) => {
                if co <= ci {
                    return Err(EngineError::Validation(format!(
                        "check_out ({co}) must be after check_in ({ci})"
                    )));
                }
                Ok(!has_occupying_overlap(&guard, &Stay::new(ci, co)))
            }
            _ => Ok(!guard.has_occupying()),
        }
    }

    pub fn find_guest(&self, lookup: &GuestLookup) -> Result<Guest, EngineError> {
        let guest_id = match lookup {
            GuestLookup::Id(id) => *id,
            GuestLookup::Email(email) => self
                .guest_emails
                .get(&email.trim().to_lowercase())
                .map(|e| *e.value())
                .ok_or_else(|| EngineError::Validation(format!("no guest with email {email}")))?,
        };
        self.guests
            .get(&guest_id)
            .map(|g| g.value().clone())
            .ok_or(EngineError::NotFound("guest", guest_id))
    }

    fn reservation_info(&self, room: &Room, r: &Reservation) -> ReservationInfo {
        ReservationInfo {
            reservation_id: r.reservation_id,
            guest_id: r.guest_id,
            guest_name: self.guests.get(&r.guest_id).map(|g| g.full_name()),
            room_id: r.room_id,
            room_number: room.room_number.clone(),
            check_in_date: r.check_in_date,
            check_out_date: r.check_out_date,
            num_guests: r.num_guests,
            total_price: r.total_price,
            status: r.status,
            is_paid: r.is_paid,
        }
    }

    pub async fn get_reservation(&self, reservation_id: Ulid) -> Result<ReservationInfo, EngineError> {
        let rs = self.room_state(self.room_of(reservation_id)?)?;
        let guard = rs.read().await;
        let r = guard
            .reservation(reservation_id)
            .ok_or(EngineError::NotFound("reservation", reservation_id))?;
        Ok(self.reservation_info(&guard.room, r))
    }

    /// Matching reservations, latest check-in first, then by id.
    pub async fn search_reservations(&self, filter: &ReservationFilter) -> Result<Vec<ReservationInfo>, EngineError> {
        let guest_id = match (&filter.email, filter.guest_id) {
            (Some(email), by_id) => {
                let Some(found) = self.guest_emails.get(&email.trim().to_lowercase()).map(|e| *e.value()) else {
                    return Ok(Vec::new());
                };
                if by_id.is_some_and(|id| id != found) {
                    return Ok(Vec::new());
                }
                Some(found)
            }
            (None, by_id) => by_id,
        };

        let room_hint = match filter.reservation_id {
            Some(id) => match self.reservation_to_room.get(&id) {
                Some(room) => Some(*room.value()),
                None => return Ok(Vec::new()),
            },
            None => None,
        };
        let candidates: Vec<SharedRoomState> = match room_hint.or(filter.room_id) {
            Some(room_id) => self.get_room_state(&room_id).into_iter().collect(),
            None => self.room_snapshot(),
        };

        let mut found = Vec::new();
        for rs in candidates {
            let guard = rs.read().await;
            if filter.room_id.is_some_and(|id| id != guard.room.room_id) {
                continue;
            }
            for r in &guard.reservations {
                let keep = filter.reservation_id.is_none_or(|id| id == r.reservation_id)
                    && guest_id.is_none_or(|id| id == r.guest_id)
                    && filter.status.is_none_or(|s| s == r.status);
                if keep {
                    found.push(self.reservation_info(&guard.room, r));
                }
            }
        }

        found.sort_by(|a, b| {
            b.check_in_date
                .cmp(&a.check_in_date)
                .then_with(|| a.reservation_id.cmp(&b.reservation_id))
        });
        Ok(found)
    }
}
