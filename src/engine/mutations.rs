use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::{oneshot, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::pricing::{cancellation_fee, late_checkout_fee, stay_price};

use super::conflict::{check_no_conflict, validate_stay};
use super::{apply_to_room, Engine, EngineError, WalCommand};

#[derive(Debug, Clone, Deserialize)]
pub struct NewRoom {
    pub room_number: String,
    pub room_type: String,
    pub capacity: u32,
    pub price: Decimal,
    #[serde(default)]
    pub smoking: bool,
    #[serde(default = "in_service")]
    pub is_available: bool,
}

fn in_service() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewGuest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

/// Edits to an existing reservation. Unset fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReservationChanges {
    pub room_id: Option<Ulid>,
    pub check_in: Option<NaiveDate>,
    pub check_out: Option<NaiveDate>,
    pub num_guests: Option<u32>,
    pub is_paid: Option<bool>,
}

impl ReservationChanges {
    /// True when the edit touches which room or nights are held.
    fn moves_stay(&self) -> bool {
        self.room_id.is_some() || self.check_in.is_some() || self.check_out.is_some() || self.num_guests.is_some()
    }

    fn is_empty(&self) -> bool {
        !self.moves_stay() && self.is_paid.is_none()
    }
}

fn check_text(field: &'static str, value: &str, max_len: usize) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::Validation(format!("{field} must not be empty")));
    }
    if value.len() > max_len {
        return Err(EngineError::LimitExceeded(field));
    }
    Ok(())
}

fn check_email(email: &str) -> Result<(), EngineError> {
    check_text("email", email, MAX_EMAIL_LEN)?;
    let well_formed = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    };
    if !well_formed {
        return Err(EngineError::Validation(format!("malformed email address: {email}")));
    }
    Ok(())
}

fn check_price(price: Decimal) -> Result<(), EngineError> {
    if price.is_sign_negative() {
        return Err(EngineError::Validation("nightly price must not be negative".into()));
    }
    if price > Decimal::from(MAX_NIGHTLY_PRICE) {
        return Err(EngineError::Validation(format!(
            "nightly price must not exceed {MAX_NIGHTLY_PRICE}"
        )));
    }
    Ok(())
}

fn optional_contact(value: Option<String>) -> Result<Option<String>, EngineError> {
    match value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        Some(v) if v.len() > MAX_CONTACT_LEN => Err(EngineError::LimitExceeded("contact field")),
        other => Ok(other),
    }
}

impl Engine {
    pub async fn create_room(&self, new: NewRoom) -> Result<Ulid, EngineError> {
        let room_number = new.room_number.trim().to_string();
        let room_type = new.room_type.trim().to_string();
        check_text("room_number", &room_number, MAX_ROOM_NUMBER_LEN)?;
        check_text("room_type", &room_type, MAX_ROOM_TYPE_LEN)?;
        if new.capacity == 0 {
            return Err(EngineError::Validation("capacity must be at least 1".into()));
        }
        check_price(new.price)?;

        let _catalog = self.catalog_lock.read().await;
        if self.rooms.len() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        let room_id = Ulid::new();
        match self.room_numbers.entry(room_number.clone()) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(format!("room number {room_number}"))),
            Entry::Vacant(slot) => {
                slot.insert(room_id);
            }
        }

        let room = Room {
            room_id,
            room_number,
            room_type,
            capacity: new.capacity,
            price: new.price,
            smoking: new.smoking,
            is_available: new.is_available,
        };
        let event = Event::RoomCreated { room: room.clone() };
        if let Err(e) = self.wal_append(&event).await {
            self.room_numbers.remove(&room.room_number);
            return Err(e);
        }
        info!("room {} created ({}, sleeps {})", room.room_number, room.room_type, room.capacity);
        self.insert_room(room);
        Ok(room_id)
    }

    /// Change the nightly rate or pull the room in/out of service. Existing
    /// reservations keep the price they were booked at.
    pub async fn update_room(
        &self,
        room_id: Ulid,
        price: Option<Decimal>,
        is_available: Option<bool>,
    ) -> Result<Room, EngineError> {
        if let Some(price) = price {
            check_price(price)?;
        }
        let rs = self.room_state(room_id)?;
        let mut guard = rs.write().await;
        let event = Event::RoomUpdated {
            room_id,
            price: price.unwrap_or(guard.room.price),
            is_available: is_available.unwrap_or(guard.room.is_available),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(guard.room.clone())
    }

    pub async fn register_guest(&self, new: NewGuest) -> Result<Ulid, EngineError> {
        let first_name = new.first_name.trim().to_string();
        let last_name = new.last_name.trim().to_string();
        let email = new.email.trim().to_string();
        check_text("first_name", &first_name, MAX_NAME_LEN)?;
        check_text("last_name", &last_name, MAX_NAME_LEN)?;
        check_email(&email)?;
        let phone = optional_contact(new.phone)?;
        let address = optional_contact(new.address)?;

        let _catalog = self.catalog_lock.read().await;
        if self.guests.len() >= MAX_GUESTS {
            return Err(EngineError::LimitExceeded("too many guests"));
        }
        let guest_id = Ulid::new();
        let key = email.to_lowercase();
        match self.guest_emails.entry(key.clone()) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(format!("guest with email {email}"))),
            Entry::Vacant(slot) => {
                slot.insert(guest_id);
            }
        }

        let guest = Guest {
            guest_id,
            first_name,
            last_name,
            email,
            phone,
            address,
        };
        let event = Event::GuestRegistered { guest: guest.clone() };
        if let Err(e) = self.wal_append(&event).await {
            self.guest_emails.remove(&key);
            return Err(e);
        }
        self.insert_guest(guest);
        Ok(guest_id)
    }

    /// Book a room. The overlap check runs again under the room's write lock,
    /// so of several concurrent requests for the same nights exactly one wins.
    pub async fn reserve_room(
        &self,
        guest_id: Ulid,
        room_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
        num_guests: Option<u32>,
        status: Option<ReservationStatus>,
    ) -> Result<Ulid, EngineError> {
        let stay = validate_stay(check_in, check_out)?;
        let status = status.unwrap_or(ReservationStatus::Confirmed);
        if !status.is_occupying() {
            return Err(EngineError::Validation(format!(
                "a new reservation must start as Confirmed or Checked-in, not {status}"
            )));
        }
        let num_guests = num_guests.unwrap_or(1);
        if num_guests == 0 {
            return Err(EngineError::Validation("num_guests must be at least 1".into()));
        }
        if !self.guests.contains_key(&guest_id) {
            return Err(EngineError::NotFound("guest", guest_id));
        }
        let rs = self.room_state(room_id)?;

        let mut guard = rs.write().await;
        if !guard.room.is_available {
            return Err(EngineError::Validation(format!(
                "room {} is out of service",
                guard.room.room_number
            )));
        }
        if num_guests > guard.room.capacity {
            return Err(EngineError::Validation(format!(
                "{num_guests} guests exceed room {} capacity of {}",
                guard.room.room_number, guard.room.capacity
            )));
        }
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many reservations on room"));
        }
        if let Err(e) = check_no_conflict(&guard, &stay, None) {
            metrics::counter!(observability::RESERVATION_CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }

        let reservation = Reservation {
            reservation_id: Ulid::new(),
            guest_id,
            room_id,
            check_in_date: check_in,
            check_out_date: check_out,
            num_guests,
            total_price: stay_price(guard.room.price, &stay)?,
            status,
            is_paid: false,
            created_at: self.clock.now(),
        };
        let reservation_id = reservation.reservation_id;
        let event = Event::ReservationCreated { reservation };
        self.persist_and_apply(&mut guard, &event).await?;

        metrics::counter!(observability::RESERVATIONS_CONFIRMED_TOTAL).increment(1);
        info!(
            "reservation {reservation_id}: room {} {check_in}..{check_out} ({status})",
            guard.room.room_number
        );
        Ok(reservation_id)
    }

    pub async fn cancel_reservation(&self, reservation_id: Ulid) -> Result<CancellationReceipt, EngineError> {
        let mut guard = self.resolve_reservation_write(reservation_id).await?;
        let receipt = self.cancel_locked(&mut guard, reservation_id, self.clock.now()).await?;
        metrics::counter!(observability::CANCELLATIONS_TOTAL, "origin" => "desk").increment(1);
        Ok(receipt)
    }

    /// Cancel under an already-held room lock. Desk cancellations and the
    /// sweep both come through here so fee accounting is identical.
    pub(super) async fn cancel_locked(
        &self,
        rs: &mut RoomState,
        reservation_id: Ulid,
        now: NaiveDateTime,
    ) -> Result<CancellationReceipt, EngineError> {
        let r = rs
            .reservation(reservation_id)
            .ok_or(EngineError::NotFound("reservation", reservation_id))?;
        if !r.status.can_transition_to(ReservationStatus::Cancelled) {
            return Err(EngineError::InvalidState {
                id: reservation_id,
                status: r.status,
                action: "cancel",
            });
        }
        let original_price = r.total_price;
        let assessment = cancellation_fee(original_price, r.check_in_date, now, &self.policy);

        let event = Event::ReservationCancelled {
            id: reservation_id,
            room_id: rs.room.room_id,
            fee: assessment.fee,
        };
        self.persist_and_apply(rs, &event).await?;
        info!("reservation {reservation_id} cancelled: {}", assessment.reason);

        Ok(CancellationReceipt {
            reservation_id,
            original_price,
            cancellation_fee: assessment.fee,
            refund_amount: assessment.refund,
            reason: assessment.reason.to_string(),
        })
    }

    /// Allowed from the check-in hour on the check-in date through the whole
    /// following day. An unpaid stay needs `confirm_payment`.
    pub async fn check_in_reservation(
        &self,
        reservation_id: Ulid,
        confirm_payment: bool,
    ) -> Result<CheckInReceipt, EngineError> {
        let mut guard = self.resolve_reservation_write(reservation_id).await?;
        let now = self.clock.now();
        let today = now.date();
        let r = guard
            .reservation(reservation_id)
            .cloned()
            .ok_or(EngineError::NotFound("reservation", reservation_id))?;

        if !r.status.can_transition_to(ReservationStatus::CheckedIn) {
            return Err(EngineError::InvalidState {
                id: reservation_id,
                status: r.status,
                action: "check in",
            });
        }
        let opens_at = self.policy.check_in_deadline(r.check_in_date);
        let on_time = today == r.check_in_date && now >= opens_at;
        let day_late = r.check_in_date.succ_opt() == Some(today);
        if !on_time && !day_late {
            let detail = if now < opens_at {
                format!("check-in opens at {opens_at}")
            } else {
                format!("the check-in window for {} has closed", r.check_in_date)
            };
            return Err(EngineError::OutsideWindow {
                id: reservation_id,
                action: "check in",
                detail,
            });
        }
        if !r.is_paid && !confirm_payment {
            return Err(EngineError::PaymentRequired {
                id: reservation_id,
                amount: r.total_price,
            });
        }
        // A Late reservation gave up the room; someone may hold it now.
        check_no_conflict(&guard, &r.stay(), Some(reservation_id))?;

        let event = Event::ReservationCheckedIn {
            id: reservation_id,
            room_id: guard.room.room_id,
            is_paid: true,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("reservation {reservation_id} checked in to room {}", guard.room.room_number);

        let message = if on_time {
            format!("Checked in to room {}.", guard.room.room_number)
        } else {
            format!("Checked in to room {} one day late.", guard.room.room_number)
        };
        Ok(CheckInReceipt {
            message,
            checked_in_at: now,
            payment_settled: !r.is_paid,
        })
    }

    /// Only on the check-out date. At or after the cutoff a late fee of a
    /// share of the booked nightly rate is added.
    pub async fn check_out_reservation(&self, reservation_id: Ulid) -> Result<CheckOutReceipt, EngineError> {
        let mut guard = self.resolve_reservation_write(reservation_id).await?;
        let now = self.clock.now();
        let r = guard
            .reservation(reservation_id)
            .cloned()
            .ok_or(EngineError::NotFound("reservation", reservation_id))?;

        if !r.status.can_transition_to(ReservationStatus::CheckedOut) {
            return Err(EngineError::InvalidState {
                id: reservation_id,
                status: r.status,
                action: "check out",
            });
        }
        if now.date() != r.check_out_date {
            return Err(EngineError::OutsideWindow {
                id: reservation_id,
                action: "check out",
                detail: format!("check-out is only possible on {}", r.check_out_date),
            });
        }

        let nightly = (r.total_price / Decimal::from(r.stay().nights())).round_dp(2);
        let late_fee = late_checkout_fee(nightly, r.check_out_date, now, &self.policy);
        let final_price = r.total_price + late_fee;
        let event = Event::ReservationCheckedOut {
            id: reservation_id,
            room_id: guard.room.room_id,
            final_price,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("reservation {reservation_id} checked out, late fee {late_fee}");

        let message = if late_fee.is_zero() {
            format!("Checked out of room {}.", guard.room.room_number)
        } else {
            format!(
                "Checked out of room {} after {}; late check-out fee applied.",
                guard.room.room_number, self.policy.check_out_time
            )
        };
        Ok(CheckOutReceipt {
            message,
            original_price: r.total_price,
            late_fee,
            final_price,
            is_paid: r.is_paid,
        })
    }

    /// Move, re-date or resize a Confirmed reservation, or flip its paid flag.
    /// A room move holds both rooms' write locks, taken in id order.
    pub async fn update_reservation(
        &self,
        reservation_id: Ulid,
        changes: ReservationChanges,
    ) -> Result<UpdateReceipt, EngineError> {
        if changes.is_empty() {
            return Err(EngineError::Validation("no changes requested".into()));
        }
        if changes.num_guests == Some(0) {
            return Err(EngineError::Validation("num_guests must be at least 1".into()));
        }

        for _ in 0..super::RESOLVE_ATTEMPTS {
            let from_id = self.room_of(reservation_id)?;
            let to_id = changes.room_id.unwrap_or(from_id);
            let from_rs = self.room_state(from_id)?;

            if from_id == to_id {
                let mut guard = from_rs.write_owned().await;
                if guard.reservation(reservation_id).is_none() {
                    continue;
                }
                return self.modify_locked(&mut guard, None, reservation_id, &changes).await;
            }

            let to_rs = self.room_state(to_id)?;
            let (first, second) = if from_id < to_id {
                (from_rs, to_rs)
            } else {
                (to_rs, from_rs)
            };
            let first = first.write_owned().await;
            let second = second.write_owned().await;
            let (mut from, mut to) = if from_id < to_id { (first, second) } else { (second, first) };
            if from.reservation(reservation_id).is_none() {
                continue;
            }
            return self
                .modify_locked(&mut from, Some(&mut *to), reservation_id, &changes)
                .await;
        }
        Err(EngineError::NotFound("reservation", reservation_id))
    }

    async fn modify_locked(
        &self,
        from: &mut RoomState,
        to: Option<&mut RoomState>,
        reservation_id: Ulid,
        changes: &ReservationChanges,
    ) -> Result<UpdateReceipt, EngineError> {
        let current = from
            .reservation(reservation_id)
            .cloned()
            .ok_or(EngineError::NotFound("reservation", reservation_id))?;
        if current.status.is_terminal()
            || (changes.moves_stay() && current.status != ReservationStatus::Confirmed)
        {
            return Err(EngineError::InvalidState {
                id: reservation_id,
                status: current.status,
                action: "modify",
            });
        }

        let mut updated = current.clone();
        updated.is_paid = changes.is_paid.unwrap_or(current.is_paid);

        if changes.moves_stay() {
            let target: &RoomState = match to.as_deref() {
                Some(other) => other,
                None => &*from,
            };
            let stay = validate_stay(
                changes.check_in.unwrap_or(current.check_in_date),
                changes.check_out.unwrap_or(current.check_out_date),
            )?;
            let num_guests = changes.num_guests.unwrap_or(current.num_guests);
            if num_guests > target.room.capacity {
                return Err(EngineError::Validation(format!(
                    "{num_guests} guests exceed room {} capacity of {}",
                    target.room.room_number, target.room.capacity
                )));
            }
            if to.is_some() {
                if !target.room.is_available {
                    return Err(EngineError::Validation(format!(
                        "room {} is out of service",
                        target.room.room_number
                    )));
                }
                if target.reservations.len() >= MAX_RESERVATIONS_PER_ROOM {
                    return Err(EngineError::LimitExceeded("too many reservations on room"));
                }
            }
            if let Err(e) = check_no_conflict(target, &stay, Some(reservation_id)) {
                metrics::counter!(observability::RESERVATION_CONFLICTS_TOTAL).increment(1);
                return Err(e);
            }

            updated.room_id = target.room.room_id;
            updated.check_in_date = stay.check_in;
            updated.check_out_date = stay.check_out;
            updated.num_guests = num_guests;
            updated.total_price = stay_price(target.room.price, &stay)?;
        }

        let receipt = UpdateReceipt {
            old_price: current.total_price,
            new_price: updated.total_price,
            difference: updated.total_price - current.total_price,
            is_paid: updated.is_paid,
        };
        let event = Event::ReservationModified {
            from_room: from.room.room_id,
            reservation: updated,
        };
        self.wal_append(&event).await?;
        apply_to_room(from, &event, &self.reservation_to_room);
        if let Some(to) = to {
            apply_to_room(to, &event, &self.reservation_to_room);
        }
        info!("reservation {reservation_id} modified, price {} -> {}", receipt.old_price, receipt.new_price);
        Ok(receipt)
    }

    /// Rewrite the journal as the minimal event set for the current state.
    /// Catalog writes and every room are locked until the swap completes.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _catalog = self.catalog_lock.write().await;

        let mut events: Vec<Event> = self
            .guests
            .iter()
            .map(|g| Event::GuestRegistered { guest: g.value().clone() })
            .collect();

        let room_arcs: Vec<Arc<RwLock<RoomState>>> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut guards = Vec::with_capacity(room_arcs.len());
        for rs in room_arcs {
            guards.push(rs.read_owned().await);
        }
        for guard in &guards {
            events.push(Event::RoomCreated { room: guard.room.clone() });
        }
        for guard in &guards {
            events.extend(
                guard
                    .reservations
                    .iter()
                    .map(|r| Event::ReservationCreated { reservation: r.clone() }),
            );
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        metrics::counter!(observability::WAL_COMPACTIONS_TOTAL).increment(1);
        info!("journal compacted to {count} events");
        Ok(())
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
