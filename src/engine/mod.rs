mod conflict;
mod error;
mod lifecycle;
mod mutations;
mod queries;
mod search;

pub use error::{EngineError, ErrorClass};
pub use mutations::{NewGuest, NewRoom, ReservationChanges};
pub use queries::{GuestLookup, ReservationFilter};
pub use search::{AvailabilityMode, RoomFilter, SortDir, SortKey};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDateTime;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::clock::Clock;
use crate::model::*;
use crate::pricing::HotelPolicy;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

/// A reservation can move rooms between the index lookup and the lock.
const RESOLVE_ATTEMPTS: usize = 3;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the journal. Appends that queue up while a flush is in progress
/// are written together and share one fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }

        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so stale bytes never prefix the next batch.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("journal flush failed for {} events: {e}", batch.len());
    }

    for (_, tx) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => commit_batch(wal, vec![(event, response)]),
    }
}

/// In-memory hotel state, rebuilt from the journal at start-up.
pub struct Engine {
    pub(super) rooms: DashMap<Ulid, SharedRoomState>,
    /// room_number → room_id
    pub(super) room_numbers: DashMap<String, Ulid>,
    pub(super) guests: DashMap<Ulid, Guest>,
    /// Lowercased email → guest_id
    pub(super) guest_emails: DashMap<String, Ulid>,
    /// reservation_id → room_id currently holding it
    pub(super) reservation_to_room: DashMap<Ulid, Ulid>,
    /// Shared by room/guest creation, exclusive during compaction.
    pub(super) catalog_lock: RwLock<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) policy: HotelPolicy,
    pub(super) clock: Arc<dyn Clock>,
}

/// Apply a room-scoped event. Caller holds the room's write lock.
fn apply_to_room(rs: &mut RoomState, event: &Event, reservation_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::RoomUpdated { price, is_available, .. } => {
            rs.room.price = *price;
            rs.room.is_available = *is_available;
        }
        Event::ReservationCreated { reservation } => {
            reservation_map.insert(reservation.reservation_id, rs.room.room_id);
            rs.insert_reservation(reservation.clone());
        }
        Event::ReservationStatusChanged { id, status, .. } => {
            if let Some(r) = rs.reservation_mut(*id) {
                r.status = *status;
            }
        }
        Event::ReservationCancelled { id, fee, .. } => {
            if let Some(r) = rs.reservation_mut(*id) {
                r.status = ReservationStatus::Cancelled;
                r.total_price = *fee;
            }
        }
        Event::ReservationCheckedIn { id, is_paid, .. } => {
            if let Some(r) = rs.reservation_mut(*id) {
                r.status = ReservationStatus::CheckedIn;
                r.is_paid = *is_paid;
            }
        }
        Event::ReservationCheckedOut { id, final_price, .. } => {
            if let Some(r) = rs.reservation_mut(*id) {
                r.status = ReservationStatus::CheckedOut;
                r.total_price = *final_price;
            }
        }
        Event::ReservationModified { from_room, reservation } => {
            if rs.room.room_id == *from_room {
                rs.remove_reservation(reservation.reservation_id);
            }
            if rs.room.room_id == reservation.room_id {
                rs.insert_reservation(reservation.clone());
                reservation_map.insert(reservation.reservation_id, reservation.room_id);
            }
        }
        // Inventory and guest records live at the map level.
        Event::RoomCreated { .. } | Event::GuestRegistered { .. } => {}
    }
}

/// Rooms an event must be applied to, in lock order.
fn event_rooms(event: &Event) -> Vec<Ulid> {
    match event {
        Event::RoomUpdated { room_id, .. } => vec![*room_id],
        Event::ReservationCreated { reservation } => vec![reservation.room_id],
        Event::ReservationStatusChanged { room_id, .. }
        | Event::ReservationCancelled { room_id, .. }
        | Event::ReservationCheckedIn { room_id, .. }
        | Event::ReservationCheckedOut { room_id, .. } => vec![*room_id],
        Event::ReservationModified { from_room, reservation } => {
            let mut ids = vec![*from_room, reservation.room_id];
            ids.sort();
            ids.dedup();
            ids
        }
        Event::RoomCreated { .. } | Event::GuestRegistered { .. } => Vec::new(),
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, policy: HotelPolicy, clock: Arc<dyn Clock>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            rooms: DashMap::new(),
            room_numbers: DashMap::new(),
            guests: DashMap::new(),
            guest_emails: DashMap::new(),
            reservation_to_room: DashMap::new(),
            catalog_lock: RwLock::new(()),
            wal_tx,
            policy,
            clock,
        };

        for event in &events {
            engine.replay_event(event);
        }
        tracing::info!(
            "replayed {} journal events: {} rooms, {} guests, {} reservations",
            events.len(),
            engine.rooms.len(),
            engine.guests.len(),
            engine.reservation_to_room.len()
        );

        Ok(engine)
    }

    /// Nothing else holds these locks during start-up, so `try_write` cannot fail.
    fn replay_event(&self, event: &Event) {
        match event {
            Event::RoomCreated { room } => self.insert_room(room.clone()),
            Event::GuestRegistered { guest } => self.insert_guest(guest.clone()),
            other => {
                let arcs: Vec<SharedRoomState> = event_rooms(other)
                    .iter()
                    .filter_map(|id| self.get_room_state(id))
                    .collect();
                for arc in arcs {
                    match arc.try_write() {
                        Ok(mut guard) => apply_to_room(&mut guard, other, &self.reservation_to_room),
                        Err(_) => tracing::error!("replay: room lock unexpectedly held"),
                    }
                }
            }
        }
    }

    pub(super) fn insert_room(&self, room: Room) {
        self.room_numbers.insert(room.room_number.clone(), room.room_id);
        self.rooms.insert(room.room_id, Arc::new(RwLock::new(RoomState::new(room))));
    }

    pub(super) fn insert_guest(&self, guest: Guest) {
        self.guest_emails.insert(guest.email.to_lowercase(), guest.guest_id);
        self.guests.insert(guest.guest_id, guest);
    }

    /// Current front-desk time.
    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    pub fn policy(&self) -> &HotelPolicy {
        &self.policy
    }

    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_room_state(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub(super) fn room_state(&self, id: Ulid) -> Result<SharedRoomState, EngineError> {
        self.get_room_state(&id).ok_or(EngineError::NotFound("room", id))
    }

    pub(super) fn room_of(&self, reservation_id: Ulid) -> Result<Ulid, EngineError> {
        self.reservation_to_room
            .get(&reservation_id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound("reservation", reservation_id))
    }

    /// Journal first, then mutate memory. A failed append leaves state untouched.
    pub(super) async fn persist_and_apply(&self, rs: &mut RoomState, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_room(rs, event, &self.reservation_to_room);
        Ok(())
    }

    /// Write-lock the room that currently holds a reservation.
    pub(super) async fn resolve_reservation_write(
        &self,
        reservation_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<RoomState>, EngineError> {
        for _ in 0..RESOLVE_ATTEMPTS {
            let room_id = self.room_of(reservation_id)?;
            let guard = self.room_state(room_id)?.write_owned().await;
            if guard.reservation(reservation_id).is_some() {
                return Ok(guard);
            }
        }
        Err(EngineError::NotFound("reservation", reservation_id))
    }
}
