//! Newline-delimited JSON sessions.
//!
//! Each line is one request, `{"op": "<name>", ...args}`, answered by one line:
//! `{"ok":true,"result":...}` or `{"ok":false,"error":{"kind":...,"message":...}}`.

use std::io;
use std::sync::Arc;

use chrono::NaiveDate;
use futures::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use ulid::Ulid;

use crate::engine::{
    Engine, EngineError, ErrorClass, GuestLookup, NewGuest, NewRoom, ReservationChanges,
    ReservationFilter, RoomFilter,
};
use crate::limits::MAX_REQUEST_LINE_LEN;
use crate::model::ReservationStatus;
use crate::observability;

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    CreateRoom(NewRoom),
    UpdateRoom {
        room_id: Ulid,
        #[serde(default)]
        price: Option<Decimal>,
        #[serde(default)]
        is_available: Option<bool>,
    },
    GetRoom {
        room_id: Ulid,
    },
    ListRooms,
    SearchRooms(RoomFilter),
    RoomAvailability {
        room_id: Ulid,
        #[serde(default)]
        check_in: Option<NaiveDate>,
        #[serde(default)]
        check_out: Option<NaiveDate>,
    },
    RegisterGuest(NewGuest),
    FindGuest {
        #[serde(default)]
        guest_id: Option<Ulid>,
        #[serde(default)]
        email: Option<String>,
    },
    Reserve {
        guest_id: Ulid,
        room_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
        #[serde(default)]
        num_guests: Option<u32>,
        #[serde(default)]
        status: Option<ReservationStatus>,
    },
    Cancel {
        reservation_id: Ulid,
    },
    CheckIn {
        reservation_id: Ulid,
        #[serde(default)]
        confirm_payment: bool,
    },
    CheckOut {
        reservation_id: Ulid,
    },
    UpdateReservation {
        reservation_id: Ulid,
        #[serde(default)]
        changes: ReservationChanges,
    },
    GetReservation {
        reservation_id: Ulid,
    },
    SearchReservations(ReservationFilter),
    Sweep,
    Compact,
}

impl Request {
    /// Short label for metrics.
    pub fn op(&self) -> &'static str {
        match self {
            Request::CreateRoom(_) => "create_room",
            Request::UpdateRoom { .. } => "update_room",
            Request::GetRoom { .. } => "get_room",
            Request::ListRooms => "list_rooms",
            Request::SearchRooms(_) => "search_rooms",
            Request::RoomAvailability { .. } => "room_availability",
            Request::RegisterGuest(_) => "register_guest",
            Request::FindGuest { .. } => "find_guest",
            Request::Reserve { .. } => "reserve",
            Request::Cancel { .. } => "cancel",
            Request::CheckIn { .. } => "check_in",
            Request::CheckOut { .. } => "check_out",
            Request::UpdateReservation { .. } => "update_reservation",
            Request::GetReservation { .. } => "get_reservation",
            Request::SearchReservations(_) => "search_reservations",
            Request::Sweep => "sweep",
            Request::Compact => "compact",
        }
    }
}

fn to_result<T: serde::Serialize>(value: T) -> Result<Value, EngineError> {
    serde_json::to_value(value).map_err(|e| EngineError::Validation(format!("unencodable result: {e}")))
}

pub async fn dispatch(engine: &Engine, request: Request) -> Result<Value, EngineError> {
    match request {
        Request::CreateRoom(new) => {
            let room_id = engine.create_room(new).await?;
            Ok(json!({ "room_id": room_id }))
        }
        Request::UpdateRoom { room_id, price, is_available } => {
            to_result(engine.update_room(room_id, price, is_available).await?)
        }
        Request::GetRoom { room_id } => to_result(engine.get_room(room_id).await?),
        Request::ListRooms => to_result(engine.list_rooms().await),
        Request::SearchRooms(filter) => to_result(engine.search_rooms(&filter).await?),
        Request::RoomAvailability { room_id, check_in, check_out } => {
            let available = engine.room_availability(room_id, check_in, check_out).await?;
            Ok(json!({ "available": available }))
        }
        Request::RegisterGuest(new) => {
            let guest_id = engine.register_guest(new).await?;
            Ok(json!({ "guest_id": guest_id }))
        }
        Request::FindGuest { guest_id, email } => {
            let lookup = match (guest_id, email) {
                (Some(id), _) => GuestLookup::Id(id),
                (None, Some(email)) => GuestLookup::Email(email),
                (None, None) => {
                    return Err(EngineError::Validation("find_guest needs guest_id or email".into()));
                }
            };
            to_result(engine.find_guest(&lookup)?)
        }
        Request::Reserve { guest_id, room_id, check_in, check_out, num_guests, status } => {
            let reservation_id = engine
                .reserve_room(guest_id, room_id, check_in, check_out, num_guests, status)
                .await?;
            Ok(json!({ "reservation_id": reservation_id }))
        }
        Request::Cancel { reservation_id } => to_result(engine.cancel_reservation(reservation_id).await?),
        Request::CheckIn { reservation_id, confirm_payment } => {
            to_result(engine.check_in_reservation(reservation_id, confirm_payment).await?)
        }
        Request::CheckOut { reservation_id } => to_result(engine.check_out_reservation(reservation_id).await?),
        Request::UpdateReservation { reservation_id, changes } => {
            to_result(engine.update_reservation(reservation_id, changes).await?)
        }
        Request::GetReservation { reservation_id } => to_result(engine.get_reservation(reservation_id).await?),
        Request::SearchReservations(filter) => to_result(engine.search_reservations(&filter).await?),
        Request::Sweep => to_result(engine.run_daily_lifecycle_sweep().await?),
        Request::Compact => {
            engine.compact_wal().await?;
            Ok(Value::Null)
        }
    }
}

fn error_reply(kind: ErrorClass, message: String) -> String {
    json!({ "ok": false, "error": { "kind": kind.as_str(), "message": message } }).to_string()
}

/// Handle one request line and render the reply line.
pub async fn handle_line(engine: &Engine, line: &str) -> String {
    let request: Request = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => {
            metrics::counter!(observability::REQUESTS_TOTAL, "op" => "malformed", "status" => "error").increment(1);
            return error_reply(ErrorClass::Validation, format!("malformed request: {e}"));
        }
    };

    let op = request.op();
    let started = std::time::Instant::now();
    let outcome = dispatch(engine, request).await;
    metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "op" => op)
        .record(started.elapsed().as_secs_f64());

    match outcome {
        Ok(result) => {
            metrics::counter!(observability::REQUESTS_TOTAL, "op" => op, "status" => "ok").increment(1);
            json!({ "ok": true, "result": result }).to_string()
        }
        Err(e) => {
            metrics::counter!(observability::REQUESTS_TOTAL, "op" => op, "status" => "error").increment(1);
            tracing::debug!("{op} failed: {e}");
            error_reply(e.class(), e.to_string())
        }
    }
}

/// Serve one session until the peer disconnects.
pub async fn process_connection<S>(socket: S, engine: Arc<Engine>) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_REQUEST_LINE_LEN));

    while let Some(frame) = framed.next().await {
        let reply = match frame {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => handle_line(&engine, &line).await,
            Err(LinesCodecError::MaxLineLengthExceeded) => error_reply(
                ErrorClass::Validation,
                format!("request line exceeds {MAX_REQUEST_LINE_LEN} bytes"),
            ),
            Err(LinesCodecError::Io(e)) => return Err(e),
        };
        framed.send(reply).await.map_err(|e| match e {
            LinesCodecError::Io(e) => e,
            other => io::Error::other(other.to_string()),
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::pricing::HotelPolicy;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("innkeep_test_wire");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn engine(name: &str) -> Engine {
        let start = NaiveDate::from_ymd_opt(2025, 12, 1).unwrap().and_hms_opt(10, 0, 0).unwrap();
        Engine::new(test_wal_path(name), HotelPolicy::default(), Arc::new(ManualClock::new(start))).unwrap()
    }

    async fn call(engine: &Engine, line: &str) -> Value {
        serde_json::from_str(&handle_line(engine, line).await).unwrap()
    }

    #[test]
    fn parses_ops() {
        let r: Request = serde_json::from_str(r#"{"op":"list_rooms"}"#).unwrap();
        assert_eq!(r.op(), "list_rooms");
        let r: Request =
            serde_json::from_str(r#"{"op":"search_rooms","min_capacity":2,"availability":"occupied"}"#).unwrap();
        assert_eq!(r.op(), "search_rooms");
        let r: Request = serde_json::from_str(&format!(
            r#"{{"op":"update_reservation","reservation_id":"{}","changes":{{"is_paid":true}}}}"#,
            Ulid::new()
        ))
        .unwrap();
        match r {
            Request::UpdateReservation { changes, .. } => assert_eq!(changes.is_paid, Some(true)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_json_is_a_validation_error() {
        let engine = engine("malformed.wal");
        let reply = call(&engine, "{not json").await;
        assert_eq!(reply["ok"], false);
        assert_eq!(reply["error"]["kind"], "validation");

        let reply = call(&engine, r#"{"op":"teleport"}"#).await;
        assert_eq!(reply["error"]["kind"], "validation");
    }

    #[tokio::test]
    async fn create_and_fetch_room() {
        let engine = engine("create_fetch.wal");
        let reply = call(
            &engine,
            r#"{"op":"create_room","room_number":"305","room_type":"Suite","capacity":4,"price":"300.00"}"#,
        )
        .await;
        assert_eq!(reply["ok"], true);
        let room_id = reply["result"]["room_id"].as_str().unwrap().to_string();

        let reply = call(&engine, &format!(r#"{{"op":"get_room","room_id":"{room_id}"}}"#)).await;
        assert_eq!(reply["result"]["room_number"], "305");
        assert_eq!(reply["result"]["price"], "300.00");
        assert_eq!(reply["result"]["is_available"], true);
    }

    #[tokio::test]
    async fn unknown_room_reports_validation_kind() {
        let engine = engine("unknown_room.wal");
        let reply = call(&engine, &format!(r#"{{"op":"get_room","room_id":"{}"}}"#, Ulid::new())).await;
        assert_eq!(reply["ok"], false);
        assert_eq!(reply["error"]["kind"], "validation");
        assert!(reply["error"]["message"].as_str().unwrap().contains("room does not exist"));
    }

    #[tokio::test]
    async fn find_guest_needs_a_key() {
        let engine = engine("find_guest.wal");
        let reply = call(&engine, r#"{"op":"find_guest"}"#).await;
        assert_eq!(reply["error"]["kind"], "validation");
    }
}
