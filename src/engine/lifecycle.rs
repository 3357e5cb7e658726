use chrono::{NaiveDateTime, TimeDelta};
use tracing::{debug, info};
use ulid::Ulid;

use crate::model::*;
use crate::observability;

use super::{Engine, EngineError};

impl Engine {
    /// Age reservations by wall-clock time. Running it twice in a row changes
    /// nothing the second time, and terminal reservations are never touched.
    ///
    /// 1. Confirmed reservations whose check-in date has passed become Late.
    /// 2. From the check-out cutoff on, guests still Checked-in on their
    ///    check-out date become Late Check-out.
    /// 3. Late and Late Check-out reservations more than 24h past their
    ///    check-in deadline are cancelled through the regular cancel path.
    pub async fn run_daily_lifecycle_sweep(&self) -> Result<SweepReport, EngineError> {
        let now = self.clock.now();
        let today = now.date();
        let past_checkout_cutoff = now >= self.policy.check_out_cutoff(today);
        let mut report = SweepReport::default();

        let rooms: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        for rs in rooms {
            let mut guard = rs.write().await;

            let missed_arrivals: Vec<Ulid> = guard
                .reservations
                .iter()
                .filter(|r| r.status.is_pre_arrival() && r.check_in_date < today)
                .map(|r| r.reservation_id)
                .collect();
            for id in missed_arrivals {
                self.transition_locked(&mut guard, id, ReservationStatus::Late).await?;
                report.marked_late += 1;
            }

            if past_checkout_cutoff {
                let overstays: Vec<Ulid> = guard
                    .reservations
                    .iter()
                    .filter(|r| r.check_out_date == today && overstay_candidate(r.status))
                    .map(|r| r.reservation_id)
                    .collect();
                for id in overstays {
                    self.transition_locked(&mut guard, id, ReservationStatus::LateCheckout)
                        .await?;
                    report.marked_late_checkout += 1;
                }
            }

            let abandoned: Vec<Ulid> = guard
                .reservations
                .iter()
                .filter(|r| {
                    matches!(r.status, ReservationStatus::Late | ReservationStatus::LateCheckout)
                        && self.abandoned(r, now)
                })
                .map(|r| r.reservation_id)
                .collect();
            for id in abandoned {
                let receipt = self.cancel_locked(&mut guard, id, now).await?;
                debug!("sweep cancelled {id}, fee {}", receipt.cancellation_fee);
                metrics::counter!(observability::CANCELLATIONS_TOTAL, "origin" => "sweep").increment(1);
                report.cancelled += 1;
            }
        }

        if report.total() > 0 {
            info!(
                "lifecycle sweep: {} late, {} late check-out, {} cancelled",
                report.marked_late, report.marked_late_checkout, report.cancelled
            );
        } else {
            debug!("lifecycle sweep: nothing to do");
        }
        Ok(report)
    }

    fn abandoned(&self, r: &Reservation, now: NaiveDateTime) -> bool {
        now - self.policy.check_in_deadline(r.check_in_date) > TimeDelta::days(1)
    }

    async fn transition_locked(
        &self,
        rs: &mut RoomState,
        reservation_id: Ulid,
        next: ReservationStatus,
    ) -> Result<(), EngineError> {
        let current = rs
            .reservation(reservation_id)
            .map(|r| r.status)
            .ok_or(EngineError::NotFound("reservation", reservation_id))?;
        if !current.can_transition_to(next) {
            return Err(EngineError::InvalidState {
                id: reservation_id,
                status: current,
                action: "age",
            });
        }
        let event = Event::ReservationStatusChanged {
            id: reservation_id,
            room_id: rs.room.room_id,
            status: next,
        };
        self.persist_and_apply(rs, &event).await?;
        metrics::counter!(observability::SWEEP_TRANSITIONS_TOTAL, "to" => next.as_str()).increment(1);
        Ok(())
    }
}

/// Statuses other than Checked-out, Late Check-out and Late that the
/// transition table lets move to Late Check-out.
fn overstay_candidate(status: ReservationStatus) -> bool {
    !matches!(
        status,
        ReservationStatus::CheckedOut | ReservationStatus::LateCheckout | ReservationStatus::Late
    ) && status.can_transition_to(ReservationStatus::LateCheckout)
}
