use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use rust_decimal::Decimal;

use crate::engine::EngineError;
use crate::model::Stay;

/// Front-desk timing and fee policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HotelPolicy {
    /// Daily check-in hour; anchors the check-in deadline.
    pub check_in_time: NaiveTime,
    /// Daily check-out cutoff; later check-outs are charged a late fee.
    pub check_out_time: NaiveTime,
    /// Late check-out fee as a percentage of one night's rate.
    pub late_checkout_percent: u32,
}

impl HotelPolicy {
    /// Returns None if either hour is outside 0..=23.
    pub fn new(check_in_hour: u32, check_out_hour: u32, late_checkout_percent: u32) -> Option<Self> {
        Some(Self {
            check_in_time: NaiveTime::from_hms_opt(check_in_hour, 0, 0)?,
            check_out_time: NaiveTime::from_hms_opt(check_out_hour, 0, 0)?,
            late_checkout_percent,
        })
    }

    pub fn check_in_deadline(&self, check_in_date: NaiveDate) -> NaiveDateTime {
        check_in_date.and_time(self.check_in_time)
    }

    pub fn check_out_cutoff(&self, check_out_date: NaiveDate) -> NaiveDateTime {
        check_out_date.and_time(self.check_out_time)
    }
}

impl Default for HotelPolicy {
    fn default() -> Self {
        Self {
            check_in_time: NaiveTime::from_hms_opt(14, 0, 0).unwrap_or(NaiveTime::MIN),
            check_out_time: NaiveTime::from_hms_opt(12, 0, 0).unwrap_or(NaiveTime::MIN),
            late_checkout_percent: 50,
        }
    }
}

/// `nightly × nights`. Same-day or inverted ranges are rejected.
pub fn total_price(nightly: Decimal, check_in: NaiveDate, check_out: NaiveDate) -> Result<Decimal, EngineError> {
    if check_out <= check_in {
        return Err(EngineError::Validation(
            "check_out must be after check_in".into(),
        ));
    }
    stay_price(nightly, &Stay::new(check_in, check_out))
}

pub fn stay_price(nightly: Decimal, stay: &Stay) -> Result<Decimal, EngineError> {
    nightly
        .checked_mul(Decimal::from(stay.nights()))
        .ok_or_else(|| EngineError::Validation(format!("price of {} nights at {nightly} overflows", stay.nights())))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeAssessment {
    pub percent: u32,
    pub fee: Decimal,
    pub refund: Decimal,
    pub reason: &'static str,
}

/// Cancellation fee tier, measured from `now` to the check-in deadline.
pub fn cancellation_fee(
    price: Decimal,
    check_in_date: NaiveDate,
    now: NaiveDateTime,
    policy: &HotelPolicy,
) -> FeeAssessment {
    let until_deadline = policy.check_in_deadline(check_in_date) - now;
    let day = TimeDelta::days(1);

    let (percent, reason) = if until_deadline > day {
        (0, "Cancelled more than 24 hours before check-in: no fee")
    } else if until_deadline >= TimeDelta::zero() {
        (20, "Cancelled within 24 hours of check-in: 20% fee")
    } else if -until_deadline <= day {
        (50, "Cancelled within 24 hours after the check-in deadline: 50% fee")
    } else {
        (100, "Cancelled more than 24 hours after the check-in deadline: full charge")
    };

    let fee = percent_of(price, percent);
    FeeAssessment {
        percent,
        fee,
        refund: price - fee,
        reason,
    }
}

/// Late check-out fee, charged at or after the check-out cutoff.
pub fn late_checkout_fee(
    nightly: Decimal,
    check_out_date: NaiveDate,
    now: NaiveDateTime,
    policy: &HotelPolicy,
) -> Decimal {
    if now >= policy.check_out_cutoff(check_out_date) {
        percent_of(nightly, policy.late_checkout_percent)
    } else {
        Decimal::ZERO
    }
}

fn percent_of(amount: Decimal, percent: u32) -> Decimal {
    (amount.saturating_mul(Decimal::from(percent)) / Decimal::ONE_HUNDRED).round_dp(2)
}
