use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use ulid::Ulid;

use crate::limits::MAX_FILTER_ITEMS;
use crate::model::*;

use super::conflict::has_occupying_overlap;
use super::EngineError;

/// How the date pair filters rooms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum AvailabilityMode {
    /// No occupying reservation overlaps the dates.
    #[default]
    Free,
    /// At least one occupying reservation overlaps the dates.
    Occupied,
    All,
}

impl From<String> for AvailabilityMode {
    /// Unknown modes fall back to `Free`.
    fn from(s: String) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "occupied" => AvailabilityMode::Occupied,
            "all" => AvailabilityMode::All,
            _ => AvailabilityMode::Free,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum SortKey {
    #[default]
    Price,
    Capacity,
    RoomNumber,
    RoomType,
    RoomId,
}

impl From<String> for SortKey {
    /// Unknown keys sort by price.
    fn from(s: String) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "capacity" => SortKey::Capacity,
            "room_number" => SortKey::RoomNumber,
            "room_type" => SortKey::RoomType,
            "room_id" => SortKey::RoomId,
            _ => SortKey::Price,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum SortDir {
    #[default]
    Asc,
    Desc,
}

impl From<String> for SortDir {
    fn from(s: String) -> Self {
        if s.trim().eq_ignore_ascii_case("desc") {
            SortDir::Desc
        } else {
            SortDir::Asc
        }
    }
}

/// Room search criteria. Every field is optional; set fields are AND-combined.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RoomFilter {
    /// Empty means no id filter.
    pub room_ids: Vec<Ulid>,
    /// Case-insensitive substring of the room number.
    pub room_number_like: Option<String>,
    /// Empty means no type filter.
    pub room_types: Vec<String>,
    pub min_capacity: Option<u32>,
    pub max_capacity: Option<u32>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub smoking: Option<bool>,
    /// Inventory flag as 0 or 1.
    pub is_available: Option<i64>,
    pub check_in: Option<NaiveDate>,
    pub check_out: Option<NaiveDate>,
    pub availability: AvailabilityMode,
    pub sort_by: SortKey,
    pub sort_dir: SortDir,
}

/// One compiled predicate over a room and its reservations.
#[derive(Debug)]
pub(super) enum Clause {
    IdIn(HashSet<Ulid>),
    NumberContains(String),
    TypeIn(HashSet<String>),
    CapacityBetween(u32, u32),
    PriceBetween(Decimal, Decimal),
    Smoking(bool),
    InService(bool),
    Vacant(Stay),
    Booked(Stay),
}

impl Clause {
    pub(super) fn matches(&self, rs: &RoomState) -> bool {
        let room = &rs.room;
        match self {
            Clause::IdIn(ids) => ids.contains(&room.room_id),
            Clause::NumberContains(needle) => room.room_number.to_lowercase().contains(needle.as_str()),
            Clause::TypeIn(types) => types.contains(&room.room_type),
            Clause::CapacityBetween(lo, hi) => (*lo..=*hi).contains(&room.capacity),
            Clause::PriceBetween(lo, hi) => *lo <= room.price && room.price <= *hi,
            Clause::Smoking(flag) => room.smoking == *flag,
            Clause::InService(flag) => room.is_available == *flag,
            Clause::Vacant(stay) => !has_occupying_overlap(rs, stay),
            Clause::Booked(stay) => has_occupying_overlap(rs, stay),
        }
    }
}

/// Order two bounds, swapping an inverted pair.
fn ordered<T: PartialOrd>(lo: T, hi: T) -> (T, T) {
    if lo > hi { (hi, lo) } else { (lo, hi) }
}

impl RoomFilter {
    /// Validate and lower the filter into clauses. An empty list matches every room.
    pub(super) fn compile(&self) -> Result<Vec<Clause>, EngineError> {
        if self.room_ids.len() > MAX_FILTER_ITEMS || self.room_types.len() > MAX_FILTER_ITEMS {
            return Err(EngineError::LimitExceeded("too many items in search filter"));
        }

        let mut clauses = Vec::new();

        if !self.room_ids.is_empty() {
            clauses.push(Clause::IdIn(self.room_ids.iter().copied().collect()));
        }
        if let Some(needle) = self.room_number_like.as_deref().map(str::trim)
            && !needle.is_empty()
        {
            clauses.push(Clause::NumberContains(needle.to_lowercase()));
        }
        if !self.room_types.is_empty() {
            clauses.push(Clause::TypeIn(self.room_types.iter().cloned().collect()));
        }
        if self.min_capacity.is_some() || self.max_capacity.is_some() {
            let (lo, hi) = ordered(self.min_capacity.unwrap_or(0), self.max_capacity.unwrap_or(u32::MAX));
            clauses.push(Clause::CapacityBetween(lo, hi));
        }
        if self.min_price.is_some() || self.max_price.is_some() {
            let (lo, hi) = ordered(self.min_price.unwrap_or(Decimal::MIN), self.max_price.unwrap_or(Decimal::MAX));
            clauses.push(Clause::PriceBetween(lo, hi));
        }
        if let Some(smoking) = self.smoking {
            clauses.push(Clause::Smoking(smoking));
        }
        match self.is_available {
            None => {}
            Some(0) => clauses.push(Clause::InService(false)),
            Some(1) => clauses.push(Clause::InService(true)),
            Some(other) => {
                return Err(EngineError::Validation(format!(
                    "is_available must be 0 or 1, got {other}"
                )));
            }
        }

        // A lone date means no date filtering.
        if let (Some(check_in), Some(check_out)) = (self.check_in, self.check_out) {
            if check_out <= check_in {
                return Err(EngineError::Validation(format!(
                    "check_out ({check_out}) must be after check_in ({check_in})"
                )));
            }
            let stay = Stay::new(check_in, check_out);
            match self.availability {
                AvailabilityMode::Free => clauses.push(Clause::Vacant(stay)),
                AvailabilityMode::Occupied => clauses.push(Clause::Booked(stay)),
                AvailabilityMode::All => {}
            }
        }

        Ok(clauses)
    }

    /// Result ordering: the chosen key in the chosen direction, then room_id ascending.
    pub(super) fn compare(&self, a: &Room, b: &Room) -> Ordering {
        let primary = match self.sort_by {
            SortKey::Price => a.price.cmp(&b.price),
            SortKey::Capacity => a.capacity.cmp(&b.capacity),
            SortKey::RoomNumber => a.room_number.cmp(&b.room_number),
            SortKey::RoomType => a.room_type.cmp(&b.room_type),
            SortKey::RoomId => a.room_id.cmp(&b.room_id),
        };
        let primary = match self.sort_dir {
            SortDir::Asc => primary,
            SortDir::Desc => primary.reverse(),
        };
        primary.then_with(|| a.room_id.cmp(&b.room_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn state(number: &str, kind: &str, capacity: u32, price: i64) -> RoomState {
        RoomState::new(Room {
            room_id: Ulid::new(),
            room_number: number.into(),
            room_type: kind.into(),
            capacity,
            price: Decimal::from(price),
            smoking: false,
            is_available: true,
        })
    }

    fn passes(filter: &RoomFilter, rs: &RoomState) -> bool {
        filter.compile().unwrap().iter().all(|c| c.matches(rs))
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = RoomFilter::default();
        assert!(filter.compile().unwrap().is_empty());
        assert!(passes(&filter, &state("101", "Single", 1, 90)));
    }

    #[test]
    fn inverted_ranges_are_swapped() {
        let filter = RoomFilter {
            min_capacity: Some(4),
            max_capacity: Some(2),
            min_price: Some(Decimal::from(300)),
            max_price: Some(Decimal::from(100)),
            ..Default::default()
        };
        assert!(passes(&filter, &state("201", "Double", 3, 150)));
        assert!(!passes(&filter, &state("202", "Double", 5, 150)));
        assert!(!passes(&filter, &state("203", "Double", 3, 350)));
    }

    #[test]
    fn number_match_is_case_insensitive_substring() {
        let filter = RoomFilter {
            room_number_like: Some("a".into()),
            ..Default::default()
        };
        assert!(passes(&filter, &state("12A", "Suite", 2, 200)));
        assert!(!passes(&filter, &state("12B", "Suite", 2, 200)));
    }

    #[test]
    fn is_available_must_be_zero_or_one() {
        let filter = RoomFilter {
            is_available: Some(2),
            ..Default::default()
        };
        assert!(matches!(filter.compile(), Err(EngineError::Validation(_))));

        let out_of_service = RoomFilter {
            is_available: Some(0),
            ..Default::default()
        };
        assert!(!passes(&out_of_service, &state("1", "Single", 1, 50)));
    }

    #[test]
    fn single_date_is_ignored() {
        let filter = RoomFilter {
            check_in: Some(d("2025-12-10")),
            ..Default::default()
        };
        assert!(filter.compile().unwrap().is_empty());
    }

    #[test]
    fn inverted_dates_are_rejected() {
        let filter = RoomFilter {
            check_in: Some(d("2025-12-12")),
            check_out: Some(d("2025-12-10")),
            ..Default::default()
        };
        assert!(matches!(filter.compile(), Err(EngineError::Validation(_))));
    }

    #[test]
    fn all_mode_adds_no_date_clause() {
        let filter = RoomFilter {
            check_in: Some(d("2025-12-10")),
            check_out: Some(d("2025-12-12")),
            availability: AvailabilityMode::All,
            ..Default::default()
        };
        assert!(filter.compile().unwrap().is_empty());
    }

    #[test]
    fn lenient_enum_parsing() {
        assert_eq!(AvailabilityMode::from("bogus".to_string()), AvailabilityMode::Free);
        assert_eq!(AvailabilityMode::from("OCCUPIED".to_string()), AvailabilityMode::Occupied);
        assert_eq!(SortKey::from("stars".to_string()), SortKey::Price);
        assert_eq!(SortKey::from("room_type".to_string()), SortKey::RoomType);
        assert_eq!(SortDir::from("sideways".to_string()), SortDir::Asc);
        assert_eq!(SortDir::from("DESC".to_string()), SortDir::Desc);
    }

    #[test]
    fn deserializes_from_json_with_defaults() {
        let filter: RoomFilter = serde_json::from_str(
            r#"{"room_types":["Suite"],"sort_by":"capacity","sort_dir":"desc","max_price":"250.00"}"#,
        )
        .unwrap();
        assert_eq!(filter.sort_by, SortKey::Capacity);
        assert_eq!(filter.sort_dir, SortDir::Desc);
        assert_eq!(filter.availability, AvailabilityMode::Free);
        assert_eq!(filter.max_price, Some(Decimal::from(250)));
    }

    #[test]
    fn ties_break_on_room_id() {
        let a = state("1", "Single", 1, 100).room;
        let b = state("2", "Single", 1, 100).room;
        let (lo, hi) = if a.room_id < b.room_id { (a, b) } else { (b, a) };
        let desc = RoomFilter {
            sort_dir: SortDir::Desc,
            ..Default::default()
        };
        assert_eq!(desc.compare(&lo, &hi), Ordering::Less);
        assert_eq!(RoomFilter::default().compare(&lo, &hi), Ordering::Less);
    }
}
