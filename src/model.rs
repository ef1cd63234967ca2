use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// A calendar day. The only time type: callers hand in dates already
/// normalized to UTC, the engine never sees a time of day.
pub type Day = NaiveDate;

/// Inclusive day range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Day,
    pub end: Day,
}

impl DateRange {
    pub fn new(start: Day, end: Day) -> Self {
        debug_assert!(start <= end, "DateRange start must not be after end");
        Self { start, end }
    }

    pub fn single(day: Day) -> Self {
        Self { start: day, end: day }
    }

    /// Number of days in the range, counting both ends.
    pub fn num_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn covers(&self, day: Day) -> bool {
        self.start <= day && day <= self.end
    }

    /// Two ranges intersect iff they share at least one day.
    pub fn intersects(&self, other: &DateRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Every day from `start` to `end`, one step at a time.
    pub fn days(&self) -> impl Iterator<Item = Day> + use<> {
        let end = self.end;
        std::iter::successors(Some(self.start), |d| d.succ_opt()).take_while(move |d| *d <= end)
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Reservation lifecycle state. Only `Confirmed` and `Out` hold stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    /// Tentative; does not block availability.
    Draft,
    Confirmed,
    /// Items physically dispatched to the customer.
    Out,
    Returned,
    Cancelled,
}

impl ReservationStatus {
    pub fn consumes_inventory(self) -> bool {
        matches!(self, ReservationStatus::Confirmed | ReservationStatus::Out)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Draft => "draft",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Out => "out",
            ReservationStatus::Returned => "returned",
            ReservationStatus::Cancelled => "cancelled",
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
        match s.to_ascii_lowercase().as_str() {
            "draft" | "tentative" => Ok(ReservationStatus::Draft),
            "confirmed" => Ok(ReservationStatus::Confirmed),
            "out" => Ok(ReservationStatus::Out),
            "returned" => Ok(ReservationStatus::Returned),
            "cancelled" | "canceled" => Ok(ReservationStatus::Cancelled),
            other => Err(format!("unknown reservation status: {other}")),
        }
    }
}

/// One item's share of a reservation, as stored in that item's ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub reservation_id: Ulid,
    pub range: DateRange,
    pub quantity: u32,
    pub status: ReservationStatus,
}

/// Catalog entry plus its allocation ledger.
#[derive(Debug, Clone)]
pub struct ItemState {
    pub id: Ulid,
    pub name: String,
    pub unit: String,
    /// Total units owned.
    pub stock: u32,
    /// Price in minor currency units.
    pub price: Option<i64>,
    /// Allocations of every status, sorted by `range.start`.
    pub allocations: Vec<Allocation>,
}

impl ItemState {
    pub fn new(id: Ulid, name: String, unit: String, stock: u32, price: Option<i64>) -> Self {
        Self {
            id,
            name,
            unit,
            stock,
            price,
            allocations: Vec::new(),
        }
    }

    /// Insert allocation maintaining sort order by range.start.
    pub fn insert_allocation(&mut self, allocation: Allocation) {
        let pos = self
            .allocations
            .partition_point(|a| a.range.start <= allocation.range.start);
        self.allocations.insert(pos, allocation);
    }

    /// Drop every allocation belonging to `reservation_id`. Returns how many went.
    pub fn remove_reservation(&mut self, reservation_id: Ulid) -> usize {
        let before = self.allocations.len();
        self.allocations.retain(|a| a.reservation_id != reservation_id);
        before - self.allocations.len()
    }

    /// Allocations (any status) sharing at least one day with `range`.
    /// Binary search skips everything starting after `range.end`.
    pub fn overlapping(&self, range: &DateRange) -> impl Iterator<Item = &Allocation> {
        let right_bound = self
            .allocations
            .partition_point(|a| a.range.start <= range.end);
        let start = range.start;
        self.allocations[..right_bound]
            .iter()
            .filter(move |a| a.range.end >= start)
    }

    pub fn is_referenced(&self) -> bool {
        !self.allocations.is_empty()
    }

    pub fn info(&self) -> Item {
        Item {
            id: self.id,
            name: self.name.clone(),
            unit: self.unit.clone(),
            stock: self.stock,
            price: self.price,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub item_id: Ulid,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Ulid,
    /// Minor currency units.
    pub amount: i64,
    pub paid_on: Day,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub customer: String,
    pub range: DateRange,
    pub status: ReservationStatus,
    pub notes: Option<String>,
    pub total_price: Option<i64>,
    pub advance_payment: Option<i64>,
    pub payment_due: Option<Day>,
    pub line_items: Vec<LineItem>,
    pub payments: Vec<Payment>,
    /// Bumped on every write; lets a writer detect that it raced another one.
    pub revision: u64,
}

impl Reservation {
    /// Distinct item ids, sorted. This is also the lock acquisition order.
    pub fn item_ids(&self) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self.line_items.iter().map(|l| l.item_id).collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Per-item ledger entries for this reservation.
    pub fn allocations(&self) -> impl Iterator<Item = (Ulid, Allocation)> + '_ {
        self.line_items.iter().map(|l| {
            (
                l.item_id,
                Allocation {
                    reservation_id: self.id,
                    range: self.range,
                    quantity: l.quantity,
                    status: self.status,
                },
            )
        })
    }

    pub fn amount_paid(&self) -> i64 {
        self.payments.iter().map(|p| p.amount).sum()
    }
}

/// Caller input for creating or replacing a reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRequest {
    pub customer: String,
    pub start: Day,
    pub end: Day,
    pub status: ReservationStatus,
    pub line_items: Vec<LineItem>,
    pub notes: Option<String>,
    pub total_price: Option<i64>,
    pub advance_payment: Option<i64>,
    pub payment_due: Option<Day>,
}

impl ReservationRequest {
    pub fn new(customer: impl Into<String>, start: Day, end: Day, status: ReservationStatus) -> Self {
        Self {
            customer: customer.into(),
            start,
            end,
            status,
            line_items: Vec::new(),
            notes: None,
            total_price: None,
            advance_payment: None,
            payment_due: None,
        }
    }

    pub fn with_item(mut self, item_id: Ulid, quantity: u32) -> Self {
        self.line_items.push(LineItem { item_id, quantity });
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// WAL record format. Flat, nothing nested beyond the reservation record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ItemCreated {
        id: Ulid,
        name: String,
        unit: String,
        stock: u32,
        price: Option<i64>,
    },
    ItemUpdated {
        id: Ulid,
        name: String,
        unit: String,
        stock: u32,
        price: Option<i64>,
    },
    ItemDeleted {
        id: Ulid,
    },
    /// Reservation and all of its line items, written as one record.
    ReservationCreated {
        reservation: Reservation,
    },
    /// Full replacement: the previous line items are discarded.
    ReservationUpdated {
        reservation: Reservation,
    },
    ReservationDeleted {
        id: Ulid,
    },
    PaymentRecorded {
        reservation_id: Ulid,
        payment: Payment,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub id: Ulid,
    pub name: String,
    pub unit: String,
    pub stock: u32,
    pub price: Option<i64>,
}

/// Calendar index row: an inventory-consuming reservation touching an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveReservation {
    pub reservation_id: Ulid,
    pub start: Day,
    pub end: Day,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaySummary {
    pub item_id: Ulid,
    pub name: String,
    pub total: u32,
    pub reserved: u32,
    pub remaining: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayOccupancy {
    pub day: Day,
    pub total: u32,
    pub reserved: u32,
    pub remaining: u32,
}
