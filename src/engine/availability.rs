use ulid::Ulid;

use crate::model::*;

use super::calendar::active_touching;
use super::error::Violation;

// ── Day Aggregator ────────────────────────────────────────────────

/// Units held on `day` by the given allocations. Both range ends count:
/// a reservation ending on the 8th still holds its units on the 8th.
pub fn reserved_quantity(active: &[ActiveReservation], day: Day) -> u32 {
    active
        .iter()
        .filter(|r| r.start <= day && day <= r.end)
        .fold(0u32, |acc, r| acc.saturating_add(r.quantity))
}

// ── Availability Evaluator ────────────────────────────────────────

/// Walk every day of `range` and return the first one on which `requested`
/// more units of `item` would not fit. The ledger is read once for the whole
/// range; a middle day can bind even when both endpoints are free, so no day
/// is skipped.
pub fn evaluate(
    item: &ItemState,
    requested: u32,
    range: &DateRange,
    exclude: Option<Ulid>,
) -> Result<(), Violation> {
    let active = active_touching(item, range, exclude);
    let total = i64::from(item.stock);
    for day in range.days() {
        let reserved = reserved_quantity(&active, day);
        let available = total - i64::from(reserved);
        if available < i64::from(requested) {
            return Err(Violation {
                item_id: item.id,
                item_name: item.name.clone(),
                day,
                requested,
                available,
                reserved,
                total: item.stock,
            });
        }
    }
    Ok(())
}

/// Highest reserved total on any day from `from` onwards, with the first day
/// it is reached. `None` when nothing active reaches `from`.
///
/// The reserved total only rises where an allocation starts, so it is enough
/// to sample those days (clamped to `from`).
pub fn peak_reserved(item: &ItemState, from: Day) -> Option<(Day, u32)> {
    let active: Vec<ActiveReservation> = item
        .allocations
        .iter()
        .filter(|a| a.status.consumes_inventory() && a.range.end >= from)
        .map(|a| ActiveReservation {
            reservation_id: a.reservation_id,
            start: a.range.start,
            end: a.range.end,
            quantity: a.quantity,
        })
        .collect();

    let mut peak: Option<(Day, u32)> = None;
    for candidate in active.iter().map(|a| a.start.max(from)) {
        let reserved = reserved_quantity(&active, candidate);
        match peak {
            Some((day, best)) if best > reserved || (best == reserved && day <= candidate) => {}
            _ => peak = Some((candidate, reserved)),
        }
    }
    peak
}

/// First day a stock reduction must respect as of `today`: the earliest
/// start of any active allocation still running on or after `today`. Edits
/// of a running reservation re-check its whole range, past days included.
pub fn reduction_window_start(item: &ItemState, today: Day) -> Day {
    item.allocations
        .iter()
        .filter(|a| a.status.consumes_inventory() && a.range.end >= today)
        .map(|a| a.range.start)
        .min()
        .map_or(today, |start| start.min(today))
}

/// Per-day occupancy of one item across `range`.
pub fn occupancy(item: &ItemState, range: &DateRange) -> Vec<DayOccupancy> {
    let active = active_touching(item, range, None);
    range
        .days()
        .map(|day| {
            let reserved = reserved_quantity(&active, day);
            DayOccupancy {
                day,
                total: item.stock,
                reserved,
                remaining: item.stock.saturating_sub(reserved),
            }
        })
        .collect()
}
