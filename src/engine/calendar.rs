use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

// ── Calendar Index ────────────────────────────────────────────────

/// Inventory-consuming allocations of `item` that share a day with `range`,
/// ordered by start. `exclude` drops one reservation (an edit re-checks
/// against everything but its own prior occupancy).
pub fn active_touching(
    item: &ItemState,
    range: &DateRange,
    exclude: Option<Ulid>,
) -> Vec<ActiveReservation> {
    item.overlapping(range)
        .filter(|a| a.status.consumes_inventory())
        .filter(|a| Some(a.reservation_id) != exclude)
        .map(|a| ActiveReservation {
            reservation_id: a.reservation_id,
            start: a.range.start,
            end: a.range.end,
            quantity: a.quantity,
        })
        .collect()
}

impl Engine {
    /// Calendar index lookup. Fails only when the item does not exist.
    pub async fn active_reservations_touching(
        &self,
        item_id: Ulid,
        start: Day,
        end: Day,
        exclude: Option<Ulid>,
    ) -> Result<Vec<ActiveReservation>, EngineError> {
        let range = super::conflict::validate_range(start, end)?;
        let item = self.get_item_state(&item_id).ok_or(EngineError::NotFound(item_id))?;
        let guard = item.read().await;
        Ok(active_touching(&guard, &range, exclude))
    }
}
