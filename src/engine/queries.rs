use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::*;

use super::availability::{occupancy, reserved_quantity};
use super::calendar::active_touching;
use super::conflict::validate_range;
use super::{Engine, EngineError};

impl Engine {
    pub fn get_reservation(&self, id: &Ulid) -> Option<Reservation> {
        self.reservations.get(id).map(|r| r.value().clone())
    }

    pub async fn get_item(&self, id: &Ulid) -> Option<Item> {
        let state = self.get_item_state(id)?;
        let guard = state.read().await;
        Some(guard.info())
    }

    /// Catalog, ordered by name.
    pub async fn list_items(&self) -> Vec<Item> {
        let states: Vec<_> = self.items.iter().map(|e| e.value().clone()).collect();
        let mut items = Vec::with_capacity(states.len());
        for state in states {
            items.push(state.read().await.info());
        }
        items.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()).then(a.id.cmp(&b.id)));
        items
    }

    /// Every reservation, ordered by start day.
    pub fn list_reservations(&self) -> Vec<Reservation> {
        let mut out: Vec<Reservation> = self.reservations.iter().map(|r| r.value().clone()).collect();
        out.sort_by_key(|r| (r.range.start, r.id));
        out
    }

    /// Reservations of any status that list `item_id`, ordered by start day.
    pub async fn reservations_for_item(&self, item_id: Ulid) -> Result<Vec<Reservation>, EngineError> {
        let state = self.get_item_state(&item_id).ok_or(EngineError::NotFound(item_id))?;
        let ids: Vec<Ulid> = {
            let guard = state.read().await;
            let mut ids: Vec<Ulid> = guard.allocations.iter().map(|a| a.reservation_id).collect();
            ids.sort();
            ids.dedup();
            ids
        };
        let mut out: Vec<Reservation> = ids.iter().filter_map(|id| self.get_reservation(id)).collect();
        out.sort_by_key(|r| (r.range.start, r.id));
        Ok(out)
    }

    /// Reserved and remaining quantity of every item on one day.
    pub async fn day_summary(&self, day: Day) -> Vec<DaySummary> {
        let range = DateRange::single(day);
        let states: Vec<_> = self.items.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(states.len());
        for state in states {
            let item = state.read().await;
            let reserved = reserved_quantity(&active_touching(&item, &range, None), day);
            out.push(DaySummary {
                item_id: item.id,
                name: item.name.clone(),
                total: item.stock,
                reserved,
                remaining: item.stock.saturating_sub(reserved),
            });
        }
        out.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        out
    }

    /// Per-day occupancy of one item over `[start, end]`.
    pub async fn item_calendar(
        &self,
        item_id: Ulid,
        start: Day,
        end: Day,
    ) -> Result<Vec<DayOccupancy>, EngineError> {
        let range = validate_range(start, end)?;
        let state = self.get_item_state(&item_id).ok_or(EngineError::NotFound(item_id))?;
        let guard = state.read().await;
        Ok(occupancy(&guard, &range))
    }

    /// Change feed for one item: every event that rewrites its ledger or catalog entry.
    /// Only live items get a channel.
    pub fn subscribe(&self, item_id: Ulid) -> Result<broadcast::Receiver<Event>, EngineError> {
        if !self.items.contains_key(&item_id) {
            return Err(EngineError::NotFound(item_id));
        }
        let rx = self.notify.subscribe(item_id);
        // Lost a race with delete_item, which may already have dropped the channel.
        if !self.items.contains_key(&item_id) {
            self.notify.remove(&item_id);
            return Err(EngineError::NotFound(item_id));
        }
        Ok(rx)
    }
}
