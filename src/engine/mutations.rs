use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use tokio::sync::{oneshot, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::{peak_reserved, reduction_window_start};
use super::conflict::{check_demand, demand, today, validate_request};
use super::{name_key, Engine, EngineError, WalCommand};

fn validate_item_fields(name: &str, unit: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::InvalidInput("item name must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("item name too long"));
    }
    if unit.len() > MAX_UNIT_LEN {
        return Err(EngineError::LimitExceeded("unit label too long"));
    }
    Ok(())
}

impl Engine {
    // ── Catalog ──────────────────────────────────────────────

    pub async fn create_item(
        &self,
        id: Ulid,
        name: String,
        unit: String,
        stock: u32,
        price: Option<i64>,
    ) -> Result<Item, EngineError> {
        validate_item_fields(&name, &unit)?;
        if self.items.len() >= MAX_ITEMS {
            return Err(EngineError::LimitExceeded("too many items"));
        }
        let _gate = self.compaction_gate.read().await;
        let _claim = self.claim(id)?;
        if self.items.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let key = name_key(&name);
        match self.names.entry(key.clone()) {
            Entry::Occupied(_) => return Err(EngineError::DuplicateName(name)),
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }

        let event = Event::ItemCreated { id, name: name.clone(), unit: unit.clone(), stock, price };
        if let Err(e) = self.wal_append(&event).await {
            self.names.remove(&key);
            return Err(e);
        }
        let state = ItemState::new(id, name, unit, stock, price);
        let item = state.info();
        self.items.insert(id, Arc::new(RwLock::new(state)));
        self.notify.send(id, &event);
        info!(item = %id, name = %item.name, stock, "item created");
        Ok(item)
    }

    /// Rename, relabel, reprice or restock an item. Stock may not drop below
    /// what is reserved on any day a still-running reservation covers.
    pub async fn update_item(
        &self,
        id: Ulid,
        name: String,
        unit: String,
        stock: u32,
        price: Option<i64>,
    ) -> Result<Item, EngineError> {
        validate_item_fields(&name, &unit)?;
        let _gate = self.compaction_gate.read().await;
        let mut guards = self.write_items(&[id]).await?;
        let item = &guards[&id];

        if stock < item.stock
            && let Some((day, peak)) = peak_reserved(item, reduction_window_start(item, today()))
            && peak > stock
        {
            return Err(EngineError::StockBelowReserved { item_id: id, requested: stock, peak, day });
        }

        let new_key = name_key(&name);
        let claimed_name = new_key != name_key(&item.name);
        if claimed_name {
            match self.names.entry(new_key.clone()) {
                Entry::Occupied(_) => return Err(EngineError::DuplicateName(name)),
                Entry::Vacant(slot) => {
                    slot.insert(id);
                }
            }
        }

        let event = Event::ItemUpdated { id, name, unit, stock, price };
        if let Err(e) = self.persist_and_apply(&mut guards, &event).await {
            if claimed_name {
                self.names.remove(&new_key);
            }
            return Err(e);
        }
        info!(item = %id, stock, "item updated");
        Ok(guards[&id].info())
    }

    /// Delete an item. Refused while any reservation (of any status) lists it.
    pub async fn delete_item(&self, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.read().await;
        let guards = self.write_items(&[id]).await?;
        let item = &guards[&id];
        if item.is_referenced() {
            return Err(EngineError::ItemInUse(id));
        }

        let event = Event::ItemDeleted { id };
        self.wal_append(&event).await?;
        self.names.remove_if(&name_key(&item.name), |_, owner| *owner == id);
        self.items.remove(&id);
        self.notify.send(id, &event);
        self.notify.remove(&id);
        info!(item = %id, "item deleted");
        Ok(())
    }

    // ── Reservations ─────────────────────────────────────────

    /// Validate and persist a new reservation with its line items as one record.
    pub async fn create_reservation(
        &self,
        id: Ulid,
        request: ReservationRequest,
    ) -> Result<Reservation, EngineError> {
        let range = validate_request(&request)?;
        if self.reservations.len() >= MAX_RESERVATIONS {
            return Err(EngineError::LimitExceeded("too many reservations"));
        }
        let _gate = self.compaction_gate.read().await;
        let _claim = self.claim(id)?;
        if self.reservations.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let demand = demand(&request.line_items);
        let ids: Vec<Ulid> = demand.iter().map(|(item_id, _)| *item_id).collect();
        let mut guards = self.write_items(&ids).await?;
        if request.status.consumes_inventory() {
            check_demand(&guards, &demand, &range, None)?;
        }

        let reservation = Reservation {
            id,
            customer: request.customer,
            range,
            status: request.status,
            notes: request.notes,
            total_price: request.total_price,
            advance_payment: request.advance_payment,
            payment_due: request.payment_due,
            line_items: request.line_items,
            payments: Vec::new(),
            revision: 1,
        };
        let event = Event::ReservationCreated { reservation: reservation.clone() };
        self.persist_and_apply(&mut guards, &event).await?;
        info!(
            reservation = %id,
            status = %reservation.status,
            range = %reservation.range,
            lines = reservation.line_items.len(),
            "reservation created"
        );
        Ok(reservation)
    }

    /// Replace a reservation wholesale: dates, status, money fields and the
    /// full set of line items. The reservation's own prior occupancy does not
    /// count against the new version.
    pub async fn update_reservation(
        &self,
        id: Ulid,
        request: ReservationRequest,
    ) -> Result<Reservation, EngineError> {
        let range = validate_request(&request)?;
        let _gate = self.compaction_gate.read().await;

        let demand = demand(&request.line_items);
        let new_ids: Vec<Ulid> = demand.iter().map(|(item_id, _)| *item_id).collect();
        let (current, mut guards) = self.lock_reservation(id, &new_ids).await?;
        if request.status.consumes_inventory() {
            check_demand(&guards, &demand, &range, Some(id))?;
        }

        let reservation = Reservation {
            id,
            customer: request.customer,
            range,
            status: request.status,
            notes: request.notes,
            total_price: request.total_price,
            advance_payment: request.advance_payment,
            payment_due: request.payment_due,
            line_items: request.line_items,
            payments: current.payments,
            revision: current.revision + 1,
        };
        let event = Event::ReservationUpdated { reservation: reservation.clone() };
        self.persist_and_apply(&mut guards, &event).await?;
        info!(
            reservation = %id,
            status = %reservation.status,
            range = %reservation.range,
            revision = reservation.revision,
            "reservation updated"
        );
        Ok(reservation)
    }

    /// Delete a reservation with its line items and payments. Only frees
    /// capacity, so nothing is checked. Returns the removed record.
    pub async fn delete_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let _gate = self.compaction_gate.read().await;
        let (current, mut guards) = self.lock_reservation(id, &[]).await?;
        let event = Event::ReservationDeleted { id };
        self.persist_and_apply(&mut guards, &event).await?;
        info!(reservation = %id, payments = current.payments.len(), "reservation deleted");
        Ok(current)
    }

    // ── Payments ─────────────────────────────────────────────

    pub async fn record_payment(
        &self,
        reservation_id: Ulid,
        payment: Payment,
    ) -> Result<Reservation, EngineError> {
        if payment.amount <= 0 {
            return Err(EngineError::InvalidInput("payment amount must be positive"));
        }
        if payment.note.as_ref().is_some_and(|n| n.len() > MAX_NOTES_LEN) {
            return Err(EngineError::LimitExceeded("payment note too long"));
        }
        let _gate = self.compaction_gate.read().await;
        let (current, mut guards) = self.lock_reservation(reservation_id, &[]).await?;
        if current.payments.len() >= MAX_PAYMENTS_PER_RESERVATION {
            return Err(EngineError::LimitExceeded("too many payments on reservation"));
        }
        if current.payments.iter().any(|p| p.id == payment.id) {
            return Err(EngineError::AlreadyExists(payment.id));
        }

        let amount = payment.amount;
        let event = Event::PaymentRecorded { reservation_id, payment };
        self.persist_and_apply(&mut guards, &event).await?;
        info!(reservation = %reservation_id, amount, "payment recorded");
        self.get_reservation(&reservation_id)
            .ok_or(EngineError::NotFound(reservation_id))
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL as the minimal event list that recreates current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.compaction_gate.write().await;

        let mut events = Vec::with_capacity(self.items.len() + self.reservations.len());
        let states: Vec<_> = self.items.iter().map(|e| e.value().clone()).collect();
        for state in states {
            let item = state.read().await;
            events.push(Event::ItemCreated {
                id: item.id,
                name: item.name.clone(),
                unit: item.unit.clone(),
                stock: item.stock,
                price: item.price,
            });
        }
        let mut reservations: Vec<Reservation> =
            self.reservations.iter().map(|e| e.value().clone()).collect();
        reservations.sort_by_key(|r| r.id);
        events.extend(
            reservations
                .into_iter()
                .map(|reservation| Event::ReservationCreated { reservation }),
        );

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!("WAL compacted to {count} events");
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
