mod availability;
mod calendar;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use availability::{evaluate, occupancy, peak_reserved, reduction_window_start, reserved_quantity};
pub use calendar::active_touching;
pub use error::{EngineError, Violation};

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedItemState = Arc<RwLock<ItemState>>;

/// Write guards over every item a mutation touches, keyed (and acquired) in id order.
pub(super) type ItemWriteGuards = BTreeMap<Ulid, OwnedRwLockWriteGuard<ItemState>>;
pub(super) type ItemReadGuards = BTreeMap<Ulid, OwnedRwLockReadGuard<ItemState>>;

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

/// Background task that owns the WAL and batches appends for group commit:
/// block for the first append, drain whatever else is already queued, then
/// flush and fsync once for the whole batch.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    // Everything queued before a compaction must hit disk first.
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, &mut batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for batch of {}: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so half-buffered bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
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
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// Availability and reservation engine.
///
/// Each item owns its allocation ledger behind its own lock, so writes to
/// unrelated items never wait on each other. A mutation locks every item it
/// touches (sorted by id), checks, logs to the WAL and applies before the
/// locks are released.
pub struct Engine {
    pub(super) items: DashMap<Ulid, SharedItemState>,
    pub(super) reservations: DashMap<Ulid, Reservation>,
    /// Lower-cased item name → item id.
    pub(super) names: DashMap<String, Ulid>,
    /// Ids of items/reservations currently being created.
    pub(super) pending: DashMap<Ulid, ()>,
    /// Mutations hold this shared; compaction takes it exclusively so its
    /// snapshot cannot miss an in-flight write. Always acquired before item locks.
    pub(super) compaction_gate: RwLock<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            items: DashMap::new(),
            reservations: DashMap::new(),
            names: DashMap::new(),
            pending: DashMap::new(),
            compaction_gate: RwLock::new(()),
            wal_tx,
            notify,
        };

        for event in &events {
            engine.replay_event(event);
        }
        tracing::info!(
            "replayed {} events: {} items, {} reservations",
            events.len(),
            engine.items.len(),
            engine.reservations.len()
        );

        Ok(engine)
    }

    /// Replay runs before the engine is shared, so every `try_write_owned` is uncontended.
    fn replay_event(&self, event: &Event) {
        match event {
            Event::ItemCreated { id, name, unit, stock, price } => {
                let state = ItemState::new(*id, name.clone(), unit.clone(), *stock, *price);
                self.names.insert(name_key(name), *id);
                self.items.insert(*id, Arc::new(RwLock::new(state)));
            }
            Event::ItemDeleted { id } => {
                if let Some((_, state)) = self.items.remove(id)
                    && let Ok(guard) = state.try_read()
                {
                    self.names.remove(&name_key(&guard.name));
                }
            }
            other => {
                let mut guards = ItemWriteGuards::new();
                for item_id in self.touched_items(other) {
                    if let Some(state) = self.get_item_state(&item_id)
                        && let Ok(guard) = state.try_write_owned()
                    {
                        guards.insert(item_id, guard);
                    }
                }
                self.apply_locked(&mut guards, other);
            }
        }
    }

    /// Items whose ledgers an event rewrites: the reservation's old and new items.
    fn touched_items(&self, event: &Event) -> Vec<Ulid> {
        let mut ids = match event {
            Event::ItemUpdated { id, .. } => vec![*id],
            Event::ReservationCreated { reservation } | Event::ReservationUpdated { reservation } => {
                let mut ids = reservation.item_ids();
                if let Some(prev) = self.reservations.get(&reservation.id) {
                    ids.extend(prev.item_ids());
                }
                ids
            }
            Event::ReservationDeleted { id } => self
                .reservations
                .get(id)
                .map(|r| r.item_ids())
                .unwrap_or_default(),
            Event::PaymentRecorded { .. } | Event::ItemCreated { .. } | Event::ItemDeleted { .. } => {
                Vec::new()
            }
        };
        ids.sort();
        ids.dedup();
        ids
    }

    /// Apply an event to locked item ledgers and the reservation index
    /// (no locking here, the caller holds every guard the event needs).
    pub(super) fn apply_locked(&self, guards: &mut ItemWriteGuards, event: &Event) {
        match event {
            Event::ItemUpdated { id, name, unit, stock, price } => {
                if let Some(item) = guards.get_mut(id) {
                    let old_key = name_key(&item.name);
                    let new_key = name_key(name);
                    if old_key != new_key {
                        self.names.remove_if(&old_key, |_, owner| owner == id);
                    }
                    self.names.insert(new_key, *id);
                    item.name = name.clone();
                    item.unit = unit.clone();
                    item.stock = *stock;
                    item.price = *price;
                }
            }
            Event::ReservationCreated { reservation } | Event::ReservationUpdated { reservation } => {
                for item in guards.values_mut() {
                    item.remove_reservation(reservation.id);
                }
                for (item_id, allocation) in reservation.allocations() {
                    if let Some(item) = guards.get_mut(&item_id) {
                        item.insert_allocation(allocation);
                    }
                }
                self.reservations.insert(reservation.id, reservation.clone());
            }
            Event::ReservationDeleted { id } => {
                for item in guards.values_mut() {
                    item.remove_reservation(*id);
                }
                self.reservations.remove(id);
            }
            Event::PaymentRecorded { reservation_id, payment } => {
                if let Some(mut reservation) = self.reservations.get_mut(reservation_id) {
                    reservation.payments.push(payment.clone());
                    reservation.revision += 1;
                }
            }
            // Catalog membership is handled at the DashMap level, not here.
            Event::ItemCreated { .. } | Event::ItemDeleted { .. } => {}
        }
    }

    /// Write event to WAL via the background group-commit writer.
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

    /// WAL-append + apply + notify. Nothing is applied if the append fails.
    pub(super) async fn persist_and_apply(
        &self,
        guards: &mut ItemWriteGuards,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.apply_locked(guards, event);
        for item_id in guards.keys() {
            self.notify.send(*item_id, event);
        }
        Ok(())
    }

    pub fn get_item_state(&self, id: &Ulid) -> Option<SharedItemState> {
        self.items.get(id).map(|e| e.value().clone())
    }

    /// Whether `state` is still the live entry for `id` (it may have been
    /// deleted while we waited for its lock).
    fn is_current(&self, id: &Ulid, state: &SharedItemState) -> bool {
        self.items
            .get(id)
            .is_some_and(|cur| Arc::ptr_eq(cur.value(), state))
    }

    /// Write-lock items in id order.
    pub(super) async fn write_items(&self, ids: &[Ulid]) -> Result<ItemWriteGuards, EngineError> {
        let mut ids = ids.to_vec();
        ids.sort();
        ids.dedup();
        let mut guards = ItemWriteGuards::new();
        for id in ids {
            let state = self.get_item_state(&id).ok_or(EngineError::NotFound(id))?;
            let guard = state.clone().write_owned().await;
            if !self.is_current(&id, &state) {
                metrics::counter!(crate::observability::CONCURRENT_CONFLICTS_TOTAL).increment(1);
                return Err(EngineError::ConcurrentWriteConflict(id));
            }
            guards.insert(id, guard);
        }
        Ok(guards)
    }

    /// Read-lock items in id order.
    pub(super) async fn read_items(&self, ids: &[Ulid]) -> Result<ItemReadGuards, EngineError> {
        let mut ids = ids.to_vec();
        ids.sort();
        ids.dedup();
        let mut guards = ItemReadGuards::new();
        for id in ids {
            let state = self.get_item_state(&id).ok_or(EngineError::NotFound(id))?;
            let guard = state.clone().read_owned().await;
            if !self.is_current(&id, &state) {
                return Err(EngineError::NotFound(id));
            }
            guards.insert(id, guard);
        }
        Ok(guards)
    }

    /// Lock a reservation's current items plus `extra` and return the
    /// reservation as it stands under those locks.
    ///
    /// Fails with `ConcurrentWriteConflict` if the reservation was rewritten
    /// between the initial read and lock acquisition.
    pub(super) async fn lock_reservation(
        &self,
        id: Ulid,
        extra: &[Ulid],
    ) -> Result<(Reservation, ItemWriteGuards), EngineError> {
        let snapshot = self.get_reservation(&id).ok_or(EngineError::NotFound(id))?;
        let mut ids = snapshot.item_ids();
        ids.extend_from_slice(extra);
        let guards = self.write_items(&ids).await?;
        let current = self.get_reservation(&id).ok_or(EngineError::NotFound(id))?;
        if current.revision != snapshot.revision {
            metrics::counter!(crate::observability::CONCURRENT_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::ConcurrentWriteConflict(id));
        }
        Ok((current, guards))
    }

    /// Mark `id` as being created. Fails if another create for the same id is in flight.
    pub(super) fn claim(&self, id: Ulid) -> Result<Claim<'_>, EngineError> {
        if self.pending.insert(id, ()).is_some() {
            return Err(EngineError::AlreadyExists(id));
        }
        Ok(Claim { engine: self, id })
    }
}

/// Releases a pending-create claim when dropped.
pub(super) struct Claim<'a> {
    engine: &'a Engine,
    id: Ulid,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.engine.pending.remove(&self.id);
    }
}

pub(super) fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}
