//! Inventory reservation coordinator.
//!
//! Stock is kept per (product, warehouse) behind its own mutex, so two orders
//! touching different products never contend. A reservation batch is
//! all-or-nothing: any shortage rolls back every increment made by the same call.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use crate::domain::aggregates::{Reservation, ReservationLine, ReservationState, ReservationStateError, Transition, WarehouseAssignment};
use crate::domain::value_objects::{ProductId, WarehouseId};
use crate::Shortage;

pub const DEFAULT_RESERVATION_TTL_MINUTES: i64 = 15;

type StockKey = (ProductId, WarehouseId);

/// Read-only view of availability, as used by routing.
pub trait StockLevels {
    fn available(&self, product_id: &ProductId, warehouse_id: &WarehouseId) -> u32;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InventoryRecord {
    pub on_hand: u32,
    pub reserved: u32,
}

impl InventoryRecord {
    pub fn available(&self) -> u32 { self.on_hand.saturating_sub(self.reserved) }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryLevel {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub on_hand: u32,
    pub reserved: u32,
    pub available: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReservationError {
    #[error("nothing to reserve")]
    Empty,
    #[error("insufficient stock for {} line(s)", .shortages.len())]
    InsufficientStock { shortages: Vec<Shortage> },
    #[error("reservation {0} not found")]
    NotFound(Uuid),
    #[error(transparent)]
    State(#[from] ReservationStateError),
    #[error("inventory lock poisoned")]
    Poisoned,
}

pub struct InventoryReservationCoordinator {
    records: RwLock<HashMap<StockKey, Arc<Mutex<InventoryRecord>>>>,
    reservations: Mutex<HashMap<Uuid, Reservation>>,
    ttl: Duration,
}

impl InventoryReservationCoordinator {
    pub fn new(ttl: Duration) -> Self {
        Self { records: RwLock::new(HashMap::new()), reservations: Mutex::new(HashMap::new()), ttl }
    }

    pub fn ttl(&self) -> Duration { self.ttl }

    /// Adds stock on hand, creating the record if needed.
    pub fn restock(&self, product_id: &ProductId, warehouse_id: &WarehouseId, quantity: u32) -> Result<InventoryLevel, ReservationError> {
        let record = self.record_or_insert(product_id, warehouse_id)?;
        let mut guard = record.lock().map_err(|_| ReservationError::Poisoned)?;
        guard.on_hand = guard.on_hand.saturating_add(quantity);
        debug!(product = %product_id, warehouse = %warehouse_id, quantity, on_hand = guard.on_hand, "restocked");
        Ok(level(product_id, warehouse_id, &guard))
    }

    pub fn level(&self, product_id: &ProductId, warehouse_id: &WarehouseId) -> Result<Option<InventoryLevel>, ReservationError> {
        let Some(record) = self.record(product_id, warehouse_id)? else { return Ok(None) };
        let guard = record.lock().map_err(|_| ReservationError::Poisoned)?;
        Ok(Some(level(product_id, warehouse_id, &guard)))
    }

    pub fn reservation(&self, id: Uuid) -> Result<Option<Reservation>, ReservationError> {
        let reservations = self.reservations.lock().map_err(|_| ReservationError::Poisoned)?;
        Ok(reservations.get(&id).cloned())
    }

    /// Holds stock for every line of every assignment, or for none of them.
    #[instrument(skip(self, assignments), fields(warehouses = assignments.len()))]
    pub fn reserve(&self, assignments: &[WarehouseAssignment]) -> Result<Reservation, ReservationError> {
        let wanted = wanted(assignments);
        if wanted.is_empty() { return Err(ReservationError::Empty); }

        let mut applied: Vec<(Arc<Mutex<InventoryRecord>>, u32)> = Vec::with_capacity(wanted.len());
        let mut shortages = Vec::new();
        for ((product_id, warehouse_id), quantity) in &wanted {
            let Some(record) = self.record(product_id, warehouse_id)? else {
                shortages.push(Shortage { product_id: product_id.clone(), warehouse_id: Some(warehouse_id.clone()), requested: *quantity, available: 0 });
                continue;
            };
            let mut guard = match record.lock() {
                Ok(guard) => guard,
                Err(_) => {
                    self.roll_back(&applied);
                    return Err(ReservationError::Poisoned);
                }
            };
            if guard.available() >= *quantity {
                guard.reserved += *quantity;
                drop(guard);
                applied.push((record, *quantity));
            } else {
                shortages.push(Shortage {
                    product_id: product_id.clone(), warehouse_id: Some(warehouse_id.clone()), requested: *quantity, available: guard.available(),
                });
            }
        }

        if !shortages.is_empty() {
            self.roll_back(&applied);
            warn!(shortages = shortages.len(), "reservation rejected");
            return Err(ReservationError::InsufficientStock { shortages });
        }

        let reservation = Reservation::hold(into_lines(wanted), Utc::now(), self.ttl);
        let mut reservations = match self.reservations.lock() {
            Ok(reservations) => reservations,
            Err(_) => {
                self.roll_back(&applied);
                return Err(ReservationError::Poisoned);
            }
        };
        reservations.insert(reservation.id(), reservation.clone());
        info!(reservation_id = %reservation.id(), expires_at = %reservation.expires_at(), "stock held");
        Ok(reservation)
    }

    /// Re-enters the committed stock of an order recorded before a restart. The
    /// stock counts as reserved even if on-hand no longer covers it; a reservation
    /// id that is already known is left alone.
    #[instrument(skip(self, assignments))]
    pub fn restore_committed(&self, reservation_id: Uuid, order_id: Uuid, assignments: &[WarehouseAssignment]) -> Result<Transition, ReservationError> {
        let mut reservations = self.reservations.lock().map_err(|_| ReservationError::Poisoned)?;
        if reservations.contains_key(&reservation_id) {
            return Ok(Transition::Unchanged);
        }
        let lines = into_lines(wanted(assignments));
        for line in &lines {
            let record = self.record_or_insert(&line.product_id, &line.warehouse_id)?;
            let mut guard = record.lock().map_err(|_| ReservationError::Poisoned)?;
            guard.reserved = guard.reserved.saturating_add(line.quantity);
            if guard.reserved > guard.on_hand {
                warn!(product = %line.product_id, warehouse = %line.warehouse_id, reserved = guard.reserved, on_hand = guard.on_hand, "committed stock exceeds on hand");
            }
        }
        reservations.insert(reservation_id, Reservation::committed(reservation_id, order_id, lines, Utc::now()));
        debug!("committed reservation restored");
        Ok(Transition::Applied)
    }

    /// HELD -> COMMITTED. Repeating with the same order id is a no-op.
    #[instrument(skip(self))]
    pub fn commit(&self, reservation_id: Uuid, order_id: Uuid) -> Result<(), ReservationError> {
        let mut reservations = self.reservations.lock().map_err(|_| ReservationError::Poisoned)?;
        let reservation = reservations.get_mut(&reservation_id).ok_or(ReservationError::NotFound(reservation_id))?;
        if reservation.commit(order_id)? == Transition::Applied {
            info!("reservation committed");
        }
        Ok(())
    }

    /// HELD -> RELEASED, returning the stock. Repeating is a no-op.
    #[instrument(skip(self))]
    pub fn release(&self, reservation_id: Uuid) -> Result<(), ReservationError> {
        let lines = {
            let mut reservations = self.reservations.lock().map_err(|_| ReservationError::Poisoned)?;
            let reservation = reservations.get_mut(&reservation_id).ok_or(ReservationError::NotFound(reservation_id))?;
            match reservation.release()? {
                Transition::Applied => reservation.lines().to_vec(),
                Transition::Unchanged => return Ok(()),
            }
        };
        self.give_back(&lines)?;
        info!("reservation released");
        Ok(())
    }

    /// COMMITTED -> RELEASED for cancelled orders.
    #[instrument(skip(self))]
    pub fn revoke(&self, reservation_id: Uuid) -> Result<(), ReservationError> {
        let lines = {
            let mut reservations = self.reservations.lock().map_err(|_| ReservationError::Poisoned)?;
            let reservation = reservations.get_mut(&reservation_id).ok_or(ReservationError::NotFound(reservation_id))?;
            match reservation.revoke()? {
                Transition::Applied => reservation.lines().to_vec(),
                Transition::Unchanged => return Ok(()),
            }
        };
        self.give_back(&lines)?;
        info!("committed reservation revoked");
        Ok(())
    }

    /// Releases every HELD reservation whose TTL has elapsed at `now`.
    pub fn release_expired(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, ReservationError> {
        let expired: Vec<(Uuid, Vec<ReservationLine>)> = {
            let mut reservations = self.reservations.lock().map_err(|_| ReservationError::Poisoned)?;
            reservations
                .values_mut()
                .filter(|r| r.is_expired(now))
                .filter_map(|r| match r.release() {
                    Ok(Transition::Applied) => Some((r.id(), r.lines().to_vec())),
                    _ => None,
                })
                .collect()
        };
        let mut released = Vec::with_capacity(expired.len());
        for (id, lines) in expired {
            self.give_back(&lines)?;
            warn!(reservation_id = %id, "reservation expired and released");
            released.push(id);
        }
        Ok(released)
    }

    /// Forgets released reservations that expired before `cutoff`. Committed ones
    /// still account for reserved stock and are kept.
    pub fn purge_finished(&self, cutoff: DateTime<Utc>) -> Result<usize, ReservationError> {
        let mut reservations = self.reservations.lock().map_err(|_| ReservationError::Poisoned)?;
        let before = reservations.len();
        reservations.retain(|_, r| r.state() != ReservationState::Released || r.expires_at() >= cutoff);
        Ok(before - reservations.len())
    }

    fn give_back(&self, lines: &[ReservationLine]) -> Result<(), ReservationError> {
        for line in lines {
            if let Some(record) = self.record(&line.product_id, &line.warehouse_id)? {
                let mut guard = record.lock().map_err(|_| ReservationError::Poisoned)?;
                guard.reserved = guard.reserved.saturating_sub(line.quantity);
            }
        }
        Ok(())
    }

    fn roll_back(&self, applied: &[(Arc<Mutex<InventoryRecord>>, u32)]) {
        for (record, quantity) in applied {
            // A poisoned record still holds valid counts; undo regardless.
            let mut guard = record.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.reserved = guard.reserved.saturating_sub(*quantity);
        }
    }

    fn record(&self, product_id: &ProductId, warehouse_id: &WarehouseId) -> Result<Option<Arc<Mutex<InventoryRecord>>>, ReservationError> {
        let records = self.records.read().map_err(|_| ReservationError::Poisoned)?;
        Ok(records.get(&(product_id.clone(), warehouse_id.clone())).cloned())
    }

    fn record_or_insert(&self, product_id: &ProductId, warehouse_id: &WarehouseId) -> Result<Arc<Mutex<InventoryRecord>>, ReservationError> {
        if let Some(record) = self.record(product_id, warehouse_id)? {
            return Ok(record);
        }
        let mut records = self.records.write().map_err(|_| ReservationError::Poisoned)?;
        Ok(records.entry((product_id.clone(), warehouse_id.clone())).or_default().clone())
    }
}

impl Default for InventoryReservationCoordinator {
    fn default() -> Self { Self::new(Duration::minutes(DEFAULT_RESERVATION_TTL_MINUTES)) }
}

impl StockLevels for InventoryReservationCoordinator {
    fn available(&self, product_id: &ProductId, warehouse_id: &WarehouseId) -> u32 {
        match self.level(product_id, warehouse_id) {
            Ok(Some(level)) => level.available,
            _ => 0,
        }
    }
}

/// Quantities per stock record, zero lines dropped.
fn wanted(assignments: &[WarehouseAssignment]) -> BTreeMap<StockKey, u32> {
    let mut wanted: BTreeMap<StockKey, u32> = BTreeMap::new();
    for assignment in assignments {
        for line in &assignment.lines {
            if line.quantity == 0 { continue; }
            let entry = wanted.entry((line.product_id.clone(), assignment.warehouse_id.clone())).or_insert(0);
            *entry = entry.saturating_add(line.quantity);
        }
    }
    wanted
}

fn into_lines(wanted: BTreeMap<StockKey, u32>) -> Vec<ReservationLine> {
    wanted
        .into_iter()
        .map(|((product_id, warehouse_id), quantity)| ReservationLine { product_id, warehouse_id, quantity })
        .collect()
}

fn level(product_id: &ProductId, warehouse_id: &WarehouseId, record: &InventoryRecord) -> InventoryLevel {
    InventoryLevel {
        product_id: product_id.clone(), warehouse_id: warehouse_id.clone(),
        on_hand: record.on_hand, reserved: record.reserved, available: record.available(),
    }
}
