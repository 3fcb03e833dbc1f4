//! Reservation Aggregate
//!
//! A time-bounded hold on stock. Only the state machine lives here; the
//! quantity bookkeeping is done by the inventory coordinator.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use crate::domain::value_objects::{ProductId, WarehouseId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationLine {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub quantity: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationState { Held, Committed, Released }

/// Whether a transition changed anything. Repeating a transition is a no-op.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition { Applied, Unchanged }

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    id: Uuid,
    order_id: Option<Uuid>,
    lines: Vec<ReservationLine>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    state: ReservationState,
}

impl Reservation {
    pub fn hold(lines: Vec<ReservationLine>, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self { id: Uuid::now_v7(), order_id: None, lines, created_at: now, expires_at: now + ttl, state: ReservationState::Held }
    }

    /// Rebuilds the committed hold of an order recorded before a restart.
    pub fn committed(id: Uuid, order_id: Uuid, lines: Vec<ReservationLine>, now: DateTime<Utc>) -> Self {
        Self { id, order_id: Some(order_id), lines, created_at: now, expires_at: now, state: ReservationState::Committed }
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn order_id(&self) -> Option<Uuid> { self.order_id }
    pub fn lines(&self) -> &[ReservationLine] { &self.lines }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn expires_at(&self) -> DateTime<Utc> { self.expires_at }
    pub fn state(&self) -> ReservationState { self.state }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.state == ReservationState::Held && now >= self.expires_at
    }

    pub fn commit(&mut self, order_id: Uuid) -> Result<Transition, ReservationStateError> {
        match self.state {
            ReservationState::Held => {
                self.state = ReservationState::Committed;
                self.order_id = Some(order_id);
                Ok(Transition::Applied)
            }
            ReservationState::Committed if self.order_id == Some(order_id) => Ok(Transition::Unchanged),
            ReservationState::Committed => Err(ReservationStateError::CommittedToOther { reservation_id: self.id }),
            ReservationState::Released => Err(ReservationStateError::AlreadyReleased { reservation_id: self.id }),
        }
    }

    pub fn release(&mut self) -> Result<Transition, ReservationStateError> {
        match self.state {
            ReservationState::Held => { self.state = ReservationState::Released; Ok(Transition::Applied) }
            ReservationState::Released => Ok(Transition::Unchanged),
            ReservationState::Committed => Err(ReservationStateError::AlreadyCommitted { reservation_id: self.id }),
        }
    }

    /// Returns committed stock when a confirmed order is cancelled.
    pub fn revoke(&mut self) -> Result<Transition, ReservationStateError> {
        match self.state {
            ReservationState::Committed => { self.state = ReservationState::Released; Ok(Transition::Applied) }
            ReservationState::Released => Ok(Transition::Unchanged),
            ReservationState::Held => Err(ReservationStateError::NotCommitted { reservation_id: self.id }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReservationStateError {
    #[error("reservation {reservation_id} was already released")]
    AlreadyReleased { reservation_id: Uuid },
    #[error("reservation {reservation_id} was already committed")]
    AlreadyCommitted { reservation_id: Uuid },
    #[error("reservation {reservation_id} is committed to another order")]
    CommittedToOther { reservation_id: Uuid },
    #[error("reservation {reservation_id} is not committed")]
    NotCommitted { reservation_id: Uuid },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn held() -> Reservation {
        let line = ReservationLine { product_id: "P1".into(), warehouse_id: "WH-1".into(), quantity: 3 };
        Reservation::hold(vec![line], Utc::now(), Duration::minutes(15))
    }

    #[test]
    fn test_commit_is_idempotent() {
        let mut r = held();
        let order = Uuid::new_v4();
        assert_eq!(r.commit(order).unwrap(), Transition::Applied);
        assert_eq!(r.commit(order).unwrap(), Transition::Unchanged);
        assert_eq!(r.state(), ReservationState::Committed);
        assert!(r.commit(Uuid::new_v4()).is_err());
        assert!(r.release().is_err());
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut r = held();
        assert_eq!(r.release().unwrap(), Transition::Applied);
        assert_eq!(r.release().unwrap(), Transition::Unchanged);
        assert!(matches!(r.commit(Uuid::new_v4()), Err(ReservationStateError::AlreadyReleased { .. })));
    }

    #[test]
    fn test_expiry_only_applies_to_held() {
        let mut r = held();
        let later = r.expires_at();
        assert!(r.is_expired(later));
        assert!(!r.is_expired(later - Duration::seconds(1)));
        r.commit(Uuid::new_v4()).unwrap();
        assert!(!r.is_expired(later));
    }
}
