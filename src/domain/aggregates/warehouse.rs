//! Warehouses and the per-warehouse slices of an order

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use crate::domain::value_objects::{ProductId, RegionCode, WarehouseId};

/// Daily dispatch window in the warehouse's local time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatingHours {
    pub open: NaiveTime,
    pub close: NaiveTime,
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl OperatingHours {
    pub fn always() -> Self {
        Self { open: NaiveTime::MIN, close: NaiveTime::MIN, utc_offset_minutes: 0 }
    }

    /// `open == close` means the warehouse never closes; `close < open` wraps past midnight.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let local = (at + Duration::minutes(i64::from(self.utc_offset_minutes))).time();
        if self.open == self.close { return true; }
        if self.open < self.close {
            local >= self.open && local < self.close
        } else {
            local >= self.open || local < self.close
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Warehouse {
    id: WarehouseId,
    region: RegionCode,
    currency: String,
    serviceable_regions: Vec<RegionCode>,
    #[serde(default)]
    priority: i32,
    #[serde(default = "OperatingHours::always")]
    operating_hours: OperatingHours,
}

impl Warehouse {
    pub fn new(id: impl Into<WarehouseId>, region: RegionCode, currency: &str, serviceable_regions: Vec<RegionCode>) -> Self {
        Self {
            id: id.into(), region, currency: currency.to_uppercase(), serviceable_regions,
            priority: 0, operating_hours: OperatingHours::always(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self { self.priority = priority; self }
    pub fn with_hours(mut self, hours: OperatingHours) -> Self { self.operating_hours = hours; self }

    pub fn id(&self) -> &WarehouseId { &self.id }
    pub fn region(&self) -> &RegionCode { &self.region }
    pub fn currency(&self) -> &str { &self.currency }
    pub fn priority(&self) -> i32 { self.priority }
    pub fn serviceable_regions(&self) -> &[RegionCode] { &self.serviceable_regions }
    pub fn operating_hours(&self) -> &OperatingHours { &self.operating_hours }

    pub fn serves(&self, region: &RegionCode) -> bool { self.serviceable_regions.contains(region) }
    pub fn is_home_region(&self, region: &RegionCode) -> bool { &self.region == region }
    pub fn is_open_at(&self, at: DateTime<Utc>) -> bool { self.operating_hours.contains(at) }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignedLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// The subset of an order shipped from one warehouse.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarehouseAssignment {
    pub warehouse_id: WarehouseId,
    pub lines: Vec<AssignedLine>,
    pub same_day_dispatch: bool,
}

impl WarehouseAssignment {
    pub fn quantity_of(&self, product_id: &ProductId) -> u32 {
        self.lines.iter().filter(|l| &l.product_id == product_id).map(|l| l.quantity).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn hours(open: (u32, u32), close: (u32, u32), offset: i32) -> OperatingHours {
        OperatingHours {
            open: NaiveTime::from_hms_opt(open.0, open.1, 0).unwrap(),
            close: NaiveTime::from_hms_opt(close.0, close.1, 0).unwrap(),
            utc_offset_minutes: offset,
        }
    }

    #[test]
    fn test_operating_window() {
        let lagos = hours((8, 0), (18, 0), 60);
        assert!(lagos.contains(Utc.with_ymd_and_hms(2026, 3, 2, 7, 30, 0).unwrap()));
        assert!(!lagos.contains(Utc.with_ymd_and_hms(2026, 3, 2, 17, 0, 0).unwrap()));
    }

    #[test]
    fn test_overnight_window() {
        let night = hours((22, 0), (6, 0), 0);
        assert!(night.contains(Utc.with_ymd_and_hms(2026, 3, 2, 23, 0, 0).unwrap()));
        assert!(night.contains(Utc.with_ymd_and_hms(2026, 3, 2, 3, 0, 0).unwrap()));
        assert!(!night.contains(Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()));
        assert!(OperatingHours::always().contains(Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()));
    }

    #[test]
    fn test_serves() {
        let la = RegionCode::new("NG-LA").unwrap();
        let ab = RegionCode::new("NG-AB").unwrap();
        let wh = Warehouse::new("WH-LOS", la.clone(), "ngn", vec![la.clone()]);
        assert!(wh.serves(&la));
        assert!(!wh.serves(&ab));
        assert_eq!(wh.currency(), "NGN");
    }
}
