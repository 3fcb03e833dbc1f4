//! Warehouse routing.
//!
//! Advisory only: reads a stock snapshot without holding anything. The
//! reservation step makes the authoritative check.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;
use crate::domain::aggregates::{AssignedLine, Cart, Warehouse, WarehouseAssignment};
use crate::domain::value_objects::{ProductId, RegionCode, WarehouseId};
use crate::fulfillment::inventory::StockLevels;
use crate::Shortage;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SplitPolicy {
    #[default]
    AllowSplit,
    SingleWarehouse,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoutingOutcome {
    Complete(Vec<WarehouseAssignment>),
    /// Split shipments allowed but stock across all warehouses falls short.
    Partial { unassigned: Vec<Shortage> },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    #[error("no warehouse ships {currency} orders to {region}")]
    NoServiceableWarehouse { region: RegionCode, currency: String },
    #[error("no single warehouse can fulfill the whole order")]
    NoSingleWarehouse,
}

pub struct RouteRequest<'a> {
    pub cart: &'a Cart,
    pub destination: &'a RegionCode,
    pub preferred_region: Option<&'a RegionCode>,
    pub currency: &'a str,
    pub policy: SplitPolicy,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default)]
pub struct WarehouseRouter {
    warehouses: Vec<Warehouse>,
}

impl WarehouseRouter {
    pub fn new(warehouses: Vec<Warehouse>) -> Self { Self { warehouses } }

    pub fn warehouses(&self) -> &[Warehouse] { &self.warehouses }

    /// Warehouses that ship to the destination, best first: located in the
    /// preferred region, then higher priority, then id ascending.
    fn candidates(&self, request: &RouteRequest<'_>) -> Vec<&Warehouse> {
        let mut candidates: Vec<&Warehouse> = self
            .warehouses
            .iter()
            .filter(|w| w.serves(request.destination) && w.currency() == request.currency)
            .collect();
        candidates.sort_by(|a, b| {
            let located_in_preferred = |w: &Warehouse| request.preferred_region.is_some_and(|r| w.is_home_region(r));
            located_in_preferred(*b).cmp(&located_in_preferred(*a)).then(b.priority().cmp(&a.priority())).then(a.id().cmp(b.id()))
        });
        candidates
    }

    pub fn route(&self, request: &RouteRequest<'_>, stock: &dyn StockLevels) -> Result<RoutingOutcome, RoutingError> {
        let candidates = self.candidates(request);
        if candidates.is_empty() {
            return Err(RoutingError::NoServiceableWarehouse { region: request.destination.clone(), currency: request.currency.to_string() });
        }
        match request.policy {
            SplitPolicy::SingleWarehouse => route_single(&candidates, request, stock),
            SplitPolicy::AllowSplit => Ok(route_split(&candidates, request, stock)),
        }
    }
}

fn route_single(candidates: &[&Warehouse], request: &RouteRequest<'_>, stock: &dyn StockLevels) -> Result<RoutingOutcome, RoutingError> {
    let warehouse = candidates
        .iter()
        .find(|w| request.cart.items().iter().all(|i| stock.available(&i.product_id, w.id()) >= i.quantity.value()))
        .ok_or(RoutingError::NoSingleWarehouse)?;
    let lines = request.cart.items().iter().map(|i| AssignedLine { product_id: i.product_id.clone(), quantity: i.quantity.value() }).collect();
    debug!(warehouse = %warehouse.id(), "routed to single warehouse");
    Ok(RoutingOutcome::Complete(vec![WarehouseAssignment { warehouse_id: warehouse.id().clone(), lines, same_day_dispatch: warehouse.is_open_at(request.at) }]))
}

fn route_split(candidates: &[&Warehouse], request: &RouteRequest<'_>, stock: &dyn StockLevels) -> RoutingOutcome {
    let mut remaining: Vec<(ProductId, u32)> = request.cart.items().iter().map(|i| (i.product_id.clone(), i.quantity.value())).collect();
    let mut assigned: HashMap<WarehouseId, Vec<AssignedLine>> = HashMap::new();

    // Whole lines first, so a product is only split when no warehouse holds all of it.
    for warehouse in candidates {
        for (product_id, quantity) in remaining.iter_mut().filter(|(_, q)| *q > 0) {
            if stock.available(product_id, warehouse.id()) >= *quantity {
                assigned.entry(warehouse.id().clone()).or_default().push(AssignedLine { product_id: product_id.clone(), quantity: *quantity });
                *quantity = 0;
            }
        }
    }
    for (product_id, quantity) in remaining.iter_mut().filter(|(_, q)| *q > 0) {
        for warehouse in candidates {
            if *quantity == 0 { break; }
            let take = stock.available(product_id, warehouse.id()).min(*quantity);
            if take > 0 {
                assigned.entry(warehouse.id().clone()).or_default().push(AssignedLine { product_id: product_id.clone(), quantity: take });
                *quantity -= take;
            }
        }
    }

    let assignments: Vec<WarehouseAssignment> = candidates
        .iter()
        .filter_map(|w| {
            assigned.remove(w.id()).map(|lines| WarehouseAssignment { warehouse_id: w.id().clone(), lines, same_day_dispatch: w.is_open_at(request.at) })
        })
        .collect();

    let unassigned: Vec<Shortage> = remaining
        .iter()
        .filter(|(_, q)| *q > 0)
        .map(|(product_id, _)| Shortage {
            product_id: product_id.clone(),
            warehouse_id: None,
            requested: request.cart.quantity_of(product_id),
            available: candidates.iter().map(|w| stock.available(product_id, w.id())).sum(),
        })
        .collect();

    debug!(warehouses = assignments.len(), unassigned = unassigned.len(), "routed with split policy");
    if unassigned.is_empty() {
        RoutingOutcome::Complete(assignments)
    } else {
        RoutingOutcome::Partial { unassigned }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Snapshot(HashMap<(&'static str, &'static str), u32>);

    impl StockLevels for Snapshot {
        fn available(&self, product_id: &ProductId, warehouse_id: &WarehouseId) -> u32 {
            self.0.iter().find(|((p, w), _)| *p == product_id.as_str() && *w == warehouse_id.as_str()).map(|(_, q)| *q).unwrap_or(0)
        }
    }

    fn region(code: &str) -> RegionCode { RegionCode::new(code).unwrap() }

    fn router() -> WarehouseRouter {
        let serves = vec![region("NG-LA"), region("NG-OG")];
        WarehouseRouter::new(vec![
            Warehouse::new("WH-C", region("NG-RI"), "NGN", serves.clone()).with_priority(5),
            Warehouse::new("WH-B", region("NG-FC"), "NGN", serves.clone()).with_priority(5),
            Warehouse::new("WH-A", region("NG-LA"), "NGN", serves.clone()).with_priority(1),
            Warehouse::new("WH-USD", region("NG-LA"), "USD", serves).with_priority(9),
        ])
    }

    fn request<'a>(cart: &'a Cart, dest: &'a RegionCode, preferred: Option<&'a RegionCode>, policy: SplitPolicy) -> RouteRequest<'a> {
        RouteRequest { cart, destination: dest, preferred_region: preferred, currency: "NGN", policy, at: Utc::now() }
    }

    #[test]
    fn test_preferred_region_then_priority_then_id() {
        let r = router();
        let cart = Cart::from_lines(vec![("P1".into(), 1)]).unwrap();
        let dest = region("NG-LA");
        let lagos = region("NG-LA");
        let req = request(&cart, &dest, Some(&lagos), SplitPolicy::AllowSplit);
        let order: Vec<&str> = r.candidates(&req).iter().map(|w| w.id().as_str()).collect();
        assert_eq!(order, vec!["WH-A", "WH-B", "WH-C"]);
        let req = request(&cart, &dest, None, SplitPolicy::AllowSplit);
        let order: Vec<&str> = r.candidates(&req).iter().map(|w| w.id().as_str()).collect();
        assert_eq!(order, vec!["WH-B", "WH-C", "WH-A"]);
    }

    #[test]
    fn test_whole_lines_before_splitting() {
        let stock = Snapshot(HashMap::from([(("P1", "WH-B"), 3), (("P1", "WH-C"), 10), (("P2", "WH-B"), 4)]));
        let cart = Cart::from_lines(vec![("P1".into(), 6), ("P2".into(), 4)]).unwrap();
        let dest = region("NG-LA");
        let outcome = router().route(&request(&cart, &dest, None, SplitPolicy::AllowSplit), &stock).unwrap();
        let RoutingOutcome::Complete(assignments) = outcome else { panic!("expected complete routing") };
        assert_eq!(assignments.len(), 2);
        assert_eq!(assignments[0].warehouse_id.as_str(), "WH-B");
        assert_eq!(assignments[0].quantity_of(&"P2".into()), 4);
        assert_eq!(assignments[1].warehouse_id.as_str(), "WH-C");
        assert_eq!(assignments[1].quantity_of(&"P1".into()), 6);
    }

    #[test]
    fn test_splits_a_line_across_warehouses() {
        let stock = Snapshot(HashMap::from([(("P1", "WH-A"), 2), (("P1", "WH-B"), 3)]));
        let cart = Cart::from_lines(vec![("P1".into(), 5)]).unwrap();
        let dest = region("NG-OG");
        let outcome = router().route(&request(&cart, &dest, None, SplitPolicy::AllowSplit), &stock).unwrap();
        let RoutingOutcome::Complete(assignments) = outcome else { panic!("expected complete routing") };
        let total: u32 = assignments.iter().map(|a| a.quantity_of(&"P1".into())).sum();
        assert_eq!(total, 5);
    }

    #[test]
    fn test_partial_when_stock_short() {
        let stock = Snapshot(HashMap::from([(("P1", "WH-A"), 2), (("P1", "WH-C"), 1)]));
        let cart = Cart::from_lines(vec![("P1".into(), 5)]).unwrap();
        let dest = region("NG-LA");
        let outcome = router().route(&request(&cart, &dest, None, SplitPolicy::AllowSplit), &stock).unwrap();
        let RoutingOutcome::Partial { unassigned } = outcome else { panic!("expected partial routing") };
        assert_eq!(unassigned, vec![Shortage { product_id: "P1".into(), warehouse_id: None, requested: 5, available: 3 }]);
    }

    #[test]
    fn test_single_warehouse_policy() {
        let stock = Snapshot(HashMap::from([(("P1", "WH-A"), 5), (("P2", "WH-B"), 5), (("P1", "WH-C"), 5), (("P2", "WH-C"), 5)]));
        let cart = Cart::from_lines(vec![("P1".into(), 5), ("P2".into(), 5)]).unwrap();
        let dest = region("NG-LA");
        let outcome = router().route(&request(&cart, &dest, None, SplitPolicy::SingleWarehouse), &stock).unwrap();
        let RoutingOutcome::Complete(assignments) = outcome else { panic!("expected complete routing") };
        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments[0].warehouse_id.as_str(), "WH-C");

        let thin = Snapshot(HashMap::from([(("P1", "WH-A"), 5), (("P2", "WH-B"), 5)]));
        let err = router().route(&request(&cart, &dest, None, SplitPolicy::SingleWarehouse), &thin).unwrap_err();
        assert_eq!(err, RoutingError::NoSingleWarehouse);
    }

    #[test]
    fn test_unserved_region_fails() {
        let cart = Cart::from_lines(vec![("P1".into(), 1)]).unwrap();
        let dest = region("NG-KN");
        let err = router().route(&request(&cart, &dest, None, SplitPolicy::AllowSplit), &Snapshot(HashMap::new())).unwrap_err();
        assert!(matches!(err, RoutingError::NoServiceableWarehouse { .. }));
    }
}
