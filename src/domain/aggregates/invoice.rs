//! Invoice Aggregate
//!
//! One invoice per order, amounts mirrored from the order at creation.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::aggregates::Order;
use crate::domain::value_objects::Money;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus { #[default] Pending, Paid, Failed, Refunded }

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Pending => "PENDING", Self::Paid => "PAID", Self::Failed => "FAILED", Self::Refunded => "REFUNDED" }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    id: Uuid,
    order_id: Uuid,
    subtotal: Money,
    discount_amount: Money,
    tax: Money,
    shipping: Money,
    total: Money,
    payment_status: PaymentStatus,
    due_date: NaiveDate,
    created_at: DateTime<Utc>,
}

impl Invoice {
    /// `settled` is true when the gateway captured funds synchronously.
    pub fn for_order(order: &Order, settled: bool) -> Self {
        let terms = Duration::days(order.customer_class().payment_terms_days());
        Self {
            id: Uuid::now_v7(), order_id: order.id(),
            subtotal: order.subtotal().clone(), discount_amount: order.discount_amount().clone(),
            tax: order.tax().clone(), shipping: order.shipping().clone(), total: order.total().clone(),
            payment_status: if settled { PaymentStatus::Paid } else { PaymentStatus::Pending },
            due_date: (order.created_at() + terms).date_naive(),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn order_id(&self) -> Uuid { self.order_id }
    pub fn subtotal(&self) -> &Money { &self.subtotal }
    pub fn discount_amount(&self) -> &Money { &self.discount_amount }
    pub fn tax(&self) -> &Money { &self.tax }
    pub fn shipping(&self) -> &Money { &self.shipping }
    pub fn total(&self) -> &Money { &self.total }
    pub fn payment_status(&self) -> PaymentStatus { self.payment_status }
    pub fn due_date(&self) -> NaiveDate { self.due_date }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }

    pub fn mark_refunded(&mut self) { self.payment_status = PaymentStatus::Refunded; }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::order::tests::draft;
    use crate::domain::aggregates::Adjustments;
    use rust_decimal::Decimal;

    fn order() -> Order {
        let adj = Adjustments { discount_percentage: Decimal::new(20, 0), discount_amount: 145_000, tier_name: None, tax: 43_500, shipping: 2_000 };
        Order::create(draft(adj)).unwrap()
    }

    #[test]
    fn test_invoice_mirrors_order() {
        let order = order();
        let invoice = Invoice::for_order(&order, true);
        assert_eq!(invoice.total(), order.total());
        assert_eq!(invoice.payment_status(), PaymentStatus::Paid);
        assert_eq!(invoice.due_date(), (order.created_at() + Duration::days(30)).date_naive());
    }

    #[test]
    fn test_refund_marks_invoice() {
        let mut invoice = Invoice::for_order(&order(), true);
        assert_eq!(Invoice::for_order(&order(), false).payment_status(), PaymentStatus::Pending);
        invoice.mark_refunded();
        assert_eq!(invoice.payment_status(), PaymentStatus::Refunded);
    }
}
