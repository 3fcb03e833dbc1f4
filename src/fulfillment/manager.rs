//! Order transaction manager.
//!
//! Drives one order attempt through
//! `VALIDATING -> ROUTING -> RESERVING -> PRICING -> CHARGING -> PERSISTING -> COMMITTING -> CONFIRMED`
//! and undoes whatever a failed stage left behind.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn, Span};
use uuid::Uuid;
use crate::domain::aggregates::{
    Address, Adjustments, Cart, Invoice, Order, OrderDraft, OrderItem, OrderNumberGenerator, OrderStatus, PaymentStatus,
    ReservationStateError, Transition, WarehouseAssignment,
};
use crate::domain::events::{AlertEvent, DomainEvent, InventoryEvent};
use crate::domain::value_objects::{CustomerClass, CustomerId, Money, ProductId, RegionCode, WarehouseId};
use crate::fulfillment::idempotency::IdempotencyRegistry;
use crate::fulfillment::inventory::{InventoryLevel, InventoryReservationCoordinator, ReservationError};
use crate::fulfillment::pricing::PricingEngine;
use crate::fulfillment::retry::RetryPolicy;
use crate::fulfillment::routing::{RouteRequest, RoutingOutcome, SplitPolicy, WarehouseRouter};
use crate::fulfillment::tax_shipping::TaxShippingCalculator;
use crate::ports::{ChargeReceipt, Notifier, OrderStore, PaymentError, PaymentGateway, ProductCatalog, StoreError};
use crate::{OrderError, Result};

/// Completed idempotency entries and finished reservations are kept this long.
pub const RETENTION_HOURS: i64 = 24;

/// Fresh order numbers tried after the store reports a number as taken.
const MAX_RENUMBERS: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage { Validating, Routing, Reserving, Pricing, Charging, Persisting, Committing }

impl Stage {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Validating => "VALIDATING",
            Self::Routing => "ROUTING",
            Self::Reserving => "RESERVING",
            Self::Pricing => "PRICING",
            Self::Charging => "CHARGING",
            Self::Persisting => "PERSISTING",
            Self::Committing => "COMMITTING",
        }
    }

    fn enter(self) { debug!(stage = self.as_str(), "order stage"); }

    fn fail(self, err: OrderError) -> OrderError {
        warn!(stage = self.as_str(), kind = ?err.kind(), error = %err, "order attempt failed");
        err
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestedItem {
    pub product_id: ProductId,
    pub quantity: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub customer_id: CustomerId,
    pub customer_class: CustomerClass,
    pub items: Vec<RequestedItem>,
    pub shipping_address: Address,
    pub preferred_region: Option<RegionCode>,
    pub payment_method_ref: String,
    pub idempotency_key: Option<String>,
    pub customer_notes: Option<String>,
    /// Overrides the configured split policy when set.
    pub split_shipments: Option<bool>,
}

impl CreateOrderRequest {
    /// Stable hash of the request without its idempotency key.
    pub fn fingerprint(&self) -> Result<u64> {
        let mut payload = serde_json::to_value(self).map_err(|e| OrderError::Internal(e.to_string()))?;
        if let Some(fields) = payload.as_object_mut() {
            fields.remove("idempotencyKey");
        }
        let mut hasher = DefaultHasher::new();
        payload.to_string().hash(&mut hasher);
        Ok(hasher.finish())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreviewRequest {
    pub customer_class: CustomerClass,
    pub items: Vec<RequestedItem>,
    pub region: RegionCode,
}

/// Price breakdown shared by the preview endpoint and order creation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub currency: String,
    pub items: Vec<OrderItem>,
    pub subtotal: i64,
    pub discount_percentage: Decimal,
    pub discount_amount: i64,
    pub tier_name: Option<String>,
    pub tax: i64,
    pub shipping: i64,
    pub free_shipping: bool,
    pub total: i64,
    pub total_weight_grams: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderReceipt {
    pub order_id: Uuid,
    pub order_number: String,
    pub subtotal: i64,
    pub discount_percentage: Decimal,
    pub discount_amount: i64,
    pub tier_name: Option<String>,
    pub tax: i64,
    pub shipping: i64,
    pub total: i64,
    pub currency: String,
    pub status: OrderStatus,
    pub warehouse_assignments: Vec<WarehouseAssignment>,
    pub invoice_id: Uuid,
    pub payment_status: PaymentStatus,
    pub due_date: NaiveDate,
}

impl OrderReceipt {
    fn new(order: &Order, invoice: &Invoice) -> Self {
        Self {
            order_id: order.id(),
            order_number: order.order_number().to_string(),
            subtotal: order.subtotal().amount(),
            discount_percentage: order.discount_percentage(),
            discount_amount: order.discount_amount().amount(),
            tier_name: order.tier_name().map(str::to_string),
            tax: order.tax().amount(),
            shipping: order.shipping().amount(),
            total: order.total().amount(),
            currency: order.currency().to_string(),
            status: order.status(),
            warehouse_assignments: order.warehouse_assignments().to_vec(),
            invoice_id: invoice.id(),
            payment_status: invoice.payment_status(),
            due_date: invoice.due_date(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetails {
    pub order: Order,
    pub invoice: Invoice,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub expired_reservations: usize,
    pub forgotten_keys: usize,
    pub purged_reservations: usize,
}

#[derive(Clone, Debug)]
pub struct ManagerPolicies {
    pub payment_retry: RetryPolicy,
    pub persistence_retry: RetryPolicy,
    pub refund_retry: RetryPolicy,
    pub payment_timeout: std::time::Duration,
    pub split_policy: SplitPolicy,
}

impl Default for ManagerPolicies {
    fn default() -> Self {
        Self {
            payment_retry: RetryPolicy::new(3),
            persistence_retry: RetryPolicy::new(3),
            refund_retry: RetryPolicy::new(5),
            payment_timeout: std::time::Duration::from_secs(5),
            split_policy: SplitPolicy::AllowSplit,
        }
    }
}

/// Everything the manager is wired with at startup.
pub struct ManagerDeps {
    pub catalog: Arc<dyn ProductCatalog>,
    pub router: WarehouseRouter,
    pub inventory: Arc<InventoryReservationCoordinator>,
    pub pricing: PricingEngine,
    pub tax_shipping: TaxShippingCalculator,
    pub payments: Arc<dyn PaymentGateway>,
    pub store: Arc<dyn OrderStore>,
    pub notifier: Arc<dyn Notifier>,
    pub policies: ManagerPolicies,
}

struct Inner {
    catalog: Arc<dyn ProductCatalog>,
    router: WarehouseRouter,
    inventory: Arc<InventoryReservationCoordinator>,
    pricing: PricingEngine,
    tax_shipping: TaxShippingCalculator,
    payments: Arc<dyn PaymentGateway>,
    store: Arc<dyn OrderStore>,
    notifier: Arc<dyn Notifier>,
    policies: ManagerPolicies,
    order_numbers: OrderNumberGenerator,
    submissions: IdempotencyRegistry<Result<OrderReceipt>>,
    cancellations: tokio::sync::Mutex<()>,
}

struct Basket {
    cart: Cart,
    items: Vec<OrderItem>,
    currency: String,
    weight_grams: u64,
}

#[derive(Clone)]
pub struct OrderTransactionManager {
    inner: Arc<Inner>,
}

impl OrderTransactionManager {
    pub fn new(deps: ManagerDeps) -> Self {
        Self {
            inner: Arc::new(Inner {
                catalog: deps.catalog,
                router: deps.router,
                inventory: deps.inventory,
                pricing: deps.pricing,
                tax_shipping: deps.tax_shipping,
                payments: deps.payments,
                store: deps.store,
                notifier: deps.notifier,
                policies: deps.policies,
                order_numbers: OrderNumberGenerator::new(),
                submissions: IdempotencyRegistry::new(),
                cancellations: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn inventory(&self) -> &InventoryReservationCoordinator { &self.inner.inventory }

    /// Entry point for order submission. With an idempotency key the attempt runs
    /// on its own task, so a caller that goes away cannot cut it short, and
    /// repeated submissions replay the first outcome.
    pub async fn create_order(&self, request: CreateOrderRequest) -> Result<OrderReceipt> {
        let Some(key) = request.idempotency_key.clone() else {
            return self.execute(request).await;
        };
        let fingerprint = request.fingerprint()?;
        let manager = self.clone();
        let attempt = tokio::spawn(async move {
            manager.inner.submissions.run(&key, fingerprint, || manager.execute(request)).await
        });
        match attempt.await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => Err(e.into()),
            Err(e) => Err(OrderError::Internal(format!("order attempt aborted: {e}"))),
        }
    }

    /// Runs a single order attempt without idempotency bookkeeping.
    #[instrument(skip_all, fields(customer_id = %request.customer_id, order_number = tracing::field::Empty))]
    pub async fn execute(&self, request: CreateOrderRequest) -> Result<OrderReceipt> {
        Stage::Validating.enter();
        let basket = self.validate(&request).map_err(|e| Stage::Validating.fail(e))?;

        Stage::Routing.enter();
        let assignments = self.route(&basket, &request).map_err(|e| Stage::Routing.fail(e))?;

        Stage::Reserving.enter();
        let reservation = self.inner.inventory.reserve(&assignments).map_err(|e| Stage::Reserving.fail(e.into()))?;
        let reservation_id = reservation.id();

        Stage::Pricing.enter();
        let order = match self.open_order(&request, &basket, assignments, reservation_id) {
            Ok(order) => order,
            Err(e) => {
                self.release(reservation_id);
                return Err(Stage::Pricing.fail(e));
            }
        };
        Span::current().record("order_number", order.order_number());

        Stage::Charging.enter();
        let charge = match self.charge(&order, &request.payment_method_ref).await {
            Ok(charge) => charge,
            Err(e) => {
                self.release(reservation_id);
                let mut failed = order;
                if let Err(state) = failed.fail(e.to_string()) {
                    warn!(error = %state, "could not mark order failed");
                }
                self.publish(&mut failed);
                return Err(Stage::Charging.fail(e.into()));
            }
        };

        Stage::Persisting.enter();
        let mut order = order;
        let mut renumbered = 0;
        let (mut confirmed, invoice) = loop {
            let mut confirmed = order.clone();
            if let Err(e) = confirmed.confirm(charge.transaction_ref.clone()) {
                let err = self.compensate_charged(order, &charge, e.to_string()).await;
                return Err(Stage::Persisting.fail(err));
            }
            let invoice = Invoice::for_order(&confirmed, charge.settled);
            let store = &self.inner.store;
            let persisted = self
                .inner
                .policies
                .persistence_retry
                .run("persist_order", || store.create_order_and_invoice(&confirmed, &invoice), StoreError::is_retryable)
                .await;
            match persisted {
                Ok(()) => break (confirmed, invoice),
                Err(StoreError::DuplicateOrderNumber(taken)) if renumbered < MAX_RENUMBERS => {
                    renumbered += 1;
                    order.renumber(self.inner.order_numbers.next(Utc::now()));
                    warn!(taken = %taken, order_number = order.order_number(), "order number already issued, renumbering");
                    Span::current().record("order_number", order.order_number());
                }
                Err(e) => {
                    let err = self.compensate_charged(order, &charge, e.to_string()).await;
                    return Err(Stage::Persisting.fail(err));
                }
            }
        };

        Stage::Committing.enter();
        self.commit_reservation(&mut confirmed, &invoice).await;
        self.publish(&mut confirmed);
        info!(order_id = %confirmed.id(), total = confirmed.total().amount(), "order confirmed");
        Ok(OrderReceipt::new(&confirmed, &invoice))
    }

    /// Prices a cart the same way order creation does, without touching stock.
    pub fn preview(&self, request: &PreviewRequest) -> Result<Quote> {
        let basket = self.basket(&request.items)?;
        self.quote(&basket, request.customer_class, &request.region)
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderDetails> {
        let (order, invoice) = self.load(order_id).await?;
        Ok(OrderDetails { order, invoice })
    }

    /// Records a confirmed order as CANCELLED, then refunds it and returns its
    /// stock. A failed refund puts the stored order back to CONFIRMED.
    #[instrument(skip(self))]
    pub async fn cancel_order(&self, order_id: Uuid) -> Result<OrderDetails> {
        let _serialized = self.inner.cancellations.lock().await;
        let (order, invoice) = self.load(order_id).await?;
        match order.status() {
            OrderStatus::Cancelled => return Ok(OrderDetails { order, invoice }),
            OrderStatus::Confirmed => {}
            other => return Err(OrderError::Validation(format!("order in status {other} cannot be cancelled"))),
        }
        let transaction_ref = order
            .payment_ref()
            .map(str::to_string)
            .ok_or_else(|| OrderError::Internal("confirmed order has no payment reference".into()))?;

        let mut cancelled = order.clone();
        cancelled.cancel()?;
        let mut refunded = invoice.clone();
        refunded.mark_refunded();
        if let Err(e) = self.update(&cancelled, &refunded).await {
            warn!(order_id = %order.id(), error = %e, "cancellation not recorded, nothing refunded");
            return Err(OrderError::PersistenceFailed { reason: e.to_string(), refunded: false });
        }

        if let Err(e) = self.refund(order.id(), &transaction_ref, order.total()).await {
            if let Err(restore) = self.update(&order, &invoice).await {
                error!(order_id = %order.id(), error = %restore, "order left CANCELLED although the refund failed");
            }
            return Err(e.into());
        }

        match self.inner.inventory.revoke(order.reservation_id()) {
            Ok(()) => {}
            Err(ReservationError::NotFound(id)) => warn!(reservation_id = %id, "no reservation to return for cancelled order"),
            Err(e) => warn!(error = %e, "could not return stock for cancelled order"),
        }
        self.publish(&mut cancelled);
        info!(order_number = cancelled.order_number(), "order cancelled");
        Ok(OrderDetails { order: cancelled, invoice: refunded })
    }

    /// Re-enters the stock committed to CONFIRMED orders held by the store.
    /// Run once at startup, before traffic is served.
    pub async fn restore_commitments(&self) -> Result<usize> {
        let store = &self.inner.store;
        let confirmed = self
            .inner
            .policies
            .persistence_retry
            .run("find_confirmed", || store.find_orders_by_status(OrderStatus::Confirmed), StoreError::is_retryable)
            .await?;
        let mut restored = 0;
        for order in &confirmed {
            let transition = self.inner.inventory.restore_committed(order.reservation_id(), order.id(), order.warehouse_assignments())?;
            if transition == Transition::Applied {
                restored += 1;
            }
        }
        info!(orders = confirmed.len(), restored, "committed stock restored");
        Ok(restored)
    }

    pub fn inventory_level(&self, product_id: &ProductId, warehouse_id: &WarehouseId) -> Result<InventoryLevel> {
        self.inner.inventory.level(product_id, warehouse_id)?.ok_or(OrderError::NotFound)
    }

    pub fn restock(&self, product_id: &ProductId, warehouse_id: &WarehouseId, quantity: u32) -> Result<InventoryLevel> {
        if quantity == 0 {
            return Err(OrderError::Validation("restock quantity must be positive".into()));
        }
        if self.inner.catalog.product(product_id).is_none() {
            return Err(OrderError::Validation(format!("unknown product {product_id}")));
        }
        if !self.inner.router.warehouses().iter().any(|w| w.id() == warehouse_id) {
            return Err(OrderError::Validation(format!("unknown warehouse {warehouse_id}")));
        }
        let level = self.inner.inventory.restock(product_id, warehouse_id, quantity)?;
        self.inner.notifier.notify(DomainEvent::Inventory(InventoryEvent::Restocked {
            product_id: product_id.to_string(),
            warehouse_id: warehouse_id.to_string(),
            quantity,
        }));
        Ok(level)
    }

    /// Releases lapsed holds and forgets bookkeeping older than the retention window.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let expired = self.inner.inventory.release_expired(now)?;
        for reservation_id in &expired {
            self.inner.notifier.notify(DomainEvent::Inventory(InventoryEvent::ReservationExpired { reservation_id: *reservation_id }));
        }
        let cutoff = now - Duration::hours(RETENTION_HOURS);
        let forgotten_keys = self.inner.submissions.prune(cutoff)?;
        let purged_reservations = self.inner.inventory.purge_finished(cutoff)?;
        Ok(SweepReport { expired_reservations: expired.len(), forgotten_keys, purged_reservations })
    }

    // -------------------------------------------------------------------------
    // Stages
    // -------------------------------------------------------------------------

    fn validate(&self, request: &CreateOrderRequest) -> Result<Basket> {
        if request.payment_method_ref.trim().is_empty() {
            return Err(OrderError::Validation("payment method is required".into()));
        }
        let region = &request.shipping_address.region;
        if !self.inner.tax_shipping.supports(region) {
            return Err(OrderError::Validation(format!("shipping region {region} is not supported")));
        }
        self.basket(&request.items)
    }

    fn basket(&self, requested: &[RequestedItem]) -> Result<Basket> {
        let cart = Cart::from_lines(requested.iter().map(|i| (i.product_id.clone(), i.quantity)))?;
        let currency = self.inner.catalog.currency().to_string();
        let mut items = Vec::with_capacity(cart.item_count());
        let mut weight_grams = 0u64;
        for line in cart.items() {
            let product = self
                .inner
                .catalog
                .product(&line.product_id)
                .ok_or_else(|| OrderError::Validation(format!("unknown product {}", line.product_id)))?;
            weight_grams += u64::from(product.weight_grams()) * u64::from(line.quantity.value());
            items.push(OrderItem::snapshot(&product, line.quantity.value(), &currency)?);
        }
        Ok(Basket { cart, items, currency, weight_grams })
    }

    fn route(&self, basket: &Basket, request: &CreateOrderRequest) -> Result<Vec<WarehouseAssignment>> {
        let policy = match request.split_shipments {
            Some(true) => SplitPolicy::AllowSplit,
            Some(false) => SplitPolicy::SingleWarehouse,
            None => self.inner.policies.split_policy,
        };
        let route = RouteRequest {
            cart: &basket.cart,
            destination: &request.shipping_address.region,
            preferred_region: request.preferred_region.as_ref(),
            currency: &basket.currency,
            policy,
            at: Utc::now(),
        };
        match self.inner.router.route(&route, self.inner.inventory.as_ref())? {
            RoutingOutcome::Complete(assignments) => Ok(assignments),
            RoutingOutcome::Partial { unassigned } => Err(OrderError::InsufficientStock { shortages: unassigned }),
        }
    }

    fn quote(&self, basket: &Basket, class: CustomerClass, region: &RegionCode) -> Result<Quote> {
        let pricing = self.inner.pricing.price(&basket.items, class, &basket.currency)?;
        let charges = self.inner.tax_shipping.calculate(&pricing.subtotal, &pricing.discount_amount, region, basket.weight_grams)?;
        let total = pricing.subtotal.subtract(&pricing.discount_amount)?.add(&charges.tax)?.add(&charges.shipping)?;
        Ok(Quote {
            currency: basket.currency.clone(),
            items: basket.items.clone(),
            subtotal: pricing.subtotal.amount(),
            discount_percentage: pricing.discount_percentage,
            discount_amount: pricing.discount_amount.amount(),
            tier_name: pricing.tier_name,
            tax: charges.tax.amount(),
            shipping: charges.shipping.amount(),
            free_shipping: charges.free_shipping,
            total: total.amount(),
            total_weight_grams: basket.weight_grams,
        })
    }

    fn open_order(&self, request: &CreateOrderRequest, basket: &Basket, assignments: Vec<WarehouseAssignment>, reservation_id: Uuid) -> Result<Order> {
        let quote = self.quote(basket, request.customer_class, &request.shipping_address.region)?;
        let order = Order::create(OrderDraft {
            order_number: self.inner.order_numbers.next(Utc::now()),
            customer_id: request.customer_id.clone(),
            customer_class: request.customer_class,
            currency: quote.currency,
            items: quote.items,
            adjustments: Adjustments {
                discount_percentage: quote.discount_percentage,
                discount_amount: quote.discount_amount,
                tier_name: quote.tier_name,
                tax: quote.tax,
                shipping: quote.shipping,
            },
            warehouse_assignments: assignments,
            shipping_address: request.shipping_address.clone(),
            notes: request.customer_notes.clone(),
            reservation_id,
        })?;
        Ok(order)
    }

    async fn charge(&self, order: &Order, method_ref: &str) -> std::result::Result<ChargeReceipt, PaymentError> {
        let payments = &self.inner.payments;
        let timeout = self.inner.policies.payment_timeout;
        let amount = order.total().amount();
        let currency = order.currency();
        self.inner
            .policies
            .payment_retry
            .run(
                "charge",
                || async move {
                    match tokio::time::timeout(timeout, payments.charge(amount, currency, method_ref)).await {
                        Ok(result) => result,
                        Err(_) => Err(PaymentError::Timeout),
                    }
                },
                PaymentError::is_retryable,
            )
            .await
    }

    /// Money was taken but the order could not be recorded: return the stock,
    /// refund, and report how far the compensation got.
    async fn compensate_charged(&self, mut order: Order, charge: &ChargeReceipt, reason: String) -> OrderError {
        warn!(order_number = order.order_number(), reason = %reason, "compensating charged order");
        self.release(order.reservation_id());
        let refunded = self.refund(order.id(), &charge.transaction_ref, order.total()).await.is_ok();
        if let Err(e) = order.fail(reason.clone()) {
            warn!(error = %e, "could not mark order failed");
        }
        self.publish(&mut order);
        OrderError::PersistenceFailed { reason, refunded }
    }

    async fn refund(&self, order_id: Uuid, transaction_ref: &str, amount: &Money) -> std::result::Result<(), PaymentError> {
        let payments = &self.inner.payments;
        let minor_units = amount.amount();
        let refunded = self
            .inner
            .policies
            .refund_retry
            .run("refund", || payments.refund(transaction_ref, minor_units), PaymentError::is_retryable)
            .await;
        match &refunded {
            Ok(()) => info!(%order_id, transaction_ref, "payment refunded"),
            Err(e) => {
                error!(%order_id, transaction_ref, amount = minor_units, error = %e, "refund failed, manual reconciliation required");
                self.inner.notifier.notify(DomainEvent::Alert(AlertEvent::RefundFailed {
                    order_id,
                    transaction_ref: transaction_ref.to_string(),
                    amount: minor_units,
                    currency: amount.currency().to_string(),
                    reason: e.to_string(),
                }));
            }
        }
        refunded
    }

    /// Commits the hold to the order. A hold the sweeper already released is
    /// replaced once; if that fails the order stays confirmed and an alert is raised.
    async fn commit_reservation(&self, order: &mut Order, invoice: &Invoice) {
        let inventory = &self.inner.inventory;
        match inventory.commit(order.reservation_id(), order.id()) {
            Ok(()) => return,
            Err(ReservationError::State(ReservationStateError::AlreadyReleased { .. })) | Err(ReservationError::NotFound(_)) => {
                warn!(reservation_id = %order.reservation_id(), "reservation lapsed before commit, reserving again");
            }
            Err(e) => {
                error!(reservation_id = %order.reservation_id(), error = %e, "could not commit reservation");
                self.alert_lapsed(order);
                return;
            }
        }

        let replacement = inventory
            .reserve(order.warehouse_assignments())
            .and_then(|r| inventory.commit(r.id(), order.id()).map(|()| r.id()));
        let reservation_id = match replacement {
            Ok(id) => id,
            Err(e) => {
                error!(order_id = %order.id(), error = %e, "could not replace lapsed reservation");
                self.alert_lapsed(order);
                return;
            }
        };
        order.replace_reservation(reservation_id);
        if let Err(e) = self.update(order, invoice).await {
            error!(order_id = %order.id(), error = %e, "replacement reservation not recorded");
            self.alert_lapsed(order);
        }
    }

    async fn update(&self, order: &Order, invoice: &Invoice) -> std::result::Result<(), StoreError> {
        let store = &self.inner.store;
        self.inner
            .policies
            .persistence_retry
            .run("update_order", || store.update_order_and_invoice(order, invoice), StoreError::is_retryable)
            .await
    }

    fn alert_lapsed(&self, order: &Order) {
        self.inner.notifier.notify(DomainEvent::Alert(AlertEvent::ReservationLapsed {
            order_id: order.id(),
            reservation_id: order.reservation_id(),
        }));
    }

    fn release(&self, reservation_id: Uuid) {
        if let Err(e) = self.inner.inventory.release(reservation_id) {
            warn!(%reservation_id, error = %e, "could not release reservation");
        }
    }

    fn publish(&self, order: &mut Order) {
        for event in order.take_events() {
            self.inner.notifier.notify(event);
        }
    }

    async fn load(&self, order_id: Uuid) -> Result<(Order, Invoice)> {
        self.inner.store.find_order(order_id).await?.ok_or(OrderError::NotFound)
    }
}
