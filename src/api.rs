//! HTTP surface.
//!
//! ## Routes
//! - `GET  /health`
//! - `POST /api/v1/orders` (honours an `Idempotency-Key` header)
//! - `GET  /api/v1/orders/:id`
//! - `POST /api/v1/orders/:id/cancel`
//! - `POST /api/v1/pricing/preview`
//! - `GET  /api/v1/inventory/:product_id/:warehouse_id`
//! - `POST /api/v1/inventory/:product_id/:warehouse_id/restock`

use axum::{
    extract::{rejection::JsonRejection, FromRequest, Path, Request, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;
use uuid::Uuid;
use validator::Validate;
use crate::domain::aggregates::Address;
use crate::domain::value_objects::{CustomerClass, CustomerId, ProductId, RegionCode, WarehouseId};
use crate::fulfillment::inventory::InventoryLevel;
use crate::fulfillment::manager::{OrderDetails, PreviewRequest, Quote};
use crate::{CreateOrderRequest, ErrorKind, OrderError, OrderReceipt, OrderTransactionManager, RequestedItem, Shortage};

pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

pub fn router(manager: OrderTransactionManager) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "opensase-fulfillment"})) }))
        .route("/api/v1/orders", post(create_order))
        .route("/api/v1/orders/:id", get(get_order))
        .route("/api/v1/orders/:id/cancel", post(cancel_order))
        .route("/api/v1/pricing/preview", post(preview))
        .route("/api/v1/inventory/:product_id/:warehouse_id", get(inventory_level))
        .route("/api/v1/inventory/:product_id/:warehouse_id/restock", post(restock))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(manager)
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Serialize)]
struct ErrorBody<'a> {
    kind: ErrorKind,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    shortages: Option<&'a [Shortage]>,
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::ValidationError => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::RoutingFailed | ErrorKind::InsufficientStock => StatusCode::CONFLICT,
        ErrorKind::PaymentFailed => StatusCode::PAYMENT_REQUIRED,
        ErrorKind::PersistenceFailed => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for OrderError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let status = status_for(kind);
        if status.is_server_error() {
            warn!(kind = ?kind, error = %self, "request failed");
        }
        let body = ErrorBody { kind, message: self.to_string(), shortages: self.shortages() };
        (status, Json(body)).into_response()
    }
}

/// JSON body that is deserialized and then checked with `validator`; both
/// failures are reported as validation errors in the service's error shape.
pub struct ValidJson<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for ValidJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = OrderError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection: JsonRejection| OrderError::Validation(rejection.body_text()))?;
        value.validate().map_err(|e| OrderError::Validation(e.to_string()))?;
        Ok(Self(value))
    }
}

// =============================================================================
// Request bodies
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LineBody {
    #[validate(length(min = 1, max = 64))]
    pub product_id: String,
    #[validate(range(min = 1, max = 10000))]
    pub quantity: u32,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddressBody {
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    #[validate(length(min = 1, max = 200))]
    pub street1: String,
    #[validate(length(max = 200))]
    pub street2: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    #[validate(length(max = 100))]
    pub state: Option<String>,
    #[validate(length(min = 1, max = 20))]
    pub zip: String,
    #[validate(length(equal = 2))]
    pub country: String,
    pub region: RegionCode,
}

impl From<AddressBody> for Address {
    fn from(body: AddressBody) -> Self {
        Self {
            name: body.name,
            street1: body.street1,
            street2: body.street2,
            city: body.city,
            state: body.state,
            zip: body.zip,
            country: body.country.to_uppercase(),
            region: body.region,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderBody {
    #[validate(length(min = 1, max = 64))]
    pub customer_id: String,
    pub customer_class: CustomerClass,
    #[validate]
    pub items: Vec<LineBody>,
    #[validate]
    pub shipping_address: AddressBody,
    pub preferred_region: Option<RegionCode>,
    #[validate(length(min = 1, max = 128))]
    pub payment_method_ref: String,
    #[validate(length(min = 1, max = 128))]
    pub idempotency_key: Option<String>,
    #[validate(length(max = 1000))]
    pub customer_notes: Option<String>,
    pub split_shipments: Option<bool>,
}

fn requested(items: Vec<LineBody>) -> Vec<RequestedItem> {
    items.into_iter().map(|l| RequestedItem { product_id: ProductId::new(l.product_id), quantity: l.quantity }).collect()
}

impl CreateOrderBody {
    fn into_request(self, header_key: Option<String>) -> CreateOrderRequest {
        CreateOrderRequest {
            customer_id: CustomerId::new(self.customer_id),
            customer_class: self.customer_class,
            items: requested(self.items),
            shipping_address: self.shipping_address.into(),
            preferred_region: self.preferred_region,
            payment_method_ref: self.payment_method_ref,
            idempotency_key: header_key.or(self.idempotency_key),
            customer_notes: self.customer_notes,
            split_shipments: self.split_shipments,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PreviewBody {
    pub customer_class: CustomerClass,
    #[validate]
    pub items: Vec<LineBody>,
    pub region: RegionCode,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RestockBody {
    #[validate(range(min = 1, max = 1000000))]
    pub quantity: u32,
}

// =============================================================================
// Handlers
// =============================================================================

fn idempotency_key(headers: &HeaderMap) -> Result<Option<String>, OrderError> {
    let Some(value) = headers.get(IDEMPOTENCY_HEADER) else { return Ok(None) };
    let key = value.to_str().map_err(|_| OrderError::Validation("Idempotency-Key must be visible ASCII".into()))?.trim();
    if key.is_empty() || key.len() > 128 {
        return Err(OrderError::Validation("Idempotency-Key must be 1 to 128 characters".into()));
    }
    Ok(Some(key.to_string()))
}

async fn create_order(
    State(manager): State<OrderTransactionManager>,
    headers: HeaderMap,
    ValidJson(body): ValidJson<CreateOrderBody>,
) -> Result<(StatusCode, Json<OrderReceipt>), OrderError> {
    let key = idempotency_key(&headers)?;
    let receipt = manager.create_order(body.into_request(key)).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

async fn get_order(State(manager): State<OrderTransactionManager>, Path(id): Path<Uuid>) -> Result<Json<OrderDetails>, OrderError> {
    Ok(Json(manager.get_order(id).await?))
}

async fn cancel_order(State(manager): State<OrderTransactionManager>, Path(id): Path<Uuid>) -> Result<Json<OrderDetails>, OrderError> {
    Ok(Json(manager.cancel_order(id).await?))
}

async fn preview(State(manager): State<OrderTransactionManager>, ValidJson(body): ValidJson<PreviewBody>) -> Result<Json<Quote>, OrderError> {
    let request = PreviewRequest { customer_class: body.customer_class, items: requested(body.items), region: body.region };
    Ok(Json(manager.preview(&request)?))
}

async fn inventory_level(
    State(manager): State<OrderTransactionManager>,
    Path((product_id, warehouse_id)): Path<(String, String)>,
) -> Result<Json<InventoryLevel>, OrderError> {
    Ok(Json(manager.inventory_level(&ProductId::new(product_id), &WarehouseId::new(warehouse_id))?))
}

async fn restock(
    State(manager): State<OrderTransactionManager>,
    Path((product_id, warehouse_id)): Path<(String, String)>,
    ValidJson(body): ValidJson<RestockBody>,
) -> Result<Json<InventoryLevel>, OrderError> {
    Ok(Json(manager.restock(&ProductId::new(product_id), &WarehouseId::new(warehouse_id), body.quantity)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryOrderStore, SandboxPaymentGateway, TracingNotifier};
    use crate::config::{AppConfig, Collaborators, FulfillmentConfig};
    use axum::body::Body;
    use axum::http::{header, Request as HttpRequest};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> Router {
        let manager = FulfillmentConfig::builtin()
            .unwrap()
            .assemble(
                &AppConfig::default(),
                Collaborators {
                    payments: Arc::new(SandboxPaymentGateway::new()),
                    store: Arc::new(InMemoryOrderStore::new()),
                    notifier: Arc::new(TracingNotifier),
                },
            )
            .unwrap();
        router(manager)
    }

    fn order_body(payment: &str, items: Value) -> Value {
        json!({
            "customerId": "cust-42",
            "customerClass": "DISTRIBUTOR",
            "items": items,
            "shippingAddress": {
                "name": "Ada Obi", "street1": "12 Marina Rd", "city": "Lagos",
                "zip": "101001", "country": "ng", "region": "NG-LA"
            },
            "paymentMethodRef": payment
        })
    }

    fn post(uri: &str, body: &Value) -> HttpRequest<Body> {
        HttpRequest::post(uri).header(header::CONTENT_TYPE, "application/json").body(Body::from(body.to_string())).unwrap()
    }

    async fn send(app: &Router, req: HttpRequest<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (status, body)
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(&app(), HttpRequest::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_create_then_fetch_order() {
        let app = app();
        let items = json!([{"productId": "P-6AH", "quantity": 50}, {"productId": "P-9AH", "quantity": 20}]);
        let (status, receipt) = send(&app, post("/api/v1/orders", &order_body("card-ok", items))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(receipt["status"], "CONFIRMED");
        assert_eq!(receipt["subtotal"], 725_000);
        assert_eq!(receipt["discountAmount"], 145_000);
        assert_eq!(receipt["tax"], 43_500);

        let id = receipt["orderId"].as_str().unwrap();
        let (status, details) = send(&app, HttpRequest::get(format!("/api/v1/orders/{id}")).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(details["order"]["orderNumber"], receipt["orderNumber"]);

        let (status, level) =
            send(&app, HttpRequest::get("/api/v1/inventory/P-9AH/WH-LOS").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(level["onHand"], 120);
        assert_eq!(level["reserved"], 20);
        assert_eq!(level["available"], 100);
    }

    #[tokio::test]
    async fn test_idempotency_header_replays_receipt() {
        let app = app();
        let body = order_body("card-ok", json!([{"productId": "P-CHG", "quantity": 3}]));
        let request = || {
            HttpRequest::post("/api/v1/orders")
                .header(header::CONTENT_TYPE, "application/json")
                .header("Idempotency-Key", "checkout-7781")
                .body(Body::from(body.to_string()))
                .unwrap()
        };
        let (first_status, first) = send(&app, request()).await;
        let (second_status, second) = send(&app, request()).await;
        assert_eq!(first_status, StatusCode::CREATED);
        assert_eq!(second_status, StatusCode::CREATED);
        assert_eq!(first["orderId"], second["orderId"]);
    }

    #[tokio::test]
    async fn test_invalid_body_is_validation_error() {
        let app = app();
        let (status, body) =
            send(&app, post("/api/v1/orders", &order_body("card-ok", json!([{"productId": "P-6AH", "quantity": 0}])))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["kind"], "VALIDATION_ERROR");

        let malformed = HttpRequest::post("/api/v1/orders")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{\"customerId\":"))
            .unwrap();
        let (status, body) = send(&app, malformed).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["kind"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_insufficient_stock_lists_shortages() {
        let (status, body) =
            send(&app(), post("/api/v1/orders", &order_body("card-ok", json!([{"productId": "P-9AH", "quantity": 500}])))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "INSUFFICIENT_STOCK");
        assert_eq!(body["shortages"][0]["productId"], "P-9AH");
    }

    #[tokio::test]
    async fn test_declined_payment() {
        let (status, body) =
            send(&app(), post("/api/v1/orders", &order_body("decline-card", json!([{"productId": "P-2AH", "quantity": 2}])))).await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body["kind"], "PAYMENT_FAILED");
    }

    #[tokio::test]
    async fn test_unknown_order_and_cancel() {
        let app = app();
        let missing = format!("/api/v1/orders/{}", Uuid::new_v4());
        let (status, body) = send(&app, HttpRequest::get(&missing).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "NOT_FOUND");

        let (_, receipt) =
            send(&app, post("/api/v1/orders", &order_body("card-ok", json!([{"productId": "P-6AH", "quantity": 4}])))).await;
        let id = receipt["orderId"].as_str().unwrap();
        let (status, details) = send(&app, post(&format!("/api/v1/orders/{id}/cancel"), &json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(details["order"]["status"], "CANCELLED");
        assert_eq!(details["invoice"]["paymentStatus"], "REFUNDED");
    }

    #[tokio::test]
    async fn test_preview_and_restock() {
        let app = app();
        let preview = json!({"customerClass": "DIRECT", "items": [{"productId": "P-2AH", "quantity": 2}], "region": "NG-FTZ"});
        let (status, quote) = send(&app, post("/api/v1/pricing/preview", &preview)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(quote["subtotal"], 11_000);
        assert_eq!(quote["tax"], 0);

        let (status, level) = send(&app, post("/api/v1/inventory/P-2AH/WH-PHC/restock", &json!({"quantity": 10}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(level["onHand"], 100);

        let (status, _) = send(&app, post("/api/v1/inventory/P-2AH/WH-NOPE/restock", &json!({"quantity": 10}))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }
}
