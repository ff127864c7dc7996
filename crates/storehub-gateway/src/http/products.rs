//! Product catalogue endpoints: the publishers behind every pushed event.
//!
//! Request:  `{"name": "Lamp", "description": "...", "price": 19.5, "stock": 3}`
//! Response: the stored product
//! Error:    `{"error": "..."}`
//!
//! Creating or updating a product broadcasts it to every WS client with no
//! exclusion; deleting one does not. Storage is in-memory; persistence lives outside this service.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use storehub_protocol::events;
use tracing::info;

use crate::app::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub stock: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Deserialize)]
pub struct ProductRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: f64,
    #[serde(default)]
    pub stock: i64,
}

#[derive(Serialize)]
pub struct ProductError {
    pub error: String,
}

type ApiError = (StatusCode, Json<ProductError>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ProductError {
            error: message.into(),
        }),
    )
}

fn validate(req: &ProductRequest) -> Result<(), ApiError> {
    if req.name.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "name is required"));
    }
    if !req.price.is_finite() || req.price < 0.0 {
        return Err(api_error(StatusCode::BAD_REQUEST, "price must be a non-negative number"));
    }
    if req.stock < 0 {
        return Err(api_error(StatusCode::BAD_REQUEST, "stock cannot be negative"));
    }
    Ok(())
}

/// POST /products: store a product and announce it.
pub async fn create_product(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ProductRequest>,
) -> Result<(StatusCode, Json<Product>), ApiError> {
    validate(&req)?;

    let now = Utc::now();
    let product = Product {
        id: uuid::Uuid::new_v4().to_string(),
        name: req.name.trim().to_string(),
        description: req.description,
        price: req.price,
        stock: req.stock,
        created_at: now,
        updated_at: now,
    };
    state.products.insert(product.id.clone(), product.clone());

    let notified = state
        .hub
        .publish(events::PRODUCT_CREATED, &product, None)
        .await;
    info!(product_id = %product.id, notified, "product created");

    Ok((StatusCode::CREATED, Json(product)))
}

/// PUT /products/{id}: replace a product's fields and announce the change.
pub async fn update_product(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<ProductRequest>,
) -> Result<Json<Product>, ApiError> {
    validate(&req)?;

    // shard guard must be released before awaiting the broadcast
    let product = {
        let mut entry = state
            .products
            .get_mut(&id)
            .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("product {id} not found")))?;
        entry.name = req.name.trim().to_string();
        entry.description = req.description;
        entry.price = req.price;
        entry.stock = req.stock;
        entry.updated_at = Utc::now();
        entry.clone()
    };

    let notified = state
        .hub
        .publish(events::PRODUCT_UPDATED, &product, None)
        .await;
    info!(product_id = %product.id, notified, "product updated");

    Ok(Json(product))
}

/// GET /products: every product, oldest first.
pub async fn list_products(State(state): State<Arc<AppState>>) -> Json<Vec<Product>> {
    let mut products: Vec<Product> = state
        .products
        .iter()
        .map(|entry| entry.value().clone())
        .collect();
    products.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Json(products)
}

/// GET /products/{id}
pub async fn get_product(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Product>, ApiError> {
    state
        .products
        .get(&id)
        .map(|entry| Json(entry.value().clone()))
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("product {id} not found")))
}

#[derive(Serialize)]
pub struct ProductDeleted {
    pub message: &'static str,
}

/// DELETE /products/{id}: remove a product. Deletions are not pushed to
/// WS clients.
pub async fn delete_product(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ProductDeleted>, ApiError> {
    state
        .products
        .remove(&id)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("product {id} not found")))?;
    info!(product_id = %id, "product deleted");

    Ok(Json(ProductDeleted {
        message: "Product deleted",
    }))
}
