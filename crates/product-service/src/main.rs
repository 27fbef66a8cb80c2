mod catalog;
mod validate;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use catalog::Catalog;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use validate::validate_new_product;

const DEFAULT_ADDR: &str = "0.0.0.0:3000";

fn message(status: StatusCode, text: impl Into<String>) -> Response {
    (status, Json(json!({ "message": text.into() }))).into_response()
}

async fn list_products(State(catalog): State<Arc<Catalog>>) -> Response {
    let products = catalog.list();
    tracing::info!(count = products.len(), "listed products");
    Json(products).into_response()
}

async fn get_product(
    State(catalog): State<Arc<Catalog>>,
    Path(product_id): Path<String>,
) -> Response {
    match catalog.get(&product_id) {
        Some(product) => Json(product).into_response(),
        None => {
            tracing::info!(product_id = %product_id, "product not found");
            message(StatusCode::NOT_FOUND, "Product not found")
        }
    }
}

async fn create_product(State(catalog): State<Arc<Catalog>>, body: Bytes) -> Response {
    if body.iter().all(u8::is_ascii_whitespace) {
        return message(StatusCode::BAD_REQUEST, "No product data provided");
    }

    let value: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "unparseable product body");
            return message(StatusCode::BAD_REQUEST, "Failed to parse body");
        }
    };

    let new = match validate_new_product(&value) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "rejected product");
            return message(StatusCode::BAD_REQUEST, e.to_string());
        }
    };

    let created = catalog.create(new);
    tracing::info!(id = %created.product.id, title = %created.product.title, "created product");
    (StatusCode::CREATED, Json(created)).into_response()
}

/// CORS headers the storefront expects on every catalog response.
async fn cors(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert("access-control-allow-origin", HeaderValue::from_static("*"));
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("Content-Type,X-Amz-Date,Authorization,X-Api-Key,X-Amz-Security-Token"),
    );
    headers.insert("access-control-allow-methods", HeaderValue::from_static("GET,POST"));
    response
}

fn app(catalog: Arc<Catalog>) -> Router {
    Router::new()
        .route("/products", get(list_products).post(create_product))
        .route("/products/{product_id}", get(get_product))
        .layer(middleware::map_response(cors))
        .with_state(catalog)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let addr = std::env::var("PRODUCT_SERVICE_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let catalog = Arc::new(Catalog::seeded());

    tracing::info!(addr = %addr, products = catalog.len(), "product service starting");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app(catalog)).await {
        tracing::error!(error = %e, "product service error");
    }
}
