//! # partsbin HTTP API Module
//!
//! This module implements the HTTP JSON API server using axum.
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /status` - Row counts
//! - `GET /items?q=` - List items, optionally filtered
//! - `POST /items` - Create an item
//! - `GET|DELETE /items/{id}` - Read or delete an item
//! - `PUT /items/{id}/attributes` - Upsert attributes
//! - `DELETE /items/{id}/attributes/{key}` - Remove one attribute
//! - `GET /keys?at_least=` - Attribute key usage
//! - `POST /tree/{kind}` - Create a node
//! - `GET|DELETE /tree/{kind}/{id}` - Read or delete a node
//! - `GET /tree/{kind}/{id}/path` - Ancestors of a node
//! - `GET /tree/{kind}/{id}/children?depth=` - Descendants of a node
//! - `PUT /tree/{kind}/{id}/parent` - Move a node
//! - `PUT /tree/{kind}/{id}/name` - Rename a node
//! - `GET|PUT /templates/{id}/fields` - Template fields
//! - `PUT /templates/{id}/name-format` - Template name format
//! - `GET /containers/{id}/items` - Items stored in a container
//! - `PUT|DELETE /containers/{id}/items/{item}` - Store or take out an item
//!
//! ## Configuration
//!
//! CORS origins, the rate limit and the body limit come from [`Config`];
//! see the `config` module for the matching environment variables.

mod handlers;
mod middleware;
mod types;

pub use middleware::create_rate_limiter;
// Re-export handlers and types for integration tests (via `partsbin::api::*`)
#[allow(unused_imports)]
pub use handlers::{
    container_items_handler, create_item_handler, create_node_handler, delete_attribute_handler,
    delete_item_handler, delete_node_handler, get_item_handler, get_node_handler, health_handler,
    keys_handler, list_items_handler, move_node_handler, node_children_handler, node_path_handler,
    place_item_handler, remove_location_handler, rename_node_handler, set_name_format_handler,
    set_template_fields_handler, status_handler, template_fields_handler,
    update_attributes_handler,
};
#[allow(unused_imports)]
pub use types::{
    ApiResponse, AttributePayload, CreateItemRequest, CreateNodeRequest, Done, FilterResponse,
    HealthResponse, ItemJson, JsonWireValue, NameFormatRequest, PlaceRequest, RenameRequest,
    ReparentRequest, StatusResponse, TemplateFieldsResponse, status_for, wire_payload,
};

use crate::config::Config;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::{delete, get, post, put},
};
use partsbin_core::{Catalog, CatalogError};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

// =============================================================================
// SERVER STATE
// =============================================================================

/// Shared server state containing the catalog.
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<RwLock<Catalog>>,
}

impl AppState {
    #[must_use]
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog: Arc::new(RwLock::new(catalog)),
        }
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

const CORS_METHODS: [Method; 5] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::DELETE,
    Method::OPTIONS,
];

/// Build the CORS layer from the configured origins.
///
/// - `None`: localhost only
/// - `["*"]`: every origin
/// - otherwise the listed origins; if none parse, localhost only
fn build_cors_layer(origins: Option<&[String]>) -> CorsLayer {
    match origins {
        Some([wildcard]) if wildcard == "*" => {
            tracing::warn!("CORS: Allowing ALL origins. This is insecure for production!");
            CorsLayer::permissive()
        }
        Some(origins) => {
            let allowed: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|origin| match origin.parse::<HeaderValue>() {
                    Ok(value) => {
                        tracing::info!("CORS: Allowing origin: {}", origin);
                        Some(value)
                    }
                    Err(e) => {
                        tracing::warn!("CORS: Invalid origin '{}': {}", origin, e);
                        None
                    }
                })
                .collect();

            if allowed.is_empty() {
                tracing::warn!("CORS: No valid origins configured, defaulting to localhost only");
                build_localhost_cors()
            } else {
                CorsLayer::new()
                    .allow_origin(allowed)
                    .allow_methods(CORS_METHODS)
                    .allow_headers([header::CONTENT_TYPE])
            }
        }
        None => {
            tracing::info!("CORS: No origins configured, defaulting to localhost only");
            build_localhost_cors()
        }
    }
}

fn build_localhost_cors() -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        "http://localhost:3000",
        "http://localhost:8080",
        "http://127.0.0.1:3000",
        "http://127.0.0.1:8080",
    ]
    .into_iter()
    .filter_map(|origin| origin.parse().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(CORS_METHODS)
        .allow_headers([header::CONTENT_TYPE])
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the axum router with all endpoints and middleware.
///
/// Middleware stack (outer to inner): tracing, CORS, body limit, then rate
/// limiting when `limits.rate_limit > 0`.
pub fn create_router(state: AppState, config: &Config) -> Router {
    let mut router = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/status", get(handlers::status_handler))
        .route(
            "/items",
            get(handlers::list_items_handler).post(handlers::create_item_handler),
        )
        .route(
            "/items/{id}",
            get(handlers::get_item_handler).delete(handlers::delete_item_handler),
        )
        .route(
            "/items/{id}/attributes",
            put(handlers::update_attributes_handler),
        )
        .route(
            "/items/{id}/attributes/{key}",
            delete(handlers::delete_attribute_handler),
        )
        .route("/keys", get(handlers::keys_handler))
        .route("/tree/{kind}", post(handlers::create_node_handler))
        .route(
            "/tree/{kind}/{id}",
            get(handlers::get_node_handler).delete(handlers::delete_node_handler),
        )
        .route("/tree/{kind}/{id}/path", get(handlers::node_path_handler))
        .route(
            "/tree/{kind}/{id}/children",
            get(handlers::node_children_handler),
        )
        .route("/tree/{kind}/{id}/parent", put(handlers::move_node_handler))
        .route("/tree/{kind}/{id}/name", put(handlers::rename_node_handler))
        .route(
            "/templates/{id}/fields",
            get(handlers::template_fields_handler).put(handlers::set_template_fields_handler),
        )
        .route(
            "/templates/{id}/name-format",
            put(handlers::set_name_format_handler),
        )
        .route(
            "/containers/{id}/items",
            get(handlers::container_items_handler),
        )
        .route(
            "/containers/{id}/items/{item}",
            put(handlers::place_item_handler).delete(handlers::remove_location_handler),
        );

    let rate_limit = config.limits.rate_limit;
    if rate_limit > 0 {
        tracing::info!("Rate limiting enabled: {} requests/second", rate_limit);
        router = router.layer(axum_middleware::from_fn_with_state(
            create_rate_limiter(rate_limit),
            middleware::rate_limit_middleware,
        ));
    } else {
        tracing::info!("Rate limiting disabled");
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(build_cors_layer(config.cors.origins.as_deref()))
                .layer(DefaultBodyLimit::max(config.limits.body_limit)),
        )
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Start the HTTP server on `config.server.host:port`.
pub async fn run_server(catalog: Catalog, config: &Config) -> Result<(), CatalogError> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let router = create_router(AppState::new(catalog), config);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| CatalogError::Storage(format!("Bind failed: {}", e)))?;

    tracing::info!("partsbin HTTP server listening on {}", addr);

    axum::serve(listener, router)
        .await
        .map_err(|e| CatalogError::Storage(format!("Server error: {}", e)))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cors_variants_build() {
        let _ = build_cors_layer(None);
        let _ = build_cors_layer(Some(&["*".to_string()]));
        let _ = build_cors_layer(Some(&["http://parts.test".to_string()]));
        let _ = build_cors_layer(Some(&["bad\norigin".to_string()]));
    }
}
