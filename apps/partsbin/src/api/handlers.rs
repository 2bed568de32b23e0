//! # API Endpoint Handlers
//!
//! This module implements the actual HTTP endpoint handlers.
//!
//! Handlers take the catalog lock, run one synchronous core operation and
//! wrap its outcome in an [`ApiResponse`] with the matching status code.

use super::{
    AppState,
    types::{
        ApiResponse, AttributePayload, CreateItemRequest, CreateNodeRequest, DepthParams, Done,
        FilterParams, FilterResponse, HealthResponse, ItemJson, KeysParams, NameFormatRequest,
        PlaceRequest, RenameRequest, ReparentRequest, StatusResponse, TemplateFieldsResponse,
        status_for, wire_payload,
    },
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use partsbin_core::{
    Catalog, CatalogError, ItemId, ItemLocation, ItemRecord, KeyUsage, LabelFormats, NodeId,
    Subtree, TreeKind, TreeNode,
};
use serde::Serialize;
use std::collections::BTreeMap;

// =============================================================================
// HELPERS
// =============================================================================

/// Map a core result onto the response envelope.
fn respond<T: Serialize>(result: Result<T, CatalogError>) -> (StatusCode, Json<ApiResponse<T>>) {
    match result {
        Ok(value) => (StatusCode::OK, Json(ApiResponse::ok(value))),
        Err(e) => {
            let status = status_for(&e);
            if status == StatusCode::INTERNAL_SERVER_ERROR {
                tracing::error!("Request failed: {}", e);
            } else {
                tracing::debug!("Request rejected: {}", e);
            }
            (status, Json(ApiResponse::from_catalog_error(&e)))
        }
    }
}

fn tree_kind(tag: &str) -> Result<TreeKind, CatalogError> {
    TreeKind::from_tag(tag)
        .ok_or_else(|| CatalogError::InvalidArgument(format!("unknown tree: {}", tag)))
}

/// Wire form of a loaded record. An unrenderable label is left out.
fn item_json(
    catalog: &Catalog,
    formats: &mut LabelFormats,
    record: &ItemRecord,
) -> Result<ItemJson, CatalogError> {
    let label = match formats.render(catalog.store(), record.template(), record) {
        Ok(label) => Some(label),
        Err(e) => {
            tracing::debug!("No label for item {}: {}", record.id(), e);
            None
        }
    };
    ItemJson::from_record(record, label)
}

/// Wire form of a list of loaded records, one format lookup per template.
fn items_json(catalog: &Catalog, records: &[ItemRecord]) -> Result<Vec<ItemJson>, CatalogError> {
    let mut formats = LabelFormats::new();
    records
        .iter()
        .map(|record| item_json(catalog, &mut formats, record))
        .collect()
}

fn template_fields(catalog: &Catalog, id: NodeId) -> Result<TemplateFieldsResponse, CatalogError> {
    Ok(TemplateFieldsResponse::new(
        id.0,
        catalog.template_spec(id)?,
        catalog.resolved_fields(id)?,
        catalog.effective_format(id)?,
    ))
}

fn filter_response(catalog: &Catalog, query: &str) -> Result<FilterResponse, CatalogError> {
    if query.trim().is_empty() {
        return Ok(FilterResponse {
            items: items_json(catalog, &catalog.items()?)?,
            used_keys: Vec::new(),
        });
    }

    let filtered = catalog.filter_items(query)?;
    Ok(FilterResponse {
        items: items_json(catalog, &catalog.items_by_id(&filtered.items)?)?,
        used_keys: filtered.used_keys.into_iter().collect(),
    })
}

// =============================================================================
// HEALTH / STATUS
// =============================================================================

/// Health check endpoint.
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

/// Row counts of the catalog.
pub async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let catalog = state.catalog.read().await;
    let status: Result<StatusResponse, CatalogError> = Ok(catalog.status().into());
    respond(status)
}

// =============================================================================
// ITEMS
// =============================================================================

/// List items, filtered by `?q=` when given.
pub async fn list_items_handler(
    State(state): State<AppState>,
    Query(params): Query<FilterParams>,
) -> impl IntoResponse {
    let catalog = state.catalog.read().await;
    respond(filter_response(&catalog, &params.q))
}

/// Create an item from a wire attribute payload.
pub async fn create_item_handler(
    State(state): State<AppState>,
    Json(request): Json<CreateItemRequest>,
) -> impl IntoResponse {
    let mut catalog = state.catalog.write().await;
    let result = catalog
        .create_item_from_wire(
            NodeId(request.category),
            NodeId(request.template),
            &wire_payload(&request.attributes),
        )
        .and_then(|record| item_json(&catalog, &mut LabelFormats::new(), &record));
    if let Ok(item) = &result {
        tracing::info!("Created item {}", item.id);
    }
    respond(result)
}

pub async fn get_item_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> impl IntoResponse {
    let catalog = state.catalog.read().await;
    respond(
        catalog
            .item(ItemId(id))
            .and_then(|record| item_json(&catalog, &mut LabelFormats::new(), &record)),
    )
}

pub async fn delete_item_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> impl IntoResponse {
    let mut catalog = state.catalog.write().await;
    respond(catalog.delete_item(ItemId(id)).map(|()| Done {}))
}

/// Upsert attributes. Nothing is written if any field is rejected.
pub async fn update_attributes_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(payload): Json<AttributePayload>,
) -> impl IntoResponse {
    let mut catalog = state.catalog.write().await;
    let result = catalog
        .update_attributes(ItemId(id), &wire_payload(&payload))
        .and_then(|record| item_json(&catalog, &mut LabelFormats::new(), &record));
    respond(result)
}

pub async fn delete_attribute_handler(
    State(state): State<AppState>,
    Path((id, key)): Path<(u64, String)>,
) -> impl IntoResponse {
    let mut catalog = state.catalog.write().await;
    respond(catalog.delete_attribute(ItemId(id), &key).map(|()| Done {}))
}

/// Attribute keys used at least `?at_least=` times.
pub async fn keys_handler(
    State(state): State<AppState>,
    Query(params): Query<KeysParams>,
) -> impl IntoResponse {
    let catalog = state.catalog.read().await;
    let result: Result<Vec<KeyUsage>, CatalogError> = catalog.key_usage(params.at_least);
    respond(result)
}

// =============================================================================
// TREES
// =============================================================================

pub async fn create_node_handler(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(request): Json<CreateNodeRequest>,
) -> impl IntoResponse {
    let mut catalog = state.catalog.write().await;
    let result: Result<TreeNode, CatalogError> = tree_kind(&kind)
        .and_then(|kind| catalog.create_node(kind, &request.name, NodeId(request.parent)));
    respond(result)
}

pub async fn get_node_handler(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, u64)>,
) -> impl IntoResponse {
    let catalog = state.catalog.read().await;
    respond(tree_kind(&kind).and_then(|kind| catalog.node(kind, NodeId(id))))
}

/// Delete a node; its children and records move up to its parent.
pub async fn delete_node_handler(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, u64)>,
) -> impl IntoResponse {
    let mut catalog = state.catalog.write().await;
    let result = tree_kind(&kind).and_then(|kind| catalog.delete_node(kind, NodeId(id)));
    respond(result.map(|()| Done {}))
}

/// Nodes from the root down to the given node.
pub async fn node_path_handler(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, u64)>,
) -> impl IntoResponse {
    let catalog = state.catalog.read().await;
    respond(tree_kind(&kind).and_then(|kind| catalog.ancestor_path(kind, NodeId(id))))
}

/// Descendants up to `?depth=` levels (default 1).
pub async fn node_children_handler(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, u64)>,
    Query(params): Query<DepthParams>,
) -> impl IntoResponse {
    let catalog = state.catalog.read().await;
    let result: Result<Subtree, CatalogError> = tree_kind(&kind)
        .and_then(|kind| catalog.descendants(kind, NodeId(id), params.depth));
    respond(result)
}

pub async fn move_node_handler(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, u64)>,
    Json(request): Json<ReparentRequest>,
) -> impl IntoResponse {
    let mut catalog = state.catalog.write().await;
    let result = tree_kind(&kind)
        .and_then(|kind| catalog.move_node(kind, NodeId(id), NodeId(request.parent)));
    respond(result)
}

pub async fn rename_node_handler(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, u64)>,
    Json(request): Json<RenameRequest>,
) -> impl IntoResponse {
    let mut catalog = state.catalog.write().await;
    let result =
        tree_kind(&kind).and_then(|kind| catalog.rename_node(kind, NodeId(id), &request.name));
    respond(result)
}

// =============================================================================
// TEMPLATES
// =============================================================================

/// Own and inherited fields of a template.
pub async fn template_fields_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> impl IntoResponse {
    let catalog = state.catalog.read().await;
    respond(template_fields(&catalog, NodeId(id)))
}

/// Replace a template's own fields with `{name: type}`.
pub async fn set_template_fields_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(fields): Json<BTreeMap<String, String>>,
) -> impl IntoResponse {
    let mut catalog = state.catalog.write().await;
    let result = catalog
        .set_fields(NodeId(id), &fields)
        .and_then(|_| template_fields(&catalog, NodeId(id)));
    respond(result)
}

pub async fn set_name_format_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<NameFormatRequest>,
) -> impl IntoResponse {
    let mut catalog = state.catalog.write().await;
    let result = catalog
        .set_name_format(NodeId(id), &request.name_format)
        .and_then(|_| template_fields(&catalog, NodeId(id)));
    respond(result)
}

// =============================================================================
// LOCATIONS
// =============================================================================

/// Items stored in a container.
pub async fn container_items_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> impl IntoResponse {
    let catalog = state.catalog.read().await;
    let result: Result<Vec<ItemLocation>, CatalogError> = catalog.locations_in(NodeId(id));
    respond(result)
}

pub async fn place_item_handler(
    State(state): State<AppState>,
    Path((container, item)): Path<(u64, u64)>,
    Json(request): Json<PlaceRequest>,
) -> impl IntoResponse {
    let mut catalog = state.catalog.write().await;
    respond(catalog.place_item(NodeId(container), ItemId(item), request.amount))
}

pub async fn remove_location_handler(
    State(state): State<AppState>,
    Path((container, item)): Path<(u64, u64)>,
) -> impl IntoResponse {
    let mut catalog = state.catalog.write().await;
    respond(
        catalog
            .remove_location(NodeId(container), ItemId(item))
            .map(|()| Done {}),
    )
}
