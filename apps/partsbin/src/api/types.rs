//! # API Request/Response Types
//!
//! This module defines the JSON structures for the HTTP API.
//!
//! Every response body is an envelope `{"success": bool, "result"?: ...,
//! "error"?: string, "errors"?: {field: error}}`.

use axum::http::StatusCode;
use partsbin_core::{
    CatalogError, CatalogStatus, Dict, ItemRecord, TemplateSpec, ValidationErrors, WireValue,
    template::FieldSchema,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// HEALTH RESPONSE
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// =============================================================================
// RESPONSE ENVELOPE
// =============================================================================

/// Success or failure envelope around every result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Per-field errors of a rejected payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<ValidationErrors>,
}

impl<T> ApiResponse<T> {
    pub fn ok(result: T) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            errors: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(msg.into()),
            errors: None,
        }
    }

    /// Error envelope for a core error, with the field map of a validation
    /// failure.
    pub fn from_catalog_error(error: &CatalogError) -> Self {
        let mut response = Self::error(error.to_string());
        if let CatalogError::Validation(errors) = error {
            response.errors = Some(errors.clone());
        }
        response
    }
}

/// Empty result of a successful mutation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Done {}

/// HTTP status of a core error.
pub fn status_for(error: &CatalogError) -> StatusCode {
    match error {
        CatalogError::NotFound(_) | CatalogError::KeyNotFound(_) => StatusCode::NOT_FOUND,
        CatalogError::InvalidOperation(_)
        | CatalogError::TypeMismatch(_)
        | CatalogError::Conflict(_) => StatusCode::CONFLICT,
        CatalogError::Validation(_)
        | CatalogError::QuerySyntax { .. }
        | CatalogError::InvalidArgument(_)
        | CatalogError::Conversion { .. } => StatusCode::BAD_REQUEST,
        CatalogError::NotLoaded(_) | CatalogError::Storage(_) | CatalogError::Serialization(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

// =============================================================================
// STATUS RESPONSE
// =============================================================================

/// Catalog status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub persistent: bool,
    pub items: usize,
    pub keys: usize,
    /// Value rows per scalar kind tag.
    pub values: BTreeMap<String, usize>,
    /// Nodes per tree kind tag.
    pub nodes: BTreeMap<String, usize>,
}

impl From<CatalogStatus> for StatusResponse {
    fn from(status: CatalogStatus) -> Self {
        Self {
            persistent: status.persistent,
            items: status.items,
            keys: status.keys,
            values: status
                .values
                .into_iter()
                .map(|(kind, count)| (kind.tag().to_string(), count))
                .collect(),
            nodes: status
                .nodes
                .into_iter()
                .map(|(kind, count)| (kind.tag().to_string(), count))
                .collect(),
        }
    }
}

// =============================================================================
// ATTRIBUTE PAYLOADS
// =============================================================================

/// One attribute as JSON clients send it. The value may be any JSON scalar;
/// numbers are converted to their text form before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JsonWireValue {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

impl JsonWireValue {
    pub fn to_wire(&self) -> WireValue {
        let value = match &self.value {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(text)) => Some(text.clone()),
            Some(other) => Some(other.to_string()),
        };
        WireValue {
            kind: self.kind.clone(),
            value,
        }
    }
}

/// `{key: {"type": tag, "value": ...}}`
pub type AttributePayload = BTreeMap<String, JsonWireValue>;

/// Text form of a JSON attribute payload.
pub fn wire_payload(payload: &AttributePayload) -> BTreeMap<String, WireValue> {
    payload
        .iter()
        .map(|(key, value)| (key.clone(), value.to_wire()))
        .collect()
}

// =============================================================================
// ITEMS
// =============================================================================

/// An item with its attributes in wire form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemJson {
    pub id: u64,
    pub category: u64,
    pub template: u64,
    /// Rendered name; absent when the template format cannot be rendered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub attributes: BTreeMap<String, WireValue>,
}

impl ItemJson {
    /// Build from a loaded record.
    pub fn from_record(record: &ItemRecord, label: Option<String>) -> Result<Self, CatalogError> {
        Ok(Self {
            id: record.id().0,
            category: record.category().0,
            template: record.template().0,
            label,
            attributes: record
                .items()?
                .map(|(key, value)| (key.clone(), WireValue::from_scalar(value)))
                .collect(),
        })
    }
}

/// Item filter result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterResponse {
    pub items: Vec<ItemJson>,
    /// Attribute keys referenced by the filter, for column selection.
    pub used_keys: Vec<String>,
}

/// Item creation request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateItemRequest {
    #[serde(default)]
    pub category: u64,
    #[serde(default)]
    pub template: u64,
    #[serde(default)]
    pub attributes: AttributePayload,
}

/// `GET /items` parameters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterParams {
    #[serde(default)]
    pub q: String,
}

/// `GET /keys` parameters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeysParams {
    #[serde(default)]
    pub at_least: usize,
}

// =============================================================================
// TREES
// =============================================================================

/// Node creation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNodeRequest {
    pub name: String,
    #[serde(default)]
    pub parent: u64,
}

/// Node rename request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameRequest {
    pub name: String,
}

/// Node move request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReparentRequest {
    pub parent: u64,
}

/// `GET /tree/{kind}/{id}/children` parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct DepthParams {
    #[serde(default = "default_depth")]
    pub depth: usize,
}

const fn default_depth() -> usize {
    1
}

// =============================================================================
// TEMPLATES
// =============================================================================

/// Own and resolved fields of a template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateFieldsResponse {
    pub id: u64,
    /// Fields declared on the template itself, name -> type tag.
    pub fields: BTreeMap<String, String>,
    /// Fields including every ancestor's, name -> type tag.
    pub resolved: BTreeMap<String, String>,
    pub name_format: String,
    pub effective_format: String,
}

impl TemplateFieldsResponse {
    pub fn new(id: u64, spec: TemplateSpec, resolved: FieldSchema, effective_format: String) -> Self {
        Self {
            id,
            fields: spec
                .fields
                .into_iter()
                .map(|field| (field.name, field.kind.tag().to_string()))
                .collect(),
            resolved: resolved
                .into_iter()
                .map(|(name, kind)| (name, kind.tag().to_string()))
                .collect(),
            name_format: spec.name_format,
            effective_format,
        }
    }
}

/// Name format request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameFormatRequest {
    pub name_format: String,
}

// =============================================================================
// LOCATIONS
// =============================================================================

/// Amount stored in a container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceRequest {
    pub amount: u32,
}
