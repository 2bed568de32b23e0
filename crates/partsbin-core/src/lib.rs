//! # partsbin-core
//!
//! The catalog engine for partsbin - THE STORE.
//!
//! A schema-less but strongly typed attribute store for inventory items,
//! built on relational-style primitive tables:
//! - deduplicated scalar values (`values`)
//! - per-item typed key-value attributes (`dict`)
//! - category, container and template trees with inherited template
//!   fields and name formats (`tree`, `template`)
//! - a small boolean filter language over attribute values (`query`)
//!
//! ## Architectural Constraints
//!
//! - Has NO async, NO network dependencies (pure Rust)
//! - Deterministic: every collection is a `BTreeMap`/`BTreeSet`
//! - Storage-agnostic: components are generic over `CatalogStore`;
//!   `MemoryStore` and `RedbStore` are the two backends

// =============================================================================
// MODULES
// =============================================================================

pub mod catalog;
pub mod dict;
pub mod format;
pub mod item;
pub mod primitives;
pub mod query;
pub mod storage;
pub mod store;
pub mod template;
pub mod tree;
pub mod types;
pub mod validate;
pub mod values;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    CatalogError, Comparator, FieldError, Item, ItemId, ItemLocation, KeyId, Number, NodeId,
    Scalar, ScalarKind, TemplateField, TemplateSpec, TreeKind, TreeNode, ValidationErrors,
    ValueId,
};

// =============================================================================
// RE-EXPORTS: Catalog Engine
// =============================================================================

pub use catalog::{Catalog, CatalogStatus, StorageBackend};
pub use dict::{AttributeState, Dict, KeyUsage, key_usage, populate_many};
pub use format::NameFormat;
pub use item::{ItemRecord, Items};
pub use query::{Expr, FilterResult, Lookup, Operator, Query, Term, filter_items};
pub use storage::RedbStore;
pub use store::{AttributeRef, AttributeRow, CatalogStore, KeyCounts, MemoryStore};
pub use template::{FieldSchema, LabelFormats, Templates};
pub use tree::{Subtree, Tree};
pub use validate::{WireValue, validate_attributes, validate_field_types};
pub use values::ValueStore;
