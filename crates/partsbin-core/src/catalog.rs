//! # Catalog Module
//!
//! The single entry point of the core: a storage backend plus every catalog
//! operation.
//!
//! ## Storage Backends
//!
//! - `InMemory`: `MemoryStore` (fast, volatile)
//! - `Persistent`: `RedbStore` for disk-backed ACID storage
//!
//! Every operation dispatches to the generic implementations in the
//! component modules through `&dyn CatalogStore`.

use crate::dict::{Dict, KeyUsage, key_usage};
use crate::item::{ItemRecord, Items};
use crate::query::{FilterResult, filter_items};
use crate::storage::RedbStore;
use crate::store::{CatalogStore, MemoryStore};
use crate::template::{FieldSchema, Templates};
use crate::tree::{Subtree, Tree};
use crate::validate::WireValue;
use crate::values::ValueStore;
use crate::{
    CatalogError, Comparator, Item, ItemId, ItemLocation, NodeId, Scalar, ScalarKind,
    TemplateSpec, TreeKind, TreeNode,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

// =============================================================================
// ERROR LOGGING HELPERS
// =============================================================================

/// Log a storage error and fall back to the default value.
///
/// The core has no logging dependency; the line is structured JSON on
/// stderr so the app layer can pick it up.
#[inline]
fn log_and_default<T: Default>(result: Result<T, CatalogError>, context: &str) -> T {
    match result {
        Ok(v) => v,
        Err(e) => {
            eprintln!(
                "{{\"level\":\"warn\",\"target\":\"partsbin_core::catalog\",\"message\":\"storage error in {}: {}\"}}",
                context, e
            );
            T::default()
        }
    }
}

/// Storage backend of a Catalog.
#[derive(Debug)]
pub enum StorageBackend {
    /// In-memory tables (fast, volatile).
    InMemory(MemoryStore),
    /// Disk-backed tables using redb (ACID, persistent).
    Persistent(RedbStore),
}

impl Default for StorageBackend {
    fn default() -> Self {
        Self::InMemory(MemoryStore::new())
    }
}

/// Row counts of a catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CatalogStatus {
    pub persistent: bool,
    pub items: usize,
    pub keys: usize,
    /// Stored value rows per scalar kind.
    pub values: BTreeMap<ScalarKind, usize>,
    /// Nodes per tree, roots included.
    pub nodes: BTreeMap<TreeKind, usize>,
}

/// The catalog: typed attributes, trees, templates and queries over one
/// storage backend.
#[derive(Debug, Default)]
pub struct Catalog {
    backend: StorageBackend,
}

impl Catalog {
    /// Create an empty in-memory catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open or create a persistent catalog at the given path.
    pub fn with_redb(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        Ok(Self {
            backend: StorageBackend::Persistent(RedbStore::open(path)?),
        })
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, StorageBackend::Persistent(_))
    }

    /// The active store.
    #[must_use]
    pub fn store(&self) -> &dyn CatalogStore {
        match &self.backend {
            StorageBackend::InMemory(store) => store,
            StorageBackend::Persistent(store) => store,
        }
    }

    /// The active store, mutably.
    pub fn store_mut(&mut self) -> &mut dyn CatalogStore {
        match &mut self.backend {
            StorageBackend::InMemory(store) => store,
            StorageBackend::Persistent(store) => store,
        }
    }

    /// Row counts. Storage errors are logged and counted as zero.
    #[must_use]
    pub fn status(&self) -> CatalogStatus {
        let store = self.store();
        CatalogStatus {
            persistent: self.is_persistent(),
            items: log_and_default(store.item_count(), "status.items"),
            keys: log_and_default(store.key_count(), "status.keys"),
            values: log_and_default(ValueStore::value_counts(store), "status.values"),
            nodes: TreeKind::ALL
                .into_iter()
                .map(|kind| (kind, log_and_default(store.node_count(kind), "status.nodes")))
                .collect(),
        }
    }

    /// Compact the database file. A no-op in memory.
    pub fn compact(&mut self) -> Result<(), CatalogError> {
        match &mut self.backend {
            StorageBackend::InMemory(_) => Ok(()),
            StorageBackend::Persistent(store) => store.compact(),
        }
    }

    // =========================================================================
    // VALUES AND KEYS
    // =========================================================================

    /// Convert wire text into a scalar of `kind`.
    pub fn convert(&self, kind: ScalarKind, input: &str) -> Result<Scalar, CatalogError> {
        ValueStore::convert(kind, input)
    }

    /// Items with an attribute `key` satisfying `stored <comparator> probe`.
    pub fn lookup(
        &self,
        key: &str,
        comparator: Comparator,
        probe: &Scalar,
    ) -> Result<BTreeSet<ItemId>, CatalogError> {
        ValueStore::lookup(self.store(), key, comparator, probe)
    }

    /// Attribute keys used at least `at_least` times, least used first.
    pub fn key_usage(&self, at_least: usize) -> Result<Vec<KeyUsage>, CatalogError> {
        key_usage(self.store(), at_least)
    }

    // =========================================================================
    // ITEMS
    // =========================================================================

    /// An item with its attributes loaded.
    pub fn item(&self, id: ItemId) -> Result<ItemRecord, CatalogError> {
        let mut record = Items::get(self.store(), id)?;
        record.load(self.store())?;
        Ok(record)
    }

    /// Every item with its attributes loaded.
    pub fn items(&self) -> Result<Vec<ItemRecord>, CatalogError> {
        Items::list(self.store())
    }

    /// The items among `ids` that exist, ordered by id, attributes loaded.
    pub fn items_by_id(&self, ids: &BTreeSet<ItemId>) -> Result<Vec<ItemRecord>, CatalogError> {
        Items::get_many(self.store(), ids)
    }

    pub fn create_item(
        &mut self,
        category: NodeId,
        template: NodeId,
        attributes: BTreeMap<String, Scalar>,
    ) -> Result<ItemRecord, CatalogError> {
        Items::create(self.store_mut(), category, template, attributes)
    }

    /// Create an item from a wire attribute payload.
    pub fn create_item_from_wire(
        &mut self,
        category: NodeId,
        template: NodeId,
        payload: &BTreeMap<String, WireValue>,
    ) -> Result<ItemRecord, CatalogError> {
        Items::create_from_wire(self.store_mut(), category, template, payload)
    }

    /// Upsert attributes from a wire payload, all or nothing.
    pub fn update_attributes(
        &mut self,
        id: ItemId,
        payload: &BTreeMap<String, WireValue>,
    ) -> Result<ItemRecord, CatalogError> {
        Items::update_attributes(self.store_mut(), id, payload)
    }

    pub fn set_attribute(&mut self, id: ItemId, key: &str, value: Scalar) -> Result<(), CatalogError> {
        let mut record = Items::get(self.store(), id)?;
        record.set(self.store_mut(), key, value)
    }

    /// Remove one attribute. Fails with `KeyNotFound` if the item lacks it.
    pub fn delete_attribute(&mut self, id: ItemId, key: &str) -> Result<(), CatalogError> {
        let mut record = Items::get(self.store(), id)?;
        record.delete(self.store_mut(), key)
    }

    pub fn move_item(
        &mut self,
        id: ItemId,
        category: Option<NodeId>,
        template: Option<NodeId>,
    ) -> Result<Item, CatalogError> {
        Items::move_item(self.store_mut(), id, category, template)
    }

    pub fn delete_item(&mut self, id: ItemId) -> Result<(), CatalogError> {
        Items::delete(self.store_mut(), id)
    }

    /// Label of an item from its template's name format.
    pub fn item_label(&self, id: ItemId) -> Result<String, CatalogError> {
        let record = self.item(id)?;
        Items::label(self.store(), &record)
    }

    /// Items matching a filter expression.
    pub fn filter_items(&self, query: &str) -> Result<FilterResult, CatalogError> {
        filter_items(self.store(), query)
    }

    // =========================================================================
    // TREES
    // =========================================================================

    pub fn node(&self, kind: TreeKind, id: NodeId) -> Result<TreeNode, CatalogError> {
        Tree::node(self.store(), kind, id)
    }

    pub fn create_node(
        &mut self,
        kind: TreeKind,
        name: &str,
        parent: NodeId,
    ) -> Result<TreeNode, CatalogError> {
        Tree::create(self.store_mut(), kind, name, parent)
    }

    pub fn rename_node(
        &mut self,
        kind: TreeKind,
        id: NodeId,
        name: &str,
    ) -> Result<TreeNode, CatalogError> {
        Tree::rename(self.store_mut(), kind, id, name)
    }

    pub fn move_node(
        &mut self,
        kind: TreeKind,
        id: NodeId,
        new_parent: NodeId,
    ) -> Result<TreeNode, CatalogError> {
        Tree::reparent(self.store_mut(), kind, id, new_parent)
    }

    /// Delete a non-root node; children and owned records move to its
    /// parent.
    pub fn delete_node(&mut self, kind: TreeKind, id: NodeId) -> Result<(), CatalogError> {
        match kind {
            TreeKind::Template => Templates::delete(self.store_mut(), id),
            _ => Tree::delete(self.store_mut(), kind, id),
        }
    }

    /// Nodes from the root down to `id`.
    pub fn ancestor_path(&self, kind: TreeKind, id: NodeId) -> Result<Vec<TreeNode>, CatalogError> {
        Tree::ancestor_path(self.store(), kind, id)
    }

    pub fn descendants(
        &self,
        kind: TreeKind,
        id: NodeId,
        depth: usize,
    ) -> Result<Subtree, CatalogError> {
        Tree::descendants(self.store(), kind, id, depth)
    }

    // =========================================================================
    // TEMPLATES
    // =========================================================================

    /// Fields and name format declared directly on a template.
    pub fn template_spec(&self, id: NodeId) -> Result<TemplateSpec, CatalogError> {
        Templates::spec(self.store(), id)
    }

    pub fn resolved_fields(&self, id: NodeId) -> Result<FieldSchema, CatalogError> {
        Templates::resolved_fields(self.store(), id)
    }

    pub fn effective_format(&self, id: NodeId) -> Result<String, CatalogError> {
        Templates::effective_format(self.store(), id)
    }

    pub fn set_field(
        &mut self,
        id: NodeId,
        name: &str,
        kind: ScalarKind,
    ) -> Result<TemplateSpec, CatalogError> {
        Templates::set_field(self.store_mut(), id, name, kind)
    }

    pub fn remove_field(&mut self, id: NodeId, name: &str) -> Result<TemplateSpec, CatalogError> {
        Templates::remove_field(self.store_mut(), id, name)
    }

    /// Replace a template's own fields from a wire payload `{name: tag}`.
    pub fn set_fields(
        &mut self,
        id: NodeId,
        payload: &BTreeMap<String, String>,
    ) -> Result<TemplateSpec, CatalogError> {
        Templates::set_fields(self.store_mut(), id, payload)
    }

    pub fn set_name_format(&mut self, id: NodeId, format: &str) -> Result<TemplateSpec, CatalogError> {
        Templates::set_name_format(self.store_mut(), id, format)
    }

    // =========================================================================
    // LOCATIONS
    // =========================================================================

    pub fn place_item(
        &mut self,
        container: NodeId,
        item: ItemId,
        amount: u32,
    ) -> Result<ItemLocation, CatalogError> {
        Items::place(self.store_mut(), container, item, amount)
    }

    pub fn remove_location(&mut self, container: NodeId, item: ItemId) -> Result<(), CatalogError> {
        Items::remove_location(self.store_mut(), container, item)
    }

    pub fn locations_in(&self, container: NodeId) -> Result<Vec<ItemLocation>, CatalogError> {
        Items::locations_in(self.store(), container)
    }

    pub fn locations_of(&self, item: ItemId) -> Result<Vec<ItemLocation>, CatalogError> {
        Items::locations_of(self.store(), item)
    }
}

// =============================================================================
// TESTS
// =============================================================================
