//! # Items
//!
//! Inventory items, their attributes and where they are stored.
//!
//! - An item belongs to exactly one category and one template
//! - Its attributes are reached through the [`Dict`] capability
//! - A location row says how many units sit in one container; amounts are
//!   always at least 1

use crate::dict::{AttributeState, Dict, populate_many};
use crate::store::CatalogStore;
use crate::template::Templates;
use crate::tree::Tree;
use crate::validate::{WireValue, validate_attributes};
use crate::values::ValueStore;
use crate::{CatalogError, Item, ItemId, ItemLocation, NodeId, Scalar, TreeKind};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// ITEM RECORD
// =============================================================================

/// An item row plus its cached attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRecord {
    item: Item,
    attributes: AttributeState,
}

impl ItemRecord {
    /// Wrap an item row; attributes start unloaded.
    #[must_use]
    pub fn new(item: Item) -> Self {
        Self {
            item,
            attributes: AttributeState::Unloaded,
        }
    }

    #[must_use]
    pub const fn item(&self) -> &Item {
        &self.item
    }

    #[must_use]
    pub const fn id(&self) -> ItemId {
        self.item.id
    }

    #[must_use]
    pub const fn category(&self) -> NodeId {
        self.item.category
    }

    #[must_use]
    pub const fn template(&self) -> NodeId {
        self.item.template
    }
}

impl Dict for ItemRecord {
    fn owner(&self) -> ItemId {
        self.item.id
    }

    fn state(&self) -> &AttributeState {
        &self.attributes
    }

    fn state_mut(&mut self) -> &mut AttributeState {
        &mut self.attributes
    }
}

// =============================================================================
// ITEM OPERATIONS
// =============================================================================

/// The Items group item and location operations, generic over the store.
pub struct Items;

impl Items {
    /// Lookup an item. Fails with `NotFound`.
    pub fn get<S: CatalogStore + ?Sized>(store: &S, id: ItemId) -> Result<ItemRecord, CatalogError> {
        store
            .item(id)?
            .map(ItemRecord::new)
            .ok_or_else(|| CatalogError::NotFound(format!("item {}", id)))
    }

    /// Every item, attributes loaded in one batch.
    pub fn list<S: CatalogStore + ?Sized>(store: &S) -> Result<Vec<ItemRecord>, CatalogError> {
        let mut records: Vec<ItemRecord> = store.items()?.into_iter().map(ItemRecord::new).collect();
        populate_many(store, &mut records)?;
        Ok(records)
    }

    /// The items among `ids` that exist, attributes loaded in one batch.
    pub fn get_many<S: CatalogStore + ?Sized>(
        store: &S,
        ids: &BTreeSet<ItemId>,
    ) -> Result<Vec<ItemRecord>, CatalogError> {
        let mut records: Vec<ItemRecord> =
            store.items_in(ids)?.into_iter().map(ItemRecord::new).collect();
        populate_many(store, &mut records)?;
        Ok(records)
    }

    /// Create an item with initial attributes.
    ///
    /// Keys and values are validated before the item row exists; if the
    /// attribute write still fails, the new item is removed again.
    pub fn create<S: CatalogStore + ?Sized>(
        store: &mut S,
        category: NodeId,
        template: NodeId,
        attributes: BTreeMap<String, Scalar>,
    ) -> Result<ItemRecord, CatalogError> {
        Tree::node(store, TreeKind::Category, category)?;
        Tree::node(store, TreeKind::Template, template)?;
        for (key, value) in &attributes {
            ValueStore::validate_key(key)?;
            ValueStore::validate(value)?;
        }

        let item = store.insert_item(category, template)?;
        let mut record = ItemRecord {
            item,
            attributes: AttributeState::Loaded(BTreeMap::new()),
        };
        if let Err(e) = record.bulk_set(store, attributes) {
            store.remove_item(record.id())?;
            return Err(e);
        }
        Ok(record)
    }

    /// Create an item from a wire attribute payload.
    pub fn create_from_wire<S: CatalogStore + ?Sized>(
        store: &mut S,
        category: NodeId,
        template: NodeId,
        payload: &BTreeMap<String, WireValue>,
    ) -> Result<ItemRecord, CatalogError> {
        let attributes = validate_attributes(payload)?;
        Self::create(store, category, template, attributes)
    }

    /// Upsert attributes from a wire payload. Nothing is written unless
    /// every field validates.
    pub fn update_attributes<S: CatalogStore + ?Sized>(
        store: &mut S,
        id: ItemId,
        payload: &BTreeMap<String, WireValue>,
    ) -> Result<ItemRecord, CatalogError> {
        let attributes = validate_attributes(payload)?;
        let mut record = Self::get(store, id)?;
        record.bulk_set(store, attributes)?;
        record.load(store)?;
        Ok(record)
    }

    /// Move an item to another category and/or template.
    pub fn move_item<S: CatalogStore + ?Sized>(
        store: &mut S,
        id: ItemId,
        category: Option<NodeId>,
        template: Option<NodeId>,
    ) -> Result<Item, CatalogError> {
        let mut item = Self::get(store, id)?.item;
        if let Some(category) = category {
            Tree::node(store, TreeKind::Category, category)?;
            item.category = category;
        }
        if let Some(template) = template {
            Tree::node(store, TreeKind::Template, template)?;
            item.template = template;
        }
        store.update_item(&item)?;
        Ok(item)
    }

    /// Delete an item with its attributes and locations.
    pub fn delete<S: CatalogStore + ?Sized>(store: &mut S, id: ItemId) -> Result<(), CatalogError> {
        if store.remove_item(id)? {
            Ok(())
        } else {
            Err(CatalogError::NotFound(format!("item {}", id)))
        }
    }

    /// Label of a loaded item, rendered with its template's name format.
    pub fn label<S: CatalogStore + ?Sized>(
        store: &S,
        record: &ItemRecord,
    ) -> Result<String, CatalogError> {
        Templates::render_label(store, record.template(), record)
    }

    // =========================================================================
    // LOCATIONS
    // =========================================================================

    /// Store `amount` units of `item` in `container`, replacing any previous
    /// amount there.
    pub fn place<S: CatalogStore + ?Sized>(
        store: &mut S,
        container: NodeId,
        item: ItemId,
        amount: u32,
    ) -> Result<ItemLocation, CatalogError> {
        if amount == 0 {
            return Err(CatalogError::InvalidArgument(
                "amounts must be at least 1".to_string(),
            ));
        }
        Tree::node(store, TreeKind::Container, container)?;
        Self::get(store, item)?;

        let location = ItemLocation {
            container,
            item,
            amount,
        };
        store.put_location(&location)?;
        Ok(location)
    }

    pub fn remove_location<S: CatalogStore + ?Sized>(
        store: &mut S,
        container: NodeId,
        item: ItemId,
    ) -> Result<(), CatalogError> {
        if store.remove_location(container, item)? {
            Ok(())
        } else {
            Err(CatalogError::NotFound(format!(
                "item {} in container {}",
                item, container
            )))
        }
    }

    /// Items held by a container.
    pub fn locations_in<S: CatalogStore + ?Sized>(
        store: &S,
        container: NodeId,
    ) -> Result<Vec<ItemLocation>, CatalogError> {
        Tree::node(store, TreeKind::Container, container)?;
        store.locations_in(container)
    }

    /// Containers holding an item.
    pub fn locations_of<S: CatalogStore + ?Sized>(
        store: &S,
        item: ItemId,
    ) -> Result<Vec<ItemLocation>, CatalogError> {
        Self::get(store, item)?;
        store.locations_of(item)
    }
}

// =============================================================================
// TESTS
// =============================================================================
