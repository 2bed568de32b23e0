//! # Catalog Store
//!
//! The relational primitives every storage backend provides.
//!
//! This module defines the `CatalogStore` trait and `MemoryStore`, the
//! in-memory backend. The table split is the same for every backend:
//!
//! - one value table per scalar kind (unique value column)
//! - an attribute-key table (unique string)
//! - an attribute-pair table `(owner, key) -> (kind, value id)`
//! - one tree table per tree kind, plus template specs
//! - items and item locations
//!
//! All data structures use `BTreeMap` for deterministic ordering.

use crate::primitives::ROOT_NODE;
use crate::{
    CatalogError, Item, ItemId, ItemLocation, KeyId, NodeId, Number, Scalar, ScalarKind,
    TemplateSpec, TreeKind, TreeNode, ValueId,
};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// ROW TYPES
// =============================================================================

/// The value side of an attribute-pair row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttributeRef {
    pub kind: ScalarKind,
    pub value: ValueId,
}

/// One populated attribute, as returned by [`CatalogStore::attributes_of`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeRow {
    pub owner: ItemId,
    pub key: String,
    pub value: Scalar,
}

/// Attribute counts per kind for one key.
pub type KeyCounts = BTreeMap<ScalarKind, usize>;

// =============================================================================
// CATALOGSTORE TRAIT
// =============================================================================

/// The CatalogStore trait defines the storage primitives of the catalog.
///
/// Each method is one backend round-trip. Uniqueness is enforced here:
/// inserting a value or key that already exists fails with
/// `CatalogError::Conflict` and writes nothing.
///
/// All fallible operations return `Result<T, CatalogError>` to support both
/// in-memory and persistent storage backends uniformly.
pub trait CatalogStore {
    // -------------------------------------------------------------------------
    // Scalar value tables
    // -------------------------------------------------------------------------

    /// Ids of the stored rows among `values`. Missing values are omitted.
    fn find_values(
        &self,
        values: &BTreeSet<Scalar>,
    ) -> Result<BTreeMap<Scalar, ValueId>, CatalogError>;

    /// Insert new rows for `values`.
    ///
    /// Unit rows reference a number row and a string row; missing parts are
    /// created in the same write. Fails with `Conflict` if any value exists.
    fn insert_values(
        &mut self,
        values: &BTreeSet<Scalar>,
    ) -> Result<BTreeMap<Scalar, ValueId>, CatalogError>;

    /// Resolve value ids of one kind back to values.
    fn values(
        &self,
        kind: ScalarKind,
        ids: &BTreeSet<ValueId>,
    ) -> Result<BTreeMap<ValueId, Scalar>, CatalogError>;

    /// Number of stored rows of one kind.
    fn value_count(&self, kind: ScalarKind) -> Result<usize, CatalogError>;

    // -------------------------------------------------------------------------
    // Attribute-key table
    // -------------------------------------------------------------------------

    /// Ids of the stored keys among `names`. Missing keys are omitted.
    fn find_keys(&self, names: &BTreeSet<String>)
    -> Result<BTreeMap<String, KeyId>, CatalogError>;

    /// Insert new keys. Fails with `Conflict` if any key exists.
    fn insert_keys(
        &mut self,
        names: &BTreeSet<String>,
    ) -> Result<BTreeMap<String, KeyId>, CatalogError>;

    /// Number of stored keys.
    fn key_count(&self) -> Result<usize, CatalogError>;

    /// Every stored key with its attribute counts per kind (empty if unused).
    fn key_usage(&self) -> Result<BTreeMap<String, KeyCounts>, CatalogError>;

    // -------------------------------------------------------------------------
    // Attribute-pair table
    // -------------------------------------------------------------------------

    /// The pair row for `(owner, key)`.
    fn attribute(&self, owner: ItemId, key: KeyId) -> Result<Option<AttributeRef>, CatalogError>;

    /// Upsert pair rows for one owner in a single write.
    ///
    /// Fails with `NotFound` if the owner does not exist.
    fn put_attributes(
        &mut self,
        owner: ItemId,
        pairs: &[(KeyId, AttributeRef)],
    ) -> Result<(), CatalogError>;

    /// Remove one pair row. Returns whether it existed.
    fn remove_attribute(&mut self, owner: ItemId, key: KeyId) -> Result<bool, CatalogError>;

    /// Remove every pair row of `owner`. Returns how many were removed.
    fn clear_attributes(&mut self, owner: ItemId) -> Result<usize, CatalogError>;

    /// All attributes of kind `kind` owned by any of `owners`, joined with
    /// their key names and values.
    fn attributes_of(
        &self,
        kind: ScalarKind,
        owners: &BTreeSet<ItemId>,
    ) -> Result<Vec<AttributeRow>, CatalogError>;

    /// Owners and values of every attribute stored under `key` with `kind`.
    fn attributes_with_key(
        &self,
        kind: ScalarKind,
        key: KeyId,
    ) -> Result<Vec<(ItemId, Scalar)>, CatalogError>;

    // -------------------------------------------------------------------------
    // Tree tables
    // -------------------------------------------------------------------------

    /// Lookup a node.
    fn node(&self, kind: TreeKind, id: NodeId) -> Result<Option<TreeNode>, CatalogError>;

    /// The node followed by its ancestors, nearest first, at most `limit`
    /// nodes. Stops after the root. Empty if the node does not exist.
    fn ancestors(
        &self,
        kind: TreeKind,
        id: NodeId,
        limit: usize,
    ) -> Result<Vec<TreeNode>, CatalogError>;

    /// Direct children of any of `parents`, ordered by id.
    fn children_of(
        &self,
        kind: TreeKind,
        parents: &BTreeSet<NodeId>,
    ) -> Result<Vec<TreeNode>, CatalogError>;

    /// Insert a new non-root node.
    fn insert_node(
        &mut self,
        kind: TreeKind,
        name: &str,
        parent: NodeId,
    ) -> Result<TreeNode, CatalogError>;

    /// Overwrite name and parent of an existing node.
    fn update_node(&mut self, node: &TreeNode) -> Result<(), CatalogError>;

    /// Delete a non-root node in a single write.
    ///
    /// Children move to the node's parent, and so do the records it owns:
    /// items (category, template) and item locations (container; amounts are
    /// merged when the parent already holds the item).
    fn remove_node(&mut self, kind: TreeKind, id: NodeId) -> Result<(), CatalogError>;

    /// Number of nodes of one kind, roots included.
    fn node_count(&self, kind: TreeKind) -> Result<usize, CatalogError>;

    /// Template data of a template node. Defaults if never written.
    fn template_spec(&self, id: NodeId) -> Result<TemplateSpec, CatalogError>;

    /// Overwrite template data of a template node.
    fn put_template_spec(&mut self, id: NodeId, spec: &TemplateSpec) -> Result<(), CatalogError>;

    // -------------------------------------------------------------------------
    // Items and locations
    // -------------------------------------------------------------------------

    /// Insert a new item.
    fn insert_item(&mut self, category: NodeId, template: NodeId) -> Result<Item, CatalogError>;

    /// Lookup an item.
    fn item(&self, id: ItemId) -> Result<Option<Item>, CatalogError>;

    /// All items, ordered by id.
    fn items(&self) -> Result<Vec<Item>, CatalogError>;

    /// The items among `ids` that exist, ordered by id.
    fn items_in(&self, ids: &BTreeSet<ItemId>) -> Result<Vec<Item>, CatalogError>;

    /// Overwrite category and template of an existing item.
    fn update_item(&mut self, item: &Item) -> Result<(), CatalogError>;

    /// Delete an item with its attributes and locations. Returns whether it existed.
    fn remove_item(&mut self, id: ItemId) -> Result<bool, CatalogError>;

    /// Number of items.
    fn item_count(&self) -> Result<usize, CatalogError>;

    /// Upsert the amount of `item` in `container`.
    fn put_location(&mut self, location: &ItemLocation) -> Result<(), CatalogError>;

    /// Remove an item from a container. Returns whether it was there.
    fn remove_location(&mut self, container: NodeId, item: ItemId) -> Result<bool, CatalogError>;

    /// Items stored directly in a container.
    fn locations_in(&self, container: NodeId) -> Result<Vec<ItemLocation>, CatalogError>;

    /// Containers holding an item.
    fn locations_of(&self, item: ItemId) -> Result<Vec<ItemLocation>, CatalogError>;
}

// =============================================================================
// VALUE TABLE
// =============================================================================

/// A two-way unique index `T <-> id`, one per value table.
#[derive(Debug, Clone)]
struct UniqueTable<T: Ord + Clone> {
    by_value: BTreeMap<T, u64>,
    by_id: BTreeMap<u64, T>,
    next_id: u64,
}

impl<T: Ord + Clone> Default for UniqueTable<T> {
    fn default() -> Self {
        Self {
            by_value: BTreeMap::new(),
            by_id: BTreeMap::new(),
            next_id: 0,
        }
    }
}

impl<T: Ord + Clone> UniqueTable<T> {
    fn find(&self, value: &T) -> Option<u64> {
        self.by_value.get(value).copied()
    }

    fn get(&self, id: u64) -> Option<&T> {
        self.by_id.get(&id)
    }

    fn insert(&mut self, value: T) -> u64 {
        let id = self.next_id;
        self.next_id = self.next_id.saturating_add(1);
        self.by_value.insert(value.clone(), id);
        self.by_id.insert(id, value);
        id
    }

    fn find_or_insert(&mut self, value: T) -> u64 {
        match self.find(&value) {
            Some(id) => id,
            None => self.insert(value),
        }
    }

    fn len(&self) -> usize {
        self.by_id.len()
    }
}

// =============================================================================
// MEMORY STORE
// =============================================================================

/// The in-memory catalog backend.
///
/// Uses `BTreeMap` exclusively for deterministic ordering.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    strings: UniqueTable<String>,
    numbers: UniqueTable<Number>,
    /// Unit rows: (number row, string row).
    units: UniqueTable<(u64, u64)>,
    files: UniqueTable<String>,
    keys: UniqueTable<String>,

    /// Pair table: (owner, key) -> value.
    attributes: BTreeMap<(ItemId, KeyId), AttributeRef>,
    /// Reverse index: (key, kind, owner).
    attribute_index: BTreeSet<(KeyId, ScalarKind, ItemId)>,

    nodes: BTreeMap<(TreeKind, NodeId), TreeNode>,
    next_node_id: BTreeMap<TreeKind, u64>,
    templates: BTreeMap<NodeId, TemplateSpec>,

    items: BTreeMap<ItemId, Item>,
    next_item_id: u64,
    /// (container, item) -> amount
    locations: BTreeMap<(NodeId, ItemId), u32>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store holding only the three roots.
    #[must_use]
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        let mut next_node_id = BTreeMap::new();
        for kind in TreeKind::ALL {
            nodes.insert(
                (kind, ROOT_NODE),
                TreeNode {
                    id: ROOT_NODE,
                    kind,
                    name: String::new(),
                    parent: None,
                },
            );
            next_node_id.insert(kind, ROOT_NODE.0.saturating_add(1));
        }

        Self {
            strings: UniqueTable::default(),
            numbers: UniqueTable::default(),
            units: UniqueTable::default(),
            files: UniqueTable::default(),
            keys: UniqueTable::default(),
            attributes: BTreeMap::new(),
            attribute_index: BTreeSet::new(),
            nodes,
            next_node_id,
            templates: BTreeMap::new(),
            items: BTreeMap::new(),
            next_item_id: 0,
            locations: BTreeMap::new(),
        }
    }

    fn find_value(&self, value: &Scalar) -> Option<u64> {
        match value {
            Scalar::Str(s) => self.strings.find(s),
            Scalar::Num(n) => self.numbers.find(n),
            Scalar::Unit(n, unit) => {
                let number = self.numbers.find(n)?;
                let label = self.strings.find(unit)?;
                self.units.find(&(number, label))
            }
            Scalar::File(path) => self.files.find(path),
        }
    }

    fn resolve_value(&self, kind: ScalarKind, id: u64) -> Option<Scalar> {
        match kind {
            ScalarKind::String => self.strings.get(id).cloned().map(Scalar::Str),
            ScalarKind::Number => self.numbers.get(id).copied().map(Scalar::Num),
            ScalarKind::Unit => {
                let (number, label) = self.units.get(id)?;
                let number = self.numbers.get(*number)?;
                let label = self.strings.get(*label)?;
                Some(Scalar::Unit(*number, label.clone()))
            }
            ScalarKind::File => self.files.get(id).cloned().map(Scalar::File),
        }
    }

    fn resolve_attribute(&self, value: AttributeRef) -> Result<Scalar, CatalogError> {
        self.resolve_value(value.kind, value.value.0).ok_or_else(|| {
            CatalogError::Storage(format!(
                "dangling {} value row {}",
                value.kind, value.value.0
            ))
        })
    }

    fn require_node(&self, kind: TreeKind, id: NodeId) -> Result<&TreeNode, CatalogError> {
        self.nodes
            .get(&(kind, id))
            .ok_or_else(|| CatalogError::NotFound(format!("{} {}", kind, id)))
    }
}

impl CatalogStore for MemoryStore {
    fn find_values(
        &self,
        values: &BTreeSet<Scalar>,
    ) -> Result<BTreeMap<Scalar, ValueId>, CatalogError> {
        Ok(values
            .iter()
            .filter_map(|v| self.find_value(v).map(|id| (v.clone(), ValueId(id))))
            .collect())
    }

    fn insert_values(
        &mut self,
        values: &BTreeSet<Scalar>,
    ) -> Result<BTreeMap<Scalar, ValueId>, CatalogError> {
        if let Some(existing) = values.iter().find(|v| self.find_value(v).is_some()) {
            return Err(CatalogError::Conflict(format!(
                "{} value {} already exists",
                existing.kind(),
                existing
            )));
        }

        let mut ids = BTreeMap::new();
        for value in values {
            let id = match value {
                Scalar::Str(s) => self.strings.insert(s.clone()),
                Scalar::Num(n) => self.numbers.insert(*n),
                Scalar::Unit(n, unit) => {
                    let number = self.numbers.find_or_insert(*n);
                    let label = self.strings.find_or_insert(unit.clone());
                    self.units.insert((number, label))
                }
                Scalar::File(path) => self.files.insert(path.clone()),
            };
            ids.insert(value.clone(), ValueId(id));
        }
        Ok(ids)
    }

    fn values(
        &self,
        kind: ScalarKind,
        ids: &BTreeSet<ValueId>,
    ) -> Result<BTreeMap<ValueId, Scalar>, CatalogError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.resolve_value(kind, id.0).map(|v| (*id, v)))
            .collect())
    }

    fn value_count(&self, kind: ScalarKind) -> Result<usize, CatalogError> {
        Ok(match kind {
            ScalarKind::String => self.strings.len(),
            ScalarKind::Number => self.numbers.len(),
            ScalarKind::Unit => self.units.len(),
            ScalarKind::File => self.files.len(),
        })
    }

    fn find_keys(
        &self,
        names: &BTreeSet<String>,
    ) -> Result<BTreeMap<String, KeyId>, CatalogError> {
        Ok(names
            .iter()
            .filter_map(|n| self.keys.find(n).map(|id| (n.clone(), KeyId(id))))
            .collect())
    }

    fn insert_keys(
        &mut self,
        names: &BTreeSet<String>,
    ) -> Result<BTreeMap<String, KeyId>, CatalogError> {
        if let Some(existing) = names.iter().find(|n| self.keys.find(n).is_some()) {
            return Err(CatalogError::Conflict(format!(
                "key {:?} already exists",
                existing
            )));
        }
        Ok(names
            .iter()
            .map(|n| (n.clone(), KeyId(self.keys.insert(n.clone()))))
            .collect())
    }

    fn key_count(&self) -> Result<usize, CatalogError> {
        Ok(self.keys.len())
    }

    fn key_usage(&self) -> Result<BTreeMap<String, KeyCounts>, CatalogError> {
        let mut usage: BTreeMap<String, KeyCounts> = self
            .keys
            .by_value
            .keys()
            .map(|k| (k.clone(), KeyCounts::new()))
            .collect();
        for (key, kind, _) in &self.attribute_index {
            if let Some(name) = self.keys.get(key.0) {
                let counts = usage.entry(name.clone()).or_default();
                let count = counts.entry(*kind).or_insert(0);
                *count = count.saturating_add(1);
            }
        }
        Ok(usage)
    }

    fn attribute(&self, owner: ItemId, key: KeyId) -> Result<Option<AttributeRef>, CatalogError> {
        Ok(self.attributes.get(&(owner, key)).copied())
    }

    fn put_attributes(
        &mut self,
        owner: ItemId,
        pairs: &[(KeyId, AttributeRef)],
    ) -> Result<(), CatalogError> {
        if !self.items.contains_key(&owner) {
            return Err(CatalogError::NotFound(format!("item {}", owner)));
        }
        for (key, value) in pairs {
            if let Some(previous) = self.attributes.insert((owner, *key), *value) {
                self.attribute_index.remove(&(*key, previous.kind, owner));
            }
            self.attribute_index.insert((*key, value.kind, owner));
        }
        Ok(())
    }

    fn remove_attribute(&mut self, owner: ItemId, key: KeyId) -> Result<bool, CatalogError> {
        match self.attributes.remove(&(owner, key)) {
            Some(previous) => {
                self.attribute_index.remove(&(key, previous.kind, owner));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn clear_attributes(&mut self, owner: ItemId) -> Result<usize, CatalogError> {
        let keys: Vec<(KeyId, AttributeRef)> = self
            .attributes
            .range((owner, KeyId(0))..=(owner, KeyId(u64::MAX)))
            .map(|((_, key), value)| (*key, *value))
            .collect();
        for (key, value) in &keys {
            self.attributes.remove(&(owner, *key));
            self.attribute_index.remove(&(*key, value.kind, owner));
        }
        Ok(keys.len())
    }

    fn attributes_of(
        &self,
        kind: ScalarKind,
        owners: &BTreeSet<ItemId>,
    ) -> Result<Vec<AttributeRow>, CatalogError> {
        let mut rows = Vec::new();
        for owner in owners {
            for ((_, key), value) in self
                .attributes
                .range((*owner, KeyId(0))..=(*owner, KeyId(u64::MAX)))
            {
                if value.kind != kind {
                    continue;
                }
                let name = self
                    .keys
                    .get(key.0)
                    .ok_or_else(|| CatalogError::Storage(format!("dangling key row {}", key.0)))?;
                rows.push(AttributeRow {
                    owner: *owner,
                    key: name.clone(),
                    value: self.resolve_attribute(*value)?,
                });
            }
        }
        Ok(rows)
    }

    fn attributes_with_key(
        &self,
        kind: ScalarKind,
        key: KeyId,
    ) -> Result<Vec<(ItemId, Scalar)>, CatalogError> {
        let mut rows = Vec::new();
        for (_, _, owner) in self
            .attribute_index
            .range((key, kind, ItemId(0))..=(key, kind, ItemId(u64::MAX)))
        {
            if let Some(value) = self.attributes.get(&(*owner, key)) {
                rows.push((*owner, self.resolve_attribute(*value)?));
            }
        }
        Ok(rows)
    }

    fn node(&self, kind: TreeKind, id: NodeId) -> Result<Option<TreeNode>, CatalogError> {
        Ok(self.nodes.get(&(kind, id)).cloned())
    }

    fn ancestors(
        &self,
        kind: TreeKind,
        id: NodeId,
        limit: usize,
    ) -> Result<Vec<TreeNode>, CatalogError> {
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            if chain.len() >= limit {
                break;
            }
            let Some(node) = self.nodes.get(&(kind, node_id)) else {
                break;
            };
            current = node.parent;
            chain.push(node.clone());
        }
        Ok(chain)
    }

    fn children_of(
        &self,
        kind: TreeKind,
        parents: &BTreeSet<NodeId>,
    ) -> Result<Vec<TreeNode>, CatalogError> {
        Ok(self
            .nodes
            .range((kind, NodeId(0))..=(kind, NodeId(u64::MAX)))
            .map(|(_, node)| node)
            .filter(|node| node.parent.is_some_and(|p| parents.contains(&p)))
            .cloned()
            .collect())
    }

    fn insert_node(
        &mut self,
        kind: TreeKind,
        name: &str,
        parent: NodeId,
    ) -> Result<TreeNode, CatalogError> {
        self.require_node(kind, parent)?;
        let next = self.next_node_id.entry(kind).or_insert(1);
        let id = NodeId(*next);
        *next = next.saturating_add(1);

        let node = TreeNode {
            id,
            kind,
            name: name.to_string(),
            parent: Some(parent),
        };
        self.nodes.insert((kind, id), node.clone());
        Ok(node)
    }

    fn update_node(&mut self, node: &TreeNode) -> Result<(), CatalogError> {
        self.require_node(node.kind, node.id)?;
        self.nodes.insert((node.kind, node.id), node.clone());
        Ok(())
    }

    fn remove_node(&mut self, kind: TreeKind, id: NodeId) -> Result<(), CatalogError> {
        let node = self.require_node(kind, id)?.clone();
        let Some(parent) = node.parent else {
            return Err(CatalogError::InvalidOperation(format!(
                "the root {} cannot be deleted",
                kind
            )));
        };

        for child in self.nodes.values_mut() {
            if child.kind == kind && child.parent == Some(id) {
                child.parent = Some(parent);
            }
        }

        match kind {
            TreeKind::Category => {
                for item in self.items.values_mut() {
                    if item.category == id {
                        item.category = parent;
                    }
                }
            }
            TreeKind::Template => {
                for item in self.items.values_mut() {
                    if item.template == id {
                        item.template = parent;
                    }
                }
                self.templates.remove(&id);
            }
            TreeKind::Container => {
                let moved: Vec<(ItemId, u32)> = self
                    .locations
                    .range((id, ItemId(0))..=(id, ItemId(u64::MAX)))
                    .map(|((_, item), amount)| (*item, *amount))
                    .collect();
                for (item, amount) in moved {
                    self.locations.remove(&(id, item));
                    let merged = self.locations.entry((parent, item)).or_insert(0);
                    *merged = merged.saturating_add(amount);
                }
            }
        }

        self.nodes.remove(&(kind, id));
        Ok(())
    }

    fn node_count(&self, kind: TreeKind) -> Result<usize, CatalogError> {
        Ok(self
            .nodes
            .range((kind, NodeId(0))..=(kind, NodeId(u64::MAX)))
            .count())
    }

    fn template_spec(&self, id: NodeId) -> Result<TemplateSpec, CatalogError> {
        self.require_node(TreeKind::Template, id)?;
        Ok(self.templates.get(&id).cloned().unwrap_or_default())
    }

    fn put_template_spec(&mut self, id: NodeId, spec: &TemplateSpec) -> Result<(), CatalogError> {
        self.require_node(TreeKind::Template, id)?;
        self.templates.insert(id, spec.clone());
        Ok(())
    }

    fn insert_item(&mut self, category: NodeId, template: NodeId) -> Result<Item, CatalogError> {
        self.require_node(TreeKind::Category, category)?;
        self.require_node(TreeKind::Template, template)?;
        let item = Item {
            id: ItemId(self.next_item_id),
            category,
            template,
        };
        self.next_item_id = self.next_item_id.saturating_add(1);
        self.items.insert(item.id, item.clone());
        Ok(item)
    }

    fn item(&self, id: ItemId) -> Result<Option<Item>, CatalogError> {
        Ok(self.items.get(&id).cloned())
    }

    fn items(&self) -> Result<Vec<Item>, CatalogError> {
        Ok(self.items.values().cloned().collect())
    }

    fn items_in(&self, ids: &BTreeSet<ItemId>) -> Result<Vec<Item>, CatalogError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.items.get(id).cloned())
            .collect())
    }

    fn update_item(&mut self, item: &Item) -> Result<(), CatalogError> {
        if !self.items.contains_key(&item.id) {
            return Err(CatalogError::NotFound(format!("item {}", item.id)));
        }
        self.require_node(TreeKind::Category, item.category)?;
        self.require_node(TreeKind::Template, item.template)?;
        self.items.insert(item.id, item.clone());
        Ok(())
    }

    fn remove_item(&mut self, id: ItemId) -> Result<bool, CatalogError> {
        if self.items.remove(&id).is_none() {
            return Ok(false);
        }
        self.clear_attributes(id)?;
        self.locations.retain(|(_, item), _| *item != id);
        Ok(true)
    }

    fn item_count(&self) -> Result<usize, CatalogError> {
        Ok(self.items.len())
    }

    fn put_location(&mut self, location: &ItemLocation) -> Result<(), CatalogError> {
        self.require_node(TreeKind::Container, location.container)?;
        if !self.items.contains_key(&location.item) {
            return Err(CatalogError::NotFound(format!("item {}", location.item)));
        }
        self.locations
            .insert((location.container, location.item), location.amount);
        Ok(())
    }

    fn remove_location(&mut self, container: NodeId, item: ItemId) -> Result<bool, CatalogError> {
        Ok(self.locations.remove(&(container, item)).is_some())
    }

    fn locations_in(&self, container: NodeId) -> Result<Vec<ItemLocation>, CatalogError> {
        Ok(self
            .locations
            .range((container, ItemId(0))..=(container, ItemId(u64::MAX)))
            .map(|((container, item), amount)| ItemLocation {
                container: *container,
                item: *item,
                amount: *amount,
            })
            .collect())
    }

    fn locations_of(&self, item: ItemId) -> Result<Vec<ItemLocation>, CatalogError> {
        Ok(self
            .locations
            .iter()
            .filter(|((_, held), _)| *held == item)
            .map(|((container, item), amount)| ItemLocation {
                container: *container,
                item: *item,
                amount: *amount,
            })
            .collect())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn set(values: &[Scalar]) -> BTreeSet<Scalar> {
        values.iter().cloned().collect()
    }

    #[test]
    fn new_store_has_three_roots() {
        let store = MemoryStore::new();
        for kind in TreeKind::ALL {
            let root = store.node(kind, ROOT_NODE).expect("node").expect("root");
            assert!(root.is_root());
            assert_eq!(store.node_count(kind).expect("count"), 1);
        }
    }

    #[test]
    fn insert_values_rejects_existing() {
        let mut store = MemoryStore::new();
        let values = set(&[Scalar::string("red")]);
        store.insert_values(&values).expect("first insert");

        let result = store.insert_values(&values);
        assert!(matches!(result, Err(CatalogError::Conflict(_))));
        assert_eq!(store.value_count(ScalarKind::String).expect("count"), 1);
    }

    #[test]
    fn unit_rows_share_parts() {
        let mut store = MemoryStore::new();
        let unit = Scalar::unit(4.7, "kOhm").expect("finite");
        store.insert_values(&set(&[unit.clone()])).expect("insert");

        // The unit created its number and label rows.
        assert_eq!(store.value_count(ScalarKind::Number).expect("count"), 1);
        assert_eq!(store.value_count(ScalarKind::String).expect("count"), 1);
        assert!(store.find_values(&set(&[Scalar::string("kOhm")])).expect("find").len() == 1);

        let found = store.find_values(&set(&[unit.clone()])).expect("find");
        let id = found[&unit];
        let resolved = store
            .values(ScalarKind::Unit, &[id].into_iter().collect())
            .expect("values");
        assert_eq!(resolved[&id], unit);
    }

    #[test]
    fn put_attributes_requires_item() {
        let mut store = MemoryStore::new();
        let result = store.put_attributes(
            ItemId(7),
            &[(
                KeyId(0),
                AttributeRef {
                    kind: ScalarKind::String,
                    value: ValueId(0),
                },
            )],
        );
        assert!(matches!(result, Err(CatalogError::NotFound(_))));
    }

    #[test]
    fn remove_root_is_rejected() {
        let mut store = MemoryStore::new();
        let result = store.remove_node(TreeKind::Category, ROOT_NODE);
        assert!(matches!(result, Err(CatalogError::InvalidOperation(_))));
    }

    #[test]
    fn remove_container_merges_locations() {
        let mut store = MemoryStore::new();
        let shelf = store
            .insert_node(TreeKind::Container, "shelf", ROOT_NODE)
            .expect("shelf");
        let bin = store
            .insert_node(TreeKind::Container, "bin", shelf.id)
            .expect("bin");
        let item = store.insert_item(ROOT_NODE, ROOT_NODE).expect("item");

        store
            .put_location(&ItemLocation {
                container: shelf.id,
                item: item.id,
                amount: 2,
            })
            .expect("place");
        store
            .put_location(&ItemLocation {
                container: bin.id,
                item: item.id,
                amount: 3,
            })
            .expect("place");

        store.remove_node(TreeKind::Container, bin.id).expect("remove");

        let held = store.locations_in(shelf.id).expect("locations");
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].amount, 5);
    }

    #[test]
    fn remove_item_cascades() {
        let mut store = MemoryStore::new();
        let item = store.insert_item(ROOT_NODE, ROOT_NODE).expect("item");
        let keys = store
            .insert_keys(&["color".to_string()].into_iter().collect())
            .expect("keys");
        let values = store.insert_values(&set(&[Scalar::string("red")])).expect("values");
        store
            .put_attributes(
                item.id,
                &[(
                    keys["color"],
                    AttributeRef {
                        kind: ScalarKind::String,
                        value: values[&Scalar::string("red")],
                    },
                )],
            )
            .expect("put");
        store
            .put_location(&ItemLocation {
                container: ROOT_NODE,
                item: item.id,
                amount: 1,
            })
            .expect("place");

        assert!(store.remove_item(item.id).expect("remove"));
        assert!(store.locations_of(item.id).expect("locations").is_empty());
        assert!(
            store
                .attributes_with_key(ScalarKind::String, keys["color"])
                .expect("attrs")
                .is_empty()
        );
        // Shared value rows are never collected.
        assert_eq!(store.value_count(ScalarKind::String).expect("count"), 1);
    }
}
