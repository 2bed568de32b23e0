//! # redb-backed Catalog Storage
//!
//! A disk-backed catalog store using the redb embedded database:
//! - ACID transactions
//! - Crash safety (copy-on-write B-trees)
//! - MVCC (concurrent readers, single writer)
//!
//! Every logical table is its own redb table. Unique columns get a second
//! table keyed by value so that find-or-insert is a point lookup, and every
//! multi-row write of a single `CatalogStore` call commits in one
//! transaction.

use crate::primitives::ROOT_NODE;
use crate::store::{AttributeRef, AttributeRow, CatalogStore, KeyCounts};
use crate::{
    CatalogError, Item, ItemId, ItemLocation, KeyId, NodeId, Number, Scalar, ScalarKind,
    TemplateSpec, TreeKind, TreeNode, ValueId,
};
use redb::{
    Database, ReadTransaction, ReadableDatabase, ReadableTable, ReadableTableMetadata,
    TableDefinition, WriteTransaction,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// String values: text -> id
const STRING_VALUES: TableDefinition<&str, u64> = TableDefinition::new("string_values");
/// String values: id -> text
const STRING_ROWS: TableDefinition<u64, &str> = TableDefinition::new("string_rows");

/// Number values: order-preserving bits -> id
const NUMBER_VALUES: TableDefinition<u64, u64> = TableDefinition::new("number_values");
/// Number values: id -> order-preserving bits
const NUMBER_ROWS: TableDefinition<u64, u64> = TableDefinition::new("number_rows");

/// Unit values: (number row, string row) -> id
const UNIT_VALUES: TableDefinition<(u64, u64), u64> = TableDefinition::new("unit_values");
/// Unit values: id -> (number row, string row)
const UNIT_ROWS: TableDefinition<u64, (u64, u64)> = TableDefinition::new("unit_rows");

/// File values: path -> id
const FILE_VALUES: TableDefinition<&str, u64> = TableDefinition::new("file_values");
/// File values: id -> path
const FILE_ROWS: TableDefinition<u64, &str> = TableDefinition::new("file_rows");

/// Attribute keys: name -> id
const KEYS: TableDefinition<&str, u64> = TableDefinition::new("keys");
/// Attribute keys: id -> name
const KEY_ROWS: TableDefinition<u64, &str> = TableDefinition::new("key_rows");

/// Attribute pairs: (owner, key) -> (kind code, value id)
const ATTRIBUTES: TableDefinition<(u64, u64), (u8, u64)> = TableDefinition::new("attributes");
/// Reverse index: (key, kind code, owner) -> value id
const ATTRIBUTE_INDEX: TableDefinition<(u64, u8, u64), u64> =
    TableDefinition::new("attribute_index");

/// Tree nodes: (tree kind code, id) -> serialized TreeNode
const NODES: TableDefinition<(u8, u64), &[u8]> = TableDefinition::new("nodes");
/// Child index: (tree kind code, parent, child)
const NODE_CHILDREN: TableDefinition<(u8, u64, u64), ()> = TableDefinition::new("node_children");
/// Template data: template id -> serialized TemplateSpec
const TEMPLATES: TableDefinition<u64, &[u8]> = TableDefinition::new("templates");

/// Items: id -> serialized Item
const ITEMS: TableDefinition<u64, &[u8]> = TableDefinition::new("items");
/// Item locations: (container, item) -> amount
const LOCATIONS: TableDefinition<(u64, u64), u32> = TableDefinition::new("locations");
/// Reverse index: (item, container)
const LOCATION_INDEX: TableDefinition<(u64, u64), ()> = TableDefinition::new("location_index");
/// Owner index: (tree kind code, category or template, item)
const ITEM_OWNERS: TableDefinition<(u8, u64, u64), ()> = TableDefinition::new("item_owners");

/// Id counters: counter name -> next id
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

const NEXT_ITEM_ID: &str = "next_item_id";
const NEXT_KEY_ID: &str = "next_key_id";

fn value_counter(kind: ScalarKind) -> String {
    format!("next_value_id.{}", kind.tag())
}

fn node_counter(kind: TreeKind) -> String {
    format!("next_node_id.{}", kind.tag())
}

// =============================================================================
// HELPERS
// =============================================================================

fn storage_err(e: impl std::fmt::Display) -> CatalogError {
    CatalogError::Storage(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CatalogError> {
    postcard::to_allocvec(value).map_err(|e| CatalogError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CatalogError> {
    postcard::from_bytes(bytes).map_err(|e| CatalogError::Serialization(e.to_string()))
}

fn kind_from_code(code: u8) -> Result<ScalarKind, CatalogError> {
    ScalarKind::from_code(code)
        .ok_or_else(|| CatalogError::Serialization(format!("unknown value kind code {}", code)))
}

/// Take the next id of a counter and advance it.
fn next_id(
    meta: &mut redb::Table<'_, &'static str, u64>,
    counter: &str,
) -> Result<u64, CatalogError> {
    let id = meta
        .get(counter)
        .map_err(storage_err)?
        .map(|v| v.value())
        .unwrap_or(0);
    meta.insert(counter, id.saturating_add(1))
        .map_err(storage_err)?;
    Ok(id)
}

/// Owner index keys of an item: its category and its template.
fn owner_keys(item: &Item) -> [(u8, u64); 2] {
    [
        (TreeKind::Category.code(), item.category.0),
        (TreeKind::Template.code(), item.template.0),
    ]
}

/// Fill the owner index from the item rows when it is empty.
fn index_item_owners(txn: &WriteTransaction) -> Result<(), CatalogError> {
    let items = txn.open_table(ITEMS).map_err(storage_err)?;
    let mut owners = txn.open_table(ITEM_OWNERS).map_err(storage_err)?;
    if !owners.is_empty().map_err(storage_err)? {
        return Ok(());
    }
    for entry in items.iter().map_err(storage_err)? {
        let (_, bytes) = entry.map_err(storage_err)?;
        let item: Item = decode(bytes.value())?;
        for (code, owner) in owner_keys(&item) {
            owners.insert((code, owner, item.id.0), ()).map_err(storage_err)?;
        }
    }
    Ok(())
}

/// The four value-to-id tables, opened in either a read or a write
/// transaction.
struct ValueIndex<S, N, U> {
    strings: S,
    numbers: N,
    units: U,
    files: S,
}

impl<S, N, U> ValueIndex<S, N, U>
where
    S: ReadableTable<&'static str, u64>,
    N: ReadableTable<u64, u64>,
    U: ReadableTable<(u64, u64), u64>,
{
    fn find_string(&self, text: &str) -> Result<Option<u64>, CatalogError> {
        Ok(self
            .strings
            .get(text)
            .map_err(storage_err)?
            .map(|v| v.value()))
    }

    fn find_number(&self, number: Number) -> Result<Option<u64>, CatalogError> {
        Ok(self
            .numbers
            .get(number.ordered_bits())
            .map_err(storage_err)?
            .map(|v| v.value()))
    }

    fn find(&self, value: &Scalar) -> Result<Option<u64>, CatalogError> {
        match value {
            Scalar::Str(s) => self.find_string(s),
            Scalar::Num(n) => self.find_number(*n),
            Scalar::Unit(n, unit) => {
                let (Some(number), Some(label)) = (self.find_number(*n)?, self.find_string(unit)?)
                else {
                    return Ok(None);
                };
                Ok(self
                    .units
                    .get((number, label))
                    .map_err(storage_err)?
                    .map(|v| v.value()))
            }
            Scalar::File(path) => Ok(self
                .files
                .get(path.as_str())
                .map_err(storage_err)?
                .map(|v| v.value())),
        }
    }
}

// =============================================================================
// REDB STORE
// =============================================================================

/// A disk-backed catalog store using redb.
pub struct RedbStore {
    /// The redb database handle.
    db: Database,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a catalog database at the given path.
    ///
    /// Creates every table and the three tree roots if they are missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let db = Database::create(path.as_ref()).map_err(storage_err)?;
        let store = Self { db };

        store.write(|txn| {
            txn.open_table(STRING_VALUES).map_err(storage_err)?;
            txn.open_table(STRING_ROWS).map_err(storage_err)?;
            txn.open_table(NUMBER_VALUES).map_err(storage_err)?;
            txn.open_table(NUMBER_ROWS).map_err(storage_err)?;
            txn.open_table(UNIT_VALUES).map_err(storage_err)?;
            txn.open_table(UNIT_ROWS).map_err(storage_err)?;
            txn.open_table(FILE_VALUES).map_err(storage_err)?;
            txn.open_table(FILE_ROWS).map_err(storage_err)?;
            txn.open_table(KEYS).map_err(storage_err)?;
            txn.open_table(KEY_ROWS).map_err(storage_err)?;
            txn.open_table(ATTRIBUTES).map_err(storage_err)?;
            txn.open_table(ATTRIBUTE_INDEX).map_err(storage_err)?;
            txn.open_table(NODE_CHILDREN).map_err(storage_err)?;
            txn.open_table(TEMPLATES).map_err(storage_err)?;
            txn.open_table(ITEMS).map_err(storage_err)?;
            txn.open_table(LOCATIONS).map_err(storage_err)?;
            txn.open_table(LOCATION_INDEX).map_err(storage_err)?;
            index_item_owners(txn)?;

            let mut nodes = txn.open_table(NODES).map_err(storage_err)?;
            let mut meta = txn.open_table(METADATA).map_err(storage_err)?;
            for kind in TreeKind::ALL {
                let exists = nodes
                    .get((kind.code(), ROOT_NODE.0))
                    .map_err(storage_err)?
                    .is_some();
                if exists {
                    continue;
                }
                let root = TreeNode {
                    id: ROOT_NODE,
                    kind,
                    name: String::new(),
                    parent: None,
                };
                nodes
                    .insert((kind.code(), ROOT_NODE.0), encode(&root)?.as_slice())
                    .map_err(storage_err)?;
                meta.insert(node_counter(kind).as_str(), ROOT_NODE.0.saturating_add(1))
                    .map_err(storage_err)?;
            }
            Ok(())
        })?;

        Ok(store)
    }

    /// Compact the database file.
    pub fn compact(&mut self) -> Result<(), CatalogError> {
        self.db.compact().map_err(storage_err)?;
        Ok(())
    }

    /// Run `f` in a write transaction; commit on success, abort on error.
    fn write<T>(
        &self,
        f: impl FnOnce(&WriteTransaction) -> Result<T, CatalogError>,
    ) -> Result<T, CatalogError> {
        let txn = self.db.begin_write().map_err(storage_err)?;
        match f(&txn) {
            Ok(out) => {
                txn.commit().map_err(storage_err)?;
                Ok(out)
            }
            Err(e) => {
                txn.abort().map_err(storage_err)?;
                Err(e)
            }
        }
    }

    fn read<T>(
        &self,
        f: impl FnOnce(&ReadTransaction) -> Result<T, CatalogError>,
    ) -> Result<T, CatalogError> {
        let txn = self.db.begin_read().map_err(storage_err)?;
        f(&txn)
    }

    fn read_node(
        txn: &ReadTransaction,
        kind: TreeKind,
        id: NodeId,
    ) -> Result<Option<TreeNode>, CatalogError> {
        let nodes = txn.open_table(NODES).map_err(storage_err)?;
        nodes
            .get((kind.code(), id.0))
            .map_err(storage_err)?
            .map(|v| decode(v.value()))
            .transpose()
    }

    /// Resolve value ids of one kind inside a read transaction.
    fn resolve_values(
        txn: &ReadTransaction,
        kind: ScalarKind,
        ids: &BTreeSet<u64>,
    ) -> Result<BTreeMap<u64, Scalar>, CatalogError> {
        let mut out = BTreeMap::new();
        match kind {
            ScalarKind::String | ScalarKind::File => {
                let rows = txn
                    .open_table(if kind == ScalarKind::String {
                        STRING_ROWS
                    } else {
                        FILE_ROWS
                    })
                    .map_err(storage_err)?;
                for id in ids {
                    if let Some(text) = rows.get(*id).map_err(storage_err)? {
                        let text = text.value().to_string();
                        let value = if kind == ScalarKind::String {
                            Scalar::Str(text)
                        } else {
                            Scalar::File(text)
                        };
                        out.insert(*id, value);
                    }
                }
            }
            ScalarKind::Number => {
                let rows = txn.open_table(NUMBER_ROWS).map_err(storage_err)?;
                for id in ids {
                    if let Some(bits) = rows.get(*id).map_err(storage_err)? {
                        out.insert(*id, Scalar::Num(Number::from_ordered_bits(bits.value())));
                    }
                }
            }
            ScalarKind::Unit => {
                let units = txn.open_table(UNIT_ROWS).map_err(storage_err)?;
                let numbers = txn.open_table(NUMBER_ROWS).map_err(storage_err)?;
                let strings = txn.open_table(STRING_ROWS).map_err(storage_err)?;
                for id in ids {
                    let Some((number, label)) =
                        units.get(*id).map_err(storage_err)?.map(|v| v.value())
                    else {
                        continue;
                    };
                    let bits = numbers
                        .get(number)
                        .map_err(storage_err)?
                        .map(|v| v.value())
                        .ok_or_else(|| {
                            CatalogError::Storage(format!("dangling number row {}", number))
                        })?;
                    let label = strings
                        .get(label)
                        .map_err(storage_err)?
                        .map(|v| v.value().to_string())
                        .ok_or_else(|| {
                            CatalogError::Storage(format!("dangling string row {}", label))
                        })?;
                    out.insert(*id, Scalar::Unit(Number::from_ordered_bits(bits), label));
                }
            }
        }
        Ok(out)
    }

    fn resolve_one(
        resolved: &BTreeMap<u64, Scalar>,
        kind: ScalarKind,
        id: u64,
    ) -> Result<Scalar, CatalogError> {
        resolved
            .get(&id)
            .cloned()
            .ok_or_else(|| CatalogError::Storage(format!("dangling {} value row {}", kind, id)))
    }
}

impl CatalogStore for RedbStore {
    // -------------------------------------------------------------------------
    // Scalar value tables
    // -------------------------------------------------------------------------

    fn find_values(
        &self,
        values: &BTreeSet<Scalar>,
    ) -> Result<BTreeMap<Scalar, ValueId>, CatalogError> {
        self.read(|txn| {
            let index = ValueIndex {
                strings: txn.open_table(STRING_VALUES).map_err(storage_err)?,
                numbers: txn.open_table(NUMBER_VALUES).map_err(storage_err)?,
                units: txn.open_table(UNIT_VALUES).map_err(storage_err)?,
                files: txn.open_table(FILE_VALUES).map_err(storage_err)?,
            };
            let mut found = BTreeMap::new();
            for value in values {
                if let Some(id) = index.find(value)? {
                    found.insert(value.clone(), ValueId(id));
                }
            }
            Ok(found)
        })
    }

    fn insert_values(
        &mut self,
        values: &BTreeSet<Scalar>,
    ) -> Result<BTreeMap<Scalar, ValueId>, CatalogError> {
        self.write(|txn| {
            let mut index = ValueIndex {
                strings: txn.open_table(STRING_VALUES).map_err(storage_err)?,
                numbers: txn.open_table(NUMBER_VALUES).map_err(storage_err)?,
                units: txn.open_table(UNIT_VALUES).map_err(storage_err)?,
                files: txn.open_table(FILE_VALUES).map_err(storage_err)?,
            };
            let mut string_rows = txn.open_table(STRING_ROWS).map_err(storage_err)?;
            let mut number_rows = txn.open_table(NUMBER_ROWS).map_err(storage_err)?;
            let mut unit_rows = txn.open_table(UNIT_ROWS).map_err(storage_err)?;
            let mut file_rows = txn.open_table(FILE_ROWS).map_err(storage_err)?;
            let mut meta = txn.open_table(METADATA).map_err(storage_err)?;

            for value in values {
                if index.find(value)?.is_some() {
                    return Err(CatalogError::Conflict(format!(
                        "{} value {} already exists",
                        value.kind(),
                        value
                    )));
                }
            }

            let string_counter = value_counter(ScalarKind::String);
            let number_counter = value_counter(ScalarKind::Number);

            let mut ids = BTreeMap::new();
            for value in values {
                let id = match value {
                    Scalar::Str(s) => {
                        let id = next_id(&mut meta, &string_counter)?;
                        index.strings.insert(s.as_str(), id).map_err(storage_err)?;
                        string_rows.insert(id, s.as_str()).map_err(storage_err)?;
                        id
                    }
                    Scalar::Num(n) => {
                        let id = next_id(&mut meta, &number_counter)?;
                        index
                            .numbers
                            .insert(n.ordered_bits(), id)
                            .map_err(storage_err)?;
                        number_rows.insert(id, n.ordered_bits()).map_err(storage_err)?;
                        id
                    }
                    Scalar::Unit(n, unit) => {
                        let number = match index.find_number(*n)? {
                            Some(id) => id,
                            None => {
                                let id = next_id(&mut meta, &number_counter)?;
                                index
                                    .numbers
                                    .insert(n.ordered_bits(), id)
                                    .map_err(storage_err)?;
                                number_rows.insert(id, n.ordered_bits()).map_err(storage_err)?;
                                id
                            }
                        };
                        let label = match index.find_string(unit)? {
                            Some(id) => id,
                            None => {
                                let id = next_id(&mut meta, &string_counter)?;
                                index
                                    .strings
                                    .insert(unit.as_str(), id)
                                    .map_err(storage_err)?;
                                string_rows.insert(id, unit.as_str()).map_err(storage_err)?;
                                id
                            }
                        };
                        let id = next_id(&mut meta, &value_counter(ScalarKind::Unit))?;
                        index
                            .units
                            .insert((number, label), id)
                            .map_err(storage_err)?;
                        unit_rows.insert(id, (number, label)).map_err(storage_err)?;
                        id
                    }
                    Scalar::File(path) => {
                        let id = next_id(&mut meta, &value_counter(ScalarKind::File))?;
                        index.files.insert(path.as_str(), id).map_err(storage_err)?;
                        file_rows.insert(id, path.as_str()).map_err(storage_err)?;
                        id
                    }
                };
                ids.insert(value.clone(), ValueId(id));
            }
            Ok(ids)
        })
    }

    fn values(
        &self,
        kind: ScalarKind,
        ids: &BTreeSet<ValueId>,
    ) -> Result<BTreeMap<ValueId, Scalar>, CatalogError> {
        let raw: BTreeSet<u64> = ids.iter().map(|id| id.0).collect();
        self.read(|txn| {
            Ok(Self::resolve_values(txn, kind, &raw)?
                .into_iter()
                .map(|(id, value)| (ValueId(id), value))
                .collect())
        })
    }

    fn value_count(&self, kind: ScalarKind) -> Result<usize, CatalogError> {
        self.read(|txn| {
            let len = match kind {
                ScalarKind::String => txn.open_table(STRING_ROWS).map_err(storage_err)?.len(),
                ScalarKind::Number => txn.open_table(NUMBER_ROWS).map_err(storage_err)?.len(),
                ScalarKind::Unit => txn.open_table(UNIT_ROWS).map_err(storage_err)?.len(),
                ScalarKind::File => txn.open_table(FILE_ROWS).map_err(storage_err)?.len(),
            };
            Ok(len.map_err(storage_err)? as usize)
        })
    }

    // -------------------------------------------------------------------------
    // Attribute-key table
    // -------------------------------------------------------------------------

    fn find_keys(
        &self,
        names: &BTreeSet<String>,
    ) -> Result<BTreeMap<String, KeyId>, CatalogError> {
        self.read(|txn| {
            let keys = txn.open_table(KEYS).map_err(storage_err)?;
            let mut found = BTreeMap::new();
            for name in names {
                if let Some(id) = keys.get(name.as_str()).map_err(storage_err)? {
                    found.insert(name.clone(), KeyId(id.value()));
                }
            }
            Ok(found)
        })
    }

    fn insert_keys(
        &mut self,
        names: &BTreeSet<String>,
    ) -> Result<BTreeMap<String, KeyId>, CatalogError> {
        self.write(|txn| {
            let mut keys = txn.open_table(KEYS).map_err(storage_err)?;
            let mut rows = txn.open_table(KEY_ROWS).map_err(storage_err)?;
            let mut meta = txn.open_table(METADATA).map_err(storage_err)?;

            for name in names {
                if keys.get(name.as_str()).map_err(storage_err)?.is_some() {
                    return Err(CatalogError::Conflict(format!(
                        "key {:?} already exists",
                        name
                    )));
                }
            }

            let mut ids = BTreeMap::new();
            for name in names {
                let id = next_id(&mut meta, NEXT_KEY_ID)?;
                keys.insert(name.as_str(), id).map_err(storage_err)?;
                rows.insert(id, name.as_str()).map_err(storage_err)?;
                ids.insert(name.clone(), KeyId(id));
            }
            Ok(ids)
        })
    }

    fn key_count(&self) -> Result<usize, CatalogError> {
        self.read(|txn| {
            let rows = txn.open_table(KEY_ROWS).map_err(storage_err)?;
            Ok(rows.len().map_err(storage_err)? as usize)
        })
    }

    fn key_usage(&self) -> Result<BTreeMap<String, KeyCounts>, CatalogError> {
        self.read(|txn| {
            let rows = txn.open_table(KEY_ROWS).map_err(storage_err)?;
            let index = txn.open_table(ATTRIBUTE_INDEX).map_err(storage_err)?;

            let mut names = BTreeMap::new();
            for entry in rows.iter().map_err(storage_err)? {
                let (id, name) = entry.map_err(storage_err)?;
                names.insert(id.value(), name.value().to_string());
            }

            let mut usage: BTreeMap<String, KeyCounts> = names
                .values()
                .map(|name| (name.clone(), KeyCounts::new()))
                .collect();
            for entry in index.iter().map_err(storage_err)? {
                let (key, _) = entry.map_err(storage_err)?;
                let (key, code, _) = key.value();
                let Some(name) = names.get(&key) else {
                    continue;
                };
                let counts = usage.entry(name.clone()).or_default();
                let count = counts.entry(kind_from_code(code)?).or_insert(0);
                *count = count.saturating_add(1);
            }
            Ok(usage)
        })
    }

    // -------------------------------------------------------------------------
    // Attribute-pair table
    // -------------------------------------------------------------------------

    fn attribute(&self, owner: ItemId, key: KeyId) -> Result<Option<AttributeRef>, CatalogError> {
        self.read(|txn| {
            let attributes = txn.open_table(ATTRIBUTES).map_err(storage_err)?;
            let Some((code, value)) = attributes
                .get((owner.0, key.0))
                .map_err(storage_err)?
                .map(|v| v.value())
            else {
                return Ok(None);
            };
            Ok(Some(AttributeRef {
                kind: kind_from_code(code)?,
                value: ValueId(value),
            }))
        })
    }

    fn put_attributes(
        &mut self,
        owner: ItemId,
        pairs: &[(KeyId, AttributeRef)],
    ) -> Result<(), CatalogError> {
        self.write(|txn| {
            let items = txn.open_table(ITEMS).map_err(storage_err)?;
            if items.get(owner.0).map_err(storage_err)?.is_none() {
                return Err(CatalogError::NotFound(format!("item {}", owner)));
            }

            let mut attributes = txn.open_table(ATTRIBUTES).map_err(storage_err)?;
            let mut index = txn.open_table(ATTRIBUTE_INDEX).map_err(storage_err)?;
            for (key, value) in pairs {
                let previous = attributes
                    .insert((owner.0, key.0), (value.kind.code(), value.value.0))
                    .map_err(storage_err)?
                    .map(|v| v.value());
                if let Some((code, _)) = previous {
                    index.remove((key.0, code, owner.0)).map_err(storage_err)?;
                }
                index
                    .insert((key.0, value.kind.code(), owner.0), value.value.0)
                    .map_err(storage_err)?;
            }
            Ok(())
        })
    }

    fn remove_attribute(&mut self, owner: ItemId, key: KeyId) -> Result<bool, CatalogError> {
        self.write(|txn| {
            let mut attributes = txn.open_table(ATTRIBUTES).map_err(storage_err)?;
            let mut index = txn.open_table(ATTRIBUTE_INDEX).map_err(storage_err)?;
            let previous = attributes
                .remove((owner.0, key.0))
                .map_err(storage_err)?
                .map(|v| v.value());
            match previous {
                Some((code, _)) => {
                    index.remove((key.0, code, owner.0)).map_err(storage_err)?;
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    fn clear_attributes(&mut self, owner: ItemId) -> Result<usize, CatalogError> {
        self.write(|txn| {
            let mut attributes = txn.open_table(ATTRIBUTES).map_err(storage_err)?;
            let mut index = txn.open_table(ATTRIBUTE_INDEX).map_err(storage_err)?;

            let mut owned = Vec::new();
            for entry in attributes
                .range((owner.0, 0)..=(owner.0, u64::MAX))
                .map_err(storage_err)?
            {
                let (key, value) = entry.map_err(storage_err)?;
                owned.push((key.value().1, value.value().0));
            }
            for (key, code) in &owned {
                attributes.remove((owner.0, *key)).map_err(storage_err)?;
                index.remove((*key, *code, owner.0)).map_err(storage_err)?;
            }
            Ok(owned.len())
        })
    }

    fn attributes_of(
        &self,
        kind: ScalarKind,
        owners: &BTreeSet<ItemId>,
    ) -> Result<Vec<AttributeRow>, CatalogError> {
        self.read(|txn| {
            let attributes = txn.open_table(ATTRIBUTES).map_err(storage_err)?;
            let key_rows = txn.open_table(KEY_ROWS).map_err(storage_err)?;

            let mut pending = Vec::new();
            let mut value_ids = BTreeSet::new();
            for owner in owners {
                for entry in attributes
                    .range((owner.0, 0)..=(owner.0, u64::MAX))
                    .map_err(storage_err)?
                {
                    let (pair, value) = entry.map_err(storage_err)?;
                    let (code, value_id) = value.value();
                    if code != kind.code() {
                        continue;
                    }
                    let key_id = pair.value().1;
                    let name = key_rows
                        .get(key_id)
                        .map_err(storage_err)?
                        .map(|v| v.value().to_string())
                        .ok_or_else(|| {
                            CatalogError::Storage(format!("dangling key row {}", key_id))
                        })?;
                    pending.push((*owner, name, value_id));
                    value_ids.insert(value_id);
                }
            }

            let resolved = Self::resolve_values(txn, kind, &value_ids)?;
            pending
                .into_iter()
                .map(|(owner, key, value_id)| {
                    Ok(AttributeRow {
                        owner,
                        key,
                        value: Self::resolve_one(&resolved, kind, value_id)?,
                    })
                })
                .collect()
        })
    }

    fn attributes_with_key(
        &self,
        kind: ScalarKind,
        key: KeyId,
    ) -> Result<Vec<(ItemId, Scalar)>, CatalogError> {
        self.read(|txn| {
            let index = txn.open_table(ATTRIBUTE_INDEX).map_err(storage_err)?;
            let code = kind.code();

            let mut pending = Vec::new();
            for entry in index
                .range((key.0, code, 0)..=(key.0, code, u64::MAX))
                .map_err(storage_err)?
            {
                let (row, value) = entry.map_err(storage_err)?;
                pending.push((row.value().2, value.value()));
            }

            let ids: BTreeSet<u64> = pending.iter().map(|(_, id)| *id).collect();
            let resolved = Self::resolve_values(txn, kind, &ids)?;
            pending
                .into_iter()
                .map(|(owner, value_id)| {
                    Ok((
                        ItemId(owner),
                        Self::resolve_one(&resolved, kind, value_id)?,
                    ))
                })
                .collect()
        })
    }

    // -------------------------------------------------------------------------
    // Tree tables
    // -------------------------------------------------------------------------

    fn node(&self, kind: TreeKind, id: NodeId) -> Result<Option<TreeNode>, CatalogError> {
        self.read(|txn| Self::read_node(txn, kind, id))
    }

    fn ancestors(
        &self,
        kind: TreeKind,
        id: NodeId,
        limit: usize,
    ) -> Result<Vec<TreeNode>, CatalogError> {
        self.read(|txn| {
            let nodes = txn.open_table(NODES).map_err(storage_err)?;
            let mut chain = Vec::new();
            let mut current = Some(id);
            while let Some(node_id) = current {
                if chain.len() >= limit {
                    break;
                }
                let Some(node) = nodes
                    .get((kind.code(), node_id.0))
                    .map_err(storage_err)?
                    .map(|v| decode::<TreeNode>(v.value()))
                    .transpose()?
                else {
                    break;
                };
                current = node.parent;
                chain.push(node);
            }
            Ok(chain)
        })
    }

    fn children_of(
        &self,
        kind: TreeKind,
        parents: &BTreeSet<NodeId>,
    ) -> Result<Vec<TreeNode>, CatalogError> {
        self.read(|txn| {
            let children = txn.open_table(NODE_CHILDREN).map_err(storage_err)?;
            let nodes = txn.open_table(NODES).map_err(storage_err)?;
            let code = kind.code();

            let mut ids = BTreeSet::new();
            for parent in parents {
                for entry in children
                    .range((code, parent.0, 0)..=(code, parent.0, u64::MAX))
                    .map_err(storage_err)?
                {
                    let (row, _) = entry.map_err(storage_err)?;
                    ids.insert(row.value().2);
                }
            }

            let mut out = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(bytes) = nodes.get((code, id)).map_err(storage_err)? {
                    out.push(decode(bytes.value())?);
                }
            }
            Ok(out)
        })
    }

    fn insert_node(
        &mut self,
        kind: TreeKind,
        name: &str,
        parent: NodeId,
    ) -> Result<TreeNode, CatalogError> {
        self.write(|txn| {
            let mut nodes = txn.open_table(NODES).map_err(storage_err)?;
            let mut children = txn.open_table(NODE_CHILDREN).map_err(storage_err)?;
            let mut meta = txn.open_table(METADATA).map_err(storage_err)?;

            if nodes
                .get((kind.code(), parent.0))
                .map_err(storage_err)?
                .is_none()
            {
                return Err(CatalogError::NotFound(format!("{} {}", kind, parent)));
            }

            let node = TreeNode {
                id: NodeId(next_id(&mut meta, &node_counter(kind))?),
                kind,
                name: name.to_string(),
                parent: Some(parent),
            };
            nodes
                .insert((kind.code(), node.id.0), encode(&node)?.as_slice())
                .map_err(storage_err)?;
            children
                .insert((kind.code(), parent.0, node.id.0), ())
                .map_err(storage_err)?;
            Ok(node)
        })
    }

    fn update_node(&mut self, node: &TreeNode) -> Result<(), CatalogError> {
        self.write(|txn| {
            let mut nodes = txn.open_table(NODES).map_err(storage_err)?;
            let mut children = txn.open_table(NODE_CHILDREN).map_err(storage_err)?;
            let code = node.kind.code();

            let previous: TreeNode = nodes
                .get((code, node.id.0))
                .map_err(storage_err)?
                .map(|v| decode(v.value()))
                .transpose()?
                .ok_or_else(|| CatalogError::NotFound(format!("{} {}", node.kind, node.id)))?;

            if previous.parent != node.parent {
                if let Some(old) = previous.parent {
                    children
                        .remove((code, old.0, node.id.0))
                        .map_err(storage_err)?;
                }
                if let Some(new) = node.parent {
                    children
                        .insert((code, new.0, node.id.0), ())
                        .map_err(storage_err)?;
                }
            }
            nodes
                .insert((code, node.id.0), encode(node)?.as_slice())
                .map_err(storage_err)?;
            Ok(())
        })
    }

    fn remove_node(&mut self, kind: TreeKind, id: NodeId) -> Result<(), CatalogError> {
        self.write(|txn| {
            let mut nodes = txn.open_table(NODES).map_err(storage_err)?;
            let mut children = txn.open_table(NODE_CHILDREN).map_err(storage_err)?;
            let code = kind.code();

            let node: TreeNode = nodes
                .get((code, id.0))
                .map_err(storage_err)?
                .map(|v| decode(v.value()))
                .transpose()?
                .ok_or_else(|| CatalogError::NotFound(format!("{} {}", kind, id)))?;
            let Some(parent) = node.parent else {
                return Err(CatalogError::InvalidOperation(format!(
                    "the root {} cannot be deleted",
                    kind
                )));
            };

            // Child nodes move up one level.
            let mut child_ids = Vec::new();
            for entry in children
                .range((code, id.0, 0)..=(code, id.0, u64::MAX))
                .map_err(storage_err)?
            {
                let (row, _) = entry.map_err(storage_err)?;
                child_ids.push(row.value().2);
            }
            for child_id in child_ids {
                let child: Option<TreeNode> = nodes
                    .get((code, child_id))
                    .map_err(storage_err)?
                    .map(|v| decode(v.value()))
                    .transpose()?;
                if let Some(mut child) = child {
                    child.parent = Some(parent);
                    nodes
                        .insert((code, child_id), encode(&child)?.as_slice())
                        .map_err(storage_err)?;
                }
                children
                    .remove((code, id.0, child_id))
                    .map_err(storage_err)?;
                children
                    .insert((code, parent.0, child_id), ())
                    .map_err(storage_err)?;
            }

            // Owned records move up too.
            match kind {
                TreeKind::Category | TreeKind::Template => {
                    let mut items = txn.open_table(ITEMS).map_err(storage_err)?;
                    let mut owners = txn.open_table(ITEM_OWNERS).map_err(storage_err)?;
                    let mut owned_ids = Vec::new();
                    for entry in owners
                        .range((code, id.0, 0)..=(code, id.0, u64::MAX))
                        .map_err(storage_err)?
                    {
                        let (row, _) = entry.map_err(storage_err)?;
                        owned_ids.push(row.value().2);
                    }
                    for item_id in owned_ids {
                        let item: Option<Item> = items
                            .get(item_id)
                            .map_err(storage_err)?
                            .map(|v| decode(v.value()))
                            .transpose()?;
                        if let Some(mut item) = item {
                            match kind {
                                TreeKind::Category => item.category = parent,
                                _ => item.template = parent,
                            }
                            items
                                .insert(item_id, encode(&item)?.as_slice())
                                .map_err(storage_err)?;
                        }
                        owners.remove((code, id.0, item_id)).map_err(storage_err)?;
                        owners
                            .insert((code, parent.0, item_id), ())
                            .map_err(storage_err)?;
                    }
                    if kind == TreeKind::Template {
                        let mut templates = txn.open_table(TEMPLATES).map_err(storage_err)?;
                        templates.remove(id.0).map_err(storage_err)?;
                    }
                }
                TreeKind::Container => {
                    let mut locations = txn.open_table(LOCATIONS).map_err(storage_err)?;
                    let mut location_index =
                        txn.open_table(LOCATION_INDEX).map_err(storage_err)?;
                    let mut held = Vec::new();
                    for entry in locations
                        .range((id.0, 0)..=(id.0, u64::MAX))
                        .map_err(storage_err)?
                    {
                        let (row, amount) = entry.map_err(storage_err)?;
                        held.push((row.value().1, amount.value()));
                    }
                    for (item, amount) in held {
                        locations.remove((id.0, item)).map_err(storage_err)?;
                        location_index.remove((item, id.0)).map_err(storage_err)?;
                        let existing = locations
                            .get((parent.0, item))
                            .map_err(storage_err)?
                            .map(|v| v.value())
                            .unwrap_or(0);
                        locations
                            .insert((parent.0, item), existing.saturating_add(amount))
                            .map_err(storage_err)?;
                        location_index
                            .insert((item, parent.0), ())
                            .map_err(storage_err)?;
                    }
                }
            }

            children
                .remove((code, parent.0, id.0))
                .map_err(storage_err)?;
            nodes.remove((code, id.0)).map_err(storage_err)?;
            Ok(())
        })
    }

    fn node_count(&self, kind: TreeKind) -> Result<usize, CatalogError> {
        self.read(|txn| {
            let nodes = txn.open_table(NODES).map_err(storage_err)?;
            let code = kind.code();
            let mut count = 0usize;
            for entry in nodes
                .range((code, 0)..=(code, u64::MAX))
                .map_err(storage_err)?
            {
                entry.map_err(storage_err)?;
                count = count.saturating_add(1);
            }
            Ok(count)
        })
    }

    fn template_spec(&self, id: NodeId) -> Result<TemplateSpec, CatalogError> {
        self.read(|txn| {
            if Self::read_node(txn, TreeKind::Template, id)?.is_none() {
                return Err(CatalogError::NotFound(format!("template {}", id)));
            }
            let templates = txn.open_table(TEMPLATES).map_err(storage_err)?;
            Ok(templates
                .get(id.0)
                .map_err(storage_err)?
                .map(|v| decode(v.value()))
                .transpose()?
                .unwrap_or_default())
        })
    }

    fn put_template_spec(&mut self, id: NodeId, spec: &TemplateSpec) -> Result<(), CatalogError> {
        self.write(|txn| {
            let nodes = txn.open_table(NODES).map_err(storage_err)?;
            if nodes
                .get((TreeKind::Template.code(), id.0))
                .map_err(storage_err)?
                .is_none()
            {
                return Err(CatalogError::NotFound(format!("template {}", id)));
            }
            let mut templates = txn.open_table(TEMPLATES).map_err(storage_err)?;
            templates
                .insert(id.0, encode(spec)?.as_slice())
                .map_err(storage_err)?;
            Ok(())
        })
    }

    // -------------------------------------------------------------------------
    // Items and locations
    // -------------------------------------------------------------------------

    fn insert_item(&mut self, category: NodeId, template: NodeId) -> Result<Item, CatalogError> {
        self.write(|txn| {
            let nodes = txn.open_table(NODES).map_err(storage_err)?;
            for (kind, id) in [(TreeKind::Category, category), (TreeKind::Template, template)] {
                if nodes.get((kind.code(), id.0)).map_err(storage_err)?.is_none() {
                    return Err(CatalogError::NotFound(format!("{} {}", kind, id)));
                }
            }

            let mut items = txn.open_table(ITEMS).map_err(storage_err)?;
            let mut meta = txn.open_table(METADATA).map_err(storage_err)?;
            let item = Item {
                id: ItemId(next_id(&mut meta, NEXT_ITEM_ID)?),
                category,
                template,
            };
            items
                .insert(item.id.0, encode(&item)?.as_slice())
                .map_err(storage_err)?;
            let mut owners = txn.open_table(ITEM_OWNERS).map_err(storage_err)?;
            for (code, owner) in owner_keys(&item) {
                owners.insert((code, owner, item.id.0), ()).map_err(storage_err)?;
            }
            Ok(item)
        })
    }

    fn item(&self, id: ItemId) -> Result<Option<Item>, CatalogError> {
        self.read(|txn| {
            let items = txn.open_table(ITEMS).map_err(storage_err)?;
            items
                .get(id.0)
                .map_err(storage_err)?
                .map(|v| decode(v.value()))
                .transpose()
        })
    }

    fn items(&self) -> Result<Vec<Item>, CatalogError> {
        self.read(|txn| {
            let items = txn.open_table(ITEMS).map_err(storage_err)?;
            let mut out = Vec::new();
            for entry in items.iter().map_err(storage_err)? {
                let (_, bytes) = entry.map_err(storage_err)?;
                out.push(decode(bytes.value())?);
            }
            Ok(out)
        })
    }

    fn items_in(&self, ids: &BTreeSet<ItemId>) -> Result<Vec<Item>, CatalogError> {
        self.read(|txn| {
            let items = txn.open_table(ITEMS).map_err(storage_err)?;
            let mut out = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(bytes) = items.get(id.0).map_err(storage_err)? {
                    out.push(decode(bytes.value())?);
                }
            }
            Ok(out)
        })
    }

    fn update_item(&mut self, item: &Item) -> Result<(), CatalogError> {
        self.write(|txn| {
            let nodes = txn.open_table(NODES).map_err(storage_err)?;
            for (kind, id) in [
                (TreeKind::Category, item.category),
                (TreeKind::Template, item.template),
            ] {
                if nodes.get((kind.code(), id.0)).map_err(storage_err)?.is_none() {
                    return Err(CatalogError::NotFound(format!("{} {}", kind, id)));
                }
            }

            let mut items = txn.open_table(ITEMS).map_err(storage_err)?;
            let previous: Item = match items.get(item.id.0).map_err(storage_err)? {
                Some(bytes) => decode(bytes.value())?,
                None => return Err(CatalogError::NotFound(format!("item {}", item.id))),
            };
            items
                .insert(item.id.0, encode(item)?.as_slice())
                .map_err(storage_err)?;

            let mut owners = txn.open_table(ITEM_OWNERS).map_err(storage_err)?;
            for (code, owner) in owner_keys(&previous) {
                owners.remove((code, owner, item.id.0)).map_err(storage_err)?;
            }
            for (code, owner) in owner_keys(item) {
                owners.insert((code, owner, item.id.0), ()).map_err(storage_err)?;
            }
            Ok(())
        })
    }

    fn remove_item(&mut self, id: ItemId) -> Result<bool, CatalogError> {
        self.write(|txn| {
            let mut items = txn.open_table(ITEMS).map_err(storage_err)?;
            let removed: Item = match items.remove(id.0).map_err(storage_err)? {
                Some(bytes) => decode(bytes.value())?,
                None => return Ok(false),
            };
            let mut owners = txn.open_table(ITEM_OWNERS).map_err(storage_err)?;
            for (code, owner) in owner_keys(&removed) {
                owners.remove((code, owner, id.0)).map_err(storage_err)?;
            }

            let mut attributes = txn.open_table(ATTRIBUTES).map_err(storage_err)?;
            let mut index = txn.open_table(ATTRIBUTE_INDEX).map_err(storage_err)?;
            let mut owned = Vec::new();
            for entry in attributes
                .range((id.0, 0)..=(id.0, u64::MAX))
                .map_err(storage_err)?
            {
                let (key, value) = entry.map_err(storage_err)?;
                owned.push((key.value().1, value.value().0));
            }
            for (key, code) in owned {
                attributes.remove((id.0, key)).map_err(storage_err)?;
                index.remove((key, code, id.0)).map_err(storage_err)?;
            }

            let mut locations = txn.open_table(LOCATIONS).map_err(storage_err)?;
            let mut location_index = txn.open_table(LOCATION_INDEX).map_err(storage_err)?;
            let mut containers = Vec::new();
            for entry in location_index
                .range((id.0, 0)..=(id.0, u64::MAX))
                .map_err(storage_err)?
            {
                let (row, _) = entry.map_err(storage_err)?;
                containers.push(row.value().1);
            }
            for container in containers {
                locations.remove((container, id.0)).map_err(storage_err)?;
                location_index
                    .remove((id.0, container))
                    .map_err(storage_err)?;
            }
            Ok(true)
        })
    }

    fn item_count(&self) -> Result<usize, CatalogError> {
        self.read(|txn| {
            let items = txn.open_table(ITEMS).map_err(storage_err)?;
            Ok(items.len().map_err(storage_err)? as usize)
        })
    }

    fn put_location(&mut self, location: &ItemLocation) -> Result<(), CatalogError> {
        self.write(|txn| {
            let nodes = txn.open_table(NODES).map_err(storage_err)?;
            if nodes
                .get((TreeKind::Container.code(), location.container.0))
                .map_err(storage_err)?
                .is_none()
            {
                return Err(CatalogError::NotFound(format!(
                    "container {}",
                    location.container
                )));
            }
            let items = txn.open_table(ITEMS).map_err(storage_err)?;
            if items.get(location.item.0).map_err(storage_err)?.is_none() {
                return Err(CatalogError::NotFound(format!("item {}", location.item)));
            }

            let mut locations = txn.open_table(LOCATIONS).map_err(storage_err)?;
            let mut location_index = txn.open_table(LOCATION_INDEX).map_err(storage_err)?;
            locations
                .insert((location.container.0, location.item.0), location.amount)
                .map_err(storage_err)?;
            location_index
                .insert((location.item.0, location.container.0), ())
                .map_err(storage_err)?;
            Ok(())
        })
    }

    fn remove_location(&mut self, container: NodeId, item: ItemId) -> Result<bool, CatalogError> {
        self.write(|txn| {
            let mut locations = txn.open_table(LOCATIONS).map_err(storage_err)?;
            let mut location_index = txn.open_table(LOCATION_INDEX).map_err(storage_err)?;
            let existed = locations
                .remove((container.0, item.0))
                .map_err(storage_err)?
                .is_some();
            location_index
                .remove((item.0, container.0))
                .map_err(storage_err)?;
            Ok(existed)
        })
    }

    fn locations_in(&self, container: NodeId) -> Result<Vec<ItemLocation>, CatalogError> {
        self.read(|txn| {
            let locations = txn.open_table(LOCATIONS).map_err(storage_err)?;
            let mut out = Vec::new();
            for entry in locations
                .range((container.0, 0)..=(container.0, u64::MAX))
                .map_err(storage_err)?
            {
                let (row, amount) = entry.map_err(storage_err)?;
                out.push(ItemLocation {
                    container,
                    item: ItemId(row.value().1),
                    amount: amount.value(),
                });
            }
            Ok(out)
        })
    }

    fn locations_of(&self, item: ItemId) -> Result<Vec<ItemLocation>, CatalogError> {
        self.read(|txn| {
            let locations = txn.open_table(LOCATIONS).map_err(storage_err)?;
            let location_index = txn.open_table(LOCATION_INDEX).map_err(storage_err)?;
            let mut out = Vec::new();
            for entry in location_index
                .range((item.0, 0)..=(item.0, u64::MAX))
                .map_err(storage_err)?
            {
                let (row, _) = entry.map_err(storage_err)?;
                let container = row.value().1;
                if let Some(amount) = locations.get((container, item.0)).map_err(storage_err)? {
                    out.push(ItemLocation {
                        container: NodeId(container),
                        item,
                        amount: amount.value(),
                    });
                }
            }
            Ok(out)
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open() -> (tempfile::TempDir, RedbStore) {
        let dir = tempdir().expect("tempdir");
        let store = RedbStore::open(dir.path().join("catalog.redb")).expect("open");
        (dir, store)
    }

    #[test]
    fn open_creates_roots() {
        let (_dir, store) = open();
        for kind in TreeKind::ALL {
            let root = store.node(kind, ROOT_NODE).expect("read").expect("root");
            assert!(root.is_root());
        }
    }

    #[test]
    fn reopen_keeps_data() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("catalog.redb");
        let unit = Scalar::unit(4.7, "kOhm").expect("finite");
        let id = {
            let mut store = RedbStore::open(&path).expect("open");
            let node = store
                .insert_node(TreeKind::Category, "resistors", ROOT_NODE)
                .expect("node");
            assert_eq!(node.id, NodeId(1));
            store
                .insert_values(&BTreeSet::from([unit.clone()]))
                .expect("insert")[&unit]
        };

        let store = RedbStore::open(&path).expect("reopen");
        let node = store
            .node(TreeKind::Category, NodeId(1))
            .expect("read")
            .expect("node");
        assert_eq!(node.name, "resistors");
        let found = store
            .find_values(&BTreeSet::from([unit.clone()]))
            .expect("find");
        assert_eq!(found[&unit], id);
        let resolved = store
            .values(ScalarKind::Unit, &BTreeSet::from([id]))
            .expect("values");
        assert_eq!(resolved[&id], unit);
    }

    #[test]
    fn insert_values_conflict_writes_nothing() {
        let (_dir, mut store) = open();
        let red = Scalar::string("red");
        store
            .insert_values(&BTreeSet::from([red.clone()]))
            .expect("insert");
        let result = store.insert_values(&BTreeSet::from([red, Scalar::string("blue")]));
        assert!(matches!(result, Err(CatalogError::Conflict(_))));
        assert_eq!(store.value_count(ScalarKind::String).expect("count"), 1);
    }

    #[test]
    fn attribute_kind_change_updates_index() {
        let (_dir, mut store) = open();
        let item = store.insert_item(ROOT_NODE, ROOT_NODE).expect("item");
        let key = store
            .insert_keys(&BTreeSet::from(["color".to_string()]))
            .expect("keys")["color"];
        let red = Scalar::string("red");
        let seven = Scalar::number(7.0).expect("finite");
        let ids = store
            .insert_values(&BTreeSet::from([red.clone(), seven.clone()]))
            .expect("values");

        store
            .put_attributes(
                item.id,
                &[(
                    key,
                    AttributeRef {
                        kind: ScalarKind::String,
                        value: ids[&red],
                    },
                )],
            )
            .expect("put");
        store
            .put_attributes(
                item.id,
                &[(
                    key,
                    AttributeRef {
                        kind: ScalarKind::Number,
                        value: ids[&seven],
                    },
                )],
            )
            .expect("put");

        assert!(
            store
                .attributes_with_key(ScalarKind::String, key)
                .expect("lookup")
                .is_empty()
        );
        assert_eq!(
            store
                .attributes_with_key(ScalarKind::Number, key)
                .expect("lookup"),
            vec![(item.id, seven)]
        );
    }

    #[test]
    fn remove_category_moves_children_and_items() {
        let (_dir, mut store) = open();
        let parts = store
            .insert_node(TreeKind::Category, "parts", ROOT_NODE)
            .expect("parts");
        let passive = store
            .insert_node(TreeKind::Category, "passive", parts.id)
            .expect("passive");
        let item = store.insert_item(parts.id, ROOT_NODE).expect("item");

        store
            .remove_node(TreeKind::Category, parts.id)
            .expect("remove");

        let moved = store
            .node(TreeKind::Category, passive.id)
            .expect("read")
            .expect("node");
        assert_eq!(moved.parent, Some(ROOT_NODE));
        assert_eq!(
            store.item(item.id).expect("read").expect("item").category,
            ROOT_NODE
        );
        let roots = store
            .children_of(TreeKind::Category, &BTreeSet::from([ROOT_NODE]))
            .expect("children");
        assert_eq!(roots, vec![moved]);
    }

    #[test]
    fn remove_template_moves_items_through_owner_index() {
        let (_dir, mut store) = open();
        let passive = store
            .insert_node(TreeKind::Template, "passive", ROOT_NODE)
            .expect("passive");
        let resistor = store
            .insert_node(TreeKind::Template, "resistor", passive.id)
            .expect("resistor");
        let owned = store.insert_item(ROOT_NODE, resistor.id).expect("owned");
        let other = store.insert_item(ROOT_NODE, passive.id).expect("other");

        store
            .remove_node(TreeKind::Template, resistor.id)
            .expect("remove resistor");
        assert_eq!(
            store.item(owned.id).expect("read").expect("item").template,
            passive.id
        );

        // The moved item is indexed under its new owner.
        store
            .remove_node(TreeKind::Template, passive.id)
            .expect("remove passive");
        for id in [owned.id, other.id] {
            assert_eq!(
                store.item(id).expect("read").expect("item").template,
                ROOT_NODE
            );
        }
    }

    #[test]
    fn owner_index_follows_moves_and_removals() {
        let (_dir, mut store) = open();
        let tools = store
            .insert_node(TreeKind::Category, "tools", ROOT_NODE)
            .expect("tools");
        let parts = store
            .insert_node(TreeKind::Category, "parts", ROOT_NODE)
            .expect("parts");
        let mut item = store.insert_item(tools.id, ROOT_NODE).expect("item");
        let gone = store.insert_item(tools.id, ROOT_NODE).expect("gone");

        item.category = parts.id;
        store.update_item(&item).expect("move");
        assert!(store.remove_item(gone.id).expect("remove item"));

        // Nothing is owned by tools any more; parts still owns the item.
        store
            .remove_node(TreeKind::Category, tools.id)
            .expect("remove tools");
        assert_eq!(store.item(gone.id).expect("read"), None);
        assert_eq!(
            store.item(item.id).expect("read").expect("item").category,
            parts.id
        );
        store
            .remove_node(TreeKind::Category, parts.id)
            .expect("remove parts");
        assert_eq!(
            store.item(item.id).expect("read").expect("item").category,
            ROOT_NODE
        );
    }

    #[test]
    fn reopen_rebuilds_missing_owner_index() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("catalog.redb");
        let (parts, item) = {
            let mut store = RedbStore::open(&path).expect("open");
            let parts = store
                .insert_node(TreeKind::Category, "parts", ROOT_NODE)
                .expect("parts");
            let item = store.insert_item(parts.id, ROOT_NODE).expect("item");
            store
                .write(|txn| {
                    txn.delete_table(ITEM_OWNERS).map_err(storage_err)?;
                    Ok(())
                })
                .expect("drop index");
            (parts, item)
        };

        let mut store = RedbStore::open(&path).expect("reopen");
        store
            .remove_node(TreeKind::Category, parts.id)
            .expect("remove");
        assert_eq!(
            store.item(item.id).expect("read").expect("item").category,
            ROOT_NODE
        );
    }
}
