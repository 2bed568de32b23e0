//! # Attribute Dict
//!
//! The typed key-value capability of any record that owns attributes.
//!
//! A record starts `Unloaded`. Reads require an explicit [`Dict::load`] (or a
//! batched [`populate_many`]); afterwards they are served from the cached
//! snapshot, which every mutation through the trait keeps in sync.

use crate::store::{AttributeRef, CatalogStore, KeyCounts};
use crate::values::ValueStore;
use crate::{CatalogError, ItemId, KeyId, Scalar, ScalarKind};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// ATTRIBUTE STATE
// =============================================================================

/// Cached attributes of a record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AttributeState {
    /// Nothing fetched yet.
    #[default]
    Unloaded,
    /// Snapshot of every attribute the record owns.
    Loaded(BTreeMap<String, Scalar>),
}

impl AttributeState {
    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }
}

// =============================================================================
// DICT TRAIT
// =============================================================================

/// Dynamic typed attributes on a record.
///
/// Implementors only provide identity and cache access; every operation is
/// a provided method.
pub trait Dict {
    /// Id of the owning record.
    fn owner(&self) -> ItemId;

    fn state(&self) -> &AttributeState;

    fn state_mut(&mut self) -> &mut AttributeState;

    fn is_loaded(&self) -> bool {
        self.state().is_loaded()
    }

    /// Fetch the attribute snapshot unless it is already cached.
    fn load<S: CatalogStore + ?Sized>(&mut self, store: &S) -> Result<(), CatalogError> {
        if self.is_loaded() {
            return Ok(());
        }
        self.reload(store)
    }

    /// Fetch the attribute snapshot, replacing any cached one.
    fn reload<S: CatalogStore + ?Sized>(&mut self, store: &S) -> Result<(), CatalogError> {
        let owner = self.owner();
        let mut fetched = fetch_attributes(store, &BTreeSet::from([owner]))?;
        *self.state_mut() = AttributeState::Loaded(fetched.remove(&owner).unwrap_or_default());
        Ok(())
    }

    /// Drop the cached snapshot.
    fn invalidate(&mut self) {
        *self.state_mut() = AttributeState::Unloaded;
    }

    /// The cached snapshot.
    fn attributes(&self) -> Result<&BTreeMap<String, Scalar>, CatalogError> {
        match self.state() {
            AttributeState::Loaded(map) => Ok(map),
            AttributeState::Unloaded => Err(CatalogError::NotLoaded(self.owner())),
        }
    }

    fn get(&self, key: &str) -> Result<&Scalar, CatalogError> {
        self.attributes()?
            .get(key)
            .ok_or_else(|| CatalogError::KeyNotFound(key.to_string()))
    }

    fn contains_key(&self, key: &str) -> Result<bool, CatalogError> {
        Ok(self.attributes()?.contains_key(key))
    }

    fn keys(&self) -> Result<impl Iterator<Item = &String>, CatalogError> {
        Ok(self.attributes()?.keys())
    }

    fn values(&self) -> Result<impl Iterator<Item = &Scalar>, CatalogError> {
        Ok(self.attributes()?.values())
    }

    fn items(&self) -> Result<impl Iterator<Item = (&String, &Scalar)>, CatalogError> {
        Ok(self.attributes()?.iter())
    }

    fn len(&self) -> Result<usize, CatalogError> {
        Ok(self.attributes()?.len())
    }

    fn is_empty(&self) -> Result<bool, CatalogError> {
        Ok(self.attributes()?.is_empty())
    }

    /// Upsert the attribute `key`. A value of another kind replaces the old
    /// pair row.
    fn set<S: CatalogStore + ?Sized>(
        &mut self,
        store: &mut S,
        key: &str,
        value: Scalar,
    ) -> Result<(), CatalogError> {
        ValueStore::validate_key(key)?;
        let key_id = ValueStore::get_or_create_key(store, key)?;
        let value_id = ValueStore::get_or_create(store, &value)?;
        store.put_attributes(
            self.owner(),
            &[(
                key_id,
                AttributeRef {
                    kind: value.kind(),
                    value: value_id,
                },
            )],
        )?;

        if let AttributeState::Loaded(map) = self.state_mut() {
            map.insert(key.to_string(), value);
        }
        Ok(())
    }

    /// Remove the attribute `key`. Fails with `KeyNotFound` if absent.
    fn delete<S: CatalogStore + ?Sized>(
        &mut self,
        store: &mut S,
        key: &str,
    ) -> Result<(), CatalogError> {
        let missing = || CatalogError::KeyNotFound(key.to_string());
        let key_id = ValueStore::find_key(store, key)?.ok_or_else(missing)?;
        if !store.remove_attribute(self.owner(), key_id)? {
            return Err(missing());
        }

        if let AttributeState::Loaded(map) = self.state_mut() {
            map.remove(key);
        }
        Ok(())
    }

    /// Upsert many attributes at once.
    ///
    /// Keys are resolved with one bulk find-or-create, values with one per
    /// kind, and every pair row is written in a single store call. Keys not
    /// named in `values` are left untouched.
    fn bulk_set<S: CatalogStore + ?Sized>(
        &mut self,
        store: &mut S,
        values: BTreeMap<String, Scalar>,
    ) -> Result<(), CatalogError> {
        if values.is_empty() {
            return Ok(());
        }

        let keys: BTreeSet<String> = values.keys().cloned().collect();
        let key_ids = ValueStore::bulk_get_or_create_keys(store, &keys)?;
        let value_ids = ValueStore::bulk_get_or_create(store, values.values())?;

        let pairs = values
            .iter()
            .map(|(key, value)| {
                let key_id: KeyId = *key_ids
                    .get(key)
                    .ok_or_else(|| CatalogError::Storage(format!("key {:?} unresolved", key)))?;
                let value_id = *value_ids.get(value).ok_or_else(|| {
                    CatalogError::Storage(format!("{} value {} unresolved", value.kind(), value))
                })?;
                Ok((
                    key_id,
                    AttributeRef {
                        kind: value.kind(),
                        value: value_id,
                    },
                ))
            })
            .collect::<Result<Vec<_>, CatalogError>>()?;
        store.put_attributes(self.owner(), &pairs)?;

        if let AttributeState::Loaded(map) = self.state_mut() {
            map.extend(values);
        }
        Ok(())
    }

    /// Remove every attribute of the record.
    fn clear<S: CatalogStore + ?Sized>(&mut self, store: &mut S) -> Result<(), CatalogError> {
        store.clear_attributes(self.owner())?;
        if let AttributeState::Loaded(map) = self.state_mut() {
            map.clear();
        }
        Ok(())
    }
}

// =============================================================================
// BATCHED POPULATION
// =============================================================================

/// Attributes of every owner, with one `attributes_of` call per kind.
fn fetch_attributes<S: CatalogStore + ?Sized>(
    store: &S,
    owners: &BTreeSet<ItemId>,
) -> Result<BTreeMap<ItemId, BTreeMap<String, Scalar>>, CatalogError> {
    let mut out: BTreeMap<ItemId, BTreeMap<String, Scalar>> = owners
        .iter()
        .map(|owner| (*owner, BTreeMap::new()))
        .collect();
    if owners.is_empty() {
        return Ok(out);
    }

    for kind in ScalarKind::ALL {
        for row in store.attributes_of(kind, owners)? {
            out.entry(row.owner).or_default().insert(row.key, row.value);
        }
    }
    Ok(out)
}

/// Load every unloaded record in `records` with one query per scalar kind.
pub fn populate_many<S, R>(store: &S, records: &mut [R]) -> Result<(), CatalogError>
where
    S: CatalogStore + ?Sized,
    R: Dict,
{
    let owners: BTreeSet<ItemId> = records
        .iter()
        .filter(|r| !r.is_loaded())
        .map(|r| r.owner())
        .collect();
    let fetched = fetch_attributes(store, &owners)?;

    for record in records.iter_mut().filter(|r| !r.is_loaded()) {
        // The same owner may appear twice in `records`.
        let attributes = fetched.get(&record.owner()).cloned().unwrap_or_default();
        *record.state_mut() = AttributeState::Loaded(attributes);
    }
    Ok(())
}

// =============================================================================
// KEY USAGE
// =============================================================================

/// How often one attribute key is used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyUsage {
    pub key: String,
    /// Attributes using the key, per value kind.
    pub counts: KeyCounts,
    pub total: usize,
}

/// Every attribute key used at least `at_least` times, least used first.
pub fn key_usage<S: CatalogStore + ?Sized>(
    store: &S,
    at_least: usize,
) -> Result<Vec<KeyUsage>, CatalogError> {
    let mut usage: Vec<KeyUsage> = store
        .key_usage()?
        .into_iter()
        .map(|(key, counts)| {
            let total = counts.values().fold(0usize, |acc, n| acc.saturating_add(*n));
            KeyUsage { key, counts, total }
        })
        .filter(|usage| usage.total >= at_least)
        .collect();
    usage.sort_by(|a, b| a.total.cmp(&b.total).then_with(|| a.key.cmp(&b.key)));
    Ok(usage)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::ROOT_NODE;
    use crate::store::MemoryStore;

    struct Record {
        id: ItemId,
        state: AttributeState,
    }

    impl Dict for Record {
        fn owner(&self) -> ItemId {
            self.id
        }
        fn state(&self) -> &AttributeState {
            &self.state
        }
        fn state_mut(&mut self) -> &mut AttributeState {
            &mut self.state
        }
    }

    fn record(store: &mut MemoryStore) -> Record {
        let item = store.insert_item(ROOT_NODE, ROOT_NODE).expect("item");
        Record {
            id: item.id,
            state: AttributeState::Unloaded,
        }
    }

    fn num(v: f64) -> Scalar {
        Scalar::number(v).expect("finite")
    }

    #[test]
    fn reads_require_load() {
        let mut store = MemoryStore::new();
        let mut r = record(&mut store);
        assert!(matches!(r.get("x"), Err(CatalogError::NotLoaded(_))));
        r.load(&store).expect("load");
        assert!(matches!(r.get("x"), Err(CatalogError::KeyNotFound(_))));
    }

    #[test]
    fn set_get_delete() {
        let mut store = MemoryStore::new();
        let mut r = record(&mut store);
        r.load(&store).expect("load");

        r.set(&mut store, "resistance", num(220.0)).expect("set");
        assert_eq!(r.get("resistance").expect("get"), &num(220.0));

        r.delete(&mut store, "resistance").expect("delete");
        assert!(matches!(
            r.get("resistance"),
            Err(CatalogError::KeyNotFound(_))
        ));
        assert!(matches!(
            r.delete(&mut store, "resistance"),
            Err(CatalogError::KeyNotFound(_))
        ));
    }

    #[test]
    fn set_overwrites_and_persists() {
        let mut store = MemoryStore::new();
        let mut r = record(&mut store);
        r.set(&mut store, "color", Scalar::string("red")).expect("set");
        r.set(&mut store, "color", num(3.0)).expect("set");

        r.load(&store).expect("load");
        assert_eq!(r.len().expect("len"), 1);
        assert_eq!(r.get("color").expect("get"), &num(3.0));
    }

    #[test]
    fn bulk_set_merges() {
        let mut store = MemoryStore::new();
        let mut r = record(&mut store);
        r.set(&mut store, "keep", Scalar::string("me")).expect("set");

        let values = BTreeMap::from([
            ("a".to_string(), num(1.0)),
            ("b".to_string(), Scalar::string("two")),
        ]);
        r.bulk_set(&mut store, values).expect("bulk");

        r.reload(&store).expect("reload");
        let items: Vec<(&String, &Scalar)> = r.items().expect("items").collect();
        assert_eq!(items.len(), 3);
        assert_eq!(r.get("a").expect("a"), &num(1.0));
        assert_eq!(r.get("keep").expect("keep"), &Scalar::string("me"));
    }

    #[test]
    fn clear_removes_everything() {
        let mut store = MemoryStore::new();
        let mut r = record(&mut store);
        r.load(&store).expect("load");
        r.set(&mut store, "a", num(1.0)).expect("set");
        r.clear(&mut store).expect("clear");
        assert!(r.is_empty().expect("empty"));
        r.reload(&store).expect("reload");
        assert!(r.is_empty().expect("empty"));
    }

    #[test]
    fn populate_many_fills_every_record() {
        let mut store = MemoryStore::new();
        let mut a = record(&mut store);
        let mut b = record(&mut store);
        a.set(&mut store, "x", num(1.0)).expect("set");
        b.set(&mut store, "x", Scalar::unit(2.0, "V").expect("finite"))
            .expect("set");
        b.set(&mut store, "y", Scalar::string("z")).expect("set");

        let mut records = vec![a, b];
        populate_many(&store, &mut records).expect("populate");
        assert_eq!(records[0].len().expect("len"), 1);
        assert_eq!(records[1].len().expect("len"), 2);
    }

    #[test]
    fn key_usage_counts_per_kind() {
        let mut store = MemoryStore::new();
        let mut a = record(&mut store);
        let mut b = record(&mut store);
        a.set(&mut store, "x", num(1.0)).expect("set");
        b.set(&mut store, "x", Scalar::string("one")).expect("set");
        b.set(&mut store, "y", num(1.0)).expect("set");
        b.delete(&mut store, "y").expect("delete");

        let used = key_usage(&store, 1).expect("usage");
        assert_eq!(used.len(), 1);
        assert_eq!(used[0].key, "x");
        assert_eq!(used[0].total, 2);
        assert_eq!(used[0].counts[&ScalarKind::Number], 1);

        // Unused keys show up with a threshold of zero.
        let all = key_usage(&store, 0).expect("usage");
        assert_eq!(all[0].key, "y");
        assert_eq!(all[0].total, 0);
    }
}
