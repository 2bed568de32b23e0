//! # Scalar Value Store
//!
//! Conversion of wire text into scalars, deduplicated find-or-create of
//! value and key rows, and reverse lookup of owners by value.
//!
//! - Value equality implies row identity, per scalar kind
//! - Inserts that lose a uniqueness race are retried by re-reading
//! - Lookups never convert between unit labels

use crate::primitives::{MAX_INSERT_RETRIES, MAX_STRING_LENGTH};
use crate::store::CatalogStore;
use crate::{CatalogError, Comparator, ItemId, KeyId, Number, Scalar, ScalarKind, ValueId};
use std::collections::{BTreeMap, BTreeSet};

/// The ValueStore resolves scalars and attribute keys to their shared rows.
pub struct ValueStore;

impl ValueStore {
    // =========================================================================
    // CONVERSION
    // =========================================================================

    /// Convert wire text into a scalar of `kind`.
    ///
    /// - `number`: a float parse of the trimmed text; non-finite is rejected
    /// - `unit`: `<signed decimal, optional exponent><optional whitespace><label>`
    /// - `string`: identity, at most `MAX_STRING_LENGTH` characters
    /// - `file`: never convertible from plain text
    pub fn convert(kind: ScalarKind, input: &str) -> Result<Scalar, CatalogError> {
        let fail = || CatalogError::Conversion {
            kind,
            input: input.to_string(),
        };

        match kind {
            ScalarKind::String => {
                if input.chars().count() > MAX_STRING_LENGTH {
                    return Err(fail());
                }
                Ok(Scalar::Str(input.to_string()))
            }
            ScalarKind::Number => Self::parse_number(input.trim())
                .map(Scalar::Num)
                .ok_or_else(fail),
            ScalarKind::Unit => {
                let (number, label) = Self::split_unit(input.trim()).ok_or_else(fail)?;
                let number = Self::parse_number(number).ok_or_else(fail)?;
                if label.chars().count() > MAX_STRING_LENGTH {
                    return Err(fail());
                }
                Ok(Scalar::Unit(number, label.to_string()))
            }
            ScalarKind::File => Err(fail()),
        }
    }

    fn parse_number(text: &str) -> Option<Number> {
        text.parse::<f64>().ok().and_then(Number::new)
    }

    /// Split `4.7 kOhm` into `("4.7", "kOhm")`.
    ///
    /// The numeric prefix is an optional sign, digits with at most one
    /// decimal point (at least one digit), and an exponent only when digits
    /// follow the `e`. The label is whatever remains after whitespace and must
    /// be non-empty.
    fn split_unit(text: &str) -> Option<(&str, &str)> {
        let bytes = text.as_bytes();
        let mut end = 0;

        if matches!(bytes.first(), Some(b'+' | b'-')) {
            end += 1;
        }

        let mut digits = 0;
        let mut seen_point = false;
        while let Some(&b) = bytes.get(end) {
            if b.is_ascii_digit() {
                digits += 1;
            } else if b == b'.' && !seen_point {
                seen_point = true;
            } else {
                break;
            }
            end += 1;
        }
        if digits == 0 {
            return None;
        }

        if matches!(bytes.get(end), Some(b'e' | b'E')) {
            let mut exp_end = end + 1;
            if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
                exp_end += 1;
            }
            let exp_digits = bytes[exp_end..]
                .iter()
                .take_while(|b| b.is_ascii_digit())
                .count();
            if exp_digits > 0 {
                end = exp_end + exp_digits;
            }
        }

        let (number, rest) = text.split_at(end);
        let label = rest.trim();
        if label.is_empty() {
            return None;
        }
        Some((number, label))
    }

    /// Reject scalars that cannot be stored.
    pub fn validate(value: &Scalar) -> Result<(), CatalogError> {
        match value {
            Scalar::Str(s) if s.chars().count() > MAX_STRING_LENGTH => Err(
                CatalogError::InvalidArgument(format!(
                    "string values are limited to {} characters",
                    MAX_STRING_LENGTH
                )),
            ),
            Scalar::Unit(_, label)
                if label.trim().is_empty() || label.chars().count() > MAX_STRING_LENGTH =>
            {
                Err(CatalogError::InvalidArgument(format!(
                    "unit labels must be 1..={} characters",
                    MAX_STRING_LENGTH
                )))
            }
            Scalar::File(path) if path.is_empty() => Err(CatalogError::InvalidArgument(
                "file values need a storage path".to_string(),
            )),
            _ => Ok(()),
        }
    }

    // =========================================================================
    // FIND-OR-CREATE
    // =========================================================================

    /// Row id of `value`, created if absent.
    pub fn get_or_create<S: CatalogStore + ?Sized>(
        store: &mut S,
        value: &Scalar,
    ) -> Result<ValueId, CatalogError> {
        Self::validate(value)?;
        let single = BTreeSet::from([value.clone()]);

        for _ in 0..=MAX_INSERT_RETRIES {
            if let Some(id) = store.find_values(&single)?.remove(value) {
                return Ok(id);
            }
            match store.insert_values(&single) {
                Ok(mut ids) => {
                    if let Some(id) = ids.remove(value) {
                        return Ok(id);
                    }
                }
                // Another writer created it first: re-read.
                Err(CatalogError::Conflict(_)) => {}
                Err(e) => return Err(e),
            }
        }

        Err(CatalogError::Conflict(format!(
            "{} value {} kept conflicting",
            value.kind(),
            value
        )))
    }

    /// Row ids of every value in `values`, creating the missing ones.
    ///
    /// Existing rows are fetched with one `find_values` call per kind and the
    /// remainder inserted with one `insert_values` call per kind. Duplicate
    /// inputs collapse onto a single row.
    pub fn bulk_get_or_create<'a, S: CatalogStore + ?Sized>(
        store: &mut S,
        values: impl IntoIterator<Item = &'a Scalar>,
    ) -> Result<BTreeMap<Scalar, ValueId>, CatalogError> {
        let mut by_kind: BTreeMap<ScalarKind, BTreeSet<Scalar>> = BTreeMap::new();
        for value in values {
            Self::validate(value)?;
            by_kind.entry(value.kind()).or_default().insert(value.clone());
        }

        let mut resolved = BTreeMap::new();
        for (_, wanted) in by_kind {
            let found = store.find_values(&wanted)?;
            let missing: BTreeSet<Scalar> = wanted
                .into_iter()
                .filter(|v| !found.contains_key(v))
                .collect();
            resolved.extend(found);

            if missing.is_empty() {
                continue;
            }
            match store.insert_values(&missing) {
                Ok(created) => resolved.extend(created),
                Err(CatalogError::Conflict(_)) => {
                    // Lost a race on part of the batch: fall back to one
                    // value at a time.
                    for value in &missing {
                        let id = Self::get_or_create(store, value)?;
                        resolved.insert(value.clone(), id);
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(resolved)
    }

    /// Validate an attribute key.
    pub fn validate_key(key: &str) -> Result<(), CatalogError> {
        if key.is_empty() {
            return Err(CatalogError::InvalidArgument(
                "attribute keys must not be empty".to_string(),
            ));
        }
        if key.chars().count() > MAX_STRING_LENGTH {
            return Err(CatalogError::InvalidArgument(format!(
                "attribute keys are limited to {} characters",
                MAX_STRING_LENGTH
            )));
        }
        Ok(())
    }

    /// Row ids of every key in `keys`, creating the missing ones.
    pub fn bulk_get_or_create_keys<S: CatalogStore + ?Sized>(
        store: &mut S,
        keys: &BTreeSet<String>,
    ) -> Result<BTreeMap<String, KeyId>, CatalogError> {
        for key in keys {
            Self::validate_key(key)?;
        }

        for _ in 0..=MAX_INSERT_RETRIES {
            let mut resolved = store.find_keys(keys)?;
            let missing: BTreeSet<String> = keys
                .iter()
                .filter(|k| !resolved.contains_key(*k))
                .cloned()
                .collect();
            if missing.is_empty() {
                return Ok(resolved);
            }
            match store.insert_keys(&missing) {
                Ok(created) => {
                    resolved.extend(created);
                    return Ok(resolved);
                }
                Err(CatalogError::Conflict(_)) => {}
                Err(e) => return Err(e),
            }
        }

        Err(CatalogError::Conflict(
            "attribute keys kept conflicting".to_string(),
        ))
    }

    /// Row id of one key, created if absent.
    pub fn get_or_create_key<S: CatalogStore + ?Sized>(
        store: &mut S,
        key: &str,
    ) -> Result<KeyId, CatalogError> {
        let keys = BTreeSet::from([key.to_string()]);
        Self::bulk_get_or_create_keys(store, &keys)?
            .remove(key)
            .ok_or_else(|| CatalogError::Storage(format!("key {:?} was not resolved", key)))
    }

    /// Row id of an existing key.
    pub fn find_key<S: CatalogStore + ?Sized>(
        store: &S,
        key: &str,
    ) -> Result<Option<KeyId>, CatalogError> {
        let keys = BTreeSet::from([key.to_string()]);
        Ok(store.find_keys(&keys)?.remove(key))
    }

    // =========================================================================
    // REVERSE LOOKUP
    // =========================================================================

    /// Owners with an attribute under `key` whose value satisfies
    /// `stored <comparator> probe`.
    ///
    /// Only attributes of the probe's kind are considered. Units match only
    /// under the exact same label.
    pub fn lookup<S: CatalogStore + ?Sized>(
        store: &S,
        key: &str,
        comparator: Comparator,
        probe: &Scalar,
    ) -> Result<BTreeSet<ItemId>, CatalogError> {
        let Some(key_id) = Self::find_key(store, key)? else {
            return Ok(BTreeSet::new());
        };

        Ok(store
            .attributes_with_key(probe.kind(), key_id)?
            .into_iter()
            .filter(|(_, stored)| {
                stored
                    .compare(probe)
                    .is_some_and(|ordering| comparator.accepts(ordering))
            })
            .map(|(owner, _)| owner)
            .collect())
    }

    /// Stored rows per scalar kind.
    pub fn value_counts<S: CatalogStore + ?Sized>(
        store: &S,
    ) -> Result<BTreeMap<ScalarKind, usize>, CatalogError> {
        ScalarKind::ALL
            .into_iter()
            .map(|kind| store.value_count(kind).map(|count| (kind, count)))
            .collect()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn num(v: f64) -> Scalar {
        Scalar::number(v).expect("finite")
    }

    #[test]
    fn convert_number() {
        assert_eq!(
            ValueStore::convert(ScalarKind::Number, "3.5").expect("number"),
            num(3.5)
        );
        assert_eq!(
            ValueStore::convert(ScalarKind::Number, " -1e3 ").expect("number"),
            num(-1000.0)
        );
        assert!(matches!(
            ValueStore::convert(ScalarKind::Number, "abc"),
            Err(CatalogError::Conversion { .. })
        ));
        assert!(ValueStore::convert(ScalarKind::Number, "inf").is_err());
        assert!(ValueStore::convert(ScalarKind::Number, "NaN").is_err());
    }

    #[test]
    fn convert_unit() {
        let expected = Scalar::unit(4.7, "kOhm").expect("finite");
        assert_eq!(
            ValueStore::convert(ScalarKind::Unit, "4.7kOhm").expect("unit"),
            expected
        );
        assert_eq!(
            ValueStore::convert(ScalarKind::Unit, "4.7 kOhm").expect("unit"),
            expected
        );
        assert_eq!(
            ValueStore::convert(ScalarKind::Unit, "-2.5e-3 V").expect("unit"),
            Scalar::unit(-0.0025, "V").expect("finite")
        );
        assert_eq!(
            ValueStore::convert(ScalarKind::Unit, ".5mm").expect("unit"),
            Scalar::unit(0.5, "mm").expect("finite")
        );
    }

    #[test]
    fn convert_unit_exponent_needs_digits() {
        // "e" without digits is part of the label.
        assert_eq!(
            ValueStore::convert(ScalarKind::Unit, "3 eV").expect("unit"),
            Scalar::unit(3.0, "eV").expect("finite")
        );
        assert_eq!(
            ValueStore::convert(ScalarKind::Unit, "3eV").expect("unit"),
            Scalar::unit(3.0, "eV").expect("finite")
        );
    }

    #[test]
    fn convert_unit_rejects_malformed() {
        for input in ["kOhm", "4.7", "", "  ", "-", ".", "4.7   "] {
            assert!(
                matches!(
                    ValueStore::convert(ScalarKind::Unit, input),
                    Err(CatalogError::Conversion { .. })
                ),
                "{input:?} should not convert"
            );
        }
    }

    #[test]
    fn convert_string_and_file() {
        assert_eq!(
            ValueStore::convert(ScalarKind::String, " x ").expect("string"),
            Scalar::string(" x ")
        );
        assert!(ValueStore::convert(ScalarKind::String, &"a".repeat(256)).is_err());
        assert!(ValueStore::convert(ScalarKind::File, "a/b.pdf").is_err());
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let mut store = MemoryStore::new();
        let a = ValueStore::get_or_create(&mut store, &num(220.0)).expect("create");
        let b = ValueStore::get_or_create(&mut store, &num(220.0)).expect("reuse");
        let c = ValueStore::get_or_create(&mut store, &num(470.0)).expect("create");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(store.value_count(ScalarKind::Number).expect("count"), 2);
    }

    #[test]
    fn bulk_collapses_duplicates() {
        let mut store = MemoryStore::new();
        let v = Scalar::string("red");
        let inputs = [v.clone(), v.clone(), v.clone()];
        let ids = ValueStore::bulk_get_or_create(&mut store, &inputs).expect("bulk");
        assert_eq!(ids.len(), 1);
        assert!(ids.contains_key(&v));
        assert_eq!(store.value_count(ScalarKind::String).expect("count"), 1);
    }

    #[test]
    fn bulk_mixes_existing_and_new() {
        let mut store = MemoryStore::new();
        let existing = ValueStore::get_or_create(&mut store, &num(1.0)).expect("create");
        let inputs = [num(1.0), num(2.0), Scalar::string("x")];
        let ids = ValueStore::bulk_get_or_create(&mut store, &inputs).expect("bulk");
        assert_eq!(ids[&num(1.0)], existing);
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn keys_are_deduplicated() {
        let mut store = MemoryStore::new();
        let a = ValueStore::get_or_create_key(&mut store, "resistance").expect("key");
        let b = ValueStore::get_or_create_key(&mut store, "resistance").expect("key");
        assert_eq!(a, b);
        assert_eq!(store.key_count().expect("count"), 1);
        assert!(ValueStore::get_or_create_key(&mut store, "").is_err());
    }
}
