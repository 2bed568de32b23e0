//! # Wire Validation
//!
//! Typed validation of the wire payloads the API layer receives:
//! - attribute payloads `{key: {"type": tag, "value": text}}`
//! - template field payloads `{name: tag}`
//!
//! Every field is checked and every error collected before anything is
//! written; a payload is either accepted whole or rejected with a
//! per-field error map.

use crate::values::ValueStore;
use crate::{
    CatalogError, FieldError, Scalar, ScalarKind, TemplateField, ValidationErrors,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One attribute as it crosses the API boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireValue {
    /// Wire tag of the scalar kind.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

impl WireValue {
    /// Outbound form of a stored value. Converting it back yields the same
    /// scalar (file values excepted, which never convert from text).
    #[must_use]
    pub fn from_scalar(value: &Scalar) -> Self {
        Self {
            kind: Some(value.kind().tag().to_string()),
            value: Some(value.to_string()),
        }
    }
}

fn check_key(key: &str) -> Option<FieldError> {
    ValueStore::validate_key(key)
        .err()
        .map(|e| FieldError::InvalidKey(e.to_string()))
}

/// Validate an attribute payload into typed scalars.
pub fn validate_attributes(
    payload: &BTreeMap<String, WireValue>,
) -> Result<BTreeMap<String, Scalar>, CatalogError> {
    let mut errors = ValidationErrors::default();
    let mut values = BTreeMap::new();

    for (key, wire) in payload {
        if let Some(error) = check_key(key) {
            errors.insert(key.clone(), error);
            continue;
        }
        let Some(tag) = wire.kind.as_deref() else {
            errors.insert(key.clone(), FieldError::MissingType);
            continue;
        };
        let Some(kind) = ScalarKind::from_tag(tag) else {
            errors.insert(key.clone(), FieldError::UnknownType(tag.to_string()));
            continue;
        };
        let Some(text) = wire.value.as_deref() else {
            errors.insert(key.clone(), FieldError::MissingValue);
            continue;
        };
        match ValueStore::convert(kind, text) {
            Ok(value) => {
                values.insert(key.clone(), value);
            }
            Err(e) => errors.insert(key.clone(), FieldError::Conversion(e.to_string())),
        }
    }

    if errors.is_empty() {
        Ok(values)
    } else {
        Err(CatalogError::Validation(errors))
    }
}

/// Validate a template field payload into field declarations.
pub fn validate_field_types(
    payload: &BTreeMap<String, String>,
) -> Result<Vec<TemplateField>, CatalogError> {
    let mut errors = ValidationErrors::default();
    let mut fields = Vec::with_capacity(payload.len());

    for (name, tag) in payload {
        if let Some(error) = check_key(name) {
            errors.insert(name.clone(), error);
            continue;
        }
        match ScalarKind::from_tag(tag) {
            Some(kind) => fields.push(TemplateField {
                name: name.clone(),
                kind,
            }),
            None => errors.insert(name.clone(), FieldError::UnknownType(tag.clone())),
        }
    }

    if errors.is_empty() {
        Ok(fields)
    } else {
        Err(CatalogError::Validation(errors))
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn wire(kind: Option<&str>, value: Option<&str>) -> WireValue {
        WireValue {
            kind: kind.map(str::to_string),
            value: value.map(str::to_string),
        }
    }

    #[test]
    fn valid_payload_converts() {
        let payload = BTreeMap::from([
            ("resistance".to_string(), wire(Some("number"), Some("220"))),
            ("size".to_string(), wire(Some("unit"), Some("0.25 W"))),
            ("name".to_string(), wire(Some("string"), Some("carbon film"))),
        ]);
        let values = validate_attributes(&payload).expect("valid");
        assert_eq!(values["resistance"], Scalar::number(220.0).expect("finite"));
        assert_eq!(values["size"], Scalar::unit(0.25, "W").expect("finite"));
    }

    #[test]
    fn errors_are_collected_per_field() {
        let payload = BTreeMap::from([
            ("a".to_string(), wire(None, Some("1"))),
            ("b".to_string(), wire(Some("number"), None)),
            ("c".to_string(), wire(Some("integer"), Some("1"))),
            ("d".to_string(), wire(Some("number"), Some("abc"))),
            ("e".to_string(), wire(Some("number"), Some("2"))),
            (String::new(), wire(Some("string"), Some("x"))),
        ]);
        let Err(CatalogError::Validation(errors)) = validate_attributes(&payload) else {
            panic!("expected validation errors");
        };
        assert_eq!(errors.len(), 5);
        assert_eq!(errors.0["a"], FieldError::MissingType);
        assert_eq!(errors.0["b"], FieldError::MissingValue);
        assert_eq!(errors.0["c"], FieldError::UnknownType("integer".to_string()));
        assert!(matches!(errors.0["d"], FieldError::Conversion(_)));
        assert!(matches!(errors.0[""], FieldError::InvalidKey(_)));
    }

    #[test]
    fn wire_round_trip() {
        let unit = Scalar::unit(4.7, "kOhm").expect("finite");
        let wire = WireValue::from_scalar(&unit);
        assert_eq!(wire.kind.as_deref(), Some("unit"));
        assert_eq!(wire.value.as_deref(), Some("4.7 kOhm"));
        let payload = BTreeMap::from([("r".to_string(), wire)]);
        assert_eq!(validate_attributes(&payload).expect("valid")["r"], unit);
    }

    #[test]
    fn field_types() {
        let payload = BTreeMap::from([
            ("resistance".to_string(), "number".to_string()),
            ("package".to_string(), "blob".to_string()),
        ]);
        let Err(CatalogError::Validation(errors)) = validate_field_types(&payload) else {
            panic!("expected validation errors");
        };
        assert_eq!(errors.len(), 1);

        let payload = BTreeMap::from([("resistance".to_string(), "number".to_string())]);
        let fields = validate_field_types(&payload).expect("valid");
        assert_eq!(fields[0].kind, ScalarKind::Number);
    }
}
