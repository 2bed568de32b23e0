//! # Core Type Definitions
//!
//! This module contains all core types for the partsbin catalog:
//! - Row identifiers (`ItemId`, `NodeId`, `KeyId`, `ValueId`)
//! - Scalar values (`Scalar`, `Number`, `ScalarKind`) and `Comparator`
//! - Tree rows (`TreeKind`, `TreeNode`), template schema rows
//! - Item rows (`Item`, `ItemLocation`)
//! - Error types (`CatalogError`, `FieldError`, `ValidationErrors`)
//!
//! ## Ordering Guarantees
//!
//! Every type that is used as a map key implements `Ord`, so all catalog
//! collections are `BTreeMap`/`BTreeSet` and iterate deterministically.
//! `Number` gets its total order from `f64::total_cmp` and refuses NaN.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use thiserror::Error;

// =============================================================================
// ROW IDENTIFIERS
// =============================================================================

/// Identifier of an item (the record that owns attributes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId(pub u64);

/// Identifier of a tree node. Ids are scoped per [`TreeKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

/// Identifier of a row in the attribute-key table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KeyId(pub u64);

/// Identifier of a row in one of the scalar value tables.
/// Ids are scoped per [`ScalarKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ValueId(pub u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// NUMBER
// =============================================================================

/// A finite `f64` with a total order.
///
/// - NaN and infinities are unrepresentable
/// - `-0.0` is folded into `0.0`, so equal numbers share one stored row
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Number(f64);

impl Number {
    /// Wrap a float. Returns `None` for NaN and infinities.
    #[must_use]
    pub fn new(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        if value == 0.0 {
            return Some(Self(0.0));
        }
        Some(Self(value))
    }

    /// The wrapped float.
    #[must_use]
    pub const fn get(self) -> f64 {
        self.0
    }

    /// Order-preserving encoding of the float bits.
    ///
    /// `a < b` iff `a.ordered_bits() < b.ordered_bits()`, which lets storage
    /// backends keep numbers in a sorted `u64` index.
    #[must_use]
    pub fn ordered_bits(self) -> u64 {
        let bits = self.0.to_bits();
        if bits >> 63 == 1 {
            !bits
        } else {
            bits | (1 << 63)
        }
    }

    /// Inverse of [`Number::ordered_bits`].
    #[must_use]
    pub fn from_ordered_bits(encoded: u64) -> Self {
        let bits = if encoded >> 63 == 1 {
            encoded & !(1 << 63)
        } else {
            !encoded
        };
        Self(f64::from_bits(bits))
    }
}

impl TryFrom<f64> for Number {
    type Error = String;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("{} is not a finite number", value))
    }
}

impl From<Number> for f64 {
    fn from(number: Number) -> Self {
        number.0
    }
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Number {}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Number {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Hash for Number {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// SCALAR KIND
// =============================================================================

/// The closed set of scalar variants.
///
/// The wire tags (`"string"`, `"number"`, `"unit"`, `"file"`) cross the API
/// boundary and must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarKind {
    String,
    Number,
    Unit,
    File,
}

impl ScalarKind {
    /// Every variant, in storage order.
    pub const ALL: [Self; 4] = [Self::String, Self::Number, Self::Unit, Self::File];

    /// The stable wire tag.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Unit => "unit",
            Self::File => "file",
        }
    }

    /// Resolve a wire tag.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    /// Single-byte discriminator used in storage keys.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::String => 0,
            Self::Number => 1,
            Self::Unit => 2,
            Self::File => 3,
        }
    }

    /// Inverse of [`ScalarKind::code`].
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.code() == code)
    }

    /// Whether values of this kind may appear in a template name format.
    #[must_use]
    pub const fn is_formattable(self) -> bool {
        !matches!(self, Self::Unit)
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

// =============================================================================
// SCALAR
// =============================================================================

/// A typed leaf value stored in the deduplicated value tables.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Scalar {
    /// A unique string.
    Str(String),
    /// A unique finite number.
    Num(Number),
    /// Magnitude plus unit label, e.g. `4.7 kOhm`.
    Unit(Number, String),
    /// Storage path of an uploaded file.
    File(String),
}

impl Scalar {
    /// Shorthand for a string scalar.
    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        Self::Str(value.into())
    }

    /// Shorthand for a number scalar. Returns `None` for non-finite input.
    #[must_use]
    pub fn number(value: f64) -> Option<Self> {
        Number::new(value).map(Self::Num)
    }

    /// Shorthand for a unit scalar. Returns `None` for non-finite input.
    #[must_use]
    pub fn unit(value: f64, unit: impl Into<String>) -> Option<Self> {
        Number::new(value).map(|n| Self::Unit(n, unit.into()))
    }

    /// The variant of this value.
    #[must_use]
    pub const fn kind(&self) -> ScalarKind {
        match self {
            Self::Str(_) => ScalarKind::String,
            Self::Num(_) => ScalarKind::Number,
            Self::Unit(..) => ScalarKind::Unit,
            Self::File(_) => ScalarKind::File,
        }
    }

    /// Compare two values of the same variant.
    ///
    /// Returns `None` across variants and for units with different labels:
    /// unit magnitudes are only comparable under the exact same label.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Str(a), Self::Str(b)) | (Self::File(a), Self::File(b)) => Some(a.cmp(b)),
            (Self::Num(a), Self::Num(b)) => Some(a.cmp(b)),
            (Self::Unit(a, ua), Self::Unit(b, ub)) if ua == ub => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) | Self::File(s) => f.write_str(s),
            Self::Num(n) => write!(f, "{}", n),
            Self::Unit(n, unit) => write!(f, "{} {}", n, unit),
        }
    }
}

// =============================================================================
// COMPARATOR
// =============================================================================

/// Comparison operator of a lookup. Tokens are exact, no aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Comparator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">=")]
    Ge,
}

impl Comparator {
    /// The query-language token.
    #[must_use]
    pub const fn token(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
        }
    }

    /// Resolve a token. Only the five exact tokens are accepted.
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "=" => Some(Self::Eq),
            "<" => Some(Self::Lt),
            ">" => Some(Self::Gt),
            "<=" => Some(Self::Le),
            ">=" => Some(Self::Ge),
            _ => None,
        }
    }

    /// Whether `stored <op> probe` holds given `stored.cmp(probe)`.
    #[must_use]
    pub const fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => matches!(ordering, Ordering::Equal),
            Self::Lt => matches!(ordering, Ordering::Less),
            Self::Gt => matches!(ordering, Ordering::Greater),
            Self::Le => !matches!(ordering, Ordering::Greater),
            Self::Ge => !matches!(ordering, Ordering::Less),
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

// =============================================================================
// TREE ROWS
// =============================================================================

/// The three parent-linked hierarchies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeKind {
    Category,
    Container,
    Template,
}

impl TreeKind {
    /// Every tree kind.
    pub const ALL: [Self; 3] = [Self::Category, Self::Container, Self::Template];

    /// Stable name used in URLs and storage keys.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Category => "category",
            Self::Container => "container",
            Self::Template => "template",
        }
    }

    /// Resolve a tag.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    /// Single-byte discriminator used in storage keys.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Category => 0,
            Self::Container => 1,
            Self::Template => 2,
        }
    }
}

impl fmt::Display for TreeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A node of one of the trees.
///
/// The root is the only node without a parent; there is exactly one root
/// per [`TreeKind`] and its id is [`crate::primitives::ROOT_NODE`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub id: NodeId,
    pub kind: TreeKind,
    pub name: String,
    pub parent: Option<NodeId>,
}

impl TreeNode {
    /// Whether this is the root of its tree.
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Human-readable name: roots always display as `Root`.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.is_root() { "Root" } else { &self.name }
    }
}

/// One field declared directly on a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateField {
    pub name: String,
    pub kind: ScalarKind,
}

/// Template-only data attached to a template tree node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateSpec {
    /// Label format rendered with an item's attributes.
    pub name_format: String,
    /// Fields declared on this template only, in declaration order.
    pub fields: Vec<TemplateField>,
}

impl TemplateSpec {
    /// Kind of a directly declared field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<ScalarKind> {
        self.fields.iter().find(|f| f.name == name).map(|f| f.kind)
    }
}

// =============================================================================
// ITEM ROWS
// =============================================================================

/// An inventory item. Its attributes live in the attribute-pair table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub category: NodeId,
    pub template: NodeId,
}

/// How many units of an item sit in a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemLocation {
    pub container: NodeId,
    pub item: ItemId,
    pub amount: u32,
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Why a single wire field was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "error", content = "detail", rename_all = "snake_case")]
pub enum FieldError {
    #[error("missing type")]
    MissingType,

    #[error("missing value")]
    MissingValue,

    #[error("unknown type: {0}")]
    UnknownType(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("{0}")]
    Conversion(String),
}

/// Per-field validation errors, collected before any write happens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationErrors(pub BTreeMap<String, FieldError>);

impl ValidationErrors {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn insert(&mut self, field: impl Into<String>, error: FieldError) {
        self.0.insert(field.into(), error);
    }
}

/// Errors that can occur in the catalog.
///
/// - No silent failures
/// - Use `Result<T, CatalogError>` for fallible operations
/// - The catalog never panics; every error is recoverable by the caller
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Input text could not be converted into a scalar of the given kind.
    #[error("cannot convert {input:?} to {kind}")]
    Conversion { kind: ScalarKind, input: String },

    /// An attribute key is absent on the record.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// An argument is out of range or malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation would break a tree or template invariant.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// A field kind cannot be used where it was requested.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// A filter expression could not be parsed.
    #[error("query syntax error at {offset}: {message}")]
    QuerySyntax { offset: usize, message: String },

    /// A referenced node, item or template does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A unique row already exists. Resolved internally by re-reading.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Attributes were read before the record was loaded.
    #[error("attributes of item {0} are not loaded")]
    NotLoaded(ItemId),

    /// One or more wire fields were rejected.
    #[error("validation failed for {} field(s)", .0.len())]
    Validation(ValidationErrors),

    /// The storage backend failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// A stored row could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(String),
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_rejects_non_finite() {
        assert!(Number::new(f64::NAN).is_none());
        assert!(Number::new(f64::INFINITY).is_none());
        assert!(Number::new(f64::NEG_INFINITY).is_none());
    }

    #[test]
    fn number_folds_negative_zero() {
        let neg = Number::new(-0.0).expect("finite");
        let pos = Number::new(0.0).expect("finite");
        assert_eq!(neg, pos);
        assert_eq!(neg.ordered_bits(), pos.ordered_bits());
    }

    #[test]
    fn ordered_bits_preserve_order() {
        let values = [-1e300, -3.5, -1.0, 0.0, 1e-9, 1.0, 220.0, 1e300];
        let encoded: Vec<u64> = values
            .iter()
            .map(|v| Number::new(*v).expect("finite").ordered_bits())
            .collect();
        let mut sorted = encoded.clone();
        sorted.sort_unstable();
        assert_eq!(encoded, sorted);

        for v in values {
            let n = Number::new(v).expect("finite");
            assert_eq!(Number::from_ordered_bits(n.ordered_bits()), n);
        }
    }

    #[test]
    fn number_display_drops_trailing_zero() {
        assert_eq!(Number::new(220.0).expect("finite").to_string(), "220");
        assert_eq!(Number::new(4.7).expect("finite").to_string(), "4.7");
    }

    #[test]
    fn scalar_kind_tags_are_stable() {
        assert_eq!(ScalarKind::String.tag(), "string");
        assert_eq!(ScalarKind::Number.tag(), "number");
        assert_eq!(ScalarKind::Unit.tag(), "unit");
        assert_eq!(ScalarKind::File.tag(), "file");
        for kind in ScalarKind::ALL {
            assert_eq!(ScalarKind::from_tag(kind.tag()), Some(kind));
            assert_eq!(ScalarKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(ScalarKind::from_tag("integer"), None);
    }

    #[test]
    fn unit_compare_requires_same_label() {
        let a = Scalar::unit(4.7, "kOhm").expect("finite");
        let b = Scalar::unit(10.0, "kOhm").expect("finite");
        let c = Scalar::unit(4.7, "Ohm").expect("finite");
        assert_eq!(a.compare(&b), Some(Ordering::Less));
        assert_eq!(a.compare(&c), None);
    }

    #[test]
    fn compare_across_kinds_is_none() {
        let s = Scalar::string("42");
        let n = Scalar::number(42.0).expect("finite");
        assert_eq!(s.compare(&n), None);
    }

    #[test]
    fn comparator_tokens_round_trip() {
        for token in ["=", "<", ">", "<=", ">="] {
            let cmp = Comparator::from_token(token).expect("known token");
            assert_eq!(cmp.token(), token);
        }
        assert_eq!(Comparator::from_token("=="), None);
        assert_eq!(Comparator::from_token("!="), None);
    }

    #[test]
    fn comparator_accepts() {
        assert!(Comparator::Le.accepts(Ordering::Equal));
        assert!(Comparator::Le.accepts(Ordering::Less));
        assert!(!Comparator::Lt.accepts(Ordering::Equal));
        assert!(Comparator::Ge.accepts(Ordering::Greater));
    }

    #[test]
    fn root_displays_as_root() {
        let root = TreeNode {
            id: NodeId(0),
            kind: TreeKind::Container,
            name: "shelf".to_string(),
            parent: None,
        };
        assert_eq!(root.display_name(), "Root");
    }
}
