//! # Template Resolution
//!
//! Field schemas and name formats of the template tree.
//!
//! A template's resolved fields are the fold of its ancestor path from the
//! root down, each level overwriting earlier ones on a name collision. Its
//! effective name format is the nearest non-empty one on that path.
//!
//! Every mutation that can change a resolved schema or a format re-checks
//! the affected template and all its descendants before anything is stored.

use crate::dict::Dict;
use crate::format::NameFormat;
use crate::primitives::{MAX_NAME_FORMAT_LENGTH, ROOT_NODE};
use crate::store::CatalogStore;
use crate::tree::Tree;
use crate::validate::validate_field_types;
use crate::values::ValueStore;
use crate::{CatalogError, NodeId, ScalarKind, TemplateField, TemplateSpec, TreeKind};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

/// Field schema of a template: field name -> kind.
pub type FieldSchema = BTreeMap<String, ScalarKind>;

/// Parsed effective name formats, resolved once per template.
///
/// Holds no borrow on the store; drop it once the templates may change.
#[derive(Debug, Clone, Default)]
pub struct LabelFormats {
    formats: BTreeMap<NodeId, NameFormat>,
}

impl LabelFormats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Effective format of template `id`, walking its ancestors on first use.
    pub fn format<S: CatalogStore + ?Sized>(
        &mut self,
        store: &S,
        id: NodeId,
    ) -> Result<&NameFormat, CatalogError> {
        match self.formats.entry(id) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let format = NameFormat::parse(&Templates::effective_format(store, id)?)?;
                Ok(entry.insert(format))
            }
        }
    }

    /// Render the label of a loaded record using template `id`.
    pub fn render<S, R>(&mut self, store: &S, id: NodeId, record: &R) -> Result<String, CatalogError>
    where
        S: CatalogStore + ?Sized,
        R: Dict,
    {
        self.format(store, id)?.render(record.attributes()?)
    }
}

/// The Templates group the template-tree operations, generic over the store.
pub struct Templates;

impl Templates {
    /// Template data declared directly on `id`.
    pub fn spec<S: CatalogStore + ?Sized>(store: &S, id: NodeId) -> Result<TemplateSpec, CatalogError> {
        store.template_spec(id)
    }

    /// Own fields of `id` merged over every ancestor's.
    pub fn resolved_fields<S: CatalogStore + ?Sized>(
        store: &S,
        id: NodeId,
    ) -> Result<FieldSchema, CatalogError> {
        let mut fields = FieldSchema::new();
        for node in Tree::ancestor_path(store, TreeKind::Template, id)? {
            for field in store.template_spec(node.id)?.fields {
                fields.insert(field.name, field.kind);
            }
        }
        Ok(fields)
    }

    /// The nearest non-empty name format on the path from `id` to the root.
    pub fn effective_format<S: CatalogStore + ?Sized>(
        store: &S,
        id: NodeId,
    ) -> Result<String, CatalogError> {
        for node in Tree::ancestor_path(store, TreeKind::Template, id)?
            .iter()
            .rev()
        {
            let spec = store.template_spec(node.id)?;
            if !spec.name_format.is_empty() {
                return Ok(spec.name_format);
            }
        }
        Ok(String::new())
    }

    /// Schema and format `id` inherits from its parent.
    fn inherited<S: CatalogStore + ?Sized>(
        store: &S,
        id: NodeId,
    ) -> Result<(FieldSchema, String), CatalogError> {
        let node = Tree::node(store, TreeKind::Template, id)?;
        match node.parent {
            Some(parent) => Ok((
                Self::resolved_fields(store, parent)?,
                Self::effective_format(store, parent)?,
            )),
            None => Ok((FieldSchema::new(), String::new())),
        }
    }

    /// Check the effective formats of `id` (with `spec` in place of its
    /// stored data) and of every descendant of `id`.
    fn check_subtree<S: CatalogStore + ?Sized>(
        store: &S,
        id: NodeId,
        spec: &TemplateSpec,
        inherited_fields: FieldSchema,
        inherited_format: String,
    ) -> Result<(), CatalogError> {
        let mut pending = vec![(id, spec.clone(), inherited_fields, inherited_format)];

        while let Some((node, spec, mut fields, parent_format)) = pending.pop() {
            for field in &spec.fields {
                fields.insert(field.name.clone(), field.kind);
            }
            let format = if spec.name_format.is_empty() {
                parent_format
            } else {
                spec.name_format
            };
            NameFormat::parse(&format)?.check(&fields)?;

            for child in store.children_of(TreeKind::Template, &BTreeSet::from([node]))? {
                let child_spec = store.template_spec(child.id)?;
                pending.push((child.id, child_spec, fields.clone(), format.clone()));
            }
        }
        Ok(())
    }

    /// Validate and store a new spec for `id`.
    fn replace_spec<S: CatalogStore + ?Sized>(
        store: &mut S,
        id: NodeId,
        spec: TemplateSpec,
    ) -> Result<TemplateSpec, CatalogError> {
        let (fields, format) = Self::inherited(store, id)?;
        Self::check_subtree(store, id, &spec, fields, format)?;
        store.put_template_spec(id, &spec)?;
        Ok(spec)
    }

    /// Declare or retype one field on `id`.
    pub fn set_field<S: CatalogStore + ?Sized>(
        store: &mut S,
        id: NodeId,
        name: &str,
        kind: ScalarKind,
    ) -> Result<TemplateSpec, CatalogError> {
        ValueStore::validate_key(name)?;
        let mut spec = store.template_spec(id)?;
        match spec.fields.iter_mut().find(|f| f.name == name) {
            Some(field) => field.kind = kind,
            None => spec.fields.push(TemplateField {
                name: name.to_string(),
                kind,
            }),
        }
        Self::replace_spec(store, id, spec)
    }

    /// Remove a field declared on `id`.
    ///
    /// Rejected while a name format in the subtree still needs it and no
    /// ancestor provides it.
    pub fn remove_field<S: CatalogStore + ?Sized>(
        store: &mut S,
        id: NodeId,
        name: &str,
    ) -> Result<TemplateSpec, CatalogError> {
        let mut spec = store.template_spec(id)?;
        let before = spec.fields.len();
        spec.fields.retain(|f| f.name != name);
        if spec.fields.len() == before {
            return Err(CatalogError::KeyNotFound(name.to_string()));
        }
        Self::replace_spec(store, id, spec)
    }

    /// Replace the fields declared on `id` from a wire payload `{name: tag}`.
    pub fn set_fields<S: CatalogStore + ?Sized>(
        store: &mut S,
        id: NodeId,
        payload: &BTreeMap<String, String>,
    ) -> Result<TemplateSpec, CatalogError> {
        let fields = validate_field_types(payload)?;
        let mut spec = store.template_spec(id)?;
        spec.fields = fields;
        Self::replace_spec(store, id, spec)
    }

    /// Set the name format of `id`. An empty format inherits the parent's.
    pub fn set_name_format<S: CatalogStore + ?Sized>(
        store: &mut S,
        id: NodeId,
        format: &str,
    ) -> Result<TemplateSpec, CatalogError> {
        if format.chars().count() > MAX_NAME_FORMAT_LENGTH {
            return Err(CatalogError::InvalidArgument(format!(
                "name formats are limited to {} characters",
                MAX_NAME_FORMAT_LENGTH
            )));
        }
        NameFormat::parse(format)?;
        let mut spec = store.template_spec(id)?;
        spec.name_format = format.to_string();
        Self::replace_spec(store, id, spec)
    }

    /// Check that moving `id` under `new_parent` keeps every format in its
    /// subtree valid.
    pub(crate) fn check_move<S: CatalogStore + ?Sized>(
        store: &S,
        id: NodeId,
        new_parent: NodeId,
    ) -> Result<(), CatalogError> {
        let spec = store.template_spec(id)?;
        Self::check_subtree(
            store,
            id,
            &spec,
            Self::resolved_fields(store, new_parent)?,
            Self::effective_format(store, new_parent)?,
        )
    }

    /// Render the label of a loaded record using template `id`.
    ///
    /// Fails with `KeyNotFound` if the format needs an attribute the record
    /// does not have.
    pub fn render_label<S, R>(store: &S, id: NodeId, record: &R) -> Result<String, CatalogError>
    where
        S: CatalogStore + ?Sized,
        R: Dict,
    {
        LabelFormats::default().render(store, id, record)
    }

    /// Delete a non-root template. Its items and child templates move to its
    /// parent.
    pub fn delete<S: CatalogStore + ?Sized>(store: &mut S, id: NodeId) -> Result<(), CatalogError> {
        if id == ROOT_NODE {
            return Err(CatalogError::InvalidOperation(
                "the root template cannot be deleted".to_string(),
            ));
        }
        let node = Tree::node(store, TreeKind::Template, id)?;
        if let Some(parent) = node.parent {
            // Children lose this level's fields; their formats must survive.
            let (fields, format) = (
                Self::resolved_fields(store, parent)?,
                Self::effective_format(store, parent)?,
            );
            for child in store.children_of(TreeKind::Template, &BTreeSet::from([id]))? {
                let child_spec = store.template_spec(child.id)?;
                Self::check_subtree(store, child.id, &child_spec, fields.clone(), format.clone())?;
            }
        }
        Tree::delete(store, TreeKind::Template, id)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn template(store: &mut MemoryStore, name: &str, parent: NodeId) -> NodeId {
        Tree::create(store, TreeKind::Template, name, parent)
            .expect("create")
            .id
    }

    #[test]
    fn resolved_fields_descendant_wins() {
        let mut store = MemoryStore::new();
        Templates::set_field(&mut store, ROOT_NODE, "type", ScalarKind::String).expect("root");
        let child = template(&mut store, "child", ROOT_NODE);
        Templates::set_field(&mut store, child, "tolerance", ScalarKind::Number).expect("child");
        let grandchild = template(&mut store, "grandchild", child);
        Templates::set_field(&mut store, grandchild, "type", ScalarKind::Number)
            .expect("grandchild");

        let fields = Templates::resolved_fields(&store, child).expect("fields");
        assert_eq!(
            fields,
            BTreeMap::from([
                ("type".to_string(), ScalarKind::String),
                ("tolerance".to_string(), ScalarKind::Number),
            ])
        );
        let fields = Templates::resolved_fields(&store, grandchild).expect("fields");
        assert_eq!(fields["type"], ScalarKind::Number);
        assert_eq!(fields["tolerance"], ScalarKind::Number);
    }

    #[test]
    fn name_format_needs_defined_fields() {
        let mut store = MemoryStore::new();
        let resistor = template(&mut store, "Resistor", ROOT_NODE);
        Templates::set_field(&mut store, resistor, "resistance", ScalarKind::Number).expect("set");

        Templates::set_name_format(&mut store, resistor, "{resistance} Ohm").expect("format");
        assert!(matches!(
            Templates::set_name_format(&mut store, resistor, "{voltage} V"),
            Err(CatalogError::InvalidOperation(_))
        ));
        // The rejected format was not stored.
        assert_eq!(
            Templates::spec(&store, resistor).expect("spec").name_format,
            "{resistance} Ohm"
        );
    }

    #[test]
    fn unit_fields_cannot_be_formatted() {
        let mut store = MemoryStore::new();
        let cap = template(&mut store, "Capacitor", ROOT_NODE);
        Templates::set_field(&mut store, cap, "voltage", ScalarKind::Number).expect("set");
        Templates::set_name_format(&mut store, cap, "{voltage}").expect("format");

        // Retyping a formatted field to unit breaks the format.
        assert!(matches!(
            Templates::set_field(&mut store, cap, "voltage", ScalarKind::Unit),
            Err(CatalogError::TypeMismatch(_))
        ));
    }

    #[test]
    fn remove_field_checks_descendants() {
        let mut store = MemoryStore::new();
        let parent = template(&mut store, "parent", ROOT_NODE);
        Templates::set_field(&mut store, parent, "value", ScalarKind::Number).expect("set");
        let child = template(&mut store, "child", parent);
        Templates::set_name_format(&mut store, child, "{value}").expect("format");

        assert!(matches!(
            Templates::remove_field(&mut store, parent, "value"),
            Err(CatalogError::InvalidOperation(_))
        ));
        assert!(matches!(
            Templates::remove_field(&mut store, parent, "missing"),
            Err(CatalogError::KeyNotFound(_))
        ));
    }

    #[test]
    fn set_fields_replaces_own_fields() {
        let mut store = MemoryStore::new();
        let t = template(&mut store, "t", ROOT_NODE);
        Templates::set_field(&mut store, t, "old", ScalarKind::String).expect("set");

        let payload = BTreeMap::from([("new".to_string(), "number".to_string())]);
        let spec = Templates::set_fields(&mut store, t, &payload).expect("set fields");
        assert_eq!(spec.fields.len(), 1);
        assert_eq!(spec.field("new"), Some(ScalarKind::Number));

        let bad = BTreeMap::from([("x".to_string(), "color".to_string())]);
        assert!(matches!(
            Templates::set_fields(&mut store, t, &bad),
            Err(CatalogError::Validation(_))
        ));
    }

    #[test]
    fn move_checks_inherited_schema() {
        let mut store = MemoryStore::new();
        let with = template(&mut store, "with", ROOT_NODE);
        Templates::set_field(&mut store, with, "size", ScalarKind::String).expect("set");
        let without = template(&mut store, "without", ROOT_NODE);
        let child = template(&mut store, "child", with);
        Templates::set_name_format(&mut store, child, "{size}").expect("format");

        assert!(matches!(
            Tree::reparent(&mut store, TreeKind::Template, child, without),
            Err(CatalogError::InvalidOperation(_))
        ));
        Templates::set_field(&mut store, without, "size", ScalarKind::Number).expect("set");
        Tree::reparent(&mut store, TreeKind::Template, child, without).expect("move");
    }

    #[test]
    fn delete_root_template_is_rejected() {
        let mut store = MemoryStore::new();
        assert!(matches!(
            Templates::delete(&mut store, ROOT_NODE),
            Err(CatalogError::InvalidOperation(_))
        ));
    }

    #[test]
    fn delete_moves_items_to_parent() {
        let mut store = MemoryStore::new();
        let t = template(&mut store, "t", ROOT_NODE);
        let item = store.insert_item(ROOT_NODE, t).expect("item");
        Templates::delete(&mut store, t).expect("delete");
        assert_eq!(
            store.item(item.id).expect("read").expect("item").template,
            ROOT_NODE
        );
    }

    #[test]
    fn label_formats_resolve_each_template_once() {
        use crate::item::Items;
        use crate::Scalar;

        let mut store = MemoryStore::new();
        let resistor = template(&mut store, "Resistor", ROOT_NODE);
        Templates::set_field(&mut store, resistor, "resistance", ScalarKind::Number).expect("set");
        Templates::set_name_format(&mut store, resistor, "{resistance} Ohm").expect("format");
        let smd = template(&mut store, "SMD", resistor);

        let records: Vec<_> = [(resistor, 220.0), (smd, 4700.0), (smd, 10.0)]
            .into_iter()
            .map(|(t, ohms)| {
                let value = Scalar::number(ohms).expect("finite");
                let attributes = BTreeMap::from([("resistance".to_string(), value)]);
                Items::create(&mut store, ROOT_NODE, t, attributes).expect("create")
            })
            .collect();

        let mut formats = LabelFormats::new();
        let labels: Vec<String> = records
            .iter()
            .map(|r| formats.render(&store, r.template(), r).expect("label"))
            .collect();
        assert_eq!(labels, ["220 Ohm", "4700 Ohm", "10 Ohm"]);

        // Later format changes are not seen by a cache already filled.
        Templates::set_name_format(&mut store, resistor, "R{resistance}").expect("format");
        assert_eq!(
            formats.render(&store, smd, &records[2]).expect("cached"),
            "10 Ohm"
        );
        assert_eq!(
            LabelFormats::new()
                .render(&store, smd, &records[2])
                .expect("fresh"),
            "R10"
        );
    }
}
