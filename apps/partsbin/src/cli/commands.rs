//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use crate::api;
use crate::config::{Backend, Config};
use partsbin_core::{
    Catalog, CatalogError, Dict, ItemId, ItemRecord, LabelFormats, NodeId, Subtree, TreeKind,
    WireValue,
};
use std::collections::BTreeMap;

// =============================================================================
// SERVER COMMAND
// =============================================================================

/// Start the HTTP server.
pub async fn cmd_server(config: &Config, verbose: bool) -> Result<(), CatalogError> {
    let catalog = open_catalog(config)?;

    println!("partsbin Server Starting...");
    println!();
    println!("Configuration:");
    println!("  Host:     {}", config.server.host);
    println!("  Port:     {}", config.server.port);
    println!("  Backend:  {}", config.storage.backend);
    if config.storage.backend == Backend::Redb {
        println!("  Database: {:?}", config.storage.path);
    }
    if verbose {
        println!("  Rate:     {} requests/second", config.limits.rate_limit);
        println!("  Body:     {} bytes", config.limits.body_limit);
    }
    println!();
    println!("Endpoints:");
    println!("  GET  /items?q=     - List and filter items");
    println!("  POST /items        - Create an item");
    println!("  GET  /keys         - Attribute key usage");
    println!("  GET  /tree/{{kind}}/{{id}}/children - Browse a tree");
    println!("  GET  /status       - Catalog status");
    println!("  GET  /health       - Health check");
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    api::run_server(catalog, config).await
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show catalog row counts.
pub fn cmd_status(config: &Config, json_mode: bool) -> Result<(), CatalogError> {
    let catalog = open_catalog(config)?;
    let status = catalog.status();

    if json_mode {
        let output = serde_json::json!({
            "database": config.storage.path.to_string_lossy(),
            "backend": config.storage.backend.to_string(),
            "status": api::StatusResponse::from(status),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return Ok(());
    }

    println!("partsbin Catalog Status");
    println!("=======================");
    println!("Database: {:?}", config.storage.path);
    println!("Backend:  {}", config.storage.backend);
    println!();
    println!("Items:    {}", status.items);
    println!("Keys:     {}", status.keys);
    for (kind, count) in &status.values {
        println!("  {:<8} values: {}", kind.tag(), count);
    }
    for (kind, count) in &status.nodes {
        println!("  {:<9} nodes: {}", kind.tag(), count);
    }

    Ok(())
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Initialize a new database.
pub fn cmd_init(config: &Config, force: bool) -> Result<(), CatalogError> {
    let path = &config.storage.path;

    match config.storage.backend {
        Backend::Memory => {
            println!("The memory backend needs no initialization");
        }
        Backend::Redb => {
            if path.exists() {
                if !force {
                    return Err(CatalogError::InvalidOperation(
                        "Database already exists. Use --force to overwrite.".to_string(),
                    ));
                }
                std::fs::remove_file(path).map_err(|e| {
                    CatalogError::Storage(format!("Cannot remove {:?}: {}", path, e))
                })?;
            }
            let _catalog = Catalog::with_redb(path)?;
            println!("Initialized new redb database at {:?}", path);
        }
    }

    Ok(())
}

// =============================================================================
// QUERY COMMAND
// =============================================================================

/// Print the items matching a filter expression.
pub fn cmd_query(
    config: &Config,
    json_mode: bool,
    verbose: bool,
    filter: &str,
) -> Result<(), CatalogError> {
    let catalog = open_catalog(config)?;
    let result = catalog.filter_items(filter)?;

    let records = catalog.items_by_id(&result.items)?;
    let mut formats = LabelFormats::new();

    if json_mode {
        let items = records
            .iter()
            .map(|record| item_to_json(&catalog, &mut formats, record))
            .collect::<Result<Vec<_>, _>>()?;
        let output = serde_json::json!({
            "filter": filter,
            "used_keys": result.used_keys,
            "items": items,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return Ok(());
    }

    if verbose {
        let keys: Vec<&str> = result.used_keys.iter().map(String::as_str).collect();
        println!("Keys: {}", keys.join(", "));
    }
    println!("{} item(s) match", records.len());
    for record in &records {
        println!(
            "  #{:<6} {}",
            record.id(),
            label_or_attributes(&catalog, &mut formats, record)?
        );
    }

    Ok(())
}

// =============================================================================
// KEYS COMMAND
// =============================================================================

/// Show attribute keys used at least `at_least` times.
pub fn cmd_keys(config: &Config, json_mode: bool, at_least: usize) -> Result<(), CatalogError> {
    let catalog = open_catalog(config)?;
    let usage = catalog.key_usage(at_least)?;

    if json_mode {
        println!(
            "{}",
            serde_json::to_string_pretty(&usage).unwrap_or_default()
        );
        return Ok(());
    }

    println!("{:<32} {:>6}  KINDS", "KEY", "USES");
    for entry in &usage {
        let kinds: Vec<String> = entry
            .counts
            .iter()
            .map(|(kind, count)| format!("{}: {}", kind, count))
            .collect();
        println!("{:<32} {:>6}  {}", entry.key, entry.total, kinds.join(", "));
    }

    Ok(())
}

// =============================================================================
// TREE COMMAND
// =============================================================================

/// Print the subtree below a node.
pub fn cmd_tree(
    config: &Config,
    json_mode: bool,
    kind: &str,
    id: u64,
    depth: usize,
) -> Result<(), CatalogError> {
    let kind = TreeKind::from_tag(kind)
        .ok_or_else(|| CatalogError::InvalidArgument(format!("unknown tree: {}", kind)))?;
    let catalog = open_catalog(config)?;
    let subtree = catalog.descendants(kind, NodeId(id), depth)?;

    if json_mode {
        println!(
            "{}",
            serde_json::to_string_pretty(&subtree).unwrap_or_default()
        );
        return Ok(());
    }

    let mut lines = Vec::new();
    render_subtree(&subtree, subtree.root, 0, &mut lines);
    for line in lines {
        println!("{}", line);
    }

    Ok(())
}

/// Indented `name (#id)` lines, depth first in id order.
fn render_subtree(subtree: &Subtree, id: NodeId, level: usize, lines: &mut Vec<String>) {
    if let Some(node) = subtree.nodes.get(&id) {
        lines.push(format!(
            "{}{} (#{})",
            "  ".repeat(level),
            node.display_name(),
            node.id.0
        ));
    }
    for child in subtree.children_of(id) {
        render_subtree(subtree, *child, level + 1, lines);
    }
}

// =============================================================================
// ITEM COMMANDS
// =============================================================================

/// Show one item with its attributes and locations.
pub fn cmd_item_show(config: &Config, json_mode: bool, id: u64) -> Result<(), CatalogError> {
    let catalog = open_catalog(config)?;
    let record = catalog.item(ItemId(id))?;
    let locations = catalog.locations_of(record.id())?;
    let mut formats = LabelFormats::new();

    if json_mode {
        let output = serde_json::json!({
            "item": item_to_json(&catalog, &mut formats, &record)?,
            "locations": locations,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return Ok(());
    }

    println!("Item #{}", record.id());
    if let Ok(label) = formats.render(catalog.store(), record.template(), &record) {
        println!("Label:    {}", label);
    }
    println!(
        "Category: {}",
        catalog.node(TreeKind::Category, record.category())?.display_name()
    );
    println!(
        "Template: {}",
        catalog.node(TreeKind::Template, record.template())?.display_name()
    );
    println!();
    println!("Attributes:");
    for (key, value) in record.items()? {
        println!("  {:<24} {:<7} {}", key, value.kind(), value);
    }
    if !locations.is_empty() {
        println!();
        println!("Locations:");
        for location in &locations {
            let container = catalog.node(TreeKind::Container, location.container)?;
            println!("  {:<24} x{}", container.display_name(), location.amount);
        }
    }

    Ok(())
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Open the catalog selected by the configuration.
pub fn open_catalog(config: &Config) -> Result<Catalog, CatalogError> {
    match config.storage.backend {
        Backend::Memory => Ok(Catalog::new()),
        Backend::Redb => Catalog::with_redb(&config.storage.path),
    }
}

fn item_to_json(
    catalog: &Catalog,
    formats: &mut LabelFormats,
    record: &ItemRecord,
) -> Result<serde_json::Value, CatalogError> {
    let attributes: BTreeMap<&String, WireValue> = record
        .items()?
        .map(|(key, value)| (key, WireValue::from_scalar(value)))
        .collect();
    Ok(serde_json::json!({
        "id": record.id().0,
        "category": record.category().0,
        "template": record.template().0,
        "label": formats.render(catalog.store(), record.template(), record).ok(),
        "attributes": attributes,
    }))
}

/// Rendered label, or `key=value` pairs when the template has no usable
/// name format.
fn label_or_attributes(
    catalog: &Catalog,
    formats: &mut LabelFormats,
    record: &ItemRecord,
) -> Result<String, CatalogError> {
    match formats.render(catalog.store(), record.template(), record) {
        Ok(label) if !label.is_empty() => Ok(label),
        _ => Ok(record
            .items()?
            .map(|(key, value)| format!("{}={}", key, value))
            .collect::<Vec<_>>()
            .join(", ")),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use partsbin_core::primitives::ROOT_NODE;
    use partsbin_core::{Scalar, ScalarKind};

    fn memory_config() -> Config {
        let mut config = Config::default();
        config.storage.backend = Backend::Memory;
        config
    }

    #[test]
    fn test_render_subtree_indents_children() {
        let mut catalog = Catalog::new();
        let resistors = catalog
            .create_node(TreeKind::Category, "Resistors", ROOT_NODE)
            .expect("create");
        catalog
            .create_node(TreeKind::Category, "SMD", resistors.id)
            .expect("create");

        let subtree = catalog
            .descendants(TreeKind::Category, ROOT_NODE, 2)
            .expect("descendants");
        let mut lines = Vec::new();
        render_subtree(&subtree, subtree.root, 0, &mut lines);

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "Root (#0)");
        assert!(lines[1].starts_with("  Resistors"));
        assert!(lines[2].starts_with("    SMD"));
    }

    #[test]
    fn test_init_memory_backend_is_noop() {
        assert!(cmd_init(&memory_config(), false).is_ok());
    }

    #[test]
    fn test_init_refuses_existing_database() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = Config::default();
        config.storage.path = dir.path().join("parts.redb");

        cmd_init(&config, false).expect("first init");
        assert!(matches!(
            cmd_init(&config, false),
            Err(CatalogError::InvalidOperation(_))
        ));
        cmd_init(&config, true).expect("forced init");
    }

    #[test]
    fn test_tree_rejects_unknown_kind() {
        assert!(matches!(
            cmd_tree(&memory_config(), true, "shelf", 0, 1),
            Err(CatalogError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_label_or_attributes_falls_back_to_pairs() {
        let mut catalog = Catalog::new();
        let resistor = catalog
            .create_node(TreeKind::Template, "Resistor", ROOT_NODE)
            .expect("template");
        catalog
            .set_field(resistor.id, "package", ScalarKind::String)
            .expect("field");
        catalog
            .set_name_format(resistor.id, "{package} resistor")
            .expect("format");

        let package = BTreeMap::from([("package".to_string(), Scalar::string("0805"))]);
        let labelled = catalog
            .create_item(ROOT_NODE, resistor.id, package.clone())
            .expect("labelled");
        let plain = catalog
            .create_item(ROOT_NODE, ROOT_NODE, package)
            .expect("plain");

        let mut formats = LabelFormats::new();
        assert_eq!(
            label_or_attributes(&catalog, &mut formats, &labelled).expect("label"),
            "0805 resistor"
        );
        assert_eq!(
            label_or_attributes(&catalog, &mut formats, &plain).expect("pairs"),
            "package=0805"
        );
    }
}
