//! Catalog setup for host applications.
//!
//! Hosts call [`build_catalog`] at startup with whatever plugin manifests
//! they discovered. Built-in kinds come from `inventory`; plugin kinds are
//! layered on top and override a built-in with the same kind.

use serde_json::Value;
use staging_engine::{NodeCatalog, NodeDefinition, ParamSchema, Result, StagingError};

/// Parse one plugin manifest into a node definition.
///
/// The manifest has the `NodeDefinition` shape, except that `param_schema`
/// is a JSON-schema style object (`properties` with `type`, `minimum`,
/// `maximum`, `default`, `tunable`, `description`).
pub fn plugin_definition(manifest: &Value) -> Result<NodeDefinition> {
    let mut manifest = manifest.clone();
    let schema = manifest
        .as_object_mut()
        .ok_or_else(|| StagingError::parse("plugin manifest must be an object"))?
        .remove("param_schema")
        .unwrap_or(Value::Null);

    let mut definition: NodeDefinition = serde_json::from_value(manifest)
        .map_err(|e| StagingError::parse(format!("invalid plugin manifest: {}", e)))?;
    definition.param_schema = ParamSchema::from_json_schema(&schema)?;
    Ok(definition)
}

/// Built-in catalog plus plugin kinds.
///
/// A manifest that fails to parse is skipped with a warning so one bad
/// plugin cannot hide the rest.
///
/// # Example
///
/// ```ignore
/// let catalog = staging_nodes::build_catalog(&discovered_manifests);
/// let service = StagingService::new(Arc::new(catalog), config, runtime, events);
/// ```
pub fn build_catalog(plugins: &[Value]) -> NodeCatalog {
    let mut catalog = NodeCatalog::with_builtins();
    log::info!("Loaded {} built-in node kinds", catalog.len());

    for manifest in plugins {
        match plugin_definition(manifest) {
            Ok(definition) => {
                if catalog.has_kind(&definition.kind) {
                    log::warn!("Plugin kind '{}' overrides a built-in", definition.kind);
                }
                log::debug!("Registered plugin kind '{}'", definition.kind);
                catalog.register(definition);
            }
            Err(e) => log::warn!("Skipping plugin manifest: {}", e),
        }
    }
    catalog
}
