//! Variable scopes and merge precedence
//!
//! A run sees variables from seven scopes. Merging flattens them into one
//! lookup map with a fixed precedence, lowest to highest: process,
//! environment, collection, global, request, runtime, folder. A later
//! scope's variable shadows an earlier one of the same name.
//!
//! Disabled entries are excluded by the stage that loads each scope, so the
//! bag itself only ever holds effective values.

pub mod interpolate;

use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use crate::collection::VarEntry;

/// Scope identifiers, in merge order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Process,
    Environment,
    Collection,
    Global,
    Request,
    Runtime,
    Folder,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Process => "process",
            Scope::Environment => "environment",
            Scope::Collection => "collection",
            Scope::Global => "global",
            Scope::Request => "request",
            Scope::Runtime => "runtime",
            Scope::Folder => "folder",
        }
    }

    pub fn parse(name: &str) -> Option<Scope> {
        match name {
            "process" => Some(Scope::Process),
            "environment" => Some(Scope::Environment),
            "collection" => Some(Scope::Collection),
            "global" => Some(Scope::Global),
            "request" => Some(Scope::Request),
            "runtime" => Some(Scope::Runtime),
            "folder" => Some(Scope::Folder),
            _ => None,
        }
    }
}

/// All variable scopes for one run.
#[derive(Debug, Clone, Default)]
pub struct VariableBag {
    pub process: IndexMap<String, JsonValue>,
    pub environment: IndexMap<String, JsonValue>,
    pub collection: IndexMap<String, JsonValue>,
    pub global: IndexMap<String, JsonValue>,
    pub request: IndexMap<String, JsonValue>,
    pub runtime: IndexMap<String, JsonValue>,
    pub folder: IndexMap<String, JsonValue>,
}

impl VariableBag {
    pub fn scope(&self, scope: Scope) -> &IndexMap<String, JsonValue> {
        match scope {
            Scope::Process => &self.process,
            Scope::Environment => &self.environment,
            Scope::Collection => &self.collection,
            Scope::Global => &self.global,
            Scope::Request => &self.request,
            Scope::Runtime => &self.runtime,
            Scope::Folder => &self.folder,
        }
    }

    pub fn scope_mut(&mut self, scope: Scope) -> &mut IndexMap<String, JsonValue> {
        match scope {
            Scope::Process => &mut self.process,
            Scope::Environment => &mut self.environment,
            Scope::Collection => &mut self.collection,
            Scope::Global => &mut self.global,
            Scope::Request => &mut self.request,
            Scope::Runtime => &mut self.runtime,
            Scope::Folder => &mut self.folder,
        }
    }

    /// Merge every scope into one flat map, later scopes shadowing earlier
    /// ones.
    pub fn flatten(&self) -> IndexMap<String, JsonValue> {
        let mut flat = IndexMap::new();
        for scope in [
            Scope::Process,
            Scope::Environment,
            Scope::Collection,
            Scope::Global,
            Scope::Request,
            Scope::Runtime,
            Scope::Folder,
        ] {
            for (name, value) in self.scope(scope) {
                flat.insert(name.clone(), value.clone());
            }
        }
        flat
    }
}

/// Convert a list of variable definitions into a scope map, dropping
/// disabled entries.
pub fn entries_to_scope(entries: &[VarEntry]) -> IndexMap<String, JsonValue> {
    entries
        .iter()
        .filter(|entry| entry.enabled)
        .map(|entry| (entry.name.clone(), JsonValue::String(entry.value.clone())))
        .collect()
}

/// Build the process scope from the host environment plus collection-level
/// overrides. Keys are exposed as `process.env.NAME`, matching how scripts
/// and templates reference them.
pub fn process_scope(
    overrides: &IndexMap<String, String>,
) -> IndexMap<String, JsonValue> {
    let mut scope: IndexMap<String, JsonValue> = std::env::vars()
        .map(|(name, value)| (format!("process.env.{name}"), JsonValue::String(value)))
        .collect();
    for (name, value) in overrides {
        scope.insert(
            format!("process.env.{name}"),
            JsonValue::String(value.clone()),
        );
    }
    scope
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_precedence_order() {
        let mut bag = VariableBag::default();
        bag.environment
            .insert("host".to_string(), serde_json::json!("env.example.com"));
        bag.collection
            .insert("host".to_string(), serde_json::json!("col.example.com"));
        bag.runtime
            .insert("host".to_string(), serde_json::json!("run.example.com"));
        bag.folder
            .insert("host".to_string(), serde_json::json!("folder.example.com"));

        let flat = bag.flatten();
        assert_eq!(flat.get("host"), Some(&serde_json::json!("folder.example.com")));
    }

    #[test]
    fn test_flatten_keeps_lower_scopes_without_shadow() {
        let mut bag = VariableBag::default();
        bag.environment
            .insert("only_env".to_string(), serde_json::json!("x"));
        bag.request
            .insert("only_req".to_string(), serde_json::json!("y"));

        let flat = bag.flatten();
        assert_eq!(flat.get("only_env"), Some(&serde_json::json!("x")));
        assert_eq!(flat.get("only_req"), Some(&serde_json::json!("y")));
    }

    #[test]
    fn test_disabled_entries_excluded_from_scope() {
        let entries = vec![
            VarEntry::new("a", "1"),
            VarEntry {
                name: "b".to_string(),
                value: "2".to_string(),
                enabled: false,
            },
        ];
        let scope = entries_to_scope(&entries);
        assert!(scope.contains_key("a"));
        assert!(!scope.contains_key("b"));
    }

    #[test]
    fn test_process_scope_overrides() {
        let mut overrides = IndexMap::new();
        overrides.insert("REQPULSE_TEST_ONLY".to_string(), "override".to_string());
        let scope = process_scope(&overrides);
        assert_eq!(
            scope.get("process.env.REQPULSE_TEST_ONLY"),
            Some(&serde_json::json!("override"))
        );
    }

    #[test]
    fn test_scope_parse_roundtrip() {
        for scope in [
            Scope::Process,
            Scope::Environment,
            Scope::Collection,
            Scope::Global,
            Scope::Request,
            Scope::Runtime,
            Scope::Folder,
        ] {
            assert_eq!(Scope::parse(scope.as_str()), Some(scope));
        }
        assert_eq!(Scope::parse("nope"), None);
    }
}
