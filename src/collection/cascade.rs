//! Folder settings cascade
//!
//! Walks the collection tree from the root to the target item's parent
//! folder and accumulates inheritable settings. Near wins over far for
//! headers and auth; scripts and tests concatenate root-to-leaf so outer
//! hooks always run before inner ones.

use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use super::{
    AuthConfig, Collection, Folder, FolderSettings, HeaderEntry, Item, RequestDef,
};

/// Folder-level settings gathered for one run, ordered root-to-leaf.
///
/// Produced fresh per run and never cached; the collection tree may change
/// between runs.
#[derive(Debug, Clone, Default)]
pub struct FolderData {
    pub levels: Vec<FolderSettings>,
}

impl FolderData {
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

/// Collect the folder cascade for `item_uid`.
///
/// Returns the ordered folder settings plus the accumulated folder-scope
/// variables (leaf overrides root). An item that is not in the tree yields
/// an empty result; that is a caller precondition violation, not an error.
pub fn collect_folder_data(
    collection: &Collection,
    item_uid: &str,
) -> (FolderData, IndexMap<String, JsonValue>) {
    let mut path: Vec<&Folder> = Vec::new();
    if !find_item_path(&collection.items, item_uid, &mut path) {
        return (FolderData::default(), IndexMap::new());
    }

    let mut levels = Vec::with_capacity(path.len());
    let mut folder_vars = IndexMap::new();
    for folder in &path {
        if let Some(settings) = &folder.root {
            for var in &settings.vars.pre {
                if var.enabled {
                    folder_vars.insert(var.name.clone(), JsonValue::String(var.value.clone()));
                }
            }
            levels.push(settings.clone());
        }
    }

    (FolderData { levels }, folder_vars)
}

/// Depth-first search for the item, recording the folders on the path.
fn find_item_path<'a>(items: &'a [Item], item_uid: &str, path: &mut Vec<&'a Folder>) -> bool {
    for item in items {
        match item {
            Item::Request(request) if request.uid == item_uid => return true,
            Item::Request(_) => {}
            Item::Folder(folder) => {
                path.push(folder);
                if find_item_path(&folder.items, item_uid, path) {
                    return true;
                }
                path.pop();
            }
        }
    }
    false
}

/// Merge headers across the cascade: collection root, then folders
/// root-to-leaf, then the request itself. Later levels override earlier
/// ones case-insensitively; disabled entries never participate.
pub fn merged_headers(
    collection: &Collection,
    folder_data: &FolderData,
    request: &RequestDef,
) -> Vec<HeaderEntry> {
    let mut merged: IndexMap<String, HeaderEntry> = IndexMap::new();

    let mut apply = |entries: &[HeaderEntry]| {
        for entry in entries {
            if !entry.enabled || entry.name.is_empty() {
                continue;
            }
            merged.insert(entry.name.to_ascii_lowercase(), entry.clone());
        }
    };

    if let Some(root) = &collection.root {
        apply(&root.headers);
    }
    for level in &folder_data.levels {
        apply(&level.headers);
    }
    apply(&request.headers);

    merged.into_values().collect()
}

/// Resolve the effective auth for a request: the request's own mode unless
/// it inherits, then the nearest enclosing folder with a concrete mode,
/// then the collection root. A fully-inherited chain resolves to no auth.
pub fn effective_auth(
    collection: &Collection,
    folder_data: &FolderData,
    request: &RequestDef,
) -> AuthConfig {
    if !request.auth.is_inherit() {
        return request.auth.clone();
    }

    for level in folder_data.levels.iter().rev() {
        if !level.auth.is_inherit() {
            return level.auth.clone();
        }
    }

    match &collection.root {
        Some(root) if !root.auth.is_inherit() => root.auth.clone(),
        _ => AuthConfig::None,
    }
}

/// Pre-request script chain, outermost first.
pub fn pre_script_chain(
    collection: &Collection,
    folder_data: &FolderData,
    request: &RequestDef,
) -> Vec<String> {
    script_chain(collection, folder_data, request, |pair| pair.pre.as_ref())
}

/// Post-request script chain, outermost first.
pub fn post_script_chain(
    collection: &Collection,
    folder_data: &FolderData,
    request: &RequestDef,
) -> Vec<String> {
    script_chain(collection, folder_data, request, |pair| pair.post.as_ref())
}

fn script_chain(
    collection: &Collection,
    folder_data: &FolderData,
    request: &RequestDef,
    select: impl Fn(&super::ScriptPair) -> Option<&String>,
) -> Vec<String> {
    let mut chain = Vec::new();
    if let Some(root) = &collection.root {
        if let Some(source) = select(&root.script) {
            push_nonempty(&mut chain, source);
        }
    }
    for level in &folder_data.levels {
        if let Some(source) = select(&level.script) {
            push_nonempty(&mut chain, source);
        }
    }
    if let Some(source) = select(&request.script) {
        push_nonempty(&mut chain, source);
    }
    chain
}

/// Test script chain, outermost first.
pub fn test_script_chain(
    collection: &Collection,
    folder_data: &FolderData,
    request: &RequestDef,
) -> Vec<String> {
    let mut chain = Vec::new();
    if let Some(root) = &collection.root {
        if let Some(source) = &root.tests {
            push_nonempty(&mut chain, source);
        }
    }
    for level in &folder_data.levels {
        if let Some(source) = &level.tests {
            push_nonempty(&mut chain, source);
        }
    }
    if let Some(source) = &request.tests {
        push_nonempty(&mut chain, source);
    }
    chain
}

fn push_nonempty(chain: &mut Vec<String>, source: &str) {
    if !source.trim().is_empty() {
        chain.push(source.to_string());
    }
}
