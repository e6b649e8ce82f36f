//! Shared fixtures for the integration suites

#![allow(dead_code)]

use std::sync::Arc;

use reqpulse::collection::{
    Collection, Folder, FolderSettings, Item, RequestDef, RequestItem,
};
use reqpulse::pipeline::ExecuteOptions;
use tempfile::TempDir;

/// A saved GET request item with the given uid and url.
pub fn get_item(uid: &str, url: &str) -> RequestItem {
    RequestItem {
        uid: uid.to_string(),
        name: uid.to_string(),
        request: RequestDef {
            method: "GET".to_string(),
            url: url.to_string(),
            ..Default::default()
        },
        draft: None,
    }
}

/// A collection holding the given top-level items.
pub fn collection_with(items: Vec<Item>) -> Arc<Collection> {
    Arc::new(Collection {
        uid: "col-1".to_string(),
        name: "integration".to_string(),
        items,
        ..Default::default()
    })
}

/// A folder node.
pub fn folder(uid: &str, settings: Option<FolderSettings>, items: Vec<Item>) -> Item {
    Item::Folder(Folder {
        uid: uid.to_string(),
        name: uid.to_string(),
        root: settings,
        items,
    })
}

/// Execute options rooted in a fresh temp data dir. The TempDir must stay
/// alive for the duration of the run.
pub fn options_in(
    dir: &TempDir,
    item: RequestItem,
    collection: Arc<Collection>,
) -> ExecuteOptions {
    ExecuteOptions::new(item, collection, dir.path())
}

/// Install a test subscriber once; engine and script logs show up under
/// `--nocapture` with RUST_LOG set.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
