//! Collection data model
//!
//! A collection is a tree of folders and request items plus collection-level
//! settings (headers, auth, scripts, variables). Every user-editable list
//! entry carries an `enabled` flag; disabled entries are skipped wherever the
//! list is consumed.
//!
//! User-facing maps use [`IndexMap`] so the order in which the user declared
//! headers and variables survives serialization and request assembly.

pub mod cascade;

use dashmap::DashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

fn default_enabled() -> bool {
    true
}

/// A named variable definition, request- or folder-scoped
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarEntry {
    pub name: String,
    pub value: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl VarEntry {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            enabled: true,
        }
    }
}

/// A post-response variable definition: `expr` is evaluated against the
/// response (e.g. `res.body.token`) and the result is written to the
/// runtime scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostVarEntry {
    pub name: String,
    pub expr: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// A request header entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderEntry {
    pub name: String,
    pub value: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl HeaderEntry {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            enabled: true,
        }
    }
}

/// A query parameter entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryParamEntry {
    pub name: String,
    pub value: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// A form field entry for url-encoded bodies
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormEntry {
    pub name: String,
    pub value: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// Request body variants
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum RequestBodyDef {
    #[default]
    None,
    Text {
        content: String,
    },
    Json {
        content: String,
    },
    Xml {
        content: String,
    },
    FormUrlEncoded {
        fields: Vec<FormEntry>,
    },
}

/// OAuth2 grant types supported by the resolver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OAuth2GrantType {
    ClientCredentials,
    Password,
    AuthorizationCode,
}

/// OAuth2 configuration attached to a request, folder, or collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuth2Config {
    pub grant_type: OAuth2GrantType,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    pub token_url: String,
    /// Authorization endpoint, authorization_code grant only
    #[serde(default)]
    pub authorize_url: Option<String>,
    /// Redirect URI registered with the provider, authorization_code only
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    /// Use PKCE for the authorization_code grant
    #[serde(default)]
    pub pkce: bool,
}

/// Authentication configuration
///
/// `Inherit` defers to the nearest enclosing folder with a concrete auth
/// mode, then to the collection root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum AuthConfig {
    #[default]
    Inherit,
    None,
    Basic {
        username: String,
        password: String,
    },
    Bearer {
        token: String,
    },
    #[serde(rename = "oauth2")]
    OAuth2(OAuth2Config),
}

impl AuthConfig {
    pub fn is_inherit(&self) -> bool {
        matches!(self, AuthConfig::Inherit)
    }
}

/// Pre/post request script sources
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptPair {
    #[serde(default)]
    pub pre: Option<String>,
    #[serde(default)]
    pub post: Option<String>,
}

/// Variable definitions attached to a request, folder, or collection root
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VarDefs {
    /// Merged into the owning scope before the request is sent
    #[serde(default)]
    pub pre: Vec<VarEntry>,
    /// Evaluated against the response, written to the runtime scope
    #[serde(default)]
    pub post: Vec<PostVarEntry>,
}

/// A declarative assertion: `expr` is resolved against the merged variable
/// map extended with `res.*` accessors and compared to `value` using
/// `operator`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertionDef {
    pub expr: String,
    pub operator: String,
    #[serde(default)]
    pub value: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// A fully-editable request definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestDef {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: Vec<HeaderEntry>,
    #[serde(default)]
    pub params: Vec<QueryParamEntry>,
    #[serde(default)]
    pub body: RequestBodyDef,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub script: ScriptPair,
    #[serde(default)]
    pub tests: Option<String>,
    #[serde(default)]
    pub vars: VarDefs,
    #[serde(default)]
    pub assertions: Vec<AssertionDef>,
}

/// A saved request item, optionally shadowed by an unsaved draft
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestItem {
    pub uid: String,
    pub name: String,
    pub request: RequestDef,
    #[serde(default)]
    pub draft: Option<RequestDef>,
}

impl RequestItem {
    /// The definition a run should execute: the draft when one exists.
    pub fn effective_request(&self) -> &RequestDef {
        self.draft.as_ref().unwrap_or(&self.request)
    }
}

/// Settings carried by a folder (or the collection root)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FolderSettings {
    #[serde(default)]
    pub headers: Vec<HeaderEntry>,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub script: ScriptPair,
    #[serde(default)]
    pub tests: Option<String>,
    #[serde(default)]
    pub vars: VarDefs,
}

/// A folder in the collection tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Folder {
    pub uid: String,
    pub name: String,
    #[serde(default)]
    pub root: Option<FolderSettings>,
    #[serde(default)]
    pub items: Vec<Item>,
}

/// A node in the collection tree
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Item {
    Folder(Folder),
    Request(RequestItem),
}

/// The owning collection
///
/// Shared across concurrent runs behind an `Arc`; the runtime variable
/// store is the only part mutated after construction and uses a concurrent
/// map so script writes from one run are visible to the next.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Collection {
    pub uid: String,
    pub name: String,
    #[serde(default)]
    pub root: Option<FolderSettings>,
    #[serde(default)]
    pub items: Vec<Item>,
    /// Collection-level overrides for the process environment scope
    #[serde(default)]
    pub process_env: IndexMap<String, String>,
    /// Runtime variable store; prefer the accessor methods over direct use
    #[serde(skip)]
    pub runtime: DashMap<String, JsonValue>,
}

impl Collection {
    pub fn set_runtime_var(&self, name: impl Into<String>, value: JsonValue) {
        self.runtime.insert(name.into(), value);
    }

    pub fn runtime_var(&self, name: &str) -> Option<JsonValue> {
        self.runtime.get(name).map(|entry| entry.value().clone())
    }

    /// Point-in-time copy of the runtime scope taken at run start.
    pub fn runtime_snapshot(&self) -> IndexMap<String, JsonValue> {
        self.runtime
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

/// An active environment selected by the host for a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub name: String,
    #[serde(default)]
    pub variables: Vec<VarEntry>,
}
