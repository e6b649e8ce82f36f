//! The per-run request context
//!
//! One `RequestContext` is the single mutable unit of work: created by the
//! entry point, mutated in place by every stage, returned to the caller.
//! It is never shared between concurrent runs; the only cross-run state it
//! touches is the collection's runtime variable store and the cookie jar.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use indexmap::IndexMap;
use reqwest::cookie::Jar;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::client::{HttpRequestSpec, HttpResponse, PreviewType};
use crate::collection::{Collection, Environment, RequestDef, RequestItem};
use crate::config::Preferences;
use crate::errors::EngineError;
use crate::vars::{entries_to_scope, process_scope, VariableBag};

use super::assertions::AssertionResult;
use super::debug::DebugTrail;
use super::hooks::{AuthCodeFetcher, LifecycleHooks, NoopHooks};
use super::tests::TestResult;
use super::timings::Timings;

/// How the run was started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Single request run from the request editor
    Standalone,
    /// Part of a collection/folder runner batch
    Runner,
}

/// Orchestrator states; `Failed` is terminal and reachable from the three
/// middle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RunState {
    Pending,
    PreRequest,
    Sending,
    PostRequest,
    Completed,
    Failed,
}

/// Everything the host hands the engine for one run
pub struct ExecuteOptions {
    pub item: RequestItem,
    pub collection: Arc<Collection>,
    pub global_variables: IndexMap<String, JsonValue>,
    pub preferences: Preferences,
    pub cookie_jar: Arc<Jar>,
    pub data_dir: PathBuf,
    pub cancel: CancellationToken,
    pub engine_version: String,
    pub mode: ExecutionMode,
    pub fetch_authorization_code: Option<AuthCodeFetcher>,
    pub environment: Option<Environment>,
    pub hooks: Arc<dyn LifecycleHooks>,
}

impl ExecuteOptions {
    /// Options with host-neutral defaults; callers override what they need.
    pub fn new(
        item: RequestItem,
        collection: Arc<Collection>,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            item,
            collection,
            global_variables: IndexMap::new(),
            preferences: Preferences::default(),
            cookie_jar: Arc::new(Jar::default()),
            data_dir: data_dir.into(),
            cancel: CancellationToken::new(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            mode: ExecutionMode::Standalone,
            fetch_authorization_code: None,
            environment: None,
            hooks: Arc::new(NoopHooks),
        }
    }
}

/// The mutable unit of work for one run
pub struct RequestContext {
    pub uid: String,
    pub data_dir: PathBuf,
    pub cancel: CancellationToken,
    pub engine_version: String,
    pub environment_name: Option<String>,
    pub mode: ExecutionMode,

    pub item: RequestItem,
    pub collection: Arc<Collection>,
    pub preferences: Preferences,
    pub cookie_jar: Arc<Jar>,
    pub variables: VariableBag,
    pub hooks: Arc<dyn LifecycleHooks>,
    pub auth_code_fetcher: Option<AuthCodeFetcher>,

    pub timings: Timings,
    pub debug: DebugTrail,

    pub state: RunState,
    /// Working copy of the request definition the stages transform
    pub resolved_request: RequestDef,
    pub http_request: Option<HttpRequestSpec>,
    pub response: Option<HttpResponse>,
    pub response_body: Option<Bytes>,
    pub preview: Option<PreviewType>,
    pub assertion_results: Vec<AssertionResult>,
    pub test_results: Vec<TestResult>,
    pub error: Option<EngineError>,
}

impl RequestContext {
    pub(crate) fn new(opts: ExecuteOptions) -> Self {
        let environment_name = opts.environment.as_ref().map(|env| env.name.clone());

        let resolved_request = opts.item.effective_request().clone();

        let mut variables = VariableBag {
            process: process_scope(&opts.collection.process_env),
            ..Default::default()
        };
        if let Some(environment) = &opts.environment {
            variables.environment = entries_to_scope(&environment.variables);
        }
        if let Some(root) = &opts.collection.root {
            variables.collection = entries_to_scope(&root.vars.pre);
        }
        variables.global = opts.global_variables;
        variables.request = entries_to_scope(&resolved_request.vars.pre);
        // Runtime variables live on the collection and persist across runs.
        variables.runtime = opts.collection.runtime_snapshot();

        Self {
            uid: Uuid::new_v4().to_string(),
            data_dir: opts.data_dir,
            cancel: opts.cancel,
            engine_version: opts.engine_version,
            environment_name,
            mode: opts.mode,
            item: opts.item,
            collection: opts.collection,
            preferences: opts.preferences,
            cookie_jar: opts.cookie_jar,
            variables,
            hooks: opts.hooks,
            auth_code_fetcher: opts.fetch_authorization_code,
            timings: Timings::new(),
            debug: DebugTrail::new(),
            state: RunState::Pending,
            resolved_request,
            http_request: None,
            response: None,
            response_body: None,
            preview: None,
            assertion_results: Vec::new(),
            test_results: Vec::new(),
            error: None,
        }
    }

    /// Where this item's response body lives on disk.
    pub fn artifact_path(&self) -> PathBuf {
        self.data_dir.join(&self.item.uid)
    }

    /// The read-back response body as text, empty before the response is
    /// persisted.
    pub fn response_body_text(&self) -> String {
        self.response_body
            .as_ref()
            .map(|body| String::from_utf8_lossy(body).to_string())
            .unwrap_or_default()
    }
}
