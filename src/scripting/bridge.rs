//! The sandbox capability surface
//!
//! Every host facility a script may touch is registered here as a Rune
//! module closing over the shared per-run [`SandboxState`]. Scripts get
//! variable access (`vars`), the current request (`req`), the response
//! after sending (`res`), expectation recording (`test`), a logger
//! (`console`), and OAuth2 cache control (`auth`). Writes land in the
//! state and are drained by the pipeline once the session ends.

use std::sync::{Arc, Mutex, MutexGuard};

use indexmap::IndexMap;
use rune::alloc::String as RuneString;
use rune::{ContextError, Module};
use serde_json::Value as JsonValue;

use crate::collection::{HeaderEntry, RequestBodyDef, RequestDef};
use crate::pipeline::tests::TestResult;
use crate::vars::interpolate::value_to_string;
use crate::vars::{Scope, VariableBag};

/// Log severity recorded from script `console` calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Log,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Log => "log",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// One captured console line
#[derive(Debug, Clone)]
pub struct LogLine {
    pub level: LogLevel,
    pub message: String,
}

/// The request as scripts see it
#[derive(Debug, Clone, Default)]
pub struct RequestView {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RequestView {
    /// Snapshot the working request definition for script access.
    pub fn from_request(request: &RequestDef) -> Self {
        let body = match &request.body {
            RequestBodyDef::None => String::new(),
            RequestBodyDef::Text { content }
            | RequestBodyDef::Json { content }
            | RequestBodyDef::Xml { content } => content.clone(),
            RequestBodyDef::FormUrlEncoded { fields } => fields
                .iter()
                .filter(|field| field.enabled)
                .map(|field| format!("{}={}", field.name, field.value))
                .collect::<Vec<_>>()
                .join("&"),
        };
        Self {
            method: request.method.clone(),
            url: request.url.clone(),
            headers: request
                .headers
                .iter()
                .filter(|header| header.enabled)
                .map(|header| (header.name.clone(), header.value.clone()))
                .collect(),
            body,
        }
    }

    /// Write script mutations back into the request definition.
    pub fn apply_to(&self, request: &mut RequestDef) {
        request.url = self.url.clone();
        request.headers = self
            .headers
            .iter()
            .map(|(name, value)| HeaderEntry::new(name.clone(), value.clone()))
            .collect();
        match &mut request.body {
            RequestBodyDef::Text { content }
            | RequestBodyDef::Json { content }
            | RequestBodyDef::Xml { content } => {
                *content = self.body.clone();
            }
            RequestBodyDef::None if !self.body.is_empty() => {
                request.body = RequestBodyDef::Text {
                    content: self.body.clone(),
                };
            }
            _ => {}
        }
    }
}

/// The response as scripts see it
#[derive(Debug, Clone, Default)]
pub struct ResponseView {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body_text: String,
    pub elapsed_ms: u64,
}

impl ResponseView {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header_name, _)| header_name.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn body_json(&self) -> Option<JsonValue> {
        serde_json::from_str(&self.body_text).ok()
    }
}

/// Navigate a parsed JSON value by dotted path with `[idx]` array access,
/// e.g. `user.emails[0]` or `.data.items[2].id`.
pub fn json_path<'a>(root: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    let mut current = root;
    for part in path.trim_start_matches('.').split('.') {
        if part.is_empty() {
            continue;
        }
        let (key, indices) = match part.find('[') {
            Some(bracket) => (&part[..bracket], &part[bracket..]),
            None => (part, ""),
        };
        if !key.is_empty() {
            current = current.get(key)?;
        }
        let mut rest = indices;
        while let Some(stripped) = rest.strip_prefix('[') {
            let close = stripped.find(']')?;
            let index: usize = stripped[..close].parse().ok()?;
            current = current.as_array()?.get(index)?;
            rest = &stripped[close + 1..];
        }
    }
    Some(current)
}

/// Mutable state shared between the pipeline and the script modules for
/// the duration of one sandbox session.
#[derive(Debug, Default)]
pub struct SandboxState {
    pub bag: VariableBag,
    pub flat: IndexMap<String, JsonValue>,
    pub request: RequestView,
    pub response: Option<ResponseView>,
    pub tests: Vec<TestResult>,
    pub logs: Vec<LogLine>,
    /// Runtime-scope writes to persist into the collection store
    pub runtime_writes: Vec<(String, JsonValue)>,
}

impl SandboxState {
    pub fn new(bag: VariableBag, request: RequestView) -> Self {
        let flat = bag.flatten();
        Self {
            bag,
            flat,
            request,
            ..Default::default()
        }
    }

    fn write_var(&mut self, scope: Scope, name: &str, value: JsonValue) {
        self.bag.scope_mut(scope).insert(name.to_string(), value.clone());
        if scope == Scope::Runtime {
            self.runtime_writes.push((name.to_string(), value));
        }
        // Re-flatten so precedence still holds when a shadowed scope was
        // written.
        self.flat = self.bag.flatten();
    }
}

pub type SharedState = Arc<Mutex<SandboxState>>;

/// Lock the shared state, recovering from poisoning; bridge calls must
/// never panic into the VM.
pub(crate) fn lock(state: &SharedState) -> MutexGuard<'_, SandboxState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn rune_string(value: String) -> RuneString {
    RuneString::try_from(value).unwrap_or_default()
}

/// Parse a script-provided value: JSON when it parses, bare string
/// otherwise.
fn parse_value(raw: &str) -> JsonValue {
    serde_json::from_str(raw).unwrap_or_else(|_| JsonValue::String(raw.to_string()))
}

/// Build every capability module for one session.
pub fn capability_modules(state: &SharedState) -> Result<Vec<Module>, ContextError> {
    Ok(vec![
        vars_module(state)?,
        req_module(state)?,
        res_module(state)?,
        test_module(state)?,
        console_module(state)?,
        auth_module()?,
    ])
}

fn vars_module(state: &SharedState) -> Result<Module, ContextError> {
    let mut module = Module::with_crate("vars")?;

    let st = state.clone();
    module
        .function("get", move |name: &str| -> RuneString {
            let guard = lock(&st);
            rune_string(guard.flat.get(name).map(value_to_string).unwrap_or_default())
        })
        .build()?;

    let st = state.clone();
    module
        .function("has", move |name: &str| -> bool {
            lock(&st).flat.contains_key(name)
        })
        .build()?;

    let st = state.clone();
    module
        .function("get_from", move |scope: &str, name: &str| -> RuneString {
            let guard = lock(&st);
            let value = Scope::parse(scope)
                .and_then(|scope| guard.bag.scope(scope).get(name))
                .map(value_to_string)
                .unwrap_or_default();
            rune_string(value)
        })
        .build()?;

    // Plain `set` targets the runtime scope: the only scope that persists
    // across runs and the one scripts almost always mean.
    let st = state.clone();
    module
        .function("set", move |name: &str, value: &str| {
            lock(&st).write_var(Scope::Runtime, name, parse_value(value));
        })
        .build()?;

    let st = state.clone();
    module
        .function("set_in", move |scope: &str, name: &str, value: &str| {
            match Scope::parse(scope) {
                Some(scope) => lock(&st).write_var(scope, name, parse_value(value)),
                None => tracing::warn!(scope, name, "script wrote to unknown variable scope"),
            }
        })
        .build()?;

    Ok(module)
}

fn req_module(state: &SharedState) -> Result<Module, ContextError> {
    let mut module = Module::with_crate("req")?;

    let st = state.clone();
    module
        .function("method", move || -> RuneString {
            rune_string(lock(&st).request.method.clone())
        })
        .build()?;

    let st = state.clone();
    module
        .function("url", move || -> RuneString {
            rune_string(lock(&st).request.url.clone())
        })
        .build()?;

    let st = state.clone();
    module
        .function("body", move || -> RuneString {
            rune_string(lock(&st).request.body.clone())
        })
        .build()?;

    let st = state.clone();
    module
        .function("header", move |name: &str| -> RuneString {
            let guard = lock(&st);
            let value = guard
                .request
                .headers
                .iter()
                .find(|(header_name, _)| header_name.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.clone())
                .unwrap_or_default();
            rune_string(value)
        })
        .build()?;

    let st = state.clone();
    module
        .function("set_url", move |url: &str| {
            lock(&st).request.url = url.to_string();
        })
        .build()?;

    let st = state.clone();
    module
        .function("set_body", move |body: &str| {
            lock(&st).request.body = body.to_string();
        })
        .build()?;

    let st = state.clone();
    module
        .function("set_header", move |name: &str, value: &str| {
            let mut guard = lock(&st);
            match guard
                .request
                .headers
                .iter_mut()
                .find(|(header_name, _)| header_name.eq_ignore_ascii_case(name))
            {
                Some((_, existing)) => *existing = value.to_string(),
                None => guard
                    .request
                    .headers
                    .push((name.to_string(), value.to_string())),
            }
        })
        .build()?;

    Ok(module)
}

fn res_module(state: &SharedState) -> Result<Module, ContextError> {
    let mut module = Module::with_crate("res")?;

    let st = state.clone();
    module
        .function("status", move || -> i64 {
            lock(&st).response.as_ref().map(|r| r.status as i64).unwrap_or(0)
        })
        .build()?;

    let st = state.clone();
    module
        .function("status_text", move || -> RuneString {
            rune_string(
                lock(&st)
                    .response
                    .as_ref()
                    .map(|r| r.status_text.clone())
                    .unwrap_or_default(),
            )
        })
        .build()?;

    let st = state.clone();
    module
        .function("body", move || -> RuneString {
            rune_string(
                lock(&st)
                    .response
                    .as_ref()
                    .map(|r| r.body_text.clone())
                    .unwrap_or_default(),
            )
        })
        .build()?;

    let st = state.clone();
    module
        .function("header", move |name: &str| -> RuneString {
            let guard = lock(&st);
            let value = guard
                .response
                .as_ref()
                .and_then(|r| r.header(name))
                .unwrap_or_default()
                .to_string();
            rune_string(value)
        })
        .build()?;

    let st = state.clone();
    module
        .function("elapsed_ms", move || -> i64 {
            lock(&st)
                .response
                .as_ref()
                .map(|r| r.elapsed_ms as i64)
                .unwrap_or(0)
        })
        .build()?;

    let st = state.clone();
    module
        .function("json", move |path: &str| -> RuneString {
            let guard = lock(&st);
            let value = guard
                .response
                .as_ref()
                .and_then(|r| r.body_json())
                .and_then(|body| json_path(&body, path).cloned())
                .map(|value| value_to_string(&value))
                .unwrap_or_default();
            rune_string(value)
        })
        .build()?;

    Ok(module)
}

fn test_module(state: &SharedState) -> Result<Module, ContextError> {
    let mut module = Module::with_crate("test")?;

    let st = state.clone();
    module
        .function("record", move |name: &str, passed: bool, detail: &str| {
            let mut guard = lock(&st);
            guard.tests.push(TestResult {
                name: name.to_string(),
                passed,
                detail: if detail.is_empty() {
                    None
                } else {
                    Some(detail.to_string())
                },
            });
        })
        .build()?;

    let st = state.clone();
    module
        .function("eq", move |name: &str, expected: &str, actual: &str| {
            let passed = expected == actual;
            let mut guard = lock(&st);
            guard.tests.push(TestResult {
                name: name.to_string(),
                passed,
                detail: if passed {
                    None
                } else {
                    Some(format!("expected {expected:?}, got {actual:?}"))
                },
            });
        })
        .build()?;

    Ok(module)
}

fn console_module(state: &SharedState) -> Result<Module, ContextError> {
    let mut module = Module::with_crate("console")?;

    for (name, level) in [
        ("log", LogLevel::Log),
        ("info", LogLevel::Info),
        ("warn", LogLevel::Warn),
        ("error", LogLevel::Error),
    ] {
        let st = state.clone();
        module
            .function(name, move |message: &str| {
                match level {
                    LogLevel::Log | LogLevel::Info => {
                        tracing::info!(target: "reqpulse::script", "{message}")
                    }
                    LogLevel::Warn => tracing::warn!(target: "reqpulse::script", "{message}"),
                    LogLevel::Error => tracing::error!(target: "reqpulse::script", "{message}"),
                }
                lock(&st).logs.push(LogLine {
                    level,
                    message: message.to_string(),
                });
            })
            .build()?;
    }

    Ok(module)
}

fn auth_module() -> Result<Module, ContextError> {
    let mut module = Module::with_crate("auth")?;
    module
        .function("clear_oauth_cache", || {
            crate::auth::oauth2::clear_token_cache();
        })
        .build()?;
    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_path_object_and_array() {
        let body = serde_json::json!({
            "user": {
                "name": "ada",
                "emails": ["ada@example.org", "a@example.org"]
            },
            "items": [{"id": 7}]
        });

        assert_eq!(json_path(&body, "user.name"), Some(&serde_json::json!("ada")));
        assert_eq!(
            json_path(&body, ".user.emails[1]"),
            Some(&serde_json::json!("a@example.org"))
        );
        assert_eq!(json_path(&body, "items[0].id"), Some(&serde_json::json!(7)));
        assert_eq!(json_path(&body, "user.missing"), None);
        assert_eq!(json_path(&body, "items[9]"), None);
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("42"), serde_json::json!(42));
        assert_eq!(parse_value("true"), serde_json::json!(true));
        assert_eq!(parse_value("plain text"), serde_json::json!("plain text"));
        assert_eq!(parse_value(r#"{"a": 1}"#), serde_json::json!({"a": 1}));
    }

    #[test]
    fn test_request_view_roundtrip() {
        let request = RequestDef {
            method: "POST".to_string(),
            url: "https://example.org".to_string(),
            headers: vec![
                HeaderEntry::new("Accept", "application/json"),
                HeaderEntry {
                    name: "X-Off".to_string(),
                    value: "no".to_string(),
                    enabled: false,
                },
            ],
            body: RequestBodyDef::Json {
                content: "{}".to_string(),
            },
            ..Default::default()
        };

        let mut view = RequestView::from_request(&request);
        assert_eq!(view.headers.len(), 1);
        assert_eq!(view.body, "{}");

        view.body = r#"{"changed": true}"#.to_string();
        let mut back = request.clone();
        view.apply_to(&mut back);
        match &back.body {
            RequestBodyDef::Json { content } => assert_eq!(content, r#"{"changed": true}"#),
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn test_write_var_reflattens() {
        let mut bag = VariableBag::default();
        bag.folder
            .insert("name".to_string(), serde_json::json!("folder-wins"));
        let mut state = SandboxState::new(bag, RequestView::default());

        // A write to a scope shadowed by folder must not surface in flat.
        state.write_var(Scope::Collection, "name", serde_json::json!("collection"));
        assert_eq!(state.flat.get("name"), Some(&serde_json::json!("folder-wins")));

        state.write_var(Scope::Folder, "name", serde_json::json!("updated"));
        assert_eq!(state.flat.get("name"), Some(&serde_json::json!("updated")));
    }

    #[test]
    fn test_response_view_header_lookup() {
        let response = ResponseView {
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            ..Default::default()
        };
        assert_eq!(response.header("content-type"), Some("application/json"));
        assert_eq!(response.header("x-missing"), None);
    }
}
