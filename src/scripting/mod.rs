//! Sandboxed user-script execution
//!
//! User-authored pre-request, post-request, and test code runs in an
//! embedded Rune VM with a bounded capability surface: variable access per
//! scope, read access to the current request/response, assertion recording,
//! and a console logger. Nothing else from the host leaks in; the ambient
//! Rune fs/process modules are deliberately not installed.
//!
//! A thrown script error never unwinds past the sandbox boundary. It is
//! returned as a `Script` error and the orchestrator decides whether that
//! is fatal (pre-request) or recorded (tests).

pub mod bridge;
pub mod engine;

pub use bridge::{
    LogLevel, LogLine, RequestView, ResponseView, SandboxState, SharedState,
};
pub use engine::ScriptEngine;

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::errors::Result;

/// One sandbox session: a Rune engine wired to shared per-run state.
///
/// A session may execute several sources in sequence (the cascade chain);
/// variable writes and recorded tests accumulate in the state across
/// sources and are drained once with [`Sandbox::into_state`].
pub struct Sandbox {
    engine: ScriptEngine,
    state: SharedState,
}

impl Sandbox {
    pub fn new(state: SandboxState) -> Result<Self> {
        let state: SharedState = Arc::new(Mutex::new(state));
        let engine = ScriptEngine::with_capabilities(&state)?;
        Ok(Self { engine, state })
    }

    /// Execute one script source, racing the VM against the run's
    /// cancellation signal.
    pub async fn run(&self, source: &str, cancel: &CancellationToken) -> Result<()> {
        self.engine.run_main(source, cancel).await
    }

    /// Make the response visible to subsequent sources (post/test phase).
    pub fn set_response(&self, response: ResponseView) {
        bridge::lock(&self.state).response = Some(response);
    }

    /// Drain the accumulated state. The engine keeps clones of the shared
    /// handle, so the contents are moved out rather than unwrapped.
    pub fn into_state(self) -> SandboxState {
        let mut guard = bridge::lock(&self.state);
        std::mem::take(&mut *guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vars::VariableBag;

    fn sandbox_with(bag: VariableBag) -> Sandbox {
        Sandbox::new(SandboxState::new(bag, RequestView::default())).unwrap()
    }

    #[tokio::test]
    async fn test_vars_get_and_set() {
        let mut bag = VariableBag::default();
        bag.environment
            .insert("host".to_string(), serde_json::json!("example.org"));
        let sandbox = sandbox_with(bag);
        let cancel = CancellationToken::new();

        sandbox
            .run(
                r#"
                pub fn main() {
                    let host = vars::get("host");
                    vars::set("derived", host + "/api");
                }
                "#,
                &cancel,
            )
            .await
            .unwrap();

        let state = sandbox.into_state();
        assert_eq!(
            state.bag.runtime.get("derived"),
            Some(&serde_json::json!("example.org/api"))
        );
        assert_eq!(state.runtime_writes.len(), 1);
    }

    #[tokio::test]
    async fn test_script_error_is_contained() {
        let sandbox = sandbox_with(VariableBag::default());
        let cancel = CancellationToken::new();

        let err = sandbox
            .run(r#"pub fn main() { panic!("boom"); }"#, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::errors::EngineError::Script(_)));
    }

    #[tokio::test]
    async fn test_compile_error_is_script_error() {
        let sandbox = sandbox_with(VariableBag::default());
        let cancel = CancellationToken::new();

        let err = sandbox
            .run("pub fn main() { this is not rune", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::errors::EngineError::Script(_)));
    }

    #[tokio::test]
    async fn test_console_output_captured() {
        let sandbox = sandbox_with(VariableBag::default());
        let cancel = CancellationToken::new();

        sandbox
            .run(r#"pub fn main() { console::log("hello"); console::warn("careful"); }"#, &cancel)
            .await
            .unwrap();

        let state = sandbox.into_state();
        assert_eq!(state.logs.len(), 2);
        assert_eq!(state.logs[0].message, "hello");
        assert_eq!(state.logs[1].level, LogLevel::Warn);
    }

    #[tokio::test]
    async fn test_bare_statements_are_wrapped() {
        let sandbox = sandbox_with(VariableBag::default());
        let cancel = CancellationToken::new();

        // No `pub fn main` in the source; the engine wraps it.
        sandbox
            .run(r#"vars::set("wrapped", "yes");"#, &cancel)
            .await
            .unwrap();

        let state = sandbox.into_state();
        assert_eq!(
            state.bag.runtime.get("wrapped"),
            Some(&serde_json::json!("yes"))
        );
    }

    #[tokio::test]
    async fn test_request_view_mutation() {
        let mut state = SandboxState::new(VariableBag::default(), RequestView::default());
        state.request.url = "https://example.org/v1".to_string();
        let sandbox = Sandbox::new(state).unwrap();
        let cancel = CancellationToken::new();

        sandbox
            .run(
                r#"
                pub fn main() {
                    req::set_header("X-Trace", "abc");
                    req::set_url(req::url() + "/users");
                }
                "#,
                &cancel,
            )
            .await
            .unwrap();

        let state = sandbox.into_state();
        assert_eq!(state.request.url, "https://example.org/v1/users");
        assert_eq!(
            state.request.headers,
            vec![("X-Trace".to_string(), "abc".to_string())]
        );
    }

    #[tokio::test]
    async fn test_recorded_expectations() {
        let mut state = SandboxState::new(VariableBag::default(), RequestView::default());
        state.response = Some(ResponseView {
            status: 201,
            ..Default::default()
        });
        let sandbox = Sandbox::new(state).unwrap();
        let cancel = CancellationToken::new();

        sandbox
            .run(
                r#"
                pub fn main() {
                    test::record("created", res::status() == 201, "");
                    test::record("has body", res::body() != "", "body was empty");
                }
                "#,
                &cancel,
            )
            .await
            .unwrap();

        let state = sandbox.into_state();
        assert_eq!(state.tests.len(), 2);
        assert!(state.tests[0].passed);
        assert!(!state.tests[1].passed);
    }
}
