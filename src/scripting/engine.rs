//! Rune engine setup and execution
//!
//! Builds the VM context with the standard Rune modules plus the per-run
//! capability bridge, compiles sources with collected diagnostics, and
//! executes `main` raced against the run's cancellation token.

use std::sync::Arc;

use rune::runtime::RuntimeContext;
use rune::termcolor::Buffer;
use rune::{Context, Diagnostics, Options, Source, Sources, Unit, Vm};
use tokio_util::sync::CancellationToken;

use super::bridge::{self, SharedState};
use crate::errors::{EngineError, Result};

/// The script engine powering one sandbox session
pub struct ScriptEngine {
    context: Context,
    runtime: Arc<RuntimeContext>,
}

impl ScriptEngine {
    /// Create an engine whose installed modules are exactly the capability
    /// surface plus Rune's json/rand/time std modules.
    pub fn with_capabilities(state: &SharedState) -> Result<Self> {
        let mut context = Context::with_default_modules()
            .map_err(|e| EngineError::Script(format!("Failed to create context: {e}")))?;

        // Std modules the sandbox allows (no fs, no process, no net)
        if let Ok(module) = rune_modules::json::module(true) {
            let _ = context.install(module);
        }
        if let Ok(module) = rune_modules::rand::module(true) {
            let _ = context.install(module);
        }
        if let Ok(module) = rune_modules::time::module(true) {
            let _ = context.install(module);
        }

        for module in bridge::capability_modules(state)
            .map_err(|e| EngineError::Script(format!("capability module: {e}")))?
        {
            context
                .install(module)
                .map_err(|e| EngineError::Script(format!("Failed to install module: {e}")))?;
        }

        let runtime = Arc::new(
            context
                .runtime()
                .map_err(|e| EngineError::Script(format!("Failed to create runtime: {e}")))?,
        );

        Ok(Self { context, runtime })
    }

    /// Compile a script, returning the diagnostics text on failure.
    pub fn compile(&self, source: &str) -> Result<Arc<Unit>> {
        let mut sources = Sources::new();
        let _ = sources.insert(
            Source::memory(source)
                .map_err(|e| EngineError::Script(format!("Source error: {e}")))?,
        );

        let mut diagnostics = Diagnostics::new();
        let options = Options::default();

        let result = rune::prepare(&mut sources)
            .with_context(&self.context)
            .with_options(&options)
            .with_diagnostics(&mut diagnostics)
            .build();

        match result {
            Ok(unit) => Ok(Arc::new(unit)),
            Err(_) => {
                let mut buffer = Buffer::no_color();
                let _ = diagnostics.emit(&mut buffer, &sources);
                let detail = String::from_utf8_lossy(buffer.as_slice()).trim().to_string();
                Err(EngineError::Script(format!("Compile error: {detail}")))
            }
        }
    }

    /// Execute `main`, racing the VM against cancellation.
    pub async fn run_main(&self, source: &str, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled("before running script".to_string()));
        }

        let unit = self.compile(&wrap_main(source))?;
        let vm = Vm::new(self.runtime.clone(), unit);

        let execution = vm
            .send_execute(rune::Hash::type_hash(["main"]), ())
            .map_err(|e| EngineError::Script(format!("Execution setup error: {e}")))?;

        tokio::select! {
            _ = cancel.cancelled() => Err(EngineError::Cancelled("while running script".to_string())),
            output = execution.async_complete() => {
                output
                    .into_result()
                    .map(|_| ())
                    .map_err(|e| EngineError::Script(format!("Execution error: {e}")))
            }
        }
    }
}

/// Wrap bare statements in `pub fn main() { ... }` so users can write
/// either style.
pub fn wrap_main(source: &str) -> String {
    if source.contains("pub fn main") || source.contains("fn main") {
        source.to_string()
    } else {
        format!("pub fn main() {{ {source} }}")
    }
}
