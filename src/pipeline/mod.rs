//! Request execution pipeline
//!
//! The orchestrator and its supporting pieces: the per-run context,
//! lifecycle hooks, stage timings, the debug trail, and the assertion and
//! test evaluators.

pub mod assertions;
pub mod context;
pub mod debug;
pub mod hooks;
pub mod runner;
pub mod timings;

pub use assertions::{evaluate_assertions, AssertionResult};
pub use context::{ExecuteOptions, ExecutionMode, RequestContext, RunState};
pub use debug::{DebugEvent, DebugStage, DebugTrail};
pub use hooks::{AuthCodeFetcher, AuthCodePrompt, LifecycleHooks, NoopHooks};
pub use runner::execute;
pub use tests::TestResult;
pub use timings::{TimingEntry, Timings};
