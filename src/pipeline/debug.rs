//! Debug trail
//!
//! Append-only record of pipeline stages and the events inside them, kept
//! on the context so the host can render a per-run diagnostic timeline.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Serialize)]
pub struct DebugEvent {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DebugStage {
    pub name: String,
    pub events: Vec<DebugEvent>,
}

#[derive(Debug, Default, Serialize)]
pub struct DebugTrail {
    stages: Vec<DebugStage>,
}

impl DebugTrail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new stage; subsequent events append to it.
    pub fn add_stage(&mut self, name: &str) {
        self.stages.push(DebugStage {
            name: name.to_string(),
            events: Vec::new(),
        });
    }

    pub fn log(&mut self, message: impl Into<String>) {
        self.log_with(message, None);
    }

    pub fn log_with(&mut self, message: impl Into<String>, data: Option<JsonValue>) {
        if self.stages.is_empty() {
            self.add_stage("setup");
        }
        if let Some(stage) = self.stages.last_mut() {
            stage.events.push(DebugEvent {
                message: message.into(),
                data,
                at: Utc::now(),
            });
        }
    }

    pub fn stages(&self) -> &[DebugStage] {
        &self.stages
    }
}
