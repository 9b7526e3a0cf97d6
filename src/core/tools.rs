//! Typed tool requests and replies
//!
//! A thin facade over the session registry, the read coordinator and the patch
//! executor. Requests are tagged JSON objects (`{"tool": "start_process", ..}`);
//! every request yields exactly one `ToolReply`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::core::edit_block::parse_edit_blocks;
use crate::core::patch::{ApplyReport, PatchConfig, PatchExecutor};
use crate::core::read::ReadCoordinator;
use crate::core::session::{SessionError, SessionRegistry, SessionSummary, StartOutcome};
use crate::infra::config::Config;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum ToolRequest {
    StartProcess {
        command: String,
        timeout_ms: Option<u64>,
        shell: Option<String>,
    },
    ReadProcessOutput {
        pid: u32,
        timeout_ms: Option<u64>,
    },
    InteractWithProcess {
        pid: u32,
        input: String,
        timeout_ms: Option<u64>,
    },
    KillProcess {
        pid: u32,
    },
    ListSessions,
    ApplyEditBlock {
        raw_text: String,
    },
}

impl ToolRequest {
    pub fn name(&self) -> &'static str {
        match self {
            ToolRequest::StartProcess { .. } => "start_process",
            ToolRequest::ReadProcessOutput { .. } => "read_process_output",
            ToolRequest::InteractWithProcess { .. } => "interact_with_process",
            ToolRequest::KillProcess { .. } => "kill_process",
            ToolRequest::ListSessions => "list_sessions",
            ToolRequest::ApplyEditBlock { .. } => "apply_edit_block",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolError {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolReply {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
}

impl ToolReply {
    pub fn success(result: Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(ToolError {
                kind: kind.into(),
                message: message.into(),
            }),
        }
    }
}

impl From<SessionError> for ToolReply {
    fn from(e: SessionError) -> Self {
        ToolReply::failure(e.kind(), e.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct ToolSurface {
    reader: ReadCoordinator,
    patch: PatchConfig,
    default_timeout: Duration,
}

impl ToolSurface {
    pub fn new(registry: Arc<SessionRegistry>, patch: PatchConfig, default_timeout: Duration) -> Self {
        Self {
            reader: ReadCoordinator::new(registry),
            patch,
            default_timeout,
        }
    }

    pub fn from_config(cfg: &Config, base_dir: PathBuf) -> anyhow::Result<Self> {
        let registry = SessionRegistry::from_config(&cfg.process)?;
        Ok(Self::new(
            registry,
            PatchConfig::from_config(&cfg.edit, base_dir),
            Duration::from_millis(cfg.process.default_timeout_ms),
        ))
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        self.reader.registry()
    }

    pub fn patch_config(&self) -> &PatchConfig {
        &self.patch
    }

    fn timeout_or_default(&self, timeout_ms: Option<u64>) -> Duration {
        timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout)
    }

    pub async fn start_process(
        &self,
        command: &str,
        timeout_ms: Option<u64>,
        shell: Option<&str>,
    ) -> Result<StartOutcome, SessionError> {
        self.registry()
            .start_process(command, self.timeout_or_default(timeout_ms), shell)
            .await
    }

    pub async fn read_process_output(
        &self,
        pid: u32,
        timeout_ms: Option<u64>,
    ) -> Result<String, SessionError> {
        self.reader
            .read_process_output(pid, timeout_ms.map(Duration::from_millis))
            .await
    }

    pub async fn interact_with_process(
        &self,
        pid: u32,
        input: &str,
        timeout_ms: Option<u64>,
    ) -> Result<String, SessionError> {
        self.reader
            .interact(pid, input, self.timeout_or_default(timeout_ms))
            .await
    }

    pub async fn kill_process(&self, pid: u32) -> Result<bool, SessionError> {
        self.registry().kill_session(pid).await
    }

    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        self.registry().list_sessions()
    }

    /// Parse and apply on the blocking pool; file I/O stays off the runtime.
    pub async fn apply_edit_block(&self, raw_text: String) -> anyhow::Result<ApplyReport> {
        let executor = PatchExecutor::new(self.patch.clone());
        tokio::task::spawn_blocking(move || {
            let doc = parse_edit_blocks(&raw_text);
            executor.apply_document(&doc)
        })
        .await
        .context("Edit application task failed")
    }

    /// Run one request and wrap the outcome.
    #[instrument(skip_all, fields(tool = request.name()))]
    pub async fn dispatch(&self, request: ToolRequest) -> ToolReply {
        let outcome: Result<Value, ToolReply> = match request {
            ToolRequest::StartProcess {
                command,
                timeout_ms,
                shell,
            } => self
                .start_process(&command, timeout_ms, shell.as_deref())
                .await
                .map_err(ToolReply::from)
                .and_then(|out| to_value(&out)),
            ToolRequest::ReadProcessOutput { pid, timeout_ms } => self
                .read_process_output(pid, timeout_ms)
                .await
                .map(|output| json!({ "output": output }))
                .map_err(ToolReply::from),
            ToolRequest::InteractWithProcess {
                pid,
                input,
                timeout_ms,
            } => self
                .interact_with_process(pid, &input, timeout_ms)
                .await
                .map(|output| json!({ "output": output }))
                .map_err(ToolReply::from),
            ToolRequest::KillProcess { pid } => self
                .kill_process(pid)
                .await
                .map(|killed| json!({ "killed": killed }))
                .map_err(ToolReply::from),
            ToolRequest::ListSessions => to_value(&self.list_sessions()),
            ToolRequest::ApplyEditBlock { raw_text } => match self.apply_edit_block(raw_text).await {
                Ok(report) => to_value(&report),
                Err(e) => Err(ToolReply::failure("internal", format!("{e:#}"))),
            },
        };

        match outcome {
            Ok(value) => ToolReply::success(value),
            Err(reply) => {
                debug!(error = ?reply.error, "tool request failed");
                reply
            }
        }
    }

    /// Parse one JSON line and dispatch it.
    pub async fn dispatch_line(&self, line: &str) -> ToolReply {
        match serde_json::from_str::<ToolRequest>(line) {
            Ok(request) => self.dispatch(request).await,
            Err(e) => ToolReply::failure("invalid_request", e.to_string()),
        }
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, ToolReply> {
    serde_json::to_value(value).map_err(|e| ToolReply::failure("internal", e.to_string()))
}
