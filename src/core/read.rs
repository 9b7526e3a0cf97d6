//! Output reads against running or completed sessions

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::instrument;

use crate::core::session::{
    CompletedSession, ExitReason, SessionEntry, SessionError, SessionRead, SessionRegistry,
};
use crate::infra::utils::DisplayUtils;

/// Summary shown when reading a session that already finished
pub fn format_completion(done: &CompletedSession) -> String {
    let status = match (done.exit_reason, done.exit_code) {
        (ExitReason::Exited, Some(code)) => format!("Process completed with exit code {code}"),
        (ExitReason::Exited, None) => "Process terminated by a signal".to_string(),
        (ExitReason::Killed, Some(code)) => format!("Process was killed (exit code {code})"),
        (ExitReason::Killed, None) => "Process was killed".to_string(),
    };

    format!(
        "{status}\nRuntime: {}\nFinal output:\n{}",
        DisplayUtils::runtime(done.runtime),
        done.final_output
    )
}

#[derive(Debug, Clone)]
pub struct ReadCoordinator {
    registry: Arc<SessionRegistry>,
}

impl ReadCoordinator {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// New output since the last read, or the completion summary.
    #[instrument(skip(self))]
    pub fn get_new_output(&self, pid: u32) -> Result<String, SessionError> {
        match self.registry.read(pid)? {
            SessionRead::Output(delta) => Ok(delta),
            SessionRead::Completed(done) => Ok(format_completion(&done)),
        }
    }

    /// Like `get_new_output`, but first waits up to `timeout` for a running
    /// session with nothing buffered to produce output or exit.
    #[instrument(skip(self))]
    pub async fn read_process_output(
        &self,
        pid: u32,
        timeout: Option<Duration>,
    ) -> Result<String, SessionError> {
        if let Some(timeout) = timeout.filter(|t| !t.is_zero()) {
            self.registry
                .wait_until(pid, Instant::now() + timeout, |entry| match entry {
                    SessionEntry::Running(run) => !run.pending_output().is_empty(),
                    SessionEntry::Exited(_) => true,
                })
                .await;
        }

        self.get_new_output(pid)
    }

    /// Send a line of input, then collect output until the session prompts
    /// again, exits, or `timeout` passes.
    #[instrument(skip(self, input))]
    pub async fn interact(
        &self,
        pid: u32,
        input: &str,
        timeout: Duration,
    ) -> Result<String, SessionError> {
        self.registry.send_input(pid, input).await?;

        self.registry
            .wait_until(pid, Instant::now() + timeout, |entry| match entry {
                SessionEntry::Running(run) => run.awaiting_input(),
                SessionEntry::Exited(_) => true,
            })
            .await;

        self.get_new_output(pid)
    }
}
