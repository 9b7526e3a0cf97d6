//! Process session registry
//!
//! One pid-keyed map holds every session as either `Running` or `Exited`, so
//! a pid can never be in both states. The exit watcher swaps the entry in
//! place under the lock; readers wake on a shared `Notify`.
//!
//! The registry is an explicit context object: callers build it and share it
//! as `Arc<SessionRegistry>`. The mutex is never held across an `.await`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin};
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::core::process::{OutputSink, ProcessLauncher, SessionKey};
use crate::core::prompt::PromptDetector;
use crate::infra::config::ProcessConfig;
use crate::infra::utils::DisplayUtils;

/// Time between SIGTERM and the hard kill
const KILL_GRACE: Duration = Duration::from_millis(1500);

/// How long the watcher waits for pumps to flush after exit
const PUMP_DRAIN: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("No session found for PID {0}")]
    SessionNotFound(u32),

    #[error("Failed to start process `{command}`: {source}")]
    ProcessSpawnFailure {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Session {0} is no longer running")]
    SessionNotRunning(u32),

    #[error("Session I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Stable machine-readable name
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::SessionNotFound(_) => "session_not_found",
            SessionError::ProcessSpawnFailure { .. } => "process_spawn_failure",
            SessionError::SessionNotRunning(_) => "session_not_running",
            SessionError::Io(_) => "io",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Exited,
    Killed,
}

/// A live session
#[derive(Debug)]
pub struct RunningSession {
    pub pid: u32,
    pub command: String,
    pub shell: String,
    pub start_time: DateTime<Utc>,
    generation: u64,
    started: Instant,
    /// Output not yet handed to a reader
    output_buffer: String,
    /// Everything captured so far
    full_output: String,
    awaiting_input: bool,
    stdin: Option<Arc<tokio::sync::Mutex<ChildStdin>>>,
    kill_tx: Option<oneshot::Sender<()>>,
}

impl RunningSession {
    pub fn pending_output(&self) -> &str {
        &self.output_buffer
    }

    pub fn awaiting_input(&self) -> bool {
        self.awaiting_input
    }

    pub fn runtime(&self) -> Duration {
        self.started.elapsed()
    }
}

/// A finished session kept for post-mortem reads
#[derive(Debug, Clone, Serialize)]
pub struct CompletedSession {
    pub pid: u32,
    pub command: String,
    pub exit_code: Option<i32>,
    pub exit_reason: ExitReason,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(skip)]
    pub runtime: Duration,
    pub final_output: String,
    #[serde(skip)]
    ended: Instant,
}

#[derive(Debug)]
pub enum SessionEntry {
    Running(RunningSession),
    Exited(CompletedSession),
}

impl SessionEntry {
    pub fn is_running(&self) -> bool {
        matches!(self, SessionEntry::Running(_))
    }
}

/// Result of the initial `start_process` race
#[derive(Debug, Clone, Serialize)]
pub struct StartOutcome {
    pub pid: u32,
    pub output: String,
    /// Still running when the call returned (timeout or prompt)
    pub is_blocked: bool,
    pub exit_code: Option<i32>,
}

/// What a reader gets from one non-blocking look at a session
#[derive(Debug, Clone)]
pub enum SessionRead {
    /// Drained delta of a running session (may be empty)
    Output(String),
    Completed(CompletedSession),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Running,
    Exited,
    Killed,
}

/// Row of `list_sessions`
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub pid: u32,
    pub command: String,
    pub state: SessionState,
    pub runtime_ms: u64,
    pub awaiting_input: bool,
    pub exit_code: Option<i32>,
    pub start_time: DateTime<Utc>,
}

/// How many completed sessions are kept, and for how long
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub max_completed: usize,
    pub ttl: Option<Duration>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_completed: 100,
            ttl: None,
        }
    }
}

type Sessions = IndexMap<u32, SessionEntry>;

#[derive(Debug)]
pub struct SessionRegistry {
    state: Mutex<Sessions>,
    changed: Notify,
    retention: RetentionPolicy,
    prompts: PromptDetector,
    launcher: ProcessLauncher,
    next_generation: AtomicU64,
}

impl SessionRegistry {
    pub fn new(
        launcher: ProcessLauncher,
        prompts: PromptDetector,
        retention: RetentionPolicy,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(IndexMap::new()),
            changed: Notify::new(),
            retention,
            prompts,
            launcher,
            next_generation: AtomicU64::new(1),
        })
    }

    /// Build from the `[process]` config section.
    pub fn from_config(cfg: &ProcessConfig) -> anyhow::Result<Arc<Self>> {
        let prompts = PromptDetector::new(&cfg.prompt_patterns)
            .map_err(|e| anyhow::anyhow!("Invalid prompt pattern in config: {e}"))?;
        let retention = RetentionPolicy {
            max_completed: cfg.max_completed,
            ttl: cfg.completed_ttl_secs.map(Duration::from_secs),
        };
        Ok(Self::new(
            ProcessLauncher::new(cfg.default_shell.clone()),
            prompts,
            retention,
        ))
    }

    fn lock(&self) -> MutexGuard<'_, Sessions> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn `command` and race its exit against `timeout` and a prompt.
    #[instrument(skip(self, command), fields(command = %DisplayUtils::preview(command, 80)))]
    pub async fn start_process(
        self: &Arc<Self>,
        command: &str,
        timeout: Duration,
        shell: Option<&str>,
    ) -> Result<StartOutcome, SessionError> {
        let mut spawned = self.launcher.spawn(command, shell)?;
        let pid = spawned.pid;
        let key = SessionKey {
            pid,
            generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
        };
        let (kill_tx, kill_rx) = oneshot::channel();
        let (done_tx, mut done_rx) = oneshot::channel();

        {
            let mut state = self.lock();
            // A recycled pid replaces whatever record it used to name
            if state.shift_remove(&pid).is_some() {
                debug!(pid, "replaced stale session record");
            }
            state.insert(
                pid,
                SessionEntry::Running(RunningSession {
                    pid,
                    command: command.to_string(),
                    shell: spawned.shell.clone(),
                    start_time: Utc::now(),
                    generation: key.generation,
                    started: Instant::now(),
                    output_buffer: String::new(),
                    full_output: String::new(),
                    awaiting_input: false,
                    stdin: spawned
                        .stdin
                        .take()
                        .map(|s| Arc::new(tokio::sync::Mutex::new(s))),
                    kill_tx: Some(kill_tx),
                }),
            );
        }

        let pumps = spawned.start_pumps(key.generation, Arc::clone(self) as Arc<dyn OutputSink>);
        self.watch(key, spawned.child, pumps, kill_rx, done_tx);
        info!(pid, "session started");

        let deadline = Instant::now() + timeout;
        self.wait_until(pid, deadline, |entry| match entry {
            SessionEntry::Exited(_) => true,
            SessionEntry::Running(run) => run.awaiting_input,
        })
        .await;

        {
            let mut state = self.lock();
            match state.get_mut(&pid) {
                Some(SessionEntry::Running(run)) if run.generation == key.generation => {
                    return Ok(StartOutcome {
                        pid,
                        output: std::mem::take(&mut run.output_buffer),
                        is_blocked: true,
                        exit_code: None,
                    });
                }
                _ => {}
            }
        }

        // The exit record is sent under the lock, so it is here once the
        // entry stopped being `Running`, even if retention already dropped it
        match done_rx.try_recv() {
            Ok(done) => Ok(StartOutcome {
                pid,
                output: done.final_output,
                is_blocked: false,
                exit_code: done.exit_code,
            }),
            Err(_) => Err(SessionError::SessionNotFound(pid)),
        }
    }

    /// Exit watcher: owns the child, records the exit once.
    fn watch(
        self: &Arc<Self>,
        key: SessionKey,
        mut child: Child,
        pumps: Vec<JoinHandle<()>>,
        kill_rx: oneshot::Receiver<()>,
        done_tx: oneshot::Sender<CompletedSession>,
    ) {
        let registry = Arc::clone(self);
        let pid = key.pid;
        tokio::spawn(async move {
            let exited = tokio::select! {
                status = child.wait() => Some(status),
                Ok(()) = kill_rx => None,
            };

            let (status, reason) = match exited {
                Some(status) => (status, ExitReason::Exited),
                None => (terminate(&mut child).await, ExitReason::Killed),
            };

            // Let the pipes flush what the child wrote before exiting
            let drain_deadline = Instant::now() + PUMP_DRAIN;
            for pump in pumps {
                if tokio::time::timeout_at(drain_deadline, pump).await.is_err() {
                    debug!(pid, "output pump still open after exit");
                }
            }

            let exit_code = match status {
                Ok(status) => status.code(),
                Err(e) => {
                    warn!(pid, error = %e, "failed to collect exit status");
                    None
                }
            };
            registry.record_exit(key, exit_code, reason, Some(done_tx));
        });
    }

    /// Replace the `Running` entry with its `Exited` record. A key whose
    /// generation no longer matches the stored session is ignored.
    fn record_exit(
        &self,
        key: SessionKey,
        exit_code: Option<i32>,
        reason: ExitReason,
        done_tx: Option<oneshot::Sender<CompletedSession>>,
    ) {
        let pid = key.pid;
        let mut state = self.lock();

        match state.get(&pid) {
            Some(SessionEntry::Running(run)) if run.generation == key.generation => {}
            Some(_) => {
                debug!(pid, generation = key.generation, "stale exit for a recycled pid ignored");
                return;
            }
            None => return,
        }
        let Some(SessionEntry::Running(run)) = state.shift_remove(&pid) else {
            return;
        };

        let runtime = run.started.elapsed();
        info!(pid, ?exit_code, ?reason, runtime_ms = runtime.as_millis() as u64, "session ended");

        let done = CompletedSession {
            pid,
            command: run.command,
            exit_code,
            exit_reason: reason,
            start_time: run.start_time,
            end_time: Utc::now(),
            runtime,
            final_output: run.full_output,
            ended: Instant::now(),
        };
        if let Some(tx) = done_tx {
            let _ = tx.send(done.clone());
        }

        // Re-inserted at the back: map order is completion order for eviction
        state.insert(pid, SessionEntry::Exited(done));
        self.evict(&mut state, Some(pid));
        drop(state);

        self.changed.notify_waiters();
    }

    /// Drop completed records past the TTL, then the oldest beyond the cap.
    /// `keep` is the record that just transitioned; it survives this pass.
    fn evict(&self, state: &mut Sessions, keep: Option<u32>) {
        if let Some(ttl) = self.retention.ttl {
            state.retain(|pid, entry| match entry {
                SessionEntry::Exited(done) => Some(*pid) == keep || done.ended.elapsed() <= ttl,
                SessionEntry::Running(_) => true,
            });
        }

        // At least the newest completed record is always retained
        let cap = self.retention.max_completed.max(1);
        let completed = state.values().filter(|e| !e.is_running()).count();
        let mut excess = completed.saturating_sub(cap);
        if excess > 0 {
            debug!(excess, "evicting completed sessions");
            state.retain(|pid, entry| {
                if excess > 0 && !entry.is_running() && Some(*pid) != keep {
                    excess -= 1;
                    return false;
                }
                true
            });
        }
    }

    /// Wait until `ready` holds for the session, it disappears, or `deadline`
    /// passes. Returns false on timeout.
    pub async fn wait_until<F>(&self, pid: u32, deadline: Instant, mut ready: F) -> bool
    where
        F: FnMut(&SessionEntry) -> bool,
    {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            // Register before checking so no wakeup slips in between
            notified.as_mut().enable();

            {
                let state = self.lock();
                match state.get(&pid) {
                    None => return true,
                    Some(entry) if ready(entry) => return true,
                    Some(_) => {}
                }
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => return false,
            }
        }
    }

    /// Non-blocking look: drain a running session or clone the completed record.
    pub fn read(&self, pid: u32) -> Result<SessionRead, SessionError> {
        let mut state = self.lock();
        self.evict(&mut state, None);

        match state.get_mut(&pid) {
            Some(SessionEntry::Running(run)) => {
                Ok(SessionRead::Output(std::mem::take(&mut run.output_buffer)))
            }
            Some(SessionEntry::Exited(done)) => Ok(SessionRead::Completed(done.clone())),
            None => Err(SessionError::SessionNotFound(pid)),
        }
    }

    /// Request termination. `Ok(false)` when the session already exited.
    #[instrument(skip(self))]
    pub async fn kill_session(&self, pid: u32) -> Result<bool, SessionError> {
        let kill_tx = {
            let mut state = self.lock();
            match state.get_mut(&pid) {
                None => return Err(SessionError::SessionNotFound(pid)),
                Some(SessionEntry::Exited(_)) => return Ok(false),
                Some(SessionEntry::Running(run)) => run.kill_tx.take(),
            }
        };

        match kill_tx {
            Some(tx) => {
                if tx.send(()).is_err() {
                    debug!(pid, "exit watcher already finished");
                }
            }
            None => debug!(pid, "kill already requested"),
        }

        let deadline = Instant::now() + KILL_GRACE + PUMP_DRAIN + Duration::from_secs(1);
        let done = self
            .wait_until(pid, deadline, |entry| !entry.is_running())
            .await;
        if !done {
            warn!(pid, "process did not exit after kill request");
        }
        Ok(true)
    }

    /// Write `input` (newline-terminated) to the session's stdin.
    #[instrument(skip(self, input), fields(bytes = input.len()))]
    pub async fn send_input(&self, pid: u32, input: &str) -> Result<(), SessionError> {
        let stdin = {
            let mut state = self.lock();
            match state.get_mut(&pid) {
                None => return Err(SessionError::SessionNotFound(pid)),
                Some(SessionEntry::Exited(_)) => return Err(SessionError::SessionNotRunning(pid)),
                Some(SessionEntry::Running(run)) => {
                    run.awaiting_input = false;
                    run.stdin.clone()
                }
            }
        };

        let Some(stdin) = stdin else {
            return Err(SessionError::SessionNotRunning(pid));
        };

        let mut line = input.to_string();
        if !line.ends_with('\n') {
            line.push('\n');
        }

        let mut writer = stdin.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Snapshot of every known session in registry order.
    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        let mut state = self.lock();
        self.evict(&mut state, None);

        state
            .values()
            .map(|entry| match entry {
                SessionEntry::Running(run) => SessionSummary {
                    pid: run.pid,
                    command: run.command.clone(),
                    state: SessionState::Running,
                    runtime_ms: run.runtime().as_millis() as u64,
                    awaiting_input: run.awaiting_input,
                    exit_code: None,
                    start_time: run.start_time,
                },
                SessionEntry::Exited(done) => SessionSummary {
                    pid: done.pid,
                    command: done.command.clone(),
                    state: match done.exit_reason {
                        ExitReason::Exited => SessionState::Exited,
                        ExitReason::Killed => SessionState::Killed,
                    },
                    runtime_ms: done.runtime.as_millis() as u64,
                    awaiting_input: false,
                    exit_code: done.exit_code,
                    start_time: done.start_time,
                },
            })
            .collect()
    }

    /// Kill everything still running (used on shutdown).
    pub async fn kill_all(&self) {
        let running: Vec<u32> = self
            .lock()
            .values()
            .filter_map(|e| match e {
                SessionEntry::Running(run) => Some(run.pid),
                SessionEntry::Exited(_) => None,
            })
            .collect();

        for pid in running {
            if let Err(e) = self.kill_session(pid).await {
                debug!(pid, error = %e, "kill on shutdown skipped");
            }
        }
    }
}

impl OutputSink for SessionRegistry {
    fn on_output(&self, key: SessionKey, chunk: &str) {
        {
            let mut state = self.lock();
            match state.get_mut(&key.pid) {
                Some(SessionEntry::Running(run)) if run.generation == key.generation => {
                    run.output_buffer.push_str(chunk);
                    run.full_output.push_str(chunk);
                    run.awaiting_input = self.prompts.is_prompt(&run.full_output);
                }
                _ => return,
            }
        }
        self.changed.notify_waiters();
    }
}

/// SIGTERM the process group, then hard-kill after the grace period.
async fn terminate(child: &mut Child) -> std::io::Result<std::process::ExitStatus> {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        let pgid = -(pid as i32);
        // SAFETY: plain signal delivery to a process group we created
        unsafe {
            libc::kill(pgid, libc::SIGTERM);
        }

        if let Ok(status) = tokio::time::timeout(KILL_GRACE, child.wait()).await {
            return status;
        }

        // SAFETY: as above
        unsafe {
            libc::kill(pgid, libc::SIGKILL);
        }
    }

    if let Err(e) = child.start_kill() {
        debug!(error = %e, "hard kill failed; child may already be gone");
    }
    child.wait().await
}
