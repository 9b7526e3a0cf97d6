//! Child process spawning and output pumps
//!
//! Commands run through a shell (`sh -c` by default) with every stdio stream
//! piped. On unix the child leads its own process group so a kill reaches
//! whatever the shell started.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, instrument};

use crate::core::session::SessionError;

/// Bytes read per pump iteration
const CHUNK_SIZE: usize = 8 * 1024;

/// One spawn. Pids get recycled, so `generation` tells apart two sessions
/// that were handed the same pid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub pid: u32,
    pub generation: u64,
}

/// Receives decoded output chunks from the pumps
pub trait OutputSink: Send + Sync + 'static {
    fn on_output(&self, key: SessionKey, chunk: &str);
}

/// Platform shell used when neither the request nor the config names one
pub fn default_shell() -> String {
    if cfg!(windows) {
        "cmd".to_string()
    } else {
        "/bin/sh".to_string()
    }
}

/// Flag that makes `shell` run the next argument as a command string
pub fn command_flag(shell: &str) -> &'static str {
    let name = Path::new(shell)
        .file_stem()
        .map(|s| s.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match name.as_str() {
        "cmd" => "/C",
        "powershell" | "pwsh" => "-Command",
        _ => "-c",
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher {
    default_shell: Option<String>,
}

/// A freshly spawned child whose output streams are not yet pumped
#[derive(Debug)]
pub struct SpawnedProcess {
    pub pid: u32,
    pub shell: String,
    pub child: Child,
    pub stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
}

impl ProcessLauncher {
    pub fn new(default_shell: Option<String>) -> Self {
        Self { default_shell }
    }

    /// Spawn `command` under `shell` (or the configured/platform default).
    #[instrument(skip(self))]
    pub fn spawn(&self, command: &str, shell: Option<&str>) -> Result<SpawnedProcess, SessionError> {
        let shell = shell
            .map(str::to_string)
            .or_else(|| self.default_shell.clone())
            .unwrap_or_else(default_shell);

        let mut cmd = Command::new(&shell);
        cmd.arg(command_flag(&shell))
            .arg(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        cmd.process_group(0);

        let spawn_failure = |source: std::io::Error| SessionError::ProcessSpawnFailure {
            command: command.to_string(),
            source,
        };

        let mut child = cmd.spawn().map_err(spawn_failure)?;
        let pid = child.id().ok_or_else(|| {
            spawn_failure(std::io::Error::other(
                "process exited before its pid could be read",
            ))
        })?;

        debug!(pid, shell = %shell, "child spawned");

        Ok(SpawnedProcess {
            pid,
            shell,
            stdin: child.stdin.take(),
            stdout: child.stdout.take(),
            stderr: child.stderr.take(),
            child,
        })
    }
}

impl SpawnedProcess {
    /// Start one pump task per output stream, feeding `sink` under `generation`.
    pub fn start_pumps(&mut self, generation: u64, sink: Arc<dyn OutputSink>) -> Vec<JoinHandle<()>> {
        let key = SessionKey {
            pid: self.pid,
            generation,
        };
        let mut pumps = Vec::with_capacity(2);
        if let Some(out) = self.stdout.take() {
            pumps.push(pump(key, out, Arc::clone(&sink)));
        }
        if let Some(err) = self.stderr.take() {
            pumps.push(pump(key, err, sink));
        }
        pumps
    }
}

fn pump<R>(key: SessionKey, mut reader: R, sink: Arc<dyn OutputSink>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut carry: Vec<u8> = Vec::new();

        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    carry.extend_from_slice(&buf[..n]);
                    let text = take_utf8(&mut carry);
                    if !text.is_empty() {
                        sink.on_output(key, &text);
                    }
                }
                Err(e) => {
                    debug!(pid = key.pid, error = %e, "output stream closed with error");
                    break;
                }
            }
        }

        if !carry.is_empty() {
            sink.on_output(key, &String::from_utf8_lossy(&carry));
        }
    })
}

/// Split off the decodable prefix of `carry`, keeping a trailing partial
/// UTF-8 sequence for the next read. Invalid bytes decode lossily.
fn take_utf8(carry: &mut Vec<u8>) -> String {
    let valid = match std::str::from_utf8(carry) {
        Ok(s) => s.len(),
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        Err(_) => carry.len(),
    };

    let rest = carry.split_off(valid);
    let text = String::from_utf8_lossy(carry).into_owned();
    *carry = rest;
    text
}
