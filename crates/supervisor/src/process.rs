// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Thin wrapper over one supervised child process.
//!
//! The child itself is owned by a detached waiter task; everyone else talks
//! to it through this handle. The exit status is broadcast on a watch
//! channel so the reader pipeline and a concurrent `stop()` can both await
//! it, and `kill()` is a token trip the waiter services. All stdin writes
//! go through one async mutex, which is what serializes operator commands
//! against each other (the "per-instance stdin lock").

use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("server executable \"{0}\" not found")]
    MissingExecutable(PathBuf),

    #[error("working directory \"{0}\" not found")]
    MissingWorkdir(PathBuf),

    #[error("assets directory \"{0}\" not found")]
    MissingData(PathBuf),

    #[error("failed to spawn {executable}: {source}")]
    Spawn { executable: PathBuf, source: std::io::Error },
}

/// Everything needed to launch one child.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: PathBuf,
}

pub struct ProcessDriver {
    pid: Option<u32>,
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<Lines<BufReader<ChildStdout>>>,
    stderr: Mutex<Lines<BufReader<ChildStderr>>>,
    exit: watch::Receiver<Option<i32>>,
    kill: CancellationToken,
}

impl ProcessDriver {
    /// Spawn the child with piped stdio and start its waiter task.
    pub fn spawn(spec: &SpawnSpec) -> Result<Self, SpawnError> {
        let mut command = Command::new(&spec.executable);
        command
            .args(&spec.args)
            .current_dir(&spec.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &spec.env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|source| SpawnError::Spawn {
            executable: spec.executable.clone(),
            source,
        })?;
        let pid = child.id();
        let stdin = take_pipe(child.stdin.take(), spec)?;
        let stdout = take_pipe(child.stdout.take(), spec)?;
        let stderr = take_pipe(child.stderr.take(), spec)?;

        let (exit_tx, exit_rx) = watch::channel(None);
        let kill = CancellationToken::new();
        tokio::spawn(waiter(child, exit_tx, kill.clone()));

        Ok(Self {
            pid,
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout).lines()),
            stderr: Mutex::new(BufReader::new(stderr).lines()),
            exit: exit_rx,
            kill,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Write one line to the child's stdin and flush it.
    pub async fn write_line(&self, line: &str) -> std::io::Result<()> {
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(line.as_bytes()).await?;
        if !line.ends_with('\n') {
            stdin.write_all(b"\n").await?;
        }
        stdin.flush().await
    }

    /// Next stdout line, `None` at EOF.
    pub async fn read_stdout_line(&self) -> std::io::Result<Option<String>> {
        self.stdout.lock().await.next_line().await
    }

    /// Next stderr line, `None` at EOF.
    pub async fn read_stderr_line(&self) -> std::io::Result<Option<String>> {
        self.stderr.lock().await.next_line().await
    }

    /// Request the child be killed. Idempotent; the waiter reaps it.
    pub fn kill(&self) {
        self.kill.cancel();
    }

    /// Await process exit. Safe to call from several tasks; a killed or
    /// signal-terminated child reports −1.
    pub async fn wait(&self) -> i32 {
        let mut exit = self.exit.clone();
        let result = match exit.wait_for(|code| code.is_some()).await {
            Ok(code) => code.unwrap_or(-1),
            // The waiter always publishes before dropping the sender.
            Err(_) => self.exit.borrow().unwrap_or(-1),
        };
        result
    }

    pub fn is_running(&self) -> bool {
        self.exit.borrow().is_none()
    }
}

fn take_pipe<T>(pipe: Option<T>, spec: &SpawnSpec) -> Result<T, SpawnError> {
    pipe.ok_or_else(|| SpawnError::Spawn {
        executable: spec.executable.clone(),
        source: std::io::Error::other("child pipe was not captured"),
    })
}

async fn waiter(mut child: Child, exit_tx: watch::Sender<Option<i32>>, kill: CancellationToken) {
    let code = tokio::select! {
        status = child.wait() => status.ok().and_then(|s| s.code()).unwrap_or(-1),
        _ = kill.cancelled() => {
            if let Err(err) = child.start_kill() {
                tracing::debug!(error = %err, "kill request on already-gone child");
            }
            child.wait().await.ok().and_then(|s| s.code()).unwrap_or(-1)
        }
    };
    let _ = exit_tx.send(Some(code));
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;
