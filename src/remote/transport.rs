//! Transports that carry one command to a remote host.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::trace;

use super::connection::{CommandOutput, RemoteConnection};

/// Exit status the OpenSSH client reports for its own failures.
const SSH_CONNECTION_FAILURE: i32 = 255;

/// Messages `ssh` prints when no session was ever established.
///
/// A 255 without one of these may come from the remote command or from a
/// session that dropped after the command started, and is not retried.
const CONNECT_FAILURE_MARKERS: &[&str] = &[
    "Connection refused",
    "Connection timed out",
    "Operation timed out",
    "No route to host",
    "Network is unreachable",
    "Could not resolve hostname",
    "Name or service not known",
    "kex_exchange_identification",
    "Permission denied (publickey",
];

/// A single-attempt transport failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The host could not be reached; worth retrying.
    #[error("host unreachable: {0}")]
    Unreachable(String),
    /// The local client could not be run; retrying will not help.
    #[error("transport failure: {0}")]
    Io(String),
}

/// Runs one command on a remote host, once.
///
/// Retries and per-host serialization are the executor's job; a transport
/// only reports whether the host was reachable.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Runs `command` through the remote login shell, feeding `stdin` to it
    /// when given.
    async fn run(
        &self,
        connection: &RemoteConnection,
        command: &str,
        stdin: Option<&[u8]>,
    ) -> Result<CommandOutput, TransportError>;
}

/// Transport backed by the system `ssh` client.
///
/// Host keys are not checked: servers are created by the same run that
/// connects to them, so there is nothing to pin against.
#[derive(Debug, Clone)]
pub struct OpenSshTransport {
    program: String,
    connect_timeout: Duration,
}

impl OpenSshTransport {
    /// Creates a transport using `ssh` from `PATH`.
    #[must_use]
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            program: String::from("ssh"),
            connect_timeout,
        }
    }

    /// Builds the client arguments for one command.
    #[must_use]
    pub fn build_args(&self, connection: &RemoteConnection, command: &str) -> Vec<String> {
        vec![
            String::from("-i"),
            connection.identity_file.to_string_lossy().into_owned(),
            String::from("-p"),
            connection.port.to_string(),
            String::from("-o"),
            String::from("StrictHostKeyChecking=no"),
            String::from("-o"),
            String::from("UserKnownHostsFile=/dev/null"),
            String::from("-o"),
            String::from("LogLevel=ERROR"),
            String::from("-o"),
            String::from("BatchMode=yes"),
            String::from("-o"),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
            format!("{}@{}", connection.user, connection.host),
            String::from("--"),
            command.to_string(),
        ]
    }
}

#[async_trait]
impl RemoteTransport for OpenSshTransport {
    async fn run(
        &self,
        connection: &RemoteConnection,
        command: &str,
        stdin: Option<&[u8]>,
    ) -> Result<CommandOutput, TransportError> {
        trace!("ssh {connection}: {command}");

        let mut child = tokio::process::Command::new(&self.program)
            .args(self.build_args(connection, command))
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TransportError::Io(format!("failed to spawn {}: {e}", self.program)))?;

        let stdin_task = match (child.stdin.take(), stdin) {
            (Some(mut handle), Some(input)) => {
                let input = input.to_vec();
                Some(tokio::spawn(async move {
                    // Dropping the handle closes the pipe.
                    let _ = handle.write_all(&input).await;
                }))
            }
            _ => None,
        };

        let mut stdout_handle = child.stdout.take();
        let mut stderr_handle = child.stderr.take();

        let (status, stdout, stderr) = tokio::join!(
            child.wait(),
            async {
                let mut buf = Vec::new();
                if let Some(ref mut h) = stdout_handle {
                    let _ = h.read_to_end(&mut buf).await;
                }
                buf
            },
            async {
                let mut buf = Vec::new();
                if let Some(ref mut h) = stderr_handle {
                    let _ = h.read_to_end(&mut buf).await;
                }
                buf
            },
        );
        if let Some(task) = stdin_task {
            let _ = task.await;
        }

        let status =
            status.map_err(|e| TransportError::Io(format!("waiting for {}: {e}", self.program)))?;
        let output = CommandOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        };

        if is_connect_failure(&output) {
            return Err(TransportError::Unreachable(output.stderr.trim().to_string()));
        }
        Ok(output)
    }
}

/// Returns true if the client gave up before a session existed.
fn is_connect_failure(output: &CommandOutput) -> bool {
    output.exit_code == SSH_CONNECTION_FAILURE
        && CONNECT_FAILURE_MARKERS
            .iter()
            .any(|marker| output.stderr.contains(marker))
}
