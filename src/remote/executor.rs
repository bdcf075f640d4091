//! Remote command execution with connection retry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::config::SshSettings;
use crate::error::{RemoteError, Result, StackupError};

use super::connection::{CommandOutput, RemoteConnection, shell_quote};
use super::transport::{RemoteTransport, TransportError};

/// Connection retry schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts before the host is declared unreachable.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_backoff: Duration,
    /// Upper bound for any single delay.
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Returns the delay to wait after failed attempt `attempt` (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Returns the number of attempts actually made; never zero.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&SshSettings::default())
    }
}

impl From<&SshSettings> for RetryPolicy {
    fn from(settings: &SshSettings) -> Self {
        Self {
            max_attempts: settings.connect_attempts,
            initial_backoff: Duration::from_secs(settings.initial_backoff_secs),
            max_backoff: Duration::from_secs(settings.max_backoff_secs),
        }
    }
}

/// Runs commands on remote hosts.
///
/// Commands against the same `user@host:port` never overlap; commands
/// against different hosts may run concurrently.
pub struct RemoteExecutor {
    transport: Arc<dyn RemoteTransport>,
    policy: RetryPolicy,
    host_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl std::fmt::Debug for RemoteExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteExecutor")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RemoteExecutor {
    /// Creates an executor.
    #[must_use]
    pub fn new(transport: Arc<dyn RemoteTransport>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy,
            host_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the retry policy.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn host_lock(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .host_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(key.to_string()).or_default())
    }

    /// Runs a command and returns its output whatever the exit status.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Connection`] if the host stays unreachable for
    /// every attempt, or [`RemoteError::Spawn`] if the client cannot run.
    pub async fn execute(&self, connection: &RemoteConnection, command: &str) -> Result<CommandOutput> {
        self.run(connection, command, None).await
    }

    /// Runs a command, feeding `input` to its standard input.
    ///
    /// # Errors
    ///
    /// Same as [`RemoteExecutor::execute`].
    pub async fn execute_with_stdin(
        &self,
        connection: &RemoteConnection,
        command: &str,
        input: &[u8],
    ) -> Result<CommandOutput> {
        self.run(connection, command, Some(input)).await
    }

    /// Runs a command and fails on a non-zero exit status.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::CommandFailed`] on a non-zero exit, or any
    /// error of [`RemoteExecutor::execute`].
    pub async fn execute_checked(
        &self,
        connection: &RemoteConnection,
        command: &str,
    ) -> Result<CommandOutput> {
        let output = self.execute(connection, command).await?;
        check(connection, output)
    }

    /// Writes `content` to `path` on the remote host with the given mode.
    ///
    /// The content travels over standard input; only the quoted path is
    /// part of the command line.
    ///
    /// # Errors
    ///
    /// Returns an error if the host is unreachable or the write fails.
    pub async fn upload(
        &self,
        connection: &RemoteConnection,
        path: &str,
        content: &[u8],
        mode: u32,
    ) -> Result<()> {
        let command = upload_command(path, mode);
        debug!("Uploading {} bytes to {connection}:{path}", content.len());
        let output = self.execute_with_stdin(connection, &command, content).await?;
        check(connection, output).map(|_| ())
    }

    async fn run(
        &self,
        connection: &RemoteConnection,
        command: &str,
        stdin: Option<&[u8]>,
    ) -> Result<CommandOutput> {
        let key = connection.key();
        let lock = self.host_lock(&key);
        let _guard = lock.lock().await;

        let attempts = self.policy.attempts();
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            debug!("Running on {key} (attempt {attempt}/{attempts}): {command}");

            match self.transport.run(connection, command, stdin).await {
                Ok(output) => {
                    if attempt > 1 {
                        info!("Connected to {key} after {attempt} attempt(s)");
                    }
                    return Ok(output);
                }
                Err(TransportError::Unreachable(message)) => {
                    warn!("{key} unreachable (attempt {attempt}/{attempts}): {message}");
                    last_error = message;
                    if attempt < attempts {
                        tokio::time::sleep(self.policy.delay_after(attempt)).await;
                    }
                }
                Err(TransportError::Io(message)) => {
                    return Err(StackupError::Remote(RemoteError::Spawn { message }));
                }
            }
        }

        Err(StackupError::Remote(RemoteError::Connection {
            host: key,
            attempts,
            message: last_error,
        }))
    }
}

fn check(connection: &RemoteConnection, output: CommandOutput) -> Result<CommandOutput> {
    if output.success() {
        Ok(output)
    } else {
        Err(StackupError::Remote(RemoteError::CommandFailed {
            host: connection.key(),
            exit_code: output.exit_code,
            stderr: output.stderr.trim().to_string(),
        }))
    }
}

/// Builds the shell command that stores standard input at `path`.
#[must_use]
pub fn upload_command(path: &str, mode: u32) -> String {
    let quoted = shell_quote(path);
    let parent = match path.rsplit_once('/') {
        Some(("", _)) => String::from("/"),
        Some((dir, _)) => dir.to_string(),
        None => String::from("."),
    };
    format!(
        "umask 077 && mkdir -p {} && cat > {quoted} && chmod {mode:o} {quoted}",
        shell_quote(&parent)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    fn conn(host: &str) -> RemoteConnection {
        RemoteConnection::new(host, "/tmp/key")
    }

    /// Unreachable for the first `fail_times` calls, then succeeds.
    struct FlakyTransport {
        fail_times: u32,
        calls: AtomicU32,
        last_stdin: Mutex<Option<Vec<u8>>>,
    }

    impl FlakyTransport {
        fn new(fail_times: u32) -> Self {
            Self {
                fail_times,
                calls: AtomicU32::new(0),
                last_stdin: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl RemoteTransport for FlakyTransport {
        async fn run(
            &self,
            _connection: &RemoteConnection,
            command: &str,
            stdin: Option<&[u8]>,
        ) -> std::result::Result<CommandOutput, TransportError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.fail_times {
                return Err(TransportError::Unreachable(String::from("connection refused")));
            }
            *self.last_stdin.lock().unwrap() = stdin.map(<[u8]>::to_vec);
            let exit_code = i32::from(command.starts_with("false"));
            Ok(CommandOutput {
                exit_code,
                stdout: format!("ran: {command}"),
                stderr: if exit_code == 0 { String::new() } else { String::from("boom") },
            })
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 6,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(10),
        };
        let delays: Vec<u64> = (1..=5).map(|a| policy.delay_after(a).as_secs()).collect();
        assert_eq!(delays, vec![2, 4, 8, 10, 10]);
    }

    #[tokio::test]
    async fn test_succeeds_on_attempt_k() {
        let transport = Arc::new(FlakyTransport::new(3));
        let executor = RemoteExecutor::new(transport.clone(), fast_policy(5));

        let output = executor.execute(&conn("h1"), "echo hi").await.expect("reachable on 4th");
        assert_eq!(output.stdout, "ran: echo hi");
        assert_eq!(transport.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_exactly_n_attempts_when_unreachable() {
        let transport = Arc::new(FlakyTransport::new(u32::MAX));
        let executor = RemoteExecutor::new(transport.clone(), fast_policy(4));

        let err = executor.execute(&conn("h1"), "true").await.expect_err("never reachable");
        assert_eq!(transport.calls.load(Ordering::SeqCst), 4);
        match err {
            StackupError::Remote(RemoteError::Connection { host, attempts, .. }) => {
                assert_eq!(host, "root@h1:22");
                assert_eq!(attempts, 4);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_zero_attempts_still_tries_once() {
        let transport = Arc::new(FlakyTransport::new(0));
        let executor = RemoteExecutor::new(transport.clone(), fast_policy(0));
        executor.execute(&conn("h1"), "true").await.expect("one attempt");
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_execute_checked_maps_exit_status() {
        let executor = RemoteExecutor::new(Arc::new(FlakyTransport::new(0)), fast_policy(1));
        let err = executor
            .execute_checked(&conn("h1"), "false")
            .await
            .expect_err("non-zero exit");
        assert!(matches!(
            err,
            StackupError::Remote(RemoteError::CommandFailed { exit_code: 1, ref stderr, .. }) if stderr == "boom"
        ));

        let output = executor.execute(&conn("h1"), "false").await.expect("unchecked");
        assert_eq!(output.exit_code, 1);
    }

    #[tokio::test]
    async fn test_upload_sends_content_on_stdin() {
        let transport = Arc::new(FlakyTransport::new(0));
        let executor = RemoteExecutor::new(transport.clone(), fast_policy(1));

        executor
            .upload(&conn("h1"), "/root/Caddyfile", b"it's { here }", 0o600)
            .await
            .expect("upload");

        let stdin = transport.last_stdin.lock().unwrap().clone();
        assert_eq!(stdin.as_deref(), Some(&b"it's { here }"[..]));
    }

    #[test]
    fn test_upload_command_quotes_path_only() {
        assert_eq!(
            upload_command("/root/Caddyfile", 0o600),
            "umask 077 && mkdir -p '/root' && cat > '/root/Caddyfile' && chmod 600 '/root/Caddyfile'"
        );
        assert_eq!(
            upload_command("/Caddyfile", 0o644),
            "umask 077 && mkdir -p '/' && cat > '/Caddyfile' && chmod 644 '/Caddyfile'"
        );
    }

    /// Records the peak number of overlapping commands.
    #[derive(Default)]
    struct ConcurrencyProbe {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl RemoteTransport for ConcurrencyProbe {
        async fn run(
            &self,
            _connection: &RemoteConnection,
            _command: &str,
            _stdin: Option<&[u8]>,
        ) -> std::result::Result<CommandOutput, TransportError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(CommandOutput::default())
        }
    }

    #[tokio::test]
    async fn test_commands_to_same_host_are_serialized() {
        let probe = Arc::new(ConcurrencyProbe::default());
        let executor = RemoteExecutor::new(probe.clone(), fast_policy(1));
        let host = conn("h1");

        let (a, b, c) = tokio::join!(
            executor.execute(&host, "one"),
            executor.execute(&host, "two"),
            executor.execute(&host, "three"),
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(probe.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_commands_to_different_hosts_overlap() {
        let probe = Arc::new(ConcurrencyProbe::default());
        let executor = RemoteExecutor::new(probe.clone(), fast_policy(1));
        let (h1, h2) = (conn("h1"), conn("h2"));

        let (a, b) = tokio::join!(executor.execute(&h1, "one"), executor.execute(&h2, "two"));
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(probe.peak.load(Ordering::SeqCst), 2);
    }
}
