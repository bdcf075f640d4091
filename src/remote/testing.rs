//! In-memory transport for adapter tests.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{CommandOutput, RemoteConnection, RemoteExecutor, RemoteTransport, RetryPolicy, TransportError};

/// Records every command and answers from canned responses.
#[derive(Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<(String, Option<Vec<u8>>)>>,
    responses: Mutex<Vec<(String, CommandOutput)>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers commands containing `needle` with `output`; first match wins.
    pub fn respond(self, needle: &str, exit_code: i32, stdout: &str) -> Self {
        self.responses.lock().unwrap().push((
            needle.to_string(),
            CommandOutput {
                exit_code,
                stdout: stdout.to_string(),
                stderr: if exit_code == 0 { String::new() } else { String::from("failed") },
            },
        ));
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(c, _)| c.clone()).collect()
    }

    pub fn stdin_of(&self, needle: &str) -> Option<Vec<u8>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .find(|(c, _)| c.contains(needle))
            .and_then(|(_, stdin)| stdin.clone())
    }
}

#[async_trait]
impl RemoteTransport for RecordingTransport {
    async fn run(
        &self,
        _connection: &RemoteConnection,
        command: &str,
        stdin: Option<&[u8]>,
    ) -> Result<CommandOutput, TransportError> {
        self.calls
            .lock()
            .unwrap()
            .push((command.to_string(), stdin.map(<[u8]>::to_vec)));

        let responses = self.responses.lock().unwrap();
        Ok(responses
            .iter()
            .find(|(needle, _)| command.contains(needle.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_default())
    }
}

/// Executor with a single attempt and no backoff.
pub fn executor(transport: Arc<RecordingTransport>) -> Arc<RemoteExecutor> {
    Arc::new(RemoteExecutor::new(
        transport,
        RetryPolicy {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        },
    ))
}

pub fn connection() -> RemoteConnection {
    RemoteConnection::new("203.0.113.7", "/keys/deploy_key")
}
