//! Connection parameters and command results.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Default login user for remote resources.
pub const DEFAULT_USER: &str = "root";

/// Default SSH port.
pub const DEFAULT_PORT: u16 = 22;

/// How to reach a remote host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RemoteConnection {
    /// Host name or IP address.
    pub host: String,
    /// Login user.
    pub user: String,
    /// SSH port.
    pub port: u16,
    /// Path of the private key file.
    pub identity_file: PathBuf,
}

/// Result of a command that ran on a remote host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `-1` if the process was terminated by a signal.
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl RemoteConnection {
    /// Creates a connection with the default user and port.
    #[must_use]
    pub fn new(host: impl Into<String>, identity_file: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            user: DEFAULT_USER.to_string(),
            port: DEFAULT_PORT,
            identity_file: identity_file.into(),
        }
    }

    /// Sets the login user.
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Sets the port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Returns the `user@host:port` key used for per-host serialization.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.port)
    }
}

impl fmt::Display for RemoteConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

impl CommandOutput {
    /// Returns true if the command exited with status 0.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Quotes a value for a POSIX shell.
///
/// The value is wrapped in single quotes; embedded single quotes become
/// `'\''`.
#[must_use]
pub fn shell_quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        if c == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(c);
        }
    }
    quoted.push('\'');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_key() {
        let conn = RemoteConnection::new("203.0.113.7", "/tmp/key")
            .with_user("deploy")
            .with_port(2222);
        assert_eq!(conn.key(), "deploy@203.0.113.7:2222");
        assert_eq!(RemoteConnection::new("h", "k").key(), "root@h:22");
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("a b;c"), "'a b;c'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("$(reboot)"), "'$(reboot)'");
    }
}
