//! Remote execution over SSH.
//!
//! This module handles:
//! - Connection parameters and shell quoting
//! - The transport seam and its OpenSSH implementation
//! - Connection retry and per-host command serialization

mod connection;
mod executor;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::{CommandOutput, DEFAULT_PORT, DEFAULT_USER, RemoteConnection, shell_quote};
pub use executor::{RemoteExecutor, RetryPolicy, upload_command};
pub use transport::{OpenSshTransport, RemoteTransport, TransportError};
