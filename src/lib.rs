// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![forbid(unsafe_code)]               // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(nonstandard_style)]           // Non-standard code style is forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::redundant_clone)]     // Useless clones warning

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Stackup
//!
//! Dependency-ordered provisioning of a single-server container stack.
//!
//! ## Overview
//!
//! A stack is a set of resource descriptors: an SSH keypair, a Hetzner
//! Cloud firewall and server, a Cloudflare DNS record, and Docker networks,
//! volumes, images and containers on the server, with Caddy terminating TLS
//! in front of the application.
//!
//! Descriptors reference each other's outputs (the server's address, the
//! key's path). Those references are the edges of a dependency graph; the
//! orchestrator walks it in topological order, creates each resource once
//! through its provider adapter and hands outputs to the resources that
//! need them.
//!
//! ## Modules
//!
//! - [`config`]: Environment, `.env` and settings file handling
//! - [`resource`]: Descriptors, deferred references and outputs
//! - [`planner`]: Dependency graph, orchestrator and run reports
//! - [`provider`]: Adapters for the cloud APIs, local keys and Docker
//! - [`remote`]: SSH command execution with connection retry
//! - [`render`]: Stage domains and the Caddyfile
//! - [`stack`]: The descriptors of the deployment
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! # stackup.yaml - every field is optional
//! project: nuxt-hetzner
//! server:
//!   server_type: cax11
//!   image: debian-12
//! app:
//!   context: ./nuxt
//!   port: 3000
//! orchestrator:
//!   max_parallel: 4
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod planner;
pub mod provider;
pub mod remote;
pub mod render;
pub mod resource;
pub mod stack;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, ConfigValidator, DeployConfig};
pub use error::{Result, StackupError};
pub use planner::{CancelToken, DependencyGraph, DeploymentResult, Orchestrator};
pub use provider::{AdapterRegistry, ProviderAdapter, ResourceContext};
pub use remote::{OpenSshTransport, RemoteExecutor, RemoteTransport};
pub use resource::{InputValue, Outputs, ResourceDescriptor, ResourceKind};
