//! Docker objects on the remote host, driven through the `docker` CLI.
//!
//! Every value interpolated into a command line goes through
//! [`shell_quote`]. Container environment files and build contexts travel
//! over standard input.

use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::Secret;
use crate::error::{ProviderError, Result, StackupError};
use crate::remote::{RemoteExecutor, shell_quote};
use crate::resource::{Outputs, ResourceKind};

use super::{ProviderAdapter, ResourceContext};

/// Name of the Dockerfile inside uploaded build contexts.
const CONTEXT_DOCKERFILE: &str = ".stackup.Dockerfile";

/// Directory, relative to the login home, holding container env files.
const ENV_FILE_DIR: &str = ".stackup";

/// Build contexts above this size are reported.
const LARGE_CONTEXT_BYTES: usize = 500 * 1024 * 1024;

#[derive(Debug, Deserialize)]
struct NamedInputs {
    name: String,
}

/// Creates a container network unless it already exists.
#[derive(Debug, Clone)]
pub struct NetworkAdapter {
    executor: Arc<RemoteExecutor>,
}

impl NetworkAdapter {
    /// Creates the adapter.
    #[must_use]
    pub const fn new(executor: Arc<RemoteExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl ProviderAdapter for NetworkAdapter {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Network
    }

    async fn create(&self, ctx: &ResourceContext<'_>) -> Result<Outputs> {
        let NamedInputs { name } = ctx.inputs_as()?;
        let connection = ctx.connection()?;
        let quoted = shell_quote(&name);

        let command = format!(
            "docker network inspect --format {} {quoted} 2>/dev/null || docker network create --driver bridge {quoted}",
            shell_quote("{{.Id}}")
        );
        let output = self.executor.execute_checked(connection, &command).await?;
        let id = last_line(&output.stdout);
        info!("Network {name} ready ({id})");

        Ok(Outputs::new().with("id", id).with("name", name))
    }
}

/// Creates a named volume unless it already exists.
#[derive(Debug, Clone)]
pub struct VolumeAdapter {
    executor: Arc<RemoteExecutor>,
}

impl VolumeAdapter {
    /// Creates the adapter.
    #[must_use]
    pub const fn new(executor: Arc<RemoteExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl ProviderAdapter for VolumeAdapter {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Volume
    }

    async fn create(&self, ctx: &ResourceContext<'_>) -> Result<Outputs> {
        let NamedInputs { name } = ctx.inputs_as()?;
        let connection = ctx.connection()?;
        let quoted = shell_quote(&name);

        let command = format!(
            "docker volume inspect --format {} {quoted} 2>/dev/null || docker volume create {quoted}",
            shell_quote("{{.Name}}")
        );
        self.executor.execute_checked(connection, &command).await?;
        info!("Volume {name} ready");

        Ok(Outputs::new().with("name", name))
    }
}

#[derive(Debug, Deserialize)]
struct ImageInputs {
    image_name: String,
    context: PathBuf,
    dockerfile: PathBuf,
    #[serde(default)]
    platform: Option<String>,
}

/// Builds an image on the remote host from a local build context.
#[derive(Debug, Clone)]
pub struct ImageAdapter {
    executor: Arc<RemoteExecutor>,
}

impl ImageAdapter {
    /// Creates the adapter.
    #[must_use]
    pub const fn new(executor: Arc<RemoteExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl ProviderAdapter for ImageAdapter {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Image
    }

    async fn create(&self, ctx: &ResourceContext<'_>) -> Result<Outputs> {
        let inputs: ImageInputs = ctx.inputs_as()?;
        let connection = ctx.connection()?;

        if !inputs.context.is_dir() {
            return Err(ProviderError::invalid_input(
                ctx.id,
                format!("build context {} is not a directory", inputs.context.display()),
            )
            .into());
        }

        let (context, dockerfile) = (inputs.context.clone(), inputs.dockerfile.clone());
        let archive = tokio::task::spawn_blocking(move || build_context(&context, &dockerfile))
            .await
            .map_err(|e| StackupError::internal(format!("build context task failed: {e}")))?
            .map_err(|e| ProviderError::local(format!("failed to package build context: {e}")))?;

        let mut command = String::from("docker build");
        if let Some(platform) = &inputs.platform {
            command.push_str(&format!(" --platform {}", shell_quote(platform)));
        }
        command.push_str(&format!(
            " -t {} -f {} -",
            shell_quote(&inputs.image_name),
            shell_quote(CONTEXT_DOCKERFILE)
        ));

        info!(
            "Building image {} on {connection} ({} KiB context)",
            inputs.image_name,
            archive.len() / 1024
        );
        let output = self
            .executor
            .execute_with_stdin(connection, &command, &archive)
            .await?;
        if !output.success() {
            return Err(crate::error::RemoteError::CommandFailed {
                host: connection.key(),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            }
            .into());
        }

        let inspect = format!(
            "docker image inspect --format {} {}",
            shell_quote("{{.Id}}"),
            shell_quote(&inputs.image_name)
        );
        let image_id = last_line(&self.executor.execute_checked(connection, &inspect).await?.stdout);

        Ok(Outputs::new()
            .with("image_name", inputs.image_name)
            .with("image_id", image_id))
    }
}

/// Packs `context` and `dockerfile` into a gzipped tar archive.
///
/// The Dockerfile is stored as `.stackup.Dockerfile` so it may live outside
/// the context directory.
///
/// # Errors
///
/// Returns an error if a file cannot be read.
pub fn build_context(context: &Path, dockerfile: &Path) -> std::io::Result<Vec<u8>> {
    debug!("Creating build context from: {}", context.display());

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut tar = tar::Builder::new(encoder);
    tar.append_dir_all(".", context)?;

    let content = std::fs::read(dockerfile)?;
    let mut header = tar::Header::new_gnu();
    header.set_path(CONTEXT_DOCKERFILE)?;
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    tar.append(&header, content.as_slice())?;

    let archive = tar.into_inner()?.finish()?;
    if archive.len() > LARGE_CONTEXT_BYTES {
        warn!(
            "Build context of {} is {} MiB; consider a .dockerignore",
            context.display(),
            archive.len() / 1024 / 1024
        );
    }
    Ok(archive)
}

#[derive(Debug, Clone, Deserialize)]
struct PortMapping {
    internal: u16,
    external: u16,
}

#[derive(Debug, Clone, Deserialize)]
struct VolumeMount {
    source: String,
    target: String,
}

#[derive(Debug, Clone, Deserialize)]
struct HealthCheck {
    test: Vec<String>,
    interval: String,
    timeout: String,
    retries: u32,
    start_period: String,
}

#[derive(Debug, Deserialize)]
struct ContainerInputs {
    name: String,
    image: String,
    #[serde(default)]
    network: Option<String>,
    #[serde(default)]
    ports: Vec<PortMapping>,
    #[serde(default)]
    volumes: Vec<VolumeMount>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    #[serde(default)]
    secret_env: Vec<String>,
    #[serde(default = "default_restart")]
    restart: String,
    #[serde(default)]
    healthcheck: Option<HealthCheck>,
}

fn default_restart() -> String {
    String::from("always")
}

/// Replaces and starts a container, then waits until it runs.
#[derive(Clone)]
pub struct ContainerAdapter {
    executor: Arc<RemoteExecutor>,
    secrets: HashMap<String, Secret>,
    ready_timeout: Duration,
    poll_interval: Duration,
}

impl std::fmt::Debug for ContainerAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.secrets.keys().collect();
        names.sort();
        f.debug_struct("ContainerAdapter")
            .field("secrets", &names)
            .field("ready_timeout", &self.ready_timeout)
            .finish_non_exhaustive()
    }
}

impl ContainerAdapter {
    /// Creates the adapter.
    ///
    /// `secrets` maps environment variable names to values that containers
    /// may request through their `secret_env` input.
    #[must_use]
    pub const fn new(
        executor: Arc<RemoteExecutor>,
        secrets: HashMap<String, Secret>,
        ready_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            executor,
            secrets,
            ready_timeout,
            poll_interval,
        }
    }

    fn env_file(&self, resource: &str, inputs: &ContainerInputs) -> Result<Option<String>> {
        if inputs.env.is_empty() && inputs.secret_env.is_empty() {
            return Ok(None);
        }

        let mut lines = String::new();
        let mut push = |key: &str, value: &str| -> Result<()> {
            if key.contains(['=', '\n']) || value.contains('\n') {
                return Err(ProviderError::invalid_input(
                    resource,
                    format!("environment variable '{key}' cannot be written to an env file"),
                )
                .into());
            }
            lines.push_str(key);
            lines.push('=');
            lines.push_str(value);
            lines.push('\n');
            Ok(())
        };

        for (key, value) in &inputs.env {
            push(key, value)?;
        }
        for key in &inputs.secret_env {
            let secret = self.secrets.get(key).ok_or_else(|| {
                ProviderError::invalid_input(resource, format!("unknown secret '{key}'"))
            })?;
            push(key, secret.expose())?;
        }
        Ok(Some(lines))
    }
}

/// Builds the `docker run` command line.
fn run_command(inputs: &ContainerInputs, env_file: Option<&str>) -> String {
    let mut args = vec![
        String::from("docker run -d"),
        format!("--name {}", shell_quote(&inputs.name)),
        format!("--restart {}", shell_quote(&inputs.restart)),
    ];
    if let Some(network) = &inputs.network {
        args.push(format!("--network {}", shell_quote(network)));
    }
    for port in &inputs.ports {
        args.push(format!("-p {}:{}", port.external, port.internal));
    }
    for volume in &inputs.volumes {
        args.push(format!(
            "-v {}",
            shell_quote(&format!("{}:{}", volume.source, volume.target))
        ));
    }
    if let Some(path) = env_file {
        args.push(format!("--env-file {}", shell_quote(path)));
    }
    if let Some(health) = &inputs.healthcheck {
        args.push(format!("--health-cmd {}", shell_quote(&health_command(&health.test))));
        args.push(format!("--health-interval {}", shell_quote(&health.interval)));
        args.push(format!("--health-timeout {}", shell_quote(&health.timeout)));
        args.push(format!("--health-retries {}", health.retries));
        args.push(format!("--health-start-period {}", shell_quote(&health.start_period)));
    }
    args.push(shell_quote(&inputs.image));
    args.join(" ")
}

/// Turns a `["CMD", ...]` or `["CMD-SHELL", cmd]` test into a shell command.
fn health_command(test: &[String]) -> String {
    match test.split_first() {
        Some((kind, rest)) if kind == "CMD-SHELL" => rest.join(" "),
        Some((kind, rest)) if kind == "CMD" => rest
            .iter()
            .map(|arg| shell_quote(arg))
            .collect::<Vec<_>>()
            .join(" "),
        _ => test.join(" "),
    }
}

#[async_trait]
impl ProviderAdapter for ContainerAdapter {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Container
    }

    async fn create(&self, ctx: &ResourceContext<'_>) -> Result<Outputs> {
        let inputs: ContainerInputs = ctx.inputs_as()?;
        let connection = ctx.connection()?;

        let env_path = match self.env_file(ctx.id, &inputs)? {
            Some(content) => {
                let path = format!("{ENV_FILE_DIR}/{}.env", inputs.name);
                self.executor
                    .upload(connection, &path, content.as_bytes(), 0o600)
                    .await?;
                Some(path)
            }
            None => None,
        };

        let remove = format!("docker rm -f {} >/dev/null 2>&1 || true", shell_quote(&inputs.name));
        self.executor.execute_checked(connection, &remove).await?;

        info!("Starting container {} from {}", inputs.name, inputs.image);
        let output = self
            .executor
            .execute_checked(connection, &run_command(&inputs, env_path.as_deref()))
            .await?;

        Ok(Outputs::new()
            .with("id", last_line(&output.stdout))
            .with("name", inputs.name))
    }

    async fn await_ready(&self, ctx: &ResourceContext<'_>, outputs: &Outputs) -> Result<()> {
        let connection = ctx.connection()?;
        let name = outputs.get_str("name").ok_or_else(|| ProviderError::MissingOutput {
            resource: ctx.id.to_string(),
            output: String::from("name"),
        })?;
        let command = format!(
            "docker inspect -f {} {}",
            shell_quote("{{.State.Running}}"),
            shell_quote(name)
        );

        let start = Instant::now();
        loop {
            let output = self.executor.execute(connection, &command).await?;
            if output.success() && output.stdout.trim() == "true" {
                info!("Container {name} is running");
                return Ok(());
            }

            if start.elapsed() >= self.ready_timeout {
                return Err(ProviderError::NotReady {
                    resource: ctx.id.to_string(),
                    message: format!("container {name} is not running"),
                }
                .into());
            }

            debug!("Container {name} not running yet");
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

fn last_line(output: &str) -> String {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .next_back()
        .unwrap_or_default()
        .to_string()
}
