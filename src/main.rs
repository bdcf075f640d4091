//! Stackup CLI entrypoint.
//!
//! This is the main entrypoint for the stackup command-line tool. It is the
//! only place that reads the process environment.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use stackup_deploy::cli::{Cli, Commands, OutputFormatter, PlanSummary};
use stackup_deploy::config::{
    ConfigParser, ConfigValidator, DeployConfig, StackSettings, environment_bag,
    find_settings_file,
};
use stackup_deploy::error::{ConfigError, Result};
use stackup_deploy::planner::{DependencyGraph, Orchestrator};
use stackup_deploy::provider::AdapterRegistry;
use stackup_deploy::remote::{OpenSshTransport, RemoteExecutor, RetryPolicy};
use stackup_deploy::render::{DnsChallenge, ProxyRoute, derive_domain, render_caddyfile};
use stackup_deploy::stack;

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, cli.log_json);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
///
/// `RUST_LOG` wins over the default level; `-v` forces debug.
fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<ExitCode> {
    let formatter = OutputFormatter::new(cli.output);
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Validate { warnings } => cmd_validate(&config, warnings, &formatter),
        Commands::Plan => cmd_plan(&config, &formatter),
        Commands::Render => cmd_render(&config, &formatter),
        Commands::Apply { max_parallel } => cmd_apply(&config, max_parallel, &formatter).await,
    }
}

/// Builds the run configuration from the settings file, `.env` and the
/// process environment.
fn load_config(cli: &Cli) -> Result<DeployConfig> {
    let base = std::env::current_dir()?;
    let parser = ConfigParser::new().with_base_path(&base);

    let settings = match cli.settings.clone().or_else(|| find_settings_file(&base)) {
        Some(path) => parser.load_settings_file(path)?,
        None => {
            debug!("No settings file found, using defaults");
            StackSettings::default()
        }
    };

    if let Some(path) = &cli.env_file {
        require_file(&base, path)?;
    }
    let dotenv = parser.read_dotenv(cli.env_file.as_deref())?;
    let env = environment_bag(std::env::vars(), dotenv);

    parser.build(&cli.stage, &env, settings)
}

fn require_file(base: &Path, path: &Path) -> Result<()> {
    let resolved: PathBuf = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    if resolved.exists() {
        Ok(())
    } else {
        Err(ConfigError::FileNotFound { path: resolved }.into())
    }
}

/// Validate configuration.
fn cmd_validate(
    config: &DeployConfig,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    info!("Validating configuration for stage {}", config.stage);

    let validation = ConfigValidator::new().validate(config)?;
    DependencyGraph::build(stack::descriptors(config))?;

    println!("{}", formatter.format_validation(config, &validation, show_warnings));
    Ok(ExitCode::SUCCESS)
}

/// Show the creation plan.
fn cmd_plan(config: &DeployConfig, formatter: &OutputFormatter) -> Result<ExitCode> {
    let validation = ConfigValidator::new().validate(config)?;
    for warning in &validation.warnings {
        warn!("{warning}");
    }

    let graph = DependencyGraph::build(stack::descriptors(config))?;
    println!("{}", formatter.format_plan(&PlanSummary::new(config, &graph)));
    Ok(ExitCode::SUCCESS)
}

/// Print the reverse proxy configuration.
fn cmd_render(config: &DeployConfig, formatter: &OutputFormatter) -> Result<ExitCode> {
    let domain = derive_domain(&config.stage, &config.secrets.domain_name);
    let routes = [ProxyRoute {
        domain: domain.clone(),
        upstream_host: config.settings.app.container_name.clone(),
        upstream_port: config.settings.app.port,
    }];
    let document = render_caddyfile(&routes, &DnsChallenge::default());

    println!("{}", formatter.format_render(&domain, &document));
    Ok(ExitCode::SUCCESS)
}

/// Create every resource of the stack.
async fn cmd_apply(
    config: &DeployConfig,
    max_parallel: Option<usize>,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let validation = ConfigValidator::new().validate(config)?;
    for warning in &validation.warnings {
        warn!("{warning}");
    }

    let graph = DependencyGraph::build(stack::descriptors(config))?;
    info!(
        "Applying {} resources to stage {} (removal policy: {})",
        graph.len(),
        config.stage,
        config.stage.removal_policy()
    );

    let ssh = &config.settings.ssh;
    let transport = Arc::new(OpenSshTransport::new(Duration::from_secs(ssh.connect_timeout_secs)));
    let executor = Arc::new(RemoteExecutor::new(transport, RetryPolicy::from(ssh)));
    let adapters = AdapterRegistry::production(config, executor)?;

    let orchestrator = Orchestrator::new(config.stage.as_str())
        .with_max_parallel(max_parallel.unwrap_or(config.settings.orchestrator.max_parallel));

    let token = orchestrator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; waiting for running resources to finish");
            token.cancel();
        }
    });

    let result = orchestrator.run(&graph, &adapters).await?;
    println!("{}", formatter.format_result(&result));

    Ok(if result.complete() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
