//! Configuration module for the stackup deployment system.
//!
//! This module handles all configuration-related functionality:
//! - Reading required credentials from the environment and `.env`
//! - Parsing the optional `stackup.yaml` settings file
//! - Validation of names, ports and scheduler settings

mod parser;
mod spec;
mod validator;

pub use parser::{
    ConfigParser, DEFAULT_SETTINGS_FILES, environment_bag, find_settings_file, missing_required,
};
pub use spec::{
    AppSettings, DEV_STAGE, DeployConfig, DnsSettings, OrchestratorSettings, PRODUCTION_STAGE,
    ProxySettings, REQUIRED_ENV_VARS, RemovalPolicy, Secret, Secrets, ServerSettings, SshSettings,
    StackSettings, Stage,
};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
