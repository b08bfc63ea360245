//! Resolution of flags, environment, and filesystem preconditions into one
//! immutable configuration value for the provisioning run.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use etcd_gateway::{StoreEndpoint, TlsMaterial};
use thiserror::Error;

use crate::Cli;

/// Logical path of the config record; the `ETCD_PREFIX` value is prepended.
pub const CONFIG_KEY: &str = "/RestDataExport/config";

/// Directory the external provisioning step leaves behind once certificate
/// material has been generated. Checked relative to the working directory.
pub const PROVISION_MARKER: &str = "../build/provision/Certificates";

/// Snapshot of the environment variables this tool consumes, captured once at
/// startup so nothing downstream reads the ambient environment.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub dev_mode: Option<String>,
    pub etcd_prefix: Option<String>,
}

impl EnvOverrides {
    pub fn capture() -> Self {
        Self {
            dev_mode: std::env::var("DEV_MODE").ok(),
            etcd_prefix: std::env::var("ETCD_PREFIX").ok(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid DEV_MODE: {0}")]
    InvalidDevMode(String),
    #[error("--ca_cert, --cert and --key must be given together or not at all")]
    PartialTlsMaterial,
    #[error("provisioning marker {0} not found; provision certificates before running")]
    MarkerMissing(String),
    #[error("--http_cert is required outside development mode")]
    HttpCaMissing,
    #[error("failed to read HTTP server CA {path}: {source}")]
    HttpCaUnreadable { path: String, source: io::Error },
}

/// Everything a provisioning run needs, resolved up front.
#[derive(Debug)]
pub struct ProvisionConfig {
    pub endpoint: StoreEndpoint,
    pub tls: Option<TlsMaterial>,
    pub dev_mode: bool,
    /// Effective store key, prefix included.
    pub config_key: String,
    /// Contents of the external HTTP server CA file; empty in dev mode.
    pub http_ca_cert: String,
}

impl ProvisionConfig {
    pub fn resolve(cli: &Cli, env: &EnvOverrides) -> Result<Self, ConfigError> {
        Self::resolve_in(cli, env, Path::new("."))
    }

    /// Like [`resolve`](Self::resolve) with the provisioning marker looked up
    /// under `base_dir` instead of the working directory.
    pub fn resolve_in(cli: &Cli, env: &EnvOverrides, base_dir: &Path) -> Result<Self, ConfigError> {
        let dev_mode = parse_truthy(env.dev_mode.as_deref())?;
        let prefix = env.etcd_prefix.clone().unwrap_or_default();
        let config_key = format!("{prefix}{CONFIG_KEY}");
        let endpoint = StoreEndpoint::new(cli.hostname.clone(), cli.port);

        // Dev mode connects plain and injects an empty CA no matter what
        // certificate flags were passed.
        if dev_mode {
            return Ok(Self {
                endpoint,
                tls: None,
                dev_mode,
                config_key,
                http_ca_cert: String::new(),
            });
        }

        let marker = base_dir.join(PROVISION_MARKER);
        if !marker.is_dir() {
            return Err(ConfigError::MarkerMissing(marker.display().to_string()));
        }

        let tls = tls_material(cli)?;

        let http_cert = cli.http_cert.as_ref().ok_or(ConfigError::HttpCaMissing)?;
        let http_ca_cert =
            fs::read_to_string(http_cert).map_err(|source| ConfigError::HttpCaUnreadable {
                path: http_cert.display().to_string(),
                source,
            })?;

        Ok(Self {
            endpoint,
            tls,
            dev_mode,
            config_key,
            http_ca_cert,
        })
    }
}

fn tls_material(cli: &Cli) -> Result<Option<TlsMaterial>, ConfigError> {
    match (&cli.ca_cert, &cli.cert, &cli.key) {
        (None, None, None) => Ok(None),
        (Some(ca_cert), Some(client_cert), Some(client_key)) => Ok(Some(TlsMaterial {
            ca_cert: PathBuf::from(ca_cert),
            client_cert: PathBuf::from(client_cert),
            client_key: PathBuf::from(client_key),
        })),
        _ => Err(ConfigError::PartialTlsMaterial),
    }
}

fn parse_truthy(raw: Option<&str>) -> Result<bool, ConfigError> {
    let Some(raw) = raw else {
        return Ok(false);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidDevMode(other.to_string())),
    }
}
