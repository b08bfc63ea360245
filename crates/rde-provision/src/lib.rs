//! Provisioning-time CLI that injects the external HTTP server CA into the
//! RestDataExport config record held in etcd.
//!
//! One sequential transaction per run: resolve configuration, connect to the
//! store (plain or mutual TLS), get the record, set `http_server_ca`, put the
//! record back. Every I/O failure is fatal and exits non-zero.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use etcd_gateway::Client;

pub mod config;
pub mod mutate;

pub use config::{ConfigError, EnvOverrides, ProvisionConfig};

#[derive(Parser, Debug)]
#[command(name = "rde-provision")]
#[command(about = "Injects the HTTP server CA into the RestDataExport config record in etcd")]
pub struct Cli {
    /// Path to the CA certificate of the external HTTP server
    #[arg(long = "http_cert", visible_alias = "hca")]
    pub http_cert: Option<PathBuf>,
    /// Path to the etcd CA certificate (mutual TLS)
    #[arg(long = "ca_cert", visible_alias = "ca")]
    pub ca_cert: Option<PathBuf>,
    /// Path to the etcd client certificate (mutual TLS)
    #[arg(short = 'c', long = "cert")]
    pub cert: Option<PathBuf>,
    /// Path to the etcd client private key (mutual TLS)
    #[arg(short = 'k', long = "key")]
    pub key: Option<PathBuf>,
    /// Etcd host
    #[arg(long = "hostname", visible_alias = "host", default_value = "localhost")]
    pub hostname: String,
    /// Etcd port
    #[arg(long = "port", default_value_t = 2379)]
    pub port: u16,
}

pub async fn run(cli: Cli, env: EnvOverrides) -> Result<()> {
    let config = ProvisionConfig::resolve(&cli, &env)?;
    if config.dev_mode {
        tracing::info!("development mode: connecting plain and injecting an empty CA");
    }

    let client = Client::connect(&config.endpoint, config.tls.as_ref())
        .context("failed to create etcd client")?;

    mutate::update_config(&client, &config).await
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::Cli;

    #[test]
    fn defaults_match_the_provisioning_contract() {
        let cli = Cli::try_parse_from(["rde-provision"]).expect("no flags are required");
        assert_eq!(cli.hostname, "localhost");
        assert_eq!(cli.port, 2379);
        assert!(cli.http_cert.is_none());
        assert!(cli.ca_cert.is_none());
    }

    #[test]
    fn aliases_mirror_the_original_flag_spellings() {
        let cli = Cli::try_parse_from([
            "rde-provision",
            "--hca",
            "/certs/http_ca.pem",
            "--ca",
            "/certs/ca.pem",
            "-c",
            "/certs/client.pem",
            "-k",
            "/certs/client_key.pem",
            "--host",
            "etcd.internal",
            "--port",
            "12379",
        ])
        .expect("aliases parse");
        assert_eq!(
            cli.http_cert.as_deref(),
            Some(std::path::Path::new("/certs/http_ca.pem"))
        );
        assert_eq!(cli.hostname, "etcd.internal");
        assert_eq!(cli.port, 12379);
    }

    #[test]
    fn non_numeric_port_is_rejected() {
        let error = Cli::try_parse_from(["rde-provision", "--port", "not-a-port"])
            .expect_err("port must be numeric");
        assert_eq!(error.kind(), clap::error::ErrorKind::ValueValidation);
    }
}
