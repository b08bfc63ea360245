//! The read-modify-write transaction against the config record.

use anyhow::{Context, Result, bail};
use etcd_gateway::Client;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::{Map, Value};

use crate::config::ProvisionConfig;

/// Field of the config record this tool owns.
pub const HTTP_SERVER_CA_FIELD: &str = "http_server_ca";

/// Sets `http_server_ca` on the document; every other field is left alone.
pub fn inject_http_ca(document: &mut Map<String, Value>, ca: &str) {
    document.insert(
        HTTP_SERVER_CA_FIELD.to_string(),
        Value::String(ca.to_string()),
    );
}

/// Serializes with four-space indentation, the layout the stored record uses.
pub fn encode_document(document: &Map<String, Value>) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    document
        .serialize(&mut serializer)
        .context("failed to encode config document")?;
    Ok(buf)
}

/// Fetches the config record, injects the HTTP server CA, and writes the
/// merged document back to the same key. Every failure is fatal; a failure
/// between get and put leaves the stored record untouched.
pub async fn update_config(client: &Client, config: &ProvisionConfig) -> Result<()> {
    let key = &config.config_key;

    let kv = client
        .get(key)
        .await
        .with_context(|| format!("failed to fetch {key}"))?;
    let Some(kv) = kv else {
        bail!("config record {key} not found in etcd");
    };
    tracing::debug!(%key, revision = kv.mod_revision, "fetched config record");

    let text = String::from_utf8(kv.value)
        .with_context(|| format!("config record {key} is not valid UTF-8"))?;
    let mut document: Map<String, Value> = serde_json::from_str(&text)
        .with_context(|| format!("config record {key} is not a JSON object"))?;

    inject_http_ca(&mut document, &config.http_ca_cert);

    let encoded = encode_document(&document)?;
    let header = client
        .put(key, &encoded)
        .await
        .with_context(|| format!("failed to write {key}"))?;
    tracing::info!(%key, revision = ?header.revision(), "config record updated");

    Ok(())
}
