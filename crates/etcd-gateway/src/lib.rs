//! Minimal etcd v3 KV client speaking the grpc-gateway JSON API.
//!
//! Covers exactly the two calls a provisioning run needs, `range` and `put`,
//! over plain HTTP or mutual TLS. Keys and values are base64-encoded on the
//! wire per the gateway contract.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Host and port of the etcd gateway endpoint.
#[derive(Debug, Clone)]
pub struct StoreEndpoint {
    host: String,
    port: u16,
}

impl StoreEndpoint {
    /// An empty host falls back to `localhost`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let host = if host.trim().is_empty() {
            "localhost".to_string()
        } else {
            host.trim().to_string()
        };
        Self { host, port }
    }

    fn base_url(&self, tls: bool) -> String {
        let scheme = if tls { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

/// Certificate material for a mutually authenticated connection.
///
/// All three paths must point at readable PEM files; partial material is
/// rejected upstream before this type is constructed.
#[derive(Debug, Clone)]
pub struct TlsMaterial {
    pub ca_cert: PathBuf,
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("failed to read {path}: {source}")]
    ReadCertificate { path: String, source: io::Error },
    #[error("invalid certificate material in {path}: {source}")]
    Certificate {
        path: String,
        source: reqwest::Error,
    },
    #[error("failed to build HTTP client: {0}")]
    BuildClient(reqwest::Error),
    #[error("request to {url} failed: {source}")]
    Request { url: String, source: reqwest::Error },
    #[error("etcd gateway returned {status}: {body}")]
    Http { status: StatusCode, body: String },
    #[error("failed to decode gateway response: {0}")]
    Decode(String),
}

/// One key-value pair as returned by a range call.
#[derive(Debug, Clone)]
pub struct KeyValue {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub mod_revision: i64,
}

/// Header fields the gateway attaches to every mutation response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseHeader {
    #[serde(default)]
    pub cluster_id: Option<String>,
    #[serde(default)]
    pub member_id: Option<String>,
    #[serde(default)]
    pub revision: Option<String>,
}

impl ResponseHeader {
    /// Store revision after the mutation, when the gateway reported one.
    pub fn revision(&self) -> Option<i64> {
        self.revision.as_deref().and_then(|raw| raw.parse().ok())
    }
}

#[derive(Serialize)]
struct RangeRequest {
    key: String,
}

#[derive(Deserialize)]
struct RangeResponse {
    #[serde(default)]
    kvs: Vec<WireKeyValue>,
}

#[derive(Deserialize)]
struct WireKeyValue {
    key: String,
    #[serde(default)]
    value: String,
    #[serde(default)]
    mod_revision: Option<String>,
}

#[derive(Serialize)]
struct PutRequest {
    key: String,
    value: String,
}

#[derive(Deserialize)]
struct PutResponse {
    #[serde(default)]
    header: ResponseHeader,
}

/// Client handle for one etcd gateway endpoint.
///
/// Construction validates certificate material and builds the HTTP client but
/// opens no connection; the first call does.
#[derive(Debug, Clone)]
pub struct Client {
    base_url: String,
    http: reqwest::Client,
}

impl Client {
    /// Connects plain when `tls` is `None`, mutual TLS otherwise.
    pub fn connect(
        endpoint: &StoreEndpoint,
        tls: Option<&TlsMaterial>,
    ) -> Result<Self, GatewayError> {
        let builder = reqwest::Client::builder().timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        let (builder, secure) = match tls {
            None => (builder, false),
            Some(material) => {
                let ca = read_pem(&material.ca_cert)?;
                let ca = reqwest::Certificate::from_pem(&ca).map_err(|source| {
                    GatewayError::Certificate {
                        path: material.ca_cert.display().to_string(),
                        source,
                    }
                })?;
                // reqwest wants the client certificate and key in one PEM bundle.
                let mut identity = read_pem(&material.client_cert)?;
                identity.extend_from_slice(&read_pem(&material.client_key)?);
                let identity = reqwest::Identity::from_pem(&identity).map_err(|source| {
                    GatewayError::Certificate {
                        path: material.client_cert.display().to_string(),
                        source,
                    }
                })?;
                (
                    builder
                        .use_rustls_tls()
                        .add_root_certificate(ca)
                        .identity(identity),
                    true,
                )
            }
        };

        Ok(Self {
            base_url: endpoint.base_url(secure),
            http: builder.build().map_err(GatewayError::BuildClient)?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetches the value at `key`, `None` when the key is absent.
    pub async fn get(&self, key: &str) -> Result<Option<KeyValue>, GatewayError> {
        let request = RangeRequest {
            key: BASE64.encode(key),
        };
        let response: RangeResponse = self.post_json("/v3/kv/range", &request).await?;
        let Some(kv) = response.kvs.into_iter().next() else {
            return Ok(None);
        };
        Ok(Some(decode_kv(kv)?))
    }

    /// Writes `value` at `key` and returns the gateway's response header.
    pub async fn put(&self, key: &str, value: &[u8]) -> Result<ResponseHeader, GatewayError> {
        let request = PutRequest {
            key: BASE64.encode(key),
            value: BASE64.encode(value),
        };
        let response: PutResponse = self.post_json("/v3/kv/put", &request).await?;
        Ok(response.header)
    }

    async fn post_json<Req, Res>(&self, path: &str, payload: &Req) -> Result<Res, GatewayError>
    where
        Req: Serialize,
        Res: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{path}", self.base_url);
        tracing::debug!(%url, "etcd gateway request");
        let response = self
            .http
            .post(url.as_str())
            .json(payload)
            .send()
            .await
            .map_err(|source| GatewayError::Request {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|source| GatewayError::Request { url, source })?;

        if !status.is_success() {
            return Err(GatewayError::Http {
                status,
                body: String::from_utf8_lossy(&bytes).trim().to_string(),
            });
        }

        serde_json::from_slice(&bytes).map_err(|error| GatewayError::Decode(error.to_string()))
    }
}

fn decode_kv(kv: WireKeyValue) -> Result<KeyValue, GatewayError> {
    let key = BASE64
        .decode(&kv.key)
        .map_err(|error| GatewayError::Decode(format!("bad key encoding: {error}")))?;
    let value = BASE64
        .decode(&kv.value)
        .map_err(|error| GatewayError::Decode(format!("bad value encoding: {error}")))?;
    let mod_revision = kv
        .mod_revision
        .as_deref()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or_default();
    Ok(KeyValue {
        key,
        value,
        mod_revision,
    })
}

fn read_pem(path: &Path) -> Result<Vec<u8>, GatewayError> {
    fs::read(path).map_err(|source| GatewayError::ReadCertificate {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_host_defaults_to_localhost() {
        let endpoint = StoreEndpoint::new("", 2379);
        assert_eq!(endpoint.base_url(false), "http://localhost:2379");
        assert_eq!(endpoint.base_url(true), "https://localhost:2379");
    }

    #[test]
    fn explicit_host_is_trimmed() {
        let endpoint = StoreEndpoint::new(" etcd.internal ", 12379);
        assert_eq!(endpoint.base_url(false), "http://etcd.internal:12379");
    }

    #[test]
    fn plain_client_targets_http() {
        let client = Client::connect(&StoreEndpoint::new("localhost", 2379), None)
            .expect("plain client builds without certificate material");
        assert_eq!(client.base_url(), "http://localhost:2379");
    }

    #[test]
    fn missing_certificate_file_is_reported_with_path() {
        let material = TlsMaterial {
            ca_cert: PathBuf::from("/nonexistent/ca.pem"),
            client_cert: PathBuf::from("/nonexistent/cert.pem"),
            client_key: PathBuf::from("/nonexistent/key.pem"),
        };
        let error = Client::connect(&StoreEndpoint::new("localhost", 2379), Some(&material))
            .expect_err("unreadable CA must fail construction");
        assert!(error.to_string().contains("/nonexistent/ca.pem"));
    }

    #[test]
    fn wire_kv_decoding_round_trips() {
        let kv = decode_kv(WireKeyValue {
            key: BASE64.encode("/RestDataExport/config"),
            value: BASE64.encode(b"{}"),
            mod_revision: Some("42".to_string()),
        })
        .expect("well-formed kv decodes");
        assert_eq!(kv.key, b"/RestDataExport/config");
        assert_eq!(kv.value, b"{}");
        assert_eq!(kv.mod_revision, 42);
    }

    #[test]
    fn bad_base64_is_a_decode_error() {
        let error = decode_kv(WireKeyValue {
            key: "not base64!".to_string(),
            value: String::new(),
            mod_revision: None,
        })
        .expect_err("invalid encoding must not decode");
        assert!(matches!(error, GatewayError::Decode(_)));
    }

    #[test]
    fn response_header_revision_parses() {
        let header = ResponseHeader {
            revision: Some("17".to_string()),
            ..ResponseHeader::default()
        };
        assert_eq!(header.revision(), Some(17));

        let missing = ResponseHeader::default();
        assert_eq!(missing.revision(), None);
    }
}
