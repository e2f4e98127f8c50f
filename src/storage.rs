//! Master log sources: local disk or an S3 object fetched with a SigV4-signed GET.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{AwsCredentials, StorageConfig};
use crate::ledger::{parse_master_log, LedgerError, LogRow};

type HmacSha256 = Hmac<Sha256>;

const SIGV4_ALGORITHM: &str = "AWS4-HMAC-SHA256";
const EMPTY_PAYLOAD_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("master log not found at {0}")]
    NotFound(String),
    #[error("storage credentials rejected for {location}: {message}")]
    Credentials { location: String, message: String },
    #[error("HTTP client build error: {0}")]
    HttpClientBuild(String),
    #[error("HTTP request failed for {url}: {message}")]
    HttpRequest { url: String, message: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Anything that can hand back the raw bytes of the master log.
pub trait MasterLogSource: Send + Sync + 'static {
    /// Short backend name, e.g. `"local"` or `"s3"`.
    fn kind(&self) -> &'static str;
    fn describe(&self) -> String;
    fn fetch(&self) -> Result<Vec<u8>, StorageError>;
}

pub fn fetch_master_log(source: &dyn MasterLogSource) -> Result<Vec<LogRow>, StorageError> {
    let location = source.describe();
    info!(
        component = "storage",
        event = "storage.fetch.start",
        location = %location
    );

    let bytes = match source.fetch() {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(
                component = "storage",
                event = "storage.fetch.error",
                location = %location,
                error = %err
            );
            return Err(err);
        }
    };

    let rows = parse_master_log(&bytes)?;
    info!(
        component = "storage",
        event = "storage.fetch.finish",
        location = %location,
        bytes = bytes.len(),
        rows = rows.len()
    );
    Ok(rows)
}

#[derive(Debug, Clone)]
pub struct LocalFileSource {
    path: PathBuf,
}

impl LocalFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl MasterLogSource for LocalFileSource {
    fn kind(&self) -> &'static str {
        "local"
    }

    fn describe(&self) -> String {
        format!("file://{}", self.path.display())
    }

    fn fetch(&self) -> Result<Vec<u8>, StorageError> {
        if !self.path.exists() {
            return Err(StorageError::NotFound(self.path.display().to_string()));
        }
        Ok(fs::read(&self.path)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

pub trait HttpFetcher: Send + Sync {
    fn get(&self, url: &str, headers: &[(String, String)]) -> Result<HttpResponse, StorageError>;
}

pub struct ReqwestBlockingFetcher {
    client: reqwest::blocking::Client,
}

impl ReqwestBlockingFetcher {
    pub fn new(timeout_ms: u64) -> Result<Self, StorageError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .map_err(|err| StorageError::HttpClientBuild(err.to_string()))?;
        Ok(Self { client })
    }
}

impl HttpFetcher for ReqwestBlockingFetcher {
    fn get(&self, url: &str, headers: &[(String, String)]) -> Result<HttpResponse, StorageError> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().map_err(|err| StorageError::HttpRequest {
            url: url.to_string(),
            message: err.to_string(),
        })?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .map(|bytes| bytes.to_vec())
            .map_err(|err| StorageError::HttpRequest {
                url: url.to_string(),
                message: err.to_string(),
            })?;

        Ok(HttpResponse { status, body })
    }
}

/// Reads one object from S3 (or an S3-compatible endpoint). No retries.
pub struct S3ObjectSource {
    config: StorageConfig,
    fetcher: Box<dyn HttpFetcher>,
    clock: fn() -> DateTime<Utc>,
}

impl S3ObjectSource {
    pub fn new(config: StorageConfig) -> Result<Self, StorageError> {
        let fetcher = ReqwestBlockingFetcher::new(config.http_timeout_ms)?;
        Ok(Self::with_fetcher(config, Box::new(fetcher)))
    }

    pub fn with_fetcher(config: StorageConfig, fetcher: Box<dyn HttpFetcher>) -> Self {
        Self {
            config,
            fetcher,
            clock: Utc::now,
        }
    }

    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns `(scheme://host, host, canonical path)` for the configured object.
    fn object_location(&self) -> (String, String, String) {
        let key_path = uri_encode_path(self.config.key.trim_start_matches('/'));
        match self.config.endpoint.as_deref() {
            Some(endpoint) => {
                let endpoint = endpoint.trim_end_matches('/');
                let host = endpoint
                    .split_once("://")
                    .map(|(_, rest)| rest)
                    .unwrap_or(endpoint)
                    .to_string();
                let base = if endpoint.contains("://") {
                    endpoint.to_string()
                } else {
                    format!("https://{endpoint}")
                };
                let path = format!("/{}/{}", uri_encode_path(&self.config.bucket), key_path);
                (base, host, path)
            }
            None => {
                let host = format!(
                    "{}.s3.{}.amazonaws.com",
                    self.config.bucket, self.config.region
                );
                (format!("https://{host}"), host, format!("/{key_path}"))
            }
        }
    }
}

impl MasterLogSource for S3ObjectSource {
    fn kind(&self) -> &'static str {
        "s3"
    }

    fn describe(&self) -> String {
        format!("s3://{}/{}", self.config.bucket, self.config.key)
    }

    fn fetch(&self) -> Result<Vec<u8>, StorageError> {
        let (base, host, path) = self.object_location();
        let url = format!("{base}{path}");
        let headers = sign_get_request(
            &host,
            &path,
            &[],
            &self.config.region,
            &self.config.credentials,
            (self.clock)(),
        );
        debug!(
            component = "storage",
            event = "storage.s3.request",
            url = %url
        );

        let response = self.fetcher.get(&url, &headers)?;
        match response.status {
            200..=299 => Ok(response.body),
            401 | 403 => Err(StorageError::Credentials {
                location: self.describe(),
                message: error_message(&response),
            }),
            404 => Err(StorageError::NotFound(self.describe())),
            _ => Err(StorageError::HttpRequest {
                url,
                message: error_message(&response),
            }),
        }
    }
}

fn error_message(response: &HttpResponse) -> String {
    let body = String::from_utf8_lossy(&response.body);
    let body = body.trim();
    if body.is_empty() {
        format!("unexpected HTTP status {}", response.status)
    } else {
        format!("HTTP status {}: {}", response.status, body)
    }
}

/// Builds SigV4 headers for an unsigned-body GET. `extra_headers` are signed alongside the
/// mandatory `host`, `x-amz-content-sha256` and `x-amz-date`.
pub fn sign_get_request(
    host: &str,
    canonical_path: &str,
    extra_headers: &[(String, String)],
    region: &str,
    credentials: &AwsCredentials,
    now: DateTime<Utc>,
) -> Vec<(String, String)> {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = now.format("%Y%m%d").to_string();

    let mut signed: Vec<(String, String)> = vec![
        ("host".to_string(), host.to_string()),
        (
            "x-amz-content-sha256".to_string(),
            EMPTY_PAYLOAD_SHA256.to_string(),
        ),
        ("x-amz-date".to_string(), amz_date.clone()),
    ];
    if let Some(token) = &credentials.session_token {
        signed.push(("x-amz-security-token".to_string(), token.clone()));
    }
    signed.extend(
        extra_headers
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.trim().to_string())),
    );
    signed.sort_by(|a, b| a.0.cmp(&b.0));

    let canonical_headers: String = signed
        .iter()
        .map(|(name, value)| format!("{name}:{value}\n"))
        .collect();
    let signed_headers = signed
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical_request = format!(
        "GET\n{canonical_path}\n\n{canonical_headers}\n{signed_headers}\n{EMPTY_PAYLOAD_SHA256}"
    );
    let scope = format!("{date_stamp}/{region}/s3/aws4_request");
    let string_to_sign = format!(
        "{SIGV4_ALGORITHM}\n{amz_date}\n{scope}\n{}",
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let key = signing_key(&credentials.secret_access_key, &date_stamp, region, "s3");
    let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes()));
    let authorization = format!(
        "{SIGV4_ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
        credentials.access_key_id
    );

    let mut headers: Vec<(String, String)> = signed
        .into_iter()
        .filter(|(name, _)| name != "host")
        .collect();
    headers.push(("authorization".to_string(), authorization));
    headers
}

fn signing_key(secret: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], message: &[u8]) -> Vec<u8> {
    let mut mac =
        HmacSha256::new_from_slice(key).expect("HMAC-SHA256 accepts keys of any length");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

/// Percent-encodes each path segment, keeping `/` separators and RFC 3986 unreserved bytes.
fn uri_encode_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for byte in path.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
