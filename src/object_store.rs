//! Object storage boundary for uploaded document bytes.
//!
//! Two backends: an S3-compatible store speaking the REST API directly with
//! AWS Signature V4 auth (pure-Rust `hmac` + `sha2`, no C dependencies,
//! custom endpoints for MinIO/LocalStack), and a local-directory store for
//! development and tests.
//!
//! Credentials for the S3 backend come from the environment:
//! `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, optional `AWS_SESSION_TOKEN`.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::config::StorageConfig;
use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: Option<&str>) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Vec<u8>>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Build the configured backend.
pub fn create_store(config: &StorageConfig) -> Result<Box<dyn ObjectStore>> {
    match config.backend.as_str() {
        "s3" => Ok(Box::new(S3Store::from_config(config)?)),
        "local" => {
            let dir = config
                .local_dir
                .clone()
                .ok_or_else(|| Error::Storage("storage.local_dir not set".into()))?;
            Ok(Box::new(LocalStore { dir }))
        }
        other => Err(Error::Storage(format!("unknown storage backend: {}", other))),
    }
}

// ============ Local directory store ============

pub struct LocalStore {
    dir: PathBuf,
}

impl LocalStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        // Keys are flat names; reject anything that could escape the root.
        if key.contains("..") || key.contains('/') || key.contains('\\') {
            return Err(Error::Storage(format!("invalid storage key: {}", key)));
        }
        Ok(self.dir.join(key))
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, _content_type: Option<&str>) -> Result<()> {
        let path = self.path_for(key)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| Error::Storage(format!("{}: {}", path.display(), e)))
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| Error::Storage(format!("{}: {}", path.display(), e)))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Storage(format!("{}: {}", path.display(), e))),
        }
    }
}

// ============ S3 REST store ============

struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .map_err(|_| Error::Storage("AWS_ACCESS_KEY_ID environment variable not set".into()))?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY").map_err(|_| {
            Error::Storage("AWS_SECRET_ACCESS_KEY environment variable not set".into())
        })?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

pub struct S3Store {
    bucket: String,
    region: String,
    endpoint_url: Option<String>,
    client: reqwest::Client,
}

impl S3Store {
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        // Fail at startup, not on first upload, when credentials are absent.
        AwsCredentials::from_env()?;
        Ok(Self {
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            endpoint_url: config.endpoint_url.clone(),
            client: reqwest::Client::new(),
        })
    }

    fn host(&self) -> String {
        if let Some(ref endpoint) = self.endpoint_url {
            endpoint
                .trim_start_matches("https://")
                .trim_start_matches("http://")
                .trim_end_matches('/')
                .to_string()
        } else {
            format!("{}.s3.{}.amazonaws.com", self.bucket, self.region)
        }
    }

    fn scheme(&self) -> &'static str {
        match self.endpoint_url {
            Some(ref e) if e.starts_with("http://") => "http",
            _ => "https",
        }
    }

    /// Send one signed request with an empty query string.
    async fn signed_request(
        &self,
        method: reqwest::Method,
        key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<reqwest::Response> {
        let creds = AwsCredentials::from_env()?;
        let host = self.host();
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        let url = format!("{}://{}/{}", self.scheme(), host, encoded_key);

        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let payload_hash = hex_sha256(&body);

        let mut headers = vec![
            ("host".to_string(), host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers: String = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        let canonical_request = format!(
            "{}\n/{}\n\n{}\n{}\n{}",
            method.as_str(),
            encoded_key,
            canonical_headers,
            signed_headers,
            payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );

        let signing_key =
            derive_signing_key(&creds.secret_access_key, &date_stamp, &self.region, "s3");
        let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            creds.access_key_id, credential_scope, signed_headers, signature
        );

        let mut request = self
            .client
            .request(method, &url)
            .header("Authorization", authorization)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &amz_date);

        if let Some(ref token) = creds.session_token {
            request = request.header("x-amz-security-token", token);
        }
        if let Some(ct) = content_type {
            request = request.header("Content-Type", ct);
        }
        if !body.is_empty() {
            request = request.body(body);
        }

        request
            .send()
            .await
            .map_err(|e| Error::Storage(e.to_string()))
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: Option<&str>) -> Result<()> {
        let resp = self
            .signed_request(reqwest::Method::PUT, key, bytes, content_type)
            .await?;
        if !resp.status().is_success() {
            return Err(Error::Storage(format!(
                "S3 PutObject failed (HTTP {}) for key '{}'",
                resp.status(),
                key
            )));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let resp = self
            .signed_request(reqwest::Method::GET, key, Vec::new(), None)
            .await?;
        if !resp.status().is_success() {
            return Err(Error::Storage(format!(
                "S3 GetObject failed (HTTP {}) for key '{}'",
                resp.status(),
                key
            )));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let resp = self
            .signed_request(reqwest::Method::DELETE, key, Vec::new(), None)
            .await?;
        if !resp.status().is_success() {
            return Err(Error::Storage(format!(
                "S3 DeleteObject failed (HTTP {}) for key '{}'",
                resp.status(),
                key
            )));
        }
        Ok(())
    }
}

// ============ AWS SigV4 helpers ============

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

/// Derive the SigV4 signing key:
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encode per RFC 3986 (unreserved characters pass through).
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_store_put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().to_path_buf());

        store
            .put("doc-1_report.txt", b"hello".to_vec(), Some("text/plain"))
            .await
            .unwrap();
        assert_eq!(store.get("doc-1_report.txt").await.unwrap(), b"hello");

        store.delete("doc-1_report.txt").await.unwrap();
        assert!(store.get("doc-1_report.txt").await.is_err());
        // Deleting again stays quiet.
        store.delete("doc-1_report.txt").await.unwrap();
    }

    #[tokio::test]
    async fn local_store_rejects_traversal_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().to_path_buf());
        assert!(store.get("../etc/passwd").await.is_err());
        assert!(store.get("a/b").await.is_err());
    }

    #[test]
    fn uri_encode_passes_unreserved_and_escapes_the_rest() {
        assert_eq!(uri_encode("report-1_a.b~c"), "report-1_a.b~c");
        assert_eq!(uri_encode("a b"), "a%20b");
        assert_eq!(uri_encode("ü"), "%C3%BC");
    }

    #[test]
    fn signing_key_matches_aws_reference_vector() {
        // Test vector from the AWS SigV4 documentation.
        let key = derive_signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20150830",
            "us-east-1",
            "iam",
        );
        assert_eq!(
            hex::encode(key),
            "c4afb1cc5771d871763a393e44b703571b55cc28424d1a5e86da6ed3c154a4b9"
        );
    }
}
