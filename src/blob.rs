//! Raw document storage.
//!
//! Uploaded PDFs are kept as opaque objects under a random 12-character
//! lowercase name. The reference persisted in the document metadata store
//! is `"<bucket>/<object>"`.
//!
//! | Backend | Config | Layout |
//! |---------|--------|--------|
//! | `local` | `blob.root` (default `<work_dir>/blobs`) | `<root>/<bucket>/<object>` |
//! | `s3` | `blob.endpoint`, `blob.region`, `blob.secure` | path-style `/<bucket>/<object>`, SigV4 signed |
//!
//! # Environment Variables
//!
//! The S3 backend reads `BUCKET_KEY` / `BUCKET_SECRET`, falling back to
//! `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY`. `AWS_SESSION_TOKEN` is
//! sent when present.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;
use crate::digest::random_name;

type HmacSha256 = Hmac<Sha256>;

const OBJECT_NAME_LEN: usize = 12;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` in `bucket` under a fresh object name, creating the
    /// bucket when missing. Returns the object name.
    async fn put(&self, bucket: &str, data: &[u8]) -> Result<String>;

    async fn get(&self, bucket: &str, object: &str) -> Result<Vec<u8>>;

    async fn delete(&self, bucket: &str, object: &str) -> Result<()>;
}

/// `"<bucket>/<object>"`.
pub fn blob_ref(bucket: &str, object: &str) -> String {
    format!("{}/{}", bucket, object)
}

/// Inverse of [`blob_ref`].
pub fn split_blob_ref(reference: &str) -> Result<(&str, &str)> {
    match reference.split_once('/') {
        Some((bucket, object)) if !bucket.is_empty() && !object.is_empty() => Ok((bucket, object)),
        _ => bail!("Malformed blob reference: '{}'", reference),
    }
}

pub fn create_blob_store(config: &Config) -> Result<Arc<dyn BlobStore>> {
    match config.blob.backend.as_str() {
        "local" => Ok(Arc::new(LocalBlobStore::new(config.blob_root()))),
        "s3" => {
            let endpoint = config
                .blob
                .endpoint
                .clone()
                .context("blob.endpoint must be set when backend is 's3'")?;
            Ok(Arc::new(S3BlobStore::new(
                endpoint,
                config.blob.region.clone(),
                config.blob.secure,
                BlobCredentials::from_env()?,
            )))
        }
        other => bail!("Unknown blob backend: {}", other),
    }
}

fn check_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.starts_with('.') {
        bail!("Invalid {} name: '{}'", kind, name);
    }
    Ok(())
}

// ============ Local Backend ============

pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, bucket: &str, object: &str) -> Result<PathBuf> {
        check_name("bucket", bucket)?;
        check_name("object", object)?;
        Ok(self.root.join(bucket).join(object))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, bucket: &str, data: &[u8]) -> Result<String> {
        check_name("bucket", bucket)?;
        let dir = self.root.join(bucket);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create bucket directory {}", dir.display()))?;

        let object = random_name(OBJECT_NAME_LEN);
        let path = dir.join(&object);
        tokio::fs::write(&path, data)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(object)
    }

    async fn get(&self, bucket: &str, object: &str) -> Result<Vec<u8>> {
        let path = self.object_path(bucket, object)?;
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read blob {}", blob_ref(bucket, object)))
    }

    async fn delete(&self, bucket: &str, object: &str) -> Result<()> {
        let path = self.object_path(bucket, object)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete {}", path.display())),
        }
    }
}

// ============ S3 Backend ============

/// Access credentials for the S3-compatible endpoint.
pub struct BlobCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl BlobCredentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }

    pub fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("BUCKET_KEY")
            .or_else(|_| std::env::var("AWS_ACCESS_KEY_ID"))
            .context("BUCKET_KEY (or AWS_ACCESS_KEY_ID) environment variable not set")?;
        let secret_access_key = std::env::var("BUCKET_SECRET")
            .or_else(|_| std::env::var("AWS_SECRET_ACCESS_KEY"))
            .context("BUCKET_SECRET (or AWS_SECRET_ACCESS_KEY) environment variable not set")?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

/// MinIO / S3 object storage addressed path-style.
pub struct S3BlobStore {
    client: reqwest::Client,
    host: String,
    scheme: &'static str,
    region: String,
    creds: BlobCredentials,
}

impl S3BlobStore {
    pub fn new(endpoint: String, region: String, secure: bool, creds: BlobCredentials) -> Self {
        Self {
            client: reqwest::Client::new(),
            host: endpoint_host(&endpoint),
            scheme: if secure { "https" } else { "http" },
            region,
            creds,
        }
    }

    /// Build a signed request for `method` on the path-style `path`
    /// (`/<bucket>` or `/<bucket>/<object>`).
    fn signed(&self, method: reqwest::Method, path: &str, payload: &[u8]) -> reqwest::RequestBuilder {
        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let payload_hash = hex_sha256(payload);

        let mut headers = vec![
            ("host".to_string(), self.host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = self.creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        let authorization = authorization_header(
            &self.creds,
            &self.region,
            method.as_str(),
            path,
            &mut headers,
            &payload_hash,
            &date_stamp,
            &amz_date,
        );

        let url = format!("{}://{}{}", self.scheme, self.host, path);
        let mut req = self
            .client
            .request(method, &url)
            .header("Authorization", authorization)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &amz_date);
        if let Some(ref token) = self.creds.session_token {
            req = req.header("x-amz-security-token", token);
        }
        req
    }

    async fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        let path = format!("/{}", uri_encode(bucket));
        let resp = self
            .signed(reqwest::Method::HEAD, &path, b"")
            .send()
            .await
            .with_context(|| format!("Failed to reach bucket {}", bucket))?;
        if resp.status().is_success() {
            return Ok(());
        }
        if resp.status() != reqwest::StatusCode::NOT_FOUND {
            bail!("S3 HeadBucket failed (HTTP {}) for '{}'", resp.status(), bucket);
        }

        tracing::info!(bucket, "creating bucket");
        let resp = self
            .signed(reqwest::Method::PUT, &path, b"")
            .send()
            .await
            .with_context(|| format!("Failed to create bucket {}", bucket))?;
        if !resp.status().is_success() {
            bail!("S3 CreateBucket failed (HTTP {}) for '{}'", resp.status(), bucket);
        }
        Ok(())
    }
}

fn object_path(bucket: &str, object: &str) -> String {
    format!("/{}/{}", uri_encode(bucket), uri_encode(object))
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, bucket: &str, data: &[u8]) -> Result<String> {
        check_name("bucket", bucket)?;
        self.ensure_bucket(bucket).await?;

        let object = random_name(OBJECT_NAME_LEN);
        let resp = self
            .signed(reqwest::Method::PUT, &object_path(bucket, &object), data)
            .body(data.to_vec())
            .send()
            .await
            .with_context(|| format!("Failed to put {}", blob_ref(bucket, &object)))?;
        if !resp.status().is_success() {
            bail!("S3 PutObject failed (HTTP {}) for '{}'", resp.status(), object);
        }
        Ok(object)
    }

    async fn get(&self, bucket: &str, object: &str) -> Result<Vec<u8>> {
        let resp = self
            .signed(reqwest::Method::GET, &object_path(bucket, object), b"")
            .send()
            .await
            .with_context(|| format!("Failed to get {}", blob_ref(bucket, object)))?;
        if !resp.status().is_success() {
            bail!("S3 GetObject failed (HTTP {}) for '{}'", resp.status(), object);
        }
        Ok(resp.bytes().await?.to_vec())
    }

    async fn delete(&self, bucket: &str, object: &str) -> Result<()> {
        let resp = self
            .signed(reqwest::Method::DELETE, &object_path(bucket, object), b"")
            .send()
            .await
            .with_context(|| format!("Failed to delete {}", blob_ref(bucket, object)))?;
        // S3 answers 204 for missing keys as well.
        if !resp.status().is_success() {
            bail!("S3 DeleteObject failed (HTTP {}) for '{}'", resp.status(), object);
        }
        Ok(())
    }
}

// ============ AWS SigV4 Helpers ============

/// Host (and port) of an endpoint given with or without a scheme.
fn endpoint_host(endpoint: &str) -> String {
    endpoint
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/')
        .to_string()
}

/// Sort `headers` and compute the SigV4 `Authorization` value for a
/// request without query parameters.
#[allow(clippy::too_many_arguments)]
fn authorization_header(
    creds: &BlobCredentials,
    region: &str,
    method: &str,
    canonical_uri: &str,
    headers: &mut [(String, String)],
    payload_hash: &str,
    date_stamp: &str,
    amz_date: &str,
) -> String {
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
        "{}\n{}\n\n{}\n{}\n{}",
        method, canonical_uri, canonical_headers, signed_headers, payload_hash
    );

    let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        credential_scope,
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(&creds.secret_access_key, date_stamp, region, "s3");
    let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

    format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        creds.access_key_id, credential_scope, signed_headers, signature
    )
}

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

/// RFC 3986 encoding of a single path segment.
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
    async fn local_put_get_delete() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(tmp.path());

        let object = store.put("etfdocs", b"%PDF-1.4").await.unwrap();
        assert_eq!(object.len(), OBJECT_NAME_LEN);
        assert!(object.chars().all(|c| !c.is_ascii_uppercase()));
        assert_eq!(store.get("etfdocs", &object).await.unwrap(), b"%PDF-1.4");

        store.delete("etfdocs", &object).await.unwrap();
        assert!(store.get("etfdocs", &object).await.is_err());
        // Deleting twice is fine.
        store.delete("etfdocs", &object).await.unwrap();
    }

    #[tokio::test]
    async fn local_rejects_traversal() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(tmp.path());
        assert!(store.get("etfdocs", "../secret").await.is_err());
        assert!(store.put("..", b"x").await.is_err());
    }

    #[test]
    fn blob_ref_round_trip() {
        let r = blob_ref("etfdocs", "abcdef123456");
        assert_eq!(split_blob_ref(&r).unwrap(), ("etfdocs", "abcdef123456"));
        assert!(split_blob_ref("no-slash").is_err());
    }

    #[test]
    fn endpoint_host_strips_scheme() {
        assert_eq!(endpoint_host("http://minio:9000/"), "minio:9000");
        assert_eq!(endpoint_host("minio:9000"), "minio:9000");
    }

    #[test]
    fn signing_key_matches_aws_example() {
        // Example from the AWS SigV4 documentation.
        let key = derive_signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        );
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn authorization_lists_sorted_signed_headers() {
        let creds = BlobCredentials::new("AKID", "secret");
        let mut headers = vec![
            ("x-amz-date".to_string(), "20240101T000000Z".to_string()),
            ("host".to_string(), "minio:9000".to_string()),
        ];
        let auth = authorization_header(
            &creds,
            "us-east-1",
            "GET",
            "/etfdocs/abc",
            &mut headers,
            &hex_sha256(b""),
            "20240101",
            "20240101T000000Z",
        );
        assert!(auth.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKID/20240101/us-east-1/s3/aws4_request, SignedHeaders=host;x-amz-date, Signature="
        ));
        assert_eq!(headers[0].0, "host");
    }
}
