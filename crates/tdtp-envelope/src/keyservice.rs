//! Client for the external `xzmercury` key-service daemon (§4.7). TDTP only
//! consumes its two HTTP endpoints; the daemon itself is out of scope (§1).

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use tdtp_core::error::{Result, TdtpError};
use uuid::Uuid;

const SUBSYSTEM: &str = "key_service";

#[derive(Serialize)]
struct BindRequest<'a> {
    package_uuid: Uuid,
    pipeline_name: &'a str,
}

#[derive(Deserialize)]
struct BindResponse {
    key_b64: String,
    hmac: String,
}

#[derive(Serialize)]
struct RetrieveRequest {
    package_uuid: Uuid,
}

#[derive(Deserialize)]
struct RetrieveResponse {
    key_b64: String,
}

pub struct KeyServiceClient {
    http: reqwest::Client,
    base_url: String,
    shared_secret: Vec<u8>,
}

impl KeyServiceClient {
    pub fn new(base_url: impl Into<String>, shared_secret: impl Into<Vec<u8>>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TdtpError::fatal(SUBSYSTEM, format!("building HTTP client: {e}")))?;
        Ok(Self { http, base_url: base_url.into(), shared_secret: shared_secret.into() })
    }

    fn status_error(status: reqwest::StatusCode) -> TdtpError {
        if status.as_u16() == 403 || status.as_u16() == 429 {
            TdtpError::permission(SUBSYSTEM, format!("key bind rejected: HTTP {status}")).with_code("KEY_BIND_REJECTED")
        } else if status.is_server_error() {
            TdtpError::transient(SUBSYSTEM, format!("mercury error: HTTP {status}")).with_code("MERCURY_ERROR")
        } else {
            TdtpError::transient(SUBSYSTEM, format!("unexpected mercury status: HTTP {status}")).with_code("MERCURY_ERROR")
        }
    }

    fn network_error(e: reqwest::Error) -> TdtpError {
        TdtpError::transient(SUBSYSTEM, format!("mercury unavailable: {e}")).with_code("MERCURY_UNAVAILABLE")
    }

    fn compute_hmac(&self, package_uuid: Uuid) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.shared_secret).expect("HMAC accepts any key length");
        mac.update(package_uuid.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Binds a fresh ephemeral key to `package_uuid`. The sender calls this
    /// exactly once per package and must verify the returned HMAC before
    /// trusting the key.
    pub async fn bind(&self, package_uuid: Uuid, pipeline_name: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .post(format!("{}/api/keys/bind", self.base_url))
            .json(&BindRequest { package_uuid, pipeline_name })
            .send()
            .await
            .map_err(Self::network_error)?;

        if !response.status().is_success() {
            return Err(Self::status_error(response.status()));
        }

        let body: BindResponse = response
            .json()
            .await
            .map_err(|e| TdtpError::fatal(SUBSYSTEM, format!("malformed bind response: {e}")))?;

        let expected_hmac = self.compute_hmac(package_uuid);
        if !constant_time_eq(body.hmac.as_bytes(), expected_hmac.as_bytes()) {
            return Err(TdtpError::fatal(SUBSYSTEM, "HMAC verification failed on key bind")
                .with_code("HMAC_VERIFICATION_FAILED"));
        }

        base64_decode(&body.key_b64)
    }

    /// Retrieves the key for `package_uuid`. Exactly one successful call is
    /// expected per package (burn-on-read); a 404 means the key was already
    /// consumed.
    pub async fn retrieve(&self, package_uuid: Uuid) -> Result<Vec<u8>> {
        let response = self
            .http
            .post(format!("{}/api/keys/retrieve", self.base_url))
            .json(&RetrieveRequest { package_uuid })
            .send()
            .await
            .map_err(Self::network_error)?;

        if response.status().as_u16() == 404 {
            return Err(TdtpError::permission(SUBSYSTEM, "key not found or already consumed")
                .with_code("KEY_NOT_FOUND"));
        }
        if !response.status().is_success() {
            return Err(Self::status_error(response.status()));
        }

        let body: RetrieveResponse = response
            .json()
            .await
            .map_err(|e| TdtpError::fatal(SUBSYSTEM, format!("malformed retrieve response: {e}")))?;
        base64_decode(&body.key_b64)
    }
}

fn base64_decode(raw: &str) -> Result<Vec<u8>> {
    base64::Engine::decode(&base64::engine::general_purpose::STANDARD, raw)
        .map_err(|e| TdtpError::fatal(SUBSYSTEM, format!("invalid base64 key material: {e}")))
}

/// Avoids short-circuiting string comparison for the HMAC check.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Minimal hex encoder so the HMAC digest can be compared against the
/// key-service's hex-encoded response without adding a `hex` crate dependency.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_rejects_mismatched_length() {
        assert!(!constant_time_eq(b"abc", b"ab"));
    }

    #[test]
    fn constant_time_eq_accepts_equal_bytes() {
        assert!(constant_time_eq(b"same", b"same"));
    }
}
