//! Upstream Client: the authenticated HTTP wrapper every other worker
//! component talks to the Manager through.
//!
//! Before registration the client carries no credentials (or, during the
//! registration call itself, a one-time bearer JWT signed with the
//! pre-shared registration secret). After registration it switches to HTTP
//! Basic using the assigned worker id/secret. Callers classify responses
//! through `ClientError`; only `Transport` and `Http5xx` are meant to be
//! retried by the caller.

use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("client error {status}: {body}")]
    Http4xx { status: u16, body: String },

    #[error("server error {status}: {body}")]
    Http5xx { status: u16, body: String },

    #[error("unauthorized")]
    Unauthorized,

    #[error("malformed local payload: {0}")]
    Malformed(String),
}

impl ClientError {
    /// Whether a caller should retry this exact call after a backoff sleep.
    /// A malformed local payload will never parse differently on a retry, so
    /// it is treated the same as a rejected (non-retryable) request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Transport(_) | ClientError::Http5xx { .. })
    }
}

#[derive(Clone)]
enum Auth {
    None,
    Bearer(String),
    Basic { worker_id: String, worker_secret: String },
}

/// A parsed HTTP response whose status code has not yet been interpreted.
/// Most endpoints have a uniform 2xx-success contract and should go through
/// [`UpstreamClient::classify`]; `/task` has its own 200/204/423 contract and
/// inspects `status`/`body` directly.
pub struct RawResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn json<T: for<'de> Deserialize<'de>>(&self) -> Result<T, ClientError> {
        serde_json::from_slice(&self.body).map_err(|e| ClientError::Http5xx {
            status: self.status.as_u16(),
            body: format!("malformed response body: {}", e),
        })
    }
}

pub struct UpstreamClient {
    http: Client,
    base_url: String,
    auth: Auth,
}

impl UpstreamClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
            auth: Auth::None,
        }
    }

    /// Switch to HTTP Basic using the credentials assigned at registration.
    /// This is the steady-state auth mode for every call after `/register-worker`.
    pub fn set_worker_credentials(&mut self, worker_id: impl Into<String>, worker_secret: impl Into<String>) {
        self.auth = Auth::Basic {
            worker_id: worker_id.into(),
            worker_secret: worker_secret.into(),
        };
    }

    /// Carry a one-time bearer token for the `/register-worker` call only.
    pub fn set_bearer(&mut self, token: impl Into<String>) {
        self.auth = Auth::Bearer(token.into());
    }

    pub fn clear_auth(&mut self) {
        self.auth = Auth::None;
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        json: Option<&(impl Serialize + ?Sized)>,
    ) -> Result<RawResponse, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self.http.request(method, &url);
        builder = match &self.auth {
            Auth::None => builder,
            Auth::Bearer(token) => builder.bearer_auth(token),
            Auth::Basic { worker_id, worker_secret } => builder.basic_auth(worker_id, Some(worker_secret)),
        };
        if let Some(json) = json {
            builder = builder.json(json);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.bytes().await?.to_vec();
        Ok(RawResponse { status, body })
    }

    pub async fn get(&self, path: &str) -> Result<RawResponse, ClientError> {
        self.send(Method::GET, path, None::<&()>).await
    }

    pub async fn post<T: Serialize>(&self, path: &str, json: Option<&T>) -> Result<RawResponse, ClientError> {
        self.send(Method::POST, path, json).await
    }

    /// Apply the uniform "2xx is success, 401 is Unauthorized, otherwise
    /// Http4xx/Http5xx" contract that every endpoint but `/task` follows.
    pub fn classify(response: RawResponse) -> Result<RawResponse, ClientError> {
        if response.status.is_success() {
            return Ok(response);
        }
        if response.status == StatusCode::UNAUTHORIZED {
            return Err(ClientError::Unauthorized);
        }
        let body = String::from_utf8_lossy(&response.body).to_string();
        if response.status.is_server_error() {
            return Err(ClientError::Http5xx { status: response.status.as_u16(), body });
        }
        Err(ClientError::Http4xx { status: response.status.as_u16(), body })
    }

    /// `get`/`post` followed immediately by [`classify`](Self::classify), for
    /// the common case where the caller has no special interest in the raw
    /// status code.
    pub async fn get_checked(&self, path: &str) -> Result<RawResponse, ClientError> {
        Self::classify(self.get(path).await?)
    }

    pub async fn post_checked<T: Serialize>(&self, path: &str, json: Option<&T>) -> Result<RawResponse, ClientError> {
        Self::classify(self.post(path, json).await?)
    }
}

#[derive(serde::Serialize)]
struct RegistrationClaims {
    iat: u64,
    exp: u64,
}

/// Build the one-time bearer JWT carried on the `/register-worker` call.
///
/// HS256-signed, claims `{iat, exp}`, 15-minute expiry from the moment of
/// signing.
pub fn build_registration_jwt(registration_secret: &str) -> anyhow::Result<String> {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
    let claims = RegistrationClaims { iat: now, exp: now + 15 * 60 };
    let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(registration_secret.as_bytes()))?;
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_jwt_carries_expected_claims() {
        let token = build_registration_jwt("shh-its-a-secret").unwrap();
        let decoded = jsonwebtoken::decode::<RegistrationClaimsCheck>(
            &token,
            &jsonwebtoken::DecodingKey::from_secret("shh-its-a-secret".as_bytes()),
            &jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256),
        )
        .unwrap();
        assert!(decoded.claims.exp > decoded.claims.iat);
        assert_eq!(decoded.claims.exp - decoded.claims.iat, 15 * 60);
    }

    #[derive(serde::Deserialize)]
    struct RegistrationClaimsCheck {
        iat: u64,
        exp: u64,
    }

    #[test]
    fn retryable_classifies_transport_and_5xx_only() {
        assert!(ClientError::Http5xx { status: 503, body: String::new() }.is_retryable());
        assert!(!ClientError::Http4xx { status: 404, body: String::new() }.is_retryable());
        assert!(!ClientError::Unauthorized.is_retryable());
    }
}
