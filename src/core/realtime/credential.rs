//! Short-lived session credentials.
//!
//! The long-lived API key never reaches the realtime endpoint. Before every
//! connect an ephemeral client secret is minted over HTTP and used as the
//! bearer token for the socket or the SDP exchange.

use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};
use zeroize::Zeroizing;

use super::base::{RealtimeError, RealtimeResult};

/// Ephemeral bearer token for one session.
#[derive(Clone)]
pub struct EphemeralCredential {
    secret: Zeroizing<String>,
    /// Unix timestamp after which the server rejects the token
    expires_at: Option<u64>,
}

impl EphemeralCredential {
    pub fn new(secret: impl Into<String>, expires_at: Option<u64>) -> Self {
        Self {
            secret: Zeroizing::new(secret.into()),
            expires_at,
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn expires_at(&self) -> Option<u64> {
        self.expires_at
    }

    pub(crate) fn bearer(&self) -> String {
        format!("Bearer {}", self.secret.as_str())
    }
}

impl fmt::Debug for EphemeralCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralCredential")
            .field("secret", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Mints ephemeral credentials.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn fetch_ephemeral_credential(&self) -> RealtimeResult<EphemeralCredential>;
}

/// Provider that always returns the same credential.
#[derive(Debug, Clone)]
pub struct StaticCredentialProvider {
    credential: EphemeralCredential,
}

impl StaticCredentialProvider {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            credential: EphemeralCredential::new(secret, None),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn fetch_ephemeral_credential(&self) -> RealtimeResult<EphemeralCredential> {
        Ok(self.credential.clone())
    }
}

/// Both response shapes of the secret-minting endpoints.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SecretResponse {
    /// `POST /realtime/client_secrets`
    ClientSecret {
        value: String,
        #[serde(default)]
        expires_at: Option<u64>,
    },
    /// Legacy `POST /realtime/sessions`
    Session { client_secret: NestedSecret },
}

#[derive(Debug, Deserialize)]
struct NestedSecret {
    value: String,
    #[serde(default)]
    expires_at: Option<u64>,
}

impl From<SecretResponse> for EphemeralCredential {
    fn from(response: SecretResponse) -> Self {
        match response {
            SecretResponse::ClientSecret { value, expires_at } => {
                EphemeralCredential::new(value, expires_at)
            }
            SecretResponse::Session { client_secret } => {
                EphemeralCredential::new(client_secret.value, client_secret.expires_at)
            }
        }
    }
}

/// Fetches credentials from `{base_url}/realtime/client_secrets`.
pub struct HttpCredentialProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: Zeroizing<String>,
    /// Session settings echoed into the mint request
    session: serde_json::Value,
}

impl HttpCredentialProvider {
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        session: serde_json::Value,
    ) -> RealtimeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| {
                RealtimeError::InvalidConfiguration(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            endpoint: format!("{}/realtime/client_secrets", base_url.trim_end_matches('/')),
            api_key: Zeroizing::new(api_key.into()),
            session,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CredentialProvider for HttpCredentialProvider {
    async fn fetch_ephemeral_credential(&self) -> RealtimeResult<EphemeralCredential> {
        debug!(endpoint = %self.endpoint, "Requesting ephemeral credential");

        let response = self
            .client
            .post(&self.endpoint)
            .header(http::header::AUTHORIZATION, format!("Bearer {}", self.api_key.as_str()))
            .json(&serde_json::json!({ "session": self.session }))
            .send()
            .await
            .map_err(|e| RealtimeError::CredentialFetch {
                status: 0,
                message: format!("Request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RealtimeError::CredentialFetch {
                status: status.as_u16(),
                message: body,
            });
        }

        let parsed: SecretResponse =
            response
                .json()
                .await
                .map_err(|e| RealtimeError::CredentialFetch {
                    status: status.as_u16(),
                    message: format!("Failed to parse credential: {e}"),
                })?;

        let credential = EphemeralCredential::from(parsed);
        info!(expires_at = ?credential.expires_at(), "Ephemeral credential issued");
        Ok(credential)
    }
}
