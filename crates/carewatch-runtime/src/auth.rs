//! Authentication collaborators.
//!
//! | Implementation | Used when | Behaviour |
//! |---|---|---|
//! | [`RestAuthenticator`] | `Backend::Live` | identity REST API (`accounts:signInWithPassword`, `accounts:signUp`) |
//! | [`SimulatedAuthenticator`] | `Backend::Simulated` | accepts any credentials |
//!
//! A rejected sign-in is reported as [`CareError::Auth`] carrying the
//! server's message (e.g. `INVALID_PASSWORD`), ready to be shown verbatim.

use async_trait::async_trait;
use carewatch_types::{CareError, Identity, LiveBackend};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Identity used for every simulated session.
pub const DEMO_EMAIL: &str = "demo@example.com";

/// Sign-in / sign-up against an identity provider.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Authenticate an existing account.
    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, CareError>;

    /// Create an account and sign it in.
    async fn sign_up(&self, email: &str, password: &str) -> Result<Identity, CareError>;
}

fn require_credentials(email: &str, password: &str) -> Result<(), CareError> {
    if email.trim().is_empty() || password.is_empty() {
        return Err(CareError::Auth("email and password are required".to_string()));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// REST
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CredentialsRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    local_id: String,
    #[serde(default)]
    email: String,
    id_token: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// Extract the user-visible message from an identity-API error body.
///
/// Falls back to the HTTP status when the body is not the expected shape.
pub fn auth_error_message(status: reqwest::StatusCode, body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .map(|envelope| envelope.error.message)
        .unwrap_or_else(|_| format!("identity service returned {status}"))
}

/// Email/password authentication over the identity REST API.
pub struct RestAuthenticator {
    client: reqwest::Client,
    auth_url: String,
    api_key: String,
}

impl RestAuthenticator {
    pub fn new(backend: &LiveBackend) -> Self {
        Self {
            client: reqwest::Client::new(),
            auth_url: backend.auth_url.trim_end_matches('/').to_string(),
            api_key: backend.api_key.clone(),
        }
    }

    /// Full endpoint URL for an `accounts:<action>` call.
    pub fn endpoint(&self, action: &str) -> String {
        format!("{}/accounts:{action}", self.auth_url)
    }

    async fn exchange(&self, action: &str, email: &str, password: &str) -> Result<Identity, CareError> {
        require_credentials(email, password)?;
        let response = self
            .client
            .post(self.endpoint(action))
            .query(&[("key", self.api_key.as_str())])
            .json(&CredentialsRequest {
                email,
                password,
                return_secure_token: true,
            })
            .send()
            .await
            .map_err(|e| CareError::Auth(format!("identity service unreachable: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CareError::Auth(format!("identity response unreadable: {e}")))?;

        if !status.is_success() {
            let message = auth_error_message(status, &body);
            warn!(action, %status, %message, "identity request rejected");
            return Err(CareError::Auth(message));
        }

        let token: TokenResponse =
            serde_json::from_str(&body).map_err(|e| CareError::Parsing(e.to_string()))?;
        info!(action, user_id = %token.local_id, "identity request accepted");
        Ok(Identity {
            user_id: token.local_id,
            email: if token.email.is_empty() { email.to_string() } else { token.email },
            id_token: token.id_token,
        })
    }
}

#[async_trait]
impl Authenticator for RestAuthenticator {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, CareError> {
        self.exchange("signInWithPassword", email, password).await
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<Identity, CareError> {
        self.exchange("signUp", email, password).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Simulated
// ─────────────────────────────────────────────────────────────────────────────

/// Accepts any credentials and returns the demo identity.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimulatedAuthenticator;

impl SimulatedAuthenticator {
    fn demo_identity(email: &str) -> Identity {
        let email = email.trim();
        Identity {
            user_id: "demo".to_string(),
            email: if email.is_empty() { DEMO_EMAIL.to_string() } else { email.to_string() },
            id_token: String::new(),
        }
    }
}

#[async_trait]
impl Authenticator for SimulatedAuthenticator {
    async fn sign_in(&self, email: &str, _password: &str) -> Result<Identity, CareError> {
        Ok(Self::demo_identity(email))
    }

    async fn sign_up(&self, email: &str, _password: &str) -> Result<Identity, CareError> {
        Ok(Self::demo_identity(email))
    }
}
