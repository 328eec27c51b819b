//! Paste-hosting client for reports too long to send inline.
//!
//! The pipeline only depends on the [`PasteService`] trait. [`PasteClient`]
//! implements it against the mystb.in REST API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PasteError {
    #[error("paste service returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("paste transport error: {0}")]
    Transport(String),
    #[error("malformed paste response: {0}")]
    Serde(#[from] serde_json::Error),
}

/// A created paste.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paste {
    pub id: String,
    pub url: String,
    /// Token that authorises deleting the paste.
    pub security_token: String,
    pub expires: Option<DateTime<Utc>>,
}

/// A text paste collaborator.
#[async_trait]
pub trait PasteService: Send + Sync {
    /// Upload `content` as `filename`. When `password` is set a fresh
    /// password is generated, applied, and returned alongside the paste.
    async fn create_paste(
        &self,
        filename: &str,
        content: &str,
        expires: Option<DateTime<Utc>>,
        password: bool,
    ) -> Result<(Paste, Option<String>), PasteError>;

    async fn delete_paste(&self, security_token: &str) -> Result<(), PasteError>;
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct CreatePasteRequest<'a> {
    files: Vec<PasteFile<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires: Option<String>,
}

#[derive(Debug, Serialize)]
struct PasteFile<'a> {
    filename: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreatePasteResponse {
    id: String,
    expires: Option<DateTime<Utc>>,
    safety: String,
}

fn paste_from_response(base_url: &str, resp: CreatePasteResponse) -> Paste {
    Paste {
        url: format!("{}/{}", base_url.trim_end_matches('/'), resp.id),
        id: resp.id,
        security_token: resp.safety,
        expires: resp.expires,
    }
}

// ---------------------------------------------------------------------------
// PasteClient
// ---------------------------------------------------------------------------

#[cfg(feature = "io")]
pub use self::client::{generate_password, PasteClient};

#[cfg(feature = "io")]
mod client {
    use rand::distributions::Alphanumeric;
    use rand::Rng;
    use tracing::{debug, info};

    use super::*;

    const PASSWORD_LEN: usize = 11;

    /// Random alphanumeric paste password.
    pub fn generate_password() -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(PASSWORD_LEN)
            .map(char::from)
            .collect()
    }

    /// mystb.in client. Cheap to clone.
    #[derive(Debug, Clone)]
    pub struct PasteClient {
        http: reqwest::Client,
        base_url: String,
    }

    impl PasteClient {
        pub fn new(base_url: impl Into<String>) -> Self {
            Self {
                http: reqwest::Client::new(),
                base_url: base_url.into().trim_end_matches('/').to_string(),
            }
        }

        async fn check(resp: reqwest::Response) -> Result<reqwest::Response, PasteError> {
            let status = resp.status();
            if status.is_success() {
                return Ok(resp);
            }
            let body = resp
                .text()
                .await
                .map_err(|e| PasteError::Transport(e.to_string()))?;
            Err(PasteError::Api {
                status: status.as_u16(),
                body,
            })
        }
    }

    #[async_trait]
    impl PasteService for PasteClient {
        async fn create_paste(
            &self,
            filename: &str,
            content: &str,
            expires: Option<DateTime<Utc>>,
            password: bool,
        ) -> Result<(Paste, Option<String>), PasteError> {
            let password = password.then(generate_password);
            let body = CreatePasteRequest {
                files: vec![PasteFile { filename, content }],
                password: password.as_deref(),
                expires: expires.map(|e| e.to_rfc3339()),
            };

            let resp = self
                .http
                .post(format!("{}/api/paste", self.base_url))
                .json(&body)
                .send()
                .await
                .map_err(|e| PasteError::Transport(e.to_string()))?;
            let bytes = Self::check(resp)
                .await?
                .bytes()
                .await
                .map_err(|e| PasteError::Transport(e.to_string()))?;

            let paste = paste_from_response(&self.base_url, serde_json::from_slice(&bytes)?);
            info!(paste = %paste.id, bytes = content.len(), "created paste");
            Ok((paste, password))
        }

        async fn delete_paste(&self, security_token: &str) -> Result<(), PasteError> {
            let resp = self
                .http
                .delete(format!(
                    "{}/api/security/delete/{}",
                    self.base_url, security_token
                ))
                .send()
                .await
                .map_err(|e| PasteError::Transport(e.to_string()))?;
            Self::check(resp).await?;
            debug!("deleted paste");
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
