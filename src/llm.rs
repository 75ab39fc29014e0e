//! Chat-completion boundary and the held API credential.
//!
//! [`ChatModel`] is the seam to the external language model: a system
//! context plus the raw question in, the model's answer text out, one
//! attempt per call. The credential is a secret file under the storage root,
//! set and live-tested through the HTTP surface.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::{Error, Result};

/// Name of the credential file inside the storage root.
pub const CREDENTIAL_FILE: &str = "api.key";

pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(storage_root: &Path) -> Self {
        Self {
            path: storage_root.join(CREDENTIAL_FILE),
        }
    }

    pub fn save(&self, key: &str) -> Result<()> {
        std::fs::write(&self.path, key.trim())?;
        Ok(())
    }

    /// The held key, trimmed; `None` when no key has been set.
    pub fn load(&self) -> Result<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let key = std::fs::read_to_string(&self.path)?.trim().to_string();
        Ok(if key.is_empty() { None } else { Some(key) })
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// One completion attempt; never retried. The returned string is the
    /// model's answer text verbatim.
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

/// HTTP chat-completion client for OpenAI-compatible endpoints
/// (`{model, messages, temperature, stream: false}` in,
/// `choices[0].message.content` out).
pub struct HttpChatModel {
    url: String,
    model: String,
    temperature: f64,
    client: reqwest::Client,
    credentials: Arc<CredentialStore>,
}

impl HttpChatModel {
    pub fn new(config: &LlmConfig, credentials: Arc<CredentialStore>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            url: config.url.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            client,
            credentials,
        })
    }
}

#[async_trait]
impl ChatModel for HttpChatModel {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let key = self.credentials.load()?.ok_or_else(|| {
            Error::Validation("API key is not set; use /set_api_key/ first".to_string())
        })?;

        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "temperature": self.temperature,
            "stream": false,
        });

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let json: serde_json::Value = response.json().await?;
        json["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                Error::Network(
                    "chat completion response missing choices[0].message.content".to_string(),
                )
            })
    }
}

/// Live credential check: one minimal completion request against the
/// configured endpoint. A rejected key surfaces as a validation error
/// carrying the provider's response body; a connection failure stays a
/// network error.
pub async fn probe_key(config: &LlmConfig, key: &str) -> Result<()> {
    let key = key.trim();
    if key.is_empty() {
        return Err(Error::Validation("key must not be empty".to_string()));
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;
    let body = serde_json::json!({
        "model": config.model,
        "messages": [{"role": "user", "content": "ping"}],
        "max_tokens": 8,
    });

    let response = client
        .post(&config.url)
        .bearer_auth(key)
        .json(&body)
        .send()
        .await?;

    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(Error::Validation(format!("API key rejected ({status}): {body}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn credential_round_trip_trims_whitespace() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::new(dir.path());
        assert_eq!(store.load().unwrap(), None);

        store.save("  sk-test-123\n").unwrap();
        assert_eq!(store.load().unwrap().as_deref(), Some("sk-test-123"));
    }

    #[test]
    fn blank_credential_reads_as_unset() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::new(dir.path());
        store.save("   ").unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[tokio::test]
    async fn complete_without_key_is_a_validation_error() {
        let dir = TempDir::new().unwrap();
        let credentials = Arc::new(CredentialStore::new(dir.path()));
        let model = HttpChatModel::new(&LlmConfig::default(), credentials).unwrap();
        let err = model.complete("system", "user").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn probe_rejects_empty_key() {
        let err = probe_key(&LlmConfig::default(), "  ").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
