use anyhow::{Context, bail};
use serde::Deserialize;
use tracing::info;

use super::KeyValueStore;

#[derive(Debug, Deserialize)]
struct KvRestReply {
    result: Option<serde_json::Value>,
    error: Option<String>,
}

/// managed key-value store spoken to over its REST api, `GET <url>/get/<key>` and
/// `POST <url>/set/<key>` with the value as the body
#[derive(Debug, Clone)]
pub struct ManagedKvStore {
    base_url: String,
    token: String,
    http: reqwest::Client,
}

impl ManagedKvStore {
    pub fn new(base_url: &str, token: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to build managed kv http client")?;

        info!("managed kv store configured at {}", base_url);

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            http,
        })
    }

    fn command_url(&self, command: &str, key: &str) -> String {
        // session keys carry url paths so the slashes have to be escaped
        format!("{}/{}/{}", self.base_url, command, urlencoding::encode(key))
    }

    async fn read_reply(response: reqwest::Response, key: &str) -> anyhow::Result<KvRestReply> {
        let status = response.status();
        let reply: KvRestReply = response
            .json()
            .await
            .with_context(|| format!("managed kv returned an unreadable reply for {}", key))?;

        if let Some(error) = reply.error.as_ref() {
            bail!("managed kv error for {} ({}): {}", key, status, error);
        }
        if !status.is_success() {
            bail!("managed kv returned {} for {}", status, key);
        }
        Ok(reply)
    }
}

#[async_trait::async_trait]
impl KeyValueStore for ManagedKvStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let response = self
            .http
            .get(self.command_url("get", key))
            .bearer_auth(&self.token)
            .send()
            .await
            .with_context(|| format!("managed kv GET failed for {}", key))?;

        let reply = Self::read_reply(response, key).await?;

        // numbers come back as json numbers, strings as strings, treat both as text
        Ok(match reply.result {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(s)) => Some(s),
            Some(other) => Some(other.to_string()),
        })
    }

    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let response = self
            .http
            .post(self.command_url("set", key))
            .bearer_auth(&self.token)
            .body(value.to_string())
            .send()
            .await
            .with_context(|| format!("managed kv SET failed for {}", key))?;

        Self::read_reply(response, key).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "managed-kv"
    }
}
