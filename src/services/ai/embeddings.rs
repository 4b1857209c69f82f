use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;
}

/// Azure OpenAI embeddings deployment. `url` is the full deployment URL
/// including `api-version`.
pub struct AzureEmbedder {
    url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AzureEmbedder {
    pub fn new(url: String, api_key: String) -> Self {
        Self {
            url,
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Embedder for AzureEmbedder {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let resp = self
            .client
            .post(&self.url)
            .header("api-key", &self.api_key)
            .json(&json!({ "input": text }))
            .send()
            .await
            .context("failed to call embeddings API")?;

        let status = resp.status();
        let data: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse embeddings response")?;

        if !status.is_success() {
            anyhow::bail!("embeddings API error ({}): {}", status, data);
        }

        let vector = data["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("missing embedding in response"))?;

        vector
            .iter()
            .map(|v| {
                v.as_f64()
                    .map(|f| f as f32)
                    .ok_or_else(|| anyhow::anyhow!("non-numeric embedding component"))
            })
            .collect()
    }
}
