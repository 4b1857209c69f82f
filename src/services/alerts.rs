//! Operational alerts posted to a Microsoft Teams channel.

use anyhow::Context;
use async_trait::async_trait;
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct OpsAlert {
    pub title: String,
    pub message: String,
    pub details: Vec<(String, String)>,
    pub is_error: bool,
}

impl OpsAlert {
    pub fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            details: Vec::new(),
            is_error: false,
        }
    }

    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::info(title, message)
        }
    }

    pub fn detail(mut self, name: &str, value: impl ToString) -> Self {
        self.details.push((name.to_string(), value.to_string()));
        self
    }

    /// Adaptive Card payload for an incoming-webhook connector.
    pub fn to_card(&self) -> Value {
        let facts: Vec<Value> = self
            .details
            .iter()
            .map(|(title, value)| json!({ "title": title, "value": value }))
            .collect();
        json!({
            "type": "message",
            "attachments": [{
                "contentType": "application/vnd.microsoft.card.adaptive",
                "content": {
                    "$schema": "http://adaptivecards.io/schemas/adaptive-card.json",
                    "type": "AdaptiveCard",
                    "version": "1.4",
                    "body": [
                        {
                            "type": "TextBlock",
                            "text": self.title,
                            "weight": "Bolder",
                            "size": "Medium",
                            "color": if self.is_error { "Attention" } else { "Accent" },
                        },
                        { "type": "TextBlock", "text": self.message, "wrap": true },
                        { "type": "FactSet", "facts": facts },
                    ],
                },
            }],
        })
    }
}

#[async_trait]
pub trait OpsNotifier: Send + Sync {
    async fn notify(&self, alert: &OpsAlert) -> anyhow::Result<()>;
}

pub struct TeamsNotifier {
    webhook_url: String,
    client: reqwest::Client,
}

impl TeamsNotifier {
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl OpsNotifier for TeamsNotifier {
    async fn notify(&self, alert: &OpsAlert) -> anyhow::Result<()> {
        if self.webhook_url.is_empty() {
            tracing::debug!(title = %alert.title, "teams webhook not configured, alert dropped");
            return Ok(());
        }

        let resp = self
            .client
            .post(&self.webhook_url)
            .json(&alert.to_card())
            .send()
            .await
            .context("failed to reach Teams webhook")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Teams webhook returned {status}: {body}");
        }

        Ok(())
    }
}

/// Send an alert, logging instead of failing when delivery does not work.
pub async fn raise(notifier: &dyn OpsNotifier, alert: OpsAlert) {
    if alert.is_error {
        tracing::error!(target: "incident", title = %alert.title, message = %alert.message, "ops alert");
    } else {
        tracing::info!(title = %alert.title, "ops notification");
    }
    if let Err(e) = notifier.notify(&alert).await {
        tracing::error!(target: "incident", error = %e, title = %alert.title, "failed to deliver ops alert");
    }
}
