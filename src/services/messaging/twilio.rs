use anyhow::Context;
use async_trait::async_trait;

use super::MessagingProvider;

const TWILIO_API: &str = "https://api.twilio.com/2010-04-01";

/// WhatsApp messages sent through the Twilio Messages API.
pub struct TwilioWhatsAppProvider {
    base_url: String,
    account_sid: String,
    auth_token: String,
    from_number: String,
    client: reqwest::Client,
}

impl TwilioWhatsAppProvider {
    pub fn new(account_sid: String, auth_token: String, from_number: String) -> Self {
        Self::with_base_url(TWILIO_API.to_string(), account_sid, auth_token, from_number)
    }

    pub fn with_base_url(
        base_url: String,
        account_sid: String,
        auth_token: String,
        from_number: String,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            account_sid,
            auth_token,
            from_number,
            client: reqwest::Client::new(),
        }
    }

    fn whatsapp(number: &str) -> String {
        if number.starts_with("whatsapp:") {
            number.to_string()
        } else {
            format!("whatsapp:{number}")
        }
    }

    async fn post(&self, form: &[(&str, String)]) -> anyhow::Result<()> {
        let url = format!(
            "{}/Accounts/{}/Messages.json",
            self.base_url, self.account_sid
        );

        self.client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(form)
            .send()
            .await
            .context("failed to send WhatsApp message")?
            .error_for_status()
            .context("Twilio API returned error")?;

        Ok(())
    }
}

#[async_trait]
impl MessagingProvider for TwilioWhatsAppProvider {
    async fn send_message(&self, to: &str, body: &str) -> anyhow::Result<()> {
        self.post(&[
            ("To", Self::whatsapp(to)),
            ("From", Self::whatsapp(&self.from_number)),
            ("Body", body.to_string()),
        ])
        .await
    }

    async fn send_template(
        &self,
        to: &str,
        content_sid: &str,
        variables: &[(&str, &str)],
    ) -> anyhow::Result<()> {
        let variables: serde_json::Map<String, serde_json::Value> = variables
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::from(*v)))
            .collect();
        self.post(&[
            ("To", Self::whatsapp(to)),
            ("From", Self::whatsapp(&self.from_number)),
            ("ContentSid", content_sid.to_string()),
            (
                "ContentVariables",
                serde_json::Value::Object(variables).to_string(),
            ),
        ])
        .await
    }
}
