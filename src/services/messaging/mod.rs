pub mod twilio;

use async_trait::async_trait;

#[async_trait]
pub trait MessagingProvider: Send + Sync {
    async fn send_message(&self, to: &str, body: &str) -> anyhow::Result<()>;

    /// Send a pre-approved template with numbered variables.
    async fn send_template(
        &self,
        to: &str,
        content_sid: &str,
        variables: &[(&str, &str)],
    ) -> anyhow::Result<()>;
}

/// E.164 form of a German phone number: digits only, national `0` becomes `+49`.
pub fn to_international(number: &str) -> String {
    let digits: String = number.chars().filter(|c| c.is_ascii_digit()).collect();
    if let Some(rest) = digits.strip_prefix("00") {
        format!("+{rest}")
    } else if let Some(rest) = digits.strip_prefix('0') {
        format!("+49{rest}")
    } else if digits.is_empty() {
        digits
    } else {
        format!("+{digits}")
    }
}
