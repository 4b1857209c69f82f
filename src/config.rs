use std::env;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub webhook_token: String,
    pub hotel_profile_path: String,
    pub texts_path: Option<String>,

    pub llm_provider: String,
    pub openai_url: String,
    pub openai_api_key: String,
    pub openai_model: String,
    pub ollama_url: String,
    pub ollama_model: String,
    pub llm_max_tokens: u32,

    pub embedding_url: String,
    pub embedding_api_key: String,
    pub pinecone_url: String,
    pub pinecone_api_key: String,

    pub booking_api_url: String,
    pub booking_token_url: String,
    pub booking_client_id: String,
    pub booking_client_secret: String,
    pub payment_country_code: String,
    pub payment_link_delay_secs: u64,
    pub payment_link_prefix: String,

    pub twilio_account_sid: String,
    pub twilio_auth_token: String,
    pub whatsapp_from: String,
    pub whatsapp_content_sid: String,

    pub teams_webhook_url: String,

    pub default_language: String,
    pub default_voice: String,
    pub english_voice: String,
    pub speech_rate: String,

    pub transfer_extension: String,
    pub sip_domain: String,
    pub transfer_target: String,
    pub caller_whitelist: Vec<String>,
    pub repeat_caller_max_calls: u32,
    pub repeat_caller_window_minutes: i64,
    pub repeat_caller_message: String,
    pub keyword_redirect: bool,

    pub session_expiry_seconds: u64,
    pub refresh_expiry_seconds: u64,
    pub response_warning_seconds: f64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            database_url: "frontdesk.db".to_string(),
            webhook_token: String::new(),
            hotel_profile_path: "hotel.json".to_string(),
            texts_path: None,
            llm_provider: "openai".to_string(),
            openai_url: "https://api.openai.com/v1".to_string(),
            openai_api_key: String::new(),
            openai_model: "gpt-4o".to_string(),
            ollama_url: "http://localhost:11434".to_string(),
            ollama_model: "llama3.2".to_string(),
            llm_max_tokens: 4000,
            embedding_url: String::new(),
            embedding_api_key: String::new(),
            pinecone_url: String::new(),
            pinecone_api_key: String::new(),
            booking_api_url: "https://api.apaleo.com".to_string(),
            booking_token_url: "https://identity.apaleo.com/connect/token".to_string(),
            booking_client_id: String::new(),
            booking_client_secret: String::new(),
            payment_country_code: "DE".to_string(),
            payment_link_delay_secs: 10,
            payment_link_prefix: "https://test.adyen.link/".to_string(),
            twilio_account_sid: String::new(),
            twilio_auth_token: String::new(),
            whatsapp_from: String::new(),
            whatsapp_content_sid: String::new(),
            teams_webhook_url: String::new(),
            default_language: "de-DE".to_string(),
            default_voice: "de-DE-KatjaNeural".to_string(),
            english_voice: "en-US-JennyNeural".to_string(),
            speech_rate: "medium".to_string(),
            transfer_extension: "100".to_string(),
            sip_domain: "@sip.example.com".to_string(),
            transfer_target: "sip:100@sip.example.com".to_string(),
            caller_whitelist: Vec::new(),
            repeat_caller_max_calls: 3,
            repeat_caller_window_minutes: 15,
            repeat_caller_message: "Einen Moment bitte, ich verbinde Sie mit unserem Team.".to_string(),
            keyword_redirect: false,
            session_expiry_seconds: 3600,
            refresh_expiry_seconds: 3600,
            response_warning_seconds: 8.0,
        }
    }
}

fn var_or(name: &str, default: String) -> String {
    env::var(name).unwrap_or(default)
}

fn parsed_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            port: parsed_or("PORT", d.port),
            database_url: var_or("DATABASE_URL", d.database_url),
            webhook_token: env::var("WEBHOOK_TOKEN").unwrap_or_default(),
            hotel_profile_path: var_or("HOTEL_PROFILE", d.hotel_profile_path),
            texts_path: env::var("TEXTS_PATH").ok().filter(|p| !p.is_empty()),
            llm_provider: var_or("LLM_PROVIDER", d.llm_provider),
            openai_url: var_or("OPENAI_URL", d.openai_url),
            openai_api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
            openai_model: var_or("OPENAI_MODEL", d.openai_model),
            ollama_url: var_or("OLLAMA_URL", d.ollama_url),
            ollama_model: var_or("OLLAMA_MODEL", d.ollama_model),
            llm_max_tokens: parsed_or("LLM_MAX_TOKENS", d.llm_max_tokens),
            embedding_url: env::var("EMBEDDING_URL").unwrap_or_default(),
            embedding_api_key: env::var("EMBEDDING_API_KEY").unwrap_or_default(),
            pinecone_url: env::var("PINECONE_URL").unwrap_or_default(),
            pinecone_api_key: env::var("PINECONE_API_KEY").unwrap_or_default(),
            booking_api_url: var_or("BOOKING_API_URL", d.booking_api_url),
            booking_token_url: var_or("BOOKING_TOKEN_URL", d.booking_token_url),
            booking_client_id: env::var("BOOKING_CLIENT_ID").unwrap_or_default(),
            booking_client_secret: env::var("BOOKING_CLIENT_SECRET").unwrap_or_default(),
            payment_country_code: var_or("PAYMENT_COUNTRY_CODE", d.payment_country_code),
            payment_link_delay_secs: parsed_or("PAYMENT_LINK_DELAY_SECS", d.payment_link_delay_secs),
            payment_link_prefix: var_or("PAYMENT_LINK_PREFIX", d.payment_link_prefix),
            twilio_account_sid: env::var("TWILIO_ACCOUNT_SID").unwrap_or_default(),
            twilio_auth_token: env::var("TWILIO_AUTH_TOKEN").unwrap_or_default(),
            whatsapp_from: env::var("WHATSAPP_FROM").unwrap_or_default(),
            whatsapp_content_sid: env::var("WHATSAPP_CONTENT_SID").unwrap_or_default(),
            teams_webhook_url: env::var("TEAMS_WEBHOOK_URL").unwrap_or_default(),
            default_language: var_or("DEFAULT_LANGUAGE", d.default_language),
            default_voice: var_or("DEFAULT_VOICE", d.default_voice),
            english_voice: var_or("ENGLISH_VOICE", d.english_voice),
            speech_rate: var_or("SPEECH_RATE", d.speech_rate),
            transfer_extension: var_or("TRANSFER_EXTENSION", d.transfer_extension),
            sip_domain: var_or("SIP_DOMAIN", d.sip_domain),
            transfer_target: var_or("TRANSFER_TARGET", d.transfer_target),
            caller_whitelist: env::var("CALLER_WHITELIST")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            repeat_caller_max_calls: parsed_or("REPEAT_CALLER_MAX_CALLS", d.repeat_caller_max_calls),
            repeat_caller_window_minutes: parsed_or(
                "REPEAT_CALLER_WINDOW_MINUTES",
                d.repeat_caller_window_minutes,
            ),
            repeat_caller_message: var_or("REPEAT_CALLER_MESSAGE", d.repeat_caller_message),
            keyword_redirect: parsed_or("KEYWORD_REDIRECT", d.keyword_redirect),
            session_expiry_seconds: parsed_or("SESSION_EXPIRY_SECONDS", d.session_expiry_seconds),
            refresh_expiry_seconds: parsed_or("REFRESH_EXPIRY_SECONDS", d.refresh_expiry_seconds),
            response_warning_seconds: parsed_or(
                "RESPONSE_WARNING_SECONDS",
                d.response_warning_seconds,
            ),
        }
    }

    /// SIP URI for a transfer to `extension`.
    pub fn sip_target(&self, extension: &str) -> String {
        format!("sip:{extension}{}", self.sip_domain)
    }
}

/// One bookable property of the chain.
#[derive(Clone, Debug, Deserialize)]
pub struct PropertyConfig {
    pub name: String,
    /// Property code in the booking system.
    pub pms_id: String,
    /// Identifier the telephony platform sends in `callerDisplayName`.
    #[serde(default)]
    pub caller_id: Option<String>,
    /// Alternative spellings callers use for this property.
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct HotelProfile {
    pub brand: String,
    #[serde(default)]
    pub properties: Vec<PropertyConfig>,
}

impl HotelProfile {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        if !Path::new(path).exists() {
            tracing::warn!(path, "hotel profile not found, running without properties");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read hotel profile: {path}"))?;
        serde_json::from_str(&raw).with_context(|| format!("invalid hotel profile: {path}"))
    }

    pub fn property(&self, name: &str) -> Option<&PropertyConfig> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn property_by_caller_id(&self, caller_id: &str) -> Option<&PropertyConfig> {
        self.properties
            .iter()
            .find(|p| p.caller_id.as_deref() == Some(caller_id))
    }

    pub fn names(&self) -> Vec<String> {
        self.properties.iter().map(|p| p.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> HotelProfile {
        serde_json::from_str(
            r#"{
                "brand": "Example Hotels",
                "properties": [
                    {"name": "Altdorf", "pms_id": "ALT", "caller_id": "17"},
                    {"name": "München Laim", "pms_id": "MUC", "aliases": ["Laim"]}
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_property_lookup() {
        let profile = profile();
        assert_eq!(profile.property("München Laim").unwrap().pms_id, "MUC");
        assert_eq!(profile.property_by_caller_id("17").unwrap().name, "Altdorf");
        assert!(profile.property_by_caller_id("99").is_none());
        assert_eq!(profile.names(), vec!["Altdorf", "München Laim"]);
    }

    #[test]
    fn test_missing_profile_is_empty() {
        let profile = HotelProfile::load("does-not-exist.json").unwrap();
        assert!(profile.properties.is_empty());
    }

    #[test]
    fn test_sip_target() {
        let config = AppConfig::default();
        assert_eq!(config.sip_target("42"), "sip:42@sip.example.com");
    }
}
