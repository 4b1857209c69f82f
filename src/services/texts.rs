use std::collections::HashMap;

use anyhow::Context;
use rand::seq::SliceRandom;

pub const FALLBACK_LANGUAGE: &str = "de-DE";

static BUILTIN_TEXTS: &str = include_str!("../../assets/texts.json");

/// Canned phrases by scenario and language, each with one or more variants.
#[derive(Debug, Clone, Default)]
pub struct TextCatalog {
    entries: HashMap<String, HashMap<String, Vec<String>>>,
}

impl TextCatalog {
    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        let entries = serde_json::from_str(raw).context("invalid text catalog")?;
        Ok(Self { entries })
    }

    pub fn builtin() -> anyhow::Result<Self> {
        Self::from_json(BUILTIN_TEXTS)
    }

    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read text catalog: {path}"))?;
                Self::from_json(&raw)
            }
            None => Self::builtin(),
        }
    }

    fn variants(&self, scenario: &str, language: &str) -> Option<&[String]> {
        let by_language = self.entries.get(scenario)?;
        by_language
            .get(language)
            .or_else(|| by_language.get(FALLBACK_LANGUAGE))
            .map(Vec::as_slice)
            .filter(|v| !v.is_empty())
    }

    /// A random variant for `scenario`, in German when `language` has none.
    pub fn get(&self, scenario: &str, language: &str) -> String {
        match self.variants(scenario, language) {
            Some(variants) => variants
                .choose(&mut rand::thread_rng())
                .cloned()
                .unwrap_or_default(),
            None => {
                tracing::error!(scenario, language, "text scenario not found");
                format!("Text for scenario '{scenario}' not found.")
            }
        }
    }

    /// Like [`get`](Self::get), with `{name}` placeholders filled in.
    pub fn get_with(&self, scenario: &str, language: &str, vars: &[(&str, &str)]) -> String {
        vars.iter()
            .fold(self.get(scenario, language), |text, (name, value)| {
                text.replace(&format!("{{{name}}}"), value)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> TextCatalog {
        TextCatalog::from_json(
            r#"{
                "greeting": {"de-DE": ["Hallo"], "en-US": ["Hello"]},
                "dates": {"de-DE": ["Vom {arrival} bis {departure}"]},
                "varied": {"de-DE": ["A", "B"]}
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_single_variant_is_stable() {
        let c = catalog();
        assert_eq!(c.get("greeting", "en-US"), "Hello");
        assert_eq!(c.get("greeting", "en-US"), c.get("greeting", "en-US"));
    }

    #[test]
    fn test_unknown_language_falls_back_to_german() {
        assert_eq!(catalog().get("greeting", "fr-FR"), "Hallo");
    }

    #[test]
    fn test_unknown_scenario_does_not_panic() {
        let text = catalog().get("nope", "de-DE");
        assert!(text.contains("nope"));
    }

    #[test]
    fn test_variables_and_variants() {
        let c = catalog();
        let text = c.get_with("dates", "en-US", &[("arrival", "2025-03-01"), ("departure", "2025-03-03")]);
        assert_eq!(text, "Vom 2025-03-01 bis 2025-03-03");
        assert!(["A", "B"].contains(&c.get("varied", "de-DE").as_str()));
    }

    #[test]
    fn test_builtin_catalog_covers_scenarios() {
        let c = TextCatalog::builtin().unwrap();
        for scenario in [
            "welcome_message",
            "which_property_name",
            "no_property_found",
            "service_hotline_open",
            "booking_confirmation",
            "booking_error",
            "booking_not_confirmed",
            "available_offers",
            "no_available_offers",
            "offer_selection",
            "missing_booking_data",
            "payment_link_message",
        ] {
            for language in ["de-DE", "en-US"] {
                assert!(c.variants(scenario, language).is_some(), "{scenario}/{language}");
            }
        }
    }
}
