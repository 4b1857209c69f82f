use regex::Regex;
use serde::Deserialize;

use crate::config::HotelProfile;
use crate::services::ai::intent::parse_json_reply;
use crate::services::ai::{ChatRequest, LlmProvider, Message};
use crate::services::prompt;

/// Score a direct fuzzy hit needs to skip the language model.
pub const MATCH_THRESHOLD: f64 = 90.0;
/// Score a model-proposed name needs to map onto a known property.
pub const STANDARDIZE_THRESHOLD: f64 = 95.0;

/// Result of one attempt to work out which property the caller means.
#[derive(Debug, Clone, PartialEq)]
pub enum LocationOutcome {
    Confirmed(String),
    /// The city is clear but it has several properties.
    CityOnly { city: String, message: Option<String> },
    Unconfirmed { message: Option<String> },
    /// The model confirmed a name that matches none of our properties.
    UnknownProperty,
}

#[derive(Debug, Default, Deserialize)]
struct LocationReply {
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    location_confirmed: bool,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    city_confirmed: bool,
    #[serde(default)]
    message: Option<String>,
}

/// Fold spelling variants that sound alike in German and English.
fn phonetic_fold(s: &str) -> String {
    let lowered: String = s
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'ä' => 'a',
            'ö' => 'o',
            'ü' => 'u',
            other => other,
        })
        .collect();
    lowered
        .replace('ß', "ss")
        .replace("ch", "k")
        .replace("kh", "k")
        .replace("ck", "k")
        .replace('c', "k")
        .replace("ph", "f")
        .replace("th", "t")
        .replace("dt", "t")
}

fn lcs_len(a: &[char], b: &[char]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut cur = vec![0usize; b.len() + 1];
    for ca in a {
        for (j, cb) in b.iter().enumerate() {
            cur[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(cur[j])
            };
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

/// Indel similarity in 0..=100.
fn ratio(a: &[char], b: &[char]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 100.0;
    }
    200.0 * lcs_len(a, b) as f64 / total as f64
}

/// Best alignment of `name` against same-length windows of `query`.
fn partial_ratio(query: &[char], name: &[char]) -> f64 {
    if name.is_empty() || query.len() < name.len() {
        return 0.0;
    }
    query
        .windows(name.len())
        .map(|w| ratio(w, name))
        .fold(0.0, f64::max)
}

fn token_sort(s: &str) -> Vec<char> {
    let mut tokens: Vec<&str> = s.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ").chars().collect()
}

/// Similarity of a spoken phrase to a property name in 0..=100.
pub fn similarity(query: &str, name: &str) -> f64 {
    let q = phonetic_fold(query);
    let n = phonetic_fold(name);
    let qc: Vec<char> = q.chars().collect();
    let nc: Vec<char> = n.chars().collect();

    ratio(&qc, &nc)
        .max(ratio(&token_sort(&q), &token_sort(&n)))
        .max(partial_ratio(&qc, &nc))
}

/// Known properties plus the alternative names callers use for them.
#[derive(Debug, Clone)]
pub struct LocationTable {
    names: Vec<String>,
    aliases: Vec<(Regex, String)>,
}

impl LocationTable {
    pub fn from_profile(profile: &HotelProfile) -> Self {
        let mut aliases: Vec<(String, String)> = profile
            .properties
            .iter()
            .flat_map(|p| p.aliases.iter().map(move |a| (a.clone(), p.name.clone())))
            .filter(|(alias, _)| !alias.trim().is_empty())
            .collect();
        // Longest first so "Altdorf bei Landshut" wins over "Landshut".
        aliases.sort_by_key(|(alias, _)| std::cmp::Reverse(alias.len()));

        let aliases = aliases
            .into_iter()
            .filter_map(|(alias, name)| {
                Regex::new(&format!(r"(?i)\b{}\b", regex::escape(&alias)))
                    .map(|re| (re, name))
                    .map_err(|e| tracing::warn!(alias = %alias, error = %e, "skipping location alias"))
                    .ok()
            })
            .collect();

        Self {
            names: profile.names(),
            aliases,
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn replace_aliases(&self, text: &str) -> String {
        self.aliases
            .iter()
            .fold(text.to_string(), |acc, (re, name)| {
                re.replace_all(&acc, name.as_str()).into_owned()
            })
    }

    pub fn best_match(&self, text: &str) -> Option<(&str, f64)> {
        self.names
            .iter()
            .map(|name| (name.as_str(), similarity(text, name)))
            .fold(None, |best, cand| match best {
                Some((_, score)) if score >= cand.1 => best,
                _ => Some(cand),
            })
    }

    /// Canonical property name for `text`, when it scores at least `threshold`.
    pub fn standardize(&self, text: &str, threshold: f64) -> Option<String> {
        self.best_match(text)
            .filter(|(_, score)| *score >= threshold)
            .map(|(name, _)| name.to_string())
    }
}

pub struct LocationResolver {
    table: LocationTable,
    max_tokens: u32,
}

impl LocationResolver {
    pub fn new(table: LocationTable, max_tokens: u32) -> Self {
        Self { table, max_tokens }
    }

    pub fn table(&self) -> &LocationTable {
        &self.table
    }

    pub async fn resolve(
        &self,
        llm: &dyn LlmProvider,
        utterance: &str,
        language: &str,
    ) -> anyhow::Result<LocationOutcome> {
        let query = self.table.replace_aliases(utterance);

        if let Some(name) = self.table.standardize(&query, MATCH_THRESHOLD) {
            tracing::info!(location = %name, "location matched without model");
            return Ok(LocationOutcome::Confirmed(name));
        }

        let system = prompt::location_prompt(&query, self.table.names(), language);
        let request = ChatRequest::json(
            vec![
                Message::new("system", system),
                Message::new("user", query.trim()),
            ],
            self.max_tokens,
        );
        let response = llm.complete(&request).await?;
        let reply: LocationReply = parse_json_reply(&response)?;

        tracing::info!(
            location = ?reply.location,
            confirmed = reply.location_confirmed,
            city = ?reply.city,
            "location model reply"
        );

        if reply.location_confirmed {
            let proposed = reply.location.unwrap_or_default();
            return Ok(match self.table.standardize(&proposed, STANDARDIZE_THRESHOLD) {
                Some(name) => LocationOutcome::Confirmed(name),
                None => LocationOutcome::UnknownProperty,
            });
        }

        match reply.city {
            Some(city) if reply.city_confirmed && !city.trim().is_empty() => {
                Ok(LocationOutcome::CityOnly {
                    city,
                    message: reply.message,
                })
            }
            _ => Ok(LocationOutcome::Unconfirmed {
                message: reply.message.filter(|m| !m.trim().is_empty()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PropertyConfig;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn profile() -> HotelProfile {
        let property = |name: &str, aliases: &[&str]| PropertyConfig {
            name: name.to_string(),
            pms_id: name[..3].to_uppercase(),
            caller_id: None,
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
        };
        HotelProfile {
            brand: "Test".to_string(),
            properties: vec![
                property("Altdorf", &[]),
                property("Landshut", &[]),
                property("Unterhaching", &["Haching"]),
                property("München Laim", &["Munich Laim"]),
            ],
        }
    }

    struct ScriptedLlm {
        reply: String,
        calls: AtomicUsize,
    }

    impl ScriptedLlm {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        async fn complete(&self, _request: &ChatRequest) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.reply.clone())
        }
    }

    fn resolver() -> LocationResolver {
        LocationResolver::new(LocationTable::from_profile(&profile()), 500)
    }

    #[test]
    fn test_similarity_handles_misspelling() {
        assert!(similarity("I'd like to book in Munkhen Lime", "München Laim") >= MATCH_THRESHOLD);
        assert!(similarity("Landshut", "Landshut") >= 99.9);
        assert!(similarity("ein Zimmer für morgen", "Unterhaching") < MATCH_THRESHOLD);
    }

    #[test]
    fn test_aliases_are_replaced() {
        let table = LocationTable::from_profile(&profile());
        assert_eq!(table.replace_aliases("in munich laim bitte"), "in München Laim bitte");
        assert_eq!(table.standardize("haching", MATCH_THRESHOLD), None);
        assert_eq!(
            table.standardize(&table.replace_aliases("haching"), MATCH_THRESHOLD).as_deref(),
            Some("Unterhaching")
        );
    }

    #[tokio::test]
    async fn test_fuzzy_hit_skips_model() {
        let llm = ScriptedLlm::new("{}");
        let outcome = resolver()
            .resolve(&llm, "I'd like to book in Munkhen Lime", "en-US")
            .await
            .unwrap();
        assert_eq!(outcome, LocationOutcome::Confirmed("München Laim".to_string()));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_model_confirmation_is_standardized() {
        let llm = ScriptedLlm::new(r#"{"location":"Landshut","location_confirmed":true,"message":null}"#);
        let outcome = resolver().resolve(&llm, "die zweite", "de-DE").await.unwrap();
        assert_eq!(outcome, LocationOutcome::Confirmed("Landshut".to_string()));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_model_confirms_unknown_property() {
        let llm = ScriptedLlm::new(r#"{"location":"Hamburg","location_confirmed":true}"#);
        let outcome = resolver().resolve(&llm, "Hamburg", "de-DE").await.unwrap();
        assert_eq!(outcome, LocationOutcome::UnknownProperty);
    }

    #[tokio::test]
    async fn test_city_only_and_unconfirmed() {
        let llm = ScriptedLlm::new(
            r#"{"location":null,"location_confirmed":false,"city":"München","city_confirmed":true,"message":"Welcher Standort in München?"}"#,
        );
        let outcome = resolver().resolve(&llm, "in München", "de-DE").await.unwrap();
        assert_eq!(
            outcome,
            LocationOutcome::CityOnly {
                city: "München".to_string(),
                message: Some("Welcher Standort in München?".to_string())
            }
        );

        let llm = ScriptedLlm::new(r#"{"location":null,"location_confirmed":false,"message":""}"#);
        let outcome = resolver().resolve(&llm, "keine Ahnung", "de-DE").await.unwrap();
        assert_eq!(outcome, LocationOutcome::Unconfirmed { message: None });
    }
}
