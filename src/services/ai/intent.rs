use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::models::{ChatTurn, StructuredIntent};
use crate::services::ai::{history_messages, ChatRequest, LlmProvider};

#[derive(Debug, thiserror::Error)]
pub enum IntentError {
    #[error("language model request failed: {0}")]
    Transport(#[source] anyhow::Error),
    #[error("model reply is not a JSON object: {0}")]
    NotJson(String),
    #[error("model reply does not match any mode: {0}")]
    Shape(#[from] serde_json::Error),
}

/// Ask the model what to do with the latest user turn in `history`.
pub async fn classify_turn(
    llm: &dyn LlmProvider,
    history: &[ChatTurn],
    max_tokens: u32,
) -> Result<StructuredIntent, IntentError> {
    let request = ChatRequest::json(history_messages(history), max_tokens);
    let response = llm.complete(&request).await.map_err(IntentError::Transport)?;
    parse_structured_intent(&response)
}

pub fn parse_structured_intent(response: &str) -> Result<StructuredIntent, IntentError> {
    let mut value = extract_json_object(response)?;

    // Plain answers often come back without a mode.
    if let Value::Object(map) = &mut value {
        map.entry("mode").or_insert_with(|| Value::String("faq".to_string()));
    }

    Ok(serde_json::from_value(value)?)
}

/// Decode a JSON object from a model reply, tolerating markdown fences and
/// chatter around the object.
pub fn parse_json_reply<T: DeserializeOwned>(response: &str) -> Result<T, IntentError> {
    Ok(serde_json::from_value(extract_json_object(response)?)?)
}

fn extract_json_object(response: &str) -> Result<Value, IntentError> {
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(response) {
        return Ok(value);
    }

    let trimmed = response.trim();
    let cleaned = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let cleaned = cleaned.strip_suffix("```").unwrap_or(cleaned).trim();

    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(cleaned) {
        return Ok(value);
    }

    if let (Some(start), Some(end)) = (cleaned.find('{'), cleaned.rfind('}')) {
        if start < end {
            if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(&cleaned[start..=end]) {
                return Ok(value);
            }
        }
    }

    Err(IntentError::NotJson(truncate(response, 200)))
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BookingReply, FarewellReply};

    #[test]
    fn test_parse_valid_json() {
        let json = r#"{"mode":"booking","booking":true,"first_name":"Anna","response":"Wann möchten Sie anreisen?"}"#;
        let StructuredIntent::Booking(reply) = parse_structured_intent(json).unwrap() else {
            panic!("expected booking");
        };
        assert_eq!(
            reply,
            BookingReply {
                first_name: Some("Anna".to_string()),
                response: Some("Wann möchten Sie anreisen?".to_string()),
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_parse_markdown_fenced_json() {
        let json = "```json\n{\"mode\":\"farewell\",\"response\":\"Auf Wiederhören! Verabschiedung\"}\n```";
        assert_eq!(
            parse_structured_intent(json).unwrap(),
            StructuredIntent::Farewell(FarewellReply {
                response: "Auf Wiederhören! Verabschiedung".to_string()
            })
        );
    }

    #[test]
    fn test_parse_embedded_object() {
        let raw = "Sure! {\"mode\":\"faq\",\"response\":\"Frühstück gibt es ab 7 Uhr.\"} Hope that helps";
        assert_eq!(parse_structured_intent(raw).unwrap().mode(), "faq");
    }

    #[test]
    fn test_missing_mode_defaults_to_faq() {
        let raw = r#"{"response":"Parken kostet 12 Euro.","booking":false}"#;
        assert_eq!(parse_structured_intent(raw).unwrap().mode(), "faq");
    }

    #[test]
    fn test_plain_text_is_an_error() {
        let raw = "I don't understand the format you want";
        assert!(matches!(parse_structured_intent(raw), Err(IntentError::NotJson(_))));
    }

    #[test]
    fn test_unknown_mode_is_an_error() {
        let raw = r#"{"mode":"chitchat","response":"hi"}"#;
        assert!(matches!(parse_structured_intent(raw), Err(IntentError::Shape(_))));
    }
}
