use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// What the language model decided to do with the caller's turn.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum StructuredIntent {
    Faq(FaqReply),
    Booking(BookingReply),
    Farewell(FarewellReply),
    EmployeeHandover(HandoverReply),
}

impl StructuredIntent {
    pub fn mode(&self) -> &'static str {
        match self {
            StructuredIntent::Faq(_) => "faq",
            StructuredIntent::Booking(_) => "booking",
            StructuredIntent::Farewell(_) => "farewell",
            StructuredIntent::EmployeeHandover(_) => "employee_handover",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct FaqReply {
    #[serde(default)]
    pub response: String,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub booking: bool,
    #[serde(default, deserialize_with = "placeholder_text")]
    pub follow_up: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct BookingReply {
    #[serde(default, deserialize_with = "placeholder_text")]
    pub response: Option<String>,
    #[serde(default, deserialize_with = "placeholder_text")]
    pub arrival_date: Option<String>,
    #[serde(default, deserialize_with = "placeholder_text")]
    pub departure_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub number_of_adults: Option<u32>,
    #[serde(default, deserialize_with = "placeholder_text")]
    pub first_name: Option<String>,
    #[serde(default, deserialize_with = "placeholder_text")]
    pub last_name: Option<String>,
    #[serde(default, deserialize_with = "placeholder_text")]
    pub guest_whatsapp_number: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_bool")]
    pub booking_confirmed: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct FarewellReply {
    #[serde(default)]
    pub response: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct HandoverReply {
    #[serde(default, deserialize_with = "lenient_bool")]
    pub call_forwarding: bool,
    #[serde(default, deserialize_with = "lenient_opt_bool")]
    pub emergency_topic: Option<bool>,
}

/// Models fill unknown slots with "none", "null" or an empty string.
fn is_placeholder(s: &str) -> bool {
    let s = s.trim();
    s.is_empty() || s.eq_ignore_ascii_case("none") || s.eq_ignore_ascii_case("null")
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "ja" => Some(true),
            "false" | "no" | "nein" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn lenient_bool<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    Ok(as_bool(&Value::deserialize(d)?).unwrap_or(false))
}

fn lenient_opt_bool<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
    Ok(as_bool(&Value::deserialize(d)?))
}

fn placeholder_text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) if !is_placeholder(&s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_count<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_booking_placeholders_become_none() {
        let raw = r#"{"mode":"booking","booking":true,"arrival_date":"2025-03-01","departure_date":"none",
            "number_of_adults":"2","first_name":"null","last_name":"","booking_confirmed":"false",
            "response":"Wie ist Ihr Nachname?"}"#;
        let StructuredIntent::Booking(reply) = serde_json::from_str(raw).unwrap() else {
            panic!("expected booking");
        };
        assert_eq!(reply.arrival_date.as_deref(), Some("2025-03-01"));
        assert_eq!(reply.departure_date, None);
        assert_eq!(reply.number_of_adults, Some(2));
        assert_eq!(reply.first_name, None);
        assert_eq!(reply.last_name, None);
        assert_eq!(reply.booking_confirmed, Some(false));
        assert_eq!(reply.response.as_deref(), Some("Wie ist Ihr Nachname?"));
    }

    #[test]
    fn test_faq_and_handover() {
        let faq: StructuredIntent =
            serde_json::from_str(r#"{"mode":"faq","response":"Check-in ab 15 Uhr.","booking":false,"follow_up":"Noch Fragen?"}"#)
                .unwrap();
        assert_eq!(faq.mode(), "faq");

        let handover: StructuredIntent =
            serde_json::from_str(r#"{"mode":"employee_handover","call_forwarding":true}"#).unwrap();
        assert_eq!(
            handover,
            StructuredIntent::EmployeeHandover(HandoverReply {
                call_forwarding: true,
                emergency_topic: None
            })
        );
    }

    #[test]
    fn test_unknown_mode_rejected() {
        assert!(serde_json::from_str::<StructuredIntent>(r#"{"mode":"smalltalk","response":"hi"}"#).is_err());
    }
}
