use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub conversation: String,
}

#[derive(Debug, Serialize)]
pub struct StartResponse {
    #[serde(rename = "activitiesURL")]
    pub activities_url: String,
    #[serde(rename = "refreshURL")]
    pub refresh_url: String,
    #[serde(rename = "disconnectURL")]
    pub disconnect_url: String,
    #[serde(rename = "expiresSeconds")]
    pub expires_seconds: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct ActivitiesRequest {
    #[serde(default)]
    pub activities: Vec<InboundActivity>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InboundActivity {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub parameters: Option<ActivityParameters>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityParameters {
    #[serde(default)]
    pub caller: Option<String>,
    #[serde(default)]
    pub caller_display_name: Option<String>,
    #[serde(default)]
    pub recognition_output: Option<RecognitionOutput>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RecognitionOutput {
    #[serde(rename = "PrimaryLanguage", default)]
    pub primary_language: Option<PrimaryLanguage>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PrimaryLanguage {
    #[serde(rename = "Language")]
    pub language: String,
}

impl ActivitiesRequest {
    fn parameters(&self) -> Option<&ActivityParameters> {
        self.activities.first().and_then(|a| a.parameters.as_ref())
    }

    pub fn utterance(&self) -> Option<&str> {
        self.activities
            .iter()
            .filter(|a| a.kind == "message")
            .find_map(|a| a.text.as_deref())
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    pub fn caller(&self) -> Option<&str> {
        self.parameters()
            .and_then(|p| p.caller.as_deref())
            .filter(|c| !c.is_empty())
    }

    /// Property id carried in `callerDisplayName`, formatted as `<id>:<label>`,
    /// `<number>:<id>` or just `<id>`.
    pub fn display_id(&self) -> Option<&str> {
        let display = self.parameters()?.caller_display_name.as_deref()?;
        let id = match display.split_once(':') {
            Some((first, rest))
                if !first.is_empty() && first.chars().all(|c| c.is_ascii_digit()) =>
            {
                rest
            }
            Some((first, _)) => first,
            None => display,
        };
        Some(id.trim()).filter(|id| !id.is_empty())
    }

    pub fn recognized_language(&self) -> Option<&str> {
        self.parameters()
            .and_then(|p| p.recognition_output.as_ref())
            .and_then(|r| r.primary_language.as_ref())
            .map(|l| l.language.as_str())
    }
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_target: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundActivity {
    pub id: String,
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_params: Option<ActivityParams>,
}

fn timestamp(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

impl OutboundActivity {
    fn event(name: &'static str, now: DateTime<Utc>, params: Option<ActivityParams>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: timestamp(now),
            kind: "event",
            name: Some(name),
            language: None,
            text: None,
            activity_params: params,
        }
    }

    pub fn message(text: String, language: &str, voice_name: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: timestamp(now),
            kind: "message",
            name: None,
            language: Some(language.to_string()),
            text: Some(text),
            activity_params: Some(ActivityParams {
                language: Some(language.to_string()),
                voice_name: Some(voice_name.to_string()),
                transfer_target: None,
            }),
        }
    }

    pub fn transfer(target: String, now: DateTime<Utc>) -> Self {
        Self::event(
            "transfer",
            now,
            Some(ActivityParams {
                transfer_target: Some(target),
                ..Default::default()
            }),
        )
    }

    pub fn hangup(now: DateTime<Utc>) -> Self {
        Self::event("hangup", now, None)
    }
}

#[derive(Debug, Serialize)]
pub struct ActivitiesResponse {
    pub activities: Vec<OutboundActivity>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(display: &str) -> ActivitiesRequest {
        serde_json::from_value(serde_json::json!({
            "activities": [{
                "type": "message",
                "text": "  Hallo, ich möchte ein Zimmer  ",
                "parameters": {
                    "caller": "0891234567",
                    "callerDisplayName": display,
                    "recognitionOutput": {"PrimaryLanguage": {"Language": "en-US"}}
                }
            }]
        }))
        .unwrap()
    }

    #[test]
    fn test_inbound_accessors() {
        let req = request("MUC:Hotel Laim");
        assert_eq!(req.utterance(), Some("Hallo, ich möchte ein Zimmer"));
        assert_eq!(req.caller(), Some("0891234567"));
        assert_eq!(req.display_id(), Some("MUC"));
        assert_eq!(req.recognized_language(), Some("en-US"));
    }

    #[test]
    fn test_display_id_forms() {
        assert_eq!(request("0891234567:ALT").display_id(), Some("ALT"));
        assert_eq!(request(" UHG ").display_id(), Some("UHG"));
        assert_eq!(request("  ").display_id(), None);
    }

    #[test]
    fn test_outbound_transfer_shape() {
        let activity = OutboundActivity::transfer("sip:100@pbx".to_string(), Utc::now());
        let json = serde_json::to_value(&activity).unwrap();
        assert_eq!(json["type"], "event");
        assert_eq!(json["name"], "transfer");
        assert_eq!(json["activityParams"]["transferTarget"], "sip:100@pbx");
        assert!(json.get("text").is_none());
    }
}
