use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::booking::BookingSlots;
use super::offer::Offer;

/// Content of the marker turn that flags a pending location question.
pub const LOCATION_MARKER: &str = "location";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    /// Internal bookkeeping; never sent to the language model.
    Marker,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Marker => "marker",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn location_marker() -> Self {
        Self {
            role: Role::Marker,
            content: LOCATION_MARKER.to_string(),
        }
    }

    pub fn is_location_marker(&self) -> bool {
        self.role == Role::Marker && self.content == LOCATION_MARKER
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogueState {
    New,
    AwaitingLocation,
    Normal,
    BookingInProgress,
    Terminal,
}

impl DialogueState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DialogueState::New => "new",
            DialogueState::AwaitingLocation => "awaiting_location",
            DialogueState::Normal => "normal",
            DialogueState::BookingInProgress => "booking_in_progress",
            DialogueState::Terminal => "terminal",
        }
    }
}

/// Everything the agent remembers about one phone call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub caller: Option<String>,
    pub history: Vec<ChatTurn>,
    pub property_name: Option<String>,
    pub city: Option<String>,
    pub location_attempts: u32,
    pub booking: BookingSlots,
    /// Offers from the last availability search, the held one first.
    pub offers: Vec<Offer>,
    pub language: String,
    pub voice_name: String,
    pub closed: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Session {
    pub fn new(
        id: &str,
        caller: Option<String>,
        language: &str,
        voice_name: &str,
        now: NaiveDateTime,
    ) -> Self {
        Self {
            id: id.to_string(),
            caller,
            history: Vec::new(),
            property_name: None,
            city: None,
            location_attempts: 0,
            booking: BookingSlots::default(),
            offers: Vec::new(),
            language: language.to_string(),
            voice_name: voice_name.to_string(),
            closed: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn state(&self) -> DialogueState {
        if self.history.is_empty() {
            DialogueState::New
        } else if self.awaiting_location() {
            DialogueState::AwaitingLocation
        } else if self.closed {
            DialogueState::Terminal
        } else if self.booking.has_any_slot() || !self.offers.is_empty() {
            DialogueState::BookingInProgress
        } else {
            DialogueState::Normal
        }
    }

    pub fn awaiting_location(&self) -> bool {
        self.history
            .last()
            .map(ChatTurn::is_location_marker)
            .unwrap_or(false)
    }

    /// Drop all booking progress, e.g. after a handover.
    pub fn reset_booking(&mut self) {
        self.booking.reset();
        self.offers.clear();
    }

    pub fn held_offer(&self) -> Option<&Offer> {
        self.offers.first()
    }

    pub fn user_turns(&self) -> usize {
        self.history.iter().filter(|t| t.role == Role::User).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new("conv-1", None, "de-DE", "voice", chrono::Utc::now().naive_utc())
    }

    #[test]
    fn test_state_transitions() {
        let mut s = session();
        assert_eq!(s.state(), DialogueState::New);

        s.history.push(ChatTurn::system("prompt"));
        s.history.push(ChatTurn::assistant("Hallo"));
        assert_eq!(s.state(), DialogueState::Normal);

        s.history.push(ChatTurn::user("Zimmer buchen"));
        s.history.push(ChatTurn::location_marker());
        assert_eq!(s.state(), DialogueState::AwaitingLocation);

        s.history.pop();
        s.booking.first_name = Some("Anna".to_string());
        assert_eq!(s.state(), DialogueState::BookingInProgress);

        s.reset_booking();
        s.closed = true;
        assert_eq!(s.state(), DialogueState::Terminal);
    }

    #[test]
    fn test_role_serialization() {
        let turn = ChatTurn::location_marker();
        let json = serde_json::to_string(&turn).unwrap();
        assert_eq!(json, r#"{"role":"marker","content":"location"}"#);
    }
}
