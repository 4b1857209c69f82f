//! Per-turn dialogue orchestration for a phone call.

use std::sync::Arc;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{
    correct_stay_dates, select_offer, BookingReply, ChatTurn, FaqReply, Role, Session, SlotError,
    StructuredIntent,
};
use crate::services::ai::intent::classify_turn;
use crate::services::alerts::{self, OpsAlert};
use crate::services::booking::{self, BookingJob};
use crate::services::location::{similarity, LocationOutcome};
use crate::services::messaging::to_international;
use crate::services::pms::OfferQuery;
use crate::services::prompt::{self, PromptInput};
use crate::state::AppState;

/// Failed location rounds before the call goes to a human.
pub const MAX_LOCATION_ATTEMPTS: u32 = 2;

const KEYWORD_SCORE: f64 = 90.0;

const KEYWORDS_DE: &[&str] = &[
    "telefonzentrale",
    "notfall",
    "feuer",
    "polizei",
    "arzt",
    "todesfall",
    "ordnungsamt",
    "schlägerei",
    "krankenwagen",
];

const KEYWORDS_EN: &[&str] = &[
    "switchboard",
    "emergency",
    "fire",
    "police",
    "ambulance",
    "death",
    "public order office",
    "fight",
];

static FAREWELL_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s*\b(verabschiedung|goodbye)\b[.!]?").unwrap());

static SWITCHBOARD_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)telefonzentrale|switchboard").unwrap());

/// Request-scoped facts about the call that are not part of the session.
#[derive(Debug, Clone)]
pub struct TurnContext {
    pub caller: Option<String>,
    pub today: NaiveDate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub response: String,
    pub hangup: bool,
    /// SIP URI the call should be transferred to.
    pub transfer: Option<String>,
}

impl TurnOutcome {
    pub fn reply(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            hangup: false,
            transfer: None,
        }
    }

    pub fn hangup(response: impl Into<String>) -> Self {
        Self {
            hangup: true,
            ..Self::reply(response)
        }
    }

    pub fn transfer(response: impl Into<String>, target: String) -> Self {
        Self {
            transfer: Some(target),
            ..Self::reply(response)
        }
    }
}

/// Switchboard text plus a transfer to the default extension.
pub fn handover(state: &AppState, language: &str) -> TurnOutcome {
    TurnOutcome::transfer(
        state.texts.get("service_hotline_open", language),
        state.config.sip_target(&state.config.transfer_extension),
    )
}

/// Seed a fresh session with the system prompt and greeting; returns the greeting.
pub fn open_session(state: &AppState, ctx: &TurnContext, session: &mut Session) -> String {
    prepare_session(ctx, session);
    refresh_prompt(state, ctx, session, &[])
        .unwrap_or_else(|| state.texts.get("welcome_message", &session.language))
}

fn prepare_session(ctx: &TurnContext, session: &mut Session) {
    if session.booking.guest_phone_number.is_none() {
        session.booking.guest_phone_number = ctx
            .caller
            .as_deref()
            .map(to_international)
            .filter(|n| !n.is_empty());
    }
    session.booking.property_name = session.property_name.clone();
}

/// Rewrite history[0] as the current system prompt. On an empty history the
/// greeting is appended too and returned.
fn refresh_prompt(
    state: &AppState,
    ctx: &TurnContext,
    session: &mut Session,
    context: &[&str],
) -> Option<String> {
    let system = prompt::system_prompt(&PromptInput {
        brand: &state.hotel.brand,
        context,
        language: &session.language,
        held_offer: session.held_offer(),
        guest_phone_number: session.booking.guest_phone_number.as_deref(),
        today: ctx.today,
    });

    if session.history.is_empty() {
        let welcome = state.texts.get("welcome_message", &session.language);
        session.history.push(ChatTurn::system(system));
        session.history.push(ChatTurn::assistant(welcome.clone()));
        return Some(welcome);
    }

    session.history[0] = ChatTurn::system(system);
    None
}

/// Run one caller utterance through location handling, retrieval, the
/// language model and the intent dispatch.
pub async fn process_turn(
    state: &Arc<AppState>,
    ctx: &TurnContext,
    session: &mut Session,
    utterance: &str,
) -> anyhow::Result<TurnOutcome> {
    if session.closed {
        tracing::info!(session = %session.id, "reopening closed session");
        session.closed = false;
    }
    prepare_session(ctx, session);

    let mut query = utterance.to_string();
    if session.awaiting_location() {
        match resolve_location(state, session, utterance).await {
            LocationStep::Answer(outcome) => return Ok(finish(session, outcome)),
            LocationStep::Resolved { original_query } => query = original_query,
        }
    }

    let language = session.language.clone();
    let retrieval = state
        .retriever
        .retrieve(&query, session.property_name.as_deref(), &language)
        .await;
    refresh_prompt(state, ctx, session, &retrieval.context_texts());

    if retrieval.needs_disambiguation && session.property_name.is_none() {
        tracing::info!(session = %session.id, "asking which property the caller means");
        session.history.push(ChatTurn::user(query));
        session.history.push(ChatTurn::location_marker());
        return Ok(TurnOutcome::reply(
            state.texts.get("which_property_name", &language),
        ));
    }

    session.history.push(ChatTurn::user(query.clone()));

    if state.config.keyword_redirect && keyword_hit(&query, &language) {
        tracing::info!(session = %session.id, "keyword redirect to switchboard");
        return Ok(finish(session, handover(state, &language)));
    }

    let intent = match classify_turn(
        state.llm.as_ref(),
        &session.history,
        state.config.llm_max_tokens,
    )
    .await
    {
        Ok(intent) => intent,
        Err(e) => {
            tracing::error!(target: "incident", session = %session.id, error = %e, "intent classification failed");
            return Ok(finish(session, handover(state, &language)));
        }
    };

    tracing::info!(
        session = %session.id,
        mode = intent.mode(),
        state = session.state().as_str(),
        property = ?session.property_name,
        "processing turn"
    );

    let outcome = match intent {
        StructuredIntent::Faq(reply) => faq(state, session, reply),
        StructuredIntent::Booking(reply) => booking_turn(state, ctx, session, reply).await,
        StructuredIntent::Farewell(reply) => TurnOutcome::hangup(reply.response),
        StructuredIntent::EmployeeHandover(reply) => {
            tracing::info!(
                session = %session.id,
                emergency = ?reply.emergency_topic,
                "caller handed over to staff"
            );
            handover(state, &language)
        }
    };

    Ok(finish(session, apply_overrides(state, &language, outcome)))
}

enum LocationStep {
    Answer(TurnOutcome),
    Resolved { original_query: String },
}

async fn resolve_location(state: &AppState, session: &mut Session, utterance: &str) -> LocationStep {
    let language = session.language.clone();

    if session.location_attempts >= MAX_LOCATION_ATTEMPTS {
        return LocationStep::Answer(location_exhausted(state, session));
    }

    let outcome = state
        .locations
        .resolve(state.llm.as_ref(), utterance, &language)
        .await
        .unwrap_or_else(|e| {
            tracing::error!(session = %session.id, error = %e, "location resolution failed");
            LocationOutcome::Unconfirmed { message: None }
        });

    let retry_text = match outcome {
        LocationOutcome::Confirmed(name) => {
            tracing::info!(session = %session.id, property = %name, "property confirmed");
            // Drop the marker and the question it was raised for; that
            // question is answered now that the property is known.
            session.history.pop();
            let pending_is_user = session
                .history
                .last()
                .map(|t| t.role == Role::User)
                .unwrap_or(false);
            let original_query = if pending_is_user {
                session.history.pop().map(|t| t.content).unwrap_or_default()
            } else {
                utterance.to_string()
            };
            session.property_name = Some(name.clone());
            session.booking.property_name = Some(name);
            session.location_attempts = 0;
            return LocationStep::Resolved { original_query };
        }
        LocationOutcome::CityOnly { city, message } => {
            session.city = Some(city);
            session.location_attempts += 1;
            return LocationStep::Answer(TurnOutcome::reply(
                message.unwrap_or_else(|| state.texts.get("which_property_name", &language)),
            ));
        }
        LocationOutcome::UnknownProperty => state.texts.get("no_property_found", &language),
        LocationOutcome::Unconfirmed { message } => {
            message.unwrap_or_else(|| state.texts.get("which_property_name", &language))
        }
    };

    session.location_attempts += 1;
    if session.location_attempts >= MAX_LOCATION_ATTEMPTS {
        return LocationStep::Answer(location_exhausted(state, session));
    }
    LocationStep::Answer(TurnOutcome::reply(retry_text))
}

fn location_exhausted(state: &AppState, session: &mut Session) -> TurnOutcome {
    tracing::info!(
        session = %session.id,
        attempts = session.location_attempts,
        "property still unknown, handing over"
    );
    if session.awaiting_location() {
        session.history.pop();
    }
    session.reset_booking();
    handover(state, &session.language)
}

fn faq(state: &AppState, session: &Session, reply: FaqReply) -> TurnOutcome {
    if reply.booking && session.property_name.is_none() {
        return handover(state, &session.language);
    }

    let canned = reply.response.trim().trim_end_matches('.');
    let mut response = reply.response.clone();
    if !reply.booking
        && !FAREWELL_MARKER.is_match(&reply.response)
        && !canned.eq_ignore_ascii_case("telefonzentrale")
        && !canned.eq_ignore_ascii_case("switchboard")
    {
        if let Some(follow_up) = reply.follow_up.filter(|f| !f.trim().is_empty()) {
            response.push(' ');
            response.push_str(&follow_up);
        }
    }
    TurnOutcome::reply(response)
}

async fn booking_turn(
    state: &Arc<AppState>,
    ctx: &TurnContext,
    session: &mut Session,
    reply: BookingReply,
) -> TurnOutcome {
    let language = session.language.clone();
    session.booking.merge(&reply);

    if session.property_name.is_none() {
        return handover(state, &language);
    }

    match session.booking.booking_confirmed {
        Some(false) => {
            session.reset_booking();
            return TurnOutcome::reply(state.texts.get("booking_not_confirmed", &language));
        }
        Some(true) if session.held_offer().is_some() => {
            let outcome = match BookingJob::prepare(session) {
                Ok(job) => {
                    tracing::info!(session = %session.id, "booking confirmed, starting workflow");
                    booking::spawn(state.clone(), job);
                    TurnOutcome::reply(state.texts.get("booking_confirmation", &language))
                }
                Err(e) => {
                    alerts::raise(
                        state.notifier.as_ref(),
                        OpsAlert::error("Phone booking could not be started", e.to_string())
                            .detail("Session", &session.id),
                    )
                    .await;
                    TurnOutcome::reply(state.texts.get("booking_error", &language))
                }
            };
            session.reset_booking();
            return outcome;
        }
        Some(true) => {
            let text = no_offers_text(state, session, &language);
            session.reset_booking();
            return TurnOutcome::reply(text);
        }
        None => {}
    }

    let slots = match session.booking.validate() {
        Ok(slots) => slots,
        Err(errors) => return missing_data(state, &language, reply.response, &errors),
    };

    let (arrival, departure) = correct_stay_dates(slots.arrival, slots.departure, ctx.today);
    session.booking.arrival_date = Some(arrival.format("%Y-%m-%d").to_string());
    session.booking.departure_date = Some(departure.format("%Y-%m-%d").to_string());

    let property_name = session.property_name.clone().unwrap_or_default();
    let property_id = state
        .hotel
        .property(&property_name)
        .map(|p| p.pms_id.clone())
        .unwrap_or_else(|| property_name.clone());
    let query = OfferQuery {
        property_id,
        arrival,
        departure,
        adults: slots.adults,
        language: language.clone(),
    };

    let offers = match state.booking_api.search_offers(&query).await {
        Ok(offers) => offers,
        Err(e) => {
            tracing::error!(target: "incident", session = %session.id, error = %e, "offer search failed");
            session.booking.error = Some(e.to_string());
            session.offers.clear();
            return TurnOutcome::reply(state.texts.get("booking_error", &language));
        }
    };

    let dates = [
        ("arrival", session.booking.arrival_date.clone().unwrap_or_default()),
        ("departure", session.booking.departure_date.clone().unwrap_or_default()),
    ];
    let vars: Vec<(&str, &str)> = dates.iter().map(|(k, v)| (*k, v.as_str())).collect();

    let selected = select_offer(&offers, slots.adults)
        .and_then(|offer| offers.iter().position(|o| std::ptr::eq(o, offer)));

    match selected {
        Some(index) => {
            let offer = &offers[index];
            tracing::info!(
                session = %session.id,
                offers = offers.len(),
                unit_group = %offer.unit_group.name,
                "offer selected"
            );
            let text = format!(
                "{} {}{}",
                state.texts.get_with("available_offers", &language, &vars),
                offer.spoken_summary(&language),
                state.texts.get("offer_selection", &language)
            );
            let mut offers = offers;
            offers[..=index].rotate_right(1);
            session.offers = offers;
            TurnOutcome::reply(text)
        }
        None => {
            tracing::info!(session = %session.id, offers = offers.len(), "no matching offer");
            let text = state.texts.get_with("no_available_offers", &language, &vars);
            session.reset_booking();
            TurnOutcome::reply(text)
        }
    }
}

fn no_offers_text(state: &AppState, session: &Session, language: &str) -> String {
    let arrival = session.booking.arrival_date.clone().unwrap_or_default();
    let departure = session.booking.departure_date.clone().unwrap_or_default();
    state.texts.get_with(
        "no_available_offers",
        language,
        &[("arrival", &arrival), ("departure", &departure)],
    )
}

/// The model's own question when it asked one, otherwise the canned list.
fn missing_data(
    state: &AppState,
    language: &str,
    model_question: Option<String>,
    errors: &[SlotError],
) -> TurnOutcome {
    if let Some(question) = model_question.filter(|q| !q.trim().is_empty()) {
        return TurnOutcome::reply(question);
    }
    let fields = errors
        .iter()
        .map(SlotError::field)
        .collect::<Vec<_>>()
        .join(", ");
    TurnOutcome::reply(
        state
            .texts
            .get_with("missing_booking_data", language, &[("fields", &fields)]),
    )
}

/// Markers in the model's text win over the reported mode.
fn apply_overrides(state: &AppState, language: &str, mut outcome: TurnOutcome) -> TurnOutcome {
    if FAREWELL_MARKER.is_match(&outcome.response) {
        outcome.response = FAREWELL_MARKER
            .replace_all(&outcome.response, "")
            .trim()
            .to_string();
        outcome.hangup = true;
    }
    if outcome.transfer.is_none() && SWITCHBOARD_MARKER.is_match(&outcome.response) {
        return handover(state, language);
    }
    if outcome.transfer.is_some() {
        outcome.hangup = false;
    }
    outcome
}

fn keyword_hit(query: &str, language: &str) -> bool {
    let keywords = if language == "en-US" { KEYWORDS_EN } else { KEYWORDS_DE };
    let query = query.to_lowercase();
    keywords
        .iter()
        .any(|keyword| similarity(&query, keyword) > KEYWORD_SCORE)
}

fn finish(session: &mut Session, outcome: TurnOutcome) -> TurnOutcome {
    if !session.awaiting_location() {
        session.history.push(ChatTurn::assistant(outcome.response.clone()));
    }
    if outcome.hangup || outcome.transfer.is_some() {
        session.closed = true;
    }
    outcome
}
