//! Bot endpoints called by the telephony platform during a call.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Datelike, Duration, Local, Utc};
use serde_json::json;

use crate::db::queries;
use crate::errors::AppError;
use crate::models::telephony::{
    ActivitiesRequest, ActivitiesResponse, OutboundActivity, StartRequest, StartResponse,
};
use crate::models::Session;
use crate::services::conversation::{self, TurnContext, TurnOutcome};
use crate::services::prompt;
use crate::services::speech::{prosody, SpeechFormatter};
use crate::state::AppState;

const SUPPORTED_LANGUAGES: &[&str] = &["de-DE", "en-US"];

fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<(), AppError> {
    if expected_token.is_empty() {
        return Ok(());
    }

    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or("");
    if token != expected_token {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

// POST /
pub async fn start_conversation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<StartRequest>,
) -> Result<Json<StartResponse>, AppError> {
    check_auth(&headers, &state.config.webhook_token)?;

    tracing::info!(conversation = %req.conversation, "conversation started");
    Ok(Json(StartResponse {
        activities_url: format!("/conversation/activities/{}", req.conversation),
        refresh_url: format!("/conversation/refresh/{}", req.conversation),
        disconnect_url: format!("/conversation/disconnect/{}", req.conversation),
        expires_seconds: state.config.session_expiry_seconds,
    }))
}

// POST /conversation/refresh/:id
pub async fn refresh_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.webhook_token)?;
    tracing::debug!(conversation = %id, "conversation refreshed");
    Ok(Json(json!({ "expiresSeconds": state.config.refresh_expiry_seconds })))
}

// POST /conversation/disconnect/:id
pub async fn disconnect_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.webhook_token)?;
    tracing::info!(conversation = %id, "conversation disconnected");
    Ok(Json(json!({})))
}

// POST /conversation/activities/:id
pub async fn conversation_activities(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<ActivitiesRequest>,
) -> Result<Json<ActivitiesResponse>, AppError> {
    check_auth(&headers, &state.config.webhook_token)?;

    let started = Instant::now();
    let now = Utc::now();
    let ctx = TurnContext {
        caller: req.caller().map(str::to_string),
        today: Local::now().date_naive(),
    };

    let activities = {
        let _guard = state.session_locks.acquire(&id).await;
        match handle_activities(&state, &id, &ctx, &req, now).await {
            Ok(activities) => activities,
            Err(e) => {
                tracing::error!(target: "incident", conversation = %id, error = %e, "turn failed, transferring caller");
                let language = state.config.default_language.clone();
                let outcome = conversation::handover(&state, &language);
                render(&state, &ctx, &language, &state.config.default_voice, &outcome, now)
            }
        }
    };

    let elapsed = started.elapsed().as_secs_f64();
    if elapsed > state.config.response_warning_seconds {
        tracing::warn!(
            target: "incident",
            conversation = %id,
            elapsed_seconds = elapsed,
            threshold = state.config.response_warning_seconds,
            "slow phone response"
        );
    }

    Ok(Json(ActivitiesResponse { activities }))
}

async fn handle_activities(
    state: &Arc<AppState>,
    id: &str,
    ctx: &TurnContext,
    req: &ActivitiesRequest,
    now: DateTime<Utc>,
) -> anyhow::Result<Vec<OutboundActivity>> {
    let existing = {
        let db = state.db()?;
        queries::get_session(&db, id)?
    };

    let mut session = match existing {
        Some(session) => session,
        None => return start_session(state, id, ctx, req, now),
    };

    let Some(utterance) = req.utterance() else {
        tracing::debug!(conversation = %id, "activity without text");
        return Ok(Vec::new());
    };

    if session.user_turns() == 0 && utterance.split_whitespace().count() > 1 {
        if let Some(language) = req
            .recognized_language()
            .filter(|l| SUPPORTED_LANGUAGES.contains(l))
        {
            session.language = language.to_string();
            session.voice_name = voice_for(state, language);
        }
    }

    tracing::info!(conversation = %id, language = %session.language, "caller turn");
    let outcome = conversation::process_turn(state, ctx, &mut session, utterance).await?;

    session.updated_at = now.naive_utc();
    {
        let db = state.db()?;
        queries::update_session(&db, &session)?;
    }

    Ok(render(
        state,
        ctx,
        &session.language,
        &session.voice_name,
        &outcome,
        now,
    ))
}

/// First event of a call: screen the caller, store the session and greet.
fn start_session(
    state: &AppState,
    id: &str,
    ctx: &TurnContext,
    req: &ActivitiesRequest,
    now: DateTime<Utc>,
) -> anyhow::Result<Vec<OutboundActivity>> {
    let config = &state.config;

    if let Some(caller) = ctx.caller.as_deref() {
        if config.caller_whitelist.iter().any(|c| c == caller) {
            tracing::info!(conversation = %id, "whitelisted caller, transferring");
            return Ok(vec![OutboundActivity::transfer(
                config.transfer_target.clone(),
                now,
            )]);
        }

        let since = now.naive_utc() - Duration::minutes(config.repeat_caller_window_minutes);
        let recent = {
            let db = state.db()?;
            queries::count_recent_calls(&db, caller, since)?
        };
        if recent >= i64::from(config.repeat_caller_max_calls) {
            tracing::warn!(conversation = %id, recent, "repeat caller, transferring");
            return Ok(vec![
                OutboundActivity::message(
                    config.repeat_caller_message.clone(),
                    &config.default_language,
                    &config.default_voice,
                    now,
                ),
                OutboundActivity::transfer(config.transfer_target.clone(), now),
            ]);
        }
    }

    let mut session = Session::new(
        id,
        ctx.caller.clone(),
        &config.default_language,
        &config.default_voice,
        now.naive_utc(),
    );
    session.property_name = req
        .display_id()
        .and_then(|display_id| state.hotel.property_by_caller_id(display_id))
        .map(|p| p.name.clone());

    let greeting = conversation::open_session(state, ctx, &mut session);
    {
        let db = state.db()?;
        queries::insert_session(&db, &session)?;
    }
    tracing::info!(
        conversation = %id,
        property = ?session.property_name,
        "new conversation"
    );

    Ok(render(
        state,
        ctx,
        &session.language,
        &session.voice_name,
        &TurnOutcome::reply(prompt::welcome(&greeting)),
        now,
    ))
}

fn voice_for(state: &AppState, language: &str) -> String {
    if language == "en-US" {
        state.config.english_voice.clone()
    } else {
        state.config.default_voice.clone()
    }
}

fn render(
    state: &AppState,
    ctx: &TurnContext,
    language: &str,
    voice_name: &str,
    outcome: &TurnOutcome,
    now: DateTime<Utc>,
) -> Vec<OutboundActivity> {
    let ssml = SpeechFormatter::new(ctx.today.year()).format(&outcome.response, language);
    let mut activities = vec![OutboundActivity::message(
        prosody(&ssml, &state.config.speech_rate),
        language,
        voice_name,
        now,
    )];
    if let Some(target) = &outcome.transfer {
        activities.push(OutboundActivity::transfer(target.clone(), now));
    } else if outcome.hangup {
        activities.push(OutboundActivity::hangup(now));
    }
    activities
}
