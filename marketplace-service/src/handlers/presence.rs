//! Presence and typing indicators over HTTP and Server-Sent Events.

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::Stream;
use marketplace_core::error::AppError;
use tokio_stream::StreamExt;
use validator::Validate;

use crate::{
    dtos::{TrackPresenceRequest, TypingRequest},
    middleware::AuthUser,
    presence::{PresenceMeta, PresenceSnapshot},
    AppState,
};

const MAX_CHANNEL_LEN: usize = 128;

fn validate_channel(channel: &str) -> Result<(), AppError> {
    let valid = !channel.is_empty()
        && channel.len() <= MAX_CHANNEL_LEN
        && channel
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ':' | '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(AppError::BadRequest(anyhow::anyhow!("Invalid channel name")))
    }
}

pub async fn get_snapshot(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(channel): Path<String>,
) -> Result<Json<PresenceSnapshot>, AppError> {
    validate_channel(&channel)?;
    Ok(Json(state.presence.snapshot(&channel)))
}

pub async fn track(
    State(state): State<AppState>,
    user: AuthUser,
    Path(channel): Path<String>,
    Json(payload): Json<TrackPresenceRequest>,
) -> Result<Json<PresenceSnapshot>, AppError> {
    validate_channel(&channel)?;
    payload.validate()?;

    let snapshot = state.presence.track(
        &channel,
        &user.user_id().to_string(),
        PresenceMeta {
            status: payload.status,
            metadata: payload.metadata,
        },
    );
    Ok(Json(snapshot))
}

pub async fn untrack(
    State(state): State<AppState>,
    user: AuthUser,
    Path(channel): Path<String>,
) -> Result<Json<PresenceSnapshot>, AppError> {
    validate_channel(&channel)?;
    Ok(Json(
        state.presence.untrack(&channel, &user.user_id().to_string()),
    ))
}

pub async fn set_typing(
    State(state): State<AppState>,
    user: AuthUser,
    Path(channel): Path<String>,
    Json(payload): Json<TypingRequest>,
) -> Result<Json<PresenceSnapshot>, AppError> {
    validate_channel(&channel)?;
    Ok(Json(state.presence.set_typing(
        &channel,
        &user.user_id().to_string(),
        payload.is_typing,
    )))
}

/// Server-Sent Events stream of channel snapshots, current state first.
pub async fn stream(
    State(state): State<AppState>,
    user: AuthUser,
    Path(channel): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    validate_channel(&channel)?;
    tracing::debug!(user_id = %user.user_id(), channel = %channel, "Presence stream opened");

    let events = state
        .presence
        .subscribe(&channel)
        .map(|snapshot| Event::default().event("presence").json_data(snapshot));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
