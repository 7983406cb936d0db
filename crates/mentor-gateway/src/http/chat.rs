//! Streamed chat turns — POST /chat/stream
//!
//! Body: `{user_id, chat_id, messages: [{role, content}]}`; the final
//! message must be from the user. The response is `text/event-stream`:
//! one `data: {json}` frame per wire event, `: keepalive` comments
//! interleaved. Client disconnect cancels the turn at its next suspension
//! point.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use mentor_agent::{AgentEvent, TurnRequest};
use mentor_core::types::ChatMessage;
use mentor_core::MentorError;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::app::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
pub struct ChatStreamRequest {
    pub user_id: String,
    pub chat_id: String,
    pub messages: Vec<ChatMessage>,
}

pub async fn chat_stream_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatStreamRequest>,
) -> Result<Sse<impl futures_util::Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let is_user_last = req
        .messages
        .iter()
        .rev()
        .find(|m| m.role != "system")
        .is_some_and(|m| m.role == "user");
    if !is_user_last {
        return Err(ApiError(MentorError::InvalidInput(
            "the final message must be from the user".to_string(),
        )));
    }

    info!(user_id = %req.user_id, chat_id = %req.chat_id, "chat stream opened");

    let turn = TurnRequest {
        user_id: req.user_id,
        chat_id: req.chat_id,
        messages: req.messages,
    };

    let (tx, mut rx) = mpsc::channel::<AgentEvent>(64);
    let cancel = CancellationToken::new();
    let runner = state.runner.clone();
    let turn_cancel = cancel.clone();
    tokio::spawn(async move {
        runner.run_turn(turn, tx, turn_cancel).await;
    });

    let stream = async_stream::stream! {
        // Dropping the response stream (client disconnect) cancels the turn.
        let _guard = cancel.drop_guard();
        while let Some(event) = rx.recv().await {
            let json = serde_json::to_string(&event).unwrap_or_default();
            yield Ok(Event::default().data(json));
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    ))
}
