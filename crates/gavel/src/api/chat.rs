use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};

use gavel_core::{ConversationMode, Message, PipelineError, TurnRequest};
use gavel_judge::Evaluation;

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub mode: ConversationMode,
    #[serde(default)]
    pub include_history: bool,
}

#[derive(Serialize)]
pub struct ChatResponse {
    pub conversation_id: String,
    pub response: String,
    pub evaluation: Evaluation,
    pub iteration: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<Message>>,
}

/// Run a turn to completion and return the final result in one response.
/// Internally this is the same state machine as the WebSocket surface,
/// without intermediate events.
pub async fn send_message(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, String)> {
    let mut request = TurnRequest::new(req.message).with_mode(req.mode);
    if let Some(conversation_id) = req.conversation_id {
        request = request.with_conversation(conversation_id);
    }

    let outcome = state
        .orchestrator
        .process_message(request, None)
        .await
        .map_err(error_response)?;

    let history = if req.include_history {
        Some(
            state
                .orchestrator
                .history(&outcome.conversation_id)
                .await
                .map_err(error_response)?,
        )
    } else {
        None
    };

    Ok(Json(ChatResponse {
        conversation_id: outcome.conversation_id,
        response: outcome.response,
        evaluation: outcome.evaluation,
        iteration: outcome.iteration,
        history,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RetryRequest {
    pub conversation_id: String,
    #[serde(default)]
    pub skip_input_critique: bool,
}

/// Re-run the last turn with the same user content.
pub async fn retry_turn(
    State(state): State<AppState>,
    Json(req): Json<RetryRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, String)> {
    let outcome = state
        .orchestrator
        .retry_last_turn(&req.conversation_id, req.skip_input_critique, None)
        .await
        .map_err(error_response)?;

    Ok(Json(ChatResponse {
        conversation_id: outcome.conversation_id,
        response: outcome.response,
        evaluation: outcome.evaluation,
        iteration: outcome.iteration,
        history: None,
    }))
}

pub async fn get_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Message>>, (StatusCode, String)> {
    let history = state
        .orchestrator
        .history(&id)
        .await
        .map_err(error_response)?;
    Ok(Json(history))
}

fn error_response(err: PipelineError) -> (StatusCode, String) {
    let status = match &err {
        PipelineError::UnknownConversation(_) => StatusCode::NOT_FOUND,
        PipelineError::NothingToRetry | PipelineError::Cancelled => StatusCode::CONFLICT,
        PipelineError::Evaluation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        PipelineError::Capability(_) => StatusCode::BAD_GATEWAY,
    };
    (status, err.to_string())
}
