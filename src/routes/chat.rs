// ============================================================================
// Chat Routes
// ============================================================================
//
// Endpoints:
// - POST /api/chat - Answer the latest user message from indexed documents
//
// ============================================================================

use axum::{extract::State, http::HeaderMap, response::Response, Json};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::collaborators::{normalize_index_name, ChatMessage, MessageRole, DEFAULT_INDEX_NAME};
use crate::context::AppContext;
use crate::error::{AppError, AppResult};
use crate::routes::extractors::{AuthenticatedUser, ClientIp};
use crate::routes::Throttle;
use crate::users::Role;

const CHAT_POST: Throttle = Throttle::new("chat-post", 60);

pub const MAX_MESSAGES: usize = 40;
pub const MAX_MESSAGE_CHARS: usize = 12_000;
const SEARCH_TOP_K: usize = 5;

const NO_DOCUMENTS_ANSWER: &str =
    "I could not find any related documents. Upload documents first or rephrase the question.";

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub index_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserInfo {
    pub email: String,
    pub name: String,
    pub role: Role,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
    /// File names the answer was grounded on
    pub sources: Vec<String>,
    pub user_info: UserInfo,
}

/// POST /api/chat
pub async fn chat(
    State(app_context): State<Arc<AppContext>>,
    user: AuthenticatedUser,
    ClientIp(client_ip): ClientIp,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> AppResult<Response> {
    CHAT_POST.enforce(&app_context, &user, &client_ip)?;
    let csrf = app_context.csrf.rotate_from_headers(&headers, &user.email)?;

    Ok(csrf.respond(answer(&app_context, &user, request).await))
}

fn validate_messages(messages: &[ChatMessage]) -> AppResult<&str> {
    if messages.is_empty() {
        return Err(AppError::validation("messages must not be empty"));
    }
    if messages.len() > MAX_MESSAGES {
        return Err(AppError::validation(format!(
            "at most {} messages are allowed",
            MAX_MESSAGES
        )));
    }
    for message in messages {
        if message.content.trim().is_empty() {
            return Err(AppError::validation("message content must not be empty"));
        }
        if message.content.chars().count() > MAX_MESSAGE_CHARS {
            return Err(AppError::validation(format!(
                "message content is limited to {} characters",
                MAX_MESSAGE_CHARS
            )));
        }
    }
    match messages.last() {
        Some(last) if last.role == MessageRole::User => Ok(last.content.trim()),
        _ => Err(AppError::validation("the last message must come from the user")),
    }
}

async fn answer(
    app_context: &AppContext,
    user: &AuthenticatedUser,
    request: ChatRequest,
) -> AppResult<Json<ChatResponse>> {
    let question = validate_messages(&request.messages)?;
    let index_name = normalize_index_name(request.index_name.as_deref())?
        .unwrap_or_else(|| DEFAULT_INDEX_NAME.to_string());

    let collaborators = &app_context.collaborators;
    let hits = collaborators
        .index
        .search(&index_name, question, SEARCH_TOP_K)
        .await
        .map_err(|e| AppError::Unknown(e.context("Document search failed")))?;

    let user_info = UserInfo {
        email: user.email.clone(),
        name: user.name.clone(),
        role: user.role,
    };

    if hits.is_empty() {
        return Ok(Json(ChatResponse {
            answer: NO_DOCUMENTS_ANSWER.to_string(),
            sources: Vec::new(),
            user_info,
        }));
    }

    let context = hits
        .iter()
        .map(|hit| format!("[{}]\n{}", hit.file_name, hit.content))
        .collect::<Vec<_>>()
        .join("\n\n");
    let sources: Vec<String> = hits
        .iter()
        .map(|hit| hit.file_name.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let answer = collaborators
        .completion
        .complete(&request.messages, &context)
        .await
        .map_err(|e| AppError::Unknown(e.context("Completion failed")))?;

    tracing::info!(
        user_hash = %app_context.log_id(&user.email),
        index = %index_name,
        sources = sources.len(),
        "Chat answered"
    );

    Ok(Json(ChatResponse {
        answer,
        sources,
        user_info,
    }))
}
