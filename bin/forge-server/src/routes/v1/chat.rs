//! OpenAI-compatible chat completions (`POST /v1/chat/completions`).
//!
//! A pure translation layer over [`forge_server::InferenceServer::process_chat_completion`]
//! — same division of labor as `slab-server::routes::v1::chat`: deserialize,
//! call the core, serialize. `stream: true` wires the task's `onChunk`
//! callback into an `mpsc` channel drained as Server-Sent-Events, mirroring
//! `slab-core::api::CallBuilder::stream`'s unfold-over-a-channel shape.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use forge_types::{
    ChatCompletionArgs, ChatMessage, CompletionOptions, Role, StreamChunk,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use utoipa::{OpenApi, ToSchema};

use crate::error::HttpError;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(chat_completions))]
pub struct ChatApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/chat/completions", post(chat_completions))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChatMessageDto {
    pub role: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessageDto>,
    #[serde(default)]
    pub stream: bool,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ChatCompletionResponseDto {
    pub model: String,
    pub message: ChatMessageDto,
    pub finish_reason: String,
}

#[utoipa::path(
    post,
    path = "/v1/chat/completions",
    tag = "chat",
    request_body = ChatCompletionRequest,
    responses(
        (status = 200, description = "Completion generated", body = ChatCompletionResponseDto),
        (status = 400, description = "Bad request"),
    )
)]
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatCompletionRequest>,
) -> Result<Response, HttpError> {
    let model = forge_types::ModelId::new(req.model.clone()).map_err(HttpError::from)?;
    let messages: Vec<ChatMessage> = req.messages.into_iter().map(dto_to_message).collect();
    let timeout = req.timeout_ms.map(Duration::from_millis);

    if req.stream {
        let (tx, rx) = mpsc::channel::<StreamChunk>(32);
        let on_chunk: forge_types::ChunkCallback = Arc::new(move |chunk| {
            let _ = tx.try_send(chunk);
        });
        let args = ChatCompletionArgs {
            model,
            messages,
            options: CompletionOptions { timeout, signal: None, on_chunk: Some(on_chunk) },
        };
        let server = state.server.clone();
        tokio::spawn(async move {
            if let Err(err) = server.process_chat_completion(args).await {
                tracing::warn!(%err, "streamed chat completion failed");
            }
        });
        let sse_stream = chunk_stream(rx);
        return Ok(Sse::new(sse_stream).into_response());
    }

    let args = ChatCompletionArgs {
        model,
        messages,
        options: CompletionOptions { timeout, signal: None, on_chunk: None },
    };
    let result = state.server.process_chat_completion(args).await?;
    Ok(Json(ChatCompletionResponseDto {
        model: req.model,
        message: ChatMessageDto { role: role_to_str(result.message.role).into(), content: result.message.content },
        finish_reason: format!("{:?}", result.finish_reason),
    })
    .into_response())
}

fn chunk_stream(rx: mpsc::Receiver<StreamChunk>) -> impl Stream<Item = Result<Event, Infallible>> {
    ReceiverStream::new(rx).map(|chunk| {
        let data = match chunk {
            StreamChunk::Completion { text, .. } => serde_json::json!({ "delta": text }).to_string(),
            StreamChunk::Speech { text } => serde_json::json!({ "delta": text }).to_string(),
        };
        Ok(Event::default().data(data))
    })
}

fn dto_to_message(dto: ChatMessageDto) -> ChatMessage {
    ChatMessage {
        role: match dto.role.as_str() {
            "system" => Role::System,
            "assistant" => Role::Assistant,
            "tool" => Role::Tool,
            _ => Role::User,
        },
        content: dto.content,
    }
}

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dto_round_trips_user_role() {
        let msg = dto_to_message(ChatMessageDto { role: "user".into(), content: "hi".into() });
        assert_eq!(role_to_str(msg.role), "user");
    }

    #[test]
    fn unknown_role_defaults_to_user() {
        let msg = dto_to_message(ChatMessageDto { role: "bogus".into(), content: "hi".into() });
        assert!(matches!(msg.role, Role::User));
    }
}
