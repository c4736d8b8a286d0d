use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;

use crate::error::GatewayError;
use crate::server::AppState;

pub mod auth;
mod chat;
mod diagnostics;
mod embeddings;
mod files;
mod inbound;
mod info;
mod responses;
mod simple;
mod transcriptions;

async fn not_found() -> GatewayError {
    GatewayError::NotFound
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        // Probes
        .route("/", get(info::greeting))
        .route("/health", get(info::health))
        .route("/health2", get(info::health_model))
        // Diagnostics
        .route("/log", get(diagnostics::info_log))
        .route("/log/errors", get(diagnostics::error_log))
        // Chat
        .route("/chat", post(chat::chat_completions))
        .route("/chat/simple", post(simple::simple_prompt))
        // Responses
        .route("/responses", post(responses::create_response))
        .route("/openai", post(responses::create_response))
        .route(
            "/responses/{id}",
            get(responses::retrieve_response).delete(responses::delete_response),
        )
        .route("/responses/{id}/cancel", post(responses::cancel_response))
        .route(
            "/responses/{id}/input_items",
            get(responses::list_input_items),
        )
        // Files & audio
        .route("/files", post(files::upload_files))
        .route("/transcriptions", post(transcriptions::transcribe))
        .route("/embeddings", post(embeddings::create_embedding))
        .fallback(not_found)
        .method_not_allowed_fallback(not_found)
}
