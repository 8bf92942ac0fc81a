pub mod config;
pub mod conversation;
pub mod error;
pub mod markdown;
pub mod sentence;
pub mod validation;
pub mod ws;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use axum::{routing::get, Router};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};

use audio_core::{AudioSink, PlaybackQueue, RodioSink, SpeechSource};
use genai_core::GenAiClient;

use crate::config::ServerConfig;
use crate::conversation::ChatBackend;

#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
}

/// Build the application router: health endpoints plus the chat socket.
pub fn app(state: AppState) -> Router {
    // CORS configuration - environment-aware
    let cors = if let Some(ref allowed_origins) = state.config.cors_allowed_origins {
        let origins: Vec<axum::http::HeaderValue> = allowed_origins
            .iter()
            .filter_map(|origin: &String| origin.parse::<axum::http::HeaderValue>().ok())
            .collect();

        if origins.is_empty() {
            warn!("CORS_ALLOWED_ORIGINS is empty, falling back to permissive CORS");
            permissive_cors()
        } else {
            info!("CORS configured for {} origin(s)", origins.len());
            CorsLayer::new()
                .allow_origin(tower_http::cors::AllowOrigin::list(origins))
                .allow_methods([axum::http::Method::GET, axum::http::Method::OPTIONS])
                .allow_headers(tower_http::cors::Any)
                .allow_credentials(false)
        }
    } else {
        warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (development mode)");
        permissive_cors()
    };

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(state.config.request_timeout()))
        .layer(cors)
        .into_inner();

    Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(health_check))
        .route("/chat", get(ws::chat_ws))
        .layer(middleware_stack)
        .with_state(state)
}

fn permissive_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
        .allow_credentials(false)
}

pub async fn health_check() -> &'static str {
    "ok"
}

/// Bridges the provider client into the playback queue's speech seam.
struct SpeechProvider(Arc<GenAiClient>);

#[async_trait]
impl SpeechSource for SpeechProvider {
    async fn synthesize(&self, text: &str) -> Result<Option<String>> {
        self.0.synthesize_speech(text).await
    }
}

/// Wire up the provider client and playback queue for one conversation.
/// `None` while the credential is missing; the conversation then reports
/// the configuration error itself.
pub fn build_backend(config: &ServerConfig) -> Option<ChatBackend> {
    let genai = config.genai_config()?;
    let client = Arc::new(GenAiClient::new(genai));
    let queue = PlaybackQueue::new(
        Arc::new(SpeechProvider(Arc::clone(&client))),
        Box::new(|| {
            let sink = RodioSink::open()?;
            Ok(Arc::new(sink) as Arc<dyn AudioSink>)
        }),
        config.speech_sample_rate,
    );
    Some(ChatBackend {
        generator: client,
        queue,
    })
}
