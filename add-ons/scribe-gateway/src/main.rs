//! Axum-based upload gateway: one route that accepts an audio file, runs the
//! segment → dispatch → assemble pipeline, and returns the transcript.
//!
//! Credentials stay in the backend: the Speech API key and the staging token
//! are read from the environment at startup and never reach clients.

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use scribe_core::{
    assemble, create_best_recognizer, segment, AudioEncoding, Dispatcher, GcsStore,
    RecognizeRequest, Recognizer, ScribeConfig, ScribeResult, SegmentPolicy,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Multipart audio uploads can be several MB; raise the default extractor cap.
const AUDIO_UPLOAD_LIMIT_BYTES: usize = 64 * 1024 * 1024;

#[derive(Clone)]
struct AppState {
    config: Arc<ScribeConfig>,
    dispatcher: Arc<Dispatcher>,
}

fn error_body(message: &str) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "error": message }))
}

async fn healthz(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "app_name": state.config.app_name,
    }))
}

/// `POST /upload-audio`: single multipart file field. 200 with
/// `{ "textContent": ... }` on success, 400 when no file is attached, 500 on
/// any pipeline failure.
async fn upload_audio(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let mut upload: Option<(String, Vec<u8>)> = None;
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                // Only file parts count; the original client sends exactly one.
                let Some(filename) = field.file_name().map(str::to_string) else {
                    continue;
                };
                match field.bytes().await {
                    Ok(bytes) => {
                        upload = Some((filename, bytes.to_vec()));
                        break;
                    }
                    Err(e) => {
                        warn!("upload field read failed: {}", e);
                        break;
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("malformed multipart body: {}", e);
                break;
            }
        }
    }

    let Some((filename, buffer)) = upload else {
        return (StatusCode::BAD_REQUEST, error_body("No file uploaded")).into_response();
    };

    info!("upload received: {} ({} bytes)", filename, buffer.len());
    match process_upload(&state, &filename, &buffer).await {
        Ok(transcript) => {
            info!("transcript ready ({} chars)", transcript.len());
            (
                StatusCode::OK,
                Json(serde_json::json!({ "textContent": transcript })),
            )
                .into_response()
        }
        Err(e) => {
            error!("Error processing audio: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_body("Failed to process audio"),
            )
                .into_response()
        }
    }
}

/// Segment → dispatch → assemble for one uploaded buffer. The buffer is
/// dropped when this returns; staged artifacts are cleaned up inside
/// `dispatch`.
async fn process_upload(state: &AppState, filename: &str, buffer: &[u8]) -> ScribeResult<String> {
    let policy = SegmentPolicy::new(state.config.chunk_size_bytes, state.config.overlap_bytes);
    let chunks = segment(buffer, policy)?;
    let chunk_count = chunks.len();
    info!(
        "segmented into {} chunks (size {}, overlap {})",
        chunk_count, policy.chunk_size, policy.overlap
    );

    let request = RecognizeRequest {
        encoding: AudioEncoding::from_filename(filename),
        sample_rate_hertz: state.config.sample_rate_hertz,
        language_code: state.config.language_code.clone(),
        punctuation: state.config.punctuation,
    };
    let results = state.dispatcher.dispatch(chunks, &request).await;
    assemble(&results, chunk_count)
}

fn build_app(state: AppState) -> Router {
    // The original frontend is a browser app on another origin.
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any);

    Router::new()
        .route(
            "/upload-audio",
            post(upload_audio).layer(DefaultBodyLimit::max(AUDIO_UPLOAD_LIMIT_BYTES)),
        )
        .route("/healthz", get(healthz))
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() {
    // Load .env first so credentials are in place before any client is built.
    if let Err(e) = dotenvy::dotenv() {
        eprintln!(
            "[scribe-gateway] .env not loaded: {} (using system environment)",
            e
        );
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match ScribeConfig::load() {
        Ok(c) => c,
        Err(e) => {
            error!("config load failed: {}", e);
            std::process::exit(1);
        }
    };

    if std::env::var("SPEECH_API_KEY").is_err() {
        eprintln!("[scribe-gateway] Hint: set SPEECH_API_KEY in .env for live transcription; without it uploads get placeholder text.");
    }

    let recognizer: Arc<dyn Recognizer> = match create_best_recognizer() {
        Ok(r) => Arc::from(r),
        Err(e) => {
            error!("recognizer init failed: {}", e);
            std::process::exit(1);
        }
    };

    let mut dispatcher = Dispatcher::new(recognizer, config.dispatch_config());
    if let Some(bucket) = &config.staging_bucket {
        match GcsStore::from_env(bucket) {
            Ok(store) => {
                info!("staging chunks to bucket {}", bucket);
                dispatcher = dispatcher.with_staging(Arc::new(store));
            }
            Err(e) => {
                error!("staging store init failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    let state = AppState {
        config: Arc::new(config.clone()),
        dispatcher: Arc::new(dispatcher),
    };
    let app = build_app(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("{} listening on {}", config.app_name, addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("bind {} failed: {}", addr, e);
            std::process::exit(1);
        }
    };
    let server = axum::serve(listener, app);

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown initiated (Ctrl+C received)");
        }
    }
}
