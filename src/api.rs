//! HTTP API the chat host talks to.
//!
//! The host (or a small browser shim) posts render notifications here and
//! edits settings through the same server. Runs on 127.0.0.1:8790
//! (configurable) using axum.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::adapter::{MessageEventAdapter, RenderVerdict};
use crate::error::{ConfigError, FilterError, SiliconFlowError};
use crate::filter::{ExclusionRule, SpeakDecision};
use crate::service::{ApiUpdate, SettingsError, TtsUpdate};
use crate::siliconflow::{ClientHandle, CustomVoice, VoiceUpload};

#[derive(Clone)]
pub struct ApiState {
    pub adapter: Arc<MessageEventAdapter>,
    pub client: Arc<ClientHandle>,
}

/// Phrase synthesized by `/test-model`.
const MODEL_TEST_PHRASE: &str = "你好，这是一个测试语音。";

// --- Request/Response types ---

#[derive(Deserialize)]
struct RenderedRequest {
    text: String,
    #[serde(default)]
    is_user: bool,
}

#[derive(Deserialize)]
struct TextRequest {
    text: String,
}

#[derive(Deserialize)]
struct ToggleRequest {
    enabled: bool,
}

#[derive(Deserialize)]
struct MarkersRequest {
    #[serde(default)]
    start: String,
    #[serde(default)]
    end: String,
}

#[derive(Deserialize)]
struct VoiceCloneRequest {
    name: String,
    text: String,
    audio_base64: String,
    #[serde(default)]
    file_name: Option<String>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize)]
struct DeleteVoiceRequest {
    uri: String,
}

#[derive(Serialize)]
struct MarkersView {
    start: String,
    end: String,
}

#[derive(Serialize)]
struct StatusResponse {
    busy: bool,
    api_url: String,
    api_key_set: bool,
    model: String,
    voice: String,
    auto_play: bool,
    auto_play_user: bool,
    rules: usize,
    markers: MarkersView,
    pending_messages: usize,
}

#[derive(Serialize)]
struct SimpleResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    models: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bytes: Option<usize>,
}

impl SimpleResponse {
    fn ok(status: &str) -> Self {
        Self {
            status: status.into(),
            error: None,
            uri: None,
            models: None,
            bytes: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            status: "error".into(),
            error: Some(message.into()),
            uri: None,
            models: None,
            bytes: None,
        }
    }
}

type ApiError = (StatusCode, Json<SimpleResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

fn reject(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(SimpleResponse::err(message)))
}

fn settings_error(e: SettingsError) -> ApiError {
    let status = match &e {
        SettingsError::Filter(FilterError::UnknownRule(_)) => StatusCode::NOT_FOUND,
        SettingsError::Filter(_) => StatusCode::BAD_REQUEST,
        SettingsError::Config(
            ConfigError::OutOfRange { .. } | ConfigError::ResponseFormat(_) | ConfigError::InvalidUrl(_),
        ) => StatusCode::BAD_REQUEST,
        SettingsError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    reject(status, e.to_string())
}

fn vendor_error(e: SiliconFlowError) -> ApiError {
    let status = match &e {
        SiliconFlowError::Config(_) | SiliconFlowError::InvalidVoiceName(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::BAD_GATEWAY,
    };
    warn!("SiliconFlow request failed: {e}");
    reject(status, e.to_string())
}

/// Build the axum router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/status", get(handle_status))
        .route("/messages/{id}/rendered", post(handle_rendered))
        .route("/preview", post(handle_preview))
        .route("/speak", post(handle_speak))
        .route("/cancel", post(handle_cancel))
        .route("/rules", get(handle_list_rules).post(handle_add_rule))
        .route("/rules/{name}", delete(handle_delete_rule))
        .route("/rules/{name}/toggle", post(handle_toggle_rule))
        .route("/markers", put(handle_set_markers))
        .route("/tts", put(handle_update_tts))
        .route("/api", put(handle_update_api))
        .route("/models", get(handle_models))
        .route(
            "/voices",
            get(handle_list_voices)
                .post(handle_clone_voice)
                .delete(handle_delete_voice),
        )
        .route("/test-connection", post(handle_test_connection))
        .route("/test-model", post(handle_test_model))
        .with_state(state)
}

/// Bind the API and serve it as a background tokio task.
pub async fn start_api(state: ApiState, port: u16) -> std::io::Result<()> {
    let app = router(state);
    let addr = format!("127.0.0.1:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("API server listening on {addr}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!("API server error: {e}");
        }
    });
    Ok(())
}

// --- Handlers ---

async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let speaker = state.adapter.speaker();
    let config = speaker.settings();
    let client = state.client.current();
    Json(StatusResponse {
        busy: speaker.is_busy(),
        api_url: client.base_url().to_string(),
        api_key_set: client.has_key(),
        model: config.tts.model,
        voice: config.tts.voice,
        auto_play: config.tts.auto_play,
        auto_play_user: config.tts.auto_play_user,
        rules: config.exclusion_rules.len(),
        markers: MarkersView {
            start: config.markers.start,
            end: config.markers.end,
        },
        pending_messages: state.adapter.pending_count(),
    })
}

async fn handle_rendered(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<RenderedRequest>,
) -> Json<SimpleResponse> {
    let verdict = state.adapter.on_rendered(&id, req.text, req.is_user);
    let status = match verdict {
        RenderVerdict::Scheduled => "scheduled",
        RenderVerdict::Ignored => "ignored",
        RenderVerdict::AlreadyProcessed => "already_processed",
    };
    Json(SimpleResponse::ok(status))
}

async fn handle_preview(
    State(state): State<ApiState>,
    Json(req): Json<TextRequest>,
) -> Json<SpeakDecision> {
    Json(state.adapter.speaker().preview(&req.text))
}

async fn handle_speak(
    State(state): State<ApiState>,
    Json(req): Json<TextRequest>,
) -> ApiResult<SimpleResponse> {
    if req.text.trim().is_empty() {
        return Err(reject(StatusCode::BAD_REQUEST, "empty text"));
    }
    let speaker = state.adapter.speaker().clone();
    if speaker.is_busy() {
        return Ok(Json(SimpleResponse::ok("busy")));
    }

    // Fire-and-forget: synthesis and playback outlive the request.
    tokio::spawn(async move {
        if let Err(e) = speaker.speak_raw(&req.text).await {
            warn!("Test speech failed: {e}");
        }
    });
    Ok(Json(SimpleResponse::ok("speaking")))
}

async fn handle_cancel(State(state): State<ApiState>) -> Json<SimpleResponse> {
    state.adapter.speaker().stop();
    Json(SimpleResponse::ok("cancelled"))
}

async fn handle_list_rules(State(state): State<ApiState>) -> Json<Vec<ExclusionRule>> {
    Json(state.adapter.speaker().rules())
}

async fn handle_add_rule(
    State(state): State<ApiState>,
    Json(rule): Json<ExclusionRule>,
) -> ApiResult<SimpleResponse> {
    state
        .adapter
        .speaker()
        .add_rule(rule)
        .map_err(settings_error)?;
    Ok(Json(SimpleResponse::ok("ok")))
}

async fn handle_toggle_rule(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(req): Json<ToggleRequest>,
) -> ApiResult<SimpleResponse> {
    state
        .adapter
        .speaker()
        .set_rule_enabled(&name, req.enabled)
        .map_err(settings_error)?;
    Ok(Json(SimpleResponse::ok("ok")))
}

async fn handle_delete_rule(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> ApiResult<SimpleResponse> {
    state
        .adapter
        .speaker()
        .remove_rule(&name)
        .map_err(settings_error)?;
    Ok(Json(SimpleResponse::ok("deleted")))
}

async fn handle_set_markers(
    State(state): State<ApiState>,
    Json(req): Json<MarkersRequest>,
) -> ApiResult<SimpleResponse> {
    state
        .adapter
        .speaker()
        .set_markers(&req.start, &req.end)
        .map_err(settings_error)?;
    Ok(Json(SimpleResponse::ok("ok")))
}

async fn handle_update_tts(
    State(state): State<ApiState>,
    Json(update): Json<TtsUpdate>,
) -> ApiResult<SimpleResponse> {
    state
        .adapter
        .speaker()
        .update_tts(update)
        .map_err(settings_error)?;
    Ok(Json(SimpleResponse::ok("ok")))
}

async fn handle_models(State(state): State<ApiState>) -> ApiResult<Vec<String>> {
    let models = state.client.current().list_models().await.map_err(vendor_error)?;
    Ok(Json(models))
}

async fn handle_list_voices(State(state): State<ApiState>) -> ApiResult<Vec<CustomVoice>> {
    let voices = state.client.current().list_voices().await.map_err(vendor_error)?;
    Ok(Json(voices))
}

/// Reference audio sent as plain base64 or a `data:audio/...;base64,` URL.
struct EncodedAudio {
    mime: Option<String>,
    bytes: Vec<u8>,
}

fn decode_audio(encoded: &str) -> Result<EncodedAudio, base64::DecodeError> {
    let (mime, payload) = match encoded.split_once(";base64,") {
        Some((head, data)) => (
            head.trim()
                .strip_prefix("data:")
                .and_then(|m| m.split(';').next())
                .map(str::to_ascii_lowercase),
            data,
        ),
        None => (None, encoded),
    };
    let bytes = base64::engine::general_purpose::STANDARD.decode(payload.trim())?;
    Ok(EncodedAudio { mime, bytes })
}

/// File extension for an uploaded clip's MIME type; mp3 when unknown.
fn audio_extension(mime: Option<&str>) -> &'static str {
    match mime {
        Some("audio/wav" | "audio/x-wav" | "audio/wave" | "audio/vnd.wave") => "wav",
        Some("audio/ogg" | "audio/opus") => "ogg",
        Some("audio/flac" | "audio/x-flac") => "flac",
        Some("audio/mp4" | "audio/m4a" | "audio/x-m4a") => "m4a",
        Some("audio/webm") => "webm",
        _ => "mp3",
    }
}

async fn handle_clone_voice(
    State(state): State<ApiState>,
    Json(req): Json<VoiceCloneRequest>,
) -> ApiResult<SimpleResponse> {
    let audio = decode_audio(&req.audio_base64)
        .map_err(|e| reject(StatusCode::BAD_REQUEST, format!("invalid audio_base64: {e}")))?;
    let model = req
        .model
        .unwrap_or_else(|| state.adapter.speaker().settings().tts.model);
    let file_name = req
        .file_name
        .unwrap_or_else(|| format!("{}.{}", req.name, audio_extension(audio.mime.as_deref())));
    let upload = VoiceUpload {
        file_name,
        name: req.name,
        text: req.text,
        audio: audio.bytes,
        model,
    };

    let uri = state
        .client
        .current()
        .upload_voice(upload)
        .await
        .map_err(vendor_error)?;
    Ok(Json(SimpleResponse {
        uri: Some(uri),
        ..SimpleResponse::ok("ok")
    }))
}

async fn handle_delete_voice(
    State(state): State<ApiState>,
    Json(req): Json<DeleteVoiceRequest>,
) -> ApiResult<SimpleResponse> {
    state
        .client
        .current()
        .delete_voice(&req.uri)
        .await
        .map_err(vendor_error)?;
    Ok(Json(SimpleResponse::ok("deleted")))
}

async fn handle_update_api(
    State(state): State<ApiState>,
    Json(update): Json<ApiUpdate>,
) -> ApiResult<SimpleResponse> {
    let api = state
        .adapter
        .speaker()
        .update_api(update)
        .map_err(settings_error)?;
    state.client.reconfigure(&api).map_err(|e| {
        warn!("Failed to rebuild SiliconFlow client: {e}");
        reject(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;
    Ok(Json(SimpleResponse::ok("ok")))
}

/// Synthesize a short phrase with the current TTS settings without playing it.
async fn handle_test_model(State(state): State<ApiState>) -> ApiResult<SimpleResponse> {
    let tts = state.adapter.speaker().settings().tts;
    let audio = state
        .client
        .current()
        .speech(&tts, MODEL_TEST_PHRASE)
        .await
        .map_err(vendor_error)?;
    info!("Model test ok: {} returned {} bytes", tts.model, audio.len());
    Ok(Json(SimpleResponse {
        bytes: Some(audio.len()),
        ..SimpleResponse::ok("ok")
    }))
}

async fn handle_test_connection(State(state): State<ApiState>) -> ApiResult<SimpleResponse> {
    let models = state
        .client
        .current()
        .list_models()
        .await
        .map_err(vendor_error)?;
    info!("Connection test ok: {} TTS models", models.len());
    Ok(Json(SimpleResponse {
        models: Some(models.len()),
        ..SimpleResponse::ok("ok")
    }))
}
