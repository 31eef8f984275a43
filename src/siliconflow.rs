//! SiliconFlow API client.
//!
//! Covers the calls the speaker needs: speech synthesis, TTS model listing
//! and voice cloning (upload, list, delete). Endpoints follow the
//! OpenAI-compatible layout under a configurable base URL.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{ApiConfig, TtsConfig};
use crate::error::SiliconFlowError;
use crate::speech::Synthesizer;

type Result<T> = std::result::Result<T, SiliconFlowError>;

// --- Wire types ---

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: String,
    response_format: &'a str,
    speed: f32,
    gain: f32,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

/// A cloned voice stored on the vendor side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomVoice {
    pub uri: String,
    #[serde(default, rename = "customName", skip_serializing_if = "Option::is_none")]
    pub custom_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VoiceListResponse {
    #[serde(default, alias = "result")]
    results: Vec<CustomVoice>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    uri: String,
}

#[derive(Debug, Serialize)]
struct DeleteVoiceRequest<'a> {
    uri: &'a str,
}

/// Error bodies come in two shapes: `{"message": ...}` and
/// `{"error": {"message": ...}}`.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
}

/// Reference audio for a new cloned voice.
#[derive(Debug, Clone)]
pub struct VoiceUpload {
    pub name: String,
    pub text: String,
    pub audio: Vec<u8>,
    pub file_name: String,
    pub model: String,
}

// --- Voice helpers ---

/// Qualify a preset voice with its model (`alex` → `Model:alex`).
/// Anything already containing `:` (cloned `speech:...` uris, qualified
/// presets) is used as-is.
pub fn voice_id(model: &str, voice: &str) -> String {
    if voice.contains(':') {
        voice.to_string()
    } else {
        format!("{model}:{voice}")
    }
}

pub fn validate_voice_name(name: &str) -> Result<()> {
    let valid = (1..=64).contains(&name.len())
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(SiliconFlowError::InvalidVoiceName(name.to_string()))
    }
}

fn audio_mime(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" | "opus" => "audio/ogg",
        "m4a" | "mp4" => "audio/mp4",
        "flac" => "audio/flac",
        "webm" => "audio/webm",
        _ => "application/octet-stream",
    }
}

// --- Client ---

pub struct SiliconFlowClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl SiliconFlowClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.key.trim().to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn has_key(&self) -> bool {
        !self.api_key.is_empty()
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{endpoint}", self.base_url)
    }

    fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        if self.api_key.is_empty() {
            return Err(SiliconFlowError::Config("API key is not set".into()));
        }
        Ok(request.bearer_auth(&self.api_key))
    }

    async fn check_response(response: Response) -> Result<Response> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|b| b.error.and_then(|e| e.message).or(b.message))
            .unwrap_or(body);

        Err(SiliconFlowError::Api { status, message })
    }

    /// Synthesize `text` with the given TTS settings. Returns encoded audio
    /// in `tts.response_format`.
    pub async fn speech(&self, tts: &TtsConfig, text: &str) -> Result<Vec<u8>> {
        let body = SpeechRequest {
            model: &tts.model,
            input: text,
            voice: voice_id(&tts.model, &tts.voice),
            response_format: &tts.response_format,
            speed: tts.speed,
            gain: tts.gain,
        };
        debug!(
            "Speech request: model={} voice={} speed={} gain={} ({} chars)",
            body.model,
            body.voice,
            body.speed,
            body.gain,
            text.chars().count()
        );

        let request = self.authorized(self.client.post(self.url("/audio/speech")))?;
        let response = Self::check_response(request.json(&body).send().await?).await?;
        let audio = response.bytes().await?;
        if audio.is_empty() {
            return Err(SiliconFlowError::EmptyAudio);
        }
        Ok(audio.to_vec())
    }

    /// Text-to-speech model ids offered to this key.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let request = self
            .authorized(self.client.get(self.url("/models")))?
            .query(&[("type", "audio"), ("sub_type", "text-to-speech")]);
        let response = Self::check_response(request.send().await?).await?;
        let models: ModelsResponse = response.json().await?;
        Ok(models.data.into_iter().map(|m| m.id).collect())
    }

    pub async fn list_voices(&self) -> Result<Vec<CustomVoice>> {
        let request = self.authorized(self.client.get(self.url("/audio/voice/list")))?;
        let response = Self::check_response(request.send().await?).await?;
        let voices: VoiceListResponse = response.json().await?;
        Ok(voices.results)
    }

    /// Upload reference audio and return the new voice's uri.
    pub async fn upload_voice(&self, upload: VoiceUpload) -> Result<String> {
        validate_voice_name(&upload.name)?;
        if upload.text.trim().is_empty() {
            return Err(SiliconFlowError::Config("reference text is empty".into()));
        }
        if upload.audio.is_empty() {
            return Err(SiliconFlowError::Config("reference audio is empty".into()));
        }

        let mime = audio_mime(&upload.file_name);
        let file = Part::bytes(upload.audio)
            .file_name(upload.file_name)
            .mime_str(mime)?;
        let form = Form::new()
            .part("file", file)
            .text("model", upload.model)
            .text("customName", upload.name.clone())
            .text("text", upload.text);

        let request = self.authorized(self.client.post(self.url("/uploads/audio/voice")))?;
        let response = Self::check_response(request.multipart(form).send().await?).await?;
        let uploaded: UploadResponse = response.json().await?;
        info!("Cloned voice '{}' uploaded as {}", upload.name, uploaded.uri);
        Ok(uploaded.uri)
    }

    pub async fn delete_voice(&self, uri: &str) -> Result<()> {
        let request = self.authorized(self.client.post(self.url("/audio/voice/deletions")))?;
        Self::check_response(request.json(&DeleteVoiceRequest { uri }).send().await?).await?;
        info!("Deleted cloned voice {uri}");
        Ok(())
    }
}

#[async_trait]
impl Synthesizer for SiliconFlowClient {
    async fn synthesize(&self, tts: &TtsConfig, text: &str) -> Result<Vec<u8>> {
        self.speech(tts, text).await
    }
}

/// The active client, replaced when the API key or url changes.
///
/// Requests already in flight finish on the client they started with.
pub struct ClientHandle {
    current: RwLock<Arc<SiliconFlowClient>>,
}

impl ClientHandle {
    pub fn new(client: SiliconFlowClient) -> Self {
        Self {
            current: RwLock::new(Arc::new(client)),
        }
    }

    pub fn current(&self) -> Arc<SiliconFlowClient> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Build a client for `config` and make it current.
    ///
    /// An empty key in `config` keeps the current key, so a key given on
    /// the command line survives url changes.
    pub fn reconfigure(&self, config: &ApiConfig) -> Result<()> {
        let mut config = config.clone();
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if config.key.trim().is_empty() {
            config.key = current.api_key.clone();
        }
        let client = SiliconFlowClient::new(&config)?;
        info!(
            "SiliconFlow client now using {} (key {})",
            client.base_url,
            if client.has_key() { "set" } else { "missing" }
        );
        *current = Arc::new(client);
        Ok(())
    }
}

#[async_trait]
impl Synthesizer for ClientHandle {
    async fn synthesize(&self, tts: &TtsConfig, text: &str) -> Result<Vec<u8>> {
        self.current().speech(tts, text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_voices_are_qualified_with_model() {
        assert_eq!(
            voice_id("FunAudioLLM/CosyVoice2-0.5B", "alex"),
            "FunAudioLLM/CosyVoice2-0.5B:alex"
        );
    }

    #[test]
    fn qualified_and_cloned_voices_pass_through() {
        assert_eq!(voice_id("m", "other/model:anna"), "other/model:anna");
        assert_eq!(voice_id("m", "speech:my-voice:abc:xyz"), "speech:my-voice:abc:xyz");
    }

    #[test]
    fn voice_names_are_restricted() {
        assert!(validate_voice_name("my_voice-2").is_ok());
        assert!(validate_voice_name("").is_err());
        assert!(validate_voice_name("has space").is_err());
        assert!(validate_voice_name("中文").is_err());
        assert!(validate_voice_name(&"a".repeat(65)).is_err());
    }

    #[test]
    fn mime_from_extension() {
        assert_eq!(audio_mime("sample.MP3"), "audio/mpeg");
        assert_eq!(audio_mime("clip.wav"), "audio/wav");
        assert_eq!(audio_mime("noext"), "application/octet-stream");
    }

    #[test]
    fn error_body_shapes() {
        let a: ErrorBody = serde_json::from_str(r#"{"code":20012,"message":"Model does not exist"}"#).unwrap();
        assert_eq!(a.message.as_deref(), Some("Model does not exist"));
        let b: ErrorBody = serde_json::from_str(r#"{"error":{"message":"bad key"}}"#).unwrap();
        assert_eq!(b.error.and_then(|e| e.message).as_deref(), Some("bad key"));
    }

    #[test]
    fn missing_key_fails_before_any_request() {
        let client = SiliconFlowClient::new(&ApiConfig::default()).unwrap();
        let err = client
            .authorized(client.client.get(client.url("/models")))
            .unwrap_err();
        assert!(matches!(err, SiliconFlowError::Config(_)));
    }

    #[test]
    fn reconfigure_swaps_client_and_keeps_existing_key() {
        let handle = ClientHandle::new(
            SiliconFlowClient::new(&ApiConfig {
                key: "sk-cli".into(),
                ..ApiConfig::default()
            })
            .unwrap(),
        );

        handle
            .reconfigure(&ApiConfig {
                url: "http://localhost:9/v1".into(),
                ..ApiConfig::default()
            })
            .unwrap();
        let client = handle.current();
        assert_eq!(client.base_url(), "http://localhost:9/v1");
        assert_eq!(client.api_key, "sk-cli");

        handle
            .reconfigure(&ApiConfig {
                key: "sk-new".into(),
                ..ApiConfig::default()
            })
            .unwrap();
        assert_eq!(handle.current().api_key, "sk-new");
    }

    #[test]
    fn trailing_slash_is_dropped_from_base_url() {
        let config = ApiConfig {
            url: "http://localhost:9/v1/".into(),
            ..ApiConfig::default()
        };
        let client = SiliconFlowClient::new(&config).unwrap();
        assert_eq!(client.url("/models"), "http://localhost:9/v1/models");
    }
}
