//! **Recognizer** — convert one chunk of audio into text via a remote
//! speech-recognition API.
//!
//! Implement `Recognizer` for any backend; `GoogleSpeech` talks to the Google
//! Cloud Speech-to-Text v1 REST endpoint via reqwest, `FixedRecognizer` is a
//! placeholder for running the pipeline without credentials.

use crate::error::{ScribeError, ScribeResult};
use async_trait::async_trait;
use base64::Engine;

/// Audio payload for one recognition call: either the chunk bytes inline or
/// a reference to a previously staged remote object.
#[derive(Debug, Clone)]
pub enum AudioSource {
    Inline(Vec<u8>),
    Uri(String),
}

/// Wire encoding of the uploaded audio, inferred from the filename extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioEncoding {
    Mp3,
    Linear16,
    #[default]
    Unspecified,
}

impl AudioEncoding {
    /// Infer from a bare extension (`mp3`, `wav`); anything else is
    /// unspecified and left to the recognizer to sniff.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "mp3" => Self::Mp3,
            "wav" => Self::Linear16,
            _ => Self::Unspecified,
        }
    }

    /// Infer from an uploaded filename (e.g. `meeting.mp3`).
    pub fn from_filename(name: &str) -> Self {
        name.rsplit_once('.')
            .map(|(_, ext)| Self::from_extension(ext))
            .unwrap_or_default()
    }

    /// Google Speech v1 enum string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mp3 => "MP3",
            Self::Linear16 => "LINEAR16",
            Self::Unspecified => "ENCODING_UNSPECIFIED",
        }
    }
}

/// Per-request recognition parameters, shared by every chunk of one upload.
#[derive(Debug, Clone)]
pub struct RecognizeRequest {
    pub encoding: AudioEncoding,
    pub sample_rate_hertz: u32,
    pub language_code: String,
    /// Ask the recognizer for automatic punctuation.
    pub punctuation: bool,
}

impl Default for RecognizeRequest {
    fn default() -> Self {
        Self {
            encoding: AudioEncoding::Unspecified,
            sample_rate_hertz: 16_000,
            language_code: "en-US".to_string(),
            punctuation: true,
        }
    }
}

/// Backend that turns one chunk of audio into text. One call per chunk;
/// backends must tolerate concurrent calls.
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Recognize one chunk. Return an empty string if nothing was detected.
    async fn recognize(&self, audio: AudioSource, request: &RecognizeRequest)
        -> ScribeResult<String>;
}

/// Placeholder backend: returns a fixed string. Use for running the service
/// without API credentials or in tests.
#[derive(Debug, Default)]
pub struct FixedRecognizer {
    /// If set, return this instead of the default message.
    pub response: Option<String>,
}

impl FixedRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(s: String) -> Self {
        Self { response: Some(s) }
    }
}

#[async_trait]
impl Recognizer for FixedRecognizer {
    async fn recognize(
        &self,
        audio: AudioSource,
        _request: &RecognizeRequest,
    ) -> ScribeResult<String> {
        if let Some(ref r) = self.response {
            return Ok(r.clone());
        }
        let detail = match audio {
            AudioSource::Inline(bytes) => format!("{} bytes", bytes.len()),
            AudioSource::Uri(uri) => uri,
        };
        Ok(format!(
            "[recognizer placeholder: {} — set SPEECH_API_KEY for live transcription]",
            detail
        ))
    }
}

/// Production backend: Google Cloud Speech-to-Text v1 `speech:recognize`.
/// Uses `SPEECH_API_KEY` from the environment; the key never reaches clients.
#[derive(Debug, Clone)]
pub struct GoogleSpeech {
    /// Base URL without trailing slash (override in tests or for a proxy).
    pub base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl GoogleSpeech {
    pub const DEFAULT_BASE_URL: &'static str = "https://speech.googleapis.com/v1";

    /// Build from environment: `SPEECH_API_KEY` (required), `SPEECH_API_URL`
    /// (optional override).
    pub fn from_env() -> ScribeResult<Self> {
        let api_key = std::env::var("SPEECH_API_KEY")
            .map_err(|_| ScribeError::Config("SPEECH_API_KEY not set".to_string()))?;
        let base_url = std::env::var("SPEECH_API_URL")
            .unwrap_or_else(|_| Self::DEFAULT_BASE_URL.to_string());
        Self::new(base_url, api_key)
    }

    /// Create with explicit config.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> ScribeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            client,
        })
    }

    fn request_body(audio: &AudioSource, request: &RecognizeRequest) -> serde_json::Value {
        let audio_json = match audio {
            AudioSource::Inline(bytes) => serde_json::json!({
                "content": base64::engine::general_purpose::STANDARD.encode(bytes),
            }),
            AudioSource::Uri(uri) => serde_json::json!({ "uri": uri }),
        };
        serde_json::json!({
            "config": {
                "encoding": request.encoding.as_str(),
                "sampleRateHertz": request.sample_rate_hertz,
                "languageCode": request.language_code,
                "enableAutomaticPunctuation": request.punctuation,
            },
            "audio": audio_json,
        })
    }

    /// Top alternative per result, joined by newline when the API returns
    /// several results for one chunk.
    fn extract_transcript(response: &serde_json::Value) -> String {
        response
            .get("results")
            .and_then(|r| r.as_array())
            .map(|results| {
                results
                    .iter()
                    .filter_map(|result| {
                        result
                            .pointer("/alternatives/0/transcript")
                            .and_then(|t| t.as_str())
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl Recognizer for GoogleSpeech {
    async fn recognize(
        &self,
        audio: AudioSource,
        request: &RecognizeRequest,
    ) -> ScribeResult<String> {
        let url = format!(
            "{}/speech:recognize?key={}",
            self.base_url.trim_end_matches('/'),
            self.api_key
        );
        let body = Self::request_body(&audio, request);
        let res = self.client.post(&url).json(&body).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ScribeError::Recognition(format!(
                "Speech API error {}: {}",
                status, body
            )));
        }
        let json: serde_json::Value = res.json().await?;
        Ok(Self::extract_transcript(&json))
    }
}

/// Create the best available recognizer from environment: `GoogleSpeech` if
/// `SPEECH_API_KEY` is set, otherwise the placeholder.
pub fn create_best_recognizer() -> ScribeResult<Box<dyn Recognizer>> {
    if std::env::var("SPEECH_API_KEY").is_ok() {
        return Ok(Box::new(GoogleSpeech::from_env()?));
    }
    Ok(Box::new(FixedRecognizer::new()))
}
