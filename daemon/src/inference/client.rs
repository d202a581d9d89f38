//! HTTP client for the transcription and AI-response endpoints
//!
//! `POST {base}/transcribe` takes a multipart form with one `audio` part and
//! answers `{ "text": ... }`. `POST {base}/ask` takes `{ "prompt": ... }` and
//! answers `{ "text": ..., "audio": <base64> }`. Each call is attempted once.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::{InferenceService, Reply};

/// Errors from the remote services
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("invalid reply audio: {0}")]
    Decode(#[from] base64::DecodeError),
}

#[derive(Deserialize)]
struct TranscribeResponse {
    #[serde(default)]
    text: String,
}

#[derive(Serialize)]
struct AskRequest<'a> {
    prompt: &'a str,
}

#[derive(Deserialize)]
struct AskResponse {
    text: String,
    #[serde(default)]
    audio: String,
}

/// Talks to the transcription and AI-response services over HTTP
pub struct HttpInferenceClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpInferenceClient {
    /// Create a client for services rooted at `base_url`
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, InferenceError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }

    /// Turn a non-2xx response into an error, keeping the body for logs
    async fn check(
        endpoint: &'static str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, InferenceError> {
        let status = response.status();
        debug!(endpoint, status = %status, "received response");

        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        error!(endpoint, status = %status, body = %body, "inference service error");
        Err(InferenceError::Status {
            endpoint,
            status,
            body,
        })
    }
}

#[async_trait]
impl InferenceService for HttpInferenceClient {
    async fn transcribe(&self, audio: Vec<u8>, mime: &str) -> Result<String, InferenceError> {
        debug!(audio_bytes = audio.len(), mime, "starting transcription");

        let part = reqwest::multipart::Part::bytes(audio)
            .file_name(format!("voice.{}", extension_for(mime)))
            .mime_str(mime)?;
        let form = reqwest::multipart::Form::new().part("audio", part);

        let response = self
            .client
            .post(self.url("transcribe"))
            .multipart(form)
            .send()
            .await?;
        let result: TranscribeResponse = Self::check("transcribe", response).await?.json().await?;

        info!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }

    async fn respond(&self, prompt: &str) -> Result<Reply, InferenceError> {
        debug!(prompt_len = prompt.len(), "asking AI responder");

        let response = self
            .client
            .post(self.url("ask"))
            .json(&AskRequest { prompt })
            .send()
            .await?;
        let result: AskResponse = Self::check("ask", response).await?.json().await?;

        let audio = base64::engine::general_purpose::STANDARD.decode(result.audio.trim())?;
        info!(reply = %result.text, audio_bytes = audio.len(), "reply received");

        Ok(Reply {
            text: result.text,
            audio,
        })
    }
}

/// File extension the transcription service uses to sniff the container
fn extension_for(mime: &str) -> &'static str {
    match mime {
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "audio/webm" => "webm",
        "audio/ogg" => "ogg",
        "audio/mpeg" => "mp3",
        _ => "bin",
    }
}
