//! Remote inference: transcription and AI response services

mod client;

use async_trait::async_trait;

pub use client::{HttpInferenceClient, InferenceError};

/// Result of one transcription + reply round trip
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceResult {
    pub transcript: String,
    pub reply_text: String,
    pub reply_audio: Vec<u8>,
}

/// The AI responder's answer to a prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub audio: Vec<u8>,
}

/// Request/response contract of the two remote services
#[async_trait]
pub trait InferenceService: Send + Sync + 'static {
    /// Transcribe one audio clip. An empty string means no speech.
    async fn transcribe(&self, audio: Vec<u8>, mime: &str) -> Result<String, InferenceError>;

    /// Ask the AI responder for a spoken reply
    async fn respond(&self, prompt: &str) -> Result<Reply, InferenceError>;
}
