//! # Engine Interfaces
//!
//! The recognition, translation, and synthesis engines are opaque external
//! services. This module pins down everything the pipeline is allowed to
//! know about them: the message types that flow through the stage queues,
//! one capability trait per engine, and the error type engine calls produce.
//!
//! Each trait has a single production implementation (`remote`) and test
//! doubles substitutable in the pipeline test suite.

pub mod language;  // Language-code normalization and voice selection
pub mod remote;    // Production WebSocket clients

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One chunk of raw PCM audio headed for recognition.
///
/// Pipeline messages are immutable value records passed by ownership
/// transfer through queues; no stage mutates a message another stage holds.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub data: Vec<u8>,
    pub sample_rate: u32,
    pub channels: u32,
}

/// One recognition hypothesis emitted toward the translation stage.
#[derive(Debug, Clone)]
pub struct Transcript {
    pub text: String,
    pub is_final: bool,
    /// Engine-reported stability of an interim result, 0.0–1.0.
    pub stability: f32,
    /// Language the engine detected for this span, possibly empty.
    pub language: String,
}

/// One translated utterance headed for synthesis.
#[derive(Debug, Clone)]
pub struct Translation {
    pub text: String,
    pub is_final: bool,
}

/// One frame of synthesized audio headed for the client.
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub data: Vec<u8>,
    /// Marks the last frame produced for one utterance.
    pub is_final: bool,
}

/// Initial streaming configuration sent when a recognition stream opens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionConfig {
    pub session_id: String,
    /// Ordered preference list; the first code is primary, the rest are
    /// alternatives for detection.
    pub language_codes: Vec<String>,
    pub sample_rate: u32,
    pub enable_punctuation: bool,
    pub interim_results: bool,
}

/// One ranked hypothesis inside a recognition result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionAlternative {
    pub transcript: String,
    #[serde(default)]
    pub confidence: f32,
}

/// One recognition result for a span of audio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub is_final: bool,
    #[serde(default)]
    pub stability: f32,
    #[serde(default)]
    pub language_code: String,
    pub alternatives: Vec<RecognitionAlternative>,
}

/// One message off the recognition stream; may carry zero results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecognitionResponse {
    #[serde(default)]
    pub results: Vec<RecognitionResult>,
}

/// Request for one translation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationRequest {
    pub session_id: String,
    pub text: String,
    pub source_language: String,
    pub target_language: String,
    pub is_final: bool,
    /// Recent original utterances, oldest first, as consistency hints.
    pub context: Vec<String>,
}

/// Request for one synthesis call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisRequest {
    pub session_id: String,
    pub text: String,
    pub language_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaking_rate: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pitch: Option<f32>,
}

/// Errors produced by engine calls.
#[derive(Debug)]
pub enum EngineError {
    /// Could not reach or establish a stream to the engine.
    Connection(String),
    /// An open stream broke mid-conversation (not end-of-stream).
    Stream(String),
    /// The engine answered but the call failed or the reply was unusable.
    Call(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Connection(msg) => write!(f, "engine connection error: {}", msg),
            EngineError::Stream(msg) => write!(f, "engine stream error: {}", msg),
            EngineError::Call(msg) => write!(f, "engine call error: {}", msg),
        }
    }
}

impl std::error::Error for EngineError {}

/// Send half of an open recognition stream.
#[async_trait]
pub trait RecognitionSink: Send {
    /// Forward one audio chunk to the engine.
    async fn send(&mut self, chunk: AudioChunk) -> Result<(), EngineError>;

    /// Half-close: signal end of audio input; the engine may still emit
    /// results afterward.
    async fn close_send(&mut self) -> Result<(), EngineError>;
}

/// Receive half of an open recognition stream.
#[async_trait]
pub trait RecognitionSource: Send {
    /// Next message off the stream; `Ok(None)` is orderly end-of-stream.
    async fn recv(&mut self) -> Result<Option<RecognitionResponse>, EngineError>;
}

/// The speech-recognition engine: opens one bidirectional stream per
/// session, split into independently owned halves so the forwarding and
/// receiving stages can run concurrently.
#[async_trait]
pub trait StreamingRecognizer: Send + Sync {
    async fn open(
        &self,
        config: RecognitionConfig,
    ) -> Result<(Box<dyn RecognitionSink>, Box<dyn RecognitionSource>), EngineError>;
}

/// The text-translation engine. Callers trim whitespace from the result.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, request: TranslationRequest) -> Result<String, EngineError>;
}

/// The speech-synthesis engine, single-shot. The pipeline slices the
/// returned PCM into ~100ms delivery frames with a final-frame marker.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, request: SynthesisRequest) -> Result<Vec<u8>, EngineError>;
}

/// Delivery seam between the egress stage and the client transport. The
/// production implementation wraps the WebSocket actor and writes only the
/// frame bytes; tests substitute a recording sink that keeps the whole
/// record, final-frame marker included.
#[async_trait]
pub trait ClientSink: Send + Sync {
    /// Write one audio frame to the client. An error here means the
    /// connection is dead and is fatal for the session.
    async fn send_audio(&self, frame: SynthesizedAudio) -> Result<(), EngineError>;
}
