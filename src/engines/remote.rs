//! # Production Engine Clients
//!
//! Thin WebSocket adapters for the three external engines. The wire format
//! is the gateway's own: a JSON control message first, then binary PCM in
//! whichever direction audio flows. These adapters contain no pipeline
//! logic — they only satisfy the capability traits.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::engines::{
    AudioChunk, EngineError, RecognitionConfig, RecognitionResponse, RecognitionSink,
    RecognitionSource, StreamingRecognizer, SynthesisRequest, TranslationRequest, Translator,
    Synthesizer,
};
use crate::util::{retry, RetryConfig};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect(url: &str) -> Result<WsStream, EngineError> {
    let (stream, _) = connect_async(url)
        .await
        .map_err(|e| EngineError::Connection(format!("{}: {}", url, e)))?;
    Ok(stream)
}

/// Recognition engine client. One persistent bidirectional stream per
/// session: JSON config up first, then binary audio up, JSON responses down.
pub struct RemoteRecognizer {
    url: String,
    retry: RetryConfig,
}

impl RemoteRecognizer {
    pub fn new(url: impl Into<String>, retry: RetryConfig) -> Self {
        Self {
            url: url.into(),
            retry,
        }
    }
}

#[async_trait]
impl StreamingRecognizer for RemoteRecognizer {
    async fn open(
        &self,
        config: RecognitionConfig,
    ) -> Result<(Box<dyn RecognitionSink>, Box<dyn RecognitionSource>), EngineError> {
        // Session setup is the one place the backoff helper is wired in;
        // per-utterance calls elsewhere stay retry-free.
        let mut stream = retry(&self.retry, || connect(&self.url)).await?;

        let config_json = serde_json::to_string(&config)
            .map_err(|e| EngineError::Call(format!("encoding recognition config: {}", e)))?;
        stream
            .send(Message::Text(config_json))
            .await
            .map_err(|e| EngineError::Stream(e.to_string()))?;

        debug!(session_id = %config.session_id, "recognition stream opened");

        let (write, read) = stream.split();
        Ok((
            Box::new(WsRecognitionSink { write }),
            Box::new(WsRecognitionSource { read }),
        ))
    }
}

struct WsRecognitionSink {
    write: SplitSink<WsStream, Message>,
}

#[async_trait]
impl RecognitionSink for WsRecognitionSink {
    async fn send(&mut self, chunk: AudioChunk) -> Result<(), EngineError> {
        self.write
            .send(Message::Binary(chunk.data))
            .await
            .map_err(|e| EngineError::Stream(e.to_string()))
    }

    async fn close_send(&mut self) -> Result<(), EngineError> {
        self.write
            .send(Message::Close(None))
            .await
            .map_err(|e| EngineError::Stream(e.to_string()))
    }
}

struct WsRecognitionSource {
    read: SplitStream<WsStream>,
}

#[async_trait]
impl RecognitionSource for WsRecognitionSource {
    async fn recv(&mut self) -> Result<Option<RecognitionResponse>, EngineError> {
        loop {
            match self.read.next().await {
                None => return Ok(None),
                Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Ok(Message::Text(text))) => {
                    let resp = serde_json::from_str(&text)
                        .map_err(|e| EngineError::Stream(format!("bad recognition frame: {}", e)))?;
                    return Ok(Some(resp));
                }
                // Control frames and unexpected binary payloads are skipped.
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(EngineError::Stream(e.to_string())),
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct TranslationReply {
    translated_text: String,
}

/// Translation engine client. One request/response exchange per call.
pub struct RemoteTranslator {
    url: String,
}

impl RemoteTranslator {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Translator for RemoteTranslator {
    async fn translate(&self, request: TranslationRequest) -> Result<String, EngineError> {
        let mut stream = connect(&self.url).await?;

        let json = serde_json::to_string(&request)
            .map_err(|e| EngineError::Call(format!("encoding translation request: {}", e)))?;
        stream
            .send(Message::Text(json))
            .await
            .map_err(|e| EngineError::Call(e.to_string()))?;

        while let Some(msg) = stream.next().await {
            match msg.map_err(|e| EngineError::Call(e.to_string()))? {
                Message::Text(text) => {
                    let reply: TranslationReply = serde_json::from_str(&text)
                        .map_err(|e| EngineError::Call(format!("bad translation reply: {}", e)))?;
                    return Ok(reply.translated_text);
                }
                Message::Close(_) => break,
                _ => continue,
            }
        }

        Err(EngineError::Call("translation engine closed without replying".into()))
    }
}

/// Synthesis engine client. One request per call; the engine streams binary
/// PCM frames and closes when the utterance is complete.
pub struct RemoteSynthesizer {
    url: String,
}

impl RemoteSynthesizer {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Synthesizer for RemoteSynthesizer {
    async fn synthesize(&self, request: SynthesisRequest) -> Result<Vec<u8>, EngineError> {
        let mut stream = connect(&self.url).await?;

        let json = serde_json::to_string(&request)
            .map_err(|e| EngineError::Call(format!("encoding synthesis request: {}", e)))?;
        stream
            .send(Message::Text(json))
            .await
            .map_err(|e| EngineError::Call(e.to_string()))?;

        let mut audio = Vec::new();
        while let Some(msg) = stream.next().await {
            match msg.map_err(|e| EngineError::Call(e.to_string()))? {
                Message::Binary(data) => audio.extend_from_slice(&data),
                Message::Close(_) => break,
                _ => continue,
            }
        }

        Ok(audio)
    }
}
