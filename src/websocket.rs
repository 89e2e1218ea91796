//! # WebSocket Translation Handler
//!
//! One actor per connected client on `/ws`.
//!
//! ## Protocol:
//! 1. **Handshake**: first client message is JSON
//!    `{"source_language": "...", "target_language": "..."}`
//! 2. **Ready**: server replies `{"status":"ready"}` once the session and
//!    its pipeline are up
//! 3. **Audio in**: client sends binary frames of raw PCM (16-bit, 16kHz,
//!    mono); frames received before the handshake are dropped with a warning
//! 4. **Audio out**: server sends binary frames of synthesized translated
//!    speech as they become available; frames carry no metadata
//!
//! The actor owns nothing but the connection: session state lives in the
//! registry, and the pipeline reaches back here through `ActorSink`.

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::audio::bytes_to_samples;
use crate::audio::vad::VoiceActivityDetector;
use crate::engines::language::normalize_language_code;
use crate::engines::{ClientSink, EngineError, SynthesizedAudio};
use crate::session::{Session, SessionRegistry};
use crate::state::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

const READY_MESSAGE: &str = r#"{"status":"ready"}"#;

/// First client message on a new connection.
#[derive(Debug, Serialize, Deserialize)]
pub struct ClientHandshake {
    pub source_language: String,
    pub target_language: String,
}

/// One synthesized audio frame pushed from the pipeline's egress stage.
#[derive(Message)]
#[rtype(result = "()")]
pub struct SendAudioFrame(pub SynthesizedAudio);

/// Pipeline-facing delivery handle for one connection. `Addr::send` resolves
/// only after the actor handled the frame, so a dead actor surfaces as a
/// mailbox error and the egress stage treats it as a transport fault.
pub struct ActorSink {
    addr: Addr<TranslateWebSocket>,
}

#[async_trait]
impl ClientSink for ActorSink {
    async fn send_audio(&self, frame: SynthesizedAudio) -> Result<(), EngineError> {
        self.addr
            .send(SendAudioFrame(frame))
            .await
            .map_err(|e| EngineError::Call(format!("client connection gone: {}", e)))
    }
}

/// Per-connection WebSocket actor.
pub struct TranslateWebSocket {
    registry: web::Data<SessionRegistry>,
    session: Option<Arc<Session>>,
    vad: Option<VoiceActivityDetector>,
    last_heartbeat: Instant,
}

impl TranslateWebSocket {
    pub fn new(registry: web::Data<SessionRegistry>, state: &AppState) -> Self {
        let audio = state.get_config().audio;
        let vad = audio.vad_enabled.then(|| {
            VoiceActivityDetector::new(
                audio.vad_threshold,
                audio.vad_min_speech_ms,
                audio.vad_min_silence_ms,
            )
        });

        Self {
            registry,
            session: None,
            vad,
            last_heartbeat: Instant::now(),
        }
    }

    fn handle_handshake(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        let handshake: ClientHandshake = match serde_json::from_str(text) {
            Ok(handshake) => handshake,
            Err(e) => {
                warn!(error = %e, "malformed handshake message dropped");
                return;
            }
        };
        let source = normalize_language_code(&handshake.source_language);
        let target = normalize_language_code(&handshake.target_language);

        if let Some(session) = &self.session {
            // Renegotiation; allowed only before the first audio frame.
            match session.set_languages(&source, &target) {
                Ok(()) => ctx.text(READY_MESSAGE),
                Err(e) => warn!(session_id = %session.id, error = %e, "language change rejected"),
            }
            return;
        }

        let sink = Arc::new(ActorSink {
            addr: ctx.address(),
        });
        match self.registry.create(&source, &target, sink) {
            Ok(session) => {
                info!(
                    session_id = %session.id,
                    source_language = %source,
                    target_language = %target,
                    "translation session ready"
                );
                self.session = Some(session);
                ctx.text(READY_MESSAGE);
            }
            Err(e) => {
                error!(error = %e, "failed to start session");
                ctx.text(format!(r#"{{"status":"error","message":"{}"}}"#, e));
                ctx.stop();
            }
        }
    }
}

impl Actor for TranslateWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("WebSocket connection started");

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!("WebSocket heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let Some(session) = self.session.take() {
            self.registry.remove(&session.id);
        }
        info!("WebSocket connection stopped");
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for TranslateWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                self.handle_handshake(&text, ctx);
            }
            Ok(ws::Message::Binary(data)) => {
                self.last_heartbeat = Instant::now();
                let Some(session) = &self.session else {
                    warn!("binary audio before handshake dropped");
                    return;
                };
                if let Some(vad) = &mut self.vad {
                    let samples = bytes_to_samples(&data);
                    if !vad.process(&samples) {
                        return;
                    }
                }
                session.process_audio(&data);
            }
            Ok(ws::Message::Ping(payload)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&payload);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                debug!(?reason, "WebSocket close received");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(e) => {
                error!(error = %e, "WebSocket protocol error");
                ctx.stop();
            }
        }
    }
}

impl Handler<SendAudioFrame> for TranslateWebSocket {
    type Result = ();

    fn handle(&mut self, msg: SendAudioFrame, ctx: &mut Self::Context) {
        ctx.binary(msg.0.data);
    }
}

/// GET /ws — upgrade to the translation protocol.
pub async fn translate_websocket(
    req: HttpRequest,
    stream: web::Payload,
    registry: web::Data<SessionRegistry>,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    ws::start(TranslateWebSocket::new(registry, state.get_ref()), &req, stream)
}
