//! # Streaming Translation Pipeline
//!
//! Five concurrent stages per session, connected by bounded queues:
//!
//! ```text
//! audio queue -> [forward] -> ASR -> [receive] -> transcript queue
//!     -> [translate] -> translation queue -> [synthesize]
//!     -> synthesized queue -> [egress] -> client
//! ```
//!
//! Stages exit on queue closure (orderly end-of-stream) or on the shared
//! cancellation signal. A broken recognition stream or a failed client
//! write closes the whole session; a failed translation or synthesis call
//! only skips that utterance.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::audio::{samples_for_duration, BYTES_PER_SAMPLE, CHANNELS, SAMPLE_RATE};
use crate::config::PipelineConfig;
use crate::context::{ContextRegistry, ConversationContext};
use crate::engines::language::voice_for_language;
use crate::engines::{
    AudioChunk, ClientSink, RecognitionConfig, RecognitionSink, RecognitionSource,
    SynthesisRequest, SynthesizedAudio, Synthesizer, Transcript, Translation,
    TranslationRequest, Translator,
};
use crate::session::registry::{EngineSet, Session};
use crate::state::AppState;

/// Resolves once the session's cancellation signal fires. Also resolves if
/// the signal's sender is gone, since a session that dropped its handle can
/// never be resumed.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            return;
        }
    }
}

/// Runs one session's pipeline to completion. Spawned by the registry;
/// returns only after all five stages have exited.
#[allow(clippy::too_many_arguments)]
pub(super) async fn run(
    session: Arc<Session>,
    audio_rx: mpsc::Receiver<Vec<u8>>,
    cancel: watch::Receiver<bool>,
    engines: EngineSet,
    sink: Arc<dyn ClientSink>,
    contexts: Arc<ContextRegistry>,
    state: AppState,
    config: PipelineConfig,
) {
    let (source_language, _) = session.languages();
    let recognition_config = RecognitionConfig {
        session_id: session.id.clone(),
        language_codes: vec![source_language],
        sample_rate: SAMPLE_RATE,
        enable_punctuation: true,
        interim_results: true,
    };

    let mut open_cancel = cancel.clone();
    let opened = tokio::select! {
        _ = cancelled(&mut open_cancel) => None,
        result = engines.recognizer.open(recognition_config) => Some(result),
    };
    let (asr_sink, asr_source) = match opened {
        Some(Ok(halves)) => halves,
        Some(Err(e)) => {
            error!(session_id = %session.id, error = %e, "failed to open recognition stream");
            session.close();
            state.session_ended();
            return;
        }
        None => {
            state.session_ended();
            return;
        }
    };

    info!(session_id = %session.id, "pipeline started");

    let (transcript_tx, transcript_rx) = mpsc::channel(config.transcript_queue);
    let (translated_tx, translated_rx) = mpsc::channel(config.translation_queue);
    let (synth_tx, synth_rx) = mpsc::channel(config.synthesized_queue);
    let frame_bytes = samples_for_duration(config.frame_ms) * BYTES_PER_SAMPLE as usize;

    let stages = [
        tokio::spawn(forward_audio(
            Arc::clone(&session),
            audio_rx,
            asr_sink,
            cancel.clone(),
        )),
        tokio::spawn(receive_transcripts(
            Arc::clone(&session),
            asr_source,
            transcript_tx,
            cancel.clone(),
        )),
        tokio::spawn(translate_stage(
            Arc::clone(&session),
            engines.translator,
            contexts.get(&session.id),
            transcript_rx,
            translated_tx,
            cancel.clone(),
        )),
        tokio::spawn(synthesize_stage(
            Arc::clone(&session),
            engines.synthesizer,
            state.clone(),
            translated_rx,
            synth_tx,
            cancel.clone(),
            frame_bytes,
        )),
        tokio::spawn(egress_stage(
            Arc::clone(&session),
            sink,
            synth_rx,
            cancel,
        )),
    ];

    for stage in stages {
        let _ = stage.await;
    }

    info!(session_id = %session.id, "pipeline stopped");
    state.session_ended();
}

/// Stage 1: drain the session's audio queue into the recognition stream.
/// Queue closure half-closes the stream so the engine can flush trailing
/// results; a send failure is a stream fault and closes the session.
async fn forward_audio(
    session: Arc<Session>,
    mut audio_rx: mpsc::Receiver<Vec<u8>>,
    mut asr_sink: Box<dyn RecognitionSink>,
    mut cancel: watch::Receiver<bool>,
) {
    loop {
        let chunk = tokio::select! {
            _ = cancelled(&mut cancel) => None,
            chunk = audio_rx.recv() => chunk,
        };
        let Some(data) = chunk else {
            if let Err(e) = asr_sink.close_send().await {
                debug!(session_id = %session.id, error = %e, "half-closing recognition stream");
            }
            return;
        };

        let chunk = AudioChunk {
            data,
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
        };
        let sent = tokio::select! {
            _ = cancelled(&mut cancel) => return,
            result = asr_sink.send(chunk) => result,
        };
        if let Err(e) = sent {
            error!(session_id = %session.id, error = %e, "forwarding audio to recognition");
            session.close();
            return;
        }
    }
}

/// Stage 2: read recognition results and emit transcripts. End-of-stream is
/// orderly; any other stream error cancels the whole pipeline.
async fn receive_transcripts(
    session: Arc<Session>,
    mut asr_source: Box<dyn RecognitionSource>,
    transcript_tx: mpsc::Sender<Transcript>,
    mut cancel: watch::Receiver<bool>,
) {
    loop {
        let received = tokio::select! {
            _ = cancelled(&mut cancel) => return,
            received = asr_source.recv() => received,
        };
        let response = match received {
            Ok(Some(response)) => response,
            Ok(None) => {
                debug!(session_id = %session.id, "recognition stream ended");
                return;
            }
            Err(e) => {
                if !*cancel.borrow() {
                    error!(session_id = %session.id, error = %e, "recognition stream failed");
                    session.close();
                }
                return;
            }
        };

        for result in response.results {
            // Results with no alternatives carry nothing usable.
            let Some(top) = result.alternatives.first() else {
                continue;
            };
            let transcript = Transcript {
                text: top.transcript.clone(),
                is_final: result.is_final,
                stability: result.stability,
                language: result.language_code.clone(),
            };
            debug!(
                session_id = %session.id,
                is_final = transcript.is_final,
                chars = transcript.text.len(),
                "transcript received"
            );

            let sent = tokio::select! {
                _ = cancelled(&mut cancel) => return,
                sent = transcript_tx.send(transcript) => sent,
            };
            if sent.is_err() {
                return;
            }
        }
    }
}

/// Stage 3: translate transcripts. A failed call skips the utterance; only
/// final utterances enter the conversation context.
async fn translate_stage(
    session: Arc<Session>,
    translator: Arc<dyn Translator>,
    context: Arc<ConversationContext>,
    mut transcript_rx: mpsc::Receiver<Transcript>,
    translated_tx: mpsc::Sender<Translation>,
    mut cancel: watch::Receiver<bool>,
) {
    loop {
        let transcript = tokio::select! {
            _ = cancelled(&mut cancel) => return,
            transcript = transcript_rx.recv() => match transcript {
                Some(transcript) => transcript,
                None => return,
            },
        };
        if transcript.text.trim().is_empty() {
            continue;
        }

        // Read per utterance: the pair may be renegotiated by a second
        // handshake until the first audio frame arrives.
        let (source_language, target_language) = session.languages();
        let detected = if transcript.language.is_empty() {
            source_language
        } else {
            transcript.language.clone()
        };
        let request = TranslationRequest {
            session_id: session.id.clone(),
            text: transcript.text.clone(),
            source_language: detected.clone(),
            target_language: target_language.clone(),
            is_final: transcript.is_final,
            context: context.recent_originals(),
        };

        let result = tokio::select! {
            _ = cancelled(&mut cancel) => return,
            result = translator.translate(request) => result,
        };
        let translated = match result {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                warn!(
                    session_id = %session.id,
                    error = %e,
                    "translation failed, skipping utterance"
                );
                continue;
            }
        };
        if translated.is_empty() {
            continue;
        }

        if transcript.is_final {
            context.add(&transcript.text, &translated, &detected, &target_language);
        }

        let message = Translation {
            text: translated,
            is_final: transcript.is_final,
        };
        let sent = tokio::select! {
            _ = cancelled(&mut cancel) => return,
            sent = translated_tx.send(message) => sent,
        };
        if sent.is_err() {
            return;
        }
    }
}

/// Stage 4: synthesize translations and slice the returned PCM into
/// fixed-duration delivery frames, marking the utterance's last frame.
async fn synthesize_stage(
    session: Arc<Session>,
    synthesizer: Arc<dyn Synthesizer>,
    state: AppState,
    mut translated_rx: mpsc::Receiver<Translation>,
    synth_tx: mpsc::Sender<SynthesizedAudio>,
    mut cancel: watch::Receiver<bool>,
    frame_bytes: usize,
) {
    loop {
        let translation = tokio::select! {
            _ = cancelled(&mut cancel) => return,
            translation = translated_rx.recv() => match translation {
                Some(translation) => translation,
                None => return,
            },
        };
        if translation.text.trim().is_empty() {
            continue;
        }

        let (_, target_language) = session.languages();
        let request = SynthesisRequest {
            session_id: session.id.clone(),
            text: translation.text,
            language_code: target_language.clone(),
            voice_name: voice_for_language(&target_language).map(str::to_string),
            speaking_rate: None,
            pitch: None,
        };
        let result = tokio::select! {
            _ = cancelled(&mut cancel) => return,
            result = synthesizer.synthesize(request) => result,
        };
        let audio = match result {
            Ok(audio) => audio,
            Err(e) => {
                warn!(
                    session_id = %session.id,
                    error = %e,
                    "synthesis failed, skipping utterance"
                );
                continue;
            }
        };
        if audio.is_empty() {
            continue;
        }

        let frame_count = audio.len().div_ceil(frame_bytes);
        for (index, frame) in audio.chunks(frame_bytes).enumerate() {
            let message = SynthesizedAudio {
                data: frame.to_vec(),
                is_final: translation.is_final && index + 1 == frame_count,
            };
            let sent = tokio::select! {
                _ = cancelled(&mut cancel) => return,
                sent = synth_tx.send(message) => sent,
            };
            if sent.is_err() {
                return;
            }
        }
        state.record_synthesized_frames(frame_count as u64);
    }
}

/// Stage 5: deliver synthesized frames to the client in arrival order. A
/// write failure means the connection is dead and closes the session.
async fn egress_stage(
    session: Arc<Session>,
    sink: Arc<dyn ClientSink>,
    mut synth_rx: mpsc::Receiver<SynthesizedAudio>,
    mut cancel: watch::Receiver<bool>,
) {
    loop {
        let frame = tokio::select! {
            _ = cancelled(&mut cancel) => return,
            frame = synth_rx.recv() => match frame {
                Some(frame) => frame,
                None => return,
            },
        };

        let sent = tokio::select! {
            _ = cancelled(&mut cancel) => return,
            sent = sink.send_audio(frame) => sent,
        };
        if let Err(e) = sent {
            error!(session_id = %session.id, error = %e, "client write failed");
            session.close();
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::engines::{
        EngineError, RecognitionAlternative, RecognitionResponse, RecognitionResult,
        StreamingRecognizer,
    };
    use crate::session::registry::SessionRegistry;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::{Notify, Semaphore};

    /// Recognition engine double: records forwarded audio, emits scripted
    /// responses from a channel the test feeds. A zero-permit gate makes the
    /// send half block so backpressure can be exercised.
    struct ScriptedRecognizer {
        responses: Mutex<Option<mpsc::Receiver<Result<RecognitionResponse, EngineError>>>>,
        sent: Arc<Mutex<Vec<AudioChunk>>>,
        gate: Arc<Semaphore>,
        send_attempts: Arc<AtomicUsize>,
    }

    impl ScriptedRecognizer {
        fn new(
            responses: mpsc::Receiver<Result<RecognitionResponse, EngineError>>,
            gate: Arc<Semaphore>,
        ) -> Self {
            Self {
                responses: Mutex::new(Some(responses)),
                sent: Arc::new(Mutex::new(Vec::new())),
                gate,
                send_attempts: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl StreamingRecognizer for ScriptedRecognizer {
        async fn open(
            &self,
            _config: RecognitionConfig,
        ) -> Result<(Box<dyn RecognitionSink>, Box<dyn RecognitionSource>), EngineError> {
            let responses = self
                .responses
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| EngineError::Connection("stream already opened".into()))?;
            Ok((
                Box::new(ScriptedSink {
                    sent: Arc::clone(&self.sent),
                    gate: Arc::clone(&self.gate),
                    attempts: Arc::clone(&self.send_attempts),
                }),
                Box::new(ScriptedSource { responses }),
            ))
        }
    }

    struct ScriptedSink {
        sent: Arc<Mutex<Vec<AudioChunk>>>,
        gate: Arc<Semaphore>,
        attempts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RecognitionSink for ScriptedSink {
        async fn send(&mut self, chunk: AudioChunk) -> Result<(), EngineError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|_| EngineError::Stream("gate closed".into()))?;
            permit.forget();
            self.sent.lock().unwrap().push(chunk);
            Ok(())
        }

        async fn close_send(&mut self) -> Result<(), EngineError> {
            Ok(())
        }
    }

    struct ScriptedSource {
        responses: mpsc::Receiver<Result<RecognitionResponse, EngineError>>,
    }

    #[async_trait]
    impl RecognitionSource for ScriptedSource {
        async fn recv(&mut self) -> Result<Option<RecognitionResponse>, EngineError> {
            match self.responses.recv().await {
                Some(Ok(response)) => Ok(Some(response)),
                Some(Err(e)) => Err(e),
                None => Ok(None),
            }
        }
    }

    /// Translation double: scripted replies first, then echoes with a marker.
    struct ScriptedTranslator {
        replies: Mutex<VecDeque<Result<String, EngineError>>>,
        requests: Arc<Mutex<Vec<TranslationRequest>>>,
    }

    impl ScriptedTranslator {
        fn new(replies: Vec<Result<String, EngineError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                requests: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl Translator for ScriptedTranslator {
        async fn translate(&self, request: TranslationRequest) -> Result<String, EngineError> {
            let text = request.text.clone();
            self.requests.lock().unwrap().push(request);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(format!("t:{}", text)))
        }
    }

    /// Synthesis double: fixed-size PCM per call, optionally blocking
    /// forever so cancellation mid-engine-call can be observed via the
    /// dropped-future signal.
    struct ScriptedSynthesizer {
        output_len: usize,
        requests: Arc<Mutex<Vec<SynthesisRequest>>>,
        block: bool,
        call_dropped: Arc<Notify>,
    }

    impl ScriptedSynthesizer {
        fn new(output_len: usize) -> Self {
            Self {
                output_len,
                requests: Arc::new(Mutex::new(Vec::new())),
                block: false,
                call_dropped: Arc::new(Notify::new()),
            }
        }

        fn blocking() -> Self {
            Self {
                block: true,
                ..Self::new(0)
            }
        }
    }

    struct DropSignal(Arc<Notify>);

    impl Drop for DropSignal {
        fn drop(&mut self) {
            self.0.notify_waiters();
        }
    }

    #[async_trait]
    impl Synthesizer for ScriptedSynthesizer {
        async fn synthesize(&self, request: SynthesisRequest) -> Result<Vec<u8>, EngineError> {
            self.requests.lock().unwrap().push(request);
            if self.block {
                let _signal = DropSignal(Arc::clone(&self.call_dropped));
                std::future::pending::<()>().await;
            }
            Ok(vec![0xAB; self.output_len])
        }
    }

    /// Client-side delivery double.
    #[derive(Default)]
    struct RecordingSink {
        frames: Mutex<Vec<SynthesizedAudio>>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl ClientSink for RecordingSink {
        async fn send_audio(&self, frame: SynthesizedAudio) -> Result<(), EngineError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(EngineError::Call("connection closed".into()));
            }
            self.frames.lock().unwrap().push(frame);
            Ok(())
        }
    }

    async fn wait_until(what: &str, condition: impl Fn() -> bool) {
        let deadline = tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        });
        deadline.await.unwrap_or_else(|_| panic!("timed out waiting for {}", what));
    }

    fn final_result(text: &str) -> RecognitionResponse {
        RecognitionResponse {
            results: vec![RecognitionResult {
                is_final: true,
                stability: 0.9,
                language_code: "en-US".into(),
                alternatives: vec![RecognitionAlternative {
                    transcript: text.into(),
                    confidence: 0.95,
                }],
            }],
        }
    }

    fn interim_result(text: &str) -> RecognitionResponse {
        RecognitionResponse {
            results: vec![RecognitionResult {
                is_final: false,
                stability: 0.4,
                language_code: String::new(),
                alternatives: vec![RecognitionAlternative {
                    transcript: text.into(),
                    confidence: 0.5,
                }],
            }],
        }
    }

    struct Harness {
        registry: SessionRegistry,
        state: AppState,
        contexts: Arc<ContextRegistry>,
    }

    fn harness(config: AppConfig, engines: EngineSet) -> Harness {
        let state = AppState::new(config);
        let contexts = Arc::new(ContextRegistry::new());
        Harness {
            registry: SessionRegistry::new(engines, Arc::clone(&contexts), state.clone()),
            state,
            contexts,
        }
    }

    // 100ms at 16kHz 16-bit mono
    const CHUNK: usize = 3200;

    #[tokio::test]
    async fn test_end_to_end_translated_audio_reaches_client() {
        let (resp_tx, resp_rx) = mpsc::channel(16);
        let recognizer = Arc::new(ScriptedRecognizer::new(resp_rx, Arc::new(Semaphore::new(1000))));
        let translator = Arc::new(ScriptedTranslator::new(vec![Ok("hola".into())]));
        // One and a half delivery frames of output.
        let synthesizer = Arc::new(ScriptedSynthesizer::new(CHUNK + CHUNK / 2));
        let sink = Arc::new(RecordingSink::default());

        let h = harness(
            AppConfig::default(),
            EngineSet {
                recognizer: recognizer.clone(),
                translator: translator.clone(),
                synthesizer: synthesizer.clone(),
            },
        );
        let session = h.registry.create("en-US", "es-ES", sink.clone()).unwrap();

        session.process_audio(&[0u8; CHUNK]);
        let sent = Arc::clone(&recognizer.sent);
        wait_until("audio forwarded to recognition", || {
            sent.lock().unwrap().len() == 1
        })
        .await;

        // A result with no alternatives is skipped without output.
        resp_tx
            .send(Ok(RecognitionResponse {
                results: vec![RecognitionResult {
                    is_final: false,
                    stability: 0.0,
                    language_code: String::new(),
                    alternatives: vec![],
                }],
            }))
            .await
            .unwrap();
        resp_tx.send(Ok(final_result("hello there"))).await.unwrap();

        wait_until("synthesized audio delivered", || {
            sink.frames.lock().unwrap().len() == 2
        })
        .await;

        let translation_requests = translator.requests.lock().unwrap();
        assert_eq!(translation_requests.len(), 1);
        assert_eq!(translation_requests[0].text, "hello there");
        assert_eq!(translation_requests[0].source_language, "en-US");
        assert_eq!(translation_requests[0].target_language, "es-ES");
        assert!(translation_requests[0].context.is_empty());

        let synthesis_requests = synthesizer.requests.lock().unwrap();
        assert_eq!(synthesis_requests.len(), 1);
        assert_eq!(synthesis_requests[0].text, "hola");
        assert_eq!(synthesis_requests[0].language_code, "es-ES");
        assert_eq!(
            synthesis_requests[0].voice_name.as_deref(),
            Some("es-ES-Neural2-B")
        );

        let frames = sink.frames.lock().unwrap();
        assert_eq!(frames[0].data.len(), CHUNK);
        assert!(!frames[0].is_final);
        assert_eq!(frames[1].data.len(), CHUNK / 2);
        assert!(frames[1].is_final);
        drop(frames);

        // The final utterance entered the context window.
        assert_eq!(
            h.contexts.get(&session.id).recent_originals(),
            vec!["hello there"]
        );

        h.registry.remove(&session.id);
        let state = h.state.clone();
        wait_until("pipeline wound down", || {
            state.get_metrics().active_sessions == 0
        })
        .await;
    }

    #[tokio::test]
    async fn test_translation_failure_skips_utterance_only() {
        let (resp_tx, resp_rx) = mpsc::channel(16);
        let recognizer = Arc::new(ScriptedRecognizer::new(resp_rx, Arc::new(Semaphore::new(1000))));
        let translator = Arc::new(ScriptedTranslator::new(vec![
            Err(EngineError::Call("model overloaded".into())),
            Ok("hola".into()),
        ]));
        let synthesizer = Arc::new(ScriptedSynthesizer::new(CHUNK));
        let sink = Arc::new(RecordingSink::default());

        let h = harness(
            AppConfig::default(),
            EngineSet {
                recognizer,
                translator: translator.clone(),
                synthesizer,
            },
        );
        let session = h.registry.create("en-US", "es-ES", sink.clone()).unwrap();

        resp_tx.send(Ok(interim_result("hel"))).await.unwrap();
        resp_tx.send(Ok(final_result("hello there"))).await.unwrap();

        wait_until("audio for the surviving utterance", || {
            !sink.frames.lock().unwrap().is_empty()
        })
        .await;

        assert!(!session.is_closed());
        assert_eq!(translator.requests.lock().unwrap().len(), 2);
        // Only the second utterance produced audio.
        let frames = sink.frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_final);
        drop(frames);

        h.registry.remove(&session.id);
    }

    #[tokio::test]
    async fn test_renegotiated_languages_reach_engines() {
        let (resp_tx, resp_rx) = mpsc::channel(16);
        let recognizer = Arc::new(ScriptedRecognizer::new(resp_rx, Arc::new(Semaphore::new(1000))));
        let translator = Arc::new(ScriptedTranslator::new(vec![Ok("bonjour".into())]));
        let synthesizer = Arc::new(ScriptedSynthesizer::new(CHUNK));
        let sink = Arc::new(RecordingSink::default());

        let h = harness(
            AppConfig::default(),
            EngineSet {
                recognizer,
                translator: translator.clone(),
                synthesizer: synthesizer.clone(),
            },
        );
        let session = h.registry.create("en-US", "es-ES", sink.clone()).unwrap();

        // Second handshake before any audio: the pair may still change, and
        // the running stages must pick it up.
        session.set_languages("en-US", "fr-FR").unwrap();

        resp_tx.send(Ok(final_result("hello there"))).await.unwrap();
        wait_until("audio delivered", || {
            !sink.frames.lock().unwrap().is_empty()
        })
        .await;

        let translation_requests = translator.requests.lock().unwrap();
        assert_eq!(translation_requests[0].target_language, "fr-FR");
        drop(translation_requests);

        let synthesis_requests = synthesizer.requests.lock().unwrap();
        assert_eq!(synthesis_requests[0].language_code, "fr-FR");
        assert_eq!(
            synthesis_requests[0].voice_name.as_deref(),
            Some("fr-FR-Neural2-B")
        );
        drop(synthesis_requests);

        h.registry.remove(&session.id);
    }

    #[tokio::test]
    async fn test_audio_overflow_drops_without_stalling() {
        let mut config = AppConfig::default();
        config.pipeline.audio_queue = 8;
        let (_resp_tx, resp_rx) = mpsc::channel(16);
        // Zero permits: the forwarder blocks inside the engine send.
        let gate = Arc::new(Semaphore::new(0));
        let recognizer = Arc::new(ScriptedRecognizer::new(resp_rx, Arc::clone(&gate)));
        let sink = Arc::new(RecordingSink::default());

        let h = harness(
            config,
            EngineSet {
                recognizer: recognizer.clone(),
                translator: Arc::new(ScriptedTranslator::new(vec![])),
                synthesizer: Arc::new(ScriptedSynthesizer::new(CHUNK)),
            },
        );
        let session = h.registry.create("en-US", "es-ES", sink).unwrap();

        // First chunk is pulled off the queue and parked in the blocked send.
        session.process_audio(&[0u8; CHUNK]);
        let attempts = Arc::clone(&recognizer.send_attempts);
        wait_until("forwarder blocked in engine send", || {
            attempts.load(Ordering::SeqCst) == 1
        })
        .await;

        // 13 more chunks against a capacity-8 queue: exactly 5 must drop.
        for _ in 0..13 {
            session.process_audio(&[0u8; CHUNK]);
        }
        assert_eq!(session.dropped_chunks(), 5);
        assert_eq!(h.state.get_metrics().dropped_audio_chunks, 5);
        assert!(!session.is_closed());

        // Unblock the engine; everything that was queued still flows.
        gate.add_permits(1000);
        let sent = Arc::clone(&recognizer.sent);
        wait_until("queued chunks forwarded", || sent.lock().unwrap().len() == 9).await;

        h.registry.remove(&session.id);
    }

    #[tokio::test]
    async fn test_recognition_stream_error_cancels_pipeline() {
        let (resp_tx, resp_rx) = mpsc::channel(16);
        let recognizer = Arc::new(ScriptedRecognizer::new(resp_rx, Arc::new(Semaphore::new(1000))));
        let sink = Arc::new(RecordingSink::default());

        let h = harness(
            AppConfig::default(),
            EngineSet {
                recognizer,
                translator: Arc::new(ScriptedTranslator::new(vec![])),
                synthesizer: Arc::new(ScriptedSynthesizer::new(CHUNK)),
            },
        );
        let session = h.registry.create("en-US", "es-ES", sink).unwrap();

        resp_tx
            .send(Err(EngineError::Stream("connection reset".into())))
            .await
            .unwrap();

        let closing = Arc::clone(&session);
        wait_until("session closed by stream fault", || closing.is_closed()).await;
        let state = h.state.clone();
        wait_until("all stages exited", || {
            state.get_metrics().active_sessions == 0
        })
        .await;
    }

    #[tokio::test]
    async fn test_recognition_stream_end_is_orderly() {
        let (resp_tx, resp_rx) = mpsc::channel(16);
        let recognizer = Arc::new(ScriptedRecognizer::new(resp_rx, Arc::new(Semaphore::new(1000))));
        let sink = Arc::new(RecordingSink::default());

        let h = harness(
            AppConfig::default(),
            EngineSet {
                recognizer,
                translator: Arc::new(ScriptedTranslator::new(vec![Ok("hola".into())])),
                synthesizer: Arc::new(ScriptedSynthesizer::new(CHUNK)),
            },
        );
        let session = h.registry.create("en-US", "es-ES", sink.clone()).unwrap();

        resp_tx.send(Ok(final_result("hello there"))).await.unwrap();
        // End of stream: in-flight work still drains, session stays open.
        drop(resp_tx);

        wait_until("drained audio delivered", || {
            !sink.frames.lock().unwrap().is_empty()
        })
        .await;
        assert!(!session.is_closed());

        h.registry.remove(&session.id);
    }

    #[tokio::test]
    async fn test_client_write_failure_closes_session() {
        let (resp_tx, resp_rx) = mpsc::channel(16);
        let recognizer = Arc::new(ScriptedRecognizer::new(resp_rx, Arc::new(Semaphore::new(1000))));
        let sink = Arc::new(RecordingSink::default());
        sink.fail.store(true, Ordering::SeqCst);

        let h = harness(
            AppConfig::default(),
            EngineSet {
                recognizer,
                translator: Arc::new(ScriptedTranslator::new(vec![Ok("hola".into())])),
                synthesizer: Arc::new(ScriptedSynthesizer::new(CHUNK)),
            },
        );
        let session = h.registry.create("en-US", "es-ES", sink).unwrap();

        resp_tx.send(Ok(final_result("hello there"))).await.unwrap();

        let closing = Arc::clone(&session);
        wait_until("session closed by write fault", || closing.is_closed()).await;
        let state = h.state.clone();
        wait_until("all stages exited", || {
            state.get_metrics().active_sessions == 0
        })
        .await;
    }

    #[tokio::test]
    async fn test_cancellation_unblocks_engine_call() {
        let (resp_tx, resp_rx) = mpsc::channel(16);
        let recognizer = Arc::new(ScriptedRecognizer::new(resp_rx, Arc::new(Semaphore::new(1000))));
        let synthesizer = Arc::new(ScriptedSynthesizer::blocking());
        let sink = Arc::new(RecordingSink::default());

        let h = harness(
            AppConfig::default(),
            EngineSet {
                recognizer,
                translator: Arc::new(ScriptedTranslator::new(vec![Ok("hola".into())])),
                synthesizer: synthesizer.clone(),
            },
        );
        let session = h.registry.create("en-US", "es-ES", sink).unwrap();

        resp_tx.send(Ok(final_result("hello there"))).await.unwrap();
        let requests = Arc::clone(&synthesizer.requests);
        wait_until("pipeline parked inside synthesis call", || {
            requests.lock().unwrap().len() == 1
        })
        .await;

        let dropped = Arc::clone(&synthesizer.call_dropped);
        let observed = dropped.notified();
        tokio::pin!(observed);
        observed.as_mut().enable();

        h.registry.remove(&session.id);

        tokio::time::timeout(Duration::from_secs(5), observed)
            .await
            .expect("blocked synthesis call was not cancelled");
        let state = h.state.clone();
        wait_until("all stages exited", || {
            state.get_metrics().active_sessions == 0
        })
        .await;
    }
}
