//! # Session Registry
//!
//! ## Session Lifecycle:
//! 1. The WebSocket handshake names a language pair
//! 2. `SessionRegistry::create` registers the session and spawns its pipeline
//! 3. Binary frames flow through `Session::process_audio` (never blocking)
//! 4. Disconnect or fatal pipeline fault calls `remove`, which closes the
//!    session and evicts it — idempotent in both directions
//!
//! ## Concurrency model
//! The id map is read-mostly: lookups take the read lock, create/remove take
//! the write lock. Session internals needed on the hot path (closed flag,
//! drop counter) are atomics so `process_audio` never waits on the map.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audio::ring::AudioRingBuffer;
use crate::audio::{samples_for_duration, BYTES_PER_SAMPLE, SAMPLE_RATE};
use crate::context::ContextRegistry;
use crate::engines::{ClientSink, StreamingRecognizer, Synthesizer, Translator};
use crate::error::{AppError, AppResult};
use crate::session::pipeline;
use crate::state::AppState;

/// The three engine clients a pipeline talks to, shared across sessions.
#[derive(Clone)]
pub struct EngineSet {
    pub recognizer: Arc<dyn StreamingRecognizer>,
    pub translator: Arc<dyn Translator>,
    pub synthesizer: Arc<dyn Synthesizer>,
}

/// One client's translation session.
///
/// The inbound audio path is deliberately lossy: network reads must never
/// stall behind a slow pipeline. Bytes land in a ring buffer, are re-framed
/// into fixed-duration chunks, and are offered to the pipeline queue with
/// `try_send`; a full queue drops the chunk and bumps a counter.
pub struct Session {
    pub id: String,
    languages: RwLock<(String, String)>,
    audio_tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    ring: AudioRingBuffer,
    chunk_bytes: usize,
    cancel: watch::Sender<bool>,
    closed: AtomicBool,
    audio_seen: AtomicBool,
    dropped_chunks: AtomicU64,
    state: AppState,
}

impl Session {
    /// The session's (source, target) language pair.
    pub fn languages(&self) -> (String, String) {
        self.languages.read().unwrap().clone()
    }

    /// Renegotiate the language pair. Only allowed before the first audio
    /// frame; the recognition stream is configured from the pair at pipeline
    /// start and cannot change mid-stream.
    pub fn set_languages(&self, source: &str, target: &str) -> AppResult<()> {
        if self.audio_seen.load(Ordering::SeqCst) {
            return Err(AppError::Session(
                "language pair cannot change after audio has been received".into(),
            ));
        }
        *self.languages.write().unwrap() = (source.to_string(), target.to_string());
        Ok(())
    }

    /// Accept one inbound audio payload. Non-blocking: overflow is dropped
    /// with a warning, never an error to the caller.
    pub fn process_audio(&self, data: &[u8]) {
        if self.closed.load(Ordering::SeqCst) || data.is_empty() {
            return;
        }
        self.audio_seen.store(true, Ordering::SeqCst);

        let accepted = self.ring.write(data);
        if accepted < data.len() {
            warn!(
                session_id = %self.id,
                dropped_bytes = data.len() - accepted,
                "audio ring buffer full"
            );
        }

        // Re-frame into fixed chunks; a trailing partial stays buffered
        // until more audio arrives or the session closes.
        let tx = self.audio_tx.lock().unwrap();
        let Some(tx) = tx.as_ref() else { return };
        while self.ring.len() >= self.chunk_bytes {
            let chunk = self.ring.read(self.chunk_bytes);
            self.offer(tx, chunk);
        }
    }

    fn offer(&self, tx: &mpsc::Sender<Vec<u8>>, chunk: Vec<u8>) {
        match tx.try_send(chunk) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped_chunks.fetch_add(1, Ordering::SeqCst) + 1;
                self.state.record_dropped_audio_chunk();
                warn!(
                    session_id = %self.id,
                    total_dropped = dropped,
                    "audio queue full, dropping chunk"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(session_id = %self.id, "audio queue closed, discarding chunk");
            }
        }
    }

    /// Chunks dropped so far because the pipeline queue was full.
    pub fn dropped_chunks(&self) -> u64 {
        self.dropped_chunks.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close the session: flush any buffered partial chunk, end the audio
    /// input stream, and cancel the pipeline. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(tx) = self.audio_tx.lock().unwrap().take() {
            loop {
                let rest = self.ring.read(self.chunk_bytes);
                if rest.is_empty() {
                    break;
                }
                self.offer(&tx, rest);
            }
            // Dropping the sender closes the queue; the forwarder sees
            // end-of-input and half-closes the recognition stream.
        }
        self.ring.close();
        let _ = self.cancel.send(true);
        debug!(session_id = %self.id, "session closed");
    }
}

/// Directory of live sessions, keyed by generated id.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    engines: EngineSet,
    contexts: Arc<ContextRegistry>,
    state: AppState,
}

impl SessionRegistry {
    pub fn new(engines: EngineSet, contexts: Arc<ContextRegistry>, state: AppState) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            engines,
            contexts,
            state,
        }
    }

    /// Register a new session and start its pipeline. Ids are generated
    /// server-side, never accepted from the client.
    pub fn create(
        &self,
        source_language: &str,
        target_language: &str,
        sink: Arc<dyn ClientSink>,
    ) -> AppResult<Arc<Session>> {
        self.create_with_id(
            Uuid::new_v4().to_string(),
            source_language,
            target_language,
            sink,
        )
    }

    fn create_with_id(
        &self,
        id: String,
        source_language: &str,
        target_language: &str,
        sink: Arc<dyn ClientSink>,
    ) -> AppResult<Arc<Session>> {
        let config = self.state.get_config();
        let (audio_tx, audio_rx) = mpsc::channel(config.pipeline.audio_queue);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let chunk_bytes =
            samples_for_duration(config.pipeline.frame_ms) * BYTES_PER_SAMPLE as usize;
        let ring_capacity =
            (SAMPLE_RATE * BYTES_PER_SAMPLE) as usize * config.audio.ring_buffer_secs as usize;

        let session = Arc::new(Session {
            id: id.clone(),
            languages: RwLock::new((source_language.to_string(), target_language.to_string())),
            audio_tx: Mutex::new(Some(audio_tx)),
            ring: AudioRingBuffer::new(ring_capacity),
            chunk_bytes,
            cancel: cancel_tx,
            closed: AtomicBool::new(false),
            audio_seen: AtomicBool::new(false),
            dropped_chunks: AtomicU64::new(0),
            state: self.state.clone(),
        });

        {
            let mut sessions = self.sessions.write().unwrap();
            if sessions.len() >= config.performance.max_concurrent_sessions {
                return Err(AppError::Session(format!(
                    "session limit reached ({})",
                    config.performance.max_concurrent_sessions
                )));
            }
            if sessions.contains_key(&id) {
                return Err(AppError::Session(format!("session '{}' already exists", id)));
            }
            sessions.insert(id.clone(), Arc::clone(&session));
        }

        self.state.session_started();
        info!(
            session_id = %id,
            source_language,
            target_language,
            "session created"
        );

        tokio::spawn(pipeline::run(
            Arc::clone(&session),
            audio_rx,
            cancel_rx,
            self.engines.clone(),
            sink,
            Arc::clone(&self.contexts),
            self.state.clone(),
            config.pipeline,
        ));

        Ok(session)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().unwrap().get(id).map(Arc::clone)
    }

    /// Stop and evict a session, releasing its conversation context.
    /// Idempotent; removing an unknown id is a no-op.
    pub fn remove(&self, id: &str) {
        let removed = self.sessions.write().unwrap().remove(id);
        if let Some(session) = removed {
            session.close();
            self.contexts.remove(id);
            info!(session_id = %id, "session removed");
        }
    }

    pub fn active_count(&self) -> usize {
        self.sessions.read().unwrap().len()
    }
}
