//! # Conversation Context
//!
//! Per-session sliding window of recent utterances. The translation stage
//! reads the window back as plain-text hints so the engine keeps names,
//! register, and phrasing consistent across a conversation. Only final
//! transcripts are appended; interim results are too unstable to bias with.
//!
//! ## Thread Safety:
//! Both the window and the registry use a read-mostly RwLock discipline:
//! concurrent reads from pipeline stages, exclusive writes on append and
//! create/remove.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Maximum utterances retained per session.
pub const MAX_CONTEXT_SIZE: usize = 5;

/// One complete spoken unit paired with its translation.
#[derive(Debug, Clone)]
pub struct Utterance {
    pub original: String,
    pub translated: String,
    pub source_lang: String,
    pub target_lang: String,
}

/// Capacity-bounded window of recent utterances for one session.
pub struct ConversationContext {
    utterances: RwLock<Vec<Utterance>>,
    max_size: usize,
}

impl ConversationContext {
    pub fn new() -> Self {
        Self::with_capacity(MAX_CONTEXT_SIZE)
    }

    pub fn with_capacity(max_size: usize) -> Self {
        Self {
            utterances: RwLock::new(Vec::with_capacity(max_size)),
            max_size,
        }
    }

    /// Append an utterance, evicting from the front until the window fits.
    pub fn add(&self, original: &str, translated: &str, source_lang: &str, target_lang: &str) {
        let mut utterances = self.utterances.write().unwrap();

        utterances.push(Utterance {
            original: original.to_string(),
            translated: translated.to_string(),
            source_lang: source_lang.to_string(),
            target_lang: target_lang.to_string(),
        });

        if utterances.len() > self.max_size {
            let excess = utterances.len() - self.max_size;
            utterances.drain(..excess);
        }
    }

    /// Original texts only, oldest first — the translation engine's hints.
    pub fn recent_originals(&self) -> Vec<String> {
        self.utterances
            .read()
            .unwrap()
            .iter()
            .map(|u| u.original.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.utterances.write().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.utterances.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ConversationContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Directory of per-session contexts, keyed by session id.
///
/// Contexts are created lazily on first lookup and removed explicitly by the
/// connection handler on teardown; nothing here is tied to Session drop.
pub struct ContextRegistry {
    sessions: RwLock<HashMap<String, Arc<ConversationContext>>>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Get the context for a session, creating it on first use.
    ///
    /// Double-checked locking: an optimistic read serves the common case,
    /// and the write-lock path re-checks so concurrent first accesses never
    /// create duplicate contexts.
    pub fn get(&self, session_id: &str) -> Arc<ConversationContext> {
        if let Some(ctx) = self.sessions.read().unwrap().get(session_id) {
            return Arc::clone(ctx);
        }

        let mut sessions = self.sessions.write().unwrap();
        if let Some(ctx) = sessions.get(session_id) {
            return Arc::clone(ctx);
        }

        let ctx = Arc::new(ConversationContext::new());
        sessions.insert(session_id.to_string(), Arc::clone(&ctx));
        ctx
    }

    /// Drop a session's context. Idempotent.
    pub fn remove(&self, session_id: &str) {
        self.sessions.write().unwrap().remove(session_id);
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ContextRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_is_never_exceeded() {
        let ctx = ConversationContext::new();
        for i in 0..12 {
            ctx.add(&format!("original {}", i), "x", "en-US", "es-ES");
        }
        assert_eq!(ctx.len(), MAX_CONTEXT_SIZE);
    }

    #[test]
    fn test_eviction_keeps_newest_in_order() {
        let ctx = ConversationContext::with_capacity(3);
        for i in 0..7 {
            ctx.add(&format!("u{}", i), "", "en-US", "es-ES");
        }
        // Exactly the last `capacity` originals, oldest first.
        assert_eq!(ctx.recent_originals(), vec!["u4", "u5", "u6"]);
    }

    #[test]
    fn test_clear_empties_window() {
        let ctx = ConversationContext::new();
        ctx.add("hello", "hola", "en-US", "es-ES");
        assert_eq!(ctx.len(), 1);
        ctx.clear();
        assert!(ctx.is_empty());
    }

    #[test]
    fn test_registry_creates_on_first_use() {
        let registry = ContextRegistry::new();
        let a = registry.get("sess-1");
        a.add("hi", "hola", "en-US", "es-ES");

        // Second lookup returns the same context, not a fresh one.
        let b = registry.get("sess-1");
        assert_eq!(b.len(), 1);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_registry_remove_is_explicit_and_idempotent() {
        let registry = ContextRegistry::new();
        registry.get("sess-1");
        assert_eq!(registry.len(), 1);

        registry.remove("sess-1");
        registry.remove("sess-1");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_first_access_creates_one_context() {
        let registry = Arc::new(ContextRegistry::new());
        let mut handles = Vec::new();

        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(std::thread::spawn(move || registry.get("shared")));
        }

        let contexts: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for ctx in &contexts[1..] {
            assert!(Arc::ptr_eq(&contexts[0], ctx));
        }
    }
}
