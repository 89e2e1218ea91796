//! # Configuration Management
//!
//! Layered configuration: built-in defaults, then an optional
//! `config/default.toml`, then an environment-specific file selected by
//! `RUN_ENV`, then `APP_*` environment variables. Nesting in variable names
//! uses a double underscore so underscore-named keys stay addressable
//! (`APP_ENGINES__RECOGNIZER_URL` → `engines.recognizer_url`). `HOST` and
//! `PORT` are honored as plain variables on top for container platforms.
//!
//! Every load ends with `validate()`; a gateway with a zero-capacity queue
//! or an empty engine URL must fail at boot, not mid-session.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub engines: EnginesConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Endpoints and connection policy for the three external engines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnginesConfig {
    pub recognizer_url: String,
    pub translator_url: String,
    pub synthesizer_url: String,
    /// Attempts when opening a recognition stream at session start.
    pub connect_attempts: u32,
    /// Base backoff delay between attempts, in milliseconds.
    pub connect_base_delay_ms: u64,
}

impl Default for EnginesConfig {
    fn default() -> Self {
        Self {
            recognizer_url: "ws://localhost:9001/recognize".to_string(),
            translator_url: "ws://localhost:9002/translate".to_string(),
            synthesizer_url: "ws://localhost:9003/synthesize".to_string(),
            connect_attempts: 3,
            connect_base_delay_ms: 100,
        }
    }
}

/// Inbound audio handling. VAD is an inbound gate only: when enabled,
/// chunks with no detected speech are not forwarded to recognition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub vad_enabled: bool,
    /// RMS energy threshold for the speech gate.
    pub vad_threshold: f64,
    /// Sustained speech required before the gate opens, in milliseconds.
    pub vad_min_speech_ms: u32,
    /// Sustained silence required before the gate closes, in milliseconds.
    pub vad_min_silence_ms: u32,
    /// Per-session ring buffer capacity, in seconds of audio.
    pub ring_buffer_secs: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            vad_enabled: false,
            vad_threshold: 250.0,
            vad_min_speech_ms: 100,
            vad_min_silence_ms: 500,
            ring_buffer_secs: 30,
        }
    }
}

/// Stage queue capacities and delivery framing.
///
/// The audio queue is the only lossy one: when it is full, new chunks are
/// dropped rather than stalling the WebSocket reader. The text queues
/// apply backpressure instead, since transcripts are cheap to hold and
/// expensive to lose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub audio_queue: usize,
    pub transcript_queue: usize,
    pub translation_queue: usize,
    pub synthesized_queue: usize,
    /// Outbound audio frame duration, in milliseconds.
    pub frame_ms: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            audio_queue: 100,
            transcript_queue: 10,
            translation_queue: 10,
            synthesized_queue: 100,
            frame_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_sessions: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: 64,
        }
    }
}

impl AppConfig {
    /// Loads configuration from files and environment in layered order.
    pub fn load() -> Result<Self, ConfigError> {
        let run_env = std::env::var("RUN_ENV").unwrap_or_else(|_| "development".to_string());

        let mut builder = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_env)).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        // Container platforms commonly inject these two without a prefix.
        if let Ok(host) = std::env::var("HOST") {
            builder = builder.set_override("server.host", host)?;
        }
        if let Ok(port) = std::env::var("PORT") {
            builder = builder.set_override("server.port", port)?;
        }

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations the gateway cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Message("server.port must be non-zero".into()));
        }
        for (name, url) in [
            ("engines.recognizer_url", &self.engines.recognizer_url),
            ("engines.translator_url", &self.engines.translator_url),
            ("engines.synthesizer_url", &self.engines.synthesizer_url),
        ] {
            if url.is_empty() {
                return Err(ConfigError::Message(format!("{} must not be empty", name)));
            }
        }
        if self.engines.connect_attempts == 0 {
            return Err(ConfigError::Message(
                "engines.connect_attempts must be at least 1".into(),
            ));
        }
        for (name, size) in [
            ("pipeline.audio_queue", self.pipeline.audio_queue),
            ("pipeline.transcript_queue", self.pipeline.transcript_queue),
            ("pipeline.translation_queue", self.pipeline.translation_queue),
            ("pipeline.synthesized_queue", self.pipeline.synthesized_queue),
        ] {
            if size == 0 {
                return Err(ConfigError::Message(format!("{} must be non-zero", name)));
            }
        }
        if self.pipeline.frame_ms == 0 {
            return Err(ConfigError::Message("pipeline.frame_ms must be non-zero".into()));
        }
        if self.audio.ring_buffer_secs == 0 {
            return Err(ConfigError::Message(
                "audio.ring_buffer_secs must be non-zero".into(),
            ));
        }
        if self.performance.max_concurrent_sessions == 0 {
            return Err(ConfigError::Message(
                "performance.max_concurrent_sessions must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pipeline.audio_queue, 100);
        assert_eq!(config.pipeline.transcript_queue, 10);
        assert_eq!(config.pipeline.frame_ms, 100);
        assert!(!config.audio.vad_enabled);
    }

    #[test]
    fn test_env_overrides_reach_underscore_named_keys() {
        std::env::set_var(
            "APP_ENGINES__RECOGNIZER_URL",
            "ws://asr.internal:9100/recognize",
        );
        std::env::set_var("APP_PERFORMANCE__MAX_CONCURRENT_SESSIONS", "7");

        let config: AppConfig = Config::builder()
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.engines.recognizer_url, "ws://asr.internal:9100/recognize");
        assert_eq!(config.performance.max_concurrent_sessions, 7);

        std::env::remove_var("APP_ENGINES__RECOGNIZER_URL");
        std::env::remove_var("APP_PERFORMANCE__MAX_CONCURRENT_SESSIONS");
    }

    #[test]
    fn test_zero_queue_rejected() {
        let mut config = AppConfig::default();
        config.pipeline.transcript_queue = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_engine_url_rejected() {
        let mut config = AppConfig::default();
        config.engines.translator_url.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_session_limit_rejected() {
        let mut config = AppConfig::default();
        config.performance.max_concurrent_sessions = 0;
        assert!(config.validate().is_err());
    }
}
