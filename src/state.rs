//! # Application State Management
//!
//! Process-wide state shared across all HTTP workers and pipeline tasks:
//! the loaded configuration plus runtime metrics.
//!
//! ## Concurrency model
//!
//! `AppState` is cheap to clone — every field is behind an `Arc`. Metrics
//! sit behind a `std::sync::RwLock` because they are read-mostly (the
//! `/metrics` endpoint) with short uncontended writes from the hot paths.
//! Counters bumped from pipeline tasks must never block on I/O, so all
//! updates are plain in-memory increments.

use crate::config::AppConfig;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Shared application state, cloned into every worker and pipeline.
#[derive(Clone)]
pub struct AppState {
    config: Arc<RwLock<AppConfig>>,
    metrics: Arc<RwLock<AppMetrics>>,
    started_at: DateTime<Utc>,
}

/// Runtime counters reported by the health and metrics endpoints.
#[derive(Debug, Default, Clone, Serialize)]
pub struct AppMetrics {
    /// Total HTTP requests served.
    pub request_count: u64,
    /// Total HTTP error responses (4xx/5xx).
    pub error_count: u64,
    /// Sessions currently running a pipeline.
    pub active_sessions: u64,
    /// Sessions started since boot.
    pub sessions_started: u64,
    /// Inbound audio chunks dropped because a session's queue was full.
    pub dropped_audio_chunks: u64,
    /// Synthesized audio frames delivered toward clients.
    pub synthesized_frames: u64,
    /// Per-endpoint request statistics.
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub error_count: u64,
    pub total_duration_ms: u64,
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count == 0 {
            return 0.0;
        }
        self.total_duration_ms as f64 / self.request_count as f64
    }
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            started_at: Utc::now(),
        }
    }

    /// Returns a clone of the current configuration.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    /// Records one request against an endpoint's rollup.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();
        let entry = metrics
            .endpoint_metrics
            .entry(endpoint.to_string())
            .or_default();
        entry.request_count += 1;
        entry.total_duration_ms += duration_ms;
        if is_error {
            entry.error_count += 1;
        }
    }

    /// A pipeline came up: bump both the live gauge and the lifetime total.
    pub fn session_started(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.active_sessions += 1;
        metrics.sessions_started += 1;
    }

    /// A pipeline fully wound down.
    pub fn session_ended(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.active_sessions = metrics.active_sessions.saturating_sub(1);
    }

    pub fn record_dropped_audio_chunk(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.dropped_audio_chunks += 1;
    }

    pub fn record_synthesized_frames(&self, count: u64) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.synthesized_frames += count;
    }

    /// Snapshot of the current metrics for reporting.
    pub fn get_metrics(&self) -> AppMetrics {
        self.metrics.read().unwrap().clone()
    }

    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}
