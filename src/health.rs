use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// GET /health — liveness. Fixed shape, no auth, no body parsing.
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": {
            "name": "live-translate-gateway",
            "version": env!("CARGO_PKG_VERSION")
        },
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.uptime_seconds()
    }))
}

/// GET /ready — readiness. Same contract as liveness; the gateway has no
/// warm-up phase, engines are dialed lazily per session.
pub async fn readiness_check() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ready"
    }))
}

/// GET /metrics — runtime counters and per-endpoint statistics.
pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics();
    let config = state.get_config();
    let uptime_seconds = state.uptime_seconds();

    let mut endpoint_stats = Vec::new();
    for (endpoint, metric) in metrics.endpoint_metrics.iter() {
        endpoint_stats.push(json!({
            "endpoint": endpoint,
            "request_count": metric.request_count,
            "error_count": metric.error_count,
            "average_duration_ms": metric.average_duration_ms(),
            "total_duration_ms": metric.total_duration_ms
        }));
    }

    let session_usage = if config.performance.max_concurrent_sessions > 0 {
        metrics.active_sessions as f64 / config.performance.max_concurrent_sessions as f64
    } else {
        0.0
    };

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "http": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            }
        },
        "sessions": {
            "active": metrics.active_sessions,
            "started_total": metrics.sessions_started,
            "max_concurrent": config.performance.max_concurrent_sessions,
            "usage_percent": (session_usage * 100.0).round()
        },
        "pipeline": {
            "dropped_audio_chunks": metrics.dropped_audio_chunks,
            "synthesized_frames": metrics.synthesized_frames
        },
        "endpoints": endpoint_stats
    }))
}
