//! # Live Translate Gateway - Main Application Entry Point
//!
//! A realtime speech translation gateway: clients stream PCM audio over a
//! WebSocket, the gateway pipes it through external recognition,
//! translation, and synthesis engines, and streams translated speech back.
//!
//! ## Application Architecture:
//! - **config**: Layered configuration (TOML files + environment variables)
//! - **state**: Shared application state and runtime metrics
//! - **health**: Liveness, readiness, and metrics endpoints
//! - **middleware**: Request counting and per-endpoint timing
//! - **websocket**: Per-connection actor speaking the client protocol
//! - **session**: Session registry and the five-stage streaming pipeline
//! - **engines**: Capability traits and WebSocket clients for the engines
//! - **audio**: PCM helpers, ring buffer, voice activity detection
//! - **context**: Per-session translation context windows
//! - **error**: Error types and HTTP mappings

mod audio;
mod config;
mod context;
mod engines;
mod error;
mod health;
mod middleware;
mod session;
mod state;
mod util;
mod websocket;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::AppConfig;
use context::ContextRegistry;
use engines::remote::{RemoteRecognizer, RemoteSynthesizer, RemoteTranslator};
use session::{EngineSet, SessionRegistry};
use state::AppState;
use util::RetryConfig;

/// Global shutdown flag set by the signal handler task.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    info!("Starting live-translate-gateway v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Engines: asr={} translate={} tts={}",
        config.engines.recognizer_url, config.engines.translator_url, config.engines.synthesizer_url
    );

    let app_state = AppState::new(config.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    let engines = EngineSet {
        recognizer: Arc::new(RemoteRecognizer::new(
            config.engines.recognizer_url.clone(),
            RetryConfig {
                max_attempts: config.engines.connect_attempts,
                base_delay: Duration::from_millis(config.engines.connect_base_delay_ms),
                ..RetryConfig::default()
            },
        )),
        translator: Arc::new(RemoteTranslator::new(config.engines.translator_url.clone())),
        synthesizer: Arc::new(RemoteSynthesizer::new(config.engines.synthesizer_url.clone())),
    };

    let contexts = Arc::new(ContextRegistry::new());
    let registry = web::Data::new(SessionRegistry::new(
        engines,
        Arc::clone(&contexts),
        app_state.clone(),
    ));

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(registry.clone())
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(middleware::RequestMetrics)
            .route("/ws", web::get().to(websocket::translate_websocket))
            .route("/health", web::get().to(health::health_check))
            .route("/ready", web::get().to(health::readiness_check))
            .route("/metrics", web::get().to(health::detailed_metrics))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "live_translate_gateway=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Listen for SIGTERM/SIGINT and flip the shutdown flag.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
