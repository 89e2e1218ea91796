//! # Session Management
//!
//! One `Session` per connected client: identity, language pair, the lossy
//! inbound audio path, and the cancellation handle for its pipeline. The
//! `SessionRegistry` owns the id-to-session map and starts a pipeline for
//! every session it creates.

mod pipeline;
mod registry;

pub use registry::{EngineSet, Session, SessionRegistry};
