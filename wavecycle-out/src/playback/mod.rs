//! Playback engine: lifecycle controller and render worker

pub mod engine;
pub mod worker;

pub use engine::{EngineState, OutputEngine, DEFAULT_SHUTDOWN_TIMEOUT};
pub use worker::{RenderWorker, StopOutcome};
