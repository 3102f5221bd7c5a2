//! # wavecycle Common Library
//!
//! Shared code for the wavecycle crates:
//! - Error type used by configuration loading
//! - TOML settings and config file resolution

pub mod config;
pub mod error;

pub use config::{EngineSettings, OutputBackend};
pub use error::{Error, Result};
