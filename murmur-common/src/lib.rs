//! Murmur Common - Shared configuration, error types, and logging.
//!
//! This crate provides:
//! - Configuration types and loading
//! - The unified error taxonomy used at the request boundary
//! - Logging setup with noise filtering

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;

pub use config::{
    ApiKeysConfig, Config, GatewayConfig, ObservabilityConfig, PromptsConfig, ProvidersConfig,
    RagConfig,
};
pub use error::{Error, Result};
