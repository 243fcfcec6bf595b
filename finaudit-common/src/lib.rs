//! finaudit-common - shared configuration, errors, and logging.
//!
//! This crate provides:
//! - Configuration types and loading (`~/.finaudit/config.json` + env overrides)
//! - Configuration validation
//! - The unified error type
//! - Logging setup

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;
pub mod validation;

pub use config::{
    AuditConfig, AuditMode, Config, CrossCheckConfig, FundamentalsSourceConfig, LlmConfig,
    MergeConfig, ObservabilityConfig,
};
pub use error::{Error, Result, ResultExt};
pub use validation::{Validate, ValidationError, ValidationResult};
