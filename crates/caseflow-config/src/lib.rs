//! # Caseflow Config
//!
//! Configuration management for Caseflow.
//! Supports layered configuration from files, environment variables,
//! and runtime refresh.

mod app_config;
mod cache_config;
mod loader;

pub use app_config::*;
pub use cache_config::*;
pub use loader::*;
