//! # Caseflow Core
//!
//! Core types shared by every Caseflow crate: the unified error type,
//! pagination descriptors used in query keys, and tracing bootstrap.

pub mod error;
pub mod pagination;
pub mod result;
pub mod telemetry;

pub use error::*;
pub use pagination::*;
pub use result::*;

// Re-export shaku for dependency injection
pub use shaku::Interface;
