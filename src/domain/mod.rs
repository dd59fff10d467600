//! Domain layer for the PrintFix job engine
//!
//! Core models, the error taxonomy and the ports adapters implement.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult};
