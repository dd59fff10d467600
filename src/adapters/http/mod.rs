//! HTTP adapters for the external diagnosis, tool, render and rationale services.

pub mod client;
pub mod services;

pub use client::{HttpError, ServiceClient, ServiceClientConfig};
pub use services::{HttpDiagnosisProvider, HttpRationaleProvider, HttpRenderer, HttpToolExecutor};
