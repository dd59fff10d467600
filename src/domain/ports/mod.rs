//! Port trait definitions (Hexagonal Architecture)
//!
//! Adapters implement these interfaces:
//! - JobRepository: durable job record with compare-and-set transitions
//! - DiagnosisProvider: visual and structural issue detection
//! - ToolExecutor: document editing tools
//! - Renderer: PDF conversion and page rendering
//! - RationaleProvider: decision explanations for smart-auto planning

pub mod job_repository;
pub mod providers;

pub use job_repository::{JobRepository, LoopProgress};
pub use providers::{DiagnosisProvider, RationaleProvider, Renderer, ToolExecutor};
