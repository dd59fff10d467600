//! Caching adapters.

pub mod diagnosis_cache;

pub use diagnosis_cache::{DiagnosisCache, DiagnosisCacheKey};
