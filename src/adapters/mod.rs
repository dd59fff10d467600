//! Infrastructure adapters for external systems.

pub mod cache;
pub mod http;
pub mod mock;
pub mod sqlite;
