//! In-process collaborators for tests and `worker run --mock`.

pub mod diagnosis;
pub mod package;
pub mod rationale;
pub mod tools;

pub use diagnosis::{ScriptedDiagnosisProvider, ScriptedResponse};
pub use package::office_package;
pub use rationale::StaticRationaleProvider;
pub use tools::{MockRenderer, MockToolExecutor};
