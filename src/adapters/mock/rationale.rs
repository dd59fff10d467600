//! Canned rationale provider.

use async_trait::async_trait;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Issue, PlanDecision};
use crate::domain::ports::RationaleProvider;

#[derive(Debug, Default)]
pub struct StaticRationaleProvider {
    fail: bool,
}

impl StaticRationaleProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self { fail: true }
    }
}

#[async_trait]
impl RationaleProvider for StaticRationaleProvider {
    async fn explain(&self, issue: &Issue, decision: &PlanDecision) -> DomainResult<String> {
        if self.fail {
            return Err(DomainError::Provider("rationale service unavailable".to_string()));
        }
        Ok(format!(
            "Reviewed {} ({}): {}",
            issue.key(),
            issue.severity,
            decision.outcome.as_str()
        ))
    }
}
