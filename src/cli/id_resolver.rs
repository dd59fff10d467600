//! Short ID prefix resolution for job commands.
//!
//! Any unique prefix of a job UUID is accepted, like git short hashes.

use anyhow::{bail, Result};
use sqlx::SqlitePool;
use uuid::Uuid;

const JOB_QUERY: &str = "SELECT id FROM jobs WHERE id LIKE ? ORDER BY created_at";

fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        bail!("ID prefix must not be empty");
    }
    if !prefix.chars().all(|c| c.is_ascii_hexdigit() || c == '-') {
        bail!("Invalid ID prefix '{prefix}': must contain only hex characters and dashes");
    }
    Ok(())
}

/// Resolve a job ID prefix to a full UUID.
pub async fn resolve_job_id(pool: &SqlitePool, prefix: &str) -> Result<Uuid> {
    if let Ok(uuid) = Uuid::parse_str(prefix) {
        return Ok(uuid);
    }
    validate_prefix(prefix)?;

    let pattern = format!("{}%", prefix.to_lowercase());
    let rows: Vec<(String,)> = sqlx::query_as(JOB_QUERY).bind(&pattern).fetch_all(pool).await?;

    match rows.as_slice() {
        [] => bail!("No job found matching '{prefix}'. Use 'printfix job list' to see jobs."),
        [(id,)] => Ok(Uuid::parse_str(id)?),
        many => {
            let mut msg = format!("Ambiguous prefix '{prefix}': matches {} jobs:", many.len());
            for (id,) in many {
                msg.push_str(&format!("\n  {id}"));
            }
            bail!("{msg}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteJobRepository};
    use crate::domain::models::{Aggressiveness, Effort, GatingPolicy, Job, SourceFile};
    use crate::domain::ports::JobRepository;

    fn job() -> Job {
        let source = SourceFile {
            uri: "/tmp/a.pdf".into(),
            original_filename: "a.pdf".into(),
            content_hash: "00".into(),
            size_bytes: 1,
        };
        Job::new(source, Effort::Quick, Aggressiveness::Moderate, GatingPolicy::default())
    }

    #[tokio::test]
    async fn test_resolves_unique_prefix() {
        let pool = create_migrated_test_pool().await.unwrap();
        let repo = Arc::new(SqliteJobRepository::new(pool.clone()));
        let job = job();
        repo.create(&job).await.unwrap();

        let id = job.id.to_string();
        assert_eq!(resolve_job_id(&pool, &id[..6]).await.unwrap(), job.id);
        assert_eq!(resolve_job_id(&pool, &id).await.unwrap(), job.id);
    }

    #[tokio::test]
    async fn test_rejects_bad_or_unknown_prefix() {
        let pool = create_migrated_test_pool().await.unwrap();
        assert!(resolve_job_id(&pool, "").await.is_err());
        assert!(resolve_job_id(&pool, "xyz").await.is_err());
        assert!(resolve_job_id(&pool, "abc").await.unwrap_err().to_string().contains("No job found"));
    }
}
