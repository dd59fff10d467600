//! SQLite implementation of the JobRepository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{parse_datetime, parse_json, parse_optional_datetime, parse_optional_json, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Aggressiveness, Diagnosis, DocumentFormat, DocumentSet, Effort, Fix, GatingPolicy, Job, JobFilter, JobState,
    OrchestrationResult, StateUpdate, VerificationResult,
};
use crate::domain::ports::{JobRepository, LoopProgress};

#[derive(Clone)]
pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, id: Uuid) -> DomainResult<Option<Job>> {
        let row: Option<JobRow> = sqlx::query_as("SELECT * FROM jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Job::try_from).transpose()
    }
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn create(&self, job: &Job) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO jobs (id, state, effort, aggressiveness, options, source, format, page_count,
               iteration, issues_found, fixes_applied, fixes_failed, confidence, auto_approve_threshold,
               severity_weights, documents, orchestration, verification, error, version,
               created_at, updated_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(job.id.to_string())
        .bind(job.state.as_str())
        .bind(job.effort.as_str())
        .bind(job.aggressiveness.as_str())
        .bind(serde_json::to_string(&job.options)?)
        .bind(serde_json::to_string(&job.source)?)
        .bind(job.format.map(|f| f.as_str()))
        .bind(job.page_count.map(i64::from))
        .bind(i64::from(job.iteration))
        .bind(i64::from(job.issues_found))
        .bind(i64::from(job.fixes_applied))
        .bind(i64::from(job.fixes_failed))
        .bind(job.confidence)
        .bind(job.gating.auto_approve_threshold)
        .bind(serde_json::to_string(&job.gating.weights)?)
        .bind(serde_json::to_string(&job.documents)?)
        .bind(job.orchestration.as_ref().map(serde_json::to_string).transpose()?)
        .bind(job.verification.as_ref().map(serde_json::to_string).transpose()?)
        .bind(&job.error)
        .bind(i64::try_from(job.version).unwrap_or(i64::MAX))
        .bind(job.created_at.to_rfc3339())
        .bind(job.updated_at.to_rfc3339())
        .bind(job.completed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Job>> {
        self.fetch(id).await
    }

    async fn list(&self, filter: JobFilter) -> DomainResult<Vec<Job>> {
        let mut query = String::from("SELECT * FROM jobs WHERE 1=1");
        if filter.state.is_some() {
            query.push_str(" AND state = ?");
        }
        query.push_str(" ORDER BY created_at DESC");
        if filter.limit.is_some() {
            query.push_str(" LIMIT ?");
        }

        let mut q = sqlx::query_as::<_, JobRow>(&query);
        if let Some(state) = filter.state {
            q = q.bind(state.as_str());
        }
        if let Some(limit) = filter.limit {
            q = q.bind(limit);
        }

        let rows: Vec<JobRow> = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    async fn delete(&self, id: Uuid) -> DomainResult<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn transition(&self, id: Uuid, from: JobState, to: JobState, update: StateUpdate) -> DomainResult<Job> {
        let now = Utc::now().to_rfc3339();
        let completed_at = to.is_terminal().then(|| now.clone());

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"UPDATE jobs SET
                   state = ?,
                   error = COALESCE(?, error),
                   iteration = CASE WHEN ? THEN 0 ELSE iteration END,
                   completed_at = COALESCE(?, completed_at),
                   version = version + 1,
                   updated_at = ?
               WHERE id = ? AND state = ?"#,
        )
        .bind(to.as_str())
        .bind(&update.error)
        .bind(update.reset_iteration)
        .bind(&completed_at)
        .bind(&now)
        .bind(id.to_string())
        .bind(from.as_str())
        .execute(&mut *tx)
        .await?;

        // Zero rows means another writer moved the job first, or it is gone.
        if result.rows_affected() == 0 {
            let actual: Option<(String,)> = sqlx::query_as("SELECT state FROM jobs WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&mut *tx)
                .await?;
            tx.rollback().await?;

            return match actual {
                None => Err(DomainError::JobNotFound(id)),
                Some((state,)) => Err(DomainError::StateConflict {
                    job_id: id,
                    expected: from,
                    actual: JobState::from_str(&state),
                }),
            };
        }

        let row: JobRow = sqlx::query_as("SELECT * FROM jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        row.try_into()
    }

    async fn record_ingestion(
        &self,
        id: Uuid,
        format: DocumentFormat,
        page_count: u32,
        documents: &DocumentSet,
    ) -> DomainResult<()> {
        let result = sqlx::query(
            r#"UPDATE jobs SET format = ?, page_count = ?, documents = ?,
               version = version + 1, updated_at = ? WHERE id = ?"#,
        )
        .bind(format.as_str())
        .bind(i64::from(page_count))
        .bind(serde_json::to_string(documents)?)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::JobNotFound(id));
        }
        Ok(())
    }

    async fn record_progress(&self, id: Uuid, progress: &LoopProgress) -> DomainResult<()> {
        let result = sqlx::query(
            r#"UPDATE jobs SET iteration = ?, documents = ?, issues_found = ?, fixes_applied = ?,
               fixes_failed = ?, version = version + 1, updated_at = ? WHERE id = ?"#,
        )
        .bind(i64::from(progress.iteration))
        .bind(serde_json::to_string(&progress.documents)?)
        .bind(i64::from(progress.issues_found))
        .bind(i64::from(progress.fixes_applied))
        .bind(i64::from(progress.fixes_failed))
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::JobNotFound(id));
        }
        Ok(())
    }

    async fn record_orchestration(&self, id: Uuid, result: &OrchestrationResult) -> DomainResult<()> {
        let outcome = sqlx::query(
            "UPDATE jobs SET orchestration = ?, version = version + 1, updated_at = ? WHERE id = ?",
        )
        .bind(serde_json::to_string(result)?)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if outcome.rows_affected() == 0 {
            return Err(DomainError::JobNotFound(id));
        }
        Ok(())
    }

    async fn record_verification(&self, id: Uuid, result: &VerificationResult) -> DomainResult<()> {
        let outcome = sqlx::query(
            r#"UPDATE jobs SET verification = ?, confidence = ?, version = version + 1, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(serde_json::to_string(result)?)
        .bind(result.overall)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if outcome.rows_affected() == 0 {
            return Err(DomainError::JobNotFound(id));
        }
        Ok(())
    }

    async fn append_diagnosis(&self, id: Uuid, diagnosis: &Diagnosis) -> DomainResult<()> {
        let result = sqlx::query(
            r#"INSERT INTO job_diagnoses (id, job_id, seq, iteration, phase, is_clean, body, created_at)
               SELECT ?, ?, COALESCE((SELECT MAX(seq) FROM job_diagnoses WHERE job_id = ?), 0) + 1,
                      ?, ?, ?, ?, ?
               WHERE EXISTS (SELECT 1 FROM jobs WHERE id = ?)"#,
        )
        .bind(diagnosis.id.to_string())
        .bind(id.to_string())
        .bind(id.to_string())
        .bind(i64::from(diagnosis.iteration))
        .bind(diagnosis.phase.as_str())
        .bind(diagnosis.is_clean())
        .bind(serde_json::to_string(diagnosis)?)
        .bind(diagnosis.created_at.to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::JobNotFound(id));
        }
        Ok(())
    }

    async fn list_diagnoses(&self, id: Uuid) -> DomainResult<Vec<Diagnosis>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT body FROM job_diagnoses WHERE job_id = ? ORDER BY seq")
            .bind(id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|(body,)| parse_json(body)).collect()
    }

    async fn latest_diagnosis(&self, id: Uuid) -> DomainResult<Option<Diagnosis>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT body FROM job_diagnoses WHERE job_id = ? ORDER BY seq DESC LIMIT 1")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        row.map(|(body,)| parse_json(&body)).transpose()
    }

    async fn append_fix(&self, id: Uuid, fix: &Fix) -> DomainResult<()> {
        let result = sqlx::query(
            r#"INSERT INTO job_fixes (id, job_id, seq, iteration, tool_name, success, body, created_at)
               SELECT ?, ?, COALESCE((SELECT MAX(seq) FROM job_fixes WHERE job_id = ?), 0) + 1,
                      ?, ?, ?, ?, ?
               WHERE EXISTS (SELECT 1 FROM jobs WHERE id = ?)"#,
        )
        .bind(fix.id.to_string())
        .bind(id.to_string())
        .bind(id.to_string())
        .bind(i64::from(fix.iteration))
        .bind(&fix.tool)
        .bind(fix.success)
        .bind(serde_json::to_string(fix)?)
        .bind(fix.created_at.to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::JobNotFound(id));
        }
        Ok(())
    }

    async fn list_fixes(&self, id: Uuid) -> DomainResult<Vec<Fix>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT body FROM job_fixes WHERE job_id = ? ORDER BY seq")
            .bind(id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|(body,)| parse_json(body)).collect()
    }
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    state: String,
    effort: String,
    aggressiveness: String,
    options: String,
    source: String,
    format: Option<String>,
    page_count: Option<i64>,
    iteration: i64,
    issues_found: i64,
    fixes_applied: i64,
    fixes_failed: i64,
    confidence: Option<f64>,
    auto_approve_threshold: f64,
    severity_weights: String,
    documents: String,
    orchestration: Option<String>,
    verification: Option<String>,
    error: Option<String>,
    version: i64,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
}

fn to_u32(value: i64, column: &str) -> DomainResult<u32> {
    u32::try_from(value).map_err(|_| DomainError::Serialization(format!("{column} out of range: {value}")))
}

impl TryFrom<JobRow> for Job {
    type Error = DomainError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let state = JobState::from_str(&row.state)
            .ok_or_else(|| DomainError::Serialization(format!("Invalid state: {}", row.state)))?;
        let effort = Effort::from_str(&row.effort)
            .ok_or_else(|| DomainError::Serialization(format!("Invalid effort: {}", row.effort)))?;
        let aggressiveness = Aggressiveness::from_str(&row.aggressiveness)
            .ok_or_else(|| DomainError::Serialization(format!("Invalid aggressiveness: {}", row.aggressiveness)))?;
        let format = row
            .format
            .map(|f| DocumentFormat::from_str(&f).ok_or_else(|| DomainError::Serialization(format!("Invalid format: {f}"))))
            .transpose()?;

        Ok(Job {
            id: parse_uuid(&row.id)?,
            state,
            effort,
            aggressiveness,
            options: parse_json(&row.options)?,
            source: parse_json(&row.source)?,
            format,
            page_count: row.page_count.map(|p| to_u32(p, "page_count")).transpose()?,
            iteration: to_u32(row.iteration, "iteration")?,
            issues_found: to_u32(row.issues_found, "issues_found")?,
            fixes_applied: to_u32(row.fixes_applied, "fixes_applied")?,
            fixes_failed: to_u32(row.fixes_failed, "fixes_failed")?,
            confidence: row.confidence,
            gating: GatingPolicy {
                auto_approve_threshold: row.auto_approve_threshold,
                weights: parse_json(&row.severity_weights)?,
            },
            documents: parse_json(&row.documents)?,
            orchestration: parse_optional_json(row.orchestration)?,
            verification: parse_optional_json(row.verification)?,
            error: row.error,
            version: u64::try_from(row.version).unwrap_or_default(),
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
            completed_at: parse_optional_datetime(row.completed_at)?,
        })
    }
}
