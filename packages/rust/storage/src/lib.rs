//! Turso Embedded / libSQL storage layer for research jobs and reports.
//!
//! The [`Storage`] struct wraps a libSQL database holding jobs, their
//! lifecycle stage, and the reconciled reports (citations and conflicts in
//! stored order).

mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use quarry_shared::{
    Citation, Conflict, ContextDocument, Job, JobId, JobSummary, QuarryError, ReportId,
    ReportRecord, Result, Stage,
};
use uuid::Uuid;

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl Storage {
    /// Open or create a database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| QuarryError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| QuarryError::Storage(e.to_string()))?;

        Self::from_database(db).await
    }

    /// Open a private in-memory database. Contents vanish on drop.
    pub async fn open_in_memory() -> Result<Self> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| QuarryError::Storage(e.to_string()))?;

        Self::from_database(db).await
    }

    async fn from_database(db: Database) -> Result<Self> {
        let conn = db
            .connect()
            .map_err(|e| QuarryError::Storage(e.to_string()))?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .await
            .map_err(|e| QuarryError::Storage(e.to_string()))?;

        let storage = Self { db, conn };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        QuarryError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Job operations
    // -----------------------------------------------------------------------

    /// Insert a new job record at its current stage.
    pub async fn create_job(&self, job: &Job) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let context_json = serde_json::to_string(&job.context)
            .map_err(|e| QuarryError::Storage(format!("failed to encode context: {e}")))?;
        self.conn
            .execute(
                "INSERT INTO jobs (id, query, context_json, stage, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    job.id.to_string(),
                    job.query.as_str(),
                    context_json,
                    job.stage.as_str(),
                    now.as_str(),
                    now.as_str()
                ],
            )
            .await
            .map_err(|e| QuarryError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Record a stage transition. `error` is stored verbatim, so callers pass
    /// only sanitized messages.
    pub async fn set_job_stage(
        &self,
        job_id: JobId,
        stage: Stage,
        error: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let changed = self
            .conn
            .execute(
                "UPDATE jobs SET stage = ?1, error = ?2, updated_at = ?3 WHERE id = ?4",
                params![stage.as_str(), error, now.as_str(), job_id.to_string()],
            )
            .await
            .map_err(|e| QuarryError::Storage(e.to_string()))?;

        if changed == 0 {
            return Err(QuarryError::NotFound(format!("job {job_id}")));
        }
        Ok(())
    }

    /// Get a job by ID, including its context documents.
    pub async fn get_job(&self, job_id: JobId) -> Result<Option<Job>> {
        let mut rows = self
            .conn
            .query(
                "SELECT query, context_json, stage FROM jobs WHERE id = ?1",
                params![job_id.to_string()],
            )
            .await
            .map_err(|e| QuarryError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let query: String = row
                    .get(0)
                    .map_err(|e| QuarryError::Storage(e.to_string()))?;
                let context_json: String = row
                    .get(1)
                    .map_err(|e| QuarryError::Storage(e.to_string()))?;
                let context: Vec<ContextDocument> = serde_json::from_str(&context_json)
                    .map_err(|e| QuarryError::Storage(format!("invalid context_json: {e}")))?;
                let mut job = Job::with_id(job_id, query, context);
                job.stage = get_stage(&row, 2)?;
                Ok(Some(job))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(QuarryError::Storage(e.to_string())),
        }
    }

    /// List the most recent jobs, newest first.
    pub async fn list_jobs(&self, limit: u32) -> Result<Vec<JobSummary>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, query, stage, error, created_at FROM jobs
                 ORDER BY created_at DESC, id DESC LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(|e| QuarryError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Some(row) = next_row(&mut rows).await? {
            results.push(JobSummary {
                id: JobId(get_uuid(&row, 0)?),
                query: row
                    .get::<String>(1)
                    .map_err(|e| QuarryError::Storage(e.to_string()))?,
                stage: get_stage(&row, 2)?,
                error: row.get::<String>(3).ok(),
                created_at: get_timestamp(&row, 4)?,
            });
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Report operations
    // -----------------------------------------------------------------------

    /// Create an empty report for `job_id`. Returns the generated report ID.
    pub async fn create_report(&self, job_id: JobId) -> Result<ReportId> {
        let id = ReportId::new();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO reports (id, job_id, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)",
                params![id.to_string(), job_id.to_string(), now.as_str(), now.as_str()],
            )
            .await
            .map_err(|e| QuarryError::Storage(e.to_string()))?;
        Ok(id)
    }

    /// Store the rendered document for a report.
    pub async fn update_report_output(&self, report_id: ReportId, document: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let changed = self
            .conn
            .execute(
                "UPDATE reports SET document = ?1, updated_at = ?2 WHERE id = ?3",
                params![document, now.as_str(), report_id.to_string()],
            )
            .await
            .map_err(|e| QuarryError::Storage(e.to_string()))?;

        if changed == 0 {
            return Err(QuarryError::NotFound(format!("report {report_id}")));
        }
        Ok(())
    }

    /// Append a citation after any already stored for the report.
    pub async fn add_citation(&self, report_id: ReportId, citation: &Citation) -> Result<()> {
        let report = report_id.to_string();
        self.conn
            .execute(
                "INSERT INTO citations
                   (report_id, position, claim, llm_source, underlying_url, underlying_doc, confidence)
                 VALUES (?1,
                   (SELECT COALESCE(MAX(position) + 1, 0) FROM citations WHERE report_id = ?1),
                   ?2, ?3, ?4, ?5, ?6)",
                params![
                    report.as_str(),
                    citation.claim.as_str(),
                    citation.llm_source.as_str(),
                    citation.underlying_url.as_deref(),
                    citation.underlying_doc.map(|d| d.to_string()),
                    citation.confidence
                ],
            )
            .await
            .map_err(|e| QuarryError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Append a conflict and its positions after any already stored.
    pub async fn add_conflict(&self, report_id: ReportId, conflict: &Conflict) -> Result<()> {
        let report = report_id.to_string();
        let conflict_id = Uuid::now_v7().to_string();
        self.conn
            .execute(
                "INSERT INTO conflicts (id, report_id, position, topic, resolution)
                 VALUES (?1, ?2,
                   (SELECT COALESCE(MAX(position) + 1, 0) FROM conflicts WHERE report_id = ?2),
                   ?3, ?4)",
                params![
                    conflict_id.as_str(),
                    report.as_str(),
                    conflict.topic.as_str(),
                    conflict.resolution.as_deref()
                ],
            )
            .await
            .map_err(|e| QuarryError::Storage(e.to_string()))?;

        for (position, citation) in conflict.positions.iter().enumerate() {
            self.conn
                .execute(
                    "INSERT INTO conflict_positions
                       (conflict_id, position, claim, llm_source, underlying_url, confidence)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        conflict_id.as_str(),
                        position as i64,
                        citation.claim.as_str(),
                        citation.llm_source.as_str(),
                        citation.underlying_url.as_deref(),
                        citation.confidence
                    ],
                )
                .await
                .map_err(|e| QuarryError::Storage(e.to_string()))?;
        }
        Ok(())
    }

    /// Get a report joined with its job's query and stage.
    pub async fn get_report(&self, report_id: ReportId) -> Result<Option<ReportRecord>> {
        let report = report_id.to_string();
        let mut rows = self
            .conn
            .query(
                "SELECT r.job_id, j.query, j.stage, j.error, r.document, r.created_at, r.updated_at
                 FROM reports r JOIN jobs j ON j.id = r.job_id
                 WHERE r.id = ?1",
                params![report.as_str()],
            )
            .await
            .map_err(|e| QuarryError::Storage(e.to_string()))?;

        let row = match rows.next().await {
            Ok(Some(row)) => row,
            Ok(None) => return Ok(None),
            Err(e) => return Err(QuarryError::Storage(e.to_string())),
        };

        let job_id = JobId(get_uuid(&row, 0)?);
        let query: String = row
            .get(1)
            .map_err(|e| QuarryError::Storage(e.to_string()))?;
        let stage = get_stage(&row, 2)?;
        let error = row.get::<String>(3).ok();
        let document: String = row.get(4).unwrap_or_default();
        let created_at = get_timestamp(&row, 5)?;
        let updated_at = get_timestamp(&row, 6)?;

        Ok(Some(ReportRecord {
            id: report_id,
            job_id,
            query,
            stage,
            error,
            document,
            citations: self.load_citations(&report).await?,
            conflicts: self.load_conflicts(&report).await?,
            created_at,
            updated_at,
        }))
    }

    async fn load_citations(&self, report_id: &str) -> Result<Vec<Citation>> {
        let mut rows = self
            .conn
            .query(
                "SELECT claim, llm_source, underlying_url, underlying_doc, confidence
                 FROM citations WHERE report_id = ?1 ORDER BY position",
                params![report_id],
            )
            .await
            .map_err(|e| QuarryError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Some(row) = next_row(&mut rows).await? {
            let mut citation = Citation::new(
                row.get::<String>(0)
                    .map_err(|e| QuarryError::Storage(e.to_string()))?,
                row.get::<String>(1)
                    .map_err(|e| QuarryError::Storage(e.to_string()))?,
                row.get::<String>(2).ok(),
                row.get::<f64>(4).unwrap_or(0.0),
            );
            citation.underlying_doc = row
                .get::<String>(3)
                .ok()
                .and_then(|s| Uuid::parse_str(&s).ok());
            results.push(citation);
        }
        Ok(results)
    }

    async fn load_conflicts(&self, report_id: &str) -> Result<Vec<Conflict>> {
        let mut rows = self
            .conn
            .query(
                "SELECT c.id, c.topic, c.resolution,
                        p.claim, p.llm_source, p.underlying_url, p.confidence
                 FROM conflicts c
                 JOIN conflict_positions p ON p.conflict_id = c.id
                 WHERE c.report_id = ?1
                 ORDER BY c.position, p.position",
                params![report_id],
            )
            .await
            .map_err(|e| QuarryError::Storage(e.to_string()))?;

        let mut results: Vec<Conflict> = Vec::new();
        let mut current_id: Option<String> = None;
        while let Some(row) = next_row(&mut rows).await? {
            let id: String = row
                .get(0)
                .map_err(|e| QuarryError::Storage(e.to_string()))?;
            let position = Citation::new(
                row.get::<String>(3)
                    .map_err(|e| QuarryError::Storage(e.to_string()))?,
                row.get::<String>(4)
                    .map_err(|e| QuarryError::Storage(e.to_string()))?,
                row.get::<String>(5).ok(),
                row.get::<f64>(6).unwrap_or(1.0),
            );

            match results.last_mut() {
                Some(conflict) if current_id.as_deref() == Some(id.as_str()) => {
                    conflict.positions.push(position);
                }
                _ => {
                    results.push(Conflict {
                        topic: row
                            .get::<String>(1)
                            .map_err(|e| QuarryError::Storage(e.to_string()))?,
                        positions: vec![position],
                        resolution: row.get::<String>(2).ok(),
                    });
                    current_id = Some(id);
                }
            }
        }
        Ok(results)
    }
}

async fn next_row(rows: &mut libsql::Rows) -> Result<Option<libsql::Row>> {
    rows.next()
        .await
        .map_err(|e| QuarryError::Storage(e.to_string()))
}

fn get_uuid(row: &libsql::Row, idx: i32) -> Result<Uuid> {
    let s: String = row
        .get(idx)
        .map_err(|e| QuarryError::Storage(e.to_string()))?;
    Uuid::parse_str(&s).map_err(|e| QuarryError::Storage(format!("invalid id '{s}': {e}")))
}

fn get_stage(row: &libsql::Row, idx: i32) -> Result<Stage> {
    let s: String = row
        .get(idx)
        .map_err(|e| QuarryError::Storage(e.to_string()))?;
    s.parse()
}

fn get_timestamp(row: &libsql::Row, idx: i32) -> Result<DateTime<Utc>> {
    let s: String = row
        .get(idx)
        .map_err(|e| QuarryError::Storage(e.to_string()))?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| QuarryError::Storage(format!("invalid date: {e}")))
}
