//! Persistence seam for the pipeline.
//!
//! The libSQL-backed [`Storage`] is the production store; [`InMemoryStore`]
//! backs ephemeral CLI runs and tests.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quarry_shared::{
    Citation, Conflict, Job, JobId, JobSummary, QuarryError, ReportId, ReportRecord, Result, Stage,
};
use quarry_storage::Storage;

/// Everything the pipeline and server need to persist jobs and reports.
#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn create_job(&self, job: &Job) -> Result<()>;
    async fn set_job_stage(&self, job_id: JobId, stage: Stage, error: Option<&str>) -> Result<()>;
    async fn create_report(&self, job_id: JobId) -> Result<ReportId>;
    async fn update_report_output(&self, report_id: ReportId, document: &str) -> Result<()>;
    async fn add_citation(&self, report_id: ReportId, citation: &Citation) -> Result<()>;
    async fn add_conflict(&self, report_id: ReportId, conflict: &Conflict) -> Result<()>;
    async fn get_report(&self, report_id: ReportId) -> Result<Option<ReportRecord>>;
    async fn list_jobs(&self, limit: u32) -> Result<Vec<JobSummary>>;
}

#[async_trait]
impl ReportStore for Storage {
    async fn create_job(&self, job: &Job) -> Result<()> {
        Storage::create_job(self, job).await
    }

    async fn set_job_stage(&self, job_id: JobId, stage: Stage, error: Option<&str>) -> Result<()> {
        Storage::set_job_stage(self, job_id, stage, error).await
    }

    async fn create_report(&self, job_id: JobId) -> Result<ReportId> {
        Storage::create_report(self, job_id).await
    }

    async fn update_report_output(&self, report_id: ReportId, document: &str) -> Result<()> {
        Storage::update_report_output(self, report_id, document).await
    }

    async fn add_citation(&self, report_id: ReportId, citation: &Citation) -> Result<()> {
        Storage::add_citation(self, report_id, citation).await
    }

    async fn add_conflict(&self, report_id: ReportId, conflict: &Conflict) -> Result<()> {
        Storage::add_conflict(self, report_id, conflict).await
    }

    async fn get_report(&self, report_id: ReportId) -> Result<Option<ReportRecord>> {
        Storage::get_report(self, report_id).await
    }

    async fn list_jobs(&self, limit: u32) -> Result<Vec<JobSummary>> {
        Storage::list_jobs(self, limit).await
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

struct JobRow {
    job: Job,
    error: Option<String>,
    created_at: DateTime<Utc>,
}

struct ReportRow {
    job_id: JobId,
    document: String,
    citations: Vec<Citation>,
    conflicts: Vec<Conflict>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct Tables {
    jobs: HashMap<JobId, JobRow>,
    /// Insertion order, for newest-first listing.
    job_order: Vec<JobId>,
    reports: HashMap<ReportId, ReportRow>,
}

/// Process-local store. Nothing survives the process.
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn report_mut<'a>(tables: &'a mut Tables, report_id: ReportId) -> Result<&'a mut ReportRow> {
        tables
            .reports
            .get_mut(&report_id)
            .ok_or_else(|| QuarryError::NotFound(format!("report {report_id}")))
    }
}

#[async_trait]
impl ReportStore for InMemoryStore {
    async fn create_job(&self, job: &Job) -> Result<()> {
        let mut tables = self.lock();
        if tables.jobs.contains_key(&job.id) {
            return Err(QuarryError::Storage(format!("job {} already exists", job.id)));
        }
        tables.jobs.insert(
            job.id,
            JobRow {
                job: job.clone(),
                error: None,
                created_at: Utc::now(),
            },
        );
        tables.job_order.push(job.id);
        Ok(())
    }

    async fn set_job_stage(&self, job_id: JobId, stage: Stage, error: Option<&str>) -> Result<()> {
        let mut tables = self.lock();
        let row = tables
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| QuarryError::NotFound(format!("job {job_id}")))?;
        row.job.stage = stage;
        row.error = error.map(str::to_string);
        Ok(())
    }

    async fn create_report(&self, job_id: JobId) -> Result<ReportId> {
        let mut tables = self.lock();
        if !tables.jobs.contains_key(&job_id) {
            return Err(QuarryError::NotFound(format!("job {job_id}")));
        }
        let id = ReportId::new();
        let now = Utc::now();
        tables.reports.insert(
            id,
            ReportRow {
                job_id,
                document: String::new(),
                citations: Vec::new(),
                conflicts: Vec::new(),
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn update_report_output(&self, report_id: ReportId, document: &str) -> Result<()> {
        let mut tables = self.lock();
        let row = Self::report_mut(&mut tables, report_id)?;
        row.document = document.to_string();
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn add_citation(&self, report_id: ReportId, citation: &Citation) -> Result<()> {
        let mut tables = self.lock();
        Self::report_mut(&mut tables, report_id)?
            .citations
            .push(citation.clone());
        Ok(())
    }

    async fn add_conflict(&self, report_id: ReportId, conflict: &Conflict) -> Result<()> {
        let mut tables = self.lock();
        Self::report_mut(&mut tables, report_id)?
            .conflicts
            .push(conflict.clone());
        Ok(())
    }

    async fn get_report(&self, report_id: ReportId) -> Result<Option<ReportRecord>> {
        let tables = self.lock();
        let Some(report) = tables.reports.get(&report_id) else {
            return Ok(None);
        };
        let job = tables
            .jobs
            .get(&report.job_id)
            .ok_or_else(|| QuarryError::Storage(format!("report {report_id} has no job")))?;

        Ok(Some(ReportRecord {
            id: report_id,
            job_id: report.job_id,
            query: job.job.query.clone(),
            stage: job.job.stage,
            error: job.error.clone(),
            document: report.document.clone(),
            citations: report.citations.clone(),
            conflicts: report.conflicts.clone(),
            created_at: report.created_at,
            updated_at: report.updated_at,
        }))
    }

    async fn list_jobs(&self, limit: u32) -> Result<Vec<JobSummary>> {
        let tables = self.lock();
        Ok(tables
            .job_order
            .iter()
            .rev()
            .filter_map(|id| tables.jobs.get(id))
            .take(limit as usize)
            .map(|row| JobSummary {
                id: row.job.id,
                query: row.job.query.clone(),
                stage: row.job.stage,
                error: row.error.clone(),
                created_at: row.created_at,
            })
            .collect())
    }
}
