//! End-to-end research pipeline: dispatch → synthesize → render → persist.
//!
//! Each job moves `pending → dispatching → synthesizing → rendering → done`,
//! or to `failed` from any non-terminal stage. Every transition is persisted
//! before it is published, so a finished run always leaves a terminal record.

use std::sync::Arc;
use std::time::{Duration, Instant};

use quarry_providers::build_providers;
use quarry_render::{Renderer, TypstRenderer};
use quarry_shared::{
    AppConfig, ContextDocument, DispatchConfig, Job, JobId, ProgressEvent, QuarryError, ReportId,
    Result, Stage,
};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument};

use crate::dispatcher::Dispatcher;
use crate::hub::ProgressHub;
use crate::store::ReportStore;
use crate::synthesis::{MergeStrategy, Synthesizer};

/// A persisted job waiting to be run.
#[derive(Debug, Clone)]
pub struct SubmittedJob {
    pub job: Job,
    pub report_id: ReportId,
}

/// Summary of a successful run.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub job_id: JobId,
    pub report_id: ReportId,
    pub strategy: MergeStrategy,
    pub citations: usize,
    pub conflicts: usize,
    pub document: String,
    pub elapsed: Duration,
}

/// Drives jobs through their lifecycle. Shared across concurrent jobs.
pub struct ResearchPipeline {
    dispatcher: Dispatcher,
    synthesizer: Synthesizer,
    renderer: Arc<dyn Renderer>,
    store: Arc<dyn ReportStore>,
    hub: Arc<ProgressHub>,
}

impl ResearchPipeline {
    pub fn new(
        dispatcher: Dispatcher,
        synthesizer: Synthesizer,
        renderer: Arc<dyn Renderer>,
        store: Arc<dyn ReportStore>,
        hub: Arc<ProgressHub>,
    ) -> Self {
        Self {
            dispatcher,
            synthesizer,
            renderer,
            store,
            hub,
        }
    }

    /// Wire up providers, synthesis and rendering from config.
    ///
    /// Fails fast with a config error when no provider has a key.
    pub fn from_config(
        config: &AppConfig,
        store: Arc<dyn ReportStore>,
        hub: Arc<ProgressHub>,
    ) -> Result<Self> {
        let dispatcher = Dispatcher::new(build_providers(config)?, DispatchConfig::from(config))?;
        let synthesizer = Synthesizer::from_config(config)?;
        let renderer: Arc<dyn Renderer> = match &config.render.template_path {
            Some(path) => Arc::new(TypstRenderer::from_file(path)?),
            None => Arc::new(TypstRenderer::new()),
        };

        info!(
            providers = ?dispatcher.provider_names(),
            "research pipeline ready"
        );
        Ok(Self::new(dispatcher, synthesizer, renderer, store, hub))
    }

    pub fn hub(&self) -> &Arc<ProgressHub> {
        &self.hub
    }

    pub fn store(&self) -> &Arc<dyn ReportStore> {
        &self.store
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.dispatcher.provider_names()
    }

    /// Persist a new pending job and its empty report.
    pub async fn submit(&self, query: &str, context: Vec<ContextDocument>) -> Result<SubmittedJob> {
        let query = query.trim();
        if query.is_empty() {
            return Err(QuarryError::validation("query must not be empty"));
        }

        let job = Job::new(query, context);
        self.store.create_job(&job).await?;
        let report_id = self.store.create_report(job.id).await?;

        info!(job_id = %job.id, %report_id, "job submitted");
        Ok(SubmittedJob { job, report_id })
    }

    /// Run a submitted job on a background task.
    pub fn spawn(self: &Arc<Self>, submitted: SubmittedJob) -> JoinHandle<Result<PipelineOutcome>> {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move { pipeline.run(submitted).await })
    }

    /// Run a submitted job to a terminal state.
    ///
    /// On error the job is marked failed and exactly one error event is
    /// published before the error is returned. No stage is retried.
    #[instrument(skip_all, fields(job_id = %submitted.job.id, report_id = %submitted.report_id))]
    pub async fn run(&self, submitted: SubmittedJob) -> Result<PipelineOutcome> {
        let SubmittedJob { mut job, report_id } = submitted;
        let started = Instant::now();

        match self.execute(&mut job, report_id, started).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.fail(&mut job, &e).await;
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        job: &mut Job,
        report_id: ReportId,
        started: Instant,
    ) -> Result<PipelineOutcome> {
        // --- Dispatch ---
        let providers = self.dispatcher.provider_names();
        self.transition(job, Stage::Dispatching).await?;
        self.hub.publish(
            job.id,
            ProgressEvent::StageChanged {
                stage: Stage::Dispatching,
                detail: Some(format!("Dispatching to {} providers", providers.len())),
                providers,
                succeeded: None,
            },
        );
        let results = self.dispatcher.dispatch(job, &self.hub).await?;

        // --- Synthesize ---
        self.transition(job, Stage::Synthesizing).await?;
        self.hub.publish(
            job.id,
            ProgressEvent::StageChanged {
                stage: Stage::Synthesizing,
                detail: Some(Synthesizer::describe(results.len())),
                providers: Vec::new(),
                succeeded: Some(results.len()),
            },
        );
        let reconciliation = self.synthesizer.synthesize(job.id, &results).await;
        let mut report = reconciliation.report;

        // --- Render ---
        self.transition(job, Stage::Rendering).await?;
        self.hub
            .publish(job.id, ProgressEvent::stage(Stage::Rendering, "Rendering report"));
        report.document = self.renderer.render(&report, &job.query);

        // --- Persist ---
        self.store
            .update_report_output(report_id, &report.document)
            .await?;
        for citation in &report.citations {
            self.store.add_citation(report_id, citation).await?;
        }
        for conflict in &report.conflicts {
            self.store.add_conflict(report_id, conflict).await?;
        }

        self.transition(job, Stage::Done).await?;
        self.hub.publish(
            job.id,
            ProgressEvent::Report {
                report_id,
                citations: report.citations.len(),
                conflicts: report.conflicts.len(),
                document: report.document.clone(),
            },
        );

        let elapsed = started.elapsed();
        info!(
            strategy = reconciliation.strategy.as_str(),
            citations = report.citations.len(),
            conflicts = report.conflicts.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "research job complete"
        );

        Ok(PipelineOutcome {
            job_id: job.id,
            report_id,
            strategy: reconciliation.strategy,
            citations: report.citations.len(),
            conflicts: report.conflicts.len(),
            document: report.document,
            elapsed,
        })
    }

    /// Persist, then apply, a stage change.
    async fn transition(&self, job: &mut Job, next: Stage) -> Result<()> {
        if !job.stage.can_advance_to(next) {
            return job.advance(next);
        }
        self.store.set_job_stage(job.id, next, None).await?;
        job.advance(next)
    }

    async fn fail(&self, job: &mut Job, cause: &QuarryError) {
        let detail = cause.public_message();
        error!(job_id = %job.id, stage = %job.stage, error = %cause, "research job failed");

        if job.advance(Stage::Failed).is_ok() {
            if let Err(e) = self
                .store
                .set_job_stage(job.id, Stage::Failed, Some(&detail))
                .await
            {
                error!(job_id = %job.id, error = %e, "could not persist job failure");
            }
        }
        self.hub.publish(job.id, ProgressEvent::Error { detail });
    }
}
