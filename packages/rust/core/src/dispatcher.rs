//! Fan-out of one job to every configured provider.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use quarry_providers::ResearchProvider;
use quarry_shared::{
    DispatchConfig, Job, ProgressEvent, ProviderResult, ProviderStatus, QuarryError, Result,
    truncate_chars,
};
use tracing::{error, info, instrument, warn};

use crate::hub::ProgressHub;

/// Longest failure message carried in a provider update.
const MAX_FAILURE_CHARS: usize = 200;

/// Runs a job across a fixed, ordered provider set.
pub struct Dispatcher {
    providers: Vec<Arc<dyn ResearchProvider>>,
    config: DispatchConfig,
}

impl Dispatcher {
    /// Fails with a config error when `providers` is empty.
    pub fn new(providers: Vec<Arc<dyn ResearchProvider>>, config: DispatchConfig) -> Result<Self> {
        if providers.is_empty() {
            return Err(QuarryError::config("at least one research provider is required"));
        }
        Ok(Self { providers, config })
    }

    /// Provider names in dispatch order.
    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    /// Run every provider concurrently against the job's query and context.
    ///
    /// Returns `(name, result)` for each provider that succeeded, in provider
    /// order. Publishes exactly one provider update per provider as it settles.
    #[instrument(skip_all, fields(job_id = %job.id, providers = self.providers.len()))]
    pub async fn dispatch(
        &self,
        job: &Job,
        hub: &ProgressHub,
    ) -> Result<Vec<(String, ProviderResult)>> {
        let outcomes = join_all(
            self.providers
                .iter()
                .map(|provider| self.run_provider(provider.as_ref(), job, hub)),
        )
        .await;

        let results: Vec<(String, ProviderResult)> = outcomes.into_iter().flatten().collect();

        if results.is_empty() {
            error!(attempted = self.providers.len(), "all providers failed");
            return Err(QuarryError::AllProvidersFailed {
                attempted: self.providers.len(),
            });
        }

        info!(
            succeeded = results.len(),
            failed = self.providers.len() - results.len(),
            "dispatch complete"
        );
        Ok(results)
    }

    async fn run_provider(
        &self,
        provider: &dyn ResearchProvider,
        job: &Job,
        hub: &ProgressHub,
    ) -> Option<(String, ProviderResult)> {
        let name = provider.name().to_string();
        let limit = provider.timeout().unwrap_or(self.config.provider_timeout);
        let started = Instant::now();

        info!(provider = %name, "dispatching");

        let outcome =
            match tokio::time::timeout(limit, provider.research(&job.query, &job.context)).await {
                Ok(Ok(result)) => Ok(result.normalized()),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(QuarryError::ProviderTimeout {
                    provider: name.clone(),
                    secs: timeout_secs(limit),
                }),
            };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) => {
                info!(provider = %name, claims = result.claims.len(), elapsed_ms, "provider succeeded");
                hub.publish(
                    job.id,
                    ProgressEvent::ProviderUpdate {
                        name: name.clone(),
                        status: ProviderStatus::Succeeded,
                        claims: Some(result.claims.len()),
                        error: None,
                    },
                );
                Some((name, result))
            }
            Err(e) => {
                warn!(provider = %name, error = %e, elapsed_ms, "provider failed");
                hub.publish(
                    job.id,
                    ProgressEvent::ProviderUpdate {
                        name,
                        status: ProviderStatus::Failed,
                        claims: None,
                        error: Some(truncate_chars(&e.to_string(), MAX_FAILURE_CHARS)),
                    },
                );
                None
            }
        }
    }
}

/// Whole seconds for display, rounding sub-second budgets up to 1.
fn timeout_secs(limit: Duration) -> u64 {
    limit.as_secs().max(1)
}
