//! In-crate stubs for dispatcher, synthesis and pipeline tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use quarry_providers::ResearchProvider;
use quarry_shared::{Claim, ContextDocument, ProgressEvent, ProviderResult, QuarryError, Result};

use crate::hub::Subscription;
use crate::synthesis::SynthesisDelegate;

enum Behavior {
    Succeed(ProviderResult),
    SleepThen(Duration, ProviderResult),
    Fail(String),
}

pub(crate) struct StubProvider {
    name: String,
    behavior: Behavior,
}

impl StubProvider {
    pub(crate) fn ok(name: &str, result: ProviderResult) -> Arc<dyn ResearchProvider> {
        Self::build(name, Behavior::Succeed(result))
    }

    pub(crate) fn slow(name: &str, delay: Duration, result: ProviderResult) -> Arc<dyn ResearchProvider> {
        Self::build(name, Behavior::SleepThen(delay, result))
    }

    pub(crate) fn failing(name: &str, message: &str) -> Arc<dyn ResearchProvider> {
        Self::build(name, Behavior::Fail(message.to_string()))
    }

    fn build(name: &str, behavior: Behavior) -> Arc<dyn ResearchProvider> {
        Arc::new(Self {
            name: name.to_string(),
            behavior,
        })
    }
}

#[async_trait]
impl ResearchProvider for StubProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn research(&self, _query: &str, _context: &[ContextDocument]) -> Result<ProviderResult> {
        match &self.behavior {
            Behavior::Succeed(result) => Ok(result.clone()),
            Behavior::SleepThen(delay, result) => {
                tokio::time::sleep(*delay).await;
                Ok(result.clone())
            }
            Behavior::Fail(message) => Err(QuarryError::provider(&self.name, message.clone())),
        }
    }
}

/// A provider result holding one claim per `(text, confidence)` pair.
pub(crate) fn claim_result(claims: &[(&str, f64)]) -> ProviderResult {
    ProviderResult {
        summary: "stub summary".into(),
        claims: claims
            .iter()
            .map(|(text, confidence)| Claim::new(*text, *confidence))
            .collect(),
        raw_response: String::new(),
    }
}

/// Everything queued on a subscription right now.
pub(crate) fn drain(sub: &mut Subscription) -> Vec<ProgressEvent> {
    std::iter::from_fn(|| sub.try_recv()).collect()
}

/// Delegate returning a canned reply (or error) and counting calls.
pub(crate) struct StubDelegate {
    reply: std::result::Result<String, String>,
    delay: Option<Duration>,
    pub(crate) calls: AtomicUsize,
}

impl StubDelegate {
    pub(crate) fn replying(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(reply.to_string()),
            delay: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(message.to_string()),
            delay: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn hanging() -> Arc<Self> {
        Arc::new(Self {
            reply: Ok("{}".to_string()),
            delay: Some(Duration::from_secs(30)),
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SynthesisDelegate for StubDelegate {
    async fn merge(&self, _input: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.reply.clone().map_err(QuarryError::Synthesis)
    }
}
