//! Core orchestration for Quarry research jobs.
//!
//! A job is fanned out to every configured provider by the [`Dispatcher`],
//! reconciled into one report by the [`Synthesizer`], rendered, persisted
//! through a [`ReportStore`], and observed live through the [`ProgressHub`].

pub mod dispatcher;
pub mod hub;
pub mod pipeline;
pub mod store;
pub mod synthesis;

#[cfg(test)]
mod test_support;

pub use dispatcher::Dispatcher;
pub use hub::{ObserverId, ProgressHub, Subscription};
pub use pipeline::{PipelineOutcome, ResearchPipeline, SubmittedJob};
pub use store::{InMemoryStore, ReportStore};
pub use synthesis::{
    AnthropicSynthesisDelegate, MergeOutcome, MergeStrategy, Reconciliation, SynthesisDelegate,
    Synthesizer,
};
