//! Research agents for company-research.
//!
//! This crate provides:
//! - `Node` trait implemented by each pipeline stage
//! - The step planner, search executor, extractor and summarizer
//! - The router and the `ResearchGraph` that drives a run
//! - An in-memory checkpointer keyed by run id
//! - The race prediction agent

use async_trait::async_trait;

use cr_core::{ModelHandle, Result};

mod checkpoint;
mod company;
mod extract;
mod graph;
mod planner;
mod race;
mod router;
mod search;
mod state;
mod summarize;

pub use checkpoint::{Checkpointer, MemoryCheckpointer};
pub use company::{parse_integer, CompanyInfo, Industries, COMPANY_INFO_KEYS, COMPANY_INFO_TOOL};
pub use extract::{parse_free_text, ExtractionMode, Extractor};
pub use graph::{GraphOptions, ResearchGraph};
pub use planner::{dedupe_ids, Planner, PLANNER_TOOL};
pub use race::{Decision, RacePrediction, RacePredictor, RaceRequest};
pub use router::{next_stage, resume_stage, route, Stage};
pub use search::SearchExecutor;
pub use state::{
    first_pending, AgentState, RunId, Step, StepKind, StepStatus, DONE_UPDATE, EXTRACTING_UPDATE,
    SEARCHING_UPDATE,
};
pub use summarize::{
    Answer, MarkdownSummary, Reference, SummaryMode, Summarizer, NO_INFORMATION, SUMMARIZE_TOOL,
};

/// One stage of a research run.
///
/// A node gets exclusive access to the run state for the duration of its
/// call. On error the state is left as it was before the call.
#[async_trait]
pub trait Node: Send + Sync {
    /// Name used in logs (e.g. "planner", "extract")
    fn name(&self) -> &'static str;

    async fn run(&self, model: &ModelHandle, state: &mut AgentState) -> Result<()>;
}

/// Today's date as it appears in prompts.
pub(crate) fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}
