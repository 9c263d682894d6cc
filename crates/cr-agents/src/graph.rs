//! The research run: plan, then search and extract once per step, then
//! summarize.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use cr_core::{Error, ModelHandle, ModelSelector, Result, Tool};

use crate::checkpoint::{Checkpointer, MemoryCheckpointer};
use crate::company::Industries;
use crate::extract::{ExtractionMode, Extractor};
use crate::planner::Planner;
use crate::router::{next_stage, resume_stage, Stage};
use crate::search::SearchExecutor;
use crate::state::{AgentState, RunId};
use crate::summarize::{Answer, SummaryMode, Summarizer};
use crate::Node;

pub struct ResearchGraph {
    selector: Arc<dyn ModelSelector>,
    planner: Planner,
    search: SearchExecutor,
    extractor: Extractor,
    summarizer: Summarizer,
    checkpointer: Arc<dyn Checkpointer>,
    deadline: Option<Duration>,
}

/// Builder knobs for [`ResearchGraph`].
#[derive(Debug, Clone, Default)]
pub struct GraphOptions {
    pub extraction_mode: ExtractionMode,
    pub summary_mode: SummaryMode,
    pub industries: Industries,
    pub deadline: Option<Duration>,
}

impl ResearchGraph {
    pub fn new(
        selector: Arc<dyn ModelSelector>,
        search_tool: Arc<dyn Tool>,
        options: GraphOptions,
    ) -> Self {
        let industries = Arc::new(options.industries);
        Self {
            selector,
            planner: Planner::new(),
            search: SearchExecutor::new(search_tool),
            extractor: Extractor::new(options.extraction_mode, industries.clone()),
            summarizer: Summarizer::new(options.summary_mode, industries),
            checkpointer: Arc::new(MemoryCheckpointer::default()),
            deadline: options.deadline,
        }
    }

    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn Checkpointer>) -> Self {
        self.checkpointer = checkpointer;
        self
    }

    pub fn checkpointer(&self) -> &Arc<dyn Checkpointer> {
        &self.checkpointer
    }

    pub async fn load(&self, run_id: &RunId) -> Result<Option<AgentState>> {
        self.checkpointer.load(run_id).await
    }

    /// Run a fresh question end to end and return its answer.
    pub async fn ask(&self, question: &str, model: &str) -> Result<(RunId, Answer)> {
        let state = self.run(AgentState::new(question, model)).await?;
        let answer = state.answer.unwrap_or_else(Answer::no_information);
        Ok((state.run_id, answer))
    }

    /// Drive `state` to completion, within the deadline if one is set.
    ///
    /// On expiry the in-flight upstream call is dropped and the last
    /// checkpoint is left as it was.
    pub async fn run(&self, state: AgentState) -> Result<AgentState> {
        let run_id = state.run_id;
        match self.deadline {
            Some(deadline) => tokio::time::timeout(deadline, self.drive(state))
                .await
                .map_err(|_| {
                    warn!(run_id = %run_id, deadline_secs = deadline.as_secs(), "Run deadline exceeded");
                    Error::timeout(format!("run exceeded its {}s deadline", deadline.as_secs()))
                })?,
            None => self.drive(state).await,
        }
    }

    fn node(&self, stage: Stage) -> Option<&dyn Node> {
        match stage {
            Stage::Plan => Some(&self.planner),
            Stage::Search => Some(&self.search),
            Stage::Extract => Some(&self.extractor),
            Stage::Summarize => Some(&self.summarizer),
            Stage::End => None,
        }
    }

    async fn drive(&self, mut state: AgentState) -> Result<AgentState> {
        let model: ModelHandle = self.selector.select(&state.model)?;
        info!(
            run_id = %state.run_id,
            model_id = %state.model,
            model = model.model(),
            provider = model.provider_name(),
            "Run started"
        );
        self.checkpointer.save(&state).await?;

        let mut stage = if state.answer.is_some() {
            Stage::End
        } else if state.steps.is_empty() {
            Stage::Plan
        } else {
            resume_stage(&state.steps)?
        };

        while let Some(node) = self.node(stage) {
            debug!(run_id = %state.run_id, node = node.name(), "Entering node");
            node.run(&model, &mut state).await?;
            self.checkpointer.save(&state).await?;
            stage = next_stage(stage, &state.steps)?;
        }

        info!(run_id = %state.run_id, steps = state.steps.len(), "Run finished");
        Ok(state)
    }
}
