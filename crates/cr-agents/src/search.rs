//! Search executor: has the model phrase a query for the current step and
//! runs it against the search tool.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use cr_core::{generate_tool_call, Error, Message, ModelHandle, Result, Tool};

use crate::state::{first_pending, AgentState, StepKind, EXTRACTING_UPDATE};
use crate::{today, Node};

fn instructions(all_steps: &str, step: &str, description: &str, date: &str) -> String {
    format!(
        "This is a step in a series of steps aimed at retrieving detailed corporate information.\n\
         These are all of the steps: {all_steps}\n\n\
         You are responsible for executing the following search step: {step}\n\
         The current date is {date}.\n\
         Please generate an effective search query to find corporate details relevant to the following description:\n\
         {description}\n\
         Ensure that the search query is optimized for retrieving corporate information."
    )
}

pub struct SearchExecutor {
    tool: Arc<dyn Tool>,
}

impl SearchExecutor {
    pub fn new(tool: Arc<dyn Tool>) -> Self {
        Self { tool }
    }
}

#[async_trait]
impl Node for SearchExecutor {
    fn name(&self) -> &'static str {
        "search"
    }

    async fn run(&self, model: &ModelHandle, state: &mut AgentState) -> Result<()> {
        let index = first_pending(&state.steps)
            .ok_or_else(|| Error::invalid_state("No current step"))?;
        let step = &state.steps[index];
        if step.kind != StepKind::Search {
            return Err(Error::invalid_state("Current step is not a search step"));
        }

        let prompt = instructions(
            &serde_json::to_string(&state.steps)?,
            &serde_json::to_string(step)?,
            &step.description,
            &today(),
        );

        let arguments = generate_tool_call(model, vec![Message::user(prompt)], self.tool.definition())
            .await?
            .ok_or_else(|| {
                Error::schema_violation(format!("model did not call {}", self.tool.name()))
            })?;
        debug!(step_id = %step.id, arguments = %arguments, "Search tool call");

        let output = self.tool.execute(arguments).await?;
        if output.is_error {
            return Err(Error::tool(self.tool.name(), output.content));
        }
        let payload: Value = serde_json::from_str(&output.content).map_err(|e| {
            Error::tool(self.tool.name(), format!("search returned a non-JSON payload: {e}"))
        })?;

        let step = &mut state.steps[index];
        info!(run_id = %state.run_id, step_id = %step.id, "Search complete");
        step.search_result = Some(payload);
        step.push_update(EXTRACTING_UPDATE);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::state::{Step, StepStatus, SEARCHING_UPDATE};
    use cr_core::testing::{MockProvider, MockTool};
    use cr_core::ToolChoice;

    fn planned_state() -> AgentState {
        let mut state = AgentState::new("Acme Corp headquarters", "openai");
        let mut step = Step::search("s1", "find Acme Corp headquarters");
        step.updates = vec![SEARCHING_UPDATE.to_string()];
        state.steps.push(step);
        state
    }

    #[tokio::test]
    async fn test_search_attaches_payload() {
        let provider = Arc::new(MockProvider::new());
        provider.queue_tool_call("tavily_search_results_json", json!({"query": "Acme Corp headquarters address"}));
        let tool = Arc::new(MockTool::new("tavily_search_results_json"));
        tool.queue_output(json!({"results": [{"url": "https://acme.example"}]}).to_string());

        let mut state = planned_state();
        let executor = SearchExecutor::new(tool.clone());
        executor
            .run(&ModelHandle::new(provider.clone(), "mock-model"), &mut state)
            .await
            .unwrap();

        let step = &state.steps[0];
        assert_eq!(step.search_result.as_ref().unwrap()["results"][0]["url"], "https://acme.example");
        assert_eq!(step.updates, vec![SEARCHING_UPDATE, EXTRACTING_UPDATE]);
        assert_eq!(step.status, StepStatus::Pending);
        assert_eq!(tool.calls.lock().unwrap()[0]["query"], "Acme Corp headquarters address");

        let request = provider.last_request().unwrap();
        assert_eq!(request.tool_choice, Some(ToolChoice::tool("tavily_search_results_json")));
        assert!(request.messages[0].content.contains("find Acme Corp headquarters"));
    }

    #[tokio::test]
    async fn test_no_pending_step() {
        let provider = Arc::new(MockProvider::new());
        let mut state = planned_state();
        state.steps[0].status = StepStatus::Complete;

        let err = SearchExecutor::new(Arc::new(MockTool::new("search")))
            .run(&ModelHandle::new(provider, "mock-model"), &mut state)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid state: No current step");
    }

    #[tokio::test]
    async fn test_wrong_step_type() {
        let provider = Arc::new(MockProvider::new());
        let mut state = planned_state();
        state.steps[0].kind = StepKind::Other("browse".to_string());

        let err = SearchExecutor::new(Arc::new(MockTool::new("search")))
            .run(&ModelHandle::new(provider, "mock-model"), &mut state)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid state: Current step is not a search step");
    }

    #[tokio::test]
    async fn test_tool_failure_leaves_step_untouched() {
        let provider = Arc::new(MockProvider::new());
        provider.queue_tool_call("search", json!({"query": "Acme"}));
        let tool = Arc::new(MockTool::new("search"));
        tool.queue_error(Error::network("connection reset"));

        let mut state = planned_state();
        let before = state.steps.clone();
        let err = SearchExecutor::new(tool)
            .run(&ModelHandle::new(provider, "mock-model"), &mut state)
            .await
            .unwrap_err();

        assert!(err.is_upstream());
        assert_eq!(state.steps, before);
    }
}
