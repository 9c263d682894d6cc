//! Step planner: turns the user's question into an ordered list of steps.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use cr_core::{
    generate_tool_call, Error, Message, ModelHandle, PropertySchema, Result, StructuredOutput,
    ToolDefinition, ToolParameters,
};

use crate::company::COMPANY_INFO_KEYS;
use crate::state::{AgentState, Step, StepKind, StepStatus, SEARCHING_UPDATE};
use crate::{today, Node};

pub const PLANNER_TOOL: &str = "SearchTool";

const TOOL_DESCRIPTION: &str = "Break the user's query into smaller steps. \
Use step type \"search\" to search the web for information. \
Make sure to add all the steps needed to answer the user's query.";

fn instructions(date: &str) -> String {
    format!(
        "You are a corporate information search assistant.\n\
         Your task is to help the user with complex queries regarding corporate details by breaking them down into smaller steps.\n\
         Each step should contribute to finding information limited to the following keys: {keys}.\n\
         Do not search for unrelated or extraneous information.\n\
         The current date is {date}.",
        keys = COMPANY_INFO_KEYS.join(", "),
    )
}

pub fn tool_definition() -> ToolDefinition {
    let step = ToolParameters::new()
        .add_property(
            "id",
            PropertySchema::string(
                "The id of the step. This is used to identify the step in the state. Just make sure it is unique.",
            ),
            true,
        )
        .add_property(
            "description",
            PropertySchema::string(
                "The description of the step, i.e. \"search for information about the latest AI news\"",
            ),
            true,
        )
        .add_property(
            "status",
            PropertySchema::enum_string(
                "The status of the step. Always \"pending\".",
                vec!["pending".to_string()],
            ),
            true,
        )
        .add_property(
            "type",
            PropertySchema::enum_string("The type of step.", vec!["search".to_string()]),
            true,
        )
        .into_object("A search step");

    ToolDefinition::new(PLANNER_TOOL, TOOL_DESCRIPTION).with_parameters(
        ToolParameters::new().add_property("steps", PropertySchema::array("The steps", step), true),
    )
}

#[derive(Debug, Deserialize)]
struct PlannedStep {
    id: String,
    description: String,
    #[serde(rename = "type")]
    kind: StepKind,
}

#[derive(Debug, Deserialize)]
struct Plan {
    steps: Vec<PlannedStep>,
}

impl StructuredOutput for Plan {}

/// Rename repeated ids to `<id>-2`, `<id>-3`, ... keeping list order.
pub fn dedupe_ids(steps: &mut [Step]) {
    let mut seen: HashSet<String> = HashSet::new();
    for step in steps.iter_mut() {
        if seen.insert(step.id.clone()) {
            continue;
        }
        let mut n = 2;
        let mut candidate = format!("{}-{}", step.id, n);
        while seen.contains(&candidate) {
            n += 1;
            candidate = format!("{}-{}", step.id, n);
        }
        warn!(original = %step.id, renamed = %candidate, "Duplicate step id from planner");
        seen.insert(candidate.clone());
        step.id = candidate;
    }
}

pub struct Planner;

impl Planner {
    pub fn new() -> Self {
        Self
    }

    /// Ask the model for a plan. No tool call means no work.
    pub async fn plan(&self, model: &ModelHandle, question: &Message) -> Result<Vec<Step>> {
        let messages = vec![question.clone(), Message::user(instructions(&today()))];
        let Some(arguments) = generate_tool_call(model, messages, tool_definition()).await? else {
            warn!("Planner returned no tool call, nothing to do");
            return Ok(Vec::new());
        };

        let plan = Plan::from_arguments(arguments)?;
        let mut steps: Vec<Step> = plan
            .steps
            .into_iter()
            .map(|planned| Step {
                kind: planned.kind,
                status: StepStatus::Pending,
                ..Step::search(planned.id, planned.description)
            })
            .collect();

        dedupe_ids(&mut steps);
        if let Some(first) = steps.first_mut() {
            first.updates = vec![SEARCHING_UPDATE.to_string()];
        }
        Ok(steps)
    }
}

impl Default for Planner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Node for Planner {
    fn name(&self) -> &'static str {
        "planner"
    }

    async fn run(&self, model: &ModelHandle, state: &mut AgentState) -> Result<()> {
        if !state.steps.is_empty() {
            return Err(Error::invalid_state("Steps have already been planned"));
        }
        let question = state
            .question()
            .ok_or_else(|| Error::invalid_state("Run has no question"))?;

        let steps = self.plan(model, question).await?;
        info!(
            run_id = %state.run_id,
            steps = steps.len(),
            ids = ?steps.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
            "Planned steps"
        );
        state.steps = steps;
        Ok(())
    }
}
