//! Extractor: turns a step's raw search payload into CompanyInfo records
//! and completes the step.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use cr_core::{generate_structured, Error, Message, ModelHandle, Result};

use crate::company::{CompanyInfo, Industries, COMPANY_INFO_KEYS};
use crate::state::{first_pending, AgentState, StepKind, StepStatus, DONE_UPDATE, SEARCHING_UPDATE};
use crate::Node;

/// How the model is asked for the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    /// Forced tool call against the CompanyInfo schema.
    #[default]
    Structured,
    /// Plain completion; JSON is dug out of the reply text.
    FreeText,
}

fn instructions(step: &str, industries: &Industries, mode: ExtractionMode) -> String {
    let format_line = match mode {
        ExtractionMode::Structured => "Return the result by calling the CompanyInfo tool.",
        ExtractionMode::FreeText => "Format the answer strictly as JSON.",
    };
    format!(
        "This step was just executed: {step}\n\n\
         NOTE: When generating the output, ensure that the 'capital' and 'number_of_employees' fields are integers.\n\n\
         The search has returned a set of results related to corporate information.\n\n\
         Please summarize ONLY the search results.\n\
         The response must include the following keys:\n\
         - {keys}\n\n\
         {industry}\n\
         Do not include any extra information.\n\
         {format_line}",
        keys = COMPANY_INFO_KEYS.join(", "),
        industry = industries.instruction(),
    )
}

/// First fenced block, with an optional `json` tag in any case.
static FENCE: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"(?si)```(?:json)?\s*(.*?)```"));

/// Pull the JSON out of a free-text reply: the first fenced block if there
/// is one, otherwise the whole body.
pub fn parse_free_text(content: &str) -> Result<Vec<CompanyInfo>> {
    let fence = FENCE
        .as_ref()
        .map_err(|e| Error::Unknown(format!("bad fence pattern: {e}")))?;
    let body = fence
        .captures(content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(content)
        .trim();

    let value: Value = serde_json::from_str(body)
        .map_err(|e| Error::validation(format!("extraction reply is not valid JSON: {e}")))?;
    CompanyInfo::parse_list(value)
}

pub struct Extractor {
    mode: ExtractionMode,
    industries: Arc<Industries>,
}

impl Extractor {
    pub fn new(mode: ExtractionMode, industries: Arc<Industries>) -> Self {
        Self { mode, industries }
    }

    async fn extract(&self, model: &ModelHandle, messages: Vec<Message>) -> Result<Vec<CompanyInfo>> {
        match self.mode {
            ExtractionMode::Structured => {
                let record: CompanyInfo =
                    generate_structured(model, messages, CompanyInfo::tool_definition(&self.industries))
                        .await?;
                Ok(vec![record])
            }
            ExtractionMode::FreeText => {
                let response = model.complete(model.request(messages)).await?;
                debug!(content_len = response.message.content.len(), "Free-text extraction reply");
                parse_free_text(&response.message.content)
            }
        }
    }
}

#[async_trait]
impl Node for Extractor {
    fn name(&self) -> &'static str {
        "extract"
    }

    async fn run(&self, model: &ModelHandle, state: &mut AgentState) -> Result<()> {
        let index = first_pending(&state.steps).ok_or_else(|| Error::invalid_state("No current step"))?;
        let step = &state.steps[index];
        if step.kind != StepKind::Search {
            return Err(Error::invalid_state("Current step is not of type search"));
        }
        if step.search_result.is_none() {
            return Err(Error::invalid_state("Current step has no search result"));
        }
        let question = state
            .question()
            .ok_or_else(|| Error::invalid_state("Run has no question"))?;

        let prompt = instructions(&serde_json::to_string(step)?, &self.industries, self.mode);
        let records = self
            .extract(model, vec![question.clone(), Message::user(prompt)])
            .await?;
        let result = serde_json::to_value(&records)?;

        let step = &mut state.steps[index];
        step.result = Some(result);
        step.search_result = None;
        step.status = StepStatus::Complete;
        step.push_update(DONE_UPDATE);
        info!(
            run_id = %state.run_id,
            step_id = %step.id,
            records = records.len(),
            "Extraction complete"
        );

        if let Some(next) = first_pending(&state.steps) {
            state.steps[next].updates = vec![SEARCHING_UPDATE.to_string()];
        }
        Ok(())
    }
}
