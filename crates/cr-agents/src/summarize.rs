//! Summarizer: writes the run's final answer from every step.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use cr_core::{
    generate_structured, Error, Message, ModelHandle, PropertySchema, Result, StructuredOutput,
    ToolDefinition, ToolParameters,
};

use crate::company::{CompanyInfo, Industries};
use crate::state::AgentState;
use crate::Node;

pub const SUMMARIZE_TOOL: &str = "SummarizeTool";

pub const NO_INFORMATION: &str = "No information was found for this question.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryMode {
    /// A CompanyInfo record.
    #[default]
    Structured,
    /// Markdown narrative plus references.
    Markdown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkdownSummary {
    pub markdown: String,
    #[serde(default)]
    pub references: Vec<Reference>,
}

impl StructuredOutput for MarkdownSummary {}

/// The final output of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Answer {
    Structured { company: CompanyInfo },
    Markdown(MarkdownSummary),
    NoInformation { message: String },
}

impl Answer {
    pub fn no_information() -> Self {
        Answer::NoInformation {
            message: NO_INFORMATION.to_string(),
        }
    }

    /// Text form returned to HTTP and CLI callers.
    pub fn render(&self) -> String {
        match self {
            Answer::Structured { company } => {
                serde_json::to_string_pretty(company).unwrap_or_default()
            }
            Answer::Markdown(summary) => {
                let mut text = summary.markdown.trim_end().to_string();
                if !summary.references.is_empty() {
                    text.push_str("\n\n## References\n");
                    for reference in &summary.references {
                        text.push_str(&format!("- [{}]({})\n", reference.title, reference.url));
                    }
                }
                text
            }
            Answer::NoInformation { message } => message.clone(),
        }
    }
}

fn summarize_tool() -> ToolDefinition {
    let reference = ToolParameters::new()
        .add_property("title", PropertySchema::string("The title of the reference."), true)
        .add_property("url", PropertySchema::string("The url of the reference."), true)
        .into_object("A reference");

    ToolDefinition::new(
        SUMMARIZE_TOOL,
        "Summarize the final result. Make sure that the summary is complete and \
         includes all relevant information and reference links.",
    )
    .with_parameters(
        ToolParameters::new()
            .add_property(
                "markdown",
                PropertySchema::string(
                    "The markdown formatted summary of the final result. \
                     If you add any headings, make sure to start at the top level (#).",
                ),
                true,
            )
            .add_property("references", PropertySchema::array("A list of references.", reference), true),
    )
}

fn instructions(steps: &str, industries: &Industries, mode: SummaryMode) -> String {
    let closing = match mode {
        SummaryMode::Structured => format!(
            "Combine the results into a single company profile by calling the CompanyInfo tool. \
             Prefer values that several steps agree on.\n{}",
            industries.instruction()
        ),
        SummaryMode::Markdown => {
            "Please summarize the final result and include all relevant information and reference links."
                .to_string()
        }
    };
    format!(
        "The system has performed a series of steps to answer the user's query.\n\
         These are all of the steps: {steps}\n\n\
         {closing}"
    )
}

pub struct Summarizer {
    mode: SummaryMode,
    industries: Arc<Industries>,
}

impl Summarizer {
    pub fn new(mode: SummaryMode, industries: Arc<Industries>) -> Self {
        Self { mode, industries }
    }

    pub async fn summarize(&self, model: &ModelHandle, state: &AgentState) -> Result<Answer> {
        if state.steps.is_empty() {
            return Ok(Answer::no_information());
        }

        let prompt = instructions(&serde_json::to_string(&state.steps)?, &self.industries, self.mode);
        let messages = vec![Message::user(prompt)];

        match self.mode {
            SummaryMode::Structured => {
                let company: CompanyInfo =
                    generate_structured(model, messages, CompanyInfo::tool_definition(&self.industries))
                        .await?;
                Ok(Answer::Structured { company })
            }
            SummaryMode::Markdown => {
                let summary: MarkdownSummary =
                    generate_structured(model, messages, summarize_tool()).await?;
                Ok(Answer::Markdown(summary))
            }
        }
    }
}

#[async_trait]
impl Node for Summarizer {
    fn name(&self) -> &'static str {
        "summarize"
    }

    async fn run(&self, model: &ModelHandle, state: &mut AgentState) -> Result<()> {
        if state.answer.is_some() {
            return Err(Error::invalid_state("Answer has already been written"));
        }
        let answer = self.summarize(model, state).await?;
        info!(run_id = %state.run_id, steps = state.steps.len(), "Summary written");
        state.answer = Some(answer);
        Ok(())
    }
}
