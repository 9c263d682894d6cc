//! Run-scoped state threaded through the pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use cr_core::Message;

use crate::summarize::Answer;

pub const SEARCHING_UPDATE: &str = "Searching the web...";
pub const EXTRACTING_UPDATE: &str = "Extracting information...";
pub const DONE_UPDATE: &str = "Done.";

/// Unique identifier of one run. Fresh per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// What a step does. Only `search` is executable; anything else the
/// planner emits is kept verbatim so the router can reject it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Search,
    #[serde(untagged)]
    Other(String),
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepKind::Search => write!(f, "search"),
            StepKind::Other(kind) => write!(f, "{kind}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    #[default]
    Pending,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: StepKind,
    #[serde(default)]
    pub status: StepStatus,
    /// Extracted records, set when the step completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Raw search payload, present only between search and extraction.
    #[serde(default)]
    pub search_result: Option<Value>,
    #[serde(default)]
    pub updates: Vec<String>,
}

impl Step {
    pub fn search(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            kind: StepKind::Search,
            status: StepStatus::Pending,
            result: None,
            search_result: None,
            updates: Vec::new(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == StepStatus::Pending
    }

    pub fn push_update(&mut self, update: &str) {
        self.updates.push(update.to_string());
    }
}

/// Index of the first pending step, in list order.
pub fn first_pending(steps: &[Step]) -> Option<usize> {
    steps.iter().position(Step::is_pending)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub run_id: RunId,
    /// `messages[0]` is the user's question.
    pub messages: Vec<Message>,
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<Answer>,
    pub model: String,
}

impl AgentState {
    pub fn new(question: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            run_id: RunId::new(),
            messages: vec![Message::user(question)],
            steps: Vec::new(),
            answer: None,
            model: model.into(),
        }
    }

    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = run_id;
        self
    }

    /// The original question message.
    pub fn question(&self) -> Option<&Message> {
        self.messages.first()
    }

    pub fn current_step(&self) -> Option<&Step> {
        first_pending(&self.steps).map(|i| &self.steps[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_wire_format() {
        let step: Step = serde_json::from_value(json!({
            "id": "s1",
            "description": "find Acme Corp headquarters",
            "type": "search",
            "status": "pending"
        }))
        .unwrap();

        assert_eq!(step.kind, StepKind::Search);
        assert!(step.is_pending());
        assert!(step.updates.is_empty());

        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["type"], "search");
        assert_eq!(json["search_result"], Value::Null);
        assert!(json.get("result").is_none());
    }

    #[test]
    fn test_unknown_step_kind_is_kept() {
        let step: Step = serde_json::from_value(json!({
            "id": "s1",
            "description": "browse",
            "type": "browse",
            "status": "pending"
        }))
        .unwrap();

        assert_eq!(step.kind, StepKind::Other("browse".to_string()));
        assert_eq!(serde_json::to_value(&step).unwrap()["type"], "browse");
    }

    #[test]
    fn test_first_pending() {
        let mut steps = vec![Step::search("s1", "a"), Step::search("s2", "b")];
        assert_eq!(first_pending(&steps), Some(0));
        steps[0].status = StepStatus::Complete;
        assert_eq!(first_pending(&steps), Some(1));
        steps[1].status = StepStatus::Complete;
        assert_eq!(first_pending(&steps), None);
    }

    #[test]
    fn test_new_state() {
        let a = AgentState::new("Acme Corp headquarters", "openai");
        let b = AgentState::new("Acme Corp headquarters", "openai");

        assert_ne!(a.run_id, b.run_id);
        assert_eq!(a.question().unwrap().content, "Acme Corp headquarters");
        assert!(a.steps.is_empty());
        assert!(a.answer.is_none());
    }

    #[test]
    fn test_run_id_parse() {
        let id = RunId::new();
        assert_eq!(id.to_string().parse::<RunId>().unwrap(), id);
        assert!("not-a-uuid".parse::<RunId>().is_err());
    }
}
