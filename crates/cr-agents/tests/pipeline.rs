//! End-to-end runs of the research graph against mock backends.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use cr_agents::{
    AgentState, Answer, Checkpointer, GraphOptions, MemoryCheckpointer, ResearchGraph,
    StepStatus, SummaryMode, COMPANY_INFO_TOOL, DONE_UPDATE, EXTRACTING_UPDATE, NO_INFORMATION,
    PLANNER_TOOL, SEARCHING_UPDATE, SUMMARIZE_TOOL,
};
use cr_core::testing::{FixedSelector, MockProvider, MockTool};
use cr_core::{CompletionRequest, CompletionResponse, Error, Provider};

const SEARCH_TOOL: &str = "tavily_search_results_json";

fn acme() -> Value {
    json!({
        "company_name": "Acme Corp",
        "furigana": "アクメ",
        "corporate_number": "1234567890123",
        "location": "1 Acme Way, Springfield",
        "representative_name": "Wile E. Coyote",
        "officer_names": ["Road Runner"],
        "company_url": "https://acme.example",
        "service_url": "https://acme.example/products",
        "industry": "Manufacturing",
        "establishment_date": "1949-09-17",
        "capital": 10000000,
        "number_of_employees": "1,234",
        "phone_number": null,
        "source_urls": ["https://acme.example/about"]
    })
}

fn search_payload() -> String {
    json!({
        "query": "Acme Corp headquarters",
        "answer": "Acme Corp is headquartered in Springfield.",
        "results": [{"title": "About Acme", "url": "https://acme.example/about", "content": "1 Acme Way"}]
    })
    .to_string()
}

struct Harness {
    provider: Arc<MockProvider>,
    tool: Arc<MockTool>,
    checkpoints: Arc<MemoryCheckpointer>,
    graph: ResearchGraph,
}

fn harness(options: GraphOptions) -> Harness {
    let provider = Arc::new(MockProvider::new());
    let tool = Arc::new(MockTool::new(SEARCH_TOOL));
    let checkpoints = Arc::new(MemoryCheckpointer::new(16));
    let selector = FixedSelector::new().with("openai", provider.clone());
    let graph = ResearchGraph::new(Arc::new(selector), tool.clone(), options)
        .with_checkpointer(checkpoints.clone());
    Harness {
        provider,
        tool,
        checkpoints,
        graph,
    }
}

#[tokio::test]
async fn acme_headquarters_end_to_end() {
    let h = harness(GraphOptions::default());
    h.provider.queue_tool_call(
        PLANNER_TOOL,
        json!({"steps": [{"id": "s1", "type": "search", "status": "pending", "description": "find Acme Corp headquarters"}]}),
    );
    h.provider
        .queue_tool_call(SEARCH_TOOL, json!({"query": "Acme Corp headquarters address"}));
    h.tool.queue_output(search_payload());
    h.provider.queue_tool_call(COMPANY_INFO_TOOL, acme());
    h.provider.queue_tool_call(COMPANY_INFO_TOOL, acme());

    let state = h
        .graph
        .run(AgentState::new("Acme Corp headquarters", "openai"))
        .await
        .unwrap();

    assert_eq!(state.steps.len(), 1);
    let step = &state.steps[0];
    assert_eq!(step.id, "s1");
    assert_eq!(step.status, StepStatus::Complete);
    assert!(step.search_result.is_none());
    assert_eq!(step.result.as_ref().unwrap()[0]["company_name"], "Acme Corp");
    assert_eq!(step.updates, vec![SEARCHING_UPDATE, EXTRACTING_UPDATE, DONE_UPDATE]);

    match state.answer.as_ref().unwrap() {
        Answer::Structured { company } => {
            assert_eq!(company.location, "1 Acme Way, Springfield");
            assert_eq!(company.number_of_employees, 1234);
            assert_eq!(company.phone_number, "");
        }
        other => panic!("expected a structured answer, got {other:?}"),
    }

    // plan, search, extract, summarize
    assert_eq!(h.provider.request_count(), 4);
    assert_eq!(h.provider.remaining(), 0);
    assert_eq!(h.tool.call_count(), 1);

    let summary_prompt = &h.provider.last_request().unwrap().messages[0].content;
    assert!(summary_prompt.contains("\"status\":\"complete\""));

    let saved = h.checkpoints.load(&state.run_id).await.unwrap().unwrap();
    assert_eq!(saved.answer, state.answer);
}

#[tokio::test]
async fn two_steps_run_in_order() {
    let h = harness(GraphOptions {
        summary_mode: SummaryMode::Markdown,
        ..GraphOptions::default()
    });
    h.provider.queue_tool_call(
        PLANNER_TOOL,
        json!({"steps": [
            {"id": "s1", "type": "search", "status": "pending", "description": "find Acme Corp headquarters"},
            {"id": "s1", "type": "search", "status": "pending", "description": "find Acme Corp officers"}
        ]}),
    );
    for query in ["Acme headquarters", "Acme officers"] {
        h.provider.queue_tool_call(SEARCH_TOOL, json!({ "query": query }));
        h.tool.queue_output(search_payload());
        h.provider.queue_tool_call(COMPANY_INFO_TOOL, acme());
    }
    h.provider.queue_tool_call(
        SUMMARIZE_TOOL,
        json!({"markdown": "# Acme Corp", "references": [{"title": "About Acme", "url": "https://acme.example/about"}]}),
    );

    let (_, answer) = h.graph.ask("Acme Corp headquarters", "openai").await.unwrap();

    assert!(answer.render().contains("[About Acme](https://acme.example/about)"));
    let queries: Vec<Value> = h.tool.calls.lock().unwrap().iter().map(|c| c["query"].clone()).collect();
    assert_eq!(queries, vec![json!("Acme headquarters"), json!("Acme officers")]);
}

#[tokio::test]
async fn empty_plan_reports_no_information() {
    let h = harness(GraphOptions::default());
    h.provider.queue_response("Nothing to plan.");

    let state = h
        .graph
        .run(AgentState::new("Acme Corp headquarters", "openai"))
        .await
        .unwrap();

    assert!(state.steps.is_empty());
    assert_eq!(state.answer.as_ref().unwrap().render(), NO_INFORMATION);
    assert_eq!(h.provider.request_count(), 1);
    assert_eq!(h.tool.call_count(), 0);
}

#[tokio::test]
async fn unknown_step_type_stops_the_run() {
    let h = harness(GraphOptions::default());
    h.provider.queue_tool_call(
        PLANNER_TOOL,
        json!({"steps": [{"id": "s1", "type": "browse", "status": "pending", "description": "open acme.example"}]}),
    );

    let err = h
        .graph
        .run(AgentState::new("Acme Corp headquarters", "openai"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::UnknownStepType(ref kind) if kind == "browse"));
    assert_eq!(h.tool.call_count(), 0);
}

#[tokio::test]
async fn validation_failure_is_surfaced() {
    let h = harness(GraphOptions::default());
    h.provider.queue_tool_call(
        PLANNER_TOOL,
        json!({"steps": [{"id": "s1", "type": "search", "status": "pending", "description": "find Acme Corp"}]}),
    );
    h.provider.queue_tool_call(SEARCH_TOOL, json!({"query": "Acme Corp"}));
    h.tool.queue_output(search_payload());
    let mut bad = acme();
    bad["number_of_employees"] = json!("abc");
    h.provider.queue_tool_call(COMPANY_INFO_TOOL, bad);

    let state = AgentState::new("Acme Corp", "openai");
    let run_id = state.run_id;
    let err = h.graph.run(state).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    // The last checkpoint is the state after the search step.
    let saved = h.checkpoints.load(&run_id).await.unwrap().unwrap();
    assert!(saved.steps[0].is_pending());
    assert!(saved.steps[0].search_result.is_some());
}

#[tokio::test]
async fn resumed_run_extracts_without_searching_again() {
    let h = harness(GraphOptions::default());
    h.provider.queue_tool_call(
        PLANNER_TOOL,
        json!({"steps": [{"id": "s1", "type": "search", "status": "pending", "description": "find Acme Corp"}]}),
    );
    h.provider.queue_tool_call(SEARCH_TOOL, json!({"query": "Acme Corp"}));
    h.tool.queue_output(search_payload());
    let mut bad = acme();
    bad["number_of_employees"] = json!("abc");
    h.provider.queue_tool_call(COMPANY_INFO_TOOL, bad);

    let state = AgentState::new("Acme Corp", "openai");
    let run_id = state.run_id;
    assert!(h.graph.run(state).await.is_err());
    let saved = h.checkpoints.load(&run_id).await.unwrap().unwrap();

    h.provider.queue_tool_call(COMPANY_INFO_TOOL, acme());
    h.provider.queue_tool_call(COMPANY_INFO_TOOL, acme());
    let finished = h.graph.run(saved).await.unwrap();

    assert_eq!(h.tool.call_count(), 1);
    assert_eq!(h.provider.remaining(), 0);
    let step = &finished.steps[0];
    assert_eq!(step.status, StepStatus::Complete);
    assert_eq!(step.updates, vec![SEARCHING_UPDATE, EXTRACTING_UPDATE, DONE_UPDATE]);
    assert!(finished.answer.is_some());
}

#[tokio::test]
async fn unknown_later_step_fails_before_any_search() {
    let h = harness(GraphOptions::default());
    h.provider.queue_tool_call(
        PLANNER_TOOL,
        json!({"steps": [
            {"id": "s1", "type": "search", "status": "pending", "description": "find Acme Corp"},
            {"id": "s2", "type": "browse", "status": "pending", "description": "open acme.example"}
        ]}),
    );

    let err = h
        .graph
        .run(AgentState::new("Acme Corp headquarters", "openai"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::UnknownStepType(ref kind) if kind == "browse"));
    assert_eq!(h.provider.request_count(), 1);
    assert_eq!(h.tool.call_count(), 0);
}

#[tokio::test]
async fn unknown_model_is_a_configuration_error() {
    let h = harness(GraphOptions::default());
    let err = h
        .graph
        .run(AgentState::new("Acme Corp", "gemini"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Config(_)));
    assert_eq!(h.provider.request_count(), 0);
}

#[tokio::test]
async fn runs_get_distinct_ids() {
    let h = harness(GraphOptions::default());
    h.provider.queue_response("no plan");
    h.provider.queue_response("no plan");

    let (a, _) = h.graph.ask("Acme", "openai").await.unwrap();
    let (b, _) = h.graph.ask("Acme", "openai").await.unwrap();
    assert_ne!(a, b);
    assert_eq!(h.checkpoints.len(), 2);
}

struct SlowProvider;

#[async_trait]
impl Provider for SlowProvider {
    fn name(&self) -> &str {
        "slow"
    }

    fn default_model(&self) -> Option<&str> {
        None
    }

    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, Error> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Err(Error::Unknown("unreachable".to_string()))
    }
}

#[tokio::test]
async fn deadline_cancels_a_hung_run() {
    let selector = FixedSelector::new().with("openai", Arc::new(SlowProvider));
    let graph = ResearchGraph::new(
        Arc::new(selector),
        Arc::new(MockTool::new(SEARCH_TOOL)),
        GraphOptions {
            deadline: Some(Duration::from_millis(50)),
            ..GraphOptions::default()
        },
    );

    let err = graph
        .run(AgentState::new("Acme Corp", "openai"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
}
