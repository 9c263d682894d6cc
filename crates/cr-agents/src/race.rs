//! Race prediction: query → search → analyse → evaluate, repeated until the
//! model is satisfied or the round limit is hit.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use cr_core::{Error, Message, ModelHandle, Result, Tool};
use cr_tools::top_snippets;

const TEMPERATURE: f32 = 0.7;
const SNIPPETS_PER_SEARCH: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaceRequest {
    pub date: NaiveDate,
    pub race_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RacePrediction {
    pub date: String,
    pub race_name: String,
    pub prediction: String,
    pub search_queries: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Continue,
    Complete,
}

impl Decision {
    /// Anything that does not ask to continue ends the loop.
    pub fn parse(text: &str) -> Self {
        let text = text.trim().to_lowercase();
        if text.contains("continue") && !text.contains("complete") {
            Decision::Continue
        } else {
            Decision::Complete
        }
    }
}

fn query_prompt(date: &NaiveDate, race_name: &str, previous: &[String]) -> String {
    let mut prompt = format!(
        "Generate the best web search query for the following race.\n\
         Date: {date}\n\
         Race name: {race_name}\n"
    );
    if !previous.is_empty() {
        prompt.push_str(&format!(
            "These queries were already tried and did not give enough information: {}\n\
             Write a different one.\n",
            previous.join(" | ")
        ));
    }
    prompt.push_str("Reply with the query only.");
    prompt
}

fn analysis_prompt(info: &str) -> String {
    format!(
        "Analyse the following race information and produce a prediction.\n\
         If the information is insufficient, say so.\n\n\
         Information:\n{info}\n\n\
         Prediction:"
    )
}

fn evaluation_prompt(analysis: &str) -> String {
    format!(
        "Evaluate the following analysis and decide whether more information is needed.\n\
         Reply \"continue\" if it is, or \"complete\" if it is not.\n\n\
         Analysis:\n{analysis}\n\n\
         Decision:"
    )
}

pub struct RacePredictor {
    search: Arc<dyn Tool>,
    max_rounds: usize,
}

impl RacePredictor {
    pub fn new(search: Arc<dyn Tool>) -> Self {
        Self {
            search,
            max_rounds: 3,
        }
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    async fn ask(model: &ModelHandle, prompt: String) -> Result<String> {
        let response = model.complete(model.request(vec![Message::user(prompt)])).await?;
        Ok(response.message.content.trim().to_string())
    }

    async fn snippets(&self, query: &str) -> Result<String> {
        let output = self.search.execute(json!({ "query": query })).await?;
        if output.is_error {
            return Err(Error::tool(self.search.name(), output.content));
        }
        let payload: Value = serde_json::from_str(&output.content).map_err(|e| {
            Error::tool(self.search.name(), format!("search returned a non-JSON payload: {e}"))
        })?;
        Ok(top_snippets(&payload, SNIPPETS_PER_SEARCH).join("\n"))
    }

    pub async fn predict(&self, model: &ModelHandle, request: &RaceRequest) -> Result<RacePrediction> {
        let model = model.clone().with_temperature(TEMPERATURE);
        let mut queries: Vec<String> = Vec::new();
        let mut analysis = String::new();

        for round in 1..=self.max_rounds {
            let query = Self::ask(&model, query_prompt(&request.date, &request.race_name, &queries)).await?;
            if query.is_empty() {
                return Err(Error::schema_violation("model returned an empty search query"));
            }
            debug!(round, query = %query, "Race search query");
            let info = self.snippets(&query).await?;
            queries.push(query);

            analysis = Self::ask(&model, analysis_prompt(&info)).await?;
            let decision = Decision::parse(&Self::ask(&model, evaluation_prompt(&analysis)).await?);
            debug!(round, ?decision, "Race evaluation");
            if decision == Decision::Complete {
                break;
            }
        }

        info!(
            race_name = %request.race_name,
            rounds = queries.len(),
            "Race prediction complete"
        );
        Ok(RacePrediction {
            date: request.date.to_string(),
            race_name: request.race_name.clone(),
            prediction: analysis,
            search_queries: queries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cr_core::testing::{MockProvider, MockTool};

    fn request() -> RaceRequest {
        RaceRequest {
            date: NaiveDate::from_ymd_opt(2024, 12, 22).unwrap(),
            race_name: "Arima Kinen".to_string(),
        }
    }

    fn results(snippets: &[&str]) -> String {
        let rows: Vec<Value> = snippets
            .iter()
            .enumerate()
            .map(|(i, s)| json!({"title": "t", "url": format!("https://news.example/{i}"), "content": s}))
            .collect();
        json!({ "results": rows }).to_string()
    }

    #[test]
    fn test_decision_parse() {
        assert_eq!(Decision::parse(" Continue\n"), Decision::Continue);
        assert_eq!(Decision::parse("complete"), Decision::Complete);
        assert_eq!(Decision::parse("I am not sure"), Decision::Complete);
    }

    #[tokio::test]
    async fn test_single_round() {
        let provider = Arc::new(MockProvider::new());
        provider.queue_response("Arima Kinen 2024 entries");
        provider.queue_response("Horse A is the favourite.");
        provider.queue_response("complete");
        let search = Arc::new(MockTool::new("search"));
        search.queue_output(results(&["a", "b", "c", "d"]));

        let prediction = RacePredictor::new(search.clone())
            .predict(&ModelHandle::new(provider.clone(), "mock-model"), &request())
            .await
            .unwrap();

        assert_eq!(prediction.date, "2024-12-22");
        assert_eq!(prediction.prediction, "Horse A is the favourite.");
        assert_eq!(prediction.search_queries, vec!["Arima Kinen 2024 entries"]);

        let requests = provider.captured_requests.lock().unwrap();
        assert!(requests[1].messages[0].content.contains("Information:\na\nb\nc\n\n"));
        assert_eq!(requests[0].temperature, Some(TEMPERATURE));
    }

    #[tokio::test]
    async fn test_round_limit() {
        let provider = Arc::new(MockProvider::new());
        let search = Arc::new(MockTool::new("search"));
        for round in 0..2 {
            provider.queue_response(&format!("query {round}"));
            provider.queue_response("Not enough data.");
            provider.queue_response("continue");
            search.queue_output(results(&["snippet"]));
        }

        let prediction = RacePredictor::new(search.clone())
            .with_max_rounds(2)
            .predict(&ModelHandle::new(provider.clone(), "mock-model"), &request())
            .await
            .unwrap();

        assert_eq!(prediction.search_queries, vec!["query 0", "query 1"]);
        assert_eq!(search.call_count(), 2);
        assert_eq!(provider.remaining(), 0);
        let requests = provider.captured_requests.lock().unwrap();
        assert!(requests[3].messages[0].content.contains("query 0"));
    }
}
