//! The worker invocation boundary.
//!
//! Workers run elsewhere; the orchestrator only sees `invoke(worker_id,
//! input) -> output`. Production wires in whatever transport it owns; tests
//! and demos use [`MockWorkerInvoker`].

use crate::error::WorkerError;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

/// Default per-invocation deadline.
pub const DEFAULT_WORKER_TIMEOUT: Duration = Duration::from_secs(300);

/// Dispatches one worker invocation. Input and output are opaque JSON
/// blobs assembled by the context store.
#[async_trait]
pub trait WorkerInvoker: Send + Sync + fmt::Debug {
    async fn invoke(&self, worker_id: &str, input: &Value) -> Result<Value, WorkerError>;
}

/// Invoke with a deadline. Elapsed deadlines surface as
/// [`WorkerError::Timeout`].
pub async fn invoke_with_timeout(
    invoker: &dyn WorkerInvoker,
    worker_id: &str,
    input: &Value,
    deadline: Duration,
) -> Result<Value, WorkerError> {
    match tokio::time::timeout(deadline, invoker.invoke(worker_id, input)).await {
        Ok(result) => result,
        Err(_) => Err(WorkerError::Timeout {
            worker_id: worker_id.to_string(),
            seconds: deadline.as_secs(),
        }),
    }
}

/// Test and demo invoker with canned per-worker outputs.
///
/// Known worker ids produce plausible structured results keyed off the
/// request's business goal; unknown ids produce a generic completion blob.
/// Specific workers can be made to fail, and an artificial delay can be
/// added for timeout and cancellation tests.
#[derive(Debug, Default)]
pub struct MockWorkerInvoker {
    failing: HashSet<String>,
    overrides: HashMap<String, Value>,
    delay: Option<Duration>,
}

impl MockWorkerInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `worker_id` fail every invocation.
    pub fn failing(mut self, worker_id: &str) -> Self {
        self.failing.insert(worker_id.to_string());
        self
    }

    /// Return `output` for `worker_id` instead of the canned result.
    pub fn with_output(mut self, worker_id: &str, output: Value) -> Self {
        self.overrides.insert(worker_id.to_string(), output);
        self
    }

    /// Sleep before every invocation.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn canned_output(worker_id: &str, goal: &str) -> Value {
        match worker_id {
            "logo_generation_agent" => json!({
                "logo_created": true,
                "logo_description": format!("Professional logo for {}", goal),
                "file_formats": ["PNG", "SVG", "JPG"],
                "status": "completed"
            }),
            "branding_agent" => json!({
                "brand_strategy": format!("Comprehensive brand strategy for {}", goal),
                "brand_guidelines": "Professional brand guidelines created",
                "status": "completed"
            }),
            "market_research_agent" => json!({
                "market_analysis": format!("Market research completed for {}", goal),
                "target_audience": "Primary target audience identified",
                "competitors": ["Competitor 1", "Competitor 2"],
                "status": "completed"
            }),
            "website_generator_agent" => json!({
                "website_created": true,
                "pages": ["home", "about", "services", "contact"],
                "responsive": true,
                "status": "completed"
            }),
            "content_creator_agent" => json!({
                "content_created": true,
                "content_type": "marketing_copy",
                "word_count": 250,
                "status": "completed"
            }),
            "design_services_agent" => json!({
                "design_package": "Complete design package created",
                "mockups": 3,
                "style_guide": true,
                "status": "completed"
            }),
            "technical_implementation_agent" => json!({
                "implementation_plan": format!("Technical implementation plan for {}", goal),
                "architecture": "microservices",
                "timeline": "4-6 weeks",
                "status": "completed"
            }),
            "data_analysis_agent" => json!({
                "analysis_completed": true,
                "key_insights": ["Insight 1", "Insight 2", "Insight 3"],
                "recommendations": ["Recommendation 1", "Recommendation 2"],
                "status": "completed"
            }),
            other => json!({
                "worker_id": other,
                "business_goal": goal,
                "status": "completed",
                "message": format!("Mock execution completed for {}", other)
            }),
        }
    }
}

#[async_trait]
impl WorkerInvoker for MockWorkerInvoker {
    async fn invoke(&self, worker_id: &str, input: &Value) -> Result<Value, WorkerError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.contains(worker_id) {
            return Err(WorkerError::Invocation {
                message: format!("mock failure for {}", worker_id),
            });
        }

        if let Some(output) = self.overrides.get(worker_id) {
            return Ok(output.clone());
        }

        let goal = input
            .get("business_goal")
            .and_then(Value::as_str)
            .unwrap_or("business goal");
        Ok(Self::canned_output(worker_id, goal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_canned_outputs() {
        let invoker = MockWorkerInvoker::new();
        let input = json!({"business_goal": "open a bakery"});

        let out = invoker.invoke("branding_agent", &input).await.unwrap();
        assert!(out["brand_strategy"]
            .as_str()
            .unwrap()
            .contains("open a bakery"));

        let out = invoker.invoke("some_new_agent", &input).await.unwrap();
        assert_eq!(out["worker_id"], "some_new_agent");
    }

    #[tokio::test]
    async fn test_failing_worker() {
        let invoker = MockWorkerInvoker::new().failing("branding_agent");
        let result = invoker.invoke("branding_agent", &json!({})).await;
        assert!(matches!(result, Err(WorkerError::Invocation { .. })));
    }

    #[tokio::test]
    async fn test_timeout() {
        let invoker = MockWorkerInvoker::new().with_delay(Duration::from_secs(5));
        let result = invoke_with_timeout(
            &invoker,
            "branding_agent",
            &json!({}),
            Duration::from_millis(20),
        )
        .await;
        assert!(matches!(result, Err(WorkerError::Timeout { .. })));
    }
}
