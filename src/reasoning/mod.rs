//! The reasoning-service boundary.
//!
//! Everything that needs a collaborator call (request analysis, off-key
//! suggestions, next-step recommendations) goes through [`ReasoningService`].
//! The engine never talks to a model client directly, so tests can inject
//! scripted replies and production can wire in whatever client it owns.

use crate::error::ReasoningError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

/// A text-in, text-out reasoning collaborator.
#[async_trait]
pub trait ReasoningService: Send + Sync + fmt::Debug {
    /// Generate a reply for the given prompt.
    async fn generate(&self, prompt: &str) -> Result<String, ReasoningError>;
}

/// Call the service with a deadline. Elapsed deadlines surface as
/// [`ReasoningError::Timeout`] so callers can degrade instead of hanging.
pub async fn call_with_timeout(
    service: &dyn ReasoningService,
    prompt: &str,
    deadline: Duration,
) -> Result<String, ReasoningError> {
    match tokio::time::timeout(deadline, service.generate(prompt)).await {
        Ok(result) => result,
        Err(_) => Err(ReasoningError::Timeout {
            seconds: deadline.as_secs(),
        }),
    }
}

/// Test double that replays a fixed queue of replies.
///
/// Once the queue is exhausted it keeps returning the last reply, so a
/// single canned analysis can drive a whole workflow in tests.
#[derive(Debug, Default)]
pub struct ScriptedReasoner {
    replies: Mutex<VecDeque<String>>,
    last: Mutex<Option<String>>,
}

impl ScriptedReasoner {
    pub fn new(replies: Vec<String>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            last: Mutex::new(None),
        }
    }

    pub fn single(reply: impl Into<String>) -> Self {
        Self::new(vec![reply.into()])
    }
}

#[async_trait]
impl ReasoningService for ScriptedReasoner {
    async fn generate(&self, _prompt: &str) -> Result<String, ReasoningError> {
        let mut queue = self.replies.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(reply) = queue.pop_front() {
            let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
            *last = Some(reply.clone());
            return Ok(reply);
        }
        let last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        match last.as_ref() {
            Some(reply) => Ok(reply.clone()),
            None => Err(ReasoningError::CallFailed {
                message: "scripted reasoner has no replies".to_string(),
            }),
        }
    }
}

/// Test double that always fails, for exercising fallback paths.
#[derive(Debug, Default)]
pub struct FailingReasoner;

#[async_trait]
impl ReasoningService for FailingReasoner {
    async fn generate(&self, _prompt: &str) -> Result<String, ReasoningError> {
        Err(ReasoningError::CallFailed {
            message: "reasoning service unavailable".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_reasoner_replays_then_repeats() {
        let reasoner = ScriptedReasoner::new(vec!["one".into(), "two".into()]);
        assert_eq!(reasoner.generate("p").await.unwrap(), "one");
        assert_eq!(reasoner.generate("p").await.unwrap(), "two");
        assert_eq!(reasoner.generate("p").await.unwrap(), "two");
    }

    #[tokio::test]
    async fn test_failing_reasoner_errors() {
        let reasoner = FailingReasoner;
        assert!(reasoner.generate("p").await.is_err());
    }

    #[tokio::test]
    async fn test_timeout_surfaces_as_error() {
        #[derive(Debug)]
        struct SlowReasoner;

        #[async_trait]
        impl ReasoningService for SlowReasoner {
            async fn generate(&self, _prompt: &str) -> Result<String, ReasoningError> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok("late".to_string())
            }
        }

        let result = call_with_timeout(&SlowReasoner, "p", Duration::from_millis(20)).await;
        assert!(matches!(result, Err(ReasoningError::Timeout { .. })));
    }
}
