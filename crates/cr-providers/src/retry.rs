use std::sync::Arc;

use async_trait::async_trait;

use cr_core::{retry, CompletionRequest, CompletionResponse, Error, Provider, RetryPolicy};

/// Wraps a provider so that transient failures are retried with backoff.
pub struct RetryingProvider {
    inner: Arc<dyn Provider>,
    policy: RetryPolicy,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn Provider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl Provider for RetryingProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn default_model(&self) -> Option<&str> {
        self.inner.default_model()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, Error> {
        retry(&self.policy, self.inner.name(), || {
            self.inner.complete(request.clone())
        })
        .await
    }

    fn available_models(&self) -> Vec<&str> {
        self.inner.available_models()
    }
}
