//! Priority- and tag-based routing across LLM providers
//!
//! Routing order: exact tag match by priority, then every provider by
//! priority. Each attempt carries its own per-call resilience (timeout in
//! the shared client, one transient retry); any failure advances to the
//! next provider. Provider choice never leaks to callers except through
//! the returned usage metadata and debug logs.

use std::sync::Arc;
use std::time::Duration;

use super::{ChatProvider, LlmRequest, LlmResponse};
use crate::error::{Error, Result};

const TRANSIENT_RETRY_DELAY: Duration = Duration::from_secs(2);

pub struct LlmRouter {
    providers: Vec<Arc<dyn ChatProvider>>,
}

impl LlmRouter {
    /// Build a router. Providers are kept priority-sorted (lower = first).
    pub fn new(mut providers: Vec<Arc<dyn ChatProvider>>) -> Self {
        providers.sort_by_key(|p| p.priority());
        Self { providers }
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    fn routing_order(&self, tag: Option<&str>) -> Vec<&Arc<dyn ChatProvider>> {
        let mut order: Vec<&Arc<dyn ChatProvider>> = Vec::with_capacity(self.providers.len());

        if let Some(tag) = tag {
            order.extend(
                self.providers
                    .iter()
                    .filter(|p| p.tags().iter().any(|t| t == tag)),
            );
        }
        for provider in &self.providers {
            if !order.iter().any(|p| p.name() == provider.name()) {
                order.push(provider);
            }
        }
        order
    }

    /// Complete a request, failing over across providers.
    pub async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let order = self.routing_order(request.tag.as_deref());
        if order.is_empty() {
            return Err(Error::Configuration("no LLM providers registered".into()));
        }

        let mut last_error = None;
        for provider in order {
            match self.attempt(provider.as_ref(), request).await {
                Ok(response) => {
                    tracing::debug!(
                        provider = provider.name(),
                        model = %response.model,
                        prompt_tokens = response.prompt_tokens,
                        completion_tokens = response.completion_tokens,
                        "LLM completion served"
                    );
                    return Ok(response);
                }
                Err(e) => {
                    tracing::warn!(
                        provider = provider.name(),
                        "LLM provider failed, advancing: {e}"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Provider("all LLM providers failed".into())))
    }

    /// One provider attempt with a single transient retry.
    async fn attempt(
        &self,
        provider: &dyn ChatProvider,
        request: &LlmRequest,
    ) -> Result<LlmResponse> {
        match provider.complete(request).await {
            Ok(response) => Ok(response),
            Err(e) if e.is_transient() => {
                tokio::time::sleep(TRANSIENT_RETRY_DELAY).await;
                provider.complete(request).await
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StubProvider {
        name: String,
        priority: i32,
        tags: Vec<String>,
        fail: bool,
        calls: AtomicU32,
    }

    impl StubProvider {
        fn new(name: &str, priority: i32, tags: &[&str], fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                priority,
                tags: tags.iter().map(|s| s.to_string()).collect(),
                fail,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl ChatProvider for StubProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn tags(&self) -> &[String] {
            &self.tags
        }

        async fn complete(&self, _request: &LlmRequest) -> Result<LlmResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::Provider(format!("{} returned 500: down", self.name)));
            }
            Ok(LlmResponse {
                content: format!("answer from {}", self.name),
                prompt_tokens: 10,
                completion_tokens: 5,
                model: "stub".into(),
                provider_name: self.name.clone(),
            })
        }
    }

    #[tokio::test]
    async fn test_tag_match_wins_over_priority() {
        let default = StubProvider::new("default", 1, &[], false);
        let tagged = StubProvider::new("tagged", 99, &["factcheck"], false);
        let router = LlmRouter::new(vec![default.clone(), tagged.clone()]);

        let request = LlmRequest::new("", "question").with_tag("factcheck");
        let response = router.complete(&request).await.unwrap();
        assert_eq!(response.provider_name, "tagged");
        assert_eq!(default.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failure_advances_to_next_provider() {
        let broken = StubProvider::new("broken", 1, &[], true);
        let healthy = StubProvider::new("healthy", 2, &[], false);
        let router = LlmRouter::new(vec![broken.clone(), healthy.clone()]);

        let response = router.complete(&LlmRequest::new("", "q")).await.unwrap();
        assert_eq!(response.provider_name, "healthy");
        assert!(broken.calls.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_all_failed_surfaces_last_error() {
        let a = StubProvider::new("a", 1, &[], true);
        let b = StubProvider::new("b", 2, &[], true);
        let router = LlmRouter::new(vec![a, b]);

        let err = router.complete(&LlmRequest::new("", "q")).await.unwrap_err();
        assert!(err.to_string().contains("b returned 500"));
    }
}
