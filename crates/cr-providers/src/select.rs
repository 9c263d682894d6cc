//! Run-scoped model selection.
//!
//! A run names its backend with a short identifier (`"openai"`,
//! `"anthropic"`). The selector maps that identifier to a concrete model
//! name and temperature through [`MODEL_REGISTRY`], and hands back a
//! [`ModelHandle`] wired to a client that was built once at startup.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use cr_core::{Error, ModelHandle, ModelSelector, Provider, RetryPolicy};

use crate::{AnthropicProvider, OpenAIProvider, RetryingProvider};

/// One entry of the model registry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelSpec {
    pub id: &'static str,
    pub model: &'static str,
    pub temperature: f32,
}

pub const MODEL_REGISTRY: &[ModelSpec] = &[
    ModelSpec {
        id: "openai",
        model: "gpt-4o-mini",
        temperature: 0.0,
    },
    ModelSpec {
        id: "anthropic",
        model: "claude-3-5-sonnet-20240620",
        temperature: 0.0,
    },
];

pub fn lookup(id: &str) -> Option<&'static ModelSpec> {
    MODEL_REGISTRY.iter().find(|spec| spec.id == id)
}

/// Connection settings for one backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    /// Overrides the registry's model name.
    pub model: Option<String>,
}

pub struct ProviderSelector {
    handles: HashMap<&'static str, ModelHandle>,
    env_override: Option<String>,
}

impl ProviderSelector {
    pub fn new() -> Self {
        Self {
            handles: HashMap::new(),
            env_override: None,
        }
    }

    /// Build clients for every backend that has an API key.
    pub fn from_backends(
        openai: &BackendConfig,
        anthropic: &BackendConfig,
        policy: &RetryPolicy,
    ) -> Self {
        let mut selector = Self::new();

        if let Some(key) = &openai.api_key {
            let mut provider = OpenAIProvider::new(key);
            if let Some(url) = &openai.base_url {
                provider = provider.with_base_url(url);
            }
            let provider: Arc<dyn Provider> =
                Arc::new(RetryingProvider::new(Arc::new(provider), policy.clone()));
            selector = selector.with_backend("openai", provider, openai.model.clone());
        }

        if let Some(key) = &anthropic.api_key {
            let mut provider = AnthropicProvider::new(key);
            if let Some(url) = &anthropic.base_url {
                provider = provider.with_base_url(url);
            }
            let provider: Arc<dyn Provider> =
                Arc::new(RetryingProvider::new(Arc::new(provider), policy.clone()));
            selector = selector.with_backend("anthropic", provider, anthropic.model.clone());
        }

        info!(backends = ?selector.configured(), "Model backends ready");
        selector
    }

    /// Register a backend for a registry id. Ids outside the registry are ignored.
    pub fn with_backend(
        mut self,
        id: &str,
        provider: Arc<dyn Provider>,
        model: Option<String>,
    ) -> Self {
        if let Some(spec) = lookup(id) {
            let model = model.unwrap_or_else(|| spec.model.to_string());
            self.handles.insert(
                spec.id,
                ModelHandle::new(provider, model).with_temperature(spec.temperature),
            );
        }
        self
    }

    /// Process-wide override that takes precedence over the run's own model id.
    pub fn with_env_override(mut self, model_id: Option<String>) -> Self {
        self.env_override = model_id.filter(|id| !id.trim().is_empty());
        self
    }

    pub fn configured(&self) -> Vec<&'static str> {
        let mut ids: Vec<_> = self.handles.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// The id a run asking for `requested` will actually use.
    pub fn effective_id<'a>(&'a self, requested: &'a str) -> &'a str {
        self.env_override.as_deref().unwrap_or(requested)
    }
}

impl Default for ProviderSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelSelector for ProviderSelector {
    fn select(&self, model_id: &str) -> Result<ModelHandle, Error> {
        let id = self.effective_id(model_id);
        let spec = lookup(id).ok_or_else(|| Error::config(format!("Invalid model specified: {id}")))?;
        let handle = self
            .handles
            .get(spec.id)
            .cloned()
            .ok_or_else(|| Error::config(format!("No API key configured for {}", spec.id)))?;
        debug!(model_id = id, model = handle.model(), "Selected model");
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cr_core::testing::MockProvider;

    fn selector() -> ProviderSelector {
        ProviderSelector::new()
            .with_backend("openai", Arc::new(MockProvider::new()), None)
            .with_backend("anthropic", Arc::new(MockProvider::new()), None)
    }

    #[test]
    fn test_registry_models() {
        assert_eq!(lookup("openai").unwrap().model, "gpt-4o-mini");
        assert_eq!(lookup("anthropic").unwrap().model, "claude-3-5-sonnet-20240620");
        assert!(lookup("gemini").is_none());
    }

    #[test]
    fn test_select_known_model() {
        let handle = selector().select("anthropic").unwrap();
        assert_eq!(handle.model(), "claude-3-5-sonnet-20240620");
        assert_eq!(handle.temperature(), 0.0);
    }

    #[test]
    fn test_select_unknown_model() {
        let err = selector().select("gemini").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("Invalid model specified"));
    }

    #[test]
    fn test_env_override_wins() {
        let selector = selector().with_env_override(Some("anthropic".to_string()));
        let handle = selector.select("openai").unwrap();
        assert_eq!(handle.model(), "claude-3-5-sonnet-20240620");
    }

    #[test]
    fn test_blank_env_override_is_ignored() {
        let selector = selector().with_env_override(Some("  ".to_string()));
        assert_eq!(selector.select("openai").unwrap().model(), "gpt-4o-mini");
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let selector = ProviderSelector::from_backends(
            &BackendConfig::default(),
            &BackendConfig::default(),
            &RetryPolicy::none(),
        );
        assert!(selector.configured().is_empty());
        assert!(matches!(selector.select("openai"), Err(Error::Config(_))));
    }

    #[test]
    fn test_model_override_from_config() {
        let selector = ProviderSelector::new().with_backend(
            "openai",
            Arc::new(MockProvider::new()),
            Some("gpt-4o".to_string()),
        );
        assert_eq!(selector.select("openai").unwrap().model(), "gpt-4o");
    }
}
