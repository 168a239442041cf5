//! Provider interfaces consumed by the engine: the driver capability set,
//! the HTTP transport seam, and the registry that maps models to drivers.
//!
//! A driver is a set of pure transforms between the engine's request shape
//! and a vendor's wire shape. New vendors are added by implementing
//! [`ProviderDriver`]; the engine never learns vendor specifics.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::registry::ToolDescriptor;

/// Stable identifier for a provider implementation (for example `openai`).
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ProviderId(pub String);

impl ProviderId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Token counts for one provider response. Fields are summed independently
/// across interaction-loop turns, each as reported by the provider.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt: u64,
    pub completion: u64,
    pub total: u64,
}

impl TokenUsage {
    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.prompt += other.prompt;
        self.completion += other.completion;
        self.total += other.total;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Function,
}

/// A function call carried on a synthetic assistant message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallPayload {
    pub name: String,
    /// Serialized JSON arguments, exactly as sent to the provider.
    pub arguments: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Function name, set on function-role result messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCallPayload>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: Some(content.into()),
            name: None,
            function_call: None,
        }
    }

    pub fn assistant_function_call(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: None,
            name: None,
            function_call: Some(FunctionCallPayload {
                name: name.into(),
                arguments: arguments.into(),
            }),
        }
    }

    pub fn function_result(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Function,
            content: Some(content.into()),
            name: Some(name.into()),
            function_call: None,
        }
    }
}

/// Function descriptor in the provider's function-call shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON-schema parameter object.
    pub parameters: Value,
}

/// Everything a driver needs to build one provider request.
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderRequest {
    pub model: String,
    pub system_prompt: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
    pub api_key: String,
    pub response_format: Option<Value>,
    pub functions: Vec<FunctionSpec>,
}

/// Normalized provider response content.
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderResponse {
    pub content: String,
    pub model: String,
    pub tokens: Option<TokenUsage>,
}

/// A function call extracted from a raw provider response.
#[derive(Clone, Debug, PartialEq)]
pub struct FunctionCallRequest {
    pub name: String,
    pub arguments: Value,
}

/// Errors raised by drivers and transports.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Invalid registry or driver configuration.
    #[error("provider config error: {0}")]
    Config(String),
    /// Provider returned an application-level failure (HTTP status, auth, etc.).
    #[error("provider error ({provider}): {message}")]
    Provider {
        provider: ProviderId,
        message: String,
        status_code: Option<u16>,
    },
    /// Transport or I/O failed.
    #[error("transport error ({provider}): {message}")]
    Transport {
        provider: ProviderId,
        message: String,
    },
    /// Provider response shape was invalid.
    #[error("protocol error ({provider}): {message}")]
    Protocol {
        provider: ProviderId,
        message: String,
    },
}

impl ProviderError {
    pub fn provider(
        provider: impl Into<ProviderId>,
        message: impl Into<String>,
        status_code: Option<u16>,
    ) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
            status_code,
        }
    }

    pub fn transport(provider: impl Into<ProviderId>, message: impl Into<String>) -> Self {
        Self::Transport {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn protocol(provider: impl Into<ProviderId>, message: impl Into<String>) -> Self {
        Self::Protocol {
            provider: provider.into(),
            message: message.into(),
        }
    }
}

/// Capability set for one language-model vendor. All operations are pure
/// transforms over request/response values; I/O lives in [`ProviderTransport`].
pub trait ProviderDriver: Send + Sync {
    fn id(&self) -> ProviderId;

    fn transform_tools_to_functions(&self, tools: &[ToolDescriptor]) -> Vec<FunctionSpec>;

    fn transform_request(&self, request: &ProviderRequest) -> Result<Value, ProviderError>;

    fn transform_response(&self, raw: &Value) -> Result<ProviderResponse, ProviderError>;

    fn has_function_call(&self, raw: &Value) -> bool;

    fn transform_function_call_response(
        &self,
        raw: &Value,
    ) -> Result<FunctionCallRequest, ProviderError>;
}

/// Delivers a driver-built payload to the provider and returns the raw
/// response body.
#[async_trait]
pub trait ProviderTransport: Send + Sync {
    async fn send(
        &self,
        provider: &ProviderId,
        payload: Value,
        api_key: &str,
    ) -> Result<Value, ProviderError>;
}

/// Read-only lookup the engine consumes: model → provider id → driver, plus
/// the shared transport.
pub struct ProviderRegistry {
    drivers: HashMap<ProviderId, Arc<dyn ProviderDriver>>,
    models: HashMap<String, ProviderId>,
    default_provider: Option<ProviderId>,
    transport: Arc<dyn ProviderTransport>,
}

impl ProviderRegistry {
    pub fn builder() -> ProviderRegistryBuilder {
        ProviderRegistryBuilder::default()
    }

    pub fn provider_for_model(&self, model: &str) -> Result<ProviderId, ProviderError> {
        if let Some(id) = self.models.get(model) {
            return Ok(id.clone());
        }
        self.default_provider
            .clone()
            .ok_or_else(|| ProviderError::Config(format!("no provider registered for model {model}")))
    }

    pub fn driver(&self, id: &ProviderId) -> Result<Arc<dyn ProviderDriver>, ProviderError> {
        self.drivers
            .get(id)
            .cloned()
            .ok_or_else(|| ProviderError::Config(format!("provider not registered: {id}")))
    }

    pub fn driver_for_model(&self, model: &str) -> Result<Arc<dyn ProviderDriver>, ProviderError> {
        let id = self.provider_for_model(model)?;
        self.driver(&id)
    }

    pub fn transport(&self) -> Arc<dyn ProviderTransport> {
        self.transport.clone()
    }
}

/// Builder used to register drivers and model mappings before creating a
/// registry. Duplicate driver ids are rejected at build time.
#[derive(Default)]
pub struct ProviderRegistryBuilder {
    drivers: Vec<Arc<dyn ProviderDriver>>,
    models: HashMap<String, ProviderId>,
    default_provider: Option<ProviderId>,
    transport: Option<Arc<dyn ProviderTransport>>,
}

impl ProviderRegistryBuilder {
    pub fn register_driver(mut self, driver: Arc<dyn ProviderDriver>) -> Self {
        self.drivers.push(driver);
        self
    }

    /// Route `model` to the driver registered under `provider`.
    pub fn map_model(mut self, model: impl Into<String>, provider: impl Into<ProviderId>) -> Self {
        self.models.insert(model.into(), provider.into());
        self
    }

    /// Fallback provider for models with no explicit mapping.
    pub fn default_provider(mut self, provider: impl Into<ProviderId>) -> Self {
        self.default_provider = Some(provider.into());
        self
    }

    pub fn transport(mut self, transport: Arc<dyn ProviderTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Result<ProviderRegistry, ProviderError> {
        let transport = self
            .transport
            .ok_or_else(|| ProviderError::Config("registry requires a transport".into()))?;
        let mut map: HashMap<ProviderId, Arc<dyn ProviderDriver>> = HashMap::new();
        let mut seen: HashSet<ProviderId> = HashSet::new();
        for driver in self.drivers {
            let id = driver.id();
            if !seen.insert(id.clone()) {
                return Err(ProviderError::Config(format!(
                    "duplicate driver registration: {id}"
                )));
            }
            map.insert(id, driver);
        }
        for (model, provider) in &self.models {
            if !map.contains_key(provider) {
                return Err(ProviderError::Config(format!(
                    "model {model} maps to unregistered provider {provider}"
                )));
            }
        }
        Ok(ProviderRegistry {
            drivers: map,
            models: self.models,
            default_provider: self.default_provider,
            transport,
        })
    }
}
