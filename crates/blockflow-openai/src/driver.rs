//! Chat-completions transforms for OpenAI-compatible providers: request
//! body construction, response normalization, and function-call extraction
//! in both the legacy `function_call` and the `tool_calls` shapes.

use serde_json::{Map, Value, json};

use blockflow_core::provider::{
    ChatRole, FunctionCallRequest, FunctionSpec, ProviderDriver, ProviderError, ProviderId,
    ProviderRequest, ProviderResponse, TokenUsage,
};
use blockflow_core::registry::ToolDescriptor;

pub const OPENAI_PROVIDER: &str = "openai";

/// Pure transforms between the engine's request shape and the
/// chat-completions wire shape.
pub struct OpenAiDriver;

impl OpenAiDriver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for OpenAiDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderDriver for OpenAiDriver {
    fn id(&self) -> ProviderId {
        ProviderId::new(OPENAI_PROVIDER)
    }

    fn transform_tools_to_functions(&self, tools: &[ToolDescriptor]) -> Vec<FunctionSpec> {
        tools
            .iter()
            .map(|tool| {
                let mut properties = Map::new();
                let mut required: Vec<&str> = Vec::new();
                let mut names: Vec<&String> = tool.params.keys().collect();
                names.sort();
                for name in names {
                    let spec = &tool.params[name];
                    properties.insert(
                        name.clone(),
                        json!({"type": spec.kind, "description": spec.description}),
                    );
                    if spec.required {
                        required.push(name);
                    }
                }
                FunctionSpec {
                    name: tool.id.clone(),
                    description: tool.description.clone(),
                    parameters: json!({
                        "type": "object",
                        "properties": properties,
                        "required": required,
                    }),
                }
            })
            .collect()
    }

    fn transform_request(&self, request: &ProviderRequest) -> Result<Value, ProviderError> {
        let mut messages = Vec::new();
        if let Some(system) = request
            .system_prompt
            .as_ref()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
        {
            messages.push(json!({"role": "system", "content": system}));
        }
        for message in &request.messages {
            let role = match message.role {
                ChatRole::System => "system",
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
                ChatRole::Function => "function",
            };
            let mut entry = json!({"role": role, "content": message.content});
            if let Some(name) = &message.name {
                entry["name"] = json!(name);
            }
            if let Some(call) = &message.function_call {
                entry["function_call"] = json!({"name": call.name, "arguments": call.arguments});
            }
            messages.push(entry);
        }

        let mut body = json!({
            "model": request.model,
            "messages": messages,
        });
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(format) = &request.response_format {
            body["response_format"] = format.clone();
        }
        if !request.functions.is_empty() {
            body["functions"] = serde_json::to_value(&request.functions)
                .map_err(|e| ProviderError::protocol(OPENAI_PROVIDER, e.to_string()))?;
            body["function_call"] = json!("auto");
        }
        Ok(body)
    }

    fn transform_response(&self, raw: &Value) -> Result<ProviderResponse, ProviderError> {
        let message = raw
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .ok_or_else(|| {
                ProviderError::protocol(OPENAI_PROVIDER, "response has no choices[0].message")
            })?;
        let content = message
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let model = raw
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let tokens = raw.get("usage").map(|usage| TokenUsage {
            prompt: usage.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0),
            completion: usage
                .get("completion_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            total: usage.get("total_tokens").and_then(Value::as_u64).unwrap_or(0),
        });
        Ok(ProviderResponse {
            content,
            model,
            tokens,
        })
    }

    fn has_function_call(&self, raw: &Value) -> bool {
        raw_function_call(raw).is_some()
    }

    fn transform_function_call_response(
        &self,
        raw: &Value,
    ) -> Result<FunctionCallRequest, ProviderError> {
        let call = raw_function_call(raw).ok_or_else(|| {
            ProviderError::protocol(OPENAI_PROVIDER, "response carries no function call")
        })?;
        let name = call
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::protocol(OPENAI_PROVIDER, "function call has no name"))?
            .to_string();
        let arguments = match call.get("arguments") {
            Some(Value::String(text)) if !text.trim().is_empty() => serde_json::from_str(text)
                .map_err(|e| {
                    ProviderError::protocol(
                        OPENAI_PROVIDER,
                        format!("function arguments are not valid JSON: {e}"),
                    )
                })?,
            Some(Value::Object(map)) => Value::Object(map.clone()),
            _ => json!({}),
        };
        Ok(FunctionCallRequest { name, arguments })
    }
}

/// The function call object from either wire shape: the legacy
/// `message.function_call` or the first of `message.tool_calls`.
fn raw_function_call(raw: &Value) -> Option<&Value> {
    let message = raw.get("choices")?.get(0)?.get("message")?;
    if let Some(call) = message.get("function_call").filter(|v| !v.is_null()) {
        return Some(call);
    }
    message
        .get("tool_calls")?
        .get(0)?
        .get("function")
        .filter(|v| !v.is_null())
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockflow_core::provider::ChatMessage;
    use blockflow_core::registry::ToolParamSpec;
    use std::collections::HashMap;

    fn request_with(messages: Vec<ChatMessage>) -> ProviderRequest {
        ProviderRequest {
            model: "gpt-4o".to_string(),
            system_prompt: Some("be brief".to_string()),
            messages,
            temperature: Some(0.2),
            max_tokens: Some(256),
            api_key: "sk-test".to_string(),
            response_format: None,
            functions: Vec::new(),
        }
    }

    #[test]
    fn request_body_has_system_then_user_messages() {
        let driver = OpenAiDriver::new();
        let body = driver
            .transform_request(&request_with(vec![ChatMessage::user("hello")]))
            .unwrap();
        assert_eq!(body["model"], json!("gpt-4o"));
        assert_eq!(body["messages"][0]["role"], json!("system"));
        assert_eq!(body["messages"][1]["role"], json!("user"));
        assert_eq!(body["messages"][1]["content"], json!("hello"));
        assert_eq!(body["temperature"], json!(0.2));
        assert_eq!(body["max_tokens"], json!(256));
        assert!(body.get("functions").is_none());
    }

    #[test]
    fn request_body_carries_function_messages() {
        let driver = OpenAiDriver::new();
        let body = driver
            .transform_request(&request_with(vec![
                ChatMessage::user("weather?"),
                ChatMessage::assistant_function_call("weather", "{\"city\":\"sf\"}"),
                ChatMessage::function_result("weather", "{\"forecast\":\"sunny\"}"),
            ]))
            .unwrap();
        assert_eq!(
            body["messages"][2]["function_call"],
            json!({"name": "weather", "arguments": "{\"city\":\"sf\"}"})
        );
        assert_eq!(body["messages"][3]["role"], json!("function"));
        assert_eq!(body["messages"][3]["name"], json!("weather"));
    }

    #[test]
    fn functions_enable_auto_function_call() {
        let driver = OpenAiDriver::new();
        let mut request = request_with(vec![ChatMessage::user("go")]);
        request.functions = vec![FunctionSpec {
            name: "weather".to_string(),
            description: "forecast".to_string(),
            parameters: json!({"type": "object"}),
        }];
        let body = driver.transform_request(&request).unwrap();
        assert_eq!(body["function_call"], json!("auto"));
        assert_eq!(body["functions"][0]["name"], json!("weather"));
    }

    #[test]
    fn tool_descriptors_become_json_schema_functions() {
        let driver = OpenAiDriver::new();
        let descriptor = ToolDescriptor {
            id: "weather".to_string(),
            name: "Weather".to_string(),
            description: "Forecast lookup".to_string(),
            params: HashMap::from([
                (
                    "city".to_string(),
                    ToolParamSpec {
                        kind: "string".to_string(),
                        description: "City name".to_string(),
                        required: true,
                        default: None,
                    },
                ),
                (
                    "units".to_string(),
                    ToolParamSpec {
                        kind: "string".to_string(),
                        description: String::new(),
                        required: false,
                        default: None,
                    },
                ),
            ]),
        };
        let functions = driver.transform_tools_to_functions(&[descriptor]);
        assert_eq!(functions.len(), 1);
        assert_eq!(functions[0].name, "weather");
        assert_eq!(
            functions[0].parameters["properties"]["city"]["type"],
            json!("string")
        );
        assert_eq!(functions[0].parameters["required"], json!(["city"]));
    }

    #[test]
    fn response_parses_content_model_and_usage() {
        let driver = OpenAiDriver::new();
        let raw = json!({
            "model": "gpt-4o-2024",
            "choices": [{"message": {"role": "assistant", "content": "hi"}}],
            "usage": {"prompt_tokens": 5, "completion_tokens": 3, "total_tokens": 8}
        });
        let response = driver.transform_response(&raw).unwrap();
        assert_eq!(response.content, "hi");
        assert_eq!(response.model, "gpt-4o-2024");
        assert_eq!(
            response.tokens,
            Some(TokenUsage {
                prompt: 5,
                completion: 3,
                total: 8
            })
        );
    }

    #[test]
    fn null_content_with_function_call_is_empty_string() {
        let driver = OpenAiDriver::new();
        let raw = json!({
            "choices": [{"message": {
                "role": "assistant",
                "content": null,
                "function_call": {"name": "weather", "arguments": "{\"city\":\"sf\"}"}
            }}]
        });
        let response = driver.transform_response(&raw).unwrap();
        assert_eq!(response.content, "");
        assert!(driver.has_function_call(&raw));
        let call = driver.transform_function_call_response(&raw).unwrap();
        assert_eq!(call.name, "weather");
        assert_eq!(call.arguments, json!({"city": "sf"}));
    }

    #[test]
    fn tool_calls_shape_is_also_detected() {
        let driver = OpenAiDriver::new();
        let raw = json!({
            "choices": [{"message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{"id": "c1", "type": "function", "function": {
                    "name": "weather", "arguments": "{\"city\":\"nyc\"}"
                }}]
            }}]
        });
        assert!(driver.has_function_call(&raw));
        let call = driver.transform_function_call_response(&raw).unwrap();
        assert_eq!(call.name, "weather");
        assert_eq!(call.arguments, json!({"city": "nyc"}));
    }

    #[test]
    fn plain_response_has_no_function_call() {
        let driver = OpenAiDriver::new();
        let raw = json!({"choices": [{"message": {"role": "assistant", "content": "done"}}]});
        assert!(!driver.has_function_call(&raw));
        assert!(driver.transform_function_call_response(&raw).is_err());
    }

    #[test]
    fn malformed_arguments_are_protocol_errors() {
        let driver = OpenAiDriver::new();
        let raw = json!({
            "choices": [{"message": {
                "function_call": {"name": "weather", "arguments": "{broken"}
            }}]
        });
        assert!(matches!(
            driver.transform_function_call_response(&raw),
            Err(ProviderError::Protocol { .. })
        ));
    }
}
