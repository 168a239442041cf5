//! Agent blocks: a multi-turn exchange with a language model that may
//! request tool calls. Each requested call is executed and its result fed
//! back as a function-role message; the loop is bounded and guarded against
//! a provider repeating the exact same call.

use serde_json::{Map, Value, json};
use tracing::debug;

use crate::block::route::{DEFAULT_MODEL, tokens_json};
use crate::block::{BlockRunner, str_param};
use crate::error::EngineError;
use crate::provider::{ChatMessage, FunctionSpec, ProviderRequest, TokenUsage};
use crate::registry::ToolDescriptor;
use crate::value;
use crate::workflow::Block;

/// Hitting this cap is advisory, not fatal: the last assistant content wins.
const MAX_TURNS: usize = 10;

pub(crate) async fn run(
    runner: &BlockRunner<'_>,
    block: &Block,
    inputs: &Map<String, Value>,
) -> Result<Value, EngineError> {
    let model = str_param(inputs, "model").unwrap_or(DEFAULT_MODEL).to_string();
    let system_prompt = str_param(inputs, "systemPrompt").map(str::to_string);
    let api_key = str_param(inputs, "apiKey").unwrap_or_default().to_string();
    let temperature = inputs.get("temperature").and_then(Value::as_f64);
    let max_tokens = inputs.get("maxTokens").and_then(Value::as_u64);
    let response_format = parse_response_format(inputs)?;
    let context_text = match inputs.get("context") {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text.clone()),
        Some(other) => Some(value::pretty(other)),
    };

    let descriptors = tool_descriptors(runner, inputs);
    let driver = runner.providers().driver_for_model(&model)?;
    let transport = runner.providers().transport();
    let functions: Vec<FunctionSpec> = if descriptors.is_empty() {
        Vec::new()
    } else {
        driver.transform_tools_to_functions(&descriptors)
    };

    let mut messages: Vec<ChatMessage> = Vec::new();
    if let Some(text) = context_text.filter(|t| !t.is_empty()) {
        messages.push(ChatMessage::user(text));
    }

    let mut tokens = TokenUsage::default();
    let mut last_content = String::new();
    let mut response_model = model.clone();
    let mut tool_calls: Vec<Value> = Vec::new();
    let mut previous_call: Option<(String, String)> = None;

    for turn in 0..MAX_TURNS {
        let request = ProviderRequest {
            model: model.clone(),
            system_prompt: system_prompt.clone(),
            messages: messages.clone(),
            temperature,
            max_tokens,
            api_key: api_key.clone(),
            response_format: response_format.clone(),
            functions: functions.clone(),
        };
        let payload = driver.transform_request(&request)?;
        let raw = transport.send(&driver.id(), payload, &api_key).await?;
        let response = driver.transform_response(&raw)?;
        if let Some(reported) = response.tokens {
            tokens.accumulate(&reported);
        }
        last_content = response.content;
        response_model = response.model;

        if !driver.has_function_call(&raw) {
            break;
        }
        let call = driver.transform_function_call_response(&raw)?;
        let serialized_args = call.arguments.to_string();
        if previous_call
            .as_ref()
            .is_some_and(|(name, args)| *name == call.name && *args == serialized_args)
        {
            debug!(block = %block.id, call = %call.name, "duplicate function call, stopping");
            break;
        }
        previous_call = Some((call.name.clone(), serialized_args.clone()));

        if runner.tools().get_tool(&call.name).is_none() {
            debug!(block = %block.id, call = %call.name, "requested tool is unknown, stopping");
            break;
        }
        let args = call.arguments.as_object().cloned().unwrap_or_default();
        let outcome = runner.tools().execute_tool(&call.name, &args).await;
        if !outcome.success {
            debug!(block = %block.id, call = %call.name, "tool failed, stopping");
            break;
        }
        let result = outcome.output.unwrap_or(Value::Null);
        debug!(block = %block.id, turn, call = %call.name, "tool call completed");
        messages.push(ChatMessage::assistant_function_call(
            call.name.clone(),
            serialized_args,
        ));
        messages.push(ChatMessage::function_result(
            call.name.clone(),
            value::compact(&result),
        ));
        tool_calls.push(json!({
            "name": call.name,
            "arguments": call.arguments,
            "result": result,
        }));
    }

    let tokens_value = tokens_json(&tokens);
    if response_format.is_some() {
        let parsed: Value = serde_json::from_str(&last_content)
            .map_err(|e| EngineError::ResponseFormat(e.to_string()))?;
        let Value::Object(mut fields) = parsed else {
            return Err(EngineError::ResponseFormat(
                "expected a JSON object".to_string(),
            ));
        };
        fields.insert("tokens".to_string(), tokens_value);
        if !tool_calls.is_empty() {
            fields.insert(
                "toolCalls".to_string(),
                json!({"list": tool_calls, "count": tool_calls.len()}),
            );
        }
        return Ok(Value::Object(fields));
    }

    Ok(json!({
        "response": {
            "content": last_content,
            "model": response_model,
            "tokens": tokens_value,
            "toolCalls": {"list": tool_calls, "count": tool_calls.len()},
        }
    }))
}

fn parse_response_format(inputs: &Map<String, Value>) -> Result<Option<Value>, EngineError> {
    match inputs.get("responseFormat") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) if text.trim().is_empty() => Ok(None),
        Some(Value::String(text)) => serde_json::from_str(text)
            .map(Some)
            .map_err(|e| EngineError::ResponseFormat(format!("invalid schema: {e}"))),
        Some(other) => Ok(Some(other.clone())),
    }
}

/// Expand the block's `tools` list into tool descriptors: block type →
/// catalog entry → registry descriptor. Entries that resolve to nothing are
/// skipped rather than failing the whole agent.
fn tool_descriptors(runner: &BlockRunner<'_>, inputs: &Map<String, Value>) -> Vec<ToolDescriptor> {
    let Some(Value::Array(entries)) = inputs.get("tools") else {
        return Vec::new();
    };
    let mut descriptors = Vec::new();
    for entry in entries {
        let Some(block_type) = entry.get("type").and_then(Value::as_str) else {
            continue;
        };
        let Some(catalog_entry) = runner.catalog().get_block(block_type) else {
            debug!(block_type, "no catalog entry for agent tool, skipping");
            continue;
        };
        match runner.tools().get_tool(&catalog_entry.tool_id) {
            Some(descriptor) => descriptors.push(descriptor),
            None => debug!(tool = %catalog_entry.tool_id, "catalog tool missing from registry, skipping"),
        }
    }
    descriptors
}
