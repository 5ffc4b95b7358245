//! OpenAI → Anthropic non-streaming response transformer (SPEC_FULL.md
//! §4.3). Pure function, fallible only on malformed tool-call arguments.

use crate::anthropic::{MessagesContentBlock, MessagesResponse, MessagesStopReason, MessagesUsage};
use crate::error::BridgeError;
use crate::openai::{ChatCompletionsResponse, FinishReason};

/// Transforms an upstream OpenAI response into its Anthropic-shaped
/// equivalent. Only `choices[0]` is consumed (SPEC_FULL.md §4.6).
pub fn response_xform(resp: &ChatCompletionsResponse) -> Result<MessagesResponse, BridgeError> {
    let choice = resp
        .choices
        .first()
        .ok_or_else(|| BridgeError::invalid_request("choices", "response has no choices"))?;

    let mut content = Vec::new();

    if let Some(text) = &choice.message.content {
        if !text.is_empty() {
            content.push(MessagesContentBlock::Text {
                text: text.clone(),
                cache_control: None,
            });
        }
    }

    for tool_call in choice.message.tool_calls.iter().flatten() {
        let input = serde_json::from_str(&tool_call.function.arguments).map_err(|source| {
            BridgeError::MalformedToolArguments {
                tool_name: tool_call.function.name.clone(),
                source,
            }
        })?;
        content.push(MessagesContentBlock::ToolUse {
            id: tool_call.id.clone(),
            name: tool_call.function.name.clone(),
            input,
            cache_control: None,
        });
    }

    if content.is_empty() {
        content.push(MessagesContentBlock::empty_text());
    }

    let stop_reason = match choice.finish_reason {
        Some(FinishReason::Stop) => MessagesStopReason::EndTurn,
        Some(FinishReason::Length) => MessagesStopReason::MaxTokens,
        Some(FinishReason::ToolCalls) => MessagesStopReason::ToolUse,
        Some(FinishReason::ContentFilter) => MessagesStopReason::EndTurn,
        None => MessagesStopReason::EndTurn,
    };

    let usage = resp
        .usage
        .as_ref()
        .map(|u| MessagesUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
            cache_creation_input_tokens: None,
            cache_read_input_tokens: None,
        })
        .unwrap_or_default();

    Ok(MessagesResponse::new(
        resp.id.clone(),
        resp.model.clone(),
        content,
        stop_reason,
        usage,
    ))
}
