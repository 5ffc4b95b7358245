//! Ingress validation for Anthropic requests (SPEC_FULL.md §4.1). Runs after
//! JSON parsing, before the request transformer. Validation is total: it
//! never partially accepts a request.

use crate::anthropic::{
    MessagesContentBlock, MessagesMessageContent, MessagesRequest, MessagesSystemPrompt,
};
use crate::error::BridgeError;

/// Validates a parsed Anthropic request against SPEC_FULL.md §3.1. On
/// success, returns the request unchanged (validation does not normalize —
/// normalization is the transformer's job). On failure, the returned error
/// names the first offending field path.
pub fn validate(req: MessagesRequest) -> Result<MessagesRequest, BridgeError> {
    match validate_inner(req) {
        Ok(req) => Ok(req),
        Err(err) => {
            tracing::debug!(error = %err, "rejecting invalid request");
            Err(err)
        }
    }
}

fn validate_inner(req: MessagesRequest) -> Result<MessagesRequest, BridgeError> {
    if req.model.trim().is_empty() {
        return Err(BridgeError::invalid_request("model", "model must not be empty"));
    }
    if req.messages.is_empty() {
        return Err(BridgeError::invalid_request(
            "messages",
            "messages must not be empty",
        ));
    }
    if req.max_tokens < 1 {
        return Err(BridgeError::invalid_request(
            "max_tokens",
            "max_tokens must be >= 1",
        ));
    }

    if let Some(MessagesSystemPrompt::Blocks(blocks)) = &req.system {
        for (i, block) in blocks.iter().enumerate() {
            validate_cache_control(block, &format!("system.{i}"))?;
        }
    }

    for (mi, message) in req.messages.iter().enumerate() {
        match &message.content {
            MessagesMessageContent::Single(text) => {
                if text.is_empty() {
                    return Err(BridgeError::invalid_request(
                        format!("messages.{mi}.content"),
                        "message content must not be empty",
                    ));
                }
            }
            MessagesMessageContent::Blocks(blocks) => {
                if blocks.is_empty() {
                    return Err(BridgeError::invalid_request(
                        format!("messages.{mi}.content"),
                        "message content must not be empty",
                    ));
                }
                for (bi, block) in blocks.iter().enumerate() {
                    let path = format!("messages.{mi}.content.{bi}");
                    validate_block(block, &path)?;
                }
            }
        }
    }

    if let Some(tools) = &req.tools {
        for (ti, tool) in tools.iter().enumerate() {
            if tool.name.trim().is_empty() {
                return Err(BridgeError::invalid_request(
                    format!("tools.{ti}.name"),
                    "tool name must not be empty",
                ));
            }
            if !tool.input_schema.is_object() {
                return Err(BridgeError::invalid_request(
                    format!("tools.{ti}.input_schema"),
                    "input_schema must be a JSON object",
                ));
            }
        }
    }

    Ok(req)
}

fn validate_block(block: &MessagesContentBlock, path: &str) -> Result<(), BridgeError> {
    match block {
        MessagesContentBlock::Text { cache_control, .. } => {
            if let Some(cc) = cache_control {
                validate_cache_control(block, path)?;
                let _ = cc;
            }
        }
        MessagesContentBlock::Image { .. }
        | MessagesContentBlock::Thinking { .. }
        | MessagesContentBlock::ToolUse { .. } => {}
        MessagesContentBlock::ToolResult { tool_use_id, .. } => {
            if tool_use_id.trim().is_empty() {
                return Err(BridgeError::invalid_request(
                    format!("{path}.tool_use_id"),
                    "tool_result.tool_use_id must not be empty",
                ));
            }
        }
    }
    Ok(())
}

fn validate_cache_control(block: &MessagesContentBlock, path: &str) -> Result<(), BridgeError> {
    use crate::anthropic::MessagesCacheControl;

    let cc = match block {
        MessagesContentBlock::Text { cache_control, .. }
        | MessagesContentBlock::ToolUse { cache_control, .. }
        | MessagesContentBlock::ToolResult { cache_control, .. } => cache_control,
        _ => return Ok(()),
    };

    if let Some(MessagesCacheControl::Ephemeral { ttl: Some(ttl) }) = cc {
        if !(60..=3600).contains(ttl) {
            return Err(BridgeError::invalid_request(
                format!("{path}.cache_control.ttl"),
                "cache_control ttl must be within [60, 3600] seconds",
            ));
        }
    }
    Ok(())
}
