//! Anthropic → OpenAI request transformer (SPEC_FULL.md §4.2). Pure
//! function: no I/O, no fallible upstream calls, never panics on
//! well-formed input.

use crate::anthropic::{
    MessagesContentBlock, MessagesMessage, MessagesMessageContent, MessagesRequest, MessagesRole,
    MessagesSystemPrompt, MessagesToolChoiceType, ToolResultContent,
};
use crate::openai::{
    ChatCompletionsRequest, ContentPart, FunctionCall, FunctionDef, ImageUrl, Message,
    MessageContent, Role, StopSequences, Tool, ToolCall, ToolCallType, ToolChoice, ToolChoiceFunction,
    ToolChoiceMode,
};

const MAX_UPSTREAM_TOKENS: u32 = 8192;

/// Transforms a validated Anthropic request into its OpenAI-shaped
/// equivalent. `upstream_model` is the configured upstream model name
/// (SPEC_FULL.md §4.2 step 5): the incoming Anthropic `model` field is
/// discarded at this boundary, not forwarded.
pub fn request_xform(req: &MessagesRequest, upstream_model: &str) -> ChatCompletionsRequest {
    let mut messages = Vec::new();

    if let Some(system) = &req.system {
        messages.push(Message::system(render_system_prompt(system)));
    }

    for message in &req.messages {
        messages.extend(convert_message(message));
    }

    let tools = req.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|t| Tool {
                tool_type: ToolCallType::Function,
                function: FunctionDef {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.input_schema.clone(),
                },
            })
            .collect::<Vec<_>>()
    });

    let tool_choice = tools.as_ref().and_then(|tools| {
        if tools.is_empty() {
            return None;
        }
        match &req.tool_choice {
            Some(choice) => Some(convert_tool_choice(choice)),
            None => Some(ToolChoice::Mode(ToolChoiceMode::Auto)),
        }
    });

    let stop = req.stop_sequences.as_ref().and_then(|stops| {
        if stops.is_empty() {
            None
        } else if stops.len() == 1 {
            Some(StopSequences::Single(stops[0].clone()))
        } else {
            Some(StopSequences::Many(stops.clone()))
        }
    });

    ChatCompletionsRequest {
        model: upstream_model.to_string(),
        messages,
        temperature: req.temperature,
        top_p: req.top_p,
        max_tokens: Some(req.max_tokens.min(MAX_UPSTREAM_TOKENS)),
        stream: req.stream,
        stop,
        tools,
        tool_choice,
        user: req
            .metadata
            .as_ref()
            .and_then(|m| m.user_id.clone()),
    }
}

fn render_system_prompt(system: &MessagesSystemPrompt) -> String {
    match system {
        MessagesSystemPrompt::Single(text) => text.clone(),
        MessagesSystemPrompt::Blocks(blocks) => blocks
            .iter()
            .filter_map(|b| match b {
                MessagesContentBlock::Text { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .concat(),
    }
}

fn convert_tool_choice(choice: &crate::anthropic::MessagesToolChoice) -> ToolChoice {
    match choice.kind {
        MessagesToolChoiceType::Auto => ToolChoice::Mode(ToolChoiceMode::Auto),
        MessagesToolChoiceType::Any => ToolChoice::Mode(ToolChoiceMode::Required),
        MessagesToolChoiceType::None => ToolChoice::Mode(ToolChoiceMode::None),
        MessagesToolChoiceType::Tool => ToolChoice::Function {
            choice_type: ToolCallType::Function,
            function: ToolChoiceFunction {
                name: choice.name.clone().unwrap_or_default(),
            },
        },
    }
}

/// Converts one Anthropic message into zero or more OpenAI messages
/// (SPEC_FULL.md §4.2 step 2). A single Anthropic message can expand into
/// several OpenAI messages: one assistant message carrying `tool_calls`,
/// plus one `tool` message per `tool_result` block.
fn convert_message(message: &MessagesMessage) -> Vec<Message> {
    let role = match message.role {
        MessagesRole::User => Role::User,
        MessagesRole::Assistant => Role::Assistant,
    };

    match &message.content {
        MessagesMessageContent::Single(text) => vec![Message {
            role,
            content: Some(MessageContent::Text(text.clone())),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }],
        MessagesMessageContent::Blocks(blocks) => convert_block_message(role, blocks),
    }
}

fn convert_block_message(role: Role, blocks: &[MessagesContentBlock]) -> Vec<Message> {
    let mut text_image_parts: Vec<ContentPart> = Vec::new();
    let mut text_only: Vec<&str> = Vec::new();
    let mut saw_image = false;
    let mut tool_calls: Vec<ToolCall> = Vec::new();
    let mut tool_results: Vec<Message> = Vec::new();

    for block in blocks {
        match block {
            MessagesContentBlock::Text { text, .. } => {
                text_only.push(text);
                text_image_parts.push(ContentPart::Text { text: text.clone() });
            }
            MessagesContentBlock::Image { source } => {
                saw_image = true;
                if let crate::anthropic::MessagesImageSource::Base64 { media_type, data } = source
                {
                    text_image_parts.push(ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: format!("data:{media_type};base64,{data}"),
                            detail: None,
                        },
                    });
                } else if let crate::anthropic::MessagesImageSource::Url { url } = source {
                    text_image_parts.push(ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: url.clone(),
                            detail: None,
                        },
                    });
                }
            }
            MessagesContentBlock::Thinking { .. } => {
                // Reasoning traces have no OpenAI Chat Completions counterpart;
                // dropped, matching the forward-direction scope of this proxy.
            }
            MessagesContentBlock::ToolUse { id, name, input, .. } => {
                tool_calls.push(ToolCall {
                    id: id.clone(),
                    call_type: ToolCallType::Function,
                    function: FunctionCall {
                        name: name.clone(),
                        arguments: input.to_string(),
                    },
                });
            }
            MessagesContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } => {
                let body = match content {
                    ToolResultContent::Text(text) => text.clone(),
                    ToolResultContent::Blocks(blocks) => {
                        serde_json::to_string(blocks).unwrap_or_default()
                    }
                };
                tool_results.push(Message {
                    role: Role::Tool,
                    content: Some(MessageContent::Text(body)),
                    name: None,
                    tool_calls: None,
                    tool_call_id: Some(tool_use_id.clone()),
                });
            }
        }
    }

    let content = if text_image_parts.is_empty() {
        None
    } else if saw_image {
        Some(MessageContent::Parts(text_image_parts))
    } else {
        Some(MessageContent::Text(text_only.join("\n").trim().to_string()))
    };

    let mut out = Vec::new();
    if content.is_some() || !tool_calls.is_empty() {
        out.push(Message {
            role,
            content,
            name: None,
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
            tool_call_id: None,
        });
    }
    out.extend(tool_results);
    out
}

/// Whether any cache-control annotation is present anywhere in the request
/// (SPEC_FULL.md §4.6 — drives the `anthropic-beta` header at the HTTP
/// egress boundary, a collaborator concern, not this function's output).
pub fn requires_cache_beta_header(req: &MessagesRequest) -> bool {
    crate::anthropic::has_cache_control(req)
}
