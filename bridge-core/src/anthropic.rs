//! Typed shapes for the Anthropic Messages API: the request/response/SSE-event
//! contracts this proxy presents to clients. See SPEC_FULL.md §3.1 and §3.3.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;

pub const MESSAGES_PATH: &str = "/v1/messages";

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MessagesRequest {
    pub model: String,
    pub messages: Vec<MessagesMessage>,
    pub max_tokens: u32,
    pub system: Option<MessagesSystemPrompt>,
    pub metadata: Option<MessagesMetadata>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    pub stream: Option<bool>,
    pub stop_sequences: Option<Vec<String>>,
    pub tools: Option<Vec<MessagesTool>>,
    pub tool_choice: Option<MessagesToolChoice>,
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct MessagesMetadata {
    pub user_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessagesRole {
    User,
    Assistant,
}

/// Cache control annotation on a content block. Only the TTL is meaningful
/// to this proxy (SPEC_FULL.md §3.1 invariants, §4.6): the annotation is
/// detected but never alters the forwarded body.
#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
#[serde(tag = "type")]
pub enum MessagesCacheControl {
    Ephemeral { ttl: Option<u32> },
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Blocks(Vec<MessagesContentBlock>),
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "snake_case")]
#[serde(tag = "type")]
pub enum MessagesContentBlock {
    Text {
        text: String,
        cache_control: Option<MessagesCacheControl>,
    },
    Thinking {
        thinking: String,
        signature: Option<String>,
    },
    Image {
        source: MessagesImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
        cache_control: Option<MessagesCacheControl>,
    },
    ToolResult {
        tool_use_id: String,
        is_error: Option<bool>,
        content: ToolResultContent,
        cache_control: Option<MessagesCacheControl>,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "snake_case")]
#[serde(tag = "type")]
pub enum MessagesImageSource {
    Base64 { media_type: String, data: String },
    Url { url: String },
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum MessagesMessageContent {
    Single(String),
    Blocks(Vec<MessagesContentBlock>),
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum MessagesSystemPrompt {
    Single(String),
    Blocks(Vec<MessagesContentBlock>),
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MessagesMessage {
    pub role: MessagesRole,
    pub content: MessagesMessageContent,
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MessagesTool {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum MessagesToolChoiceType {
    Auto,
    Any,
    Tool,
    None,
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MessagesToolChoice {
    #[serde(rename = "type")]
    pub kind: MessagesToolChoiceType,
    pub name: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessagesStopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct MessagesUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cache_creation_input_tokens: Option<u32>,
    pub cache_read_input_tokens: Option<u32>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MessagesResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub obj_type: String,
    pub role: MessagesRole,
    pub content: Vec<MessagesContentBlock>,
    pub model: String,
    pub stop_reason: MessagesStopReason,
    pub stop_sequence: Option<String>,
    pub usage: MessagesUsage,
}

impl MessagesResponse {
    pub fn new(
        id: String,
        model: String,
        content: Vec<MessagesContentBlock>,
        stop_reason: MessagesStopReason,
        usage: MessagesUsage,
    ) -> Self {
        Self {
            id,
            obj_type: "message".to_string(),
            role: MessagesRole::Assistant,
            content,
            model,
            stop_reason,
            stop_sequence: None,
            usage,
        }
    }
}

/// The Anthropic SSE event protocol (SPEC_FULL.md §3.3). Every variant this
/// proxy can emit; `Ping` exists because real Anthropic streams interleave
/// keepalive pings, but the transducer (§4.5) never synthesizes one.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagesStreamEvent {
    MessageStart {
        message: MessagesStreamMessage,
    },
    ContentBlockStart {
        index: u32,
        content_block: MessagesContentBlock,
    },
    ContentBlockDelta {
        index: u32,
        delta: MessagesContentDelta,
    },
    ContentBlockStop {
        index: u32,
    },
    MessageDelta {
        delta: MessagesMessageDelta,
        usage: MessagesUsage,
    },
    MessageStop,
    Ping,
}

impl MessagesStreamEvent {
    /// The `event:` line that accompanies this record on the wire
    /// (SPEC_FULL.md §6, SSE wire format).
    pub fn event_name(&self) -> &'static str {
        match self {
            MessagesStreamEvent::MessageStart { .. } => "message_start",
            MessagesStreamEvent::ContentBlockStart { .. } => "content_block_start",
            MessagesStreamEvent::ContentBlockDelta { .. } => "content_block_delta",
            MessagesStreamEvent::ContentBlockStop { .. } => "content_block_stop",
            MessagesStreamEvent::MessageDelta { .. } => "message_delta",
            MessagesStreamEvent::MessageStop => "message_stop",
            MessagesStreamEvent::Ping => "ping",
        }
    }
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MessagesStreamMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub obj_type: String,
    pub role: MessagesRole,
    pub content: Vec<Value>,
    pub model: String,
    pub stop_reason: Option<MessagesStopReason>,
    pub stop_sequence: Option<String>,
    pub usage: MessagesUsage,
}

impl MessagesStreamMessage {
    pub fn new(id: String, model: String, usage: MessagesUsage) -> Self {
        Self {
            id,
            obj_type: "message".to_string(),
            role: MessagesRole::Assistant,
            content: Vec::new(),
            model,
            stop_reason: None,
            stop_sequence: None,
            usage,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum MessagesContentDelta {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(rename = "input_json_delta")]
    InputJsonDelta { partial_json: String },
}

#[skip_serializing_none]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MessagesMessageDelta {
    pub stop_reason: Option<MessagesStopReason>,
    pub stop_sequence: Option<String>,
}

/// A starting point for a content block, used by the transducer when it
/// opens a block with `content_block_start` (SPEC_FULL.md §4.5.3).
impl MessagesContentBlock {
    pub fn empty_text() -> Self {
        MessagesContentBlock::Text {
            text: String::new(),
            cache_control: None,
        }
    }

    pub fn tool_use_stub(id: String, name: String) -> Self {
        MessagesContentBlock::ToolUse {
            id,
            name,
            input: Value::Object(Default::default()),
            cache_control: None,
        }
    }
}

/// Walks a request's content blocks (messages + system prompt) looking for
/// any cache-control annotation, per SPEC_FULL.md §4.6.
pub fn has_cache_control(req: &MessagesRequest) -> bool {
    let in_blocks = |blocks: &[MessagesContentBlock]| {
        blocks.iter().any(|b| {
            matches!(
                b,
                MessagesContentBlock::Text {
                    cache_control: Some(_),
                    ..
                } | MessagesContentBlock::ToolUse {
                    cache_control: Some(_),
                    ..
                } | MessagesContentBlock::ToolResult {
                    cache_control: Some(_),
                    ..
                }
            )
        })
    };

    if let Some(MessagesSystemPrompt::Blocks(blocks)) = &req.system {
        if in_blocks(blocks) {
            return true;
        }
    }

    req.messages.iter().any(|m| match &m.content {
        MessagesMessageContent::Blocks(blocks) => in_blocks(blocks),
        MessagesMessageContent::Single(_) => false,
    })
}
