//! Error taxonomy for the translation core (SPEC_FULL.md §7). These are pure
//! data: no HTTP status or wire-envelope knowledge lives here, since the
//! core has no HTTP concept. `bridge-gateway::errors` maps each variant onto
//! the Anthropic error envelope and an HTTP status.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Validation failure (§4.1). `path` names the first offending field,
    /// e.g. `messages.0.content`.
    #[error("invalid request: {message} (at {path})")]
    InvalidRequest { message: String, path: String },

    /// The upstream reply's tool-call `arguments` string is not valid JSON
    /// (§4.3 step 2).
    #[error("malformed tool arguments for tool call `{tool_name}`: {source}")]
    MalformedToolArguments {
        tool_name: String,
        #[source]
        source: serde_json::Error,
    },

    /// An Anthropic→OpenAI image block carries a remote URL rather than
    /// base64 data, which the OpenAI→Anthropic sibling path (not exercised
    /// by this proxy's forward direction, but retained as a named failure
    /// per §4.2) cannot represent as an Anthropic image source.
    #[error("image source is a remote URL, not base64 data: {url}")]
    InvalidImageSource { url: String },

    /// The upstream returned a body that could not be parsed as the
    /// expected JSON shape on the non-streaming path (§7).
    #[error("malformed upstream response: {0}")]
    MalformedUpstream(#[source] serde_json::Error),
}

impl BridgeError {
    pub fn invalid_request(path: impl Into<String>, message: impl Into<String>) -> Self {
        BridgeError::InvalidRequest {
            message: message.into(),
            path: path.into(),
        }
    }
}
