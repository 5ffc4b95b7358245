//! The streaming transducer (SPEC_FULL.md §4.5) — the hardest and largest
//! component in this repository. Consumes OpenAI chat-completion SSE
//! chunks and emits Anthropic's richer, block-indexed SSE event protocol.
//!
//! Unlike the donor's hardcoded-single-index converter, block indices here
//! are tracked explicitly per §4.5.1-§4.5.2: a text block and each distinct
//! upstream tool-call index get their own, strictly increasing index,
//! assigned at first-seen order and never reused.

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::anthropic::{
    MessagesContentBlock, MessagesContentDelta, MessagesMessageDelta, MessagesStopReason,
    MessagesStreamEvent, MessagesStreamMessage, MessagesUsage,
};
use crate::openai::{ChatCompletionsStreamResponse, FinishReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActiveBlock {
    None,
    Text,
    Tool,
}

/// Accumulator row for one upstream tool-call index (SPEC_FULL.md §4.5.1).
#[derive(Debug, Default, Clone)]
struct ToolRow {
    id: Option<String>,
    name: Option<String>,
    accumulated_arguments: String,
    anthropic_block_index: Option<u32>,
    started: bool,
}

/// Per-request transducer state (SPEC_FULL.md §4.5.1). One instance per
/// request; not `Send`-shared, consumed by exactly one producer/consumer
/// pair (SPEC_FULL.md §5).
pub struct Transducer {
    started: bool,
    stopped: bool,
    active_block: ActiveBlock,
    block_index: u32,
    tool_table: BTreeMap<u32, ToolRow>,
    last_usage: MessagesUsage,
    saw_tool_calls: bool,
    finish_reason: Option<FinishReason>,
    message_id: Option<String>,
    model: Option<String>,
    synthetic_tool_counter: u32,
}

impl Default for Transducer {
    fn default() -> Self {
        Self::new()
    }
}

impl Transducer {
    pub fn new() -> Self {
        Self {
            started: false,
            stopped: false,
            active_block: ActiveBlock::None,
            block_index: 0,
            tool_table: BTreeMap::new(),
            last_usage: MessagesUsage::default(),
            saw_tool_calls: false,
            finish_reason: None,
            message_id: None,
            model: None,
            synthetic_tool_counter: 0,
        }
    }

    /// Whether finalization has already been emitted. Once true, further
    /// calls to [`Transducer::feed_chunk`] or [`Transducer::finalize`] are
    /// no-ops (SPEC_FULL.md §4.5.4: "Guarded by `stopped`").
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Feeds one OpenAI SSE chunk, returning the Anthropic events it
    /// produces (SPEC_FULL.md §4.5.3). If the chunk carries a terminal
    /// `finish_reason`, this call also performs finalization (§4.5.4) and
    /// no further chunks should be fed.
    pub fn feed_chunk(&mut self, chunk: &ChatCompletionsStreamResponse) -> Vec<MessagesStreamEvent> {
        if self.stopped {
            return Vec::new();
        }

        let mut events = Vec::new();

        if !self.started {
            self.message_id = Some(chunk.id.clone());
            self.model = Some(chunk.model.clone());
            events.push(MessagesStreamEvent::MessageStart {
                message: MessagesStreamMessage::new(
                    chunk.id.clone(),
                    chunk.model.clone(),
                    self.last_usage.clone(),
                ),
            });
            self.started = true;
        }

        if let Some(usage) = &chunk.usage {
            self.last_usage = MessagesUsage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
                cache_creation_input_tokens: None,
                cache_read_input_tokens: None,
            };
        }

        let Some(choice) = chunk.choices.first() else {
            return events;
        };

        if let Some(text) = &choice.delta.content {
            if !text.is_empty() {
                self.emit_text_delta(&mut events, text);
            }
        }

        if let Some(tool_calls) = &choice.delta.tool_calls {
            for tc in tool_calls {
                self.apply_tool_call_delta(&mut events, tc);
            }
        }

        if let Some(reason) = choice.finish_reason {
            self.finish_reason = Some(reason);
            events.extend(self.finalize());
        }

        events
    }

    fn emit_text_delta(&mut self, events: &mut Vec<MessagesStreamEvent>, text: &str) {
        if self.active_block == ActiveBlock::Tool {
            events.push(MessagesStreamEvent::ContentBlockStop {
                index: self.block_index,
            });
            self.block_index += 1;
        }
        if self.active_block != ActiveBlock::Text {
            events.push(MessagesStreamEvent::ContentBlockStart {
                index: self.block_index,
                content_block: MessagesContentBlock::empty_text(),
            });
            self.active_block = ActiveBlock::Text;
        }
        events.push(MessagesStreamEvent::ContentBlockDelta {
            index: self.block_index,
            delta: MessagesContentDelta::TextDelta {
                text: text.to_string(),
            },
        });
    }

    fn apply_tool_call_delta(
        &mut self,
        events: &mut Vec<MessagesStreamEvent>,
        tc: &crate::openai::ToolCallDelta,
    ) {
        let row = self.tool_table.entry(tc.index).or_default();
        if let Some(id) = &tc.id {
            row.id = Some(id.clone());
        }
        if let Some(function) = &tc.function {
            if let Some(name) = &function.name {
                row.name = Some(name.clone());
            }
            if let Some(args) = &function.arguments {
                row.accumulated_arguments.push_str(args);
            }
        }

        let mut just_started = false;
        if !row.started {
            if let Some(name) = row.name.clone() {
                if self.active_block == ActiveBlock::Text {
                    events.push(MessagesStreamEvent::ContentBlockStop {
                        index: self.block_index,
                    });
                    self.block_index += 1;
                }
                let anthropic_index = self.block_index;
                row.anthropic_block_index = Some(anthropic_index);
                row.started = true;
                just_started = true;
                self.saw_tool_calls = true;
                self.active_block = ActiveBlock::Tool;

                let id = row.id.clone().unwrap_or_else(|| {
                    self.synthetic_tool_counter += 1;
                    format!("toolu_{}", self.synthetic_tool_counter)
                });
                row.id = Some(id.clone());

                events.push(MessagesStreamEvent::ContentBlockStart {
                    index: anthropic_index,
                    content_block: MessagesContentBlock::tool_use_stub(id, name),
                });

                // Argument fragments that arrived before the name (buffered
                // in `accumulated_arguments`, which already includes this
                // chunk's own fragment, if any) are replayed now as one
                // delta (SPEC_FULL.md §4.6).
                if !row.accumulated_arguments.is_empty() {
                    events.push(MessagesStreamEvent::ContentBlockDelta {
                        index: anthropic_index,
                        delta: MessagesContentDelta::InputJsonDelta {
                            partial_json: row.accumulated_arguments.clone(),
                        },
                    });
                }
            }
        }

        if row.started && !just_started {
            if let Some(function) = &tc.function {
                if let Some(args) = &function.arguments {
                    if !args.is_empty() {
                        events.push(MessagesStreamEvent::ContentBlockDelta {
                            index: row.anthropic_block_index.expect("started row has an index"),
                            delta: MessagesContentDelta::InputJsonDelta {
                                partial_json: args.clone(),
                            },
                        });
                    }
                }
            }
        }
    }

    /// Finalization (SPEC_FULL.md §4.5.4): closes any open block, emits the
    /// terminal `message_delta` + `message_stop` pair. Triggered by a
    /// terminal `finish_reason`, the `[DONE]` marker, end-of-stream, or an
    /// upstream connection failure (§4.5.5, where the synthesized
    /// `stop_reason` is forced to `end_turn`).
    pub fn finalize(&mut self) -> Vec<MessagesStreamEvent> {
        if self.stopped {
            return Vec::new();
        }
        let mut events = Vec::new();

        // An upstream that closes before any chunk arrived never opened a
        // message; still produce a well-formed (if empty) protocol tail so
        // the client never sees a stream with no message_start at all.
        if !self.started {
            self.message_id = Some(self.message_id.clone().unwrap_or_else(|| {
                format!("msg_{}", Uuid::new_v4().simple())
            }));
            events.push(MessagesStreamEvent::MessageStart {
                message: MessagesStreamMessage::new(
                    self.message_id.clone().unwrap(),
                    self.model.clone().unwrap_or_default(),
                    self.last_usage.clone(),
                ),
            });
            self.started = true;
        }

        match self.active_block {
            ActiveBlock::Text | ActiveBlock::Tool => {
                events.push(MessagesStreamEvent::ContentBlockStop {
                    index: self.block_index,
                });
            }
            ActiveBlock::None => {}
        }

        let stop_reason = match self.finish_reason {
            Some(FinishReason::Length) => MessagesStopReason::MaxTokens,
            _ if self.saw_tool_calls => MessagesStopReason::ToolUse,
            _ => MessagesStopReason::EndTurn,
        };

        events.push(MessagesStreamEvent::MessageDelta {
            delta: MessagesMessageDelta {
                stop_reason: Some(stop_reason),
                stop_sequence: None,
            },
            usage: self.last_usage.clone(),
        });
        events.push(MessagesStreamEvent::MessageStop);
        self.stopped = true;
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openai::{FunctionCallDelta, StreamChoice, StreamDelta, ToolCallDelta, Usage};

    fn chunk(id: &str, delta: StreamDelta, finish: Option<FinishReason>) -> ChatCompletionsStreamResponse {
        ChatCompletionsStreamResponse {
            id: id.to_string(),
            model: "gpt-4o".to_string(),
            choices: vec![StreamChoice {
                index: 0,
                delta,
                finish_reason: finish,
            }],
            usage: None,
        }
    }

    fn text_delta(text: &str) -> StreamDelta {
        StreamDelta {
            content: Some(text.to_string()),
            ..Default::default()
        }
    }

    /// S4 — streaming text.
    #[test]
    fn s4_streaming_text() {
        let mut t = Transducer::new();
        let mut events = Vec::new();

        events.extend(t.feed_chunk(&chunk(
            "a",
            StreamDelta {
                role: Some(crate::openai::Role::Assistant),
                ..Default::default()
            },
            None,
        )));
        events.extend(t.feed_chunk(&chunk("a", text_delta("Hel"), None)));
        events.extend(t.feed_chunk(&chunk("a", text_delta("lo"), None)));
        events.extend(t.feed_chunk(&chunk("a", StreamDelta::default(), Some(FinishReason::Stop))));

        let kinds: Vec<&str> = events.iter().map(|e| e.event_name()).collect();
        assert_eq!(
            kinds,
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
        assert!(t.is_stopped());

        match &events[5] {
            MessagesStreamEvent::MessageDelta { delta, .. } => {
                assert_eq!(delta.stop_reason, Some(MessagesStopReason::EndTurn));
            }
            other => panic!("expected message_delta, got {other:?}"),
        }
    }

    /// S5 — streaming tool call across chunks.
    #[test]
    fn s5_streaming_tool_call() {
        let mut t = Transducer::new();
        let mut events = Vec::new();

        events.extend(t.feed_chunk(&chunk(
            "a",
            StreamDelta {
                tool_calls: Some(vec![ToolCallDelta {
                    index: 0,
                    id: Some("t1".to_string()),
                    function: Some(FunctionCallDelta {
                        name: Some("f".to_string()),
                        arguments: None,
                    }),
                }]),
                ..Default::default()
            },
            None,
        )));
        events.extend(t.feed_chunk(&chunk(
            "a",
            StreamDelta {
                tool_calls: Some(vec![ToolCallDelta {
                    index: 0,
                    id: None,
                    function: Some(FunctionCallDelta {
                        name: None,
                        arguments: Some(r#"{"a":"#.to_string()),
                    }),
                }]),
                ..Default::default()
            },
            None,
        )));
        events.extend(t.feed_chunk(&chunk(
            "a",
            StreamDelta {
                tool_calls: Some(vec![ToolCallDelta {
                    index: 0,
                    id: None,
                    function: Some(FunctionCallDelta {
                        name: None,
                        arguments: Some("1}".to_string()),
                    }),
                }]),
                ..Default::default()
            },
            None,
        )));
        events.extend(t.feed_chunk(&chunk(
            "a",
            StreamDelta::default(),
            Some(FinishReason::ToolCalls),
        )));

        let kinds: Vec<&str> = events.iter().map(|e| e.event_name()).collect();
        assert_eq!(
            kinds,
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );

        match &events[1] {
            MessagesStreamEvent::ContentBlockStart {
                index,
                content_block: MessagesContentBlock::ToolUse { id, name, .. },
            } => {
                assert_eq!(*index, 0);
                assert_eq!(id, "t1");
                assert_eq!(name, "f");
            }
            other => panic!("expected tool_use start, got {other:?}"),
        }

        let partials: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                MessagesStreamEvent::ContentBlockDelta {
                    delta: MessagesContentDelta::InputJsonDelta { partial_json },
                    ..
                } => Some(partial_json.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(partials, vec![r#"{"a":"#, "1}"]);

        match &events[5] {
            MessagesStreamEvent::MessageDelta { delta, .. } => {
                assert_eq!(delta.stop_reason, Some(MessagesStopReason::ToolUse));
            }
            other => panic!("expected message_delta, got {other:?}"),
        }
    }

    /// S6 — streaming text then tool: text at index 0, tool at index 1.
    #[test]
    fn s6_text_then_tool_block_indices() {
        let mut t = Transducer::new();
        let mut events = Vec::new();
        events.extend(t.feed_chunk(&chunk("a", text_delta("hi"), None)));
        events.extend(t.feed_chunk(&chunk(
            "a",
            StreamDelta {
                tool_calls: Some(vec![ToolCallDelta {
                    index: 0,
                    id: Some("t1".to_string()),
                    function: Some(FunctionCallDelta {
                        name: Some("f".to_string()),
                        arguments: Some("{}".to_string()),
                    }),
                }]),
                ..Default::default()
            },
            None,
        )));
        events.extend(t.feed_chunk(&chunk(
            "a",
            StreamDelta::default(),
            Some(FinishReason::ToolCalls),
        )));

        let text_start_index = events.iter().find_map(|e| match e {
            MessagesStreamEvent::ContentBlockStart {
                index,
                content_block: MessagesContentBlock::Text { .. },
            } => Some(*index),
            _ => None,
        });
        let tool_start_index = events.iter().find_map(|e| match e {
            MessagesStreamEvent::ContentBlockStart {
                index,
                content_block: MessagesContentBlock::ToolUse { .. },
            } => Some(*index),
            _ => None,
        });
        assert_eq!(text_start_index, Some(0));
        assert_eq!(tool_start_index, Some(1));
    }

    /// Tool arguments seen before name are buffered and replayed once the
    /// name arrives (SPEC_FULL.md §4.6).
    #[test]
    fn arguments_before_name_are_buffered_then_replayed() {
        let mut t = Transducer::new();
        let mut events = Vec::new();
        events.extend(t.feed_chunk(&chunk(
            "a",
            StreamDelta {
                tool_calls: Some(vec![ToolCallDelta {
                    index: 0,
                    id: Some("t1".to_string()),
                    function: Some(FunctionCallDelta {
                        name: None,
                        arguments: Some(r#"{"a":1}"#.to_string()),
                    }),
                }]),
                ..Default::default()
            },
            None,
        )));
        // Only message_start so far: name unknown, no content_block_start yet.
        let kinds: Vec<&str> = events.iter().map(|e| e.event_name()).collect();
        assert_eq!(kinds, vec!["message_start"]);

        events.extend(t.feed_chunk(&chunk(
            "a",
            StreamDelta {
                tool_calls: Some(vec![ToolCallDelta {
                    index: 0,
                    id: None,
                    function: Some(FunctionCallDelta {
                        name: Some("f".to_string()),
                        arguments: None,
                    }),
                }]),
                ..Default::default()
            },
            None,
        )));

        let kinds: Vec<&str> = events.iter().map(|e| e.event_name()).collect();
        assert_eq!(
            kinds,
            vec!["message_start", "content_block_start", "content_block_delta"]
        );
        match events.last() {
            Some(MessagesStreamEvent::ContentBlockDelta {
                delta: MessagesContentDelta::InputJsonDelta { partial_json },
                ..
            }) => assert_eq!(partial_json, r#"{"a":1}"#),
            other => panic!("expected replayed input_json_delta, got {other:?}"),
        }
    }

    /// Empty upstream reply yields a best-effort finalization with no
    /// content blocks opened — still a well-formed protocol tail.
    #[test]
    fn connection_failure_before_finish_reason_still_finalizes() {
        let mut t = Transducer::new();
        let mut events = t.feed_chunk(&chunk(
            "a",
            StreamDelta {
                role: Some(crate::openai::Role::Assistant),
                ..Default::default()
            },
            None,
        ));
        events.extend(t.finalize());
        let kinds: Vec<&str> = events.iter().map(|e| e.event_name()).collect();
        assert_eq!(kinds, vec!["message_start", "message_delta", "message_stop"]);
        match &events[1] {
            MessagesStreamEvent::MessageDelta { delta, .. } => {
                assert_eq!(delta.stop_reason, Some(MessagesStopReason::EndTurn));
            }
            other => panic!("expected message_delta, got {other:?}"),
        }
    }

    #[test]
    fn finalize_is_idempotent_once_stopped() {
        let mut t = Transducer::new();
        t.feed_chunk(&chunk("a", StreamDelta::default(), Some(FinishReason::Stop)));
        assert!(t.is_stopped());
        assert!(t.finalize().is_empty());
        assert!(t.feed_chunk(&chunk("a", text_delta("more"), None)).is_empty());
    }

    /// Universal invariant 4: well-formed protocol shape for any stream
    /// that terminates in a finish_reason.
    #[test]
    fn property_well_formed_event_sequence() {
        let mut t = Transducer::new();
        let mut events = Vec::new();
        events.extend(t.feed_chunk(&chunk("a", text_delta("ab"), None)));
        events.extend(t.feed_chunk(&chunk(
            "a",
            StreamDelta {
                tool_calls: Some(vec![ToolCallDelta {
                    index: 0,
                    id: Some("t1".to_string()),
                    function: Some(FunctionCallDelta {
                        name: Some("f".to_string()),
                        arguments: Some("{}".to_string()),
                    }),
                }]),
                ..Default::default()
            },
            None,
        )));
        events.extend(t.feed_chunk(&chunk(
            "a",
            StreamDelta::default(),
            Some(FinishReason::ToolCalls),
        )));

        assert!(matches!(events.first(), Some(MessagesStreamEvent::MessageStart { .. })));
        assert!(matches!(events.last(), Some(MessagesStreamEvent::MessageStop)));
        assert!(matches!(
            events[events.len() - 2],
            MessagesStreamEvent::MessageDelta { .. }
        ));

        let mut open: Option<u32> = None;
        let mut seen_indices = Vec::new();
        for e in &events {
            match e {
                MessagesStreamEvent::ContentBlockStart { index, .. } => {
                    assert!(open.is_none(), "a block was opened while another was active");
                    open = Some(*index);
                    seen_indices.push(*index);
                }
                MessagesStreamEvent::ContentBlockStop { index } => {
                    assert_eq!(open, Some(*index));
                    open = None;
                }
                _ => {}
            }
        }
        assert!(open.is_none());
        let mut sorted = seen_indices.clone();
        sorted.sort();
        assert_eq!(seen_indices, sorted);
    }

    /// Universal invariant 5: concatenated text deltas equal concatenated
    /// upstream content fragments.
    #[test]
    fn property_text_delta_concatenation_matches_upstream() {
        let mut t = Transducer::new();
        let fragments = ["Hel", "lo", " wor", "ld"];
        let mut events = Vec::new();
        for f in &fragments {
            events.extend(t.feed_chunk(&chunk("a", text_delta(f), None)));
        }
        events.extend(t.feed_chunk(&chunk("a", StreamDelta::default(), Some(FinishReason::Stop))));

        let produced: String = events
            .iter()
            .filter_map(|e| match e {
                MessagesStreamEvent::ContentBlockDelta {
                    delta: MessagesContentDelta::TextDelta { text },
                    ..
                } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(produced, fragments.concat());
    }

    /// Universal invariant 6: tool call partial_json deltas concatenate to
    /// the upstream arguments fragments, with exactly one content_block_start.
    #[test]
    fn property_tool_argument_concatenation_matches_upstream() {
        let mut t = Transducer::new();
        let arg_fragments = ["{\"x\":", "[1,", "2]}"];
        let mut events = Vec::new();
        events.extend(t.feed_chunk(&chunk(
            "a",
            StreamDelta {
                tool_calls: Some(vec![ToolCallDelta {
                    index: 0,
                    id: Some("tc".to_string()),
                    function: Some(FunctionCallDelta {
                        name: Some("f".to_string()),
                        arguments: None,
                    }),
                }]),
                ..Default::default()
            },
            None,
        )));
        for frag in &arg_fragments {
            events.extend(t.feed_chunk(&chunk(
                "a",
                StreamDelta {
                    tool_calls: Some(vec![ToolCallDelta {
                        index: 0,
                        id: None,
                        function: Some(FunctionCallDelta {
                            name: None,
                            arguments: Some(frag.to_string()),
                        }),
                    }]),
                    ..Default::default()
                },
                None,
            )));
        }
        events.extend(t.feed_chunk(&chunk(
            "a",
            StreamDelta::default(),
            Some(FinishReason::ToolCalls),
        )));

        let starts = events
            .iter()
            .filter(|e| matches!(e, MessagesStreamEvent::ContentBlockStart { content_block: MessagesContentBlock::ToolUse { .. }, .. }))
            .count();
        assert_eq!(starts, 1);

        let produced: String = events
            .iter()
            .filter_map(|e| match e {
                MessagesStreamEvent::ContentBlockDelta {
                    delta: MessagesContentDelta::InputJsonDelta { partial_json },
                    ..
                } => Some(partial_json.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(produced, arg_fragments.concat());
    }

    #[test]
    fn usage_from_final_chunk_is_reflected_in_message_delta() {
        let mut t = Transducer::new();
        let mut events = t.feed_chunk(&chunk("a", text_delta("hi"), None));
        let mut final_chunk = chunk("a", StreamDelta::default(), Some(FinishReason::Stop));
        final_chunk.usage = Some(Usage {
            prompt_tokens: 5,
            completion_tokens: 2,
            total_tokens: 7,
        });
        events.extend(t.feed_chunk(&final_chunk));
        match events.last() {
            Some(MessagesStreamEvent::MessageStop) => {}
            other => panic!("expected message_stop last, got {other:?}"),
        }
        match &events[events.len() - 2] {
            MessagesStreamEvent::MessageDelta { usage, .. } => {
                assert_eq!(usage.input_tokens, 5);
                assert_eq!(usage.output_tokens, 2);
            }
            other => panic!("expected message_delta, got {other:?}"),
        }
    }
}
