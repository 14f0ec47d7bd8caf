// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One parsed line of child output. Deliberately mirrors only the shape the
/// orchestrator cares about — anything the child emits that doesn't match one
/// of these discriminators falls through to [`Event::Other`].
#[derive(Debug, Clone)]
pub enum Event {
    Init {
        session_id: String,
        model: String,
        tools: Vec<String>,
    },
    Assistant {
        turn_index: usize,
        text: Option<String>,
        content_blocks: Vec<ContentBlock>,
    },
    ToolResult {
        tool_use_id: String,
        is_error: bool,
    },
    Final {
        success: bool,
        total_cost_usd: f64,
        num_turns: u32,
        duration_ms: u64,
        usage: Usage,
        result_text: Option<String>,
    },
    Other {
        raw: Value,
    },
}

#[derive(Debug, Clone)]
pub enum ContentBlock {
    Text(String),
    ToolUse { id: String, name: String, input: Value },
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("malformed JSON line: {source}")]
    Malformed {
        raw: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("line exceeded the buffer cap and was discarded")]
    Oversize,
}

impl Event {
    pub(crate) fn from_value(value: Value) -> Event {
        match value.get("type").and_then(Value::as_str) {
            Some("system") if value.get("subtype").and_then(Value::as_str) == Some("init") => {
                Event::Init {
                    session_id: str_field(&value, "session_id"),
                    model: str_field(&value, "model"),
                    tools: value
                        .get("tools")
                        .and_then(Value::as_array)
                        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                        .unwrap_or_default(),
                }
            }
            Some("assistant") => {
                let content_blocks: Vec<ContentBlock> = value
                    .get("message")
                    .and_then(|m| m.get("content"))
                    .and_then(Value::as_array)
                    .map(|blocks| blocks.iter().filter_map(parse_content_block).collect())
                    .unwrap_or_default();
                let text = content_blocks.iter().find_map(|b| match b {
                    ContentBlock::Text(t) => Some(t.clone()),
                    _ => None,
                });
                Event::Assistant {
                    turn_index: value.get("turn_index").and_then(Value::as_u64).unwrap_or(0) as usize,
                    text,
                    content_blocks,
                }
            }
            Some("user") => {
                if let Some(block) = value
                    .get("message")
                    .and_then(|m| m.get("content"))
                    .and_then(Value::as_array)
                    .and_then(|blocks| blocks.iter().find(|b| b.get("type").and_then(Value::as_str) == Some("tool_result")))
                {
                    Event::ToolResult {
                        tool_use_id: str_field(block, "tool_use_id"),
                        is_error: block.get("is_error").and_then(Value::as_bool).unwrap_or(false),
                    }
                } else {
                    Event::Other { raw: value }
                }
            }
            Some("result") => Event::Final {
                success: value.get("success").and_then(Value::as_bool).unwrap_or(false),
                total_cost_usd: value.get("total_cost_usd").and_then(Value::as_f64).unwrap_or(0.0),
                num_turns: value.get("num_turns").and_then(Value::as_u64).unwrap_or(0) as u32,
                duration_ms: value.get("duration_ms").and_then(Value::as_u64).unwrap_or(0),
                usage: value
                    .get("usage")
                    .and_then(|u| serde_json::from_value(u.clone()).ok())
                    .unwrap_or_default(),
                result_text: value.get("result").and_then(Value::as_str).map(str::to_string),
            },
            _ => Event::Other { raw: value },
        }
    }
}

fn str_field(value: &Value, field: &str) -> String {
    value.get(field).and_then(Value::as_str).unwrap_or_default().to_string()
}

fn parse_content_block(block: &Value) -> Option<ContentBlock> {
    match block.get("type").and_then(Value::as_str)? {
        "text" => Some(ContentBlock::Text(str_field(block, "text"))),
        "tool_use" => Some(ContentBlock::ToolUse {
            id: str_field(block, "id"),
            name: str_field(block, "name"),
            input: block.get("input").cloned().unwrap_or(Value::Null),
        }),
        _ => None,
    }
}
