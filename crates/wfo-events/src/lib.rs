// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Parses line-delimited JSON emitted by a workflow child process into typed
//! [`Event`]s.

mod accumulator;
mod event;

pub use accumulator::LineAccumulator;
pub use event::{ContentBlock, Event, ParseError, Usage};

/// Parse a single complete line of child output into an [`Event`].
///
/// Unknown discriminators are preserved as [`Event::Other`] rather than
/// rejected, so a newer child emitting a field this crate doesn't know about
/// never breaks the run.
pub fn parse_line(line: &str) -> Result<Event, ParseError> {
    let value: serde_json::Value = serde_json::from_str(line).map_err(|source| ParseError::Malformed {
        raw: line.to_string(),
        source,
    })?;
    Ok(Event::from_value(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_init_event() {
        let line = r#"{"type":"system","subtype":"init","session_id":"abc","model":"claude","tools":["Write","Bash"]}"#;
        match parse_line(line).unwrap() {
            Event::Init { session_id, model, tools } => {
                assert_eq!(session_id, "abc");
                assert_eq!(model, "claude");
                assert_eq!(tools, vec!["Write".to_string(), "Bash".to_string()]);
            }
            other => panic!("expected Init, got {other:?}"),
        }
    }

    #[test]
    fn parses_assistant_text() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"hello"}]}}"#;
        match parse_line(line).unwrap() {
            Event::Assistant { content_blocks, .. } => {
                assert_eq!(content_blocks.len(), 1);
                assert!(matches!(&content_blocks[0], ContentBlock::Text(t) if t == "hello"));
            }
            other => panic!("expected Assistant, got {other:?}"),
        }
    }

    #[test]
    fn parses_assistant_tool_use() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"t1","name":"Write","input":{"path":"a.py"}}]}}"#;
        match parse_line(line).unwrap() {
            Event::Assistant { content_blocks, .. } => {
                assert!(matches!(&content_blocks[0], ContentBlock::ToolUse { name, .. } if name == "Write"));
            }
            other => panic!("expected Assistant, got {other:?}"),
        }
    }

    #[test]
    fn parses_final_result() {
        let line = r#"{"type":"result","success":true,"total_cost_usd":0.01,"num_turns":2,"duration_ms":1500,
            "usage":{"input_tokens":400,"output_tokens":120,"cache_creation_input_tokens":0,"cache_read_input_tokens":0},
            "result":"done"}"#;
        match parse_line(line).unwrap() {
            Event::Final { success, total_cost_usd, num_turns, usage, result_text, .. } => {
                assert!(success);
                assert_eq!(total_cost_usd, 0.01);
                assert_eq!(num_turns, 2);
                assert_eq!(usage.input_tokens, 400);
                assert_eq!(result_text.as_deref(), Some("done"));
            }
            other => panic!("expected Final, got {other:?}"),
        }
    }

    #[test]
    fn unknown_discriminator_becomes_other() {
        let line = r#"{"type":"debug","note":"hi"}"#;
        assert!(matches!(parse_line(line).unwrap(), Event::Other { .. }));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = parse_line(r#"{"type":"assistant""#).unwrap_err();
        assert!(matches!(err, ParseError::Malformed { .. }));
    }
}
