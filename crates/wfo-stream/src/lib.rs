// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Consumes a run's event sequence and maintains a running aggregate:
//! turns, tokens, cost, tools used, and current phase.

use std::collections::BTreeSet;

use serde::Serialize;
use tokio::sync::watch;
use wfo_events::{ContentBlock, Event};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Initializing,
    Working,
    ToolUsing,
    Completing,
    Completed,
    Failed,
}

/// A point-in-time, side-effect-free view of the processor's aggregate state.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub turns: u32,
    pub tools_used: Vec<String>,
    pub phase: Phase,
    pub cost_usd: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_created_tokens: u64,
    pub cache_read_tokens: u64,
    pub last_parse_error: Option<String>,
    pub final_success: Option<bool>,
    pub final_result_text: Option<String>,
}

impl Snapshot {
    fn empty() -> Self {
        Snapshot {
            turns: 0,
            tools_used: Vec::new(),
            phase: Phase::Initializing,
            cost_usd: 0.0,
            input_tokens: 0,
            output_tokens: 0,
            cache_created_tokens: 0,
            cache_read_tokens: 0,
            last_parse_error: None,
            final_success: None,
            final_result_text: None,
        }
    }

    /// Percentage complete: exact when `max_turns` is known, otherwise a
    /// coarse heuristic derived from phase.
    pub fn completion_percentage(&self, max_turns: Option<u32>) -> u8 {
        if matches!(self.phase, Phase::Completed | Phase::Failed) {
            return 100;
        }
        match max_turns {
            Some(max) if max > 0 => (100 * self.turns / max).min(100) as u8,
            _ => match self.phase {
                Phase::Initializing => 0,
                Phase::Working => 40,
                Phase::ToolUsing => 60,
                Phase::Completing => 85,
                Phase::Completed | Phase::Failed => 100,
            },
        }
    }
}

/// One processor instance per run. Single-writer: only the child's stdout
/// reader task calls [`StreamProcessor::apply`]; readers subscribe to the
/// published snapshot instead of touching shared mutable state.
pub struct StreamProcessor {
    turns: u32,
    tools_used: BTreeSetInsertionOrder,
    phase: Phase,
    cost_usd: f64,
    input_tokens: u64,
    output_tokens: u64,
    cache_created_tokens: u64,
    cache_read_tokens: u64,
    last_parse_error: Option<String>,
    final_success: Option<bool>,
    final_result_text: Option<String>,
    tx: watch::Sender<Snapshot>,
}

/// `tools_used` must preserve first-seen order (matches how the agent
/// actually invoked tools) while still deduplicating.
struct BTreeSetInsertionOrder {
    seen: BTreeSet<String>,
    order: Vec<String>,
}

impl BTreeSetInsertionOrder {
    fn new() -> Self {
        Self { seen: BTreeSet::new(), order: Vec::new() }
    }

    fn insert(&mut self, name: String) {
        if self.seen.insert(name.clone()) {
            self.order.push(name);
        }
    }
}

impl StreamProcessor {
    pub fn new() -> (Self, watch::Receiver<Snapshot>) {
        let (tx, rx) = watch::channel(Snapshot::empty());
        (
            Self {
                turns: 0,
                tools_used: BTreeSetInsertionOrder::new(),
                phase: Phase::Initializing,
                cost_usd: 0.0,
                input_tokens: 0,
                output_tokens: 0,
                cache_created_tokens: 0,
                cache_read_tokens: 0,
                last_parse_error: None,
                final_success: None,
                final_result_text: None,
                tx,
            },
            rx,
        )
    }

    /// Apply one parsed event, updating the aggregate, then publish a fresh
    /// snapshot to subscribers.
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::Init { .. } => {
                self.phase = Phase::Working;
            }
            Event::Assistant { content_blocks, text, .. } => {
                if text.is_some() {
                    self.turns += 1;
                }
                let mut saw_tool_use = false;
                for block in content_blocks {
                    if let ContentBlock::ToolUse { name, .. } = block {
                        self.tools_used.insert(name.clone());
                        saw_tool_use = true;
                    }
                }
                self.phase = if saw_tool_use { Phase::ToolUsing } else { Phase::Working };
            }
            Event::ToolResult { .. } => {
                self.phase = Phase::Working;
            }
            Event::Final { success, total_cost_usd, num_turns, usage, result_text, .. } => {
                self.phase = if *success { Phase::Completed } else { Phase::Failed };
                // Final metrics are authoritative but events can arrive lossy;
                // never let the aggregate go backwards.
                self.cost_usd = self.cost_usd.max(*total_cost_usd);
                self.turns = self.turns.max(*num_turns);
                self.input_tokens = self.input_tokens.max(usage.input_tokens);
                self.output_tokens = self.output_tokens.max(usage.output_tokens);
                self.cache_created_tokens = self.cache_created_tokens.max(usage.cache_creation_input_tokens);
                self.cache_read_tokens = self.cache_read_tokens.max(usage.cache_read_input_tokens);
                self.final_success = Some(*success);
                self.final_result_text = result_text.clone();
            }
            Event::Other { .. } => {}
        }
        self.publish();
    }

    pub fn record_parse_error(&mut self, message: String) {
        self.last_parse_error = Some(message);
        self.publish();
    }

    /// The current aggregate, without publishing. Callers holding the
    /// processor directly (rather than a `watch::Receiver`) use this.
    pub fn snapshot(&self) -> Snapshot {
        self.to_snapshot()
    }

    fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            turns: self.turns,
            tools_used: self.tools_used.order.clone(),
            phase: self.phase,
            cost_usd: self.cost_usd,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            cache_created_tokens: self.cache_created_tokens,
            cache_read_tokens: self.cache_read_tokens,
            last_parse_error: self.last_parse_error.clone(),
            final_success: self.final_success,
            final_result_text: self.final_result_text.clone(),
        }
    }

    fn publish(&self) {
        // A lagging/absent receiver is not an error here; the registry write
        // path reads the processor state directly on each event instead.
        let _ = self.tx.send(self.to_snapshot());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wfo_events::Usage;

    fn assistant_text(text: &str) -> Event {
        Event::Assistant { turn_index: 0, text: Some(text.into()), content_blocks: vec![ContentBlock::Text(text.into())] }
    }

    fn assistant_tool_use(name: &str) -> Event {
        Event::Assistant {
            turn_index: 0,
            text: None,
            content_blocks: vec![ContentBlock::ToolUse { id: "t1".into(), name: name.into(), input: serde_json::Value::Null }],
        }
    }

    #[test]
    fn init_moves_phase_to_working() {
        let (mut p, rx) = StreamProcessor::new();
        p.apply(&Event::Init { session_id: "s".into(), model: "m".into(), tools: vec![] });
        assert_eq!(rx.borrow().phase, Phase::Working);
    }

    #[test]
    fn assistant_text_increments_turns() {
        let (mut p, rx) = StreamProcessor::new();
        p.apply(&assistant_text("hi"));
        assert_eq!(rx.borrow().turns, 1);
    }

    #[test]
    fn tool_use_is_recorded_once_and_deduplicated() {
        let (mut p, rx) = StreamProcessor::new();
        p.apply(&assistant_tool_use("Write"));
        p.apply(&assistant_tool_use("Write"));
        p.apply(&assistant_tool_use("Bash"));
        assert_eq!(rx.borrow().tools_used, vec!["Write".to_string(), "Bash".to_string()]);
    }

    #[test]
    fn tool_use_sets_phase_tool_using() {
        let (mut p, rx) = StreamProcessor::new();
        p.apply(&assistant_tool_use("Write"));
        assert_eq!(rx.borrow().phase, Phase::ToolUsing);
    }

    #[test]
    fn final_event_never_decreases_turns() {
        let (mut p, rx) = StreamProcessor::new();
        p.apply(&assistant_text("a"));
        p.apply(&assistant_text("b"));
        p.apply(&assistant_text("c"));
        p.apply(&Event::Final {
            success: true,
            total_cost_usd: 0.01,
            num_turns: 1, // lower than observed — must not regress
            duration_ms: 10,
            usage: Usage::default(),
            result_text: Some("done".into()),
        });
        assert_eq!(rx.borrow().turns, 3);
        assert_eq!(rx.borrow().phase, Phase::Completed);
    }

    #[test]
    fn failed_final_sets_failed_phase() {
        let (mut p, rx) = StreamProcessor::new();
        p.apply(&Event::Final {
            success: false,
            total_cost_usd: 0.0,
            num_turns: 0,
            duration_ms: 0,
            usage: Usage::default(),
            result_text: None,
        });
        assert_eq!(rx.borrow().phase, Phase::Failed);
        assert_eq!(rx.borrow().final_success, Some(false));
    }

    #[test]
    fn completion_percentage_is_bounded_by_max_turns() {
        let (mut p, rx) = StreamProcessor::new();
        p.apply(&assistant_text("a"));
        assert_eq!(rx.borrow().completion_percentage(Some(1)), 100);
    }

    #[test]
    fn completion_percentage_uses_phase_heuristic_without_max_turns() {
        let (mut p, rx) = StreamProcessor::new();
        p.apply(&assistant_tool_use("Write"));
        assert_eq!(rx.borrow().completion_percentage(None), 60);
    }

    #[test]
    fn parse_error_is_recorded_without_changing_phase() {
        let (mut p, rx) = StreamProcessor::new();
        p.apply(&assistant_text("a"));
        p.record_parse_error("malformed line".into());
        assert_eq!(rx.borrow().phase, Phase::Working);
        assert_eq!(rx.borrow().last_parse_error.as_deref(), Some("malformed line"));
    }
}
