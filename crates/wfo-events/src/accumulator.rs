// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use crate::ParseError;

/// Accumulates bytes from a stream reader into complete lines, with a hard
/// cap so a runaway child emitting one giant line can't exhaust memory.
///
/// A single overlong line is discarded in full and reported once as
/// [`ParseError::Oversize`]; the accumulator recovers and keeps reading.
pub struct LineAccumulator {
    buf: String,
    cap: usize,
    overflowed: bool,
}

impl LineAccumulator {
    pub fn new(cap: usize) -> Self {
        Self { buf: String::new(), cap, overflowed: false }
    }

    /// Feed a chunk of bytes (already UTF-8 validated by the caller); returns
    /// every complete line found, draining the internal buffer as it goes.
    pub fn feed(&mut self, chunk: &str) -> Vec<Result<String, ParseError>> {
        let mut out = Vec::new();
        for ch in chunk.chars() {
            if ch == '\n' {
                if self.overflowed {
                    out.push(Err(ParseError::Oversize));
                    self.overflowed = false;
                } else {
                    out.push(Ok(std::mem::take(&mut self.buf)));
                }
                continue;
            }
            if self.overflowed {
                continue;
            }
            self.buf.push(ch);
            if self.buf.len() > self.cap {
                self.buf.clear();
                self.overflowed = true;
            }
        }
        out
    }
}

impl Default for LineAccumulator {
    fn default() -> Self {
        Self::new(1024 * 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_complete_lines() {
        let mut acc = LineAccumulator::new(1024);
        let lines = acc.feed("one\ntwo\nthre");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].as_ref().unwrap(), "one");
        assert_eq!(lines[1].as_ref().unwrap(), "two");
    }

    #[test]
    fn carries_partial_line_across_feeds() {
        let mut acc = LineAccumulator::new(1024);
        assert!(acc.feed("par").is_empty());
        let lines = acc.feed("tial\n");
        assert_eq!(lines[0].as_ref().unwrap(), "partial");
    }

    #[test]
    fn oversize_line_is_discarded_and_reported_once() {
        let mut acc = LineAccumulator::new(4);
        acc.feed("toolong");
        let lines = acc.feed("\nshort\n");
        assert!(matches!(lines[0], Err(ParseError::Oversize)));
        assert_eq!(lines[1].as_ref().unwrap(), "short");
    }
}
