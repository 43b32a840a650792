//! The expectation queue: ordered assertions about inbound lines.
//!
//! Matching is strictly FIFO: only the head of the queue is ever tested
//! against a received line, which keeps scripts order-deterministic. A
//! line that does not match the head is simply not consumed here.

use std::collections::VecDeque;
use std::time::Instant;

use regex::Regex;

/// One expected line from a server.
#[derive(Debug)]
pub struct Expectation {
    /// What we want to match.
    pub pattern: Regex,

    /// When we give up on the expectation.
    pub deadline: Instant,

    /// Whether giving up should stop the whole script.
    pub fatal: bool,
}

/// The per-client FIFO of expectations.
#[derive(Debug, Default)]
pub struct ExpectQueue {
    queue: VecDeque<Expectation>,
}

impl ExpectQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, expectation: Expectation) {
        self.queue.push_back(expectation);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn head(&self) -> Option<&Expectation> {
        self.queue.front()
    }

    /// Tests `text` against the head of the queue.
    ///
    /// On a match the head is removed and every named subexpression is
    /// returned as a `(name, value)` pair; groups that did not participate
    /// in the match capture the empty string.
    pub fn match_head(&mut self, text: &str) -> Option<Vec<(String, String)>> {
        let head = self.queue.front()?;
        let captures = head.pattern.captures(text)?;

        let vars = head
            .pattern
            .capture_names()
            .flatten()
            .map(|name| {
                let value = captures.name(name).map(|m| m.as_str()).unwrap_or_default();
                (name.to_string(), value.to_string())
            })
            .collect();

        self.queue.pop_front();
        Some(vars)
    }

    /// Removes and returns every expectation whose deadline has passed.
    pub fn sweep(&mut self, now: Instant) -> Vec<Expectation> {
        let mut expired = Vec::new();
        let mut index = 0;
        while index < self.queue.len() {
            if self.queue[index].deadline <= now {
                if let Some(expectation) = self.queue.remove(index) {
                    expired.push(expectation);
                }
            } else {
                index += 1;
            }
        }
        expired
    }
}
