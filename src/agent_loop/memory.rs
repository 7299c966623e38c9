//! Bounded conversation buffer owned by one agent.

use std::collections::VecDeque;

use crate::types::{Message, Role};

/// Ordered messages with oldest-first eviction past `capacity`.
#[derive(Debug, Clone)]
pub struct Memory {
    messages: VecDeque<Message>,
    capacity: usize,
}

impl Memory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            messages: VecDeque::with_capacity(capacity.min(256)),
            capacity,
        }
    }

    /// Append, dropping the oldest entries if the buffer is full.
    pub fn push(&mut self, message: Message) {
        while self.messages.len() >= self.capacity {
            self.messages.pop_front();
        }
        self.messages.push_back(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.iter().cloned().collect()
    }

    /// The last `n` messages, oldest first.
    pub fn window(&self, n: usize) -> Vec<Message> {
        let skip = self.messages.len().saturating_sub(n);
        self.messages.iter().skip(skip).cloned().collect()
    }

    /// Most recent assistant message with non-empty text.
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .filter(|m| m.role == Role::Assistant)
            .map(|m| m.text().trim())
            .find(|t| !t.is_empty())
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
