//! Conversation contexts
//!
//! A context is a named, bounded conversational history: an immutable system
//! prompt followed by (user, assistant) turn pairs. History grows by one pair
//! after each successful inference and is trimmed from the oldest end once it
//! exceeds the context's maximum length. The most recent pair is never
//! dropped, even when it alone exceeds the limit, so a conversation can
//! always make progress.
//!
//! Lengths are measured in characters over the rendered history lines
//! (`User: ...` / `Assistant: ...`) plus the system prompt.

mod store;

pub use store::ConversationContextStore;

use std::collections::VecDeque;
use tokio::time::Instant;

const USER_PREFIX: &str = "User: ";
const ASSISTANT_PREFIX: &str = "Assistant: ";
const SYSTEM_PREFIX: &str = "System: ";

/// One (user input, assistant output) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub user: String,
    pub assistant: String,
}

impl Turn {
    pub fn new(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            assistant: assistant.into(),
        }
    }

    /// Rendered length of this pair in characters
    pub fn length(&self) -> usize {
        USER_PREFIX.chars().count()
            + self.user.chars().count()
            + ASSISTANT_PREFIX.chars().count()
            + self.assistant.chars().count()
    }
}

/// One conversation's bounded history
#[derive(Debug, Clone)]
pub struct ConversationContext {
    id: String,
    system_prompt: String,
    turns: VecDeque<Turn>,
    length: usize,
    max_length: usize,
    created_at: Instant,
    last_used: Instant,
    usage_count: u64,
}

impl ConversationContext {
    /// Create an empty context
    pub fn new(id: impl Into<String>, system_prompt: impl Into<String>, max_length: usize) -> Self {
        let system_prompt = system_prompt.into();
        let now = Instant::now();
        Self {
            id: id.into(),
            length: system_prompt.chars().count(),
            system_prompt,
            turns: VecDeque::new(),
            max_length,
            created_at: now,
            last_used: now,
            usage_count: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Turn pairs, oldest first
    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    /// Total length in characters (system prompt plus rendered history)
    pub fn length(&self) -> usize {
        self.length
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    pub fn usage_count(&self) -> u64 {
        self.usage_count
    }

    /// Whether the context has been idle for longer than `ttl`
    pub fn is_expired(&self, ttl: std::time::Duration) -> bool {
        self.last_used.elapsed() > ttl
    }

    /// Append a turn, then drop the oldest pairs while over the limit.
    ///
    /// Returns the number of pairs dropped.
    pub fn append_turn(&mut self, turn: Turn) -> usize {
        self.length += turn.length();
        self.turns.push_back(turn);

        let mut dropped = 0;
        while self.length > self.max_length && self.turns.len() > 1 {
            if let Some(oldest) = self.turns.pop_front() {
                self.length -= oldest.length();
                dropped += 1;
            }
        }

        self.last_used = Instant::now();
        self.usage_count += 1;
        dropped
    }

    /// Render system prompt, history and the new user turn into a prompt.
    pub fn build_prompt(&self, input: &str) -> String {
        let mut prompt = String::with_capacity(self.length + input.len() + 32);
        if !self.system_prompt.is_empty() {
            prompt.push_str(SYSTEM_PREFIX);
            prompt.push_str(&self.system_prompt);
            prompt.push_str("\n\n");
        }

        for turn in &self.turns {
            prompt.push_str(USER_PREFIX);
            prompt.push_str(&turn.user);
            prompt.push('\n');
            prompt.push_str(ASSISTANT_PREFIX);
            prompt.push_str(&turn.assistant);
            prompt.push('\n');
        }

        prompt.push('\n');
        prompt.push_str(USER_PREFIX);
        prompt.push_str(input);
        prompt.push_str("\nAssistant:");
        prompt
    }

    /// Refresh the idle clock without recording a turn
    pub(crate) fn touch(&mut self) {
        self.last_used = Instant::now();
    }
}
