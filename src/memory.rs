use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One conversation turn. Memory is in-process only and resets with the
/// process; nothing here touches disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    fn new(role: Role, content: &str) -> Self {
        Self {
            role,
            content: content.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Bounded FIFO of conversation turns. Trimmed from the front after every
/// append so the cap holds between any two operations, with relative order of
/// surviving turns preserved.
#[derive(Debug, Clone)]
pub struct SessionMemory {
    turns: VecDeque<Turn>,
    cap: usize,
}

impl SessionMemory {
    pub fn new(cap: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            cap,
        }
    }

    pub fn push_user(&mut self, content: &str) {
        self.push(Turn::new(Role::User, content));
    }

    pub fn push_assistant(&mut self, content: &str) {
        self.push(Turn::new(Role::Assistant, content));
    }

    fn push(&mut self, turn: Turn) {
        self.turns.push_back(turn);
        while self.turns.len() > self.cap {
            self.turns.pop_front();
        }
    }

    /// Roll back the most recent turn. Used when a cycle fails after the user
    /// turn was recorded but before a reply existed, so memory never keeps an
    /// orphaned user turn.
    pub fn pop_last(&mut self) -> Option<Turn> {
        self.turns.pop_back()
    }

    /// Turns to hand to the planner: everything before the turn appended for
    /// the current cycle (the current utterance rides in the request itself).
    pub fn history_excluding_last(&self) -> Vec<Turn> {
        let n = self.turns.len().saturating_sub(1);
        self.turns.iter().take(n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_at_limit_and_keeps_most_recent() {
        let mut memory = SessionMemory::new(12);
        for i in 0..20 {
            memory.push_user(&format!("u{}", i));
            memory.push_assistant(&format!("a{}", i));
        }
        assert_eq!(memory.len(), 12);
        let contents: Vec<&str> = memory.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents[0], "u14");
        assert_eq!(contents[11], "a19");
    }

    #[test]
    fn order_survives_trimming() {
        let mut memory = SessionMemory::new(3);
        memory.push_user("one");
        memory.push_assistant("two");
        memory.push_user("three");
        memory.push_assistant("four");
        let contents: Vec<&str> = memory.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["two", "three", "four"]);
    }

    #[test]
    fn rollback_removes_orphaned_user_turn() {
        let mut memory = SessionMemory::new(12);
        memory.push_user("hello");
        memory.push_assistant("hi");
        memory.push_user("do the thing");
        let popped = memory.pop_last().unwrap();
        assert_eq!(popped.role, Role::User);
        assert_eq!(popped.content, "do the thing");
        assert_eq!(memory.len(), 2);
    }

    #[test]
    fn history_excludes_current_turn() {
        let mut memory = SessionMemory::new(12);
        memory.push_user("earlier");
        memory.push_assistant("reply");
        memory.push_user("current");
        let history = memory.history_excluding_last();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "reply");
    }

    #[test]
    fn history_on_fresh_memory_is_empty() {
        let mut memory = SessionMemory::new(12);
        memory.push_user("first ever");
        assert!(memory.history_excluding_last().is_empty());
    }
}
