//! Sliding-window conversation memory.
//!
//! Prompt builders only read the memory through [`ConversationMemory::turns`]
//! or [`ConversationMemory::render`]. The single mutation point is
//! [`ConversationMemory::commit`], called by a chat once a turn has
//! produced its answer. A failed turn therefore never leaves a half
//! recorded exchange behind.

use std::collections::VecDeque;

/// One completed question/answer exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub question: String,
    pub answer: String,
}

/// The most recent `window` turns of one chat session.
#[derive(Debug, Clone)]
pub struct ConversationMemory {
    window: usize,
    turns: VecDeque<Turn>,
}

impl ConversationMemory {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            turns: VecDeque::with_capacity(window),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Turns in chronological order, oldest first.
    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Plain-text projection used inside single-string prompts.
    ///
    /// ```rust
    /// use etf_assistant_core::memory::ConversationMemory;
    ///
    /// let mut m = ConversationMemory::new(5);
    /// m.commit("Hi", "Hello!");
    /// assert_eq!(m.render(), "Human: Hi\nAI: Hello!");
    /// ```
    pub fn render(&self) -> String {
        self.turns
            .iter()
            .map(|t| format!("Human: {}\nAI: {}", t.question, t.answer))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Record a finished turn, evicting the oldest beyond the window.
    pub fn commit(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        if self.window == 0 {
            return;
        }
        if self.turns.len() == self.window {
            self.turns.pop_front();
        }
        self.turns.push_back(Turn {
            question: question.into(),
            answer: answer.into(),
        });
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_keeps_most_recent_turns() {
        let mut m = ConversationMemory::new(2);
        m.commit("q1", "a1");
        m.commit("q2", "a2");
        m.commit("q3", "a3");
        let questions: Vec<&str> = m.turns().map(|t| t.question.as_str()).collect();
        assert_eq!(questions, vec!["q2", "q3"]);
    }

    #[test]
    fn empty_memory_renders_empty() {
        assert_eq!(ConversationMemory::new(5).render(), "");
    }

    #[test]
    fn zero_window_records_nothing() {
        let mut m = ConversationMemory::new(0);
        m.commit("q", "a");
        assert!(m.is_empty());
    }
}
