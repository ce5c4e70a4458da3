//! Per-user bounded conversation context.
//!
//! A `ContextWindow` holds the 5 most recent user turns and the 5 most
//! recent assistant turns separately, merged into chronological history
//! on demand. It is owned by the persistence layer on behalf of exactly
//! one user and never shared across users.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::ChatTurn;

/// Turns kept per side of the conversation.
pub const WINDOW_CAP: usize = 5;

/// Emotional tone of the recent conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Positive,
    Negative,
    #[default]
    Neutral,
}

/// The bounded recent-history structure fed to a provider to give it
/// conversational memory.
///
/// Invariant: both turn sequences are capped at [`WINDOW_CAP`] elements
/// in insertion order; inserting past the cap evicts the oldest.
/// `last_interaction` tracks the timestamp of the most recently inserted
/// turn across either sequence.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContextWindow {
    #[serde(default)]
    pub user_turns: Vec<ChatTurn>,
    #[serde(default)]
    pub assistant_turns: Vec<ChatTurn>,
    #[serde(default)]
    pub last_interaction: Option<DateTime<Utc>>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub tone: Tone,
}

impl ContextWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a user turn, evicting the oldest beyond the cap.
    pub fn push_user_turn(&mut self, turn: ChatTurn) {
        self.last_interaction = turn.timestamp;
        self.user_turns.push(turn);
        if self.user_turns.len() > WINDOW_CAP {
            let overflow = self.user_turns.len() - WINDOW_CAP;
            self.user_turns.drain(..overflow);
        }
    }

    /// Append an assistant turn, evicting the oldest beyond the cap.
    pub fn push_assistant_turn(&mut self, turn: ChatTurn) {
        self.last_interaction = turn.timestamp;
        self.assistant_turns.push(turn);
        if self.assistant_turns.len() > WINDOW_CAP {
            let overflow = self.assistant_turns.len() - WINDOW_CAP;
            self.assistant_turns.drain(..overflow);
        }
    }

    /// Both sequences merged into chronological order.
    ///
    /// Turns without a timestamp sort before everything else; the sort is
    /// stable, so equal timestamps keep user-before-assistant order.
    pub fn combined_history(&self) -> Vec<ChatTurn> {
        let mut all: Vec<ChatTurn> = self
            .user_turns
            .iter()
            .chain(self.assistant_turns.iter())
            .cloned()
            .collect();
        all.sort_by_key(|t| t.timestamp.unwrap_or(DateTime::<Utc>::MIN_UTC));
        all
    }

    pub fn is_empty(&self) -> bool {
        self.user_turns.is_empty() && self.assistant_turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use chrono::TimeZone;

    fn turn_at(role: Role, text: &str, secs: i64) -> ChatTurn {
        ChatTurn {
            role,
            text: text.into(),
            timestamp: Some(Utc.timestamp_opt(secs, 0).unwrap()),
        }
    }

    #[test]
    fn cap_evicts_oldest_keeping_insertion_order() {
        let mut window = ContextWindow::new();
        for i in 0..8 {
            window.push_user_turn(turn_at(Role::User, &format!("msg {i}"), i));
        }
        assert_eq!(window.user_turns.len(), 5);
        let texts: Vec<&str> = window.user_turns.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, ["msg 3", "msg 4", "msg 5", "msg 6", "msg 7"]);
    }

    #[test]
    fn last_interaction_tracks_latest_insert() {
        let mut window = ContextWindow::new();
        window.push_user_turn(turn_at(Role::User, "hi", 10));
        window.push_assistant_turn(turn_at(Role::Assistant, "hello", 20));
        assert_eq!(
            window.last_interaction,
            Some(Utc.timestamp_opt(20, 0).unwrap())
        );
    }

    #[test]
    fn combined_history_interleaves_chronologically() {
        let mut window = ContextWindow::new();
        window.push_user_turn(turn_at(Role::User, "a", 1));
        window.push_assistant_turn(turn_at(Role::Assistant, "b", 2));
        window.push_user_turn(turn_at(Role::User, "c", 3));
        let history = window.combined_history();
        let texts: Vec<&str> = history
            .iter()
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>();
        assert_eq!(texts, ["a", "b", "c"]);
    }

    #[test]
    fn serde_round_trip_preserves_window() {
        let mut window = ContextWindow::new();
        window.push_user_turn(turn_at(Role::User, "hi", 5));
        window.push_assistant_turn(turn_at(Role::Assistant, "hello", 6));
        window.topics.push("greetings".into());
        window.tone = Tone::Positive;

        let json = serde_json::to_string(&window).unwrap();
        let back: ContextWindow = serde_json::from_str(&json).unwrap();
        assert_eq!(back, window);
    }
}
