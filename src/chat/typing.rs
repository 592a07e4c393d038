// Typing indicator tracking.
//
// Indicators are ephemeral: each local "user is typing" signal upserts an
// entry, and entries older than the TTL are ignored at read time. Staleness
// is a pure function of the clock passed in, so no background timer exists
// and re-reading on every poll/render tick is safe.

use chrono::{DateTime, Duration, Utc};
use log::debug;
use std::collections::HashMap;

use crate::chat::tuning;
use crate::models::TypingIndicator;

/// Per-conversation typing state with an explicit lifecycle: the owning
/// view calls `init` on mount and `dispose` on unmount, so no signal
/// outlives the conversation it belongs to.
pub struct TypingTracker {
    // chat id -> user id -> indicator
    chats: HashMap<String, HashMap<String, TypingIndicator>>,
}

impl TypingTracker {
    pub fn new() -> Self {
        TypingTracker {
            chats: HashMap::new(),
        }
    }

    pub fn init(&mut self, chat_id: &str) {
        self.chats.entry(chat_id.to_string()).or_default();
        debug!("Typing tracker initialized for chat {}", chat_id);
    }

    pub fn dispose(&mut self, chat_id: &str) {
        self.chats.remove(chat_id);
        debug!("Typing tracker disposed for chat {}", chat_id);
    }

    /// Upsert an indicator with the given observation time.
    pub fn set_typing(
        &mut self,
        chat_id: &str,
        user_id: &str,
        user_name: &str,
        now: DateTime<Utc>,
    ) {
        self.chats
            .entry(chat_id.to_string())
            .or_default()
            .insert(
                user_id.to_string(),
                TypingIndicator {
                    chat_id: chat_id.to_string(),
                    user_id: user_id.to_string(),
                    user_name: user_name.to_string(),
                    timestamp: now,
                },
            );
    }

    /// Everyone currently typing in a chat, excluding the current user and
    /// anything older than the TTL. Pure read; nothing is mutated.
    pub fn active_typers(
        &self,
        chat_id: &str,
        current_user_id: &str,
        now: DateTime<Utc>,
    ) -> Vec<TypingIndicator> {
        let ttl = Duration::milliseconds(tuning::TYPING_TTL_MS);
        let mut typers: Vec<TypingIndicator> = match self.chats.get(chat_id) {
            Some(users) => users
                .values()
                .filter(|t| t.user_id != current_user_id)
                .filter(|t| now - t.timestamp <= ttl)
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        typers.sort_by(|a, b| a.user_name.cmp(&b.user_name));
        typers
    }

    /// Drop expired entries. Optional housekeeping; reads are already
    /// filtered, this just bounds memory on long-lived chats.
    pub fn purge_expired(&mut self, now: DateTime<Utc>) {
        let ttl = Duration::milliseconds(tuning::TYPING_TTL_MS);
        for users in self.chats.values_mut() {
            users.retain(|_, t| now - t.timestamp <= ttl);
        }
    }
}

impl Default for TypingTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Compose the indicator line from the active typers. The arity rule is
/// part of the contract; the grammar itself is a presentation concern.
pub fn typing_text(typers: &[TypingIndicator]) -> Option<String> {
    match typers {
        [] => None,
        [one] => Some(format!("{} is typing…", one.user_name)),
        [a, b] => Some(format!("{} and {} are typing…", a.user_name, b.user_name)),
        [a, b, rest @ ..] => Some(format!(
            "{}, {} and {} others are typing…",
            a.user_name,
            b.user_name,
            rest.len()
        )),
    }
}
