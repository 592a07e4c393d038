// Presence holding and last-seen formatting.
//
// Presence is derived by the backend; this module only holds the latest
// observation per user and formats elapsed time for display.

use chrono::{DateTime, Utc};
use log::debug;
use std::collections::HashMap;

use crate::models::{PresenceState, UserPresence};

pub struct PresenceTracker {
    entries: HashMap<String, UserPresence>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        PresenceTracker {
            entries: HashMap::new(),
        }
    }

    pub fn update(&mut self, user_id: &str, status: PresenceState, last_seen: DateTime<Utc>) {
        debug!("Presence update: {} is now {:?}", user_id, status);
        self.entries.insert(
            user_id.to_string(),
            UserPresence {
                user_id: user_id.to_string(),
                status,
                last_seen,
            },
        );
    }

    /// Latest known status; a user never observed is offline.
    pub fn status_of(&self, user_id: &str) -> PresenceState {
        self.entries
            .get(user_id)
            .map(|p| p.status)
            .unwrap_or(PresenceState::Offline)
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.status_of(user_id) == PresenceState::Online
    }

    pub fn last_seen_text(&self, user_id: &str, now: DateTime<Utc>) -> Option<String> {
        self.entries
            .get(user_id)
            .map(|p| format_last_seen(p.last_seen, now))
    }
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Bucket elapsed time since `last_seen` for display:
/// under a minute, minutes, hours, weekday within the week, short date
/// beyond that.
pub fn format_last_seen(last_seen: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now - last_seen;
    if elapsed < chrono::Duration::minutes(1) {
        "Active now".to_string()
    } else if elapsed < chrono::Duration::hours(1) {
        format!("{}m ago", elapsed.num_minutes())
    } else if elapsed < chrono::Duration::hours(24) {
        format!("{}h ago", elapsed.num_hours())
    } else if elapsed < chrono::Duration::days(7) {
        last_seen.format("%A").to_string()
    } else {
        last_seen.format("%b %d, %Y").to_string()
    }
}
