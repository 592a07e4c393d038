// Chat core module
// This file serves as the entry point for the message lifecycle and
// appointment workflow functionality, organized by concern.

pub mod appointments;
pub mod delivery;
pub mod presence;
pub mod store;
pub mod sync;
pub mod typing;

// Re-export the main entry points
pub use appointments::AppointmentEngine;
pub use presence::PresenceTracker;
pub use store::MessageStore;
pub use sync::{ConnectionState, SyncCoordinator};
pub use typing::TypingTracker;

/// Tuning constants shared across the chat core
pub mod tuning {
    /// Page size for initial and older message fetches
    pub const MESSAGE_PAGE_SIZE: usize = 50;
    /// Typing indicators older than this are expired at read time
    pub const TYPING_TTL_MS: i64 = 5000;
    /// Sender/time gap beyond which message grouping breaks
    pub const GROUP_GAP_MINUTES: i64 = 5;
    /// Bounded wait for a message send
    pub const SEND_TIMEOUT_MS: u64 = 2000;
    /// Bounded wait for the appointment date-conflict pre-check
    pub const CONFLICT_CHECK_TIMEOUT_MS: u64 = 2000;
    /// Default poll cadence against the remote
    pub const POLL_INTERVAL_MS: u64 = 3000;
    /// Outstanding optimistic sends are resubmitted at most this many times
    /// after a reconnect before surfacing failed
    pub const MAX_RESUBMITS: usize = 1;
}
