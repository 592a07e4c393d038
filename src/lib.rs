// Re-export needed modules for testing
pub mod api;
pub mod chat;  // Message lifecycle and appointment workflow
pub mod config;
pub mod errors;
pub mod models;

// Re-export main types for convenience
pub use chat::{AppointmentEngine, MessageStore, PresenceTracker, SyncCoordinator, TypingTracker};
pub use errors::ChatError;
pub use models::*;
