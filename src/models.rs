// Core data model for the chat and appointment subsystems.
// These types cross the JSON API boundary, so they carry serde derives
// matching the backend's camelCase wire shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Text,
    AppointmentRequest,
    AppointmentResponse,
    SystemMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sending = 0,   // Optimistic entry, not yet acknowledged
    Sent = 1,      // Acknowledged by the server
    Delivered = 2, // Delivered to the recipient's device
    Read = 3,      // Read by the recipient
    Failed = 4,    // Send failed; waiting for user retry or discard
}

/// A file reference carried by a message. Upload mechanics live outside
/// this crate; only the reference shape matters here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub file_name: String,
    pub url: String,
}

/// One chat message, optimistic or confirmed.
///
/// Exactly one of `id`/`temp_id` identifies the message for matching at any
/// time: `temp_id` while optimistic, `id` once the server has confirmed it.
/// After confirmation `temp_id` is kept only so the in-flight optimistic
/// entry can be reconciled; it is never reused for another send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Option<String>,
    pub temp_id: Option<String>,
    pub chat_id: String,
    pub sender_id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub sent_at: DateTime<Utc>,
    pub status: DeliveryStatus,
    #[serde(default)]
    pub is_optimistic: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default)]
    pub reaction_count: u32,
    #[serde(default)]
    pub appointment_id: Option<String>,
}

impl Message {
    /// Whether this entry matches the given server-assigned id.
    pub fn has_id(&self, id: &str) -> bool {
        self.id.as_deref() == Some(id)
    }

    /// Whether this entry matches the given client-generated temp id.
    pub fn has_temp_id(&self, temp_id: &str) -> bool {
        self.temp_id.as_deref() == Some(temp_id)
    }

    /// A request message whose appointment was deleted keeps rendering as a
    /// tombstone instead of disappearing.
    pub fn is_appointment_tombstone(&self) -> bool {
        self.message_type == MessageType::AppointmentRequest && self.appointment_id.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
    WaitingToComplete,
    Completed,
}

impl AppointmentStatus {
    /// Terminal states accept no further workflow actions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AppointmentStatus::Cancelled | AppointmentStatus::Completed)
    }
}

/// The role a chat participant plays in an appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Teacher,
    Student,
}

/// A scheduling record, referenced 1:1 by its originating
/// APPOINTMENT_REQUEST message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: String,
    pub chat_id: String,
    pub requested_by: String,
    pub date_time: DateTime<Utc>,
    #[serde(default = "default_duration_minutes")]
    pub duration_minutes: u32,
    #[serde(default)]
    pub location: Option<String>,
    pub status: AppointmentStatus,
    #[serde(default)]
    pub teacher_ready: Option<bool>,
    #[serde(default)]
    pub student_ready: Option<bool>,
}

fn default_duration_minutes() -> u32 {
    60
}

impl Appointment {
    /// Scheduled end of the session.
    pub fn end_time(&self) -> DateTime<Utc> {
        self.date_time + chrono::Duration::minutes(self.duration_minutes as i64)
    }

    pub fn ready_flag(&self, party: Party) -> Option<bool> {
        match party {
            Party::Teacher => self.teacher_ready,
            Party::Student => self.student_ready,
        }
    }
}

/// Appointment fields as embedded in a request message's serialized content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentDraft {
    pub date_time: DateTime<Utc>,
    pub end_date_time: DateTime<Utc>,
    #[serde(default)]
    pub location: Option<String>,
}

impl AppointmentDraft {
    pub fn duration_minutes(&self) -> u32 {
        let minutes = (self.end_date_time - self.date_time).num_minutes();
        minutes.max(0) as u32
    }
}

/// The two producer formats for appointment data in messages: requests carry
/// the draft serialized inline in `content`, responses reference a
/// structured appointment record. Resolution goes by message type, never by
/// inspecting the content's shape.
#[derive(Debug, Clone, PartialEq)]
pub enum AppointmentPayload {
    Inline(AppointmentDraft),
    Linked(Appointment),
}

/// An ephemeral "user is typing" signal. Expiry is a pure function of the
/// current time, so indicators never need a cleanup timer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingIndicator {
    pub chat_id: String,
    pub user_id: String,
    pub user_name: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceState {
    Online,
    Away,
    Busy,
    Offline,
}

/// Presence as derived by the backend and merely held here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPresence {
    pub user_id: String,
    pub status: PresenceState,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// One row of the conversation list. Owned by the Sync Coordinator and
/// read-only to the Message Store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatListItem {
    pub id: String,
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub last_message: Option<Message>,
    #[serde(default)]
    pub unread_count: u32,
    pub is_active: bool,
    #[serde(default)]
    pub is_online: bool,
    #[serde(default)]
    pub last_seen_text: Option<String>,
}
