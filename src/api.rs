//! Boundary contracts for the remote system of record.
//!
//! The endpoints themselves live outside this crate; only the shapes
//! consumed and produced are specified here, as an async trait that a
//! transport (HTTP client, websocket bridge, in-memory test double)
//! implements. Implementations attach the current [`BearerToken`] to every
//! authenticated request and map 401-class responses to
//! [`ChatError::Auth`]; the core never acquires or refreshes credentials.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ChatError;
use crate::models::{Appointment, ChatListItem, Message, MessageType};

/// Credential obtained from the external session collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        BearerToken(token.into())
    }

    /// Value for the `Authorization` header.
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

/// An ordered page of messages, newest-last, plus pagination state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageBatch {
    pub messages: Vec<Message>,
    pub has_more: bool,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub chat_id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
}

/// Echo of a successful send: the server-assigned id and canonical
/// timestamp, matched back to the caller's temp id out-of-band.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub id: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAppointmentRequest {
    pub chat_id: String,
    pub date_time: DateTime<Utc>,
    pub end_date_time: DateTime<Utc>,
    #[serde(default)]
    pub location: Option<String>,
}

#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Fetch a message page for a chat; `before` continues pagination
    /// backwards from an earlier page's cursor.
    async fn fetch_messages(
        &self,
        chat_id: &str,
        before: Option<&str>,
        limit: usize,
    ) -> Result<MessageBatch, ChatError>;

    async fn send_message(
        &self,
        request: SendMessageRequest,
    ) -> Result<SendMessageResponse, ChatError>;

    async fn fetch_chats(&self) -> Result<Vec<ChatListItem>, ChatError>;

    async fn create_appointment(
        &self,
        request: CreateAppointmentRequest,
    ) -> Result<Appointment, ChatError>;

    /// Date-conflict pre-check: whether an appointment already exists for
    /// the chat on the given calendar date.
    async fn has_appointment_on(
        &self,
        chat_id: &str,
        date: NaiveDate,
    ) -> Result<bool, ChatError>;

    async fn respond_appointment(
        &self,
        appointment_id: &str,
        accepted: bool,
    ) -> Result<Appointment, ChatError>;

    async fn complete_appointment(
        &self,
        appointment_id: &str,
        completed: bool,
    ) -> Result<Appointment, ChatError>;

    async fn delete_appointment(&self, appointment_id: &str) -> Result<(), ChatError>;

    /// Fire-and-forget on the caller's side; no response contract is relied
    /// upon beyond success/failure.
    async fn mark_chat_read(&self, chat_id: &str) -> Result<(), ChatError>;
}
