// Message store for one open conversation.
//
// Holds the ordered message collection, newest-last, merging locally
// created optimistic entries with server-confirmed records. Every
// application path is idempotent: polling may redeliver the same record and
// pagination may be retried with the same cursor without duplicating
// entries. Ties on `sent_at` keep stable insertion order so already
// rendered content never reorders.

use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, info, warn};
use std::collections::HashSet;
use uuid::Uuid;

use crate::api::{ChatApi, SendMessageRequest};
use crate::chat::delivery::{self, DeliveryEvent};
use crate::chat::tuning;
use crate::errors::ChatError;
use crate::models::{DeliveryStatus, Message, MessageType};

pub struct MessageStore {
    chat_id: String,
    messages: Vec<Message>,
    has_more: bool,
    oldest_cursor: Option<String>,
    // Cursors already applied; a repeated load_older with the same cursor
    // is a no-op rather than a duplicate prepend.
    applied_cursors: HashSet<String>,
}

/// Presentation flags for message *i*, computed here so the grouping rules
/// stay testable without any rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupFlags {
    /// Sender differs from the previous message, or the gap exceeds the
    /// grouping window.
    pub show_avatar: bool,
    /// Sender differs from the next message, or the gap exceeds the
    /// grouping window.
    pub show_timestamp: bool,
}

/// Messages of one calendar day (fixed reference timezone: UTC), as index
/// ranges into the store's ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayGroup {
    pub date: NaiveDate,
    pub indices: Vec<usize>,
}

impl MessageStore {
    pub fn new(chat_id: &str) -> Self {
        MessageStore {
            chat_id: chat_id.to_string(),
            messages: Vec::new(),
            has_more: false,
            oldest_cursor: None,
            applied_cursors: HashSet::new(),
        }
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Load the newest page for this chat, replacing current contents.
    pub async fn load_initial(&mut self, api: &dyn ChatApi) -> Result<(), ChatError> {
        info!("Loading initial messages for chat {}", self.chat_id);
        let batch = api
            .fetch_messages(&self.chat_id, None, tuning::MESSAGE_PAGE_SIZE)
            .await?;

        self.messages = batch.messages;
        self.has_more = batch.has_more;
        self.oldest_cursor = batch.next_cursor;
        self.applied_cursors.clear();

        debug!(
            "Loaded {} messages for chat {} (has_more: {})",
            self.messages.len(),
            self.chat_id,
            self.has_more
        );
        Ok(())
    }

    /// Load the page before the oldest loaded message and prepend it.
    /// Idempotent: re-applying a cursor, or redelivered ids inside a new
    /// page, never duplicate entries.
    pub async fn load_older(&mut self, api: &dyn ChatApi) -> Result<(), ChatError> {
        let cursor = match &self.oldest_cursor {
            Some(cursor) => cursor.clone(),
            None => {
                debug!("No older messages to load for chat {}", self.chat_id);
                return Ok(());
            }
        };

        if self.applied_cursors.contains(&cursor) {
            debug!("Cursor {} already applied for chat {}", cursor, self.chat_id);
            return Ok(());
        }

        let batch = api
            .fetch_messages(&self.chat_id, Some(&cursor), tuning::MESSAGE_PAGE_SIZE)
            .await?;

        let known: HashSet<String> = self
            .messages
            .iter()
            .filter_map(|m| m.id.clone())
            .collect();

        let fresh: Vec<Message> = batch
            .messages
            .into_iter()
            .filter(|m| match &m.id {
                Some(id) => !known.contains(id),
                None => false,
            })
            .collect();

        debug!(
            "Prepending {} older messages for chat {}",
            fresh.len(),
            self.chat_id
        );
        self.messages.splice(0..0, fresh);
        self.applied_cursors.insert(cursor);
        self.has_more = batch.has_more;
        self.oldest_cursor = batch.next_cursor;
        Ok(())
    }

    /// Append an optimistic entry at the tail and return its temp id.
    pub fn send_optimistic(
        &mut self,
        sender_id: &str,
        content: &str,
        message_type: MessageType,
        now: DateTime<Utc>,
    ) -> String {
        let temp_id = Uuid::new_v4().to_string();
        self.messages.push(Message {
            id: None,
            temp_id: Some(temp_id.clone()),
            chat_id: self.chat_id.clone(),
            sender_id: sender_id.to_string(),
            message_type,
            content: content.to_string(),
            attachments: Vec::new(),
            sent_at: now,
            status: DeliveryStatus::Sending,
            is_optimistic: true,
            error: None,
            is_edited: false,
            reaction_count: 0,
            appointment_id: None,
        });
        debug!("Appended optimistic message {} to chat {}", temp_id, self.chat_id);
        temp_id
    }

    /// Replace the optimistic entry for `temp_id` in place with the
    /// confirmed record. If the entry is gone (store was reset), the
    /// confirmed message is appended instead; a confirmed message is never
    /// silently dropped.
    pub fn reconcile(&mut self, temp_id: &str, server_message: Message) {
        // The poll may have delivered the confirmed record before the send
        // response arrived. Reconciliation must commute with that: drop the
        // optimistic entry and merge into the existing record instead of
        // duplicating it.
        if let Some(id) = server_message.id.clone() {
            if self.messages.iter().any(|m| m.has_id(&id)) {
                if let Some(index) = self.messages.iter().position(|m| m.has_temp_id(temp_id)) {
                    debug!(
                        "Confirmed message {} already present; dropping optimistic entry {}",
                        id, temp_id
                    );
                    self.messages.remove(index);
                }
                self.apply_incoming(server_message);
                return;
            }
        }

        match self.messages.iter_mut().find(|m| m.has_temp_id(temp_id)) {
            Some(entry) => {
                entry.id = server_message.id.clone();
                entry.sent_at = server_message.sent_at;
                entry.content = server_message.content.clone();
                entry.attachments = server_message.attachments.clone();
                entry.is_optimistic = false;
                entry.error = None;
                entry.status = delivery::merge(DeliveryStatus::Sent, server_message.status);
                entry.appointment_id = server_message.appointment_id.clone();
                debug!(
                    "Reconciled temp id {} to server id {:?}",
                    temp_id, server_message.id
                );
            }
            None => {
                // StaleData case: resolved by appending, not surfaced.
                warn!(
                    "No optimistic entry for temp id {}; appending confirmed message",
                    temp_id
                );
                self.apply_incoming(server_message);
            }
        }
    }

    /// Insert or update a server record by id. Content and `sent_at` are
    /// immutable once confirmed; only status, edit flag and reaction counts
    /// merge on redelivery.
    pub fn apply_incoming(&mut self, incoming: Message) {
        if incoming.chat_id != self.chat_id {
            warn!(
                "Dropping message for chat {} applied to store for chat {}",
                incoming.chat_id, self.chat_id
            );
            return;
        }

        let id = match &incoming.id {
            Some(id) => id.clone(),
            None => {
                warn!("Dropping incoming message without a server id");
                return;
            }
        };

        if let Some(entry) = self.messages.iter_mut().find(|m| m.has_id(&id)) {
            entry.status = delivery::merge(entry.status, incoming.status);
            entry.is_edited = incoming.is_edited;
            entry.reaction_count = incoming.reaction_count;
            debug!("Merged redelivered message {}", id);
            return;
        }

        // An incoming record may confirm a still-optimistic entry when the
        // poll observes it before the send response does.
        if let Some(temp_id) = incoming.temp_id.clone() {
            if self.messages.iter().any(|m| m.has_temp_id(&temp_id)) {
                self.reconcile(&temp_id, incoming);
                return;
            }
        }

        self.insert_ordered(incoming);
    }

    /// Insert by timestamp, after any existing entry with the same or an
    /// earlier `sent_at`, preserving insertion order on exact ties.
    fn insert_ordered(&mut self, message: Message) {
        let position = self
            .messages
            .iter()
            .rposition(|m| m.sent_at <= message.sent_at)
            .map(|i| i + 1)
            .unwrap_or(0);
        self.messages.insert(position, message);
    }

    /// Mark the optimistic entry failed; it stays visible until the user
    /// retries or discards it.
    pub fn mark_failed(&mut self, temp_id: &str, error: &str) {
        if let Some(entry) = self.messages.iter_mut().find(|m| m.has_temp_id(temp_id)) {
            entry.status = delivery::advance(entry.status, DeliveryEvent::SendFailed);
            entry.error = Some(error.to_string());
            info!("Marked message {} failed: {}", temp_id, error);
        } else {
            debug!("Tried to mark unknown temp id {} failed", temp_id);
        }
    }

    /// Resubmit a failed entry: the old attempt is removed and its content
    /// re-enters the tail as a fresh `sending` entry under a new temp id.
    pub fn retry(&mut self, temp_id: &str, now: DateTime<Utc>) -> Option<String> {
        let index = self
            .messages
            .iter()
            .position(|m| m.has_temp_id(temp_id) && m.status == DeliveryStatus::Failed)?;
        let failed = self.messages.remove(index);
        Some(self.send_optimistic(
            &failed.sender_id,
            &failed.content,
            failed.message_type,
            now,
        ))
    }

    /// Drop a failed entry without resending it.
    pub fn discard_failed(&mut self, temp_id: &str) -> bool {
        let before = self.messages.len();
        self.messages
            .retain(|m| !(m.has_temp_id(temp_id) && m.status == DeliveryStatus::Failed));
        before != self.messages.len()
    }

    /// Apply a delivery/read event for a confirmed message id.
    pub fn apply_delivery_event(&mut self, id: &str, event: DeliveryEvent) {
        if let Some(entry) = self.messages.iter_mut().find(|m| m.has_id(id)) {
            let next = delivery::advance(entry.status, event);
            if next != entry.status {
                debug!("Message {} status {:?} -> {:?}", id, entry.status, next);
                entry.status = next;
            }
        } else {
            debug!("Delivery event {:?} for unknown message id {}", event, id);
        }
    }

    /// Optimistic entries still waiting for an acknowledgement, in order.
    pub fn pending_optimistic(&self) -> Vec<Message> {
        self.messages
            .iter()
            .filter(|m| m.is_optimistic && m.status == DeliveryStatus::Sending)
            .cloned()
            .collect()
    }

    /// Null the appointment reference on the originating request message so
    /// it renders as a tombstone instead of disappearing.
    pub fn tombstone_appointment(&mut self, appointment_id: &str) {
        for entry in self.messages.iter_mut() {
            if entry.message_type == MessageType::AppointmentRequest
                && entry.appointment_id.as_deref() == Some(appointment_id)
            {
                entry.appointment_id = None;
                info!(
                    "Tombstoned request message {:?} for deleted appointment {}",
                    entry.id, appointment_id
                );
            }
        }
    }

    /// Build the send request for an optimistic entry.
    pub fn send_request_for(&self, temp_id: &str) -> Option<SendMessageRequest> {
        self.messages
            .iter()
            .find(|m| m.has_temp_id(temp_id))
            .map(|m| SendMessageRequest {
                chat_id: m.chat_id.clone(),
                content: m.content.clone(),
                message_type: m.message_type,
            })
    }

    pub fn group_flags(&self) -> Vec<GroupFlags> {
        compute_group_flags(&self.messages)
    }

    pub fn day_groups(&self) -> Vec<DayGroup> {
        compute_day_groups(&self.messages)
    }
}

/// Grouping rules: message *i* shows an avatar iff its sender differs from
/// message *i-1* or the gap exceeds the grouping window, and shows a
/// timestamp iff its sender differs from message *i+1* or that gap exceeds
/// the window.
pub fn compute_group_flags(messages: &[Message]) -> Vec<GroupFlags> {
    let gap = chrono::Duration::minutes(tuning::GROUP_GAP_MINUTES);
    messages
        .iter()
        .enumerate()
        .map(|(i, message)| {
            let show_avatar = match i.checked_sub(1).and_then(|p| messages.get(p)) {
                Some(previous) => {
                    previous.sender_id != message.sender_id
                        || message.sent_at - previous.sent_at > gap
                }
                None => true,
            };
            let show_timestamp = match messages.get(i + 1) {
                Some(next) => {
                    next.sender_id != message.sender_id || next.sent_at - message.sent_at > gap
                }
                None => true,
            };
            GroupFlags {
                show_avatar,
                show_timestamp,
            }
        })
        .collect()
}

/// Partition messages into calendar-day groups by the UTC day of `sent_at`.
pub fn compute_day_groups(messages: &[Message]) -> Vec<DayGroup> {
    let mut groups: Vec<DayGroup> = Vec::new();
    for (i, message) in messages.iter().enumerate() {
        let date = message.sent_at.date_naive();
        match groups.last_mut() {
            Some(group) if group.date == date => group.indices.push(i),
            _ => groups.push(DayGroup {
                date,
                indices: vec![i],
            }),
        }
    }
    groups
}
