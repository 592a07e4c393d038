// Common test utilities for integration tests
// This module contains shared code for all integration tests

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use log::LevelFilter;

use tutorlink::api::{
    ChatApi, CreateAppointmentRequest, MessageBatch, SendMessageRequest, SendMessageResponse,
};
use tutorlink::models::{
    Appointment, AppointmentStatus, ChatListItem, DeliveryStatus, Message, MessageType,
};
use tutorlink::ChatError;

// Initialize logging once
static INIT_LOGGER: Once = Once::new();

/// Set up the logger for the tests
pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .init();
    });
}

/// Deterministic test clock base: seconds offset from a fixed instant.
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

/// A confirmed server-side message.
pub fn server_message(id: &str, chat_id: &str, sender_id: &str, content: &str, secs: i64) -> Message {
    Message {
        id: Some(id.to_string()),
        temp_id: None,
        chat_id: chat_id.to_string(),
        sender_id: sender_id.to_string(),
        message_type: MessageType::Text,
        content: content.to_string(),
        attachments: Vec::new(),
        sent_at: at(secs),
        status: DeliveryStatus::Sent,
        is_optimistic: false,
        error: None,
        is_edited: false,
        reaction_count: 0,
        appointment_id: None,
    }
}

#[derive(Default)]
struct MockState {
    messages: HashMap<String, Vec<Message>>,
    chats: Vec<ChatListItem>,
    appointments: HashMap<String, Appointment>,
    booked_dates: HashSet<(String, NaiveDate)>,
    fail_sends: bool,
    fail_fetches: bool,
    fail_actions: bool,
    fail_auth: bool,
    requester_id: String,
    next_id: u64,
    send_calls: usize,
    fetch_calls: usize,
    create_calls: usize,
    conflict_calls: usize,
    complete_calls: usize,
    mark_read_calls: usize,
}

/// In-memory stand-in for the remote system of record. Every call is
/// counted so tests can assert which paths touched the network.
#[derive(Clone)]
pub struct MockApi {
    state: Arc<Mutex<MockState>>,
}

impl MockApi {
    pub fn new() -> Self {
        let state = MockState {
            requester_id: "student-1".to_string(),
            ..Default::default()
        };
        MockApi {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn seed_messages(&self, chat_id: &str, messages: Vec<Message>) {
        self.state
            .lock()
            .unwrap()
            .messages
            .insert(chat_id.to_string(), messages);
    }

    pub fn push_message(&self, message: Message) {
        let mut state = self.state.lock().unwrap();
        state
            .messages
            .entry(message.chat_id.clone())
            .or_default()
            .push(message);
    }

    pub fn seed_chats(&self, chats: Vec<ChatListItem>) {
        self.state.lock().unwrap().chats = chats;
    }

    pub fn seed_booked_date(&self, chat_id: &str, date: NaiveDate) {
        self.state
            .lock()
            .unwrap()
            .booked_dates
            .insert((chat_id.to_string(), date));
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.state.lock().unwrap().fail_sends = fail;
    }

    pub fn set_fail_fetches(&self, fail: bool) {
        self.state.lock().unwrap().fail_fetches = fail;
    }

    pub fn set_fail_actions(&self, fail: bool) {
        self.state.lock().unwrap().fail_actions = fail;
    }

    pub fn set_fail_auth(&self, fail: bool) {
        self.state.lock().unwrap().fail_auth = fail;
    }

    pub fn set_requester(&self, user_id: &str) {
        self.state.lock().unwrap().requester_id = user_id.to_string();
    }

    pub fn send_calls(&self) -> usize {
        self.state.lock().unwrap().send_calls
    }

    pub fn fetch_calls(&self) -> usize {
        self.state.lock().unwrap().fetch_calls
    }

    pub fn create_calls(&self) -> usize {
        self.state.lock().unwrap().create_calls
    }

    pub fn conflict_calls(&self) -> usize {
        self.state.lock().unwrap().conflict_calls
    }

    pub fn complete_calls(&self) -> usize {
        self.state.lock().unwrap().complete_calls
    }

    pub fn mark_read_calls(&self) -> usize {
        self.state.lock().unwrap().mark_read_calls
    }

    pub fn appointment(&self, id: &str) -> Option<Appointment> {
        self.state.lock().unwrap().appointments.get(id).cloned()
    }
}

impl Default for MockApi {
    fn default() -> Self {
        Self::new()
    }
}

fn page(messages: &[Message], before: Option<&str>, limit: usize) -> MessageBatch {
    let end = match before {
        Some(cursor) => messages
            .iter()
            .position(|m| m.id.as_deref() == Some(cursor))
            .unwrap_or(0),
        None => messages.len(),
    };
    let start = end.saturating_sub(limit);
    let page = messages[start..end].to_vec();
    MessageBatch {
        has_more: start > 0,
        next_cursor: page.first().and_then(|m| m.id.clone()),
        messages: page,
    }
}

#[async_trait]
impl ChatApi for MockApi {
    async fn fetch_messages(
        &self,
        chat_id: &str,
        before: Option<&str>,
        limit: usize,
    ) -> Result<MessageBatch, ChatError> {
        let mut state = self.state.lock().unwrap();
        state.fetch_calls += 1;
        if state.fail_auth {
            return Err(ChatError::Auth("token expired".to_string()));
        }
        if state.fail_fetches {
            return Err(ChatError::Network("connection reset".to_string()));
        }
        let messages = state.messages.get(chat_id).cloned().unwrap_or_default();
        Ok(page(&messages, before, limit))
    }

    async fn send_message(
        &self,
        request: SendMessageRequest,
    ) -> Result<SendMessageResponse, ChatError> {
        let mut state = self.state.lock().unwrap();
        state.send_calls += 1;
        if state.fail_sends {
            return Err(ChatError::Network("connection refused".to_string()));
        }
        state.next_id += 1;
        let id = format!("m{}", state.next_id);
        let sent_at = at(state.next_id as i64);
        let confirmed = Message {
            id: Some(id.clone()),
            temp_id: None,
            chat_id: request.chat_id.clone(),
            sender_id: state.requester_id.clone(),
            message_type: request.message_type,
            content: request.content.clone(),
            attachments: Vec::new(),
            sent_at,
            status: DeliveryStatus::Sent,
            is_optimistic: false,
            error: None,
            is_edited: false,
            reaction_count: 0,
            appointment_id: None,
        };
        state
            .messages
            .entry(request.chat_id)
            .or_default()
            .push(confirmed);
        Ok(SendMessageResponse { id, sent_at })
    }

    async fn fetch_chats(&self) -> Result<Vec<ChatListItem>, ChatError> {
        let state = self.state.lock().unwrap();
        if state.fail_fetches {
            return Err(ChatError::Network("connection reset".to_string()));
        }
        Ok(state.chats.clone())
    }

    async fn create_appointment(
        &self,
        request: CreateAppointmentRequest,
    ) -> Result<Appointment, ChatError> {
        let mut state = self.state.lock().unwrap();
        state.create_calls += 1;
        if state.fail_actions {
            return Err(ChatError::Network("connection reset".to_string()));
        }
        let date = request.date_time.date_naive();
        if state.booked_dates.contains(&(request.chat_id.clone(), date)) {
            return Err(ChatError::Conflict("already booked".to_string()));
        }
        state.next_id += 1;
        let appointment = Appointment {
            id: format!("appt{}", state.next_id),
            chat_id: request.chat_id.clone(),
            requested_by: state.requester_id.clone(),
            date_time: request.date_time,
            duration_minutes: (request.end_date_time - request.date_time).num_minutes().max(0)
                as u32,
            location: request.location,
            status: AppointmentStatus::Pending,
            teacher_ready: None,
            student_ready: None,
        };
        state.booked_dates.insert((request.chat_id, date));
        state
            .appointments
            .insert(appointment.id.clone(), appointment.clone());
        Ok(appointment)
    }

    async fn has_appointment_on(
        &self,
        chat_id: &str,
        date: NaiveDate,
    ) -> Result<bool, ChatError> {
        let mut state = self.state.lock().unwrap();
        state.conflict_calls += 1;
        if state.fail_fetches {
            return Err(ChatError::Network("connection reset".to_string()));
        }
        Ok(state.booked_dates.contains(&(chat_id.to_string(), date)))
    }

    async fn respond_appointment(
        &self,
        appointment_id: &str,
        accepted: bool,
    ) -> Result<Appointment, ChatError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_actions {
            return Err(ChatError::Network("connection reset".to_string()));
        }
        let appointment = state
            .appointments
            .get_mut(appointment_id)
            .ok_or_else(|| ChatError::Validation("unknown appointment".to_string()))?;
        appointment.status = if accepted {
            AppointmentStatus::Confirmed
        } else {
            AppointmentStatus::Cancelled
        };
        Ok(appointment.clone())
    }

    async fn complete_appointment(
        &self,
        appointment_id: &str,
        _completed: bool,
    ) -> Result<Appointment, ChatError> {
        let mut state = self.state.lock().unwrap();
        state.complete_calls += 1;
        if state.fail_actions {
            return Err(ChatError::Network("connection reset".to_string()));
        }
        state
            .appointments
            .get(appointment_id)
            .cloned()
            .ok_or_else(|| ChatError::Validation("unknown appointment".to_string()))
    }

    async fn delete_appointment(&self, appointment_id: &str) -> Result<(), ChatError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_actions {
            return Err(ChatError::Network("connection reset".to_string()));
        }
        let removed = state
            .appointments
            .remove(appointment_id)
            .ok_or_else(|| ChatError::Validation("unknown appointment".to_string()))?;
        state
            .booked_dates
            .remove(&(removed.chat_id.clone(), removed.date_time.date_naive()));
        Ok(())
    }

    async fn mark_chat_read(&self, chat_id: &str) -> Result<(), ChatError> {
        let mut state = self.state.lock().unwrap();
        state.mark_read_calls += 1;
        if state.fail_actions {
            return Err(ChatError::Network(format!(
                "failed to mark chat {} read",
                chat_id
            )));
        }
        Ok(())
    }
}
