// Sync coordination against the remote system of record.
//
// Reads flow one way (poll -> store/engine -> presentation) and writes the
// other (user action -> optimistic mutation -> remote -> acknowledgement ->
// reconciliation). The poll task is tied to one conversation via a
// generation counter: init() for a new chat bumps the generation, and any
// batch fetched under an older generation is discarded instead of being
// written into a store it no longer belongs to.

use chrono::Utc;
use futures_util::{pin_mut, Stream, StreamExt};
use log::{debug, error, info, warn};
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tokio::time::Duration;

use crate::api::{ChatApi, SendMessageRequest};
use crate::chat::appointments::AppointmentEngine;
use crate::chat::presence::PresenceTracker;
use crate::chat::store::MessageStore;
use crate::chat::tuning;
use crate::chat::typing::TypingTracker;
use crate::errors::ChatError;
use crate::models::{AppointmentDraft, ChatListItem, DeliveryStatus, Message, MessageType, Party};

/// Connection state exposed for UI banners.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
    Connecting,
    Error,
}

pub struct SyncCoordinator {
    api: Arc<dyn ChatApi>,
    current_user_id: String,
    current_chat: Option<String>,
    store: Option<Arc<TokioMutex<MessageStore>>>,
    appointments: Arc<TokioMutex<AppointmentEngine>>,
    typing: Arc<TokioMutex<TypingTracker>>,
    presence: Arc<TokioMutex<PresenceTracker>>,
    chats: Arc<TokioMutex<Vec<ChatListItem>>>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    // Keeps the channel open so state updates always land, even with no
    // external subscriber.
    _state_rx: watch::Receiver<ConnectionState>,
    poll_handle: Option<JoinHandle<()>>,
    stream_handle: Option<JoinHandle<()>>,
    generation: Arc<AtomicU64>,
    poll_interval: Duration,
}

impl SyncCoordinator {
    pub fn new(api: Arc<dyn ChatApi>, current_user_id: &str) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        SyncCoordinator {
            api,
            current_user_id: current_user_id.to_string(),
            current_chat: None,
            store: None,
            appointments: Arc::new(TokioMutex::new(AppointmentEngine::new())),
            typing: Arc::new(TokioMutex::new(TypingTracker::new())),
            presence: Arc::new(TokioMutex::new(PresenceTracker::new())),
            chats: Arc::new(TokioMutex::new(Vec::new())),
            state_tx: Arc::new(state_tx),
            _state_rx: state_rx,
            poll_handle: None,
            stream_handle: None,
            generation: Arc::new(AtomicU64::new(0)),
            poll_interval: Duration::from_millis(tuning::POLL_INTERVAL_MS),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    /// Subscribe to connection-state changes (UI banner feed).
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn store(&self) -> Option<Arc<TokioMutex<MessageStore>>> {
        self.store.clone()
    }

    pub fn appointments(&self) -> Arc<TokioMutex<AppointmentEngine>> {
        self.appointments.clone()
    }

    pub fn typing(&self) -> Arc<TokioMutex<TypingTracker>> {
        self.typing.clone()
    }

    pub fn presence(&self) -> Arc<TokioMutex<PresenceTracker>> {
        self.presence.clone()
    }

    /// Open a conversation: tear down any previous poll task, load the
    /// initial page and start polling for this chat.
    pub async fn init(&mut self, chat_id: &str) -> Result<Arc<TokioMutex<MessageStore>>, ChatError> {
        if let Some(previous) = self.current_chat.take() {
            self.dispose(&previous).await;
        }
        let my_generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        info!("Opening conversation {}", chat_id);
        let _ = self.state_tx.send(ConnectionState::Connecting);

        let mut store = MessageStore::new(chat_id);
        match store.load_initial(self.api.as_ref()).await {
            Ok(()) => {
                let _ = self.state_tx.send(ConnectionState::Connected);
            }
            Err(e @ ChatError::Auth(_)) => {
                error!("Authentication failure opening chat {}: {}", chat_id, e);
                let _ = self.state_tx.send(ConnectionState::Error);
                return Err(e);
            }
            Err(e) => {
                warn!("Failed to load chat {}: {}", chat_id, e);
                let _ = self.state_tx.send(ConnectionState::Disconnected);
                return Err(e);
            }
        }

        let store = Arc::new(TokioMutex::new(store));
        self.store = Some(store.clone());
        self.current_chat = Some(chat_id.to_string());
        self.typing.lock().await.init(chat_id);

        self.poll_handle = Some(tokio::spawn(Self::poll_loop(
            self.api.clone(),
            chat_id.to_string(),
            self.current_user_id.clone(),
            store.clone(),
            self.appointments.clone(),
            self.state_tx.clone(),
            self.generation.clone(),
            my_generation,
            self.poll_interval,
        )));

        Ok(store)
    }

    /// Tear down the conversation view: cancel the poll task and drop the
    /// per-chat ephemeral state. An in-flight fetch finishing later sees a
    /// newer generation and discards its batch.
    pub async fn dispose(&mut self, chat_id: &str) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = self.poll_handle.take() {
            handle.abort();
            debug!("Cancelled poll task for chat {}", chat_id);
        }
        if let Some(handle) = self.stream_handle.take() {
            handle.abort();
            debug!("Cancelled stream task for chat {}", chat_id);
        }
        self.typing.lock().await.dispose(chat_id);
        self.store = None;
        self.current_chat = None;
        let _ = self.state_tx.send(ConnectionState::Disconnected);
    }

    /// Feed a server-push channel into the store for backends that stream
    /// message events instead of (or alongside) polling. Events are applied
    /// through the same idempotent path as polled batches and are subject
    /// to the same generation guard, so a stream outliving the
    /// conversation view writes nothing.
    pub fn attach_stream<S>(&mut self, stream: S)
    where
        S: Stream<Item = Message> + Send + 'static,
    {
        let store = match self.store.clone() {
            Some(store) => store,
            None => {
                warn!("No open conversation to attach a stream to");
                return;
            }
        };
        let generation = self.generation.clone();
        let my_generation = generation.load(Ordering::SeqCst);
        if let Some(handle) = self.stream_handle.take() {
            handle.abort();
        }
        self.stream_handle = Some(tokio::spawn(async move {
            pin_mut!(stream);
            while let Some(message) = stream.next().await {
                if generation.load(Ordering::SeqCst) != my_generation {
                    debug!("Stream superseded, stopping");
                    return;
                }
                store.lock().await.apply_incoming(message);
            }
            debug!("Message stream ended");
        }));
    }

    /// Send a plain text message optimistically. The entry appears in the
    /// store immediately with status `sending`; the returned temp id
    /// identifies it. Transient send failures land on the entry as
    /// `failed` with a retry affordance; only auth failures propagate.
    pub async fn send_message(
        &self,
        content: &str,
        message_type: MessageType,
    ) -> Result<String, ChatError> {
        let store = self.store_or_validation_error()?;
        let temp_id = {
            let mut store = store.lock().await;
            store.send_optimistic(&self.current_user_id, content, message_type, Utc::now())
        };
        self.submit(&temp_id).await?;
        Ok(temp_id)
    }

    /// Resubmit a failed message under a new temp id, reusing its content.
    pub async fn retry_message(&self, temp_id: &str) -> Result<Option<String>, ChatError> {
        let store = self.store_or_validation_error()?;
        let new_temp_id = {
            let mut store = store.lock().await;
            store.retry(temp_id, Utc::now())
        };
        match new_temp_id {
            Some(new_temp_id) => {
                self.submit(&new_temp_id).await?;
                Ok(Some(new_temp_id))
            }
            None => Ok(None),
        }
    }

    /// Push one optimistic entry to the remote and reconcile or fail it.
    async fn submit(&self, temp_id: &str) -> Result<(), ChatError> {
        let store = self.store_or_validation_error()?;
        let request = {
            let store = store.lock().await;
            store.send_request_for(temp_id)
        };
        let request = match request {
            Some(request) => request,
            None => {
                debug!("No pending entry for temp id {}", temp_id);
                return Ok(());
            }
        };

        let result = submit_request(self.api.as_ref(), &request).await;
        let mut store = store.lock().await;
        match result {
            Ok(response) => {
                let confirmed = Message {
                    id: Some(response.id),
                    temp_id: Some(temp_id.to_string()),
                    chat_id: request.chat_id,
                    sender_id: self.current_user_id.clone(),
                    message_type: request.message_type,
                    content: request.content,
                    attachments: Vec::new(),
                    sent_at: response.sent_at,
                    status: DeliveryStatus::Sent,
                    is_optimistic: false,
                    error: None,
                    is_edited: false,
                    reaction_count: 0,
                    appointment_id: None,
                };
                store.reconcile(temp_id, confirmed);
                Ok(())
            }
            Err(e @ ChatError::Auth(_)) => {
                store.mark_failed(temp_id, "authentication required");
                Err(e)
            }
            Err(e) => {
                store.mark_failed(temp_id, &e.to_string());
                Ok(())
            }
        }
    }

    /// Create an appointment request in the open chat. Delegates to the
    /// workflow engine (validation, conflict pre-check, remote write).
    pub async fn create_appointment(
        &self,
        chat_id: &str,
        draft: &AppointmentDraft,
    ) -> Result<crate::models::Appointment, ChatError> {
        let mut engine = self.appointments.lock().await;
        engine
            .create_request(self.api.as_ref(), chat_id, draft, Utc::now())
            .await
    }

    pub async fn respond_appointment(
        &self,
        appointment_id: &str,
        accepted: bool,
    ) -> Result<crate::models::Appointment, ChatError> {
        let mut engine = self.appointments.lock().await;
        engine
            .respond(self.api.as_ref(), appointment_id, &self.current_user_id, accepted)
            .await
    }

    pub async fn complete_appointment(
        &self,
        appointment_id: &str,
        party: Party,
        completed: bool,
    ) -> Result<crate::models::Appointment, ChatError> {
        let mut engine = self.appointments.lock().await;
        engine
            .confirm_completion(self.api.as_ref(), appointment_id, party, completed)
            .await
    }

    /// Delete an appointment and tombstone its originating request message.
    pub async fn delete_appointment(&self, appointment_id: &str) -> Result<(), ChatError> {
        let removed = {
            let mut engine = self.appointments.lock().await;
            engine.delete(self.api.as_ref(), appointment_id).await?
        };
        if let Some(store) = &self.store {
            store.lock().await.tombstone_appointment(&removed.id);
        }
        Ok(())
    }

    /// Refresh the conversation list and derive the presence columns.
    pub async fn refresh_chats(&self) -> Result<Vec<ChatListItem>, ChatError> {
        let mut items = self.api.fetch_chats().await?;
        let now = Utc::now();
        {
            let presence = self.presence.lock().await;
            for item in items.iter_mut() {
                if let Some(other) = item
                    .participants
                    .iter()
                    .find(|p| p.id != self.current_user_id)
                {
                    item.is_online = presence.is_online(&other.id);
                    item.last_seen_text = presence.last_seen_text(&other.id, now);
                }
            }
        }
        *self.chats.lock().await = items.clone();
        Ok(items)
    }

    pub async fn chat_list(&self) -> Vec<ChatListItem> {
        self.chats.lock().await.clone()
    }

    /// Mark a chat read without blocking message rendering. Failure is
    /// logged, not surfaced; this is not safety-critical.
    pub fn mark_read(&self, chat_id: &str) {
        let api = self.api.clone();
        let chat_id = chat_id.to_string();
        tokio::spawn(async move {
            match tokio::time::timeout(
                Duration::from_millis(tuning::SEND_TIMEOUT_MS),
                api.mark_chat_read(&chat_id),
            )
            .await
            {
                Ok(Ok(())) => debug!("Marked chat {} read", chat_id),
                Ok(Err(e)) => warn!("Failed to mark chat {} read: {}", chat_id, e),
                Err(_) => warn!("Timed out marking chat {} read", chat_id),
            }
        });
    }

    fn store_or_validation_error(&self) -> Result<Arc<TokioMutex<MessageStore>>, ChatError> {
        self.store
            .clone()
            .ok_or_else(|| ChatError::Validation("No conversation is open".to_string()))
    }

    #[allow(clippy::too_many_arguments)]
    async fn poll_loop(
        api: Arc<dyn ChatApi>,
        chat_id: String,
        current_user_id: String,
        store: Arc<TokioMutex<MessageStore>>,
        appointments: Arc<TokioMutex<AppointmentEngine>>,
        state_tx: Arc<watch::Sender<ConnectionState>>,
        generation: Arc<AtomicU64>,
        my_generation: u64,
        poll_interval: Duration,
    ) {
        let mut failed_attempts: u32 = 0;
        // Temp ids already resubmitted after a reconnect; one shot each.
        let mut resubmitted: std::collections::HashSet<String> = std::collections::HashSet::new();

        loop {
            let delay = if failed_attempts == 0 {
                poll_interval
            } else {
                // Backoff with jitter to avoid hammering a recovering server
                let backoff_base = 500 * 2u64.pow(failed_attempts.min(6));
                let jitter = rand::thread_rng().gen_range(0..500);
                Duration::from_millis((backoff_base + jitter).min(30_000))
            };
            tokio::time::sleep(delay).await;

            if generation.load(Ordering::SeqCst) != my_generation {
                debug!("Poll task for chat {} superseded, stopping", chat_id);
                return;
            }

            let fetched = api
                .fetch_messages(&chat_id, None, tuning::MESSAGE_PAGE_SIZE)
                .await;

            // The conversation may have been torn down while the fetch was
            // in flight; a stale batch must not reach the store.
            if generation.load(Ordering::SeqCst) != my_generation {
                debug!("Discarding stale batch for chat {}", chat_id);
                return;
            }

            match fetched {
                Ok(batch) => {
                    let was_disconnected = failed_attempts > 0;
                    failed_attempts = 0;
                    let _ = state_tx.send(ConnectionState::Connected);

                    {
                        let mut store = store.lock().await;
                        for message in batch.messages {
                            store.apply_incoming(message);
                        }
                    }
                    appointments.lock().await.tick(Utc::now());

                    if was_disconnected {
                        Self::resubmit_pending(
                            api.as_ref(),
                            &current_user_id,
                            &store,
                            &mut resubmitted,
                        )
                        .await;
                    }
                }
                Err(ChatError::Auth(e)) => {
                    error!("Authentication failure while polling chat {}: {}", chat_id, e);
                    let _ = state_tx.send(ConnectionState::Error);
                    return;
                }
                Err(e) => {
                    failed_attempts += 1;
                    warn!(
                        "Poll failure {} for chat {}: {}",
                        failed_attempts, chat_id, e
                    );
                    let _ = state_tx.send(ConnectionState::Disconnected);
                }
            }
        }
    }

    /// After a reconnect, push outstanding optimistic sends again, at most
    /// once each, then they surface as failed. No unbounded retry loop.
    async fn resubmit_pending(
        api: &dyn ChatApi,
        current_user_id: &str,
        store: &Arc<TokioMutex<MessageStore>>,
        resubmitted: &mut std::collections::HashSet<String>,
    ) {
        let pending = store.lock().await.pending_optimistic();
        for message in pending {
            let temp_id = match message.temp_id {
                Some(temp_id) => temp_id,
                None => continue,
            };
            if !resubmitted.insert(temp_id.clone()) {
                debug!("Already resubmitted {}, marking failed", temp_id);
                store
                    .lock()
                    .await
                    .mark_failed(&temp_id, "send did not complete after reconnect");
                continue;
            }

            info!("Resubmitting optimistic message {} after reconnect", temp_id);
            let request = SendMessageRequest {
                chat_id: message.chat_id.clone(),
                content: message.content.clone(),
                message_type: message.message_type,
            };
            match submit_request(api, &request).await {
                Ok(response) => {
                    let confirmed = Message {
                        id: Some(response.id),
                        temp_id: Some(temp_id.clone()),
                        chat_id: request.chat_id,
                        sender_id: current_user_id.to_string(),
                        message_type: request.message_type,
                        content: request.content,
                        attachments: Vec::new(),
                        sent_at: response.sent_at,
                        status: DeliveryStatus::Sent,
                        is_optimistic: false,
                        error: None,
                        is_edited: false,
                        reaction_count: 0,
                        appointment_id: None,
                    };
                    store.lock().await.reconcile(&temp_id, confirmed);
                }
                Err(e) => {
                    store.lock().await.mark_failed(&temp_id, &e.to_string());
                }
            }
        }
    }
}

impl Drop for SyncCoordinator {
    fn drop(&mut self) {
        if let Some(handle) = self.poll_handle.take() {
            handle.abort();
        }
        if let Some(handle) = self.stream_handle.take() {
            handle.abort();
        }
    }
}

/// Bounded-wait send; expiry is transient, not a rejection.
async fn submit_request(
    api: &dyn ChatApi,
    request: &SendMessageRequest,
) -> Result<crate::api::SendMessageResponse, ChatError> {
    match tokio::time::timeout(
        Duration::from_millis(tuning::SEND_TIMEOUT_MS),
        api.send_message(request.clone()),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(ChatError::Timeout(tuning::SEND_TIMEOUT_MS)),
    }
}
