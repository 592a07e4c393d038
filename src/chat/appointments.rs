// Appointment scheduling workflow.
//
// State machine from creation to dual-party completion confirmation:
//
//   PENDING --accept--> CONFIRMED
//   PENDING --reject--> CANCELLED
//   PENDING --delete (requester, before response)--> removed, message tombstoned
//   CONFIRMED --(scheduled end elapses)--> WAITING_TO_COMPLETE
//   WAITING_TO_COMPLETE --both parties confirm--> COMPLETED
//   WAITING_TO_COMPLETE --either party reports not completed--> CANCELLED
//
// Unlike plain text sends, none of these mutations is optimistic: every
// transition is applied locally only after the remote acknowledged it.

use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use tokio::time::Duration;

use crate::api::{ChatApi, CreateAppointmentRequest};
use crate::chat::tuning;
use crate::errors::ChatError;
use crate::models::{
    Appointment, AppointmentDraft, AppointmentPayload, AppointmentStatus, Message, MessageType,
    Party,
};

const CONFLICT_MESSAGE: &str = "An appointment already exists for this chat on that date";

pub struct AppointmentEngine {
    appointments: HashMap<String, Appointment>,
    // Date-conflict pre-check results per (chat, calendar date). A cached
    // `true` refuses creation without another network round trip.
    conflict_cache: HashMap<(String, NaiveDate), bool>,
    // Appointment ids with a remote action in flight; a second submission
    // is refused until the first settles.
    in_flight: HashSet<String>,
    pending_creates: HashSet<String>,
}

impl AppointmentEngine {
    pub fn new() -> Self {
        AppointmentEngine {
            appointments: HashMap::new(),
            conflict_cache: HashMap::new(),
            in_flight: HashSet::new(),
            pending_creates: HashSet::new(),
        }
    }

    pub fn get(&self, appointment_id: &str) -> Option<&Appointment> {
        self.appointments.get(appointment_id)
    }

    pub fn is_action_pending(&self, appointment_id: &str) -> bool {
        self.in_flight.contains(appointment_id)
    }

    pub fn is_creating(&self, chat_id: &str) -> bool {
        self.pending_creates.contains(chat_id)
    }

    /// Apply a server-pushed record, last-write-wins. Poll redelivery of an
    /// unchanged record is a no-op.
    pub fn upsert(&mut self, appointment: Appointment) {
        debug!(
            "Upserting appointment {} with status {:?}",
            appointment.id, appointment.status
        );
        self.appointments.insert(appointment.id.clone(), appointment);
    }

    /// Record a conflict-check result, e.g. after a server-side
    /// ConflictError forced a refresh.
    pub fn record_conflict_check(&mut self, chat_id: &str, date: NaiveDate, has_appointment: bool) {
        self.conflict_cache
            .insert((chat_id.to_string(), date), has_appointment);
    }

    /// Validate the requested times. Pure, so the caller can re-evaluate it
    /// reactively whenever date/start/end change.
    pub fn validate_times(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), ChatError> {
        if start.date_naive() < now.date_naive() {
            return Err(ChatError::Validation(
                "The appointment date has already passed".to_string(),
            ));
        }
        if start.date_naive() == now.date_naive() && start <= now {
            return Err(ChatError::Validation(
                "Start time must be later than the current time".to_string(),
            ));
        }
        if end <= start {
            return Err(ChatError::Validation(
                "End time must be later than the start time".to_string(),
            ));
        }
        Ok(())
    }

    /// Create a new scheduling request.
    ///
    /// Runs the time validations and the date-conflict pre-check before any
    /// write reaches the network; a known conflict is a ValidationError,
    /// not a server round-trip failure.
    pub async fn create_request(
        &mut self,
        api: &dyn ChatApi,
        chat_id: &str,
        draft: &AppointmentDraft,
        now: DateTime<Utc>,
    ) -> Result<Appointment, ChatError> {
        Self::validate_times(draft.date_time, draft.end_date_time, now)?;

        if self.pending_creates.contains(chat_id) {
            return Err(ChatError::Validation(
                "An appointment request is already being submitted".to_string(),
            ));
        }

        let date = draft.date_time.date_naive();
        let cached = self
            .conflict_cache
            .get(&(chat_id.to_string(), date))
            .copied();
        match cached {
            Some(true) => return Err(ChatError::Validation(CONFLICT_MESSAGE.to_string())),
            Some(false) => {}
            None => {
                let has_appointment = bounded(
                    tuning::CONFLICT_CHECK_TIMEOUT_MS,
                    api.has_appointment_on(chat_id, date),
                )
                .await?;
                self.record_conflict_check(chat_id, date, has_appointment);
                if has_appointment {
                    return Err(ChatError::Validation(CONFLICT_MESSAGE.to_string()));
                }
            }
        }

        self.pending_creates.insert(chat_id.to_string());
        let result = api
            .create_appointment(CreateAppointmentRequest {
                chat_id: chat_id.to_string(),
                date_time: draft.date_time,
                end_date_time: draft.end_date_time,
                location: draft.location.clone(),
            })
            .await;
        self.pending_creates.remove(chat_id);

        match result {
            Ok(appointment) => {
                info!(
                    "Created appointment {} for chat {} at {}",
                    appointment.id, chat_id, appointment.date_time
                );
                self.record_conflict_check(chat_id, date, true);
                self.appointments
                    .insert(appointment.id.clone(), appointment.clone());
                Ok(appointment)
            }
            Err(ChatError::Conflict(_)) => {
                // The server saw a booking the pre-check missed. Refresh the
                // cached check and surface the same validation message the
                // pre-check would have produced.
                warn!("Server reported a double booking for chat {} on {}", chat_id, date);
                if let Ok(has_appointment) = api.has_appointment_on(chat_id, date).await {
                    self.record_conflict_check(chat_id, date, has_appointment);
                }
                Err(ChatError::Validation(CONFLICT_MESSAGE.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Accept or reject a pending request. Only the non-requesting party
    /// may respond; the requester keeps a read-only awaiting view.
    pub async fn respond(
        &mut self,
        api: &dyn ChatApi,
        appointment_id: &str,
        responder_id: &str,
        accepted: bool,
    ) -> Result<Appointment, ChatError> {
        let appointment = self
            .appointments
            .get(appointment_id)
            .ok_or_else(|| ChatError::Validation("Unknown appointment".to_string()))?;

        if appointment.status != AppointmentStatus::Pending {
            return Err(ChatError::Validation(format!(
                "Appointment is no longer pending (status {:?})",
                appointment.status
            )));
        }
        if appointment.requested_by == responder_id {
            return Err(ChatError::Validation(
                "The requesting party cannot respond to its own request".to_string(),
            ));
        }

        self.begin_action(appointment_id)?;
        let result = api.respond_appointment(appointment_id, accepted).await;
        self.in_flight.remove(appointment_id);

        let acknowledged = result?;
        debug!(
            "Server acknowledged response to {} with status {:?}",
            appointment_id, acknowledged.status
        );

        let entry = self
            .appointments
            .get_mut(appointment_id)
            .ok_or_else(|| ChatError::Validation("Unknown appointment".to_string()))?;
        entry.status = if accepted {
            AppointmentStatus::Confirmed
        } else {
            AppointmentStatus::Cancelled
        };
        info!(
            "Appointment {} {} by {}",
            appointment_id,
            if accepted { "accepted" } else { "rejected" },
            responder_id
        );
        Ok(entry.clone())
    }

    /// Advance confirmed appointments whose scheduled end has elapsed.
    /// Returns the ids that transitioned. Driven by the observed clock on
    /// every poll tick; a server-pushed status for the same record wins via
    /// `upsert`.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let mut transitioned = Vec::new();
        for appointment in self.appointments.values_mut() {
            if appointment.status == AppointmentStatus::Confirmed && appointment.end_time() <= now {
                appointment.status = AppointmentStatus::WaitingToComplete;
                info!(
                    "Appointment {} is past its scheduled end, awaiting completion confirmations",
                    appointment.id
                );
                transitioned.push(appointment.id.clone());
            }
        }
        transitioned
    }

    /// Record one party's completion confirmation.
    ///
    /// Each party confirms exactly once; a repeat is a no-op (tolerating
    /// double-clicks and retries), not an error. COMPLETED is reached only
    /// once both parties reported ready; a not-completed report cancels.
    pub async fn confirm_completion(
        &mut self,
        api: &dyn ChatApi,
        appointment_id: &str,
        party: Party,
        completed: bool,
    ) -> Result<Appointment, ChatError> {
        let appointment = self
            .appointments
            .get(appointment_id)
            .ok_or_else(|| ChatError::Validation("Unknown appointment".to_string()))?;

        if appointment.status != AppointmentStatus::WaitingToComplete {
            return Err(ChatError::Validation(format!(
                "Appointment is not awaiting completion (status {:?})",
                appointment.status
            )));
        }
        if completed && appointment.ready_flag(party) == Some(true) {
            debug!(
                "Duplicate completion confirmation for {} ignored",
                appointment_id
            );
            return Ok(appointment.clone());
        }

        self.begin_action(appointment_id)?;
        let result = api.complete_appointment(appointment_id, completed).await;
        self.in_flight.remove(appointment_id);

        let acknowledged = result?;
        debug!(
            "Server acknowledged completion report for {} with status {:?}",
            appointment_id, acknowledged.status
        );

        let entry = self
            .appointments
            .get_mut(appointment_id)
            .ok_or_else(|| ChatError::Validation("Unknown appointment".to_string()))?;
        if !completed {
            entry.status = AppointmentStatus::Cancelled;
            info!("Appointment {} reported not completed, cancelled", appointment_id);
            return Ok(entry.clone());
        }

        match party {
            Party::Teacher => entry.teacher_ready = Some(true),
            Party::Student => entry.student_ready = Some(true),
        }
        if entry.teacher_ready == Some(true) && entry.student_ready == Some(true) {
            entry.status = AppointmentStatus::Completed;
            info!("Appointment {} completed by both parties", appointment_id);
        }
        Ok(entry.clone())
    }

    /// Delete an appointment. Terminal and independent of status; the
    /// originating request message keeps rendering as a tombstone, which
    /// the caller arranges via the store. Returns the removed record.
    pub async fn delete(
        &mut self,
        api: &dyn ChatApi,
        appointment_id: &str,
    ) -> Result<Appointment, ChatError> {
        if !self.appointments.contains_key(appointment_id) {
            return Err(ChatError::Validation("Unknown appointment".to_string()));
        }

        self.begin_action(appointment_id)?;
        let result = api.delete_appointment(appointment_id).await;
        self.in_flight.remove(appointment_id);
        result?;

        let removed = self
            .appointments
            .remove(appointment_id)
            .ok_or_else(|| ChatError::Validation("Unknown appointment".to_string()))?;
        // The date frees up again for this chat.
        self.conflict_cache
            .remove(&(removed.chat_id.clone(), removed.date_time.date_naive()));
        info!("Deleted appointment {}", appointment_id);
        Ok(removed)
    }

    /// Resolve the appointment data a message carries: requests embed a
    /// serialized draft in their content, responses reference a structured
    /// record. Any other message type carries none.
    pub fn payload_for(&self, message: &Message) -> Option<AppointmentPayload> {
        match message.message_type {
            MessageType::AppointmentRequest => serde_json::from_str::<AppointmentDraft>(&message.content)
                .map_err(|e| {
                    debug!("Unparseable appointment draft in message {:?}: {}", message.id, e);
                    e
                })
                .ok()
                .map(AppointmentPayload::Inline),
            MessageType::AppointmentResponse => message
                .appointment_id
                .as_deref()
                .and_then(|id| self.appointments.get(id))
                .cloned()
                .map(AppointmentPayload::Linked),
            _ => None,
        }
    }

    fn begin_action(&mut self, appointment_id: &str) -> Result<(), ChatError> {
        if !self.in_flight.insert(appointment_id.to_string()) {
            return Err(ChatError::Validation(
                "Another action for this appointment is still in flight".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for AppointmentEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded wait for a remote call; expiry is a transient failure, not a
/// rejection.
async fn bounded<T>(
    ms: u64,
    fut: impl Future<Output = Result<T, ChatError>>,
) -> Result<T, ChatError> {
    match tokio::time::timeout(Duration::from_millis(ms), fut).await {
        Ok(result) => result,
        Err(_) => Err(ChatError::Timeout(ms)),
    }
}
