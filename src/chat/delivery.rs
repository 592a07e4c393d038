// Per-message delivery status tracking.
//
// Status advances monotonically for a given message identity:
//   sending -> sent -> delivered -> read
// with `failed` reachable only from `sending` and left only by a brand-new
// send attempt under a fresh temp id. Events may arrive out of order; a
// read receipt seen before the delivery event collapses both, and a stale
// lower-rank event never regresses the observed status.

use log::debug;

use crate::models::DeliveryStatus;

/// Events that drive a message's delivery state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryEvent {
    /// Server acknowledged the send
    Ack,
    /// Delivered to the recipient's device
    Delivered,
    /// Read receipt from the recipient
    Read,
    /// The send attempt failed
    SendFailed,
}

/// Rank used for the monotonicity rule. `Failed` sits outside the ladder
/// and is handled explicitly.
fn rank(status: DeliveryStatus) -> u8 {
    match status {
        DeliveryStatus::Sending => 0,
        DeliveryStatus::Sent => 1,
        DeliveryStatus::Delivered => 2,
        DeliveryStatus::Read => 3,
        DeliveryStatus::Failed => 0,
    }
}

fn target_of(event: DeliveryEvent) -> DeliveryStatus {
    match event {
        DeliveryEvent::Ack => DeliveryStatus::Sent,
        DeliveryEvent::Delivered => DeliveryStatus::Delivered,
        DeliveryEvent::Read => DeliveryStatus::Read,
        DeliveryEvent::SendFailed => DeliveryStatus::Failed,
    }
}

/// Apply one event to the current status, returning the status to keep.
pub fn advance(current: DeliveryStatus, event: DeliveryEvent) -> DeliveryStatus {
    // No transition is valid out of `failed` except a new send attempt,
    // which shows up as a new message entry rather than an event here.
    if current == DeliveryStatus::Failed {
        debug!("Ignoring {:?} for a failed message", event);
        return current;
    }

    match event {
        DeliveryEvent::SendFailed => {
            if current == DeliveryStatus::Sending {
                DeliveryStatus::Failed
            } else {
                // A failure report for an already-acknowledged message is
                // stale; keep what we have.
                debug!("Ignoring stale send failure at status {:?}", current);
                current
            }
        }
        _ => merge(current, target_of(event)),
    }
}

/// Keep the highest-rank status seen. Used both for event application and
/// for merging a server-reported status into a local entry.
pub fn merge(current: DeliveryStatus, observed: DeliveryStatus) -> DeliveryStatus {
    // Failure is local to a send attempt; a merge neither introduces nor
    // clears it.
    if current == DeliveryStatus::Failed || observed == DeliveryStatus::Failed {
        return current;
    }
    if rank(observed) > rank(current) {
        observed
    } else {
        current
    }
}
