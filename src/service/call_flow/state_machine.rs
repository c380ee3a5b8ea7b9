use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::service::call_flow::types::{CallEvent, Direction};
use crate::shared::entities::{AmdResult, CallStatus, HangupCause};

/// Pure transition layer: status an event moves the record to, independent
/// of any side effect. `None` means the event leaves the status untouched.
pub fn status_after(event: &CallEvent) -> Option<CallStatus> {
    match event {
        CallEvent::Initiated {
            direction: Direction::Outbound,
        } => Some(CallStatus::Initiated),
        // Inbound calls are transferred, never tracked as broadcast records.
        CallEvent::Initiated {
            direction: Direction::Inbound,
        } => None,
        CallEvent::Ringing => Some(CallStatus::Ringing),
        CallEvent::Answered => Some(CallStatus::Answered),
        CallEvent::Bridged => Some(CallStatus::InProgress),
        CallEvent::MachineDetectionEnded {
            result: AmdResult::Human,
        } => Some(CallStatus::Answered),
        CallEvent::MachineDetectionEnded {
            result: AmdResult::Machine,
        } => Some(CallStatus::Voicemail),
        CallEvent::MachineGreetingEnded => None,
        CallEvent::SpeakEnded => Some(CallStatus::Completed),
        CallEvent::GatherEnded { .. } => None,
        CallEvent::Hangup { cause, .. } => Some(classify_hangup(cause)),
    }
}

/// Maps the provider hangup cause onto the record's terminal status.
pub fn classify_hangup(cause: &HangupCause) -> CallStatus {
    match cause {
        HangupCause::NormalClearing => CallStatus::Completed,
        HangupCause::Busy => CallStatus::Busy,
        HangupCause::NoAnswer | HangupCause::Timeout => CallStatus::NoAnswer,
        HangupCause::Cancel => CallStatus::Canceled,
        HangupCause::CallRejected => CallStatus::Rejected,
        HangupCause::NotFound | HangupCause::Other(_) => CallStatus::Failed,
    }
}

/// Delay before a scheduled hangup may fire: never before
/// `answered_at + floor`, and a fixed fallback wait when the answer
/// timestamp is unavailable.
pub fn hangup_delay(
    answered_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    floor: Duration,
    fallback: Duration,
) -> Duration {
    let Some(answered_at) = answered_at else {
        return fallback;
    };
    let elapsed = (now - answered_at).to_std().unwrap_or(Duration::ZERO);
    floor.saturating_sub(elapsed)
}
