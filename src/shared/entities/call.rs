use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::entities::identifiers::{BroadcastId, CallId};

/// 発信1件ぶんの永続レコード。status は last-writer-wins。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub call_id: CallId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broadcast_id: Option<BroadcastId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_name: Option<String>,
    pub phone_number: String,
    pub script: String,
    pub status: CallStatus,
    #[serde(default)]
    pub script_played: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amd_result: Option<AmdResult>,
    #[serde(default)]
    pub consent_given: bool,
    #[serde(default)]
    pub gather_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hangup_cause: Option<HangupCause>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<u64>,
    #[serde(default)]
    pub sms_sent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sms_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sms_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answered_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_synthetic: bool,
}

impl CallRecord {
    pub fn new(call_id: CallId, phone_number: impl Into<String>, script: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            call_id,
            broadcast_id: None,
            contact_id: None,
            contact_name: None,
            phone_number: phone_number.into(),
            script: script.into(),
            status: CallStatus::Pending,
            script_played: false,
            amd_result: None,
            consent_given: false,
            gather_attempts: 0,
            hangup_cause: None,
            duration_sec: None,
            sms_sent: false,
            sms_message_id: None,
            sms_error: None,
            created_at: now,
            updated_at: now,
            answered_at: None,
            end_time: None,
            is_synthetic: false,
        }
    }

    /// Default record for a webhook that arrived before (or without) the
    /// dispatcher's insert. Destination and script are unknown at this point.
    pub fn placeholder(call_id: CallId) -> Self {
        Self::new(call_id, "", "")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "initiated")]
    Initiated,
    #[serde(rename = "ringing")]
    Ringing,
    #[serde(rename = "answered")]
    Answered,
    #[serde(rename = "in-progress")]
    InProgress,
    #[serde(rename = "voicemail")]
    Voicemail,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "no-answer")]
    NoAnswer,
    #[serde(rename = "busy")]
    Busy,
    #[serde(rename = "canceled")]
    Canceled,
    #[serde(rename = "rejected")]
    Rejected,
    #[serde(rename = "failed")]
    Failed,
}

impl CallStatus {
    /// Terminal records are never speak/gather-actioned again, though a late
    /// duplicate event may still rewrite the status field.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallStatus::Completed
                | CallStatus::NoAnswer
                | CallStatus::Busy
                | CallStatus::Canceled
                | CallStatus::Rejected
                | CallStatus::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Pending => "pending",
            CallStatus::Initiated => "initiated",
            CallStatus::Ringing => "ringing",
            CallStatus::Answered => "answered",
            CallStatus::InProgress => "in-progress",
            CallStatus::Voicemail => "voicemail",
            CallStatus::Completed => "completed",
            CallStatus::NoAnswer => "no-answer",
            CallStatus::Busy => "busy",
            CallStatus::Canceled => "canceled",
            CallStatus::Rejected => "rejected",
            CallStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(CallStatus::Pending),
            "initiated" => Some(CallStatus::Initiated),
            "ringing" => Some(CallStatus::Ringing),
            "answered" => Some(CallStatus::Answered),
            "in-progress" => Some(CallStatus::InProgress),
            "voicemail" => Some(CallStatus::Voicemail),
            "completed" => Some(CallStatus::Completed),
            "no-answer" => Some(CallStatus::NoAnswer),
            "busy" => Some(CallStatus::Busy),
            "canceled" => Some(CallStatus::Canceled),
            "rejected" => Some(CallStatus::Rejected),
            "failed" => Some(CallStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 留守電判定（AMD）の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AmdResult {
    #[serde(rename = "human")]
    Human,
    #[serde(rename = "machine")]
    Machine,
}

impl AmdResult {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "human" | "human_residence" | "human_business" => Some(AmdResult::Human),
            "machine" | "fax_detected" => Some(AmdResult::Machine),
            _ => None,
        }
    }
}

/// プロバイダの hangup cause（未知値は Other で保持）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum HangupCause {
    NormalClearing,
    Busy,
    NoAnswer,
    Timeout,
    Cancel,
    CallRejected,
    NotFound,
    Other(String),
}

impl HangupCause {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "NORMAL_CLEARING" => HangupCause::NormalClearing,
            "USER_BUSY" | "BUSY" => HangupCause::Busy,
            "NO_ANSWER" | "ORIGINATOR_CANCEL_NO_ANSWER" => HangupCause::NoAnswer,
            "TIMEOUT" | "RECOVERY_ON_TIMER_EXPIRE" => HangupCause::Timeout,
            "CANCEL" | "ORIGINATOR_CANCEL" => HangupCause::Cancel,
            "CALL_REJECTED" | "REJECTED" => HangupCause::CallRejected,
            "NOT_FOUND" | "UNALLOCATED_NUMBER" => HangupCause::NotFound,
            other => HangupCause::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            HangupCause::NormalClearing => "NORMAL_CLEARING",
            HangupCause::Busy => "USER_BUSY",
            HangupCause::NoAnswer => "NO_ANSWER",
            HangupCause::Timeout => "TIMEOUT",
            HangupCause::Cancel => "CANCEL",
            HangupCause::CallRejected => "CALL_REJECTED",
            HangupCause::NotFound => "NOT_FOUND",
            HangupCause::Other(raw) => raw.as_str(),
        }
    }
}

impl From<String> for HangupCause {
    fn from(value: String) -> Self {
        HangupCause::parse(&value)
    }
}

impl From<HangupCause> for String {
    fn from(value: HangupCause) -> Self {
        value.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(CallStatus::Completed.is_terminal());
        assert!(CallStatus::NoAnswer.is_terminal());
        assert!(CallStatus::Canceled.is_terminal());
        assert!(!CallStatus::Pending.is_terminal());
        assert!(!CallStatus::Voicemail.is_terminal());
        assert!(!CallStatus::InProgress.is_terminal());
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            CallStatus::Pending,
            CallStatus::InProgress,
            CallStatus::NoAnswer,
            CallStatus::Failed,
        ] {
            assert_eq!(CallStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(CallStatus::parse("bogus"), None);
    }

    #[test]
    fn hangup_cause_parses_provider_variants() {
        assert_eq!(HangupCause::parse("user_busy"), HangupCause::Busy);
        assert_eq!(HangupCause::parse("NORMAL_CLEARING"), HangupCause::NormalClearing);
        assert_eq!(
            HangupCause::parse("WEIRD_CAUSE"),
            HangupCause::Other("WEIRD_CAUSE".to_string())
        );
    }

    #[test]
    fn record_serializes_camel_case() {
        let record = CallRecord::new(CallId::new("v3:abc").unwrap(), "+81901234567", "hello");
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["callId"], "v3:abc");
        assert_eq!(value["status"], "pending");
        assert_eq!(value["scriptPlayed"], false);
        assert!(value.get("hangupCause").is_none());
    }
}
