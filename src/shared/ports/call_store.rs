use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::shared::entities::{
    AmdResult, BroadcastId, BroadcastSession, BroadcastStatus, CallId, CallRecord, CallStatus,
    HangupCause,
};

#[derive(Debug, Error)]
pub enum CallStoreError {
    #[error("write failed: {0}")]
    WriteFailed(String),
    #[error("read failed: {0}")]
    ReadFailed(String),
    #[error("not found: {0}")]
    NotFound(String),
}

pub type CallStoreFuture<T> = Pin<Box<dyn Future<Output = Result<T, CallStoreError>> + Send>>;

/// Partial update merged into an existing record (upsert: a placeholder
/// record is created when the call id is not in the store yet).
#[derive(Clone, Debug, Default)]
pub struct CallUpdate {
    pub status: Option<CallStatus>,
    pub script_played: Option<bool>,
    pub amd_result: Option<AmdResult>,
    pub consent_given: Option<bool>,
    pub gather_attempts: Option<u32>,
    pub hangup_cause: Option<HangupCause>,
    pub duration_sec: Option<u64>,
    pub answered_at: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub sms_sent: Option<bool>,
    pub sms_message_id: Option<String>,
    pub sms_error: Option<String>,
}

impl CallUpdate {
    pub fn status(status: CallStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn apply_to(&self, record: &mut CallRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(script_played) = self.script_played {
            record.script_played = script_played;
        }
        if let Some(amd_result) = self.amd_result {
            record.amd_result = Some(amd_result);
        }
        if let Some(consent_given) = self.consent_given {
            record.consent_given = consent_given;
        }
        if let Some(gather_attempts) = self.gather_attempts {
            record.gather_attempts = gather_attempts;
        }
        if let Some(cause) = &self.hangup_cause {
            record.hangup_cause = Some(cause.clone());
        }
        if let Some(duration_sec) = self.duration_sec {
            record.duration_sec = Some(duration_sec);
        }
        if let Some(answered_at) = self.answered_at {
            record.answered_at = Some(answered_at);
        }
        if let Some(end_time) = self.end_time {
            record.end_time = Some(end_time);
        }
        if let Some(sms_sent) = self.sms_sent {
            record.sms_sent = sms_sent;
        }
        if let Some(id) = &self.sms_message_id {
            record.sms_message_id = Some(id.clone());
        }
        if let Some(err) = &self.sms_error {
            record.sms_error = Some(err.clone());
        }
        record.updated_at = Utc::now();
    }
}

pub trait CallStorePort: Send + Sync {
    fn store_call(&self, record: CallRecord) -> CallStoreFuture<()>;
    /// Upsert merge: creates a placeholder record when absent, returns the
    /// merged record.
    fn update_call(&self, call_id: CallId, update: CallUpdate) -> CallStoreFuture<CallRecord>;
    fn get_call(&self, call_id: CallId) -> CallStoreFuture<Option<CallRecord>>;

    fn store_broadcast(&self, session: BroadcastSession) -> CallStoreFuture<()>;
    fn update_broadcast(
        &self,
        broadcast_id: BroadcastId,
        status: BroadcastStatus,
    ) -> CallStoreFuture<()>;
    fn get_active_broadcasts(&self) -> CallStoreFuture<Vec<BroadcastSession>>;

    fn get_call_counts(
        &self,
        broadcast_id: Option<BroadcastId>,
    ) -> CallStoreFuture<HashMap<CallStatus, u64>>;
    /// Records still waiting on the provider (status pending or ringing).
    fn get_active_calls(&self) -> CallStoreFuture<Vec<CallRecord>>;
    fn get_broadcast_calls(&self, broadcast_id: BroadcastId) -> CallStoreFuture<Vec<CallRecord>>;
    /// Marks every non-terminal record of the broadcast canceled; terminal
    /// records are untouched. Returns the number of records updated.
    fn cancel_broadcast_calls(&self, broadcast_id: BroadcastId) -> CallStoreFuture<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_merges_only_present_fields() {
        let mut record = CallRecord::new(CallId::new("v3:x").unwrap(), "+81900000000", "hi");
        record.gather_attempts = 2;

        let update = CallUpdate {
            status: Some(CallStatus::Voicemail),
            amd_result: Some(AmdResult::Machine),
            ..CallUpdate::default()
        };
        update.apply_to(&mut record);

        assert_eq!(record.status, CallStatus::Voicemail);
        assert_eq!(record.amd_result, Some(AmdResult::Machine));
        assert_eq!(record.gather_attempts, 2);
        assert!(!record.script_played);
    }
}
