use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;

use crate::shared::entities::CallId;

#[derive(Debug, Error)]
pub enum TelephonyError {
    /// Provider rejected the action because the account's simultaneous
    /// channel limit is exhausted. Retryable.
    #[error("channel limit exceeded")]
    ChannelLimit,
    /// The call no longer exists on the provider side.
    #[error("call not found")]
    NotFound,
    /// Action arrived after the call already ended (422-equivalent).
    #[error("call already terminated")]
    AlreadyTerminated,
    #[error("provider error: {0}")]
    Provider(String),
    #[error("transport error: {0}")]
    Transport(String),
}

impl TelephonyError {
    /// NotFound / AlreadyTerminated mean the call raced us to a terminal
    /// state; callers treat these as no-ops, not failures.
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            TelephonyError::NotFound | TelephonyError::AlreadyTerminated
        )
    }
}

pub type TelephonyFuture<T> = Pin<Box<dyn Future<Output = Result<T, TelephonyError>> + Send>>;

#[derive(Clone, Debug)]
pub struct CreateCallRequest {
    pub to: String,
    pub from: String,
    pub machine_detection: bool,
}

#[derive(Clone, Debug)]
pub struct SpeakOptions {
    pub voice: String,
    pub language: String,
}

impl Default for SpeakOptions {
    fn default() -> Self {
        Self {
            voice: "female".to_string(),
            language: "en-US".to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct GatherOptions {
    pub valid_digits: String,
    pub max_digits: u32,
    pub timeout: Duration,
}

impl Default for GatherOptions {
    fn default() -> Self {
        Self {
            valid_digits: "12".to_string(),
            max_digits: 1,
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SmsReceipt {
    pub message_id: String,
}

/// Thin client over the voice provider's call-control actions plus the
/// messaging provider's send. One network request per method; responses are
/// surfaced as typed errors so the core stays unit-testable offline.
pub trait TelephonyPort: Send + Sync {
    /// Creates outbound call leg(s). The provider may answer with a
    /// different number of legs than requested; callers must align the
    /// result to their own request, never trust the response cardinality.
    fn create_call(&self, request: CreateCallRequest) -> TelephonyFuture<Vec<CallId>>;
    fn speak(&self, call_id: CallId, text: String, options: SpeakOptions) -> TelephonyFuture<()>;
    fn gather(&self, call_id: CallId, options: GatherOptions) -> TelephonyFuture<()>;
    fn gather_with_speak(
        &self,
        call_id: CallId,
        text: String,
        options: GatherOptions,
    ) -> TelephonyFuture<()>;
    fn transfer(&self, call_id: CallId, to: String, from: String) -> TelephonyFuture<()>;
    fn hangup(&self, call_id: CallId) -> TelephonyFuture<()>;
    fn send_sms(&self, to: String, from: String, text: String) -> TelephonyFuture<SmsReceipt>;
}
