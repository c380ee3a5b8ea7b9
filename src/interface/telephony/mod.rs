pub mod telnyx;

pub use telnyx::TelnyxAdapter;

use crate::shared::entities::CallId;
use crate::shared::ports::telephony::{
    CreateCallRequest, GatherOptions, SmsReceipt, SpeakOptions, TelephonyFuture, TelephonyPort,
};
use crate::shared::utils::mask_phone;

/// Dry-run adapter used when no provider API key is configured: every action
/// is logged and succeeds with a fabricated identifier.
#[derive(Clone, Debug, Default)]
pub struct NoopTelephony;

impl NoopTelephony {
    pub fn new() -> Self {
        Self
    }
}

impl TelephonyPort for NoopTelephony {
    fn create_call(&self, request: CreateCallRequest) -> TelephonyFuture<Vec<CallId>> {
        log::info!("[telephony] (noop) create call to {}", mask_phone(&request.to));
        Box::pin(async move { Ok(vec![CallId::new(format!("noop-{}", uuid::Uuid::new_v4())).unwrap()]) })
    }

    fn speak(&self, call_id: CallId, text: String, _options: SpeakOptions) -> TelephonyFuture<()> {
        log::info!(
            "[telephony] (noop) speak on call_id={} text_len={}",
            call_id,
            text.len()
        );
        Box::pin(async move { Ok(()) })
    }

    fn gather(&self, call_id: CallId, _options: GatherOptions) -> TelephonyFuture<()> {
        log::info!("[telephony] (noop) gather on call_id={}", call_id);
        Box::pin(async move { Ok(()) })
    }

    fn gather_with_speak(
        &self,
        call_id: CallId,
        text: String,
        _options: GatherOptions,
    ) -> TelephonyFuture<()> {
        log::info!(
            "[telephony] (noop) gather+speak on call_id={} text_len={}",
            call_id,
            text.len()
        );
        Box::pin(async move { Ok(()) })
    }

    fn transfer(&self, call_id: CallId, to: String, _from: String) -> TelephonyFuture<()> {
        log::info!(
            "[telephony] (noop) transfer call_id={} to {}",
            call_id,
            mask_phone(&to)
        );
        Box::pin(async move { Ok(()) })
    }

    fn hangup(&self, call_id: CallId) -> TelephonyFuture<()> {
        log::info!("[telephony] (noop) hangup call_id={}", call_id);
        Box::pin(async move { Ok(()) })
    }

    fn send_sms(&self, to: String, _from: String, text: String) -> TelephonyFuture<SmsReceipt> {
        log::info!(
            "[telephony] (noop) SMS to {} text_len={}",
            mask_phone(&to),
            text.len()
        );
        Box::pin(async move {
            Ok(SmsReceipt {
                message_id: format!("noop-{}", uuid::Uuid::new_v4()),
            })
        })
    }
}
