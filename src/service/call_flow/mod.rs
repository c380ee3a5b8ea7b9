//! call_flow モジュール（webhook 駆動の通話進行オーケストレーション層）
//! webhook からのイベントを受け取り、レコード更新とプロバイダ操作
//! （speak / gather / transfer / hangup / SMS）を調停する。
//! 重複・順序入れ替わり配送を前提に、フラグ判定は per-call guard で直列化する。

pub mod guards;
pub mod messages;
pub mod state_machine;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::service::call_flow::guards::{CallGuard, CallGuardRegistry};
use crate::service::call_flow::messages::FlowMessages;
use crate::service::call_flow::state_machine::{classify_hangup, hangup_delay, status_after};
use crate::service::call_flow::types::{CallEvent, Direction, GatherStatus, WebhookEvent};
use crate::shared::config::CallFlowConfig;
use crate::shared::entities::{AmdResult, CallId, CallRecord, CallStatus, HangupCause};
use crate::shared::ports::call_store::{CallStorePort, CallUpdate};
use crate::shared::ports::telephony::{GatherOptions, SpeakOptions, TelephonyPort};
use crate::shared::utils::mask_phone;

/// Webhook-driven side-effect coordinator. Every handler tolerates duplicate
/// delivery and events for call ids the store has never seen; action
/// failures are absorbed so the ingress can always acknowledge.
#[derive(Clone)]
pub struct CallFlowEngine {
    telephony: Arc<dyn TelephonyPort>,
    store: Arc<dyn CallStorePort>,
    guards: CallGuardRegistry,
    cfg: CallFlowConfig,
    messages: FlowMessages,
    sms_from_number: String,
}

impl CallFlowEngine {
    pub fn new(
        telephony: Arc<dyn TelephonyPort>,
        store: Arc<dyn CallStorePort>,
        cfg: CallFlowConfig,
        messages: FlowMessages,
        sms_from_number: String,
    ) -> Self {
        Self {
            telephony,
            store,
            guards: CallGuardRegistry::new(),
            cfg,
            messages,
            sms_from_number,
        }
    }

    pub async fn handle(&self, event: WebhookEvent) {
        log::debug!(
            "[callflow] event {:?} for call_id={}",
            event.event,
            event.call_id
        );
        match &event.event {
            CallEvent::Initiated {
                direction: Direction::Inbound,
            } => self.on_inbound_initiated(&event).await,
            CallEvent::Initiated { .. } | CallEvent::Ringing | CallEvent::Bridged => {
                if let Some(status) = status_after(&event.event) {
                    self.apply_update(&event.call_id, CallUpdate::status(status))
                        .await;
                }
            }
            CallEvent::Answered => self.on_answered(&event.call_id).await,
            CallEvent::MachineDetectionEnded { result } => {
                self.on_machine_detection(&event.call_id, *result).await
            }
            CallEvent::MachineGreetingEnded => self.on_greeting_ended(&event.call_id).await,
            CallEvent::SpeakEnded => self.on_speak_ended(&event.call_id).await,
            CallEvent::GatherEnded { digits, status } => {
                self.on_gather_ended(&event.call_id, digits, *status).await
            }
            CallEvent::Hangup { cause, duration_sec } => {
                self.on_hangup(&event.call_id, cause.clone(), *duration_sec)
                    .await
            }
        }
    }

    /// Inbound legs are not broadcast calls: hand them to the operator and
    /// leave the store untouched.
    async fn on_inbound_initiated(&self, event: &WebhookEvent) {
        let Some(operator) = self.cfg.operator_number.clone() else {
            log::warn!(
                "[callflow] inbound call {} but no operator number configured",
                event.call_id
            );
            return;
        };
        let from = event.from.clone().unwrap_or_default();
        log::info!(
            "[callflow] transferring inbound call {} from {} to operator",
            event.call_id,
            mask_phone(&from)
        );
        match self
            .telephony
            .transfer(event.call_id.clone(), operator, from)
            .await
        {
            Ok(()) => {}
            Err(err) if err.is_benign() => {
                log::debug!("[callflow] inbound call {} already gone: {}", event.call_id, err)
            }
            Err(err) => log::warn!(
                "[callflow] transfer failed for call_id={}: {}",
                event.call_id,
                err
            ),
        }
    }

    async fn on_answered(&self, call_id: &CallId) {
        let existing = self.fetch(call_id).await;
        let was_terminal = existing
            .as_ref()
            .map(|r| r.status.is_terminal())
            .unwrap_or(false);

        let mut update = CallUpdate::status(CallStatus::Answered);
        if existing.as_ref().and_then(|r| r.answered_at).is_none() {
            update.answered_at = Some(Utc::now());
        }
        let Some(record) = self.apply_update(call_id, update).await else {
            return;
        };
        if was_terminal {
            // Late duplicate after hangup: status was rewritten (last write
            // wins) but the call must not be actioned again.
            return;
        }

        if self.cfg.consent_enabled {
            self.start_consent_gather(&record).await;
        } else {
            self.speak_script_once(call_id).await;
        }
    }

    async fn on_machine_detection(&self, call_id: &CallId, result: AmdResult) {
        let existing = self.fetch(call_id).await;
        let was_terminal = existing
            .as_ref()
            .map(|r| r.status.is_terminal())
            .unwrap_or(false);

        let mut update = CallUpdate {
            amd_result: Some(result),
            ..CallUpdate::default()
        };
        update.status = Some(match result {
            AmdResult::Human => CallStatus::Answered,
            AmdResult::Machine => CallStatus::Voicemail,
        });
        if result == AmdResult::Human
            && existing.as_ref().and_then(|r| r.answered_at).is_none()
        {
            update.answered_at = Some(Utc::now());
        }
        if self.apply_update(call_id, update).await.is_none() || was_terminal {
            return;
        }

        match result {
            AmdResult::Human => {
                if !self.cfg.consent_enabled {
                    self.speak_script_once(call_id).await;
                }
            }
            // Speaking over the greeting clips the message; wait for
            // machine-greeting-ended.
            AmdResult::Machine => {}
        }
    }

    async fn on_greeting_ended(&self, call_id: &CallId) {
        let Some(record) = self.fetch(call_id).await else {
            return;
        };
        if record.status.is_terminal() {
            return;
        }
        let guard = self.guards.entry(call_id, &record);
        if guard.lock().await.script_played {
            return;
        }

        let engine = self.clone();
        let call_id = call_id.clone();
        let delay = self.cfg.greeting_end_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            engine.speak_script_once(&call_id).await;
        });
    }

    async fn on_speak_ended(&self, call_id: &CallId) {
        let existing = self.fetch(call_id).await;
        let was_terminal = existing
            .as_ref()
            .map(|r| r.status.is_terminal())
            .unwrap_or(false);
        let Some(record) = self
            .apply_update(call_id, CallUpdate::status(CallStatus::Completed))
            .await
        else {
            return;
        };
        if was_terminal {
            return;
        }

        let delay = hangup_delay(
            record.answered_at,
            Utc::now(),
            self.cfg.min_answered_duration,
            self.cfg.fallback_hangup_delay,
        );
        log::debug!(
            "[callflow] scheduling hangup for call_id={} in {:?}",
            call_id,
            delay
        );
        self.schedule_hangup(call_id.clone(), delay);
    }

    async fn on_gather_ended(&self, call_id: &CallId, digits: &str, status: GatherStatus) {
        if !self.cfg.consent_enabled {
            log::debug!(
                "[callflow] gather-ended for call_id={} ignored (consent flow disabled)",
                call_id
            );
            return;
        }
        let Some(record) = self.fetch(call_id).await else {
            return;
        };
        if record.status.is_terminal() {
            return;
        }

        let guard = self.guards.entry(call_id, &record);
        let mut state = guard.lock().await;
        let digit = digits.trim().chars().next();

        if status == GatherStatus::Valid && digit == Some(self.cfg.consent_accept_digit) {
            log::info!(
                "[callflow] consent accepted for call_id={} ({})",
                call_id,
                mask_phone(&record.phone_number)
            );
            state.consent_given = true;
            self.speak_locked(call_id, &record.script, &mut state).await;
            self.persist_flags(call_id, &state).await;
            return;
        }

        if digit == Some(self.cfg.consent_decline_digit) {
            log::info!("[callflow] consent declined for call_id={}", call_id);
            self.speak_text(call_id, self.messages.decline_goodbye.clone())
                .await;
            self.schedule_hangup(call_id.clone(), self.cfg.fallback_hangup_delay);
            return;
        }

        // Invalid digits or provider-side timeout.
        if state.gather_attempts < self.cfg.max_gather_attempts {
            state.gather_attempts += 1;
            self.persist_flags(call_id, &state).await;
            self.issue_gather(call_id, self.messages.consent_reprompt.clone())
                .await;
        } else {
            self.speak_text(call_id, self.messages.goodbye.clone()).await;
            self.schedule_hangup(call_id.clone(), self.cfg.fallback_hangup_delay);
        }
    }

    async fn on_hangup(&self, call_id: &CallId, cause: HangupCause, duration_sec: Option<u64>) {
        let status = classify_hangup(&cause);
        let update = CallUpdate {
            status: Some(status),
            hangup_cause: Some(cause.clone()),
            duration_sec,
            end_time: Some(Utc::now()),
            ..CallUpdate::default()
        };
        let record = self.apply_update(call_id, update).await;

        if let Some(record) = record {
            if self.cfg.sms_trigger_causes.contains(&cause) {
                self.send_fallback_sms(&record).await;
            }
        }
        self.guards.remove(call_id);
    }

    /// SMS fallback for calls that could not be completed. The outcome is
    /// recorded on the call but never blocks hangup classification.
    async fn send_fallback_sms(&self, record: &CallRecord) {
        if record.sms_sent {
            return;
        }
        if record.phone_number.trim().is_empty() || record.script.trim().is_empty() {
            return;
        }
        if self.sms_from_number.trim().is_empty() {
            log::warn!("[callflow] SMS fallback skipped: no sender number configured");
            return;
        }
        match self
            .telephony
            .send_sms(
                record.phone_number.clone(),
                self.sms_from_number.clone(),
                record.script.clone(),
            )
            .await
        {
            Ok(receipt) => {
                log::info!(
                    "[callflow] fallback SMS sent for call_id={} ({})",
                    record.call_id,
                    mask_phone(&record.phone_number)
                );
                let update = CallUpdate {
                    sms_sent: Some(true),
                    sms_message_id: Some(receipt.message_id),
                    ..CallUpdate::default()
                };
                self.apply_update(&record.call_id, update).await;
            }
            Err(err) => {
                log::warn!(
                    "[callflow] fallback SMS failed for call_id={}: {}",
                    record.call_id,
                    err
                );
                let update = CallUpdate {
                    sms_error: Some(err.to_string()),
                    ..CallUpdate::default()
                };
                self.apply_update(&record.call_id, update).await;
            }
        }
    }

    /// Issues the consent prompt gather once per call, no matter how many
    /// duplicate answer events arrive. The initial gather counts as attempt 1.
    async fn start_consent_gather(&self, record: &CallRecord) {
        let guard = self.guards.entry(&record.call_id, record);
        let mut state = guard.lock().await;
        if state.gather_attempts > 0 {
            return;
        }
        state.gather_attempts = 1;
        self.persist_flags(&record.call_id, &state).await;
        self.issue_gather(&record.call_id, self.messages.consent_prompt.clone())
            .await;
    }

    async fn issue_gather(&self, call_id: &CallId, prompt: String) {
        let options = GatherOptions {
            valid_digits: format!(
                "{}{}",
                self.cfg.consent_accept_digit, self.cfg.consent_decline_digit
            ),
            max_digits: 1,
            timeout: self.cfg.gather_timeout,
        };
        match self
            .telephony
            .gather_with_speak(call_id.clone(), prompt, options)
            .await
        {
            Ok(()) => {}
            Err(err) if err.is_benign() => {
                log::debug!("[callflow] gather on ended call_id={}: {}", call_id, err)
            }
            Err(err) => log::warn!("[callflow] gather failed for call_id={}: {}", call_id, err),
        }
    }

    /// Speaks the script exactly once per call (speak-once guarantee).
    async fn speak_script_once(&self, call_id: &CallId) {
        let Some(record) = self.fetch(call_id).await else {
            return;
        };
        if record.status.is_terminal() {
            return;
        }
        let guard = self.guards.entry(call_id, &record);
        let mut state = guard.lock().await;
        self.speak_locked(call_id, &record.script, &mut state).await;
        self.persist_flags(call_id, &state).await;
    }

    /// Core of the speak-once guard: caller holds the per-call mutex across
    /// the provider action so concurrent qualifying events serialize here.
    async fn speak_locked(&self, call_id: &CallId, script: &str, state: &mut CallGuard) {
        if state.script_played {
            return;
        }
        if script.trim().is_empty() {
            log::debug!("[callflow] no script for call_id={}, nothing to speak", call_id);
            return;
        }
        match self
            .telephony
            .speak(call_id.clone(), script.to_string(), SpeakOptions::default())
            .await
        {
            Ok(()) => {
                state.script_played = true;
                log::info!("[callflow] script spoken for call_id={}", call_id);
            }
            Err(err) if err.is_benign() => {
                log::debug!("[callflow] speak on ended call_id={}: {}", call_id, err)
            }
            Err(err) => log::warn!("[callflow] speak failed for call_id={}: {}", call_id, err),
        }
    }

    async fn speak_text(&self, call_id: &CallId, text: String) {
        match self
            .telephony
            .speak(call_id.clone(), text, SpeakOptions::default())
            .await
        {
            Ok(()) => {}
            Err(err) if err.is_benign() => {
                log::debug!("[callflow] speak on ended call_id={}: {}", call_id, err)
            }
            Err(err) => log::warn!("[callflow] speak failed for call_id={}: {}", call_id, err),
        }
    }

    fn schedule_hangup(&self, call_id: CallId, delay: Duration) {
        let telephony = self.telephony.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match telephony.hangup(call_id.clone()).await {
                Ok(()) => log::debug!("[callflow] hangup issued for call_id={}", call_id),
                Err(err) if err.is_benign() => {
                    log::debug!("[callflow] call_id={} already ended: {}", call_id, err)
                }
                Err(err) => {
                    log::warn!("[callflow] hangup failed for call_id={}: {}", call_id, err)
                }
            }
        });
    }

    async fn persist_flags(&self, call_id: &CallId, state: &CallGuard) {
        let update = CallUpdate {
            script_played: Some(state.script_played),
            gather_attempts: Some(state.gather_attempts),
            consent_given: Some(state.consent_given),
            ..CallUpdate::default()
        };
        self.apply_update(call_id, update).await;
    }

    async fn apply_update(&self, call_id: &CallId, update: CallUpdate) -> Option<CallRecord> {
        match self.store.update_call(call_id.clone(), update).await {
            Ok(record) => Some(record),
            Err(err) => {
                // Storage trouble must not block event processing.
                log::warn!("[callflow] store update failed for call_id={}: {}", call_id, err);
                None
            }
        }
    }

    async fn fetch(&self, call_id: &CallId) -> Option<CallRecord> {
        match self.store.get_call(call_id.clone()).await {
            Ok(record) => record,
            Err(err) => {
                log::warn!("[callflow] store read failed for call_id={}: {}", call_id, err);
                None
            }
        }
    }
}
