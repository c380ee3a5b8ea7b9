//! End-to-end scenarios over the in-memory store and a recording provider
//! mock: dispatch, webhook-driven progress, and the speak/gather/hangup side
//! effects, without any live network.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use call_broadcast_backend::interface::db::MemoryStore;
use call_broadcast_backend::service::call_flow::messages::FlowMessages;
use call_broadcast_backend::service::call_flow::types::{
    CallEvent, GatherStatus, WebhookEvent,
};
use call_broadcast_backend::service::call_flow::CallFlowEngine;
use call_broadcast_backend::service::dispatch::{BatchDispatcher, DispatchRequest};
use call_broadcast_backend::shared::config::{CallFlowConfig, DispatchConfig};
use call_broadcast_backend::shared::entities::{
    AmdResult, CallId, CallStatus, HangupCause,
};
use call_broadcast_backend::shared::ports::call_store::CallStorePort;
use call_broadcast_backend::shared::ports::telephony::{
    CreateCallRequest, GatherOptions, SmsReceipt, SpeakOptions, TelephonyFuture, TelephonyPort,
};

#[derive(Debug, Clone, PartialEq)]
enum Action {
    Create(String),
    Speak(String, String),
    Gather(String),
    Hangup(String),
    Sms(String, String),
}

#[derive(Default)]
struct RecordingTelephony {
    actions: Arc<Mutex<Vec<Action>>>,
    created: AtomicU32,
}

impl RecordingTelephony {
    fn actions(&self) -> Vec<Action> {
        self.actions.lock().unwrap().clone()
    }

    fn count(&self, matcher: fn(&Action) -> bool) -> usize {
        self.actions().iter().filter(|a| matcher(a)).count()
    }
}

impl TelephonyPort for RecordingTelephony {
    fn create_call(&self, request: CreateCallRequest) -> TelephonyFuture<Vec<CallId>> {
        let seq = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        let actions = self.actions.clone();
        Box::pin(async move {
            actions.lock().unwrap().push(Action::Create(request.to));
            Ok(vec![CallId::new(format!("v3:e2e-{}", seq)).unwrap()])
        })
    }

    fn speak(&self, call_id: CallId, text: String, _options: SpeakOptions) -> TelephonyFuture<()> {
        let actions = self.actions.clone();
        Box::pin(async move {
            actions
                .lock()
                .unwrap()
                .push(Action::Speak(call_id.to_string(), text));
            Ok(())
        })
    }

    fn gather(&self, call_id: CallId, _options: GatherOptions) -> TelephonyFuture<()> {
        let actions = self.actions.clone();
        Box::pin(async move {
            actions.lock().unwrap().push(Action::Gather(call_id.to_string()));
            Ok(())
        })
    }

    fn gather_with_speak(
        &self,
        call_id: CallId,
        _text: String,
        _options: GatherOptions,
    ) -> TelephonyFuture<()> {
        let actions = self.actions.clone();
        Box::pin(async move {
            actions.lock().unwrap().push(Action::Gather(call_id.to_string()));
            Ok(())
        })
    }

    fn transfer(&self, _call_id: CallId, _to: String, _from: String) -> TelephonyFuture<()> {
        Box::pin(async { Ok(()) })
    }

    fn hangup(&self, call_id: CallId) -> TelephonyFuture<()> {
        let actions = self.actions.clone();
        Box::pin(async move {
            actions.lock().unwrap().push(Action::Hangup(call_id.to_string()));
            Ok(())
        })
    }

    fn send_sms(&self, to: String, _from: String, text: String) -> TelephonyFuture<SmsReceipt> {
        let actions = self.actions.clone();
        Box::pin(async move {
            actions.lock().unwrap().push(Action::Sms(to, text));
            Ok(SmsReceipt {
                message_id: "e2e-msg".to_string(),
            })
        })
    }
}

fn call_flow_cfg(consent: bool) -> CallFlowConfig {
    CallFlowConfig {
        operator_number: None,
        min_answered_duration: Duration::from_secs(6),
        greeting_end_delay: Duration::from_millis(100),
        fallback_hangup_delay: Duration::from_secs(2),
        consent_enabled: consent,
        max_gather_attempts: 3,
        gather_timeout: Duration::from_secs(10),
        consent_accept_digit: '1',
        consent_decline_digit: '2',
        sms_trigger_causes: vec![HangupCause::Busy, HangupCause::Timeout],
    }
}

fn dispatch_cfg() -> DispatchConfig {
    DispatchConfig {
        concurrency: 8,
        retry_base_delay: Duration::from_millis(10),
        retry_increment: Duration::from_millis(10),
        retry_max_delay: Duration::from_millis(50),
    }
}

struct Harness {
    telephony: Arc<RecordingTelephony>,
    store: Arc<MemoryStore>,
    dispatcher: BatchDispatcher,
    engine: CallFlowEngine,
}

fn harness(consent: bool) -> Harness {
    let telephony = Arc::new(RecordingTelephony::default());
    let store = Arc::new(MemoryStore::new());
    let dispatcher = BatchDispatcher::new(
        telephony.clone(),
        store.clone(),
        dispatch_cfg(),
        "+815000000001".to_string(),
    );
    let engine = CallFlowEngine::new(
        telephony.clone(),
        store.clone(),
        call_flow_cfg(consent),
        FlowMessages::default(),
        "+815000000001".to_string(),
    );
    Harness {
        telephony,
        store,
        dispatcher,
        engine,
    }
}

fn event(call_id: &CallId, event: CallEvent) -> WebhookEvent {
    WebhookEvent {
        call_id: call_id.clone(),
        from: Some("+815000000001".to_string()),
        to: None,
        event,
    }
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn broadcast_then_answer_then_speak_then_floor_clamped_hangup() {
    let h = harness(false);

    let outcome = h
        .dispatcher
        .dispatch(DispatchRequest {
            phone_numbers: vec![
                "+8190000001".to_string(),
                "+8190000002".to_string(),
                "+8190000003".to_string(),
            ],
            contacts: Vec::new(),
            scripts: vec!["good evening".to_string()],
        })
        .await
        .unwrap();

    // Three pending records sharing one broadcast id.
    assert_eq!(outcome.calls.len(), 3);
    let records = h
        .store
        .get_broadcast_calls(outcome.broadcast_id)
        .await
        .unwrap();
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.status == CallStatus::Pending));
    assert!(records
        .iter()
        .all(|r| r.broadcast_id == Some(outcome.broadcast_id)));

    // A human answers call #1: one speak action, status answered.
    let first = outcome.calls[0].call_id.clone();
    h.engine.handle(event(&first, CallEvent::Answered)).await;
    h.engine
        .handle(event(
            &first,
            CallEvent::MachineDetectionEnded {
                result: AmdResult::Human,
            },
        ))
        .await;
    assert_eq!(h.telephony.count(|a| matches!(a, Action::Speak(_, _))), 1);
    let record = h.store.get_call(first.clone()).await.unwrap().unwrap();
    assert_eq!(record.status, CallStatus::Answered);
    assert!(record.script_played);

    // Speak finishes: record completes, hangup waits out the 6s floor.
    h.engine.handle(event(&first, CallEvent::SpeakEnded)).await;
    let record = h.store.get_call(first.clone()).await.unwrap().unwrap();
    assert_eq!(record.status, CallStatus::Completed);
    settle().await;

    tokio::time::advance(Duration::from_secs(5)).await;
    settle().await;
    assert_eq!(h.telephony.count(|a| matches!(a, Action::Hangup(_))), 0);

    tokio::time::advance(Duration::from_secs(2)).await;
    settle().await;
    assert_eq!(h.telephony.count(|a| matches!(a, Action::Hangup(_))), 1);
}

#[tokio::test(start_paused = true)]
async fn voicemail_with_duplicate_greeting_ended_speaks_once() {
    let h = harness(false);

    let outcome = h
        .dispatcher
        .dispatch(DispatchRequest {
            phone_numbers: vec!["+8190000001".to_string()],
            contacts: Vec::new(),
            scripts: vec!["message after the beep".to_string()],
        })
        .await
        .unwrap();
    let call_id = outcome.calls[0].call_id.clone();

    h.engine
        .handle(event(
            &call_id,
            CallEvent::MachineDetectionEnded {
                result: AmdResult::Machine,
            },
        ))
        .await;
    let record = h.store.get_call(call_id.clone()).await.unwrap().unwrap();
    assert_eq!(record.status, CallStatus::Voicemail);
    // Nothing spoken until the greeting has ended.
    assert_eq!(h.telephony.count(|a| matches!(a, Action::Speak(_, _))), 0);

    // Duplicate delivery of greeting-ended.
    h.engine
        .handle(event(&call_id, CallEvent::MachineGreetingEnded))
        .await;
    h.engine
        .handle(event(&call_id, CallEvent::MachineGreetingEnded))
        .await;
    settle().await;

    tokio::time::advance(Duration::from_millis(200)).await;
    settle().await;
    assert_eq!(h.telephony.count(|a| matches!(a, Action::Speak(_, _))), 1);
}

#[tokio::test(start_paused = true)]
async fn consent_gather_exhaustion_ends_with_one_goodbye_and_one_hangup() {
    let h = harness(true);

    let outcome = h
        .dispatcher
        .dispatch(DispatchRequest {
            phone_numbers: vec!["+8190000001".to_string()],
            contacts: Vec::new(),
            scripts: vec!["please listen".to_string()],
        })
        .await
        .unwrap();
    let call_id = outcome.calls[0].call_id.clone();

    h.engine.handle(event(&call_id, CallEvent::Answered)).await;
    for _ in 0..3 {
        h.engine
            .handle(event(
                &call_id,
                CallEvent::GatherEnded {
                    digits: "9".to_string(),
                    status: GatherStatus::Invalid,
                },
            ))
            .await;
    }
    settle().await;

    // Initial prompt plus two re-prompts; then the goodbye and one hangup,
    // and no further gather is issued.
    assert_eq!(h.telephony.count(|a| matches!(a, Action::Gather(_))), 3);
    assert_eq!(h.telephony.count(|a| matches!(a, Action::Speak(_, _))), 1);
    tokio::time::advance(Duration::from_secs(3)).await;
    settle().await;
    assert_eq!(h.telephony.count(|a| matches!(a, Action::Hangup(_))), 1);
}

#[tokio::test]
async fn busy_destination_gets_the_script_by_sms() {
    let h = harness(false);

    let outcome = h
        .dispatcher
        .dispatch(DispatchRequest {
            phone_numbers: vec!["+8190000001".to_string()],
            contacts: Vec::new(),
            scripts: vec!["call us back".to_string()],
        })
        .await
        .unwrap();
    let call_id = outcome.calls[0].call_id.clone();

    h.engine
        .handle(event(
            &call_id,
            CallEvent::Hangup {
                cause: HangupCause::Busy,
                duration_sec: Some(0),
            },
        ))
        .await;

    let record = h.store.get_call(call_id).await.unwrap().unwrap();
    assert_eq!(record.status, CallStatus::Busy);
    assert!(record.sms_sent);
    assert!(h.telephony.actions().iter().any(|a| matches!(
        a,
        Action::Sms(to, text) if to == "+8190000001" && text == "call us back"
    )));
}

#[tokio::test]
async fn cancel_broadcast_cancels_only_non_terminal_records() {
    let h = harness(false);

    let outcome = h
        .dispatcher
        .dispatch(DispatchRequest {
            phone_numbers: vec![
                "+8190000001".to_string(),
                "+8190000002".to_string(),
            ],
            contacts: Vec::new(),
            scripts: vec!["hello".to_string()],
        })
        .await
        .unwrap();

    // First call completes before the cancel arrives.
    let done = outcome.calls[0].call_id.clone();
    h.engine
        .handle(event(
            &done,
            CallEvent::Hangup {
                cause: HangupCause::NormalClearing,
                duration_sec: Some(9),
            },
        ))
        .await;

    let canceled = h.dispatcher.cancel_broadcast(outcome.broadcast_id).await;
    assert_eq!(canceled, 1);

    let records = h
        .store
        .get_broadcast_calls(outcome.broadcast_id)
        .await
        .unwrap();
    let completed = records
        .iter()
        .find(|r| r.call_id == done)
        .unwrap();
    assert_eq!(completed.status, CallStatus::Completed);
    let other = records.iter().find(|r| r.call_id != done).unwrap();
    assert_eq!(other.status, CallStatus::Canceled);
}
