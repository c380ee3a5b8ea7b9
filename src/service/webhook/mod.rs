//! webhook モジュール（プロバイダ通知の受け口）
//! provider 固有のイベント封筒をほどき、call_flow のイベントへ写像する。
//! call id 欠落や未知イベントは ACK して捨てる（provider の再送嵐を防ぐ）。

use std::sync::Arc;

use serde::Deserialize;

use crate::service::call_flow::types::{CallEvent, Direction, GatherStatus, WebhookEvent};
use crate::service::call_flow::CallFlowEngine;
use crate::shared::entities::{AmdResult, CallId, HangupCause};

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    data: Option<EventData>,
}

#[derive(Debug, Deserialize)]
struct EventData {
    #[serde(default)]
    event_type: String,
    #[serde(default)]
    payload: EventPayload,
}

#[derive(Debug, Default, Deserialize)]
struct EventPayload {
    #[serde(default, alias = "call_id")]
    call_control_id: Option<String>,
    #[serde(default)]
    direction: Option<String>,
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    to: Option<String>,
    #[serde(default)]
    hangup_cause: Option<String>,
    #[serde(default, alias = "call_duration_sec")]
    duration_sec: Option<u64>,
    #[serde(default, alias = "amd_result")]
    result: Option<String>,
    #[serde(default)]
    digits: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

/// Why a webhook body produced no event. Either way the ingress answers 200.
#[derive(Debug, PartialEq, Eq)]
pub enum Rejection {
    Unparseable,
    MissingCallId,
    UnknownEventType(String),
}

/// Maps a raw webhook body onto a typed event, tolerating the field-name
/// drift the provider exhibits across event families.
pub fn parse_event(body: &str) -> Result<WebhookEvent, Rejection> {
    let envelope: Envelope = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        Err(_) => return Err(Rejection::Unparseable),
    };
    let Some(data) = envelope.data else {
        return Err(Rejection::Unparseable);
    };

    let payload = data.payload;
    let call_id = payload
        .call_control_id
        .as_deref()
        .and_then(|raw| CallId::new(raw).ok())
        .ok_or(Rejection::MissingCallId)?;

    let event = match data.event_type.as_str() {
        "call.initiated" => CallEvent::Initiated {
            direction: Direction::parse(payload.direction.as_deref().unwrap_or("outgoing")),
        },
        "call.ringing" => CallEvent::Ringing,
        "call.answered" => CallEvent::Answered,
        "call.bridged" => CallEvent::Bridged,
        "call.machine.detection.ended" | "call.machine.premium.detection.ended" => {
            let raw = payload.result.as_deref().unwrap_or_default();
            match AmdResult::parse(raw) {
                Some(result) => CallEvent::MachineDetectionEnded { result },
                None => return Err(Rejection::UnknownEventType(format!("amd result {raw:?}"))),
            }
        }
        "call.machine.greeting.ended" | "call.machine.premium.greeting.ended" => {
            CallEvent::MachineGreetingEnded
        }
        "call.speak.ended" => CallEvent::SpeakEnded,
        "call.gather.ended" => CallEvent::GatherEnded {
            digits: payload.digits.unwrap_or_default(),
            status: GatherStatus::parse(payload.status.as_deref().unwrap_or_default()),
        },
        "call.hangup" => CallEvent::Hangup {
            cause: HangupCause::parse(payload.hangup_cause.as_deref().unwrap_or_default()),
            duration_sec: payload.duration_sec,
        },
        other => return Err(Rejection::UnknownEventType(other.to_string())),
    };

    Ok(WebhookEvent {
        call_id,
        from: payload.from,
        to: payload.to,
        event,
    })
}

/// Event ingress: parse, route, absorb. Processing failures never reach the
/// provider; the HTTP layer always acknowledges.
pub struct WebhookRouter {
    engine: Arc<CallFlowEngine>,
}

impl WebhookRouter {
    pub fn new(engine: Arc<CallFlowEngine>) -> Self {
        Self { engine }
    }

    pub async fn handle_body(&self, body: &str) {
        match parse_event(body) {
            Ok(event) => self.engine.handle(event).await,
            Err(Rejection::MissingCallId) => {
                log::warn!("[webhook] event without call id, acknowledged and dropped");
            }
            Err(Rejection::Unparseable) => {
                log::warn!("[webhook] unparseable event body ({} bytes)", body.len());
            }
            Err(Rejection::UnknownEventType(kind)) => {
                log::debug!("[webhook] ignoring event type {}", kind);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(event_type: &str, payload: serde_json::Value) -> String {
        json!({"data": {"event_type": event_type, "payload": payload}}).to_string()
    }

    #[test]
    fn parses_an_answered_event() {
        let body = body(
            "call.answered",
            json!({"call_control_id": "v3:abc", "from": "+8150", "to": "+8190"}),
        );
        let event = parse_event(&body).unwrap();
        assert_eq!(event.call_id.as_str(), "v3:abc");
        assert!(matches!(event.event, CallEvent::Answered));
    }

    #[test]
    fn parses_hangup_with_cause_and_duration() {
        let body = body(
            "call.hangup",
            json!({"call_control_id": "v3:abc", "hangup_cause": "USER_BUSY", "call_duration_sec": 12}),
        );
        let event = parse_event(&body).unwrap();
        match event.event {
            CallEvent::Hangup { cause, duration_sec } => {
                assert_eq!(cause, HangupCause::Busy);
                assert_eq!(duration_sec, Some(12));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn parses_amd_and_gather_payload_fields() {
        let amd = body(
            "call.machine.detection.ended",
            json!({"call_control_id": "v3:abc", "result": "machine"}),
        );
        assert!(matches!(
            parse_event(&amd).unwrap().event,
            CallEvent::MachineDetectionEnded {
                result: AmdResult::Machine
            }
        ));

        let gather = body(
            "call.gather.ended",
            json!({"call_control_id": "v3:abc", "digits": "1", "status": "valid"}),
        );
        match parse_event(&gather).unwrap().event {
            CallEvent::GatherEnded { digits, status } => {
                assert_eq!(digits, "1");
                assert_eq!(status, GatherStatus::Valid);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn accepts_the_call_id_field_alias() {
        let body = body("call.ringing", json!({"call_id": "v3:alias"}));
        assert_eq!(parse_event(&body).unwrap().call_id.as_str(), "v3:alias");
    }

    #[test]
    fn inbound_direction_is_detected() {
        let body = body(
            "call.initiated",
            json!({"call_control_id": "v3:in", "direction": "incoming"}),
        );
        assert!(matches!(
            parse_event(&body).unwrap().event,
            CallEvent::Initiated {
                direction: Direction::Inbound
            }
        ));
    }

    #[test]
    fn missing_call_id_is_dropped() {
        let body = body("call.answered", json!({"from": "+8150"}));
        assert!(matches!(parse_event(&body), Err(Rejection::MissingCallId)));
    }

    #[test]
    fn garbage_and_unknown_types_are_rejected_not_panicked() {
        assert!(matches!(parse_event("not json"), Err(Rejection::Unparseable)));
        let body = body("call.playback.started", json!({"call_control_id": "v3:x"}));
        assert!(matches!(
            parse_event(&body),
            Err(Rejection::UnknownEventType(_))
        ));
    }
}
