use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

use crate::shared::config::ProviderConfig;
use crate::shared::entities::CallId;
use crate::shared::ports::telephony::{
    CreateCallRequest, GatherOptions, SmsReceipt, SpeakOptions, TelephonyError, TelephonyFuture,
    TelephonyPort,
};

const CHANNEL_LIMIT_ERROR_CODE: &str = "call_channel_limit_exceeded";

/// Call-control / messaging adapter for the Telnyx v2 REST API.
pub struct TelnyxAdapter {
    client: Client,
    base_url: String,
    api_key: String,
    connection_id: Option<String>,
}

impl TelnyxAdapter {
    pub fn new(cfg: &ProviderConfig) -> Result<Self, TelephonyError> {
        let api_key = cfg
            .api_key
            .clone()
            .ok_or_else(|| TelephonyError::Provider("missing API key".to_string()))?;
        let client = Client::builder()
            .timeout(cfg.http_timeout)
            .build()
            .map_err(|e| TelephonyError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            connection_id: cfg.connection_id.clone(),
        })
    }

    fn post(&self, path: String, body: Value) -> TelephonyFuture<Value> {
        let client = self.client.clone();
        let url = format!("{}{}", self.base_url, path);
        let token = self.api_key.clone();
        Box::pin(async move {
            let resp = client
                .post(url)
                .bearer_auth(token)
                .json(&body)
                .send()
                .await
                .map_err(|e| TelephonyError::Transport(e.to_string()))?;

            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            if !status.is_success() {
                return Err(classify_provider_error(status, &text));
            }
            if text.is_empty() {
                return Ok(Value::Null);
            }
            serde_json::from_str(&text).map_err(|e| TelephonyError::Provider(e.to_string()))
        })
    }

    fn call_action(&self, call_id: &CallId, action: &str, body: Value) -> TelephonyFuture<()> {
        let fut = self.post(
            format!("/calls/{}/actions/{}", call_id, action),
            body,
        );
        Box::pin(async move {
            fut.await?;
            Ok(())
        })
    }
}

impl TelephonyPort for TelnyxAdapter {
    fn create_call(&self, request: CreateCallRequest) -> TelephonyFuture<Vec<CallId>> {
        let mut body = json!({
            "to": request.to,
            "from": request.from,
        });
        if let Some(connection_id) = &self.connection_id {
            body["connection_id"] = json!(connection_id);
        }
        if request.machine_detection {
            body["answering_machine_detection"] = json!("detect_words");
        }
        let fut = self.post("/calls".to_string(), body);
        Box::pin(async move {
            let value = fut.await?;
            Ok(extract_call_ids(&value))
        })
    }

    fn speak(&self, call_id: CallId, text: String, options: SpeakOptions) -> TelephonyFuture<()> {
        self.call_action(
            &call_id,
            "speak",
            json!({
                "payload": text,
                "voice": options.voice,
                "language": options.language,
            }),
        )
    }

    fn gather(&self, call_id: CallId, options: GatherOptions) -> TelephonyFuture<()> {
        self.call_action(
            &call_id,
            "gather",
            json!({
                "valid_digits": options.valid_digits,
                "maximum_digits": options.max_digits,
                "timeout_millis": options.timeout.as_millis() as u64,
            }),
        )
    }

    fn gather_with_speak(
        &self,
        call_id: CallId,
        text: String,
        options: GatherOptions,
    ) -> TelephonyFuture<()> {
        self.call_action(
            &call_id,
            "gather_using_speak",
            json!({
                "payload": text,
                "voice": SpeakOptions::default().voice,
                "language": SpeakOptions::default().language,
                "valid_digits": options.valid_digits,
                "maximum_digits": options.max_digits,
                "timeout_millis": options.timeout.as_millis() as u64,
            }),
        )
    }

    fn transfer(&self, call_id: CallId, to: String, from: String) -> TelephonyFuture<()> {
        let mut body = json!({ "to": to });
        if !from.trim().is_empty() {
            body["from"] = json!(from);
        }
        self.call_action(&call_id, "transfer", body)
    }

    fn hangup(&self, call_id: CallId) -> TelephonyFuture<()> {
        self.call_action(&call_id, "hangup", json!({}))
    }

    fn send_sms(&self, to: String, from: String, text: String) -> TelephonyFuture<SmsReceipt> {
        let fut = self.post(
            "/messages".to_string(),
            json!({
                "to": to,
                "from": from,
                "text": text,
            }),
        );
        Box::pin(async move {
            let value = fut.await?;
            let message_id = value["data"]["id"].as_str().unwrap_or_default().to_string();
            Ok(SmsReceipt { message_id })
        })
    }
}

/// The provider can answer a single create request with one leg object or a
/// list of legs; both shapes are collected here and the caller aligns the
/// result to its own request.
fn extract_call_ids(value: &Value) -> Vec<CallId> {
    let data = &value["data"];
    let mut ids = Vec::new();
    match data {
        Value::Array(entries) => {
            for entry in entries {
                if let Some(id) = leg_id(entry) {
                    ids.push(id);
                }
            }
        }
        Value::Object(_) => {
            if let Some(id) = leg_id(data) {
                ids.push(id);
            }
        }
        _ => {}
    }
    ids
}

fn leg_id(entry: &Value) -> Option<CallId> {
    let raw = entry["call_control_id"]
        .as_str()
        .or_else(|| entry["call_leg_id"].as_str())?;
    CallId::new(raw).ok()
}

fn classify_provider_error(status: StatusCode, body: &str) -> TelephonyError {
    if status == StatusCode::NOT_FOUND {
        return TelephonyError::NotFound;
    }
    if status == StatusCode::UNPROCESSABLE_ENTITY {
        return TelephonyError::AlreadyTerminated;
    }
    if is_channel_limit_body(body) {
        return TelephonyError::ChannelLimit;
    }
    TelephonyError::Provider(format!("{}: {}", status, body))
}

fn is_channel_limit_body(body: &str) -> bool {
    if body.to_ascii_lowercase().contains("channel limit") {
        return true;
    }
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return false;
    };
    value["errors"]
        .as_array()
        .into_iter()
        .flatten()
        .any(|err| err["code"].as_str() == Some(CHANNEL_LIMIT_ERROR_CODE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_one_id_from_an_object_response() {
        let value = json!({"data": {"call_control_id": "v3:abc", "call_leg_id": "leg-1"}});
        let ids = extract_call_ids(&value);
        assert_eq!(ids.len(), 1);
        assert_eq!(ids[0].as_str(), "v3:abc");
    }

    #[test]
    fn extracts_every_leg_from_an_array_response() {
        let value = json!({"data": [
            {"call_control_id": "v3:a"},
            {"call_leg_id": "v3:b"},
            {"unrelated": true},
        ]});
        let ids = extract_call_ids(&value);
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn channel_limit_is_detected_by_code_and_by_message() {
        let body = json!({"errors": [{"code": CHANNEL_LIMIT_ERROR_CODE}]}).to_string();
        assert!(matches!(
            classify_provider_error(StatusCode::FORBIDDEN, &body),
            TelephonyError::ChannelLimit
        ));
        assert!(matches!(
            classify_provider_error(StatusCode::FORBIDDEN, "Channel limit exceeded for account"),
            TelephonyError::ChannelLimit
        ));
    }

    #[test]
    fn terminal_races_map_to_benign_errors() {
        assert!(classify_provider_error(StatusCode::NOT_FOUND, "").is_benign());
        assert!(classify_provider_error(StatusCode::UNPROCESSABLE_ENTITY, "").is_benign());
        assert!(!classify_provider_error(StatusCode::INTERNAL_SERVER_ERROR, "boom").is_benign());
    }
}
