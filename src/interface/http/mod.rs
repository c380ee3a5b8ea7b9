//! Provider イベントの受け口と操作 API を兼ねるシンプルな HTTP サーバ。
//! POST /webhook はイベント処理の成否に関わらず必ず 200 を返す。

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::service::dispatch::{BatchDispatcher, DispatchError, DispatchRequest};
use crate::service::webhook::WebhookRouter;
use crate::shared::entities::{BroadcastId, CallId};
use crate::shared::ports::call_store::CallStorePort;

const MAX_REQUEST_BYTES: usize = 256 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<BatchDispatcher>,
    pub router: Arc<WebhookRouter>,
    pub store: Arc<dyn CallStorePort>,
}

pub async fn spawn_api_server(bind: &str, state: AppState) {
    let bind = bind.to_string();
    tokio::spawn(async move {
        if let Err(e) = run(&bind, state).await {
            log::error!("[http] api server error: {:?}", e);
        }
    });
}

async fn run(bind: &str, state: AppState) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    log::info!("[http] serving api on {}", bind);

    loop {
        let (mut socket, _) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            let _ = handle_conn(&mut socket, state).await;
        });
    }
}

async fn handle_conn(
    socket: &mut tokio::net::TcpStream,
    state: AppState,
) -> std::io::Result<()> {
    let mut buf = vec![0u8; 4096];
    let mut read_len = 0usize;
    let header_end;
    loop {
        let n = socket.read(&mut buf[read_len..]).await?;
        if n == 0 {
            return Ok(());
        }
        read_len += n;
        if let Some(pos) = buf[..read_len].windows(4).position(|w| w == b"\r\n\r\n") {
            header_end = pos + 4;
            break;
        }
        if read_len == buf.len() {
            buf.resize(buf.len() + 4096, 0);
        }
        if read_len > MAX_REQUEST_BYTES {
            return write_response(socket, 413, "Payload Too Large", &json!({})).await;
        }
    }

    let header_text = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = header_text.lines();
    let first_line = match lines.next() {
        Some(l) => l.to_string(),
        None => return Ok(()),
    };
    let mut parts = first_line.split_whitespace();
    let method = parts.next().unwrap_or("").to_string();
    let path = parts.next().unwrap_or("").to_string();

    let mut headers = HashMap::new();
    for line in lines {
        if line.trim().is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let content_length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    if content_length > MAX_REQUEST_BYTES {
        return write_response(socket, 413, "Payload Too Large", &json!({})).await;
    }

    let mut body = buf[header_end..read_len].to_vec();
    while body.len() < content_length {
        let mut chunk = vec![0u8; content_length - body.len()];
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&body).to_string();

    let (code, value) = route_request(&method, &path, &body, &state).await;
    let reason = match code {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "OK",
    };
    write_response(socket, code, reason, &value).await
}

/// Route table, separated from the socket plumbing so it is testable.
pub async fn route_request(
    method: &str,
    path: &str,
    body: &str,
    state: &AppState,
) -> (u16, Value) {
    let (path, query) = match path.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path, None),
    };

    match (method, path) {
        ("POST", "/webhook") => {
            // Processing happens off the request path; the provider only
            // needs the acknowledgment.
            let router = state.router.clone();
            let body = body.to_string();
            tokio::spawn(async move {
                router.handle_body(&body).await;
            });
            (200, json!({"received": true}))
        }
        ("POST", "/api/make-call") => {
            let request: DispatchRequest = match serde_json::from_str(body) {
                Ok(request) => request,
                Err(err) => {
                    log::warn!("[http] invalid make-call body: {}", err);
                    return (400, json!({"error": "invalid request body"}));
                }
            };
            match state.dispatcher.dispatch(request).await {
                Ok(outcome) => {
                    let call_ids: Vec<&str> =
                        outcome.calls.iter().map(|c| c.call_id.as_str()).collect();
                    let calls: Vec<Value> = outcome
                        .calls
                        .iter()
                        .map(|c| {
                            json!({
                                "callId": c.call_id.as_str(),
                                "phoneNumber": c.phone_number,
                                "synthetic": c.synthetic,
                            })
                        })
                        .collect();
                    (
                        200,
                        json!({
                            "broadcastId": outcome.broadcast_id.to_string(),
                            "callIds": call_ids,
                            "calls": calls,
                            "capacityHits": outcome.capacity_hits,
                        }),
                    )
                }
                Err(DispatchError::NoDestinations) => {
                    (400, json!({"error": "no valid phone numbers"}))
                }
            }
        }
        ("POST", _) if path.starts_with("/api/call-status/") => {
            let raw_id = path.trim_start_matches("/api/call-status/");
            let Ok(call_id) = CallId::new(raw_id) else {
                return (400, json!({"error": "missing call id"}));
            };
            match state.store.get_call(call_id).await {
                Ok(Some(record)) => match serde_json::to_value(&record) {
                    Ok(value) => (200, json!({"call": value})),
                    Err(err) => {
                        log::warn!("[http] failed to encode record: {}", err);
                        (500, json!({"error": "encoding failed"}))
                    }
                },
                Ok(None) => (404, json!({"error": "call not found"})),
                Err(err) => {
                    log::warn!("[http] call-status read failed: {}", err);
                    (500, json!({"error": "storage unavailable"}))
                }
            }
        }
        ("GET", "/api/call-counts") => {
            let broadcast_id = query.and_then(query_broadcast_id);
            match state.store.get_call_counts(broadcast_id).await {
                Ok(counts) => {
                    let mut object = serde_json::Map::new();
                    for (status, count) in counts {
                        object.insert(status.as_str().to_string(), json!(count));
                    }
                    (200, json!({"counts": Value::Object(object)}))
                }
                Err(err) => {
                    log::warn!("[http] call-counts read failed: {}", err);
                    (500, json!({"error": "storage unavailable"}))
                }
            }
        }
        ("POST", "/api/cancel-all-calls") => {
            let broadcast_id = serde_json::from_str::<Value>(body)
                .ok()
                .and_then(|v| {
                    v["broadcastId"]
                        .as_str()
                        .or_else(|| v["broadcast_id"].as_str())
                        .map(str::to_string)
                })
                .and_then(|raw| BroadcastId::parse(&raw));
            match broadcast_id {
                Some(broadcast_id) => {
                    let canceled = state.dispatcher.cancel_broadcast(broadcast_id).await;
                    (
                        200,
                        json!({
                            "broadcastId": broadcast_id.to_string(),
                            "canceled": canceled,
                        }),
                    )
                }
                None => {
                    let (broadcasts, canceled) = state.dispatcher.cancel_all().await;
                    (200, json!({"broadcasts": broadcasts, "canceled": canceled}))
                }
            }
        }
        ("GET", "/api/channel-status") => {
            let active_calls = match state.store.get_active_calls().await {
                Ok(calls) => calls.len(),
                Err(err) => {
                    log::warn!("[http] channel-status read failed: {}", err);
                    0
                }
            };
            (
                200,
                json!({
                    "activeCalls": active_calls,
                    "concurrencyWindow": state.dispatcher.concurrency(),
                    "capacityHits": state.dispatcher.capacity_hits_total(),
                }),
            )
        }
        _ => (404, json!({"error": "not found"})),
    }
}

fn query_broadcast_id(query: &str) -> Option<BroadcastId> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "broadcastId" || *key == "broadcast_id")
        .and_then(|(_, value)| BroadcastId::parse(value))
}

async fn write_response(
    socket: &mut tokio::net::TcpStream,
    code: u16,
    reason: &str,
    body: &Value,
) -> std::io::Result<()> {
    let payload = body.to_string();
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        code,
        reason,
        payload.len()
    );
    socket.write_all(head.as_bytes()).await?;
    socket.write_all(payload.as_bytes()).await?;
    socket.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::interface::db::memory::MemoryStore;
    use crate::interface::telephony::NoopTelephony;
    use crate::service::call_flow::messages::FlowMessages;
    use crate::service::call_flow::CallFlowEngine;
    use crate::shared::config::{CallFlowConfig, DispatchConfig};
    use crate::shared::entities::{CallRecord, CallStatus};
    use std::time::Duration;

    fn test_state() -> (AppState, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let telephony = Arc::new(NoopTelephony::new());
        let dispatcher = Arc::new(BatchDispatcher::new(
            telephony.clone(),
            store.clone(),
            DispatchConfig {
                concurrency: 4,
                retry_base_delay: Duration::from_millis(1),
                retry_increment: Duration::from_millis(1),
                retry_max_delay: Duration::from_millis(5),
            },
            "+815000000001".to_string(),
        ));
        let engine = Arc::new(CallFlowEngine::new(
            telephony,
            store.clone(),
            CallFlowConfig::from_env(),
            FlowMessages::default(),
            "+815000000001".to_string(),
        ));
        let router = Arc::new(WebhookRouter::new(engine));
        (
            AppState {
                dispatcher,
                router,
                store: store.clone(),
            },
            store,
        )
    }

    #[tokio::test]
    async fn webhook_always_acknowledges() {
        let (state, _) = test_state();
        let (code, value) = route_request("POST", "/webhook", "definitely not json", &state).await;
        assert_eq!(code, 200);
        assert_eq!(value["received"], true);
    }

    #[tokio::test]
    async fn make_call_returns_one_id_per_number() {
        let (state, store) = test_state();
        let body = serde_json::json!({
            "phoneNumbers": ["+8190000001", "+8190000002"],
            "scripts": ["hello"],
        })
        .to_string();

        let (code, value) = route_request("POST", "/api/make-call", &body, &state).await;
        assert_eq!(code, 200);
        assert_eq!(value["callIds"].as_array().unwrap().len(), 2);
        assert_eq!(value["capacityHits"], 0);

        let counts = store.get_call_counts(None).await.unwrap();
        assert_eq!(counts.get(&CallStatus::Pending), Some(&2));
    }

    #[tokio::test]
    async fn make_call_rejects_an_empty_batch() {
        let (state, _) = test_state();
        let body = serde_json::json!({"phoneNumbers": ["  "]}).to_string();
        let (code, _) = route_request("POST", "/api/make-call", &body, &state).await;
        assert_eq!(code, 400);
    }

    #[tokio::test]
    async fn call_status_finds_and_misses() {
        let (state, store) = test_state();
        let record = CallRecord::new(CallId::new("v3:known").unwrap(), "+81901", "hi");
        store.store_call(record).await.unwrap();

        let (code, value) =
            route_request("POST", "/api/call-status/v3:known", "", &state).await;
        assert_eq!(code, 200);
        assert_eq!(value["call"]["callId"], "v3:known");

        let (code, _) = route_request("POST", "/api/call-status/v3:missing", "", &state).await;
        assert_eq!(code, 404);
    }

    #[tokio::test]
    async fn channel_status_reports_the_window() {
        let (state, _) = test_state();
        let (code, value) = route_request("GET", "/api/channel-status", "", &state).await;
        assert_eq!(code, 200);
        assert_eq!(value["concurrencyWindow"], 4);
        assert_eq!(value["activeCalls"], 0);
    }

    #[tokio::test]
    async fn unknown_routes_are_404() {
        let (state, _) = test_state();
        let (code, _) = route_request("GET", "/api/unknown", "", &state).await;
        assert_eq!(code, 404);
    }
}
