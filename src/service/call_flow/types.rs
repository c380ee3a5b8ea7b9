use crate::shared::entities::{AmdResult, CallId, HangupCause};

/// webhook 層から call_flow に渡すイベント（プロバイダ固有名は webhook 側で吸収）
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub call_id: CallId,
    pub from: Option<String>,
    pub to: Option<String>,
    pub event: CallEvent,
}

#[derive(Debug, Clone)]
pub enum CallEvent {
    Initiated { direction: Direction },
    Ringing,
    Answered,
    Bridged,
    MachineDetectionEnded { result: AmdResult },
    MachineGreetingEnded,
    SpeakEnded,
    GatherEnded { digits: String, status: GatherStatus },
    Hangup { cause: HangupCause, duration_sec: Option<u64> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "incoming" | "inbound" => Direction::Inbound,
            _ => Direction::Outbound,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatherStatus {
    Valid,
    Invalid,
    Timeout,
}

impl GatherStatus {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "valid" | "completed" => GatherStatus::Valid,
            "timeout" | "timed_out" => GatherStatus::Timeout,
            _ => GatherStatus::Invalid,
        }
    }
}
