use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::entities::identifiers::BroadcastId;

/// 一括発信リクエスト1回ぶんのセッション
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastSession {
    pub broadcast_id: BroadcastId,
    pub total_calls: u32,
    pub status: BroadcastStatus,
    pub start_time: DateTime<Utc>,
}

impl BroadcastSession {
    pub fn new(broadcast_id: BroadcastId, total_calls: u32) -> Self {
        Self {
            broadcast_id,
            total_calls,
            status: BroadcastStatus::Active,
            start_time: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BroadcastStatus {
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "canceled")]
    Canceled,
    #[serde(rename = "completed")]
    Completed,
}

impl BroadcastStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BroadcastStatus::Active => "active",
            BroadcastStatus::Canceled => "canceled",
            BroadcastStatus::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(BroadcastStatus::Active),
            "canceled" => Some(BroadcastStatus::Canceled),
            "completed" => Some(BroadcastStatus::Completed),
            _ => None,
        }
    }
}
