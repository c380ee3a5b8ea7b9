use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// プロバイダの call-control ID に対応（合成IDの場合もある）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CallIdError {
    #[error("CallId is empty")]
    Empty,
}

impl CallId {
    pub fn new(value: impl Into<String>) -> Result<Self, CallIdError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(CallIdError::Empty);
        }
        Ok(Self(value))
    }

    /// Locally generated placeholder id for a call the provider never
    /// confirmed. Unique, stable, and recognizable in the store.
    pub fn synthetic() -> Self {
        Self(format!("synthetic-{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 一括発信（ブロードキャスト）単位の識別子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BroadcastId(uuid::Uuid);

impl BroadcastId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn parse(value: &str) -> Option<Self> {
        uuid::Uuid::parse_str(value.trim()).ok().map(Self)
    }

    pub fn as_uuid(&self) -> uuid::Uuid {
        self.0
    }
}

impl Default for BroadcastId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BroadcastId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_id_rejects_empty() {
        assert_eq!(CallId::new("  "), Err(CallIdError::Empty));
        assert!(CallId::new("v3:abc").is_ok());
    }

    #[test]
    fn synthetic_ids_are_unique_and_flagged() {
        let a = CallId::synthetic();
        let b = CallId::synthetic();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("synthetic-"));
    }
}
