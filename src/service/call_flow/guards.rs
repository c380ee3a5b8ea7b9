use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as AsyncMutex;

use crate::shared::entities::{CallId, CallRecord};

/// Transient per-call flags that branch webhook handling. The async mutex is
/// held across the provider action so two near-simultaneous events cannot
/// both observe `script_played == false`.
#[derive(Debug, Default)]
pub struct CallGuard {
    pub script_played: bool,
    pub gather_attempts: u32,
    pub consent_given: bool,
}

impl CallGuard {
    fn from_record(record: &CallRecord) -> Self {
        Self {
            script_played: record.script_played,
            gather_attempts: record.gather_attempts,
            consent_given: record.consent_given,
        }
    }
}

/// Keyed, concurrency-safe flag table. Events for different call ids never
/// block each other; events for the same id serialize on the per-key mutex.
#[derive(Clone, Default)]
pub struct CallGuardRegistry {
    inner: Arc<Mutex<HashMap<CallId, Arc<AsyncMutex<CallGuard>>>>>,
}

impl CallGuardRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the guard for the call, seeding a new entry from the persisted
    /// record on first access.
    pub fn entry(&self, call_id: &CallId, record: &CallRecord) -> Arc<AsyncMutex<CallGuard>> {
        let mut map = self.inner.lock().unwrap();
        map.entry(call_id.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(CallGuard::from_record(record))))
            .clone()
    }

    /// Drops the transient entry once the call has ended. The durable record
    /// keeps the history.
    pub fn remove(&self, call_id: &CallId) {
        self.inner.lock().unwrap().remove(call_id);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}
