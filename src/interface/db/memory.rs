use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::shared::entities::{
    BroadcastId, BroadcastSession, BroadcastStatus, CallId, CallRecord, CallStatus,
};
use crate::shared::ports::call_store::{
    CallStoreError, CallStoreFuture, CallStorePort, CallUpdate,
};

/// In-process store used for development and tests. Same upsert semantics
/// as the durable adapter; history is lost on restart.
#[derive(Clone, Default)]
pub struct MemoryStore {
    calls: Arc<Mutex<HashMap<CallId, CallRecord>>>,
    broadcasts: Arc<Mutex<HashMap<BroadcastId, BroadcastSession>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CallStorePort for MemoryStore {
    fn store_call(&self, record: CallRecord) -> CallStoreFuture<()> {
        let calls = self.calls.clone();
        Box::pin(async move {
            calls.lock().unwrap().insert(record.call_id.clone(), record);
            Ok(())
        })
    }

    fn update_call(&self, call_id: CallId, update: CallUpdate) -> CallStoreFuture<CallRecord> {
        let calls = self.calls.clone();
        Box::pin(async move {
            let mut map = calls.lock().unwrap();
            let record = map
                .entry(call_id.clone())
                .or_insert_with(|| CallRecord::placeholder(call_id));
            update.apply_to(record);
            Ok(record.clone())
        })
    }

    fn get_call(&self, call_id: CallId) -> CallStoreFuture<Option<CallRecord>> {
        let calls = self.calls.clone();
        Box::pin(async move { Ok(calls.lock().unwrap().get(&call_id).cloned()) })
    }

    fn store_broadcast(&self, session: BroadcastSession) -> CallStoreFuture<()> {
        let broadcasts = self.broadcasts.clone();
        Box::pin(async move {
            broadcasts
                .lock()
                .unwrap()
                .insert(session.broadcast_id, session);
            Ok(())
        })
    }

    fn update_broadcast(
        &self,
        broadcast_id: BroadcastId,
        status: BroadcastStatus,
    ) -> CallStoreFuture<()> {
        let broadcasts = self.broadcasts.clone();
        Box::pin(async move {
            match broadcasts.lock().unwrap().get_mut(&broadcast_id) {
                Some(session) => {
                    session.status = status;
                    Ok(())
                }
                None => Err(CallStoreError::NotFound(broadcast_id.to_string())),
            }
        })
    }

    fn get_active_broadcasts(&self) -> CallStoreFuture<Vec<BroadcastSession>> {
        let broadcasts = self.broadcasts.clone();
        Box::pin(async move {
            Ok(broadcasts
                .lock()
                .unwrap()
                .values()
                .filter(|s| s.status == BroadcastStatus::Active)
                .cloned()
                .collect())
        })
    }

    fn get_call_counts(
        &self,
        broadcast_id: Option<BroadcastId>,
    ) -> CallStoreFuture<HashMap<CallStatus, u64>> {
        let calls = self.calls.clone();
        Box::pin(async move {
            let mut counts: HashMap<CallStatus, u64> = HashMap::new();
            for record in calls.lock().unwrap().values() {
                if let Some(wanted) = broadcast_id {
                    if record.broadcast_id != Some(wanted) {
                        continue;
                    }
                }
                *counts.entry(record.status).or_default() += 1;
            }
            Ok(counts)
        })
    }

    fn get_active_calls(&self) -> CallStoreFuture<Vec<CallRecord>> {
        let calls = self.calls.clone();
        Box::pin(async move {
            Ok(calls
                .lock()
                .unwrap()
                .values()
                .filter(|r| matches!(r.status, CallStatus::Pending | CallStatus::Ringing))
                .cloned()
                .collect())
        })
    }

    fn get_broadcast_calls(&self, broadcast_id: BroadcastId) -> CallStoreFuture<Vec<CallRecord>> {
        let calls = self.calls.clone();
        Box::pin(async move {
            Ok(calls
                .lock()
                .unwrap()
                .values()
                .filter(|r| r.broadcast_id == Some(broadcast_id))
                .cloned()
                .collect())
        })
    }

    fn cancel_broadcast_calls(&self, broadcast_id: BroadcastId) -> CallStoreFuture<u64> {
        let calls = self.calls.clone();
        Box::pin(async move {
            let mut updated = 0;
            for record in calls.lock().unwrap().values_mut() {
                if record.broadcast_id != Some(broadcast_id) || record.status.is_terminal() {
                    continue;
                }
                record.status = CallStatus::Canceled;
                record.updated_at = chrono::Utc::now();
                updated += 1;
            }
            Ok(updated)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, broadcast: Option<BroadcastId>, status: CallStatus) -> CallRecord {
        let mut record = CallRecord::new(CallId::new(id).unwrap(), "+81900000000", "hi");
        record.broadcast_id = broadcast;
        record.status = status;
        record
    }

    #[tokio::test]
    async fn update_upserts_a_placeholder_for_unknown_ids() {
        let store = MemoryStore::new();
        let call_id = CallId::new("v3:late").unwrap();

        let merged = store
            .update_call(call_id.clone(), CallUpdate::status(CallStatus::Ringing))
            .await
            .unwrap();
        assert_eq!(merged.status, CallStatus::Ringing);
        assert!(store.get_call(call_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn counts_are_scoped_to_the_broadcast() {
        let store = MemoryStore::new();
        let b1 = BroadcastId::new();
        let b2 = BroadcastId::new();
        store
            .store_call(record("a", Some(b1), CallStatus::Pending))
            .await
            .unwrap();
        store
            .store_call(record("b", Some(b1), CallStatus::Busy))
            .await
            .unwrap();
        store
            .store_call(record("c", Some(b2), CallStatus::Pending))
            .await
            .unwrap();

        let counts = store.get_call_counts(Some(b1)).await.unwrap();
        assert_eq!(counts.get(&CallStatus::Pending), Some(&1));
        assert_eq!(counts.get(&CallStatus::Busy), Some(&1));

        let all = store.get_call_counts(None).await.unwrap();
        assert_eq!(all.get(&CallStatus::Pending), Some(&2));
    }

    #[tokio::test]
    async fn cancel_skips_terminal_records() {
        let store = MemoryStore::new();
        let broadcast = BroadcastId::new();
        store
            .store_call(record("a", Some(broadcast), CallStatus::Pending))
            .await
            .unwrap();
        store
            .store_call(record("b", Some(broadcast), CallStatus::Ringing))
            .await
            .unwrap();
        store
            .store_call(record("c", Some(broadcast), CallStatus::Completed))
            .await
            .unwrap();

        let updated = store.cancel_broadcast_calls(broadcast).await.unwrap();
        assert_eq!(updated, 2);

        let calls = store.get_broadcast_calls(broadcast).await.unwrap();
        let canceled = calls
            .iter()
            .filter(|r| r.status == CallStatus::Canceled)
            .count();
        assert_eq!(canceled, 2);
        assert!(calls.iter().any(|r| r.status == CallStatus::Completed));
    }

    #[tokio::test]
    async fn active_calls_are_pending_or_ringing() {
        let store = MemoryStore::new();
        store
            .store_call(record("a", None, CallStatus::Pending))
            .await
            .unwrap();
        store
            .store_call(record("b", None, CallStatus::Ringing))
            .await
            .unwrap();
        store
            .store_call(record("c", None, CallStatus::Answered))
            .await
            .unwrap();

        let active = store.get_active_calls().await.unwrap();
        assert_eq!(active.len(), 2);
    }
}
