//! dispatch モジュール（一括発信オーケストレーション層）
//! 宛先リストを受け取り、同時発信数を抑えつつ provider へ発信を作成する。
//! チャネル上限エラーは 1 回だけ再試行し、それでも失敗した宛先には合成
//! レコードを残す（バッチ API は宛先を黙って落とさない）。

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::task::JoinSet;

use crate::shared::config::DispatchConfig;
use crate::shared::entities::{
    BroadcastId, BroadcastSession, BroadcastStatus, CallId, CallRecord,
};
use crate::shared::ports::call_store::CallStorePort;
use crate::shared::ports::telephony::{CreateCallRequest, TelephonyError, TelephonyPort};
use crate::shared::utils::mask_phone;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Contact {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    #[serde(alias = "phone_numbers")]
    pub phone_numbers: Vec<String>,
    #[serde(default)]
    pub contacts: Vec<Contact>,
    #[serde(default)]
    pub scripts: Vec<String>,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no valid phone numbers in request")]
    NoDestinations,
}

#[derive(Clone, Debug)]
pub struct DispatchedCall {
    pub call_id: CallId,
    pub phone_number: String,
    pub synthetic: bool,
}

#[derive(Clone, Debug)]
pub struct DispatchOutcome {
    pub broadcast_id: BroadcastId,
    pub calls: Vec<DispatchedCall>,
    pub capacity_hits: u32,
}

#[derive(Clone)]
struct DialTarget {
    index: usize,
    phone_number: String,
    contact_id: Option<String>,
    contact_name: Option<String>,
    script: String,
}

pub struct BatchDispatcher {
    telephony: Arc<dyn TelephonyPort>,
    store: Arc<dyn CallStorePort>,
    cfg: DispatchConfig,
    from_number: String,
    capacity_hits_total: AtomicU64,
}

impl BatchDispatcher {
    pub fn new(
        telephony: Arc<dyn TelephonyPort>,
        store: Arc<dyn CallStorePort>,
        cfg: DispatchConfig,
        from_number: String,
    ) -> Self {
        Self {
            telephony,
            store,
            cfg,
            from_number,
            capacity_hits_total: AtomicU64::new(0),
        }
    }

    /// Cumulative channel-limit hits since process start (channel-status API).
    pub fn capacity_hits_total(&self) -> u64 {
        self.capacity_hits_total.load(Ordering::Relaxed)
    }

    pub fn concurrency(&self) -> usize {
        self.cfg.concurrency
    }

    /// Places one outbound call per valid destination. The returned list is
    /// index-aligned with the filtered input: one entry per destination,
    /// real or synthetic, never more, never fewer.
    pub async fn dispatch(
        &self,
        request: DispatchRequest,
    ) -> Result<DispatchOutcome, DispatchError> {
        let targets = build_targets(&request);
        if targets.is_empty() {
            return Err(DispatchError::NoDestinations);
        }

        let broadcast_id = BroadcastId::new();
        let session = BroadcastSession::new(broadcast_id, targets.len() as u32);
        if let Err(err) = self.store.store_broadcast(session).await {
            // Record-keeping trouble must not fail the whole batch.
            log::warn!(
                "[dispatch] failed to persist broadcast {}: {}",
                broadcast_id,
                err
            );
        }
        log::info!(
            "[dispatch] broadcast {} starting with {} destinations",
            broadcast_id,
            targets.len()
        );

        let batch_hits = Arc::new(AtomicU32::new(0));
        let mut placed: Vec<(usize, CallId, bool)> = Vec::with_capacity(targets.len());

        // Fixed-size windows instead of unbounded fan-out: the provider caps
        // simultaneous channels per account.
        for window in targets.chunks(self.cfg.concurrency) {
            let mut join_set = JoinSet::new();
            for target in window {
                let telephony = self.telephony.clone();
                let cfg = self.cfg.clone();
                let hits = batch_hits.clone();
                let request = CreateCallRequest {
                    to: target.phone_number.clone(),
                    from: self.from_number.clone(),
                    machine_detection: true,
                };
                let index = target.index;
                let phone = target.phone_number.clone();
                join_set.spawn(async move {
                    match place_call(telephony.as_ref(), request, &cfg, &hits).await {
                        Ok(call_id) => (index, call_id, false),
                        Err(err) => {
                            log::warn!(
                                "[dispatch] call creation failed for {} ({}), storing synthetic record",
                                mask_phone(&phone),
                                err
                            );
                            (index, CallId::synthetic(), true)
                        }
                    }
                });
            }
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok(result) => placed.push(result),
                    Err(err) => {
                        // A panicked task still owes the batch one record;
                        // the target is matched up by index below.
                        log::error!("[dispatch] call task failed: {}", err);
                    }
                }
            }
        }

        // Defensive alignment: exactly one record per requested destination.
        let mut calls = Vec::with_capacity(targets.len());
        for target in &targets {
            let entry = placed.iter().find(|(index, _, _)| *index == target.index);
            let (call_id, synthetic) = match entry {
                Some((_, call_id, synthetic)) => (call_id.clone(), *synthetic),
                None => (CallId::synthetic(), true),
            };

            let mut record = CallRecord::new(
                call_id.clone(),
                target.phone_number.clone(),
                target.script.clone(),
            );
            record.broadcast_id = Some(broadcast_id);
            record.contact_id = target.contact_id.clone();
            record.contact_name = target.contact_name.clone();
            record.is_synthetic = synthetic;
            if let Err(err) = self.store.store_call(record).await {
                log::warn!(
                    "[dispatch] failed to persist record for call_id={}: {}",
                    call_id,
                    err
                );
            }

            calls.push(DispatchedCall {
                call_id,
                phone_number: target.phone_number.clone(),
                synthetic,
            });
        }

        let capacity_hits = batch_hits.load(Ordering::SeqCst);
        self.capacity_hits_total
            .fetch_add(capacity_hits as u64, Ordering::Relaxed);
        if capacity_hits > 0 {
            log::warn!(
                "[dispatch] broadcast {} hit the channel limit {} time(s)",
                broadcast_id,
                capacity_hits
            );
        }

        Ok(DispatchOutcome {
            broadcast_id,
            calls,
            capacity_hits,
        })
    }

    /// Marks every non-terminal record of the broadcast canceled and issues
    /// best-effort hangups. Hangup failures never block the cancellation.
    pub async fn cancel_broadcast(&self, broadcast_id: BroadcastId) -> u64 {
        let records = match self.store.get_broadcast_calls(broadcast_id).await {
            Ok(records) => records,
            Err(err) => {
                log::warn!(
                    "[dispatch] failed to list calls for broadcast {}: {}",
                    broadcast_id,
                    err
                );
                Vec::new()
            }
        };
        let active: Vec<CallId> = records
            .iter()
            .filter(|r| !r.status.is_terminal() && !r.is_synthetic)
            .map(|r| r.call_id.clone())
            .collect();

        let updated = match self.store.cancel_broadcast_calls(broadcast_id).await {
            Ok(updated) => updated,
            Err(err) => {
                log::warn!("[dispatch] cancel failed for broadcast {}: {}", broadcast_id, err);
                0
            }
        };

        for call_id in active {
            match self.telephony.hangup(call_id.clone()).await {
                Ok(()) => {}
                Err(err) if err.is_benign() => {
                    log::debug!("[dispatch] call_id={} already ended: {}", call_id, err)
                }
                Err(err) => {
                    log::warn!("[dispatch] hangup failed for call_id={}: {}", call_id, err)
                }
            }
        }

        if let Err(err) = self
            .store
            .update_broadcast(broadcast_id, BroadcastStatus::Canceled)
            .await
        {
            log::warn!(
                "[dispatch] failed to mark broadcast {} canceled: {}",
                broadcast_id,
                err
            );
        }
        log::info!(
            "[dispatch] broadcast {} canceled, {} record(s) updated",
            broadcast_id,
            updated
        );
        updated
    }

    /// Cancels every active broadcast. Returns (broadcasts, records updated).
    pub async fn cancel_all(&self) -> (u64, u64) {
        let sessions = match self.store.get_active_broadcasts().await {
            Ok(sessions) => sessions,
            Err(err) => {
                log::warn!("[dispatch] failed to list active broadcasts: {}", err);
                return (0, 0);
            }
        };
        let mut broadcasts = 0;
        let mut records = 0;
        for session in sessions {
            records += self.cancel_broadcast(session.broadcast_id).await;
            broadcasts += 1;
        }
        (broadcasts, records)
    }
}

fn build_targets(request: &DispatchRequest) -> Vec<DialTarget> {
    let mut targets = Vec::new();
    for (index, raw) in request.phone_numbers.iter().enumerate() {
        let phone_number = raw.trim().to_string();
        if phone_number.is_empty() {
            continue;
        }
        let contact = request.contacts.get(index);
        // One global script, or index-aligned with index 0 reused when the
        // script list is shorter than the number list.
        let script = request
            .scripts
            .get(index)
            .or_else(|| request.scripts.first())
            .cloned()
            .unwrap_or_default();
        targets.push(DialTarget {
            index,
            phone_number,
            contact_id: contact.and_then(|c| c.id.clone()),
            contact_name: contact.and_then(|c| c.name.clone()),
            script,
        });
    }
    targets
}

/// One creation attempt plus exactly one retry on a channel-limit rejection.
async fn place_call(
    telephony: &dyn TelephonyPort,
    request: CreateCallRequest,
    cfg: &DispatchConfig,
    hits: &AtomicU32,
) -> Result<CallId, TelephonyError> {
    match create_once(telephony, request.clone()).await {
        Ok(call_id) => Ok(call_id),
        Err(TelephonyError::ChannelLimit) => {
            let hit = hits.fetch_add(1, Ordering::SeqCst) + 1;
            let delay = capacity_backoff(cfg, hit);
            log::warn!(
                "[dispatch] channel limit hit #{} for {}, retrying in {:?}",
                hit,
                mask_phone(&request.to),
                delay
            );
            tokio::time::sleep(delay).await;
            create_once(telephony, request).await
        }
        Err(err) => Err(err),
    }
}

async fn create_once(
    telephony: &dyn TelephonyPort,
    request: CreateCallRequest,
) -> Result<CallId, TelephonyError> {
    let to = request.to.clone();
    let legs = telephony.create_call(request).await?;
    let count = legs.len();
    let Some(first) = legs.into_iter().next() else {
        return Err(TelephonyError::Provider(
            "creation response contained no call leg".to_string(),
        ));
    };
    if count > 1 {
        // Observed provider behavior: response cardinality can exceed the
        // request. One destination gets one record, extras are dropped.
        log::warn!(
            "[dispatch] provider returned {} legs for one call to {}, keeping the first",
            count,
            mask_phone(&to)
        );
    }
    Ok(first)
}

/// Escalating, capped delay: base + increment per prior hit in this batch.
fn capacity_backoff(cfg: &DispatchConfig, hit: u32) -> Duration {
    let escalated = cfg.retry_base_delay + cfg.retry_increment * hit.saturating_sub(1);
    escalated.min(cfg.retry_max_delay)
}
