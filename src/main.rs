use std::sync::Arc;

use call_broadcast_backend::interface::db::{MemoryStore, PostgresStore};
use call_broadcast_backend::interface::http::{spawn_api_server, AppState};
use call_broadcast_backend::interface::telephony::{NoopTelephony, TelnyxAdapter};
use call_broadcast_backend::service::call_flow::messages::flow_messages;
use call_broadcast_backend::service::call_flow::CallFlowEngine;
use call_broadcast_backend::service::dispatch::BatchDispatcher;
use call_broadcast_backend::service::webhook::WebhookRouter;
use call_broadcast_backend::shared::ports::call_store::CallStorePort;
use call_broadcast_backend::shared::ports::telephony::TelephonyPort;
use call_broadcast_backend::shared::{config, logging};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let cfg = config::Config::from_env()?;
    let provider_cfg = config::provider_config().clone();
    let call_flow_cfg = config::call_flow_config().clone();
    let dispatch_cfg = config::dispatch_config().clone();

    // --- ストレージ選択: DATABASE_URL があれば Postgres、なければインメモリ ---
    let store: Arc<dyn CallStorePort> = match cfg.database_url.clone() {
        Some(database_url) => {
            let postgres = PostgresStore::new(database_url).await?;
            postgres.ensure_schema().await?;
            log::info!("[main] using postgres call store");
            Arc::new(postgres)
        }
        None => {
            log::warn!("[main] DATABASE_URL not set, using in-memory call store");
            Arc::new(MemoryStore::new())
        }
    };

    // --- プロバイダ選択: API キーがなければ dry-run ---
    let telephony: Arc<dyn TelephonyPort> = if provider_cfg.api_key.is_some() {
        match TelnyxAdapter::new(&provider_cfg) {
            Ok(adapter) => Arc::new(adapter),
            Err(err) => {
                log::warn!("[main] provider adapter init failed: {}", err);
                Arc::new(NoopTelephony::new())
            }
        }
    } else {
        log::warn!("[main] PROVIDER_API_KEY not set, telephony actions are no-ops");
        Arc::new(NoopTelephony::new())
    };

    let dispatcher = Arc::new(BatchDispatcher::new(
        telephony.clone(),
        store.clone(),
        dispatch_cfg,
        provider_cfg.from_number.clone(),
    ));
    let engine = Arc::new(CallFlowEngine::new(
        telephony,
        store.clone(),
        call_flow_cfg,
        flow_messages().clone(),
        provider_cfg.messaging_from_number.clone(),
    ));
    let router = Arc::new(WebhookRouter::new(engine));

    spawn_api_server(
        &cfg.http_bind_addr,
        AppState {
            dispatcher,
            router,
            store,
        },
    )
    .await;
    log::info!("[main] call broadcast backend up on {}", cfg.http_bind_addr);

    tokio::signal::ctrl_c().await?;
    log::info!("[main] shutdown signal received");
    Ok(())
}
