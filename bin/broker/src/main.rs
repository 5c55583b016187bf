//! Broker Supervisor: wires the store, exchange adapters, chain client, hub
//! gateway, engine, and reconciler together, owns the CLI/config surface,
//! and drives graceful shutdown (clap-derived `Cli`,
//! `tracing_subscriber::EnvFilter`, `#[tokio::main] async fn main() ->
//! eyre::Result<()>`).

mod cli;
mod config;

use std::{collections::HashMap, collections::HashSet, sync::Arc};

use broker_chain::{ChainClient, ChainClientConfig, ChainGateway};
use broker_engine::SubOrderEngine;
use broker_exchange::{ExchangeAdapter, RestAdapterConfig, RestExchangeAdapter};
use broker_hub::{HubEvent, HubGateway, HubInbound, WsHubGateway};
use broker_reconciler::Reconciler;
use broker_store::InMemoryStore;
use broker_types::{Exchange, TokenRegistry};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use crate::{cli::Cli, config::BrokerConfig};

type Store = Arc<InMemoryStore>;
type Hub = Arc<WsHubGateway>;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let subscriber = tracing_subscriber::fmt().with_env_filter(env_filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    let raw = std::fs::read_to_string(&cli.config)?;
    let config: BrokerConfig = toml::from_str(&raw)?;
    validate_config(&config)?;

    let tokens = Arc::new(TokenRegistry::new(config.token_map()));
    let signer: alloy_signer_local::PrivateKeySigner = cli.private_key.parse()?;

    let chain_gateway = ChainGateway::new(config.chain.gateway_url.clone(), config.chain.gas_station_url.clone());
    let chain_config = ChainClientConfig {
        chain_id: config.chain.chain_id,
        contract_address: config.chain.contract_address,
        broker_address: config.chain.broker_address,
        matcher_address: config.chain.matcher_address,
        fee_asset: config.chain.fee_asset,
    };
    let chain = Arc::new(ChainClient::new(chain_config, chain_gateway, signer, tokens.clone()));

    let mut exchange_map: HashMap<Exchange, Arc<dyn ExchangeAdapter>> = HashMap::new();
    let mut exchange_list: Vec<(Exchange, Arc<dyn ExchangeAdapter>)> = Vec::new();
    for venue in &config.exchanges {
        let api_key = match &venue.api_key_env {
            Some(var) => Some(std::env::var(var)?),
            None => None,
        };
        let adapter: Arc<dyn ExchangeAdapter> = Arc::new(RestExchangeAdapter::new(
            RestAdapterConfig {
                venue: venue.name.clone(),
                base_url: venue.base_url.clone(),
                api_key,
                requires_transfer_before_withdraw: venue.requires_transfer_before_withdraw,
                withdraw_source_account: venue.withdraw_source_account.clone(),
            },
            tokens.clone(),
        ));
        exchange_map.insert(venue.name.clone(), adapter.clone());
        exchange_list.push((venue.name.clone(), adapter));
    }

    let store: Store = InMemoryStore::new();
    let (hub, hub_events) = WsHubGateway::connect(&config.hub_url).await?;
    let hub: Hub = Arc::new(hub);

    let engine = Arc::new(SubOrderEngine::new(store.clone(), exchange_map, chain.clone(), hub.clone()));
    let reconciler = Arc::new(Reconciler::new(
        store,
        exchange_list,
        chain.clone(),
        hub.clone(),
        engine.clone(),
        config.due_period_seconds,
    ));

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            shutdown.cancel();
        });
    }

    connect_to_hub(&chain, &hub).await?;
    let loop_handles = reconciler.spawn_loops(shutdown.clone());

    dispatch(engine, hub, chain, hub_events, &config.hub_url, shutdown).await;
    for handle in loop_handles {
        let _ = handle.await;
    }
    Ok(())
}

/// Sign `now` as a personal message, authenticate to the hub, then
/// announce operator metadata via `register` so the aggregator can
/// attribute sub-orders to this broker instance. Re-sent on every
/// reconnect, same as `connect` itself.
async fn connect_to_hub(chain: &ChainClient, hub: &Hub) -> eyre::Result<()> {
    let now = now_ms();
    let signature = chain.sign_personal_message(&now.to_string()).await?;
    hub.connect(chain.broker_address(), now, signature).await?;
    hub.register(serde_json::json!({ "address": chain.broker_address().to_string() })).await?;
    Ok(())
}

/// Drains hub events until shutdown, routing each inbound message to its
/// matching engine handler and answering request/response messages
/// directly. A transport drop only resigns and reconnects; the reconciler
/// loops spawned in `main` keep running untouched throughout.
async fn dispatch(
    engine: Arc<SubOrderEngine<Store, Hub>>,
    hub: Hub,
    chain: Arc<ChainClient>,
    mut events: tokio::sync::mpsc::Receiver<HubEvent>,
    hub_url: &str,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("shutdown requested, stopping hub dispatch");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    HubEvent::Inbound(inbound) => handle_inbound(&engine, &hub, inbound).await,
                    HubEvent::Disconnected => {
                        tracing::warn!("hub transport dropped, reconnecting");
                        if let Err(error) = hub.reconnect(hub_url).await {
                            tracing::warn!(%error, "hub reconnect failed, will retry on next drop");
                            continue;
                        }
                        if let Err(error) = connect_to_hub(&chain, &hub).await {
                            tracing::warn!(%error, "failed to re-authenticate after reconnect");
                        }
                    }
                }
            }
        }
    }
}

async fn handle_inbound(engine: &Arc<SubOrderEngine<Store, Hub>>, hub: &Hub, inbound: HubInbound) {
    match inbound {
        HubInbound::CreateSubOrder(req) => {
            let status = engine.on_create_sub_order(req).await;
            if let Err(error) = hub.send_sub_order_status(status).await {
                tracing::warn!(%error, "failed to answer create_sub_order");
            }
        }
        HubInbound::CancelSubOrder { id } => match engine.on_cancel_sub_order(id).await {
            Ok(Some(status)) => {
                if let Err(error) = hub.send_sub_order_status(status).await {
                    tracing::warn!(%error, "failed to answer cancel_sub_order");
                }
            }
            Ok(None) => {}
            Err(error) => tracing::warn!(id, %error, "cancel_sub_order for an unknown id"),
        },
        HubInbound::CheckSubOrder { id } => {
            let status = engine.on_check_sub_order(id).await;
            if let Err(error) = hub.send_sub_order_status(status).await {
                tracing::warn!(%error, "failed to answer check_sub_order");
            }
        }
        HubInbound::SubOrderStatusAccepted { id, status } => {
            engine.on_sub_order_status_accepted(id, status).await;
        }
    }
}

/// Reject unknown venue ids / unmapped token symbols before any loop
/// starts, rather than failing per-tick on a typo later.
fn validate_config(config: &BrokerConfig) -> eyre::Result<()> {
    let mut seen_venues = HashSet::new();
    for venue in &config.exchanges {
        if venue.name.is_empty() {
            eyre::bail!("exchange entry with an empty venue id");
        }
        if !seen_venues.insert(venue.name.as_str()) {
            eyre::bail!("duplicate venue id in config: {}", venue.name);
        }
    }

    let mut seen_symbols = HashSet::new();
    for token in &config.tokens {
        if !seen_symbols.insert(token.symbol.as_str()) {
            eyre::bail!("duplicate token symbol in config: {}", token.symbol);
        }
    }
    if !seen_symbols.contains("ORN") {
        eyre::bail!("unmapped token symbol: ORN must be configured (fee asset / stake asset)");
    }

    Ok(())
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as i64
}
