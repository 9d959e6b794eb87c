//! Market watcher: discovery scan plus one entry task per market
//!
//! The scanner polls market discovery on a fixed cadence and spawns a
//! watch task for every new tradeable market. Each watch task sleeps
//! until the market's entry window opens, then evaluates the entry
//! rules every cycle until it either enters, the market reaches the
//! close boundary, or the rules say the window is gone. The registry
//! keeps one task per market and drops the entry when the task ends.

use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::clob::OrderApi;
use crate::config::Config;
use crate::decision::{decide, EntryDecision, SkipReason};
use crate::error::Error;
use crate::events::{EventBus, TradeEvent};
use crate::gamma::GammaClient;
use crate::ledger::PositionLedger;
use crate::monitor::CutLossMonitor;
use crate::order_manager::OrderLifecycleManager;
use crate::price_feed::ReferencePriceTracker;
use crate::types::{Fill, Market, Position, PositionState};

pub struct MarketWatcher {
    gamma: Arc<GammaClient>,
    api: Arc<dyn OrderApi>,
    orders: Arc<OrderLifecycleManager>,
    tracker: Arc<ReferencePriceTracker>,
    ledger: Arc<PositionLedger>,
    monitor: Arc<CutLossMonitor>,
    events: EventBus,
    config: Config,
    /// Markets with a live watch task, by condition id.
    active: DashMap<String, ()>,
}

impl MarketWatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gamma: Arc<GammaClient>,
        api: Arc<dyn OrderApi>,
        orders: Arc<OrderLifecycleManager>,
        tracker: Arc<ReferencePriceTracker>,
        ledger: Arc<PositionLedger>,
        monitor: Arc<CutLossMonitor>,
        events: EventBus,
        config: Config,
    ) -> Self {
        Self {
            gamma,
            api,
            orders,
            tracker,
            ledger,
            monitor,
            events,
            config,
            active: DashMap::new(),
        }
    }

    pub fn watched_count(&self) -> usize {
        self.active.len()
    }

    /// Discovery loop. Runs until the process shuts down.
    pub async fn run_scanner(self: Arc<Self>) {
        loop {
            match self.gamma.scan_markets().await {
                Ok(markets) => {
                    for market in markets {
                        self.consider(market);
                    }
                }
                Err(e) => {
                    error!("Market scan failed: {}", e);
                    self.events.publish(TradeEvent::EngineError {
                        message: format!("market scan: {}", e),
                    });
                }
            }
            sleep(Duration::from_secs(self.config.market_poll_interval)).await;
        }
    }

    /// Register a watch task for a market, unless it is expired,
    /// already entered, or already being watched.
    fn consider(self: &Arc<Self>, market: Market) {
        if market.is_expired() {
            return;
        }
        if self.ledger.already_traded(&market.condition_id) {
            debug!("Skipping {}: already traded", market.condition_id);
            return;
        }
        if self.active.contains_key(&market.condition_id) {
            return;
        }

        self.active.insert(market.condition_id.clone(), ());
        info!(
            "Watching {} ({}, closes in {}s)",
            market.label(),
            market.condition_id,
            market.seconds_to_close()
        );

        let watcher = self.clone();
        tokio::spawn(async move {
            let condition_id = market.condition_id.clone();
            watcher.watch_market(market).await;
            watcher.active.remove(&condition_id);
        });
    }

    async fn watch_market(&self, market: Market) {
        // Nothing to evaluate until the entry window opens
        let window = self.config.entry_window(market.duration);
        let until_window = market.seconds_to_close() - window;
        if until_window > 0 {
            sleep(Duration::from_secs(until_window as u64)).await;
        }

        loop {
            let quote = match self.api.get_quote(&market.yes_token_id).await {
                Ok(q) => q,
                Err(e) => {
                    warn!("Quote fetch for {} failed: {}", market.condition_id, e);
                    sleep(Duration::from_secs(self.config.entry_poll_interval)).await;
                    continue;
                }
            };
            let trend = self.tracker.trend(&market.asset);

            match decide(
                &quote,
                market.seconds_to_close(),
                trend,
                market.direction,
                market.duration,
                &self.config,
            ) {
                EntryDecision::Enter { price, shares } => {
                    // The cut-loss trigger needs a reference price at
                    // entry, so hold off until the feed has one
                    let Some(reference) = self.tracker.latest_price(&market.asset) else {
                        warn!(
                            "No reference price for {} yet, holding entry",
                            market.asset
                        );
                        sleep(Duration::from_secs(self.config.entry_poll_interval)).await;
                        continue;
                    };

                    if self.try_enter(&market, price, shares, reference).await {
                        return;
                    }
                    sleep(Duration::from_secs(self.config.entry_poll_interval)).await;
                }
                EntryDecision::Skip(SkipReason::Closing) => {
                    debug!("Window over for {} without entry", market.condition_id);
                    return;
                }
                EntryDecision::Skip(reason) => {
                    debug!("Skip {}: {}", market.condition_id, reason);
                    sleep(Duration::from_secs(self.config.entry_poll_interval)).await;
                }
            }
        }
    }

    /// Execute one entry attempt. Returns true when the watch task is
    /// finished with this market (entered, or permanently blocked).
    async fn try_enter(
        &self,
        market: &Market,
        price: Decimal,
        shares: Decimal,
        reference: Decimal,
    ) -> bool {
        let fill = match self.orders.execute_entry(market, price, shares).await {
            Ok(Some(fill)) => fill,
            Ok(None) => {
                info!("Entry on {} did not fill", market.condition_id);
                return market.seconds_to_close() <= self.config.min_entry_seconds;
            }
            Err(Error::MarketExpired(id)) => {
                debug!("Entry on {} raced the close boundary", id);
                return true;
            }
            Err(e) => {
                error!("Entry on {} failed: {}", market.condition_id, e);
                self.events.publish(TradeEvent::EngineError {
                    message: format!("entry {}: {}", market.condition_id, e),
                });
                return false;
            }
        };

        let position = build_position(market, &fill, reference);
        match self.ledger.open_position(position.clone()) {
            Ok(stats) => {
                info!(
                    "Entered {}: {} shares @ {} (cost {})",
                    market.label(),
                    position.shares,
                    position.entry_price,
                    position.cost
                );
                self.events.publish(TradeEvent::PositionOpened {
                    position: position.clone(),
                    balance: stats.balance,
                });
                self.monitor.clone().spawn(position);
                true
            }
            Err(Error::DuplicateMarket(id)) => {
                warn!("Position for {} already recorded", id);
                true
            }
            Err(e) => {
                error!("Could not record position for {}: {}", market.condition_id, e);
                self.events.publish(TradeEvent::EngineError {
                    message: format!("ledger {}: {}", market.condition_id, e),
                });
                true
            }
        }
    }
}

/// Assemble a position from a confirmed fill. Cost and entry price
/// come from the fill, not from the quoted ask.
pub fn build_position(market: &Market, fill: &Fill, reference: Decimal) -> Position {
    Position {
        condition_id: market.condition_id.clone(),
        asset: market.asset.clone(),
        direction: market.direction,
        duration: market.duration,
        label: market.label(),
        yes_token_id: market.yes_token_id.clone(),
        no_token_id: market.no_token_id.clone(),
        close_time: market.close_time,
        entry_price: fill.price,
        shares: fill.size,
        cost: (fill.price * fill.size).round_dp(6),
        entry_time: fill.time,
        reference_entry_price: reference,
        state: PositionState::Open,
    }
}
