//! Per-position monitor: cut-loss before close, resolution after
//!
//! One task owns each held position from entry to its terminal state,
//! so the cut-loss path and the resolution path can never both close
//! it. Before the market closes the monitor polls the book and the
//! reference price for a cut-loss trigger; after close it polls
//! settlement, dropping to a slower cadence once the grace period
//! passes without an answer.

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::clob::OrderApi;
use crate::config::Config;
use crate::error::Error;
use crate::events::{EventBus, TradeEvent};
use crate::gamma::ResolutionApi;
use crate::ledger::PositionLedger;
use crate::price_feed::ReferencePriceTracker;
use crate::retry::retry_async;
use crate::types::{CloseOutcome, Direction, OrderState, Position, Resolution};

/// Lowest price a cut-loss sell will be posted at.
const MIN_SELL_PRICE: Decimal = dec!(0.01);

pub struct CutLossMonitor {
    api: Arc<dyn OrderApi>,
    resolution: Arc<dyn ResolutionApi>,
    tracker: Arc<ReferencePriceTracker>,
    ledger: Arc<PositionLedger>,
    events: EventBus,
    config: Config,
}

impl CutLossMonitor {
    pub fn new(
        api: Arc<dyn OrderApi>,
        resolution: Arc<dyn ResolutionApi>,
        tracker: Arc<ReferencePriceTracker>,
        ledger: Arc<PositionLedger>,
        events: EventBus,
        config: Config,
    ) -> Self {
        Self {
            api,
            resolution,
            tracker,
            ledger,
            events,
            config,
        }
    }

    /// Spawn the monitoring task for one position.
    pub fn spawn(self: Arc<Self>, position: Position) {
        tokio::spawn(async move {
            let condition_id = position.condition_id.clone();
            if let Err(e) = self.run(position).await {
                // A close that lost the race to another path is benign
                match e {
                    Error::InvalidState(msg) => debug!("Monitor {}: {}", condition_id, msg),
                    e => {
                        error!("Monitor {} failed: {}", condition_id, e);
                        self.events.publish(TradeEvent::EngineError {
                            message: format!("monitor {}: {}", condition_id, e),
                        });
                    }
                }
            }
        });
    }

    pub async fn run(&self, position: Position) -> crate::error::Result<()> {
        info!(
            "Monitoring {} ({} to close)",
            position.condition_id,
            position.seconds_to_close()
        );

        if self.watch_until_close(&position).await? {
            return Ok(());
        }
        self.watch_resolution(&position).await
    }

    /// Pre-close loop. Returns true when the position was closed by a
    /// cut-loss, false when the market closed while still holding.
    async fn watch_until_close(&self, position: &Position) -> crate::error::Result<bool> {
        while position.seconds_to_close() > 0 {
            let best_bid = match self.api.get_quote(&position.yes_token_id).await {
                Ok(quote) => quote.best_bid,
                Err(e) => {
                    warn!("Quote poll for {} failed: {}", position.condition_id, e);
                    None
                }
            };
            let reference_change = self
                .tracker
                .change_from(&position.asset, position.reference_entry_price);

            if let Some(reason) =
                cutloss_reason(best_bid, reference_change, position.direction, &self.config)
            {
                warn!("Cut-loss trigger on {}: {}", position.condition_id, reason);
                self.execute_cutloss(position, best_bid, reason).await?;
                return Ok(true);
            }

            tokio::time::sleep(Duration::from_secs(self.config.position_poll_interval)).await;
        }
        Ok(false)
    }

    /// Sell at the best bid, floored, as fill-or-kill. A sell that
    /// cannot be executed at all is recorded as a full loss (exit 0)
    /// so the ledger never carries a phantom position.
    async fn execute_cutloss(
        &self,
        position: &Position,
        last_bid: Option<Decimal>,
        reason: String,
    ) -> crate::error::Result<()> {
        let api = self.api.clone();
        let token_id = position.yes_token_id.clone();
        let shares = position.shares;
        let fallback_bid = last_bid.unwrap_or(MIN_SELL_PRICE);

        let sold = retry_async("cut-loss sell", self.config.order_max_retries, || {
            let api = api.clone();
            let token_id = token_id.clone();
            async move {
                let bid = api
                    .get_quote(&token_id)
                    .await
                    .ok()
                    .and_then(|q| q.best_bid)
                    .unwrap_or(fallback_bid);
                let price = bid.max(MIN_SELL_PRICE);

                let order_id = api.submit_aggressive_sell(&token_id, price, shares).await?;
                let status = api.order_status(&order_id).await?;
                match status.state {
                    OrderState::Filled => {
                        Ok(status.filled_price.unwrap_or(price))
                    }
                    other => Err(Error::Api(format!("FOK sell ended {:?}", other))),
                }
            }
        })
        .await;

        let exit_price = match sold {
            Ok(price) => price,
            Err(e) => {
                error!(
                    "Cut-loss sell for {} failed, recording full loss: {}",
                    position.condition_id, e
                );
                Decimal::ZERO
            }
        };

        let (record, stats) = self.ledger.close_position(
            &position.condition_id,
            CloseOutcome::CutLoss { exit_price, reason },
        )?;
        self.events.publish(TradeEvent::CutLossExecuted {
            record,
            balance: stats.balance,
        });
        Ok(())
    }

    /// Post-close loop: poll settlement until YES or NO comes back.
    async fn watch_resolution(&self, position: &Position) -> crate::error::Result<()> {
        let mut pending_marked = false;

        loop {
            match self.resolution.check_resolution(&position.condition_id).await {
                Ok(Some(resolution)) => {
                    let outcome = match resolution {
                        Resolution::Yes => CloseOutcome::Won,
                        Resolution::No => CloseOutcome::Lost,
                    };
                    let (record, stats) =
                        self.ledger.close_position(&position.condition_id, outcome)?;
                    let event = match resolution {
                        Resolution::Yes => TradeEvent::PositionWon {
                            record,
                            balance: stats.balance,
                        },
                        Resolution::No => TradeEvent::PositionLost {
                            record,
                            balance: stats.balance,
                        },
                    };
                    self.events.publish(event);
                    return Ok(());
                }
                Ok(None) => {}
                Err(e) => warn!(
                    "Resolution poll for {} failed: {}",
                    position.condition_id, e
                ),
            }

            let past_grace = Utc::now()
                >= position.close_time + chrono::Duration::seconds(self.config.settlement_grace_secs);
            if past_grace && !pending_marked {
                match self.ledger.mark_pending_resolution(&position.condition_id) {
                    Ok(held) => {
                        warn!(
                            "{}, dropping to slow poll",
                            Error::SettlementAmbiguous(position.condition_id.clone())
                        );
                        self.events
                            .publish(TradeEvent::SettlementPending { position: held });
                    }
                    // Already pending from a previous run
                    Err(Error::InvalidState(_)) => {}
                    Err(e) => return Err(e),
                }
                pending_marked = true;
            }

            let interval = if past_grace {
                self.config.settlement_slow_poll
            } else {
                self.config.outcome_poll_interval
            };
            tokio::time::sleep(Duration::from_secs(interval)).await;
        }
    }
}

/// Cut-loss trigger check. Fires when the YES bid falls below the
/// floor, or when the reference price has moved against the position
/// direction by more than the configured fraction since entry.
pub fn cutloss_reason(
    best_bid: Option<Decimal>,
    reference_change: Option<Decimal>,
    direction: Direction,
    config: &Config,
) -> Option<String> {
    if let Some(bid) = best_bid {
        if bid < config.cutloss_pm_price {
            return Some(format!(
                "market bid {} below {} floor",
                bid, config.cutloss_pm_price
            ));
        }
    }

    if let Some(change) = reference_change {
        let adverse = match direction {
            Direction::Up => change <= -config.cutloss_reference_pct,
            Direction::Down => change >= config.cutloss_reference_pct,
        };
        if adverse {
            return Some(format!(
                "reference moved {:.4}% against {}",
                change * Decimal::from(100),
                direction.as_str()
            ));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::spawn_dispatcher;
    use crate::types::{DurationClass, OrderStatus, PositionState, Quote, Side};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    fn cfg() -> Config {
        Config::test_default()
    }

    #[test]
    fn bid_below_floor_triggers() {
        let reason = cutloss_reason(Some(dec!(0.79)), None, Direction::Up, &cfg());
        assert!(reason.unwrap().contains("below"));
        assert!(cutloss_reason(Some(dec!(0.80)), None, Direction::Up, &cfg()).is_none());
    }

    #[test]
    fn adverse_reference_move_triggers() {
        // 100000 -> 99650 is -0.35%, beyond the 0.3% threshold
        let change = (dec!(99650) - dec!(100000)) / dec!(100000);
        assert!(cutloss_reason(Some(dec!(0.95)), Some(change), Direction::Up, &cfg()).is_some());
        // Same move helps a DOWN position
        assert!(cutloss_reason(Some(dec!(0.95)), Some(change), Direction::Down, &cfg()).is_none());
        // +0.35% against a DOWN position
        assert!(
            cutloss_reason(Some(dec!(0.95)), Some(-change), Direction::Down, &cfg()).is_some()
        );
    }

    #[test]
    fn small_moves_and_missing_data_do_not_trigger() {
        assert!(cutloss_reason(None, None, Direction::Up, &cfg()).is_none());
        assert!(
            cutloss_reason(Some(dec!(0.95)), Some(dec!(-0.002)), Direction::Up, &cfg()).is_none()
        );
    }

    struct StubExchange {
        bid: Mutex<Option<Decimal>>,
        resolution: Mutex<Option<Resolution>>,
    }

    #[async_trait]
    impl OrderApi for StubExchange {
        async fn get_quote(&self, _token_id: &str) -> crate::error::Result<Quote> {
            Ok(Quote {
                best_bid: *self.bid.lock(),
                best_ask: None,
            })
        }

        async fn submit_limit_order(
            &self,
            _token_id: &str,
            _side: Side,
            _price: Decimal,
            _size: Decimal,
        ) -> crate::error::Result<String> {
            Ok("sell-1".into())
        }

        async fn submit_aggressive_sell(
            &self,
            _token_id: &str,
            price: Decimal,
            size: Decimal,
        ) -> crate::error::Result<String> {
            let _ = (price, size);
            Ok("sell-1".into())
        }

        async fn order_status(&self, _order_id: &str) -> crate::error::Result<OrderStatus> {
            Ok(OrderStatus {
                state: OrderState::Filled,
                filled_price: *self.bid.lock(),
                filled_size: None,
            })
        }

        async fn cancel_order(&self, _order_id: &str) -> crate::error::Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl ResolutionApi for StubExchange {
        async fn check_resolution(
            &self,
            _condition_id: &str,
        ) -> std::result::Result<Option<Resolution>, Error> {
            Ok(*self.resolution.lock())
        }
    }

    fn position(seconds_to_close: i64) -> Position {
        Position {
            condition_id: "0xabc".into(),
            asset: "BTC".into(),
            direction: Direction::Up,
            duration: DurationClass::FiveMin,
            label: "BTC Up or Down - 5 Minutes".into(),
            yes_token_id: "yes-token".into(),
            no_token_id: "no-token".into(),
            close_time: Utc::now() + chrono::Duration::seconds(seconds_to_close),
            entry_price: dec!(0.98),
            shares: dec!(10),
            cost: dec!(9.80),
            entry_time: Utc::now(),
            reference_entry_price: dec!(100000),
            state: PositionState::Open,
        }
    }

    fn monitor(exchange: Arc<StubExchange>, ledger: Arc<PositionLedger>) -> CutLossMonitor {
        let config = cfg();
        let events = spawn_dispatcher(&config);
        CutLossMonitor::new(
            exchange.clone(),
            exchange,
            Arc::new(ReferencePriceTracker::new(60, dec!(0.002))),
            ledger,
            events,
            config,
        )
    }

    #[tokio::test]
    async fn low_bid_closes_position_as_cutloss() {
        let exchange = Arc::new(StubExchange {
            bid: Mutex::new(Some(dec!(0.70))),
            resolution: Mutex::new(None),
        });
        let ledger = Arc::new(PositionLedger::new(":memory:", dec!(100)).unwrap());
        let p = position(60);
        ledger.open_position(p.clone()).unwrap();

        let m = monitor(exchange, ledger.clone());
        m.run(p).await.unwrap();

        assert!(ledger.open_positions().is_empty());
        let stats = ledger.stats();
        assert_eq!(stats.cut_losses, 1);
        // Sold 10 shares at 0.70 against 9.80 cost
        assert_eq!(stats.total_pnl, dec!(-2.80));
    }

    #[tokio::test]
    async fn yes_resolution_closes_position_as_win() {
        let exchange = Arc::new(StubExchange {
            bid: Mutex::new(Some(dec!(0.99))),
            resolution: Mutex::new(Some(Resolution::Yes)),
        });
        let ledger = Arc::new(PositionLedger::new(":memory:", dec!(100)).unwrap());
        // Already past close: goes straight to the resolution loop
        let p = position(-10);
        ledger.open_position(p.clone()).unwrap();

        let m = monitor(exchange, ledger.clone());
        m.run(p).await.unwrap();

        let stats = ledger.stats();
        assert_eq!(stats.wins, 1);
        assert_eq!(stats.total_pnl, dec!(0.20));
    }
}
