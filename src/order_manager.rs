//! Order lifecycle: submit, watch for the fill, cancel at the boundary
//!
//! Entry orders rest as GTC limits at the quoted ask. Submission
//! retries transient API failures with bounded backoff; the fill watch
//! polls until the order goes terminal or the market close boundary is
//! reached, at which point the resting order is cancelled and any
//! partial fill is kept.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::clob::OrderApi;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::{Fill, Market, OrderState, Side};

pub struct OrderLifecycleManager {
    api: Arc<dyn OrderApi>,
    config: Config,
}

impl OrderLifecycleManager {
    pub fn new(api: Arc<dyn OrderApi>, config: Config) -> Self {
        Self { api, config }
    }

    /// Submit an entry order and watch it to a fill or to the close
    /// boundary. `Ok(None)` means no position: rejected, cancelled
    /// unfilled, or boundary reached with nothing matched.
    pub async fn execute_entry(
        &self,
        market: &Market,
        price: Decimal,
        shares: Decimal,
    ) -> Result<Option<Fill>> {
        if Utc::now() >= market.close_time {
            return Err(Error::MarketExpired(market.condition_id.clone()));
        }

        let order_id = self
            .submit_with_backoff(&market.yes_token_id, price, shares)
            .await?;
        info!(
            "Entry order {} resting: {} {} @ {}",
            order_id, market.label(), shares, price
        );

        self.watch_order(&order_id, market.close_time, price, shares)
            .await
    }

    async fn submit_with_backoff(
        &self,
        token_id: &str,
        price: Decimal,
        shares: Decimal,
    ) -> Result<String> {
        let operation = || async {
            self.api
                .submit_limit_order(token_id, Side::Buy, price, shares)
                .await
                .map_err(|e| {
                    if e.is_transient() {
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
        };

        backoff::future::retry(crate::retry::submission_backoff(), operation)
            .await
            .map_err(|e| match e {
                err @ Error::Api(_) => Error::Api(format!("submission budget exhausted: {}", err)),
                err => err,
            })
    }

    /// Poll order status until terminal or the close boundary.
    async fn watch_order(
        &self,
        order_id: &str,
        close_time: DateTime<Utc>,
        submitted_price: Decimal,
        submitted_size: Decimal,
    ) -> Result<Option<Fill>> {
        loop {
            let status = match self.api.order_status(order_id).await {
                Ok(s) => s,
                Err(e) if e.is_transient() => {
                    warn!("Status poll for {} failed: {}", order_id, e);
                    tokio::time::sleep(Duration::from_secs(self.config.fill_poll_interval)).await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            match status.state {
                OrderState::Filled => {
                    return Ok(Some(Fill {
                        order_id: order_id.to_string(),
                        price: status.filled_price.unwrap_or(submitted_price),
                        size: status.filled_size.unwrap_or(submitted_size),
                        time: Utc::now(),
                    }));
                }
                OrderState::Cancelled | OrderState::Rejected => {
                    info!("Order {} ended {:?} without a fill", order_id, status.state);
                    return Ok(None);
                }
                OrderState::Pending | OrderState::PartiallyFilled => {}
            }

            if Utc::now() >= close_time {
                return self
                    .cancel_at_boundary(order_id, submitted_price)
                    .await;
            }

            tokio::time::sleep(Duration::from_secs(self.config.fill_poll_interval)).await;
        }
    }

    /// Cancel a still-resting order at the close boundary and keep
    /// whatever portion matched before the cancel landed.
    async fn cancel_at_boundary(
        &self,
        order_id: &str,
        submitted_price: Decimal,
    ) -> Result<Option<Fill>> {
        info!("Close boundary reached, cancelling order {}", order_id);
        if let Err(e) = self.api.cancel_order(order_id).await {
            warn!("Cancel of {} failed: {}", order_id, e);
        }

        let status = self.api.order_status(order_id).await?;
        match status.filled_size {
            Some(size) if size > Decimal::ZERO => Ok(Some(Fill {
                order_id: order_id.to_string(),
                price: status.filled_price.unwrap_or(submitted_price),
                size,
                time: Utc::now(),
            })),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, DurationClass, OrderStatus, Quote};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use std::collections::VecDeque;

    struct ScriptedApi {
        statuses: Mutex<VecDeque<OrderStatus>>,
        cancels: Mutex<u32>,
    }

    impl ScriptedApi {
        fn new(statuses: Vec<OrderStatus>) -> Self {
            Self {
                statuses: Mutex::new(statuses.into()),
                cancels: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl OrderApi for ScriptedApi {
        async fn get_quote(&self, _token_id: &str) -> Result<Quote> {
            Ok(Quote::default())
        }

        async fn submit_limit_order(
            &self,
            _token_id: &str,
            _side: Side,
            _price: Decimal,
            _size: Decimal,
        ) -> Result<String> {
            Ok("order-1".into())
        }

        async fn submit_aggressive_sell(
            &self,
            _token_id: &str,
            _price: Decimal,
            _size: Decimal,
        ) -> Result<String> {
            Ok("order-1".into())
        }

        async fn order_status(&self, _order_id: &str) -> Result<OrderStatus> {
            let mut statuses = self.statuses.lock();
            let front = statuses.front().cloned().expect("script exhausted");
            if statuses.len() > 1 {
                statuses.pop_front();
            }
            Ok(front)
        }

        async fn cancel_order(&self, _order_id: &str) -> Result<()> {
            *self.cancels.lock() += 1;
            Ok(())
        }
    }

    fn market(seconds_to_close: i64) -> Market {
        Market {
            condition_id: "0xabc".into(),
            question: "Will BTC go UP in the next 5 minutes?".into(),
            slug: "btc-up-5min".into(),
            asset: "BTC".into(),
            direction: Direction::Up,
            duration: DurationClass::FiveMin,
            yes_token_id: "yes-token".into(),
            no_token_id: "no-token".into(),
            close_time: Utc::now() + chrono::Duration::seconds(seconds_to_close),
        }
    }

    fn status(state: OrderState, price: Option<Decimal>, size: Option<Decimal>) -> OrderStatus {
        OrderStatus {
            state,
            filled_price: price,
            filled_size: size,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fill_reported_with_actual_price() {
        let api = Arc::new(ScriptedApi::new(vec![
            status(OrderState::Pending, None, None),
            status(OrderState::Filled, Some(dec!(0.975)), Some(dec!(10.2))),
        ]));
        let mgr = OrderLifecycleManager::new(api, Config::test_default());

        let fill = mgr
            .execute_entry(&market(120), dec!(0.98), dec!(10.2))
            .await
            .unwrap()
            .expect("should fill");
        assert_eq!(fill.price, dec!(0.975));
        assert_eq!(fill.size, dec!(10.2));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_order_yields_no_position() {
        let api = Arc::new(ScriptedApi::new(vec![status(
            OrderState::Rejected,
            None,
            None,
        )]));
        let mgr = OrderLifecycleManager::new(api, Config::test_default());

        let fill = mgr
            .execute_entry(&market(120), dec!(0.98), dec!(10.2))
            .await
            .unwrap();
        assert!(fill.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn boundary_cancel_keeps_partial_fill() {
        let api = Arc::new(ScriptedApi::new(vec![
            status(OrderState::PartiallyFilled, Some(dec!(0.98)), Some(dec!(4))),
        ]));
        let mgr = OrderLifecycleManager::new(api.clone(), Config::test_default());

        // Close boundary already passed when the first poll returns
        let boundary = Utc::now() - chrono::Duration::seconds(1);
        let fill = mgr
            .watch_order("order-1", boundary, dec!(0.98), dec!(10.2))
            .await
            .unwrap()
            .expect("partial fill kept");
        assert_eq!(fill.size, dec!(4));
        assert_eq!(*api.cancels.lock(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn boundary_cancel_with_nothing_matched() {
        let api = Arc::new(ScriptedApi::new(vec![status(
            OrderState::Pending,
            None,
            None,
        )]));
        let mgr = OrderLifecycleManager::new(api.clone(), Config::test_default());

        let boundary = Utc::now() - chrono::Duration::seconds(1);
        let fill = mgr
            .watch_order("order-1", boundary, dec!(0.98), dec!(10.2))
            .await
            .unwrap();
        assert!(fill.is_none());
        assert_eq!(*api.cancels.lock(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_market_never_submits() {
        let api = Arc::new(ScriptedApi::new(vec![status(
            OrderState::Pending,
            None,
            None,
        )]));
        let mgr = OrderLifecycleManager::new(api, Config::test_default());

        let result = mgr.execute_entry(&market(-1), dec!(0.98), dec!(10.2)).await;
        assert!(matches!(result, Err(Error::MarketExpired(_))));
    }
}
