//! CLOB client: order book reads and order placement
//!
//! Only best bid/ask are read from the book. Entries post a GTC limit
//! at the ask; cut-loss exits post an aggressive FOK limit sell. L2
//! credential headers are attached as-is; request signing is out of
//! scope here.
//!
//! In dry-run mode submissions are simulated: the order is remembered
//! and reported filled at its limit price on the next status poll, so
//! the rest of the engine runs unchanged.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::{OrderState, OrderStatus, Quote, Side};

/// Exchange seam used by the order lifecycle manager and the cut-loss
/// monitor. Implemented by `ClobClient`; tests script their own.
#[async_trait]
pub trait OrderApi: Send + Sync {
    async fn get_quote(&self, token_id: &str) -> Result<Quote>;

    /// Submit a GTC limit order; returns the exchange order id.
    async fn submit_limit_order(
        &self,
        token_id: &str,
        side: Side,
        price: Decimal,
        size: Decimal,
    ) -> Result<String>;

    /// Aggressive FOK sell used for cut-loss exits.
    async fn submit_aggressive_sell(
        &self,
        token_id: &str,
        price: Decimal,
        size: Decimal,
    ) -> Result<String>;

    async fn order_status(&self, order_id: &str) -> Result<OrderStatus>;

    async fn cancel_order(&self, order_id: &str) -> Result<()>;
}

pub struct ClobClient {
    client: Client,
    config: Config,
    /// Simulated orders while in dry-run: order_id -> (price, size).
    dry_orders: DashMap<String, (Decimal, Decimal)>,
}

impl ClobClient {
    pub fn new(config: Config) -> Result<Self> {
        let client = Client::builder()
            .tcp_nodelay(true)
            .pool_max_idle_per_host(10)
            .timeout(std::time::Duration::from_secs(10))
            .connect_timeout(std::time::Duration::from_secs(5))
            .user_agent("updown-bot/0.1")
            .build()
            .map_err(|e| Error::Api(e.to_string()))?;

        Ok(Self {
            client,
            config,
            dry_orders: DashMap::new(),
        })
    }

    fn auth_headers(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("POLY-API-KEY", &self.config.api_key)
            .header("POLY-PASSPHRASE", &self.config.api_passphrase)
            .header("POLY-TIMESTAMP", Utc::now().timestamp().to_string())
    }

    async fn post_order(
        &self,
        token_id: &str,
        side: Side,
        price: Decimal,
        size: Decimal,
        order_type: &str,
    ) -> Result<String> {
        if self.config.dry_run {
            let order_id = format!("dry-{}", Utc::now().timestamp_nanos_opt().unwrap_or(0));
            self.dry_orders.insert(order_id.clone(), (price, size));
            info!(
                "[DRY RUN] {} {:?} {} @ {} ({})",
                order_id, side, size, price, order_type
            );
            return Ok(order_id);
        }

        let body = json!({
            "tokenID": token_id,
            "price": price.to_string(),
            "size": size.to_string(),
            "side": match side { Side::Buy => "BUY", Side::Sell => "SELL" },
            "orderType": order_type,
        });

        let url = format!("{}/order", self.config.clob_url);
        let response = self
            .auth_headers(self.client.post(&url))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let result: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Api(e.to_string()))?;

        if !status.is_success() {
            return Err(Error::Api(format!(
                "order POST failed: {} - {}",
                status, result
            )));
        }
        if let Some(error) = result.get("error").and_then(|e| e.as_str()) {
            return Err(Error::Api(format!("order rejected: {}", error)));
        }

        result
            .get("orderID")
            .or_else(|| result.get("id"))
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| Error::Api(format!("order response without id: {}", result)))
    }
}

#[async_trait]
impl OrderApi for ClobClient {
    async fn get_quote(&self, token_id: &str) -> Result<Quote> {
        let url = format!("{}/book", self.config.clob_url);
        let response = self
            .client
            .get(&url)
            .query(&[("token_id", token_id)])
            .send()
            .await?;

        let book: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Api(e.to_string()))?;

        let top_price = |side: &str| -> Option<Decimal> {
            book.get(side)?
                .as_array()?
                .first()?
                .get("price")?
                .as_str()?
                .parse()
                .ok()
        };

        // Book arrays arrive best-first
        Ok(Quote {
            best_bid: top_price("bids"),
            best_ask: top_price("asks"),
        })
    }

    async fn submit_limit_order(
        &self,
        token_id: &str,
        side: Side,
        price: Decimal,
        size: Decimal,
    ) -> Result<String> {
        self.post_order(token_id, side, price, size, "GTC").await
    }

    async fn submit_aggressive_sell(
        &self,
        token_id: &str,
        price: Decimal,
        size: Decimal,
    ) -> Result<String> {
        self.post_order(token_id, Side::Sell, price, size, "FOK")
            .await
    }

    async fn order_status(&self, order_id: &str) -> Result<OrderStatus> {
        if let Some(entry) = self.dry_orders.get(order_id) {
            let (price, size) = *entry;
            return Ok(OrderStatus {
                state: OrderState::Filled,
                filled_price: Some(price),
                filled_size: Some(size),
            });
        }

        let url = format!("{}/data/order/{}", self.config.clob_url, order_id);
        let response = self.auth_headers(self.client.get(&url)).send().await?;
        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Api(e.to_string()))?;

        let status_str = data
            .get("status")
            .and_then(|s| s.as_str())
            .unwrap_or("")
            .to_uppercase();
        let original: Decimal = decimal_field(&data, "original_size").unwrap_or(Decimal::ZERO);
        let matched: Decimal = decimal_field(&data, "size_matched").unwrap_or(Decimal::ZERO);
        let price = decimal_field(&data, "price");

        let state = match status_str.as_str() {
            "MATCHED" => OrderState::Filled,
            "CANCELED" | "CANCELLED" => OrderState::Cancelled,
            "REJECTED" | "INVALID" => OrderState::Rejected,
            "LIVE" | "DELAYED" | "UNMATCHED" => {
                if matched > Decimal::ZERO && matched < original {
                    OrderState::PartiallyFilled
                } else if matched > Decimal::ZERO {
                    OrderState::Filled
                } else {
                    OrderState::Pending
                }
            }
            other => {
                debug!("Unknown order status '{}' for {}", other, order_id);
                OrderState::Pending
            }
        };

        Ok(OrderStatus {
            state,
            filled_price: price,
            filled_size: (matched > Decimal::ZERO).then_some(matched),
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        if self.dry_orders.remove(order_id).is_some() {
            info!("[DRY RUN] cancel {}", order_id);
            return Ok(());
        }

        let url = format!("{}/order/{}", self.config.clob_url, order_id);
        let response = self.auth_headers(self.client.delete(&url)).send().await?;
        if !response.status().is_success() {
            warn!("Cancel {} returned {}", order_id, response.status());
            return Err(Error::Api(format!(
                "cancel failed with {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Decimal fields arrive as strings or numbers depending on endpoint.
fn decimal_field(value: &serde_json::Value, key: &str) -> Option<Decimal> {
    match value.get(key)? {
        serde_json::Value::String(s) => s.parse().ok(),
        serde_json::Value::Number(n) => n.to_string().parse().ok(),
        _ => None,
    }
}
