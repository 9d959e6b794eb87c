//! Reference price feed from Binance
//!
//! One WebSocket task per configured asset feeds a shared
//! `ReferencePriceTracker`. The tracker is what the rest of the engine
//! sees: latest price, short-horizon trend, change from an entry
//! reference. It does not care whether samples arrive by push or poll.
//!
//! Sparse data never errors: a missing asset reads as "absent"/FLAT and
//! callers must treat that as "do not act".

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::types::Trend;

/// One observed reference trade.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceSample {
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct AssetWindow {
    samples: VecDeque<ReferenceSample>,
}

/// Latest price and bounded rolling sample window per asset.
pub struct ReferencePriceTracker {
    windows: RwLock<HashMap<String, AssetWindow>>,
    window: ChronoDuration,
    /// Fractional change below which the trend reads FLAT (e.g. 0.002).
    epsilon: Decimal,
}

impl ReferencePriceTracker {
    pub fn new(window_secs: i64, epsilon: Decimal) -> Self {
        Self {
            windows: RwLock::new(HashMap::new()),
            window: ChronoDuration::seconds(window_secs),
            epsilon,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.trend_window_secs, config.trend_epsilon_pct)
    }

    /// Append a sample, evicting anything older than the trend window.
    /// Out-of-order samples are dropped to keep timestamps monotonic.
    pub fn observe(&self, asset: &str, price: Decimal, timestamp: DateTime<Utc>) {
        let mut windows = self.windows.write();
        let w = windows.entry(asset.to_string()).or_default();

        if let Some(last) = w.samples.back() {
            if timestamp < last.timestamp {
                debug!("Dropping out-of-order {} sample", asset);
                return;
            }
        }
        w.samples.push_back(ReferenceSample { price, timestamp });

        let cutoff = timestamp - self.window;
        while let Some(front) = w.samples.front() {
            if front.timestamp < cutoff {
                w.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Latest observed price, or None before the first sample.
    pub fn latest_price(&self, asset: &str) -> Option<Decimal> {
        self.windows
            .read()
            .get(asset)
            .and_then(|w| w.samples.back())
            .map(|s| s.price)
    }

    /// Sign of the price change from the oldest retained sample to the
    /// newest. FLAT when data is sparse or the move is below epsilon.
    pub fn trend(&self, asset: &str) -> Trend {
        let windows = self.windows.read();
        let Some(w) = windows.get(asset) else {
            return Trend::Flat;
        };
        let (Some(oldest), Some(newest)) = (w.samples.front(), w.samples.back()) else {
            return Trend::Flat;
        };
        if w.samples.len() < 2 || oldest.price.is_zero() {
            return Trend::Flat;
        }

        let change = (newest.price - oldest.price) / oldest.price;
        if change.abs() < self.epsilon {
            Trend::Flat
        } else if change > Decimal::ZERO {
            Trend::Up
        } else {
            Trend::Down
        }
    }

    /// Fractional change of the latest price from `reference`
    /// (positive = price rose). None when no sample has arrived yet.
    pub fn change_from(&self, asset: &str, reference: Decimal) -> Option<Decimal> {
        if reference.is_zero() {
            return None;
        }
        let current = self.latest_price(asset)?;
        Some((current - reference) / reference)
    }
}

/// Binance aggTrade payload. Price arrives as a string.
#[derive(Debug, Deserialize)]
struct AggTrade {
    #[serde(rename = "p")]
    price: Option<String>,
    #[serde(rename = "T")]
    trade_time_ms: Option<i64>,
}

/// Spawn one reconnecting WebSocket task per configured asset.
pub fn spawn_reference_feeds(tracker: Arc<ReferencePriceTracker>, config: &Config) {
    for asset in &config.assets {
        let asset = asset.clone();
        let symbol = config.asset_symbol(&asset);
        let url = format!("{}/{}@aggTrade", config.binance_ws_base, symbol);
        let tracker = tracker.clone();

        tokio::spawn(async move {
            loop {
                if let Err(e) = run_agg_trade_ws(&asset, &url, tracker.clone()).await {
                    error!("Binance {} stream error: {}", asset, e);
                }
                warn!("Binance {} stream disconnected, reconnecting in 2s...", asset);
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        });
    }
}

async fn run_agg_trade_ws(
    asset: &str,
    url: &str,
    tracker: Arc<ReferencePriceTracker>,
) -> Result<()> {
    info!("Connecting Binance stream: {}", url);

    let (ws_stream, _) = tokio::time::timeout(Duration::from_secs(10), connect_async(url))
        .await
        .context("Binance WebSocket connection timeout")?
        .context("Failed to connect to Binance WebSocket")?;

    info!("Binance {} stream connected", asset);

    let (mut write, mut read) = ws_stream.split();

    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Ok(trade) = serde_json::from_str::<AggTrade>(&text) {
                    let Some(price) = trade.price.and_then(|p| p.parse::<Decimal>().ok())
                    else {
                        continue;
                    };
                    if price <= Decimal::ZERO {
                        continue;
                    }
                    let timestamp = trade
                        .trade_time_ms
                        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                        .unwrap_or_else(Utc::now);
                    tracker.observe(asset, price, timestamp);
                }
            }
            Ok(Message::Ping(data)) => {
                let _ = write.send(Message::Pong(data)).await;
            }
            Ok(Message::Close(_)) => {
                info!("Binance {} stream closed by server", asset);
                break;
            }
            Err(e) => {
                error!("Binance {} stream error: {}", asset, e);
                break;
            }
            _ => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn tracker() -> ReferencePriceTracker {
        ReferencePriceTracker::new(60, dec!(0.002))
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().unwrap()
    }

    #[test]
    fn absent_asset_reads_flat_and_none() {
        let t = tracker();
        assert_eq!(t.latest_price("BTC"), None);
        assert_eq!(t.trend("BTC"), Trend::Flat);
        assert_eq!(t.change_from("BTC", dec!(100)), None);
    }

    #[test]
    fn single_sample_is_flat() {
        let t = tracker();
        t.observe("BTC", dec!(100000), ts(0));
        assert_eq!(t.latest_price("BTC"), Some(dec!(100000)));
        assert_eq!(t.trend("BTC"), Trend::Flat);
    }

    #[test]
    fn trend_sign_with_epsilon() {
        let t = tracker();
        t.observe("BTC", dec!(100000), ts(0));
        t.observe("BTC", dec!(100050), ts(30));
        // +0.05% is below the 0.2% epsilon
        assert_eq!(t.trend("BTC"), Trend::Flat);
        t.observe("BTC", dec!(100300), ts(40));
        assert_eq!(t.trend("BTC"), Trend::Up);

        t.observe("ETH", dec!(3000), ts(0));
        t.observe("ETH", dec!(2990), ts(30));
        assert_eq!(t.trend("ETH"), Trend::Down);
    }

    #[test]
    fn window_eviction() {
        let t = tracker();
        t.observe("BTC", dec!(90000), ts(0));
        t.observe("BTC", dec!(100000), ts(30));
        // 100s later the ts(0) and ts(30) samples fall out of the 60s window
        t.observe("BTC", dec!(100010), ts(100));
        t.observe("BTC", dec!(100020), ts(110));
        // Only the near-flat tail remains, so no stale UP trend
        assert_eq!(t.trend("BTC"), Trend::Flat);
    }

    #[test]
    fn out_of_order_samples_dropped() {
        let t = tracker();
        t.observe("BTC", dec!(100000), ts(10));
        t.observe("BTC", dec!(99000), ts(5));
        assert_eq!(t.latest_price("BTC"), Some(dec!(100000)));
    }

    #[test]
    fn change_from_reference() {
        let t = tracker();
        t.observe("BTC", dec!(99.65), ts(0));
        let change = t.change_from("BTC", dec!(100)).unwrap();
        assert_eq!(change, dec!(-0.0035));
    }
}
