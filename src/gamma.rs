//! Gamma API client: market discovery and settlement checks
//!
//! Discovery filters the active market list down to 5m/15m Up/Down
//! crypto contracts for the configured assets, matching on the market
//! question and slug the way the listing pages name them.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::Error;
use crate::types::{Direction, DurationClass, Market, Resolution};

const DURATION_KEYWORDS: &[(DurationClass, &[&str])] = &[
    (
        DurationClass::FiveMin,
        &["5 minute", "5-minute", "5min", "next 5"],
    ),
    (
        DurationClass::FifteenMin,
        &["15 minute", "15-minute", "15min", "next 15"],
    ),
];

/// Raw market row from the Gamma API.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GammaMarket {
    #[serde(default)]
    condition_id: String,
    #[serde(default)]
    question: String,
    #[serde(default)]
    slug: String,
    #[serde(default)]
    end_date: Option<String>,
    #[serde(default)]
    end_date_iso: Option<String>,
    #[serde(default)]
    closed: bool,
    #[serde(default)]
    tokens: Vec<GammaToken>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GammaToken {
    #[serde(default)]
    token_id: String,
    #[serde(default)]
    outcome: String,
    #[serde(default)]
    price: Option<Decimal>,
}

/// Resolution lookup seam so position monitors are testable without
/// the network.
#[async_trait]
pub trait ResolutionApi: Send + Sync {
    /// None while the market is still unresolved.
    async fn check_resolution(
        &self,
        condition_id: &str,
    ) -> std::result::Result<Option<Resolution>, Error>;
}

pub struct GammaClient {
    client: Client,
    config: Config,
}

impl GammaClient {
    pub fn new(config: Config) -> Result<Self> {
        let client = Client::builder()
            .tcp_nodelay(true)
            .timeout(std::time::Duration::from_secs(15))
            .user_agent("updown-bot/0.1")
            .build()
            .context("Gamma HTTP client build failed")?;
        Ok(Self { client, config })
    }

    /// Scan active markets and return the 5m/15m Up/Down contracts for
    /// the configured assets, soonest close first.
    pub async fn scan_markets(&self) -> Result<Vec<Market>> {
        let url = format!("{}/markets", self.config.gamma_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("active", "true"),
                ("closed", "false"),
                ("archived", "false"),
                ("limit", "200"),
                ("_order", "endDate"),
                ("_asc", "true"),
            ])
            .send()
            .await
            .context("Gamma markets fetch failed")?;

        let raw: serde_json::Value = response.json().await.context("Gamma markets parse failed")?;
        let rows: Vec<GammaMarket> = match raw {
            serde_json::Value::Array(_) => serde_json::from_value(raw).unwrap_or_default(),
            serde_json::Value::Object(ref obj) => obj
                .get("data")
                .or_else(|| obj.get("markets"))
                .cloned()
                .map(|v| serde_json::from_value(v).unwrap_or_default())
                .unwrap_or_default(),
            _ => Vec::new(),
        };

        let mut results = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for row in rows {
            let Some(market) = self.classify(&row) else {
                continue;
            };
            if market.is_expired() || market.yes_token_id.is_empty() {
                continue;
            }
            if seen.insert(market.condition_id.clone()) {
                results.push(market);
            }
        }

        info!("Found {} active 5m/15m crypto markets", results.len());
        Ok(results)
    }

    /// Classify a raw row as a tradeable Up/Down market, or None.
    fn classify(&self, row: &GammaMarket) -> Option<Market> {
        let question_upper = row.question.to_uppercase();
        let question_lower = row.question.to_lowercase();
        let slug = row.slug.to_lowercase();

        let asset = self
            .config
            .assets
            .iter()
            .find(|a| question_upper.contains(a.as_str()) || slug.contains(&a.to_lowercase()))?
            .clone();

        let duration = DURATION_KEYWORDS.iter().find_map(|(d, keywords)| {
            if !self.config.market_types.contains(d) {
                return None;
            }
            keywords
                .iter()
                .any(|kw| question_lower.contains(kw) || slug.contains(kw))
                .then_some(*d)
        })?;

        // Direction is derived from the side being listed
        let direction = if question_upper.contains("UP") || slug.contains("up") {
            Direction::Up
        } else if question_upper.contains("DOWN") || slug.contains("down") {
            Direction::Down
        } else {
            return None;
        };

        let close_time = parse_end_date(row)?;

        let mut yes_token_id = String::new();
        let mut no_token_id = String::new();
        for token in &row.tokens {
            match token.outcome.to_uppercase().as_str() {
                "YES" => yes_token_id = token.token_id.clone(),
                "NO" => no_token_id = token.token_id.clone(),
                _ => {}
            }
        }

        Some(Market {
            condition_id: row.condition_id.clone(),
            question: row.question.clone(),
            slug: row.slug.clone(),
            asset,
            direction,
            duration,
            yes_token_id,
            no_token_id,
            close_time,
        })
    }
}

#[async_trait]
impl ResolutionApi for GammaClient {
    async fn check_resolution(
        &self,
        condition_id: &str,
    ) -> std::result::Result<Option<Resolution>, Error> {
        let url = format!("{}/markets", self.config.gamma_url);
        let response = self
            .client
            .get(&url)
            .query(&[("condition_ids", condition_id)])
            .send()
            .await?;

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Api(e.to_string()))?;
        let rows: Vec<GammaMarket> = match raw {
            serde_json::Value::Array(_) => serde_json::from_value(raw).unwrap_or_default(),
            serde_json::Value::Object(ref obj) => obj
                .get("data")
                .cloned()
                .map(|v| serde_json::from_value(v).unwrap_or_default())
                .unwrap_or_default(),
            _ => Vec::new(),
        };

        let Some(row) = rows.first() else {
            return Ok(None);
        };
        if !row.closed {
            return Ok(None);
        }

        // The winning token converges to $1 at settlement
        for token in &row.tokens {
            if token.price.unwrap_or(Decimal::ZERO) >= dec!(0.99) {
                return Ok(match token.outcome.to_uppercase().as_str() {
                    "YES" => Some(Resolution::Yes),
                    "NO" => Some(Resolution::No),
                    _ => None,
                });
            }
        }
        debug!("Market {} closed but winner not priced yet", condition_id);
        Ok(None)
    }
}

fn parse_end_date(row: &GammaMarket) -> Option<DateTime<Utc>> {
    let raw = row
        .end_date
        .as_deref()
        .or(row.end_date_iso.as_deref())?
        .replace('Z', "+00:00");
    DateTime::parse_from_rfc3339(&raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(question: &str, slug: &str, end_offset_secs: i64) -> GammaMarket {
        let end = Utc::now() + chrono::Duration::seconds(end_offset_secs);
        GammaMarket {
            condition_id: "0xabc".into(),
            question: question.into(),
            slug: slug.into(),
            end_date: Some(end.to_rfc3339()),
            end_date_iso: None,
            closed: false,
            tokens: vec![
                GammaToken {
                    token_id: "yes-token".into(),
                    outcome: "Yes".into(),
                    price: None,
                },
                GammaToken {
                    token_id: "no-token".into(),
                    outcome: "No".into(),
                    price: None,
                },
            ],
        }
    }

    fn client() -> GammaClient {
        GammaClient::new(Config::test_default()).unwrap()
    }

    #[test]
    fn classifies_five_minute_up_market() {
        let c = client();
        let m = c
            .classify(&row(
                "Will BTC go UP in the next 5 minutes?",
                "btc-up-5min-123",
                200,
            ))
            .expect("should classify");
        assert_eq!(m.asset, "BTC");
        assert_eq!(m.direction, Direction::Up);
        assert_eq!(m.duration, DurationClass::FiveMin);
        assert_eq!(m.yes_token_id, "yes-token");
        assert_eq!(m.no_token_id, "no-token");
    }

    #[test]
    fn classifies_fifteen_minute_down_market() {
        let c = client();
        let m = c
            .classify(&row(
                "Will ETH go DOWN in the next 15 minutes?",
                "eth-down-15min-456",
                800,
            ))
            .expect("should classify");
        assert_eq!(m.asset, "ETH");
        assert_eq!(m.direction, Direction::Down);
        assert_eq!(m.duration, DurationClass::FifteenMin);
    }

    #[test]
    fn rejects_unrelated_markets() {
        let c = client();
        assert!(c
            .classify(&row("Will it rain tomorrow?", "rain-tomorrow", 9000))
            .is_none());
        assert!(c
            .classify(&row(
                "Will BTC close above 100k this year?",
                "btc-yearly",
                9000,
            ))
            .is_none());
    }

    #[test]
    fn rejects_unconfigured_duration() {
        let mut cfg = Config::test_default();
        cfg.market_types = vec![DurationClass::FifteenMin];
        let c = GammaClient::new(cfg).unwrap();
        assert!(c
            .classify(&row(
                "Will BTC go UP in the next 5 minutes?",
                "btc-up-5min-123",
                200,
            ))
            .is_none());
    }
}
