//! Entry decision rules
//!
//! Pure and side-effect-free: given a quote, the seconds remaining, the
//! reference trend and the market direction, return ENTER or SKIP. All
//! I/O (fetching the quote, reading the tracker) happens in the caller.

use rust_decimal::Decimal;

use crate::config::Config;
use crate::types::{Direction, DurationClass, Quote, Trend};

/// Why a market was skipped this evaluation cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// More time left than the entry window for this duration class.
    TooEarly,
    /// At or past the close boundary (including the last-seconds guard).
    Closing,
    NoQuote,
    /// YES ask below the buy threshold: outcome not near-certain yet.
    PriceBelowThreshold,
    /// Ask at or above $1: book already settled or bogus.
    PriceAtCeiling,
    SpreadTooWide,
    /// Reference trend points against the market direction.
    TrendContradicts,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SkipReason::TooEarly => "too early",
            SkipReason::Closing => "market closing",
            SkipReason::NoQuote => "no quote",
            SkipReason::PriceBelowThreshold => "ask below buy threshold",
            SkipReason::PriceAtCeiling => "ask at $1",
            SkipReason::SpreadTooWide => "spread too wide",
            SkipReason::TrendContradicts => "reference trend contradicts direction",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryDecision {
    /// Rest a GTC limit order at the ask (maker-style, no crossing).
    Enter { price: Decimal, shares: Decimal },
    Skip(SkipReason),
}

/// Evaluate the entry rules in order. Deterministic.
pub fn decide(
    quote: &Quote,
    seconds_to_close: i64,
    trend: Trend,
    direction: Direction,
    duration: DurationClass,
    config: &Config,
) -> EntryDecision {
    if seconds_to_close > config.entry_window(duration) {
        return EntryDecision::Skip(SkipReason::TooEarly);
    }
    if seconds_to_close <= config.min_entry_seconds.max(0) {
        return EntryDecision::Skip(SkipReason::Closing);
    }

    let Some(ask) = quote.best_ask else {
        return EntryDecision::Skip(SkipReason::NoQuote);
    };
    if ask < config.buy_threshold {
        return EntryDecision::Skip(SkipReason::PriceBelowThreshold);
    }
    if ask >= Decimal::ONE {
        return EntryDecision::Skip(SkipReason::PriceAtCeiling);
    }

    if let Some(spread) = quote.spread() {
        if spread > config.max_spread {
            return EntryDecision::Skip(SkipReason::SpreadTooWide);
        }
    }

    if trend.contradicts(direction) {
        return EntryDecision::Skip(SkipReason::TrendContradicts);
    }

    let shares = (config.trade_size_usdc / ask).round_dp(2);
    EntryDecision::Enter { price: ask, shares }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn quote(bid: Decimal, ask: Decimal) -> Quote {
        Quote {
            best_bid: Some(bid),
            best_ask: Some(ask),
        }
    }

    fn cfg() -> Config {
        Config::test_default()
    }

    #[test]
    fn enters_inside_window_with_aligned_trend() {
        // window 120s, 90s left, ask 0.98, trend UP, direction UP
        let d = decide(
            &quote(dec!(0.96), dec!(0.98)),
            90,
            Trend::Up,
            Direction::Up,
            DurationClass::FiveMin,
            &cfg(),
        );
        assert_eq!(
            d,
            EntryDecision::Enter {
                price: dec!(0.98),
                shares: dec!(10.20),
            }
        );
    }

    #[test]
    fn too_early_regardless_of_price_and_trend() {
        for secs in [121, 300, 10_000] {
            let d = decide(
                &quote(dec!(0.97), dec!(0.99)),
                secs,
                Trend::Up,
                Direction::Up,
                DurationClass::FiveMin,
                &cfg(),
            );
            assert_eq!(d, EntryDecision::Skip(SkipReason::TooEarly));
        }
        // 15m window is wider: 250s left is fine there
        let d = decide(
            &quote(dec!(0.97), dec!(0.99)),
            250,
            Trend::Up,
            Direction::Up,
            DurationClass::FifteenMin,
            &cfg(),
        );
        assert!(matches!(d, EntryDecision::Enter { .. }));
    }

    #[test]
    fn closing_boundary_skips() {
        for secs in [0, -5, 3, 5] {
            let d = decide(
                &quote(dec!(0.97), dec!(0.99)),
                secs,
                Trend::Up,
                Direction::Up,
                DurationClass::FiveMin,
                &cfg(),
            );
            assert_eq!(d, EntryDecision::Skip(SkipReason::Closing));
        }
    }

    #[test]
    fn asks_below_threshold_always_skip() {
        for ask in [dec!(0.50), dec!(0.90), dec!(0.9699)] {
            let d = decide(
                &quote(ask - dec!(0.01), ask),
                60,
                Trend::Up,
                Direction::Up,
                DurationClass::FiveMin,
                &cfg(),
            );
            assert_eq!(d, EntryDecision::Skip(SkipReason::PriceBelowThreshold));
        }
    }

    #[test]
    fn ask_at_one_dollar_skips() {
        let d = decide(
            &quote(dec!(0.99), dec!(1.00)),
            60,
            Trend::Up,
            Direction::Up,
            DurationClass::FiveMin,
            &cfg(),
        );
        assert_eq!(d, EntryDecision::Skip(SkipReason::PriceAtCeiling));
    }

    #[test]
    fn trend_contradiction_skips() {
        let d = decide(
            &quote(dec!(0.97), dec!(0.99)),
            60,
            Trend::Down,
            Direction::Up,
            DurationClass::FiveMin,
            &cfg(),
        );
        assert_eq!(d, EntryDecision::Skip(SkipReason::TrendContradicts));

        let d = decide(
            &quote(dec!(0.97), dec!(0.99)),
            60,
            Trend::Up,
            Direction::Down,
            DurationClass::FiveMin,
            &cfg(),
        );
        assert_eq!(d, EntryDecision::Skip(SkipReason::TrendContradicts));
    }

    #[test]
    fn flat_trend_does_not_block() {
        let d = decide(
            &quote(dec!(0.97), dec!(0.98)),
            60,
            Trend::Flat,
            Direction::Down,
            DurationClass::FiveMin,
            &cfg(),
        );
        assert!(matches!(d, EntryDecision::Enter { .. }));
    }

    #[test]
    fn wide_spread_skips() {
        let d = decide(
            &quote(dec!(0.90), dec!(0.98)),
            60,
            Trend::Up,
            Direction::Up,
            DurationClass::FiveMin,
            &cfg(),
        );
        assert_eq!(d, EntryDecision::Skip(SkipReason::SpreadTooWide));
    }

    #[test]
    fn missing_quote_skips() {
        let d = decide(
            &Quote::default(),
            60,
            Trend::Up,
            Direction::Up,
            DurationClass::FiveMin,
            &cfg(),
        );
        assert_eq!(d, EntryDecision::Skip(SkipReason::NoQuote));
    }

    #[test]
    fn sizing_uses_configured_notional() {
        let d = decide(
            &quote(dec!(0.96), dec!(0.97)),
            60,
            Trend::Flat,
            Direction::Up,
            DurationClass::FiveMin,
            &cfg(),
        );
        match d {
            EntryDecision::Enter { price, shares } => {
                assert_eq!(price, dec!(0.97));
                // 10 / 0.97 rounded to 2dp
                assert_eq!(shares, dec!(10.31));
            }
            other => panic!("expected Enter, got {:?}", other),
        }
    }
}
