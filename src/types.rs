use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Market direction: which side of the Up/Down pair we are evaluating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "UP",
            Direction::Down => "DOWN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "UP" => Some(Direction::Up),
            "DOWN" => Some(Direction::Down),
            _ => None,
        }
    }
}

/// Contract duration class. The entry window depends on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DurationClass {
    FiveMin,
    FifteenMin,
}

impl DurationClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DurationClass::FiveMin => "5m",
            DurationClass::FifteenMin => "15m",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DurationClass::FiveMin => "5 Minutes",
            DurationClass::FifteenMin => "15 Minutes",
        }
    }

    pub fn seconds(&self) -> i64 {
        match self {
            DurationClass::FiveMin => 300,
            DurationClass::FifteenMin => 900,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "5m" => Some(DurationClass::FiveMin),
            "15m" => Some(DurationClass::FifteenMin),
            _ => None,
        }
    }
}

/// An active 5m/15m Up/Down market discovered via the Gamma API.
/// Immutable once discovered; expires at `close_time`.
#[derive(Debug, Clone)]
pub struct Market {
    pub condition_id: String,
    pub question: String,
    pub slug: String,
    pub asset: String,
    pub direction: Direction,
    pub duration: DurationClass,
    pub yes_token_id: String,
    pub no_token_id: String,
    pub close_time: DateTime<Utc>,
}

impl Market {
    pub fn seconds_to_close(&self) -> i64 {
        (self.close_time - Utc::now()).num_seconds()
    }

    pub fn is_expired(&self) -> bool {
        self.seconds_to_close() <= 0
    }

    pub fn label(&self) -> String {
        format!("{} Up or Down - {}", self.asset, self.duration.label())
    }
}

/// Best bid/ask for the YES token at a point in time. Transient.
#[derive(Debug, Clone, Copy, Default)]
pub struct Quote {
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
}

impl Quote {
    pub fn spread(&self) -> Option<Decimal> {
        Some(self.best_ask? - self.best_bid?)
    }
}

/// Short-horizon trend of the reference price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Up,
    Down,
    Flat,
}

impl Trend {
    /// True when the trend points against the given market direction.
    pub fn contradicts(&self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (Trend::Down, Direction::Up) | (Trend::Up, Direction::Down)
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

/// Order lifecycle states as reported by the CLOB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderState {
    Pending,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderState::Filled | OrderState::Cancelled | OrderState::Rejected
        )
    }
}

/// Fill status snapshot for a submitted order.
#[derive(Debug, Clone)]
pub struct OrderStatus {
    pub state: OrderState,
    pub filled_price: Option<Decimal>,
    pub filled_size: Option<Decimal>,
}

/// A confirmed (possibly partial) fill.
#[derive(Debug, Clone)]
pub struct Fill {
    pub order_id: String,
    pub price: Decimal,
    pub size: Decimal,
    pub time: DateTime<Utc>,
}

/// Settlement outcome of a binary market.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Yes,
    No,
}

/// Position lifecycle. `PendingResolution` is the held sub-state used
/// when settlement stays ambiguous past the grace period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionState {
    Open,
    PendingResolution,
    Won,
    Lost,
    CutLossExecuted,
}

impl PositionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionState::Open => "OPEN",
            PositionState::PendingResolution => "PENDING_RESOLUTION",
            PositionState::Won => "WON",
            PositionState::Lost => "LOST",
            PositionState::CutLossExecuted => "CUTLOSS",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OPEN" => Some(PositionState::Open),
            "PENDING_RESOLUTION" => Some(PositionState::PendingResolution),
            "WON" => Some(PositionState::Won),
            "LOST" => Some(PositionState::Lost),
            "CUTLOSS" => Some(PositionState::CutLossExecuted),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PositionState::Won | PositionState::Lost | PositionState::CutLossExecuted
        )
    }
}

/// An entered trade being held to resolution (or cut loss).
#[derive(Debug, Clone)]
pub struct Position {
    pub condition_id: String,
    pub asset: String,
    pub direction: Direction,
    pub duration: DurationClass,
    pub label: String,
    pub yes_token_id: String,
    pub no_token_id: String,
    pub close_time: DateTime<Utc>,
    /// Actual reported fill price, not necessarily the quoted ask.
    pub entry_price: Decimal,
    pub shares: Decimal,
    /// USDC committed at entry.
    pub cost: Decimal,
    pub entry_time: DateTime<Utc>,
    /// Reference (Binance) price at entry, for the cut-loss trigger.
    pub reference_entry_price: Decimal,
    pub state: PositionState,
}

impl Position {
    pub fn seconds_to_close(&self) -> i64 {
        (self.close_time - Utc::now()).num_seconds()
    }
}

/// How a position was closed.
#[derive(Debug, Clone)]
pub enum CloseOutcome {
    /// YES settled $1.00: pnl = shares * (1 - entry_price)
    Won,
    /// YES settled $0.00: pnl = -cost
    Lost,
    /// Early exit: pnl = shares * exit_price - cost
    CutLoss { exit_price: Decimal, reason: String },
}

/// Archived closed position with realized P&L. Append-only.
#[derive(Debug, Clone)]
pub struct TradeRecord {
    pub condition_id: String,
    pub label: String,
    pub asset: String,
    pub direction: Direction,
    pub duration: DurationClass,
    pub entry_price: Decimal,
    pub shares: Decimal,
    pub cost: Decimal,
    pub exit_price: Decimal,
    pub pnl: Decimal,
    pub outcome: PositionState,
    pub cutloss_reason: Option<String>,
    pub entry_time: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}

impl TradeRecord {
    /// Profit in cents per share, as shown in notifications.
    pub fn profit_cents_per_share(&self) -> Decimal {
        (self.exit_price - self.entry_price) * Decimal::from(100)
    }
}

/// Aggregate statistics folded over the trade record sequence.
#[derive(Debug, Clone, Default)]
pub struct LedgerStats {
    pub total_trades: u32,
    pub open: u32,
    pub wins: u32,
    pub losses: u32,
    pub cut_losses: u32,
    pub win_rate: f64,
    pub total_pnl: Decimal,
    pub balance: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn trend_contradiction() {
        assert!(Trend::Down.contradicts(Direction::Up));
        assert!(Trend::Up.contradicts(Direction::Down));
        assert!(!Trend::Flat.contradicts(Direction::Up));
        assert!(!Trend::Up.contradicts(Direction::Up));
    }

    #[test]
    fn quote_spread() {
        let q = Quote {
            best_bid: Some(dec!(0.95)),
            best_ask: Some(dec!(0.98)),
        };
        assert_eq!(q.spread(), Some(dec!(0.03)));
        assert_eq!(Quote::default().spread(), None);
    }

    #[test]
    fn position_state_round_trip() {
        for s in [
            PositionState::Open,
            PositionState::PendingResolution,
            PositionState::Won,
            PositionState::Lost,
            PositionState::CutLossExecuted,
        ] {
            assert_eq!(PositionState::parse(s.as_str()), Some(s));
        }
        assert!(PositionState::Won.is_terminal());
        assert!(!PositionState::PendingResolution.is_terminal());
    }
}
