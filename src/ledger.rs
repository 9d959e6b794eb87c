//! Position ledger: the single source of truth for positions and
//! realized P&L, persisted to SQLite so a restart resumes open
//! positions.
//!
//! All mutation goes through one internal lock, which serializes
//! concurrent close attempts: the first terminal outcome for a position
//! wins, later ones get `InvalidState`.
//!
//! Prices and sizes are stored as TEXT to keep decimal exactness.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::info;

use crate::error::{Error, Result};
use crate::types::{
    CloseOutcome, Direction, DurationClass, LedgerStats, Position, PositionState, TradeRecord,
};

struct LedgerInner {
    conn: Connection,
    /// Open and pending positions by condition id.
    positions: HashMap<String, Position>,
    /// Every condition id ever entered, terminal ones included.
    entered: HashSet<String>,
    trades: Vec<TradeRecord>,
}

pub struct PositionLedger {
    inner: Mutex<LedgerInner>,
    starting_balance: Decimal,
}

impl PositionLedger {
    pub fn new<P: AsRef<Path>>(path: P, starting_balance: Decimal) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS positions (
                condition_id TEXT PRIMARY KEY,
                asset TEXT NOT NULL,
                direction TEXT NOT NULL,
                duration TEXT NOT NULL,
                label TEXT NOT NULL,
                yes_token_id TEXT NOT NULL,
                no_token_id TEXT NOT NULL,
                close_time TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                shares TEXT NOT NULL,
                cost TEXT NOT NULL,
                entry_time TEXT NOT NULL,
                reference_entry_price TEXT NOT NULL,
                state TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                condition_id TEXT NOT NULL,
                label TEXT NOT NULL,
                asset TEXT NOT NULL,
                direction TEXT NOT NULL,
                duration TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                shares TEXT NOT NULL,
                cost TEXT NOT NULL,
                exit_price TEXT NOT NULL,
                pnl TEXT NOT NULL,
                outcome TEXT NOT NULL,
                cutloss_reason TEXT,
                entry_time TEXT NOT NULL,
                closed_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_trades_closed_at ON trades(closed_at)",
            [],
        )?;

        let mut inner = LedgerInner {
            conn,
            positions: HashMap::new(),
            entered: HashSet::new(),
            trades: Vec::new(),
        };
        inner.load()?;

        info!(
            "Ledger loaded: {} open positions, {} past trades",
            inner.positions.len(),
            inner.trades.len()
        );

        Ok(Self {
            inner: Mutex::new(inner),
            starting_balance,
        })
    }

    /// Record a new position. Fails with `DuplicateMarket` when this
    /// market was ever entered before.
    pub fn open_position(&self, position: Position) -> Result<LedgerStats> {
        let mut inner = self.inner.lock();
        if inner.entered.contains(&position.condition_id) {
            return Err(Error::DuplicateMarket(position.condition_id));
        }

        inner.conn.execute(
            "INSERT INTO positions (
                condition_id, asset, direction, duration, label,
                yes_token_id, no_token_id, close_time, entry_price, shares,
                cost, entry_time, reference_entry_price, state
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                position.condition_id,
                position.asset,
                position.direction.as_str(),
                position.duration.as_str(),
                position.label,
                position.yes_token_id,
                position.no_token_id,
                position.close_time.to_rfc3339(),
                position.entry_price.to_string(),
                position.shares.to_string(),
                position.cost.to_string(),
                position.entry_time.to_rfc3339(),
                position.reference_entry_price.to_string(),
                position.state.as_str(),
            ],
        )?;

        inner.entered.insert(position.condition_id.clone());
        inner
            .positions
            .insert(position.condition_id.clone(), position);
        Ok(self.stats_locked(&inner))
    }

    /// Move an open position into the held sub-state used while
    /// settlement stays ambiguous.
    pub fn mark_pending_resolution(&self, condition_id: &str) -> Result<Position> {
        let mut inner = self.inner.lock();
        let position = inner
            .positions
            .get_mut(condition_id)
            .ok_or_else(|| Error::InvalidState(format!("{} is not held", condition_id)))?;
        if position.state != PositionState::Open {
            return Err(Error::InvalidState(format!(
                "{} is {}, not OPEN",
                condition_id,
                position.state.as_str()
            )));
        }
        position.state = PositionState::PendingResolution;
        let snapshot = position.clone();

        inner.conn.execute(
            "UPDATE positions SET state = ?1 WHERE condition_id = ?2",
            params![PositionState::PendingResolution.as_str(), condition_id],
        )?;
        Ok(snapshot)
    }

    /// Close a held position with its final outcome. Exactly one close
    /// succeeds per position; the position row and the appended trade
    /// record are written in one transaction.
    pub fn close_position(
        &self,
        condition_id: &str,
        outcome: CloseOutcome,
    ) -> Result<(TradeRecord, LedgerStats)> {
        let mut inner = self.inner.lock();
        let position = inner
            .positions
            .get(condition_id)
            .ok_or_else(|| Error::InvalidState(format!("{} is not held", condition_id)))?
            .clone();

        let (exit_price, pnl, state, cutloss_reason) = match outcome {
            CloseOutcome::Won => (
                Decimal::ONE,
                position.shares * (Decimal::ONE - position.entry_price),
                PositionState::Won,
                None,
            ),
            CloseOutcome::Lost => (Decimal::ZERO, -position.cost, PositionState::Lost, None),
            CloseOutcome::CutLoss { exit_price, reason } => (
                exit_price,
                position.shares * exit_price - position.cost,
                PositionState::CutLossExecuted,
                Some(reason),
            ),
        };

        let record = TradeRecord {
            condition_id: position.condition_id.clone(),
            label: position.label.clone(),
            asset: position.asset.clone(),
            direction: position.direction,
            duration: position.duration,
            entry_price: position.entry_price,
            shares: position.shares,
            cost: position.cost,
            exit_price,
            pnl,
            outcome: state,
            cutloss_reason,
            entry_time: position.entry_time,
            closed_at: Utc::now(),
        };

        let tx = inner.conn.transaction()?;
        tx.execute(
            "UPDATE positions SET state = ?1 WHERE condition_id = ?2",
            params![state.as_str(), condition_id],
        )?;
        tx.execute(
            "INSERT INTO trades (
                condition_id, label, asset, direction, duration, entry_price,
                shares, cost, exit_price, pnl, outcome, cutloss_reason,
                entry_time, closed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                record.condition_id,
                record.label,
                record.asset,
                record.direction.as_str(),
                record.duration.as_str(),
                record.entry_price.to_string(),
                record.shares.to_string(),
                record.cost.to_string(),
                record.exit_price.to_string(),
                record.pnl.to_string(),
                record.outcome.as_str(),
                record.cutloss_reason,
                record.entry_time.to_rfc3339(),
                record.closed_at.to_rfc3339(),
            ],
        )?;
        tx.commit()?;

        inner.positions.remove(condition_id);
        inner.trades.push(record.clone());

        info!(
            "Closed {} as {} (pnl {})",
            condition_id,
            record.outcome.as_str(),
            record.pnl
        );
        Ok((record, self.stats_locked(&inner)))
    }

    /// True when this market was ever entered (open or closed).
    pub fn already_traded(&self, condition_id: &str) -> bool {
        self.inner.lock().entered.contains(condition_id)
    }

    /// Snapshot of held positions (open and pending resolution).
    pub fn open_positions(&self) -> Vec<Position> {
        self.inner.lock().positions.values().cloned().collect()
    }

    pub fn stats(&self) -> LedgerStats {
        let inner = self.inner.lock();
        self.stats_locked(&inner)
    }

    fn stats_locked(&self, inner: &LedgerInner) -> LedgerStats {
        let mut stats = LedgerStats {
            open: inner.positions.len() as u32,
            ..LedgerStats::default()
        };
        let mut open_cost = Decimal::ZERO;
        for p in inner.positions.values() {
            open_cost += p.cost;
        }

        for t in &inner.trades {
            stats.total_trades += 1;
            stats.total_pnl += t.pnl;
            match t.outcome {
                PositionState::Won => stats.wins += 1,
                PositionState::Lost => stats.losses += 1,
                PositionState::CutLossExecuted => stats.cut_losses += 1,
                _ => {}
            }
        }
        if stats.total_trades > 0 {
            stats.win_rate = stats.wins as f64 / stats.total_trades as f64 * 100.0;
        }
        stats.balance = self.starting_balance + stats.total_pnl - open_cost;
        stats
    }
}

impl LedgerInner {
    fn load(&mut self) -> Result<()> {
        {
            let mut stmt = self.conn.prepare(
                "SELECT condition_id, asset, direction, duration, label,
                        yes_token_id, no_token_id, close_time, entry_price,
                        shares, cost, entry_time, reference_entry_price, state
                 FROM positions",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, String>(9)?,
                    row.get::<_, String>(10)?,
                    row.get::<_, String>(11)?,
                    row.get::<_, String>(12)?,
                    row.get::<_, String>(13)?,
                ))
            })?;

            for row in rows {
                let (cid, asset, dir, dur, label, yes_t, no_t, close, entry_p, shares, cost,
                    entry_t, ref_p, state) = row?;
                self.entered.insert(cid.clone());

                let Some(state) = PositionState::parse(&state) else {
                    continue;
                };
                if state.is_terminal() {
                    continue;
                }
                let position = Position {
                    condition_id: cid.clone(),
                    asset,
                    direction: Direction::parse(&dir).unwrap_or(Direction::Up),
                    duration: DurationClass::parse(&dur).unwrap_or(DurationClass::FiveMin),
                    label,
                    yes_token_id: yes_t,
                    no_token_id: no_t,
                    close_time: parse_time(&close),
                    entry_price: parse_decimal(&entry_p),
                    shares: parse_decimal(&shares),
                    cost: parse_decimal(&cost),
                    entry_time: parse_time(&entry_t),
                    reference_entry_price: parse_decimal(&ref_p),
                    state,
                };
                self.positions.insert(cid, position);
            }
        }

        let mut stmt = self.conn.prepare(
            "SELECT condition_id, label, asset, direction, duration,
                    entry_price, shares, cost, exit_price, pnl, outcome,
                    cutloss_reason, entry_time, closed_at
             FROM trades ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
                row.get::<_, String>(9)?,
                row.get::<_, String>(10)?,
                row.get::<_, Option<String>>(11)?,
                row.get::<_, String>(12)?,
                row.get::<_, String>(13)?,
            ))
        })?;

        for row in rows {
            let (cid, label, asset, dir, dur, entry_p, shares, cost, exit_p, pnl, outcome,
                reason, entry_t, closed) = row?;
            self.trades.push(TradeRecord {
                condition_id: cid,
                label,
                asset,
                direction: Direction::parse(&dir).unwrap_or(Direction::Up),
                duration: DurationClass::parse(&dur).unwrap_or(DurationClass::FiveMin),
                entry_price: parse_decimal(&entry_p),
                shares: parse_decimal(&shares),
                cost: parse_decimal(&cost),
                exit_price: parse_decimal(&exit_p),
                pnl: parse_decimal(&pnl),
                outcome: PositionState::parse(&outcome).unwrap_or(PositionState::Lost),
                cutloss_reason: reason,
                entry_time: parse_time(&entry_t),
                closed_at: parse_time(&closed),
            });
        }
        Ok(())
    }
}

fn parse_decimal(s: &str) -> Decimal {
    s.parse().unwrap_or_default()
}

fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn position(condition_id: &str) -> Position {
        Position {
            condition_id: condition_id.into(),
            asset: "BTC".into(),
            direction: Direction::Up,
            duration: DurationClass::FiveMin,
            label: "BTC Up or Down - 5 Minutes".into(),
            yes_token_id: "yes-token".into(),
            no_token_id: "no-token".into(),
            close_time: Utc::now() + chrono::Duration::seconds(90),
            entry_price: dec!(0.98),
            shares: dec!(10),
            cost: dec!(9.80),
            entry_time: Utc::now(),
            reference_entry_price: dec!(100000),
            state: PositionState::Open,
        }
    }

    fn ledger() -> PositionLedger {
        PositionLedger::new(":memory:", dec!(100)).unwrap()
    }

    #[test]
    fn win_pays_out_at_one_dollar() {
        let l = ledger();
        l.open_position(position("m1")).unwrap();

        let (record, stats) = l.close_position("m1", CloseOutcome::Won).unwrap();
        assert_eq!(record.exit_price, Decimal::ONE);
        // 10 shares * (1 - 0.98) = 0.20
        assert_eq!(record.pnl, dec!(0.20));
        assert_eq!(record.profit_cents_per_share(), dec!(2.00));
        assert_eq!(stats.wins, 1);
        assert_eq!(stats.balance, dec!(100.20));
        assert_eq!(stats.open, 0);
    }

    #[test]
    fn loss_forfeits_full_cost() {
        let l = ledger();
        l.open_position(position("m1")).unwrap();

        let (record, stats) = l.close_position("m1", CloseOutcome::Lost).unwrap();
        assert_eq!(record.pnl, dec!(-9.80));
        assert_eq!(stats.losses, 1);
        assert_eq!(stats.balance, dec!(90.20));
    }

    #[test]
    fn cutloss_pnl_uses_exit_price() {
        let l = ledger();
        l.open_position(position("m1")).unwrap();

        let (record, stats) = l
            .close_position(
                "m1",
                CloseOutcome::CutLoss {
                    exit_price: dec!(0.75),
                    reason: "book price below floor".into(),
                },
            )
            .unwrap();
        // 10 * 0.75 - 9.80 = -2.30
        assert_eq!(record.pnl, dec!(-2.30));
        assert_eq!(record.cutloss_reason.as_deref(), Some("book price below floor"));
        assert_eq!(stats.cut_losses, 1);
    }

    #[test]
    fn duplicate_entry_rejected_even_after_close() {
        let l = ledger();
        l.open_position(position("m1")).unwrap();
        assert!(matches!(
            l.open_position(position("m1")),
            Err(Error::DuplicateMarket(_))
        ));

        l.close_position("m1", CloseOutcome::Won).unwrap();
        assert!(l.already_traded("m1"));
        assert!(matches!(
            l.open_position(position("m1")),
            Err(Error::DuplicateMarket(_))
        ));
    }

    #[test]
    fn second_close_is_invalid_state() {
        let l = ledger();
        l.open_position(position("m1")).unwrap();
        l.close_position("m1", CloseOutcome::Won).unwrap();
        assert!(matches!(
            l.close_position("m1", CloseOutcome::Lost),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn pending_resolution_transition() {
        let l = ledger();
        l.open_position(position("m1")).unwrap();
        let p = l.mark_pending_resolution("m1").unwrap();
        assert_eq!(p.state, PositionState::PendingResolution);
        // Only valid from OPEN
        assert!(l.mark_pending_resolution("m1").is_err());
        // Still closeable
        l.close_position("m1", CloseOutcome::Won).unwrap();
    }

    #[test]
    fn balance_reserves_open_cost() {
        let l = ledger();
        l.open_position(position("m1")).unwrap();
        let stats = l.stats();
        assert_eq!(stats.open, 1);
        assert_eq!(stats.balance, dec!(90.20));
    }

    #[test]
    fn persists_across_reopen() {
        let path = std::env::temp_dir().join(format!(
            "updown-ledger-test-{}-{}.db",
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or(0)
        ));

        {
            let l = PositionLedger::new(&path, dec!(100)).unwrap();
            l.open_position(position("m1")).unwrap();
            l.open_position(position("m2")).unwrap();
            l.close_position("m2", CloseOutcome::Won).unwrap();
        }

        let l = PositionLedger::new(&path, dec!(100)).unwrap();
        let open = l.open_positions();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].condition_id, "m1");
        assert_eq!(open[0].entry_price, dec!(0.98));
        assert!(l.already_traded("m2"));
        let stats = l.stats();
        assert_eq!(stats.total_trades, 1);
        assert_eq!(stats.wins, 1);

        let _ = std::fs::remove_file(&path);
    }
}
