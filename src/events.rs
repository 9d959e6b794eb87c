//! Trade event bus
//!
//! Components publish lifecycle events; a single dispatcher task
//! forwards them to the Telegram notifier. Publishing never blocks and
//! never fails the trading path: if the dispatcher is gone the event is
//! dropped with a warning.

use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::Config;
use crate::telegram::TelegramNotifier;
use crate::types::{LedgerStats, Position, TradeRecord};

#[derive(Debug, Clone)]
pub enum TradeEvent {
    Started,
    PositionOpened {
        position: Position,
        balance: Decimal,
    },
    PositionWon {
        record: TradeRecord,
        balance: Decimal,
    },
    PositionLost {
        record: TradeRecord,
        balance: Decimal,
    },
    CutLossExecuted {
        record: TradeRecord,
        balance: Decimal,
    },
    SettlementPending {
        position: Position,
    },
    Status {
        watched: usize,
        stats: LedgerStats,
    },
    EngineError {
        message: String,
    },
}

/// Cloneable publishing handle.
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::UnboundedSender<TradeEvent>,
}

impl EventBus {
    pub fn publish(&self, event: TradeEvent) {
        if self.tx.send(event).is_err() {
            warn!("Event dispatcher gone, dropping event");
        }
    }
}

/// Create the bus and spawn the dispatcher task.
pub fn spawn_dispatcher(config: &Config) -> EventBus {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let notifier = Arc::new(TelegramNotifier::new(config));
    let config = config.clone();

    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            dispatch(&notifier, &config, event).await;
        }
        info!("Event dispatcher stopped");
    });

    EventBus { tx }
}

async fn dispatch(notifier: &TelegramNotifier, config: &Config, event: TradeEvent) {
    match event {
        TradeEvent::Started => notifier.notify_startup(config).await,
        TradeEvent::PositionOpened { position, balance } => {
            notifier.notify_buy(&position, balance).await
        }
        TradeEvent::PositionWon { record, balance } => notifier.notify_win(&record, balance).await,
        TradeEvent::PositionLost { record, balance } => {
            notifier.notify_loss(&record, balance).await
        }
        TradeEvent::CutLossExecuted { record, balance } => {
            notifier.notify_cutloss(&record, balance).await
        }
        TradeEvent::SettlementPending { position } => {
            notifier.notify_pending_resolution(&position).await
        }
        TradeEvent::Status { watched, stats } => notifier.notify_status(watched, &stats).await,
        TradeEvent::EngineError { message } => notifier.notify_error(&message).await,
    }
}
