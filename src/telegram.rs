use anyhow::Result;
use chrono::Utc;
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::error;

use crate::config::Config;
use crate::types::{LedgerStats, Position, TradeRecord};

/// Telegram notification client. Sends are fire-and-forget: a failed
/// notification never fails the trading path.
pub struct TelegramNotifier {
    client: Client,
    bot_token: Option<String>,
    chat_id: Option<String>,
}

impl TelegramNotifier {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            bot_token: config.telegram_bot_token.clone(),
            chat_id: config.telegram_chat_id.clone(),
        }
    }

    /// Send an HTML-formatted message
    async fn send(&self, text: &str) -> Result<()> {
        let (Some(token), Some(chat_id)) = (&self.bot_token, &self.chat_id) else {
            return Ok(());
        };

        let url = format!("https://api.telegram.org/bot{}/sendMessage", token);
        let payload = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
        });

        match self.client.post(&url).json(&payload).send().await {
            Ok(resp) if !resp.status().is_success() => {
                error!("Telegram error: {}", resp.status());
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(e) => {
                error!("Telegram send failed: {}", e);
                Ok(()) // Don't fail the bot over notifications
            }
        }
    }

    pub async fn notify_startup(&self, config: &Config) {
        let assets = config.assets.join(", ");
        let types: Vec<&str> = config.market_types.iter().map(|t| t.as_str()).collect();
        let msg = format!(
            "🤖 <b>Up/Down Bot Started</b>\n\
             ━━━━━━━━━━━━━━\n\
             📊 Assets: {}\n\
             ⏱ Markets: {}\n\
             🎯 Buy threshold: ≥ {}¢\n\
             💵 Trade size: ${:.2} USDC\n\
             🧪 Mode: {}\n\
             ━━━━━━━━━━━━━━\n\
             ✅ Monitoring active...",
            assets,
            types.join(", "),
            config.buy_threshold * Decimal::from(100),
            config.trade_size_usdc,
            if config.dry_run { "DRY RUN" } else { "LIVE" },
        );
        let _ = self.send(&msg).await;
    }

    pub async fn notify_buy(&self, position: &Position, balance: Decimal) {
        let arrow = match position.direction {
            crate::types::Direction::Up => "📈 UP",
            crate::types::Direction::Down => "📉 DOWN",
        };
        let msg = format!(
            "🟢 <b>BUY</b> | {} {} - {}\n\
             📅 {}\n\
             ⏰ {} → {}\n\
             💰 {:.1}¢ / share | Size: <b>${:.2}</b>\n\
             💼 Balance: <b>${:.2}</b>",
            position.asset,
            arrow,
            position.duration.label(),
            position.label,
            position.entry_time.format("%H:%M:%S UTC"),
            position.close_time.format("%H:%M:%S UTC"),
            position.entry_price * Decimal::from(100),
            position.cost,
            balance,
        );
        let _ = self.send(&msg).await;
    }

    pub async fn notify_cutloss(&self, record: &TradeRecord, balance: Decimal) {
        let reason = record.cutloss_reason.as_deref().unwrap_or("unknown");
        let msg = format!(
            "🔴 <b>CUT LOSS</b> | {} {} - {}\n\
             📉 Reason: {}\n\
             💸 Buy: {:.1}¢ → Sell: {:.1}¢\n\
             ❌ Loss: <b>{:.2}¢</b> per share\n\
             💼 Balance: <b>${:.2}</b>",
            record.asset,
            record.direction.as_str(),
            record.duration.label(),
            reason,
            record.entry_price * Decimal::from(100),
            record.exit_price * Decimal::from(100),
            record.profit_cents_per_share(),
            balance,
        );
        let _ = self.send(&msg).await;
    }

    pub async fn notify_win(&self, record: &TradeRecord, balance: Decimal) {
        let msg = format!(
            "✅ <b>WIN</b> | Buy {} {} - {}\n\
             📅 {}\n\
             ⏰ {} → {}\n\
             💰 {:.1}¢ → $1.00\n\
             📈 Profit: <b>+{:.2}¢</b> per share\n\
             💼 Current Balance: <b>${:.2}</b>",
            record.direction.as_str(),
            record.asset,
            record.duration.label(),
            record.label,
            record.entry_time.format("%H:%M:%S UTC"),
            record.closed_at.format("%H:%M:%S UTC"),
            record.entry_price * Decimal::from(100),
            record.profit_cents_per_share(),
            balance,
        );
        let _ = self.send(&msg).await;
    }

    pub async fn notify_loss(&self, record: &TradeRecord, balance: Decimal) {
        let msg = format!(
            "❌ <b>LOSS</b> | Buy {} {} - {}\n\
             📅 {}\n\
             ⏰ {} → {}\n\
             💰 Paid: {:.1}¢ → resolved $0.00\n\
             📉 Loss: <b>{:.2}¢</b> per share\n\
             💼 Current Balance: <b>${:.2}</b>",
            record.direction.as_str(),
            record.asset,
            record.duration.label(),
            record.label,
            record.entry_time.format("%H:%M:%S UTC"),
            record.closed_at.format("%H:%M:%S UTC"),
            record.entry_price * Decimal::from(100),
            record.profit_cents_per_share(),
            balance,
        );
        let _ = self.send(&msg).await;
    }

    pub async fn notify_pending_resolution(&self, position: &Position) {
        let msg = format!(
            "⏳ <b>PENDING RESOLUTION</b> | {} {} - {}\n\
             📅 {}\n\
             Settlement still ambiguous past the grace period, \
             polling at reduced rate.",
            position.asset,
            position.direction.as_str(),
            position.duration.label(),
            position.label,
        );
        let _ = self.send(&msg).await;
    }

    pub async fn notify_status(&self, watched: usize, stats: &LedgerStats) {
        let sign = if stats.total_pnl >= Decimal::ZERO {
            "+"
        } else {
            ""
        };
        let msg = format!(
            "📊 <b>Status Update</b>\n\
             ━━━━━━━━━━━━━━\n\
             👁 Watching: {} markets\n\
             📂 Open positions: {}\n\
             🔢 Total trades: {}\n\
             🏆 Win rate: {:.1}%\n\
             💹 Total P&L: <b>{}{:.4} USDC</b>\n\
             💼 Balance: <b>${:.2}</b>\n\
             ⏰ {}",
            watched,
            stats.open,
            stats.total_trades,
            stats.win_rate,
            sign,
            stats.total_pnl,
            stats.balance,
            Utc::now().format("%Y-%m-%d %H:%M UTC"),
        );
        let _ = self.send(&msg).await;
    }

    pub async fn notify_error(&self, error_msg: &str) {
        let truncated: String = error_msg.chars().take(500).collect();
        let _ = self.send(&format!("⚠️ <b>BOT ERROR</b>\n{}", truncated)).await;
    }
}
