use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use updown_bot::clob::ClobClient;
use updown_bot::config::Config;
use updown_bot::events::{spawn_dispatcher, TradeEvent};
use updown_bot::gamma::GammaClient;
use updown_bot::ledger::PositionLedger;
use updown_bot::monitor::CutLossMonitor;
use updown_bot::order_manager::OrderLifecycleManager;
use updown_bot::price_feed::{spawn_reference_feeds, ReferencePriceTracker};
use updown_bot::watcher::MarketWatcher;

#[tokio::main]
async fn main() -> Result<()> {
    // Load config
    let config = Config::from_env()?;
    config.validate()?;

    // Setup logging
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(match config.log_level.as_str() {
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("╔═══════════════════════════════════════╗");
    info!("║     Up/Down 5m/15m Trading Bot        ║");
    info!("╠═══════════════════════════════════════╣");
    info!("║ Mode: {:31} ║", if config.dry_run { "DRY RUN (no real orders)" } else { "LIVE TRADING" });
    info!("║ Assets: {:29} ║", config.assets.join(", "));
    info!("║ Buy threshold: {:22} ║", config.buy_threshold.to_string());
    info!("║ Trade size: ${:24} ║", config.trade_size_usdc.to_string());
    info!("╚═══════════════════════════════════════╝");

    // Core components
    let events = spawn_dispatcher(&config);
    let ledger = Arc::new(PositionLedger::new(&config.db_path, config.starting_balance)?);
    let tracker = Arc::new(ReferencePriceTracker::from_config(&config));
    let api = Arc::new(ClobClient::new(config.clone())?);
    let gamma = Arc::new(GammaClient::new(config.clone())?);
    let orders = Arc::new(OrderLifecycleManager::new(api.clone(), config.clone()));
    let monitor = Arc::new(CutLossMonitor::new(
        api.clone(),
        gamma.clone(),
        tracker.clone(),
        ledger.clone(),
        events.clone(),
        config.clone(),
    ));

    // Preflight: one discovery round-trip before anything trades
    info!("Preflight: checking market discovery...");
    match gamma.scan_markets().await {
        Ok(markets) => info!("Preflight OK, {} tradeable markets visible", markets.len()),
        Err(e) => warn!("Preflight discovery failed (will keep retrying): {}", e),
    }

    // Reference price feeds
    spawn_reference_feeds(tracker.clone(), &config);

    events.publish(TradeEvent::Started);

    // Resume monitors for positions held across the restart
    let held = ledger.open_positions();
    if !held.is_empty() {
        info!("Resuming {} held positions", held.len());
        for position in held {
            monitor.clone().spawn(position);
        }
    }

    // Discovery and entry
    let watcher = Arc::new(MarketWatcher::new(
        gamma,
        api,
        orders,
        tracker,
        ledger.clone(),
        monitor,
        events.clone(),
        config.clone(),
    ));
    tokio::spawn(watcher.clone().run_scanner());

    // Hourly status updates
    {
        let watcher = watcher.clone();
        let ledger = ledger.clone();
        let events = events.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                events.publish(TradeEvent::Status {
                    watched: watcher.watched_count(),
                    stats: ledger.stats(),
                });
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    let stats = ledger.stats();
    info!(
        "Session stats: {} trades, {} wins, {} losses, {} cut losses, pnl {}, balance {}",
        stats.total_trades, stats.wins, stats.losses, stats.cut_losses, stats.total_pnl, stats.balance
    );
    events.publish(TradeEvent::Status {
        watched: watcher.watched_count(),
        stats,
    });
    // Let the dispatcher flush the final notification
    tokio::time::sleep(Duration::from_secs(2)).await;

    Ok(())
}
