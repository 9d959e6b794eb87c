/// Automated trading engine for 5m/15m Up/Down crypto markets
///
/// This library provides the components of a near-expiry momentum
/// strategy on Polymarket's short-duration binary markets: buy the YES
/// side once it trades at or above a high-confidence threshold inside
/// the final entry window, hold to resolution, and cut the loss early
/// if the book or the reference price turns against the position.

pub mod clob;
pub mod config;
pub mod decision;
pub mod error;
pub mod events;
pub mod gamma;
pub mod ledger;
pub mod monitor;
pub mod order_manager;
pub mod price_feed;
pub mod retry;
pub mod telegram;
pub mod types;
pub mod watcher;
