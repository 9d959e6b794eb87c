use thiserror::Error;

/// Error taxonomy for the trading engine.
///
/// `Api` is the only transient variant: callers retry it with bounded
/// backoff and abandon the affected market cycle when the budget runs
/// out. Everything else is a contract violation or a terminal condition
/// for the current cycle and is surfaced immediately.
#[derive(Debug, Error)]
pub enum Error {
    /// Network / rate-limit / upstream 5xx. Retryable.
    #[error("api error: {0}")]
    Api(String),

    /// Programming-contract violation (e.g. closing a position that is
    /// not open). Never retried.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// An OPEN position already exists for this market.
    #[error("open position already exists for market {0}")]
    DuplicateMarket(String),

    /// Entry window or close boundary passed mid-decision. Treated as
    /// SKIP by callers, not as a failure.
    #[error("market expired: {0}")]
    MarketExpired(String),

    /// Resolution query returned neither YES nor NO past the expected
    /// settlement time. Retried on a slower cadence.
    #[error("settlement ambiguous for market {0}")]
    SettlementAmbiguous(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl Error {
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Api(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Api(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
