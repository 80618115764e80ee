//! Error types for the terminal interface and risk engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The terminal could not supply a fresh account snapshot. Protection
    /// predicates must fail closed rather than read last-known state.
    #[error("Stale account state: {0}")]
    StaleState(String),

    /// Market data for a single symbol is unavailable. The affected
    /// predicate or position is skipped; the cycle continues.
    #[error("Market data unavailable for {symbol}: {message}")]
    PartialData { symbol: String, message: String },

    /// The terminal rejected a stop-loss modification. The position is
    /// retried on the next cycle with a freshly computed candidate.
    #[error("Stop-loss modification rejected for ticket {ticket}: {message}")]
    ModifyRejected { ticket: u64, message: String },

    /// Invalid threshold or period supplied at construction time.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Terminal connectivity or protocol failure.
    #[error("Terminal error: {0}")]
    Terminal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
