//! Open-position and closed-deal types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

/// An open position as reported by the terminal.
///
/// Owned by the terminal; the engine only reads it and issues stop-loss
/// modification requests against the ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Terminal-assigned unique identifier.
    pub ticket: u64,
    pub symbol: String,
    pub side: PositionSide,
    /// Position size in lots.
    pub volume: Decimal,
    pub price_open: Decimal,
    pub price_current: Decimal,
    /// Protective stop level. `None` when the position has no stop set
    /// (terminals report this as a zero price).
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    /// Floating profit of this position.
    pub profit: Decimal,
}

impl Position {
    /// New position with current price at the open and no stops attached.
    pub fn new(
        ticket: u64,
        symbol: impl Into<String>,
        side: PositionSide,
        volume: Decimal,
        price_open: Decimal,
    ) -> Self {
        Self {
            ticket,
            symbol: symbol.into(),
            side,
            volume,
            price_open,
            price_current: price_open,
            stop_loss: None,
            take_profit: None,
            profit: Decimal::ZERO,
        }
    }

    pub fn is_long(&self) -> bool {
        self.side == PositionSide::Long
    }
}

/// A historical closed deal, used for losing-streak detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedDeal {
    pub ticket: u64,
    pub symbol: String,
    /// Realized profit of the deal; negative for a loss.
    pub profit: Decimal,
    pub closed_at: DateTime<Utc>,
}
