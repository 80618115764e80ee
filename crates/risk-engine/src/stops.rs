//! Dynamic stop-loss management with a no-retreat ratchet.
//!
//! Two strategies recompute protective stops for every open position each
//! cycle: a fixed trailing distance behind the current price, and a simple
//! moving average offset by a margin. Both enforce the same invariant: a
//! long position's stop never moves down, a short's never moves up.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use terminal_core::types::{Position, PositionSide, Timeframe};
use terminal_core::{Error, Result, Terminal};
use tracing::{debug, info, warn};

/// Reference timeframe for the SMA-anchored strategy.
pub const SMA_TIMEFRAME: Timeframe = Timeframe::H1;

/// A stop-loss modification the terminal accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopUpdate {
    pub ticket: u64,
    pub symbol: String,
    /// Stop level before the modification, if one existed.
    pub previous: Option<Decimal>,
    pub new_stop: Decimal,
}

/// Recomputes protective stops for open positions.
pub struct StopManager {
    terminal: Arc<dyn Terminal>,
}

impl StopManager {
    pub fn new(terminal: Arc<dyn Terminal>) -> Self {
        Self { terminal }
    }

    /// Trail every open position's stop a fixed number of points behind the
    /// current price. A position with no stop yet is anchored to its open
    /// price instead, so the first stop is never placed tighter than the
    /// entry implied.
    ///
    /// Returns the modifications the terminal accepted. Positions whose
    /// market data is unavailable, or whose modification is rejected, are
    /// skipped and retried on the next cycle.
    pub async fn sl_follower(&self, pips: u32) -> Result<Vec<StopUpdate>> {
        if pips == 0 {
            return Err(Error::Config {
                message: "stop distance must be positive".to_string(),
            });
        }

        let positions = self.terminal.open_positions(None).await?;
        if positions.is_empty() {
            debug!("No open positions to trail");
            return Ok(Vec::new());
        }

        let mut updates = Vec::new();
        for position in &positions {
            let Some(point) = self.point_for(position).await else {
                continue;
            };
            let distance = Decimal::from(pips) * point;

            // Anchor to the open price until the first stop exists.
            let anchor = if position.stop_loss.is_none() {
                position.price_open
            } else {
                position.price_current
            };
            let candidate = match position.side {
                PositionSide::Long => anchor - distance,
                PositionSide::Short => anchor + distance,
            };

            self.apply(position, ratchet(position, candidate), &mut updates)
                .await;
        }
        Ok(updates)
    }

    /// Anchor every open position's stop to a simple moving average of
    /// recent H1 closes, offset by a margin in the unfavorable direction.
    pub async fn sl_sma(&self, pips: u32, periods: usize) -> Result<Vec<StopUpdate>> {
        if pips == 0 || periods == 0 {
            return Err(Error::Config {
                message: "stop distance and SMA periods must be positive".to_string(),
            });
        }

        let positions = self.terminal.open_positions(None).await?;
        if positions.is_empty() {
            debug!("No open positions to trail");
            return Ok(Vec::new());
        }

        let mut updates = Vec::new();
        for position in &positions {
            let Some(point) = self.point_for(position).await else {
                continue;
            };

            let candles = match self
                .terminal
                .price_series(&position.symbol, SMA_TIMEFRAME, periods)
                .await
            {
                Ok(candles) if candles.len() >= periods => candles,
                Ok(candles) => {
                    warn!(
                        ticket = position.ticket,
                        symbol = %position.symbol,
                        got = candles.len(),
                        needed = periods,
                        "Skipping position; not enough history for the SMA"
                    );
                    continue;
                }
                Err(error) => {
                    warn!(
                        ticket = position.ticket,
                        symbol = %position.symbol,
                        error = %error,
                        "Skipping position; price history unavailable"
                    );
                    continue;
                }
            };

            let window = &candles[candles.len() - periods..];
            let sma: Decimal =
                window.iter().map(|c| c.close).sum::<Decimal>() / Decimal::from(periods);
            debug!(
                ticket = position.ticket,
                symbol = %position.symbol,
                sma = %sma,
                "SMA anchor computed"
            );

            let distance = Decimal::from(pips) * point;
            let candidate = match position.side {
                PositionSide::Long => sma - distance,
                PositionSide::Short => sma + distance,
            };

            self.apply(position, ratchet(position, candidate), &mut updates)
                .await;
        }
        Ok(updates)
    }

    async fn point_for(&self, position: &Position) -> Option<Decimal> {
        match self.terminal.symbol_point(&position.symbol).await {
            Ok(point) => Some(point),
            Err(error) => {
                warn!(
                    ticket = position.ticket,
                    symbol = %position.symbol,
                    error = %error,
                    "Skipping position; point value unavailable"
                );
                None
            }
        }
    }

    /// Issue the modification only when the target differs from the stored
    /// stop. A rejection is logged and retried next cycle with a freshly
    /// computed candidate.
    async fn apply(&self, position: &Position, target: Decimal, updates: &mut Vec<StopUpdate>) {
        if position.stop_loss == Some(target) {
            debug!(ticket = position.ticket, "Stop unchanged");
            return;
        }

        match self.terminal.modify_stop_loss(position.ticket, target).await {
            Ok(()) => {
                info!(
                    ticket = position.ticket,
                    symbol = %position.symbol,
                    previous = ?position.stop_loss,
                    new_stop = %target,
                    "Stop loss updated"
                );
                updates.push(StopUpdate {
                    ticket: position.ticket,
                    symbol: position.symbol.clone(),
                    previous: position.stop_loss,
                    new_stop: target,
                });
            }
            Err(error) => {
                warn!(
                    ticket = position.ticket,
                    error = %error,
                    "Stop modification rejected; retrying next cycle"
                );
            }
        }
    }
}

/// Clamp a candidate stop so it never moves against the position: up-only
/// for longs, down-only for shorts.
fn ratchet(position: &Position, candidate: Decimal) -> Decimal {
    match (position.side, position.stop_loss) {
        (PositionSide::Long, Some(current)) if candidate < current => current,
        (PositionSide::Short, Some(current)) if candidate > current => current,
        _ => candidate,
    }
}
