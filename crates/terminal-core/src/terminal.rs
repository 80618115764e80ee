//! Abstract terminal interface and an in-memory fake.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::types::{AccountSnapshot, Candle, ClosedDeal, Position, Timeframe};

/// Abstract operations the engine needs from the broker/terminal connection.
///
/// The concrete wire protocol is an adapter concern; the engine only ever
/// talks to this trait.
#[async_trait]
pub trait Terminal: Send + Sync {
    /// Fresh account snapshot for this poll cycle.
    async fn account_snapshot(&self) -> Result<AccountSnapshot>;

    /// Currently open positions, optionally filtered by symbol.
    async fn open_positions(&self, symbol: Option<&str>) -> Result<Vec<Position>>;

    /// Closed deals within the given time range.
    async fn closed_deals(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ClosedDeal>>;

    /// The most recent `count` bars for a symbol, oldest first.
    async fn price_series(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Candle>>;

    /// Move a position's protective stop to a new level.
    async fn modify_stop_loss(&self, ticket: u64, new_sl: Decimal) -> Result<()>;

    /// Minimum price increment for a symbol (the "point" value).
    async fn symbol_point(&self, symbol: &str) -> Result<Decimal>;
}

/// Default point value used by [`MemoryTerminal`] when none is configured.
const DEFAULT_POINT: Decimal = Decimal::from_parts(1, 0, 0, false, 4);

#[derive(Default)]
struct MemoryState {
    snapshot: Option<AccountSnapshot>,
    positions: Vec<Position>,
    deals: Vec<ClosedDeal>,
    series: HashMap<(String, Timeframe), Vec<Candle>>,
    points: HashMap<String, Decimal>,
    failing_symbols: HashSet<String>,
    fail_positions: bool,
    reject_modifies: bool,
    modifications: Vec<(u64, Decimal)>,
}

/// In-memory terminal for tests and simulations.
///
/// Holds a snapshot, positions, deal history, and per-symbol price series
/// behind setters, and records every stop-loss modification it accepts.
/// Individual symbols can be made to fail to exercise partial-data paths.
#[derive(Default)]
pub struct MemoryTerminal {
    state: RwLock<MemoryState>,
}

impl MemoryTerminal {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_snapshot(&self, snapshot: AccountSnapshot) {
        self.state.write().await.snapshot = Some(snapshot);
    }

    /// Remove the snapshot so the next fetch fails with `StaleState`.
    pub async fn clear_snapshot(&self) {
        self.state.write().await.snapshot = None;
    }

    pub async fn set_positions(&self, positions: Vec<Position>) {
        self.state.write().await.positions = positions;
    }

    pub async fn set_deals(&self, deals: Vec<ClosedDeal>) {
        self.state.write().await.deals = deals;
    }

    pub async fn set_series(&self, symbol: &str, timeframe: Timeframe, candles: Vec<Candle>) {
        self.state
            .write()
            .await
            .series
            .insert((symbol.to_string(), timeframe), candles);
    }

    pub async fn set_point(&self, symbol: &str, point: Decimal) {
        self.state.write().await.points.insert(symbol.to_string(), point);
    }

    /// Make price and point lookups fail for a symbol.
    pub async fn fail_symbol(&self, symbol: &str) {
        self.state
            .write()
            .await
            .failing_symbols
            .insert(symbol.to_string());
    }

    /// Make `open_positions` fail.
    pub async fn fail_positions(&self, fail: bool) {
        self.state.write().await.fail_positions = fail;
    }

    /// Reject every subsequent stop-loss modification.
    pub async fn reject_modifies(&self, reject: bool) {
        self.state.write().await.reject_modifies = reject;
    }

    /// Stop-loss modifications accepted so far, in order.
    pub async fn modifications(&self) -> Vec<(u64, Decimal)> {
        self.state.read().await.modifications.clone()
    }

    /// Current view of a position by ticket.
    pub async fn position(&self, ticket: u64) -> Option<Position> {
        self.state
            .read()
            .await
            .positions
            .iter()
            .find(|p| p.ticket == ticket)
            .cloned()
    }

    /// Move a position's current price, as a live tick would.
    pub async fn set_price(&self, ticket: u64, price: Decimal) {
        let mut state = self.state.write().await;
        if let Some(position) = state.positions.iter_mut().find(|p| p.ticket == ticket) {
            position.price_current = price;
        }
    }
}

#[async_trait]
impl Terminal for MemoryTerminal {
    async fn account_snapshot(&self) -> Result<AccountSnapshot> {
        self.state
            .read()
            .await
            .snapshot
            .clone()
            .ok_or_else(|| Error::StaleState("no snapshot available".to_string()))
    }

    async fn open_positions(&self, symbol: Option<&str>) -> Result<Vec<Position>> {
        let state = self.state.read().await;
        if state.fail_positions {
            return Err(Error::Terminal("position list unavailable".to_string()));
        }
        Ok(state
            .positions
            .iter()
            .filter(|p| symbol.is_none_or(|s| p.symbol == s))
            .cloned()
            .collect())
    }

    async fn closed_deals(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ClosedDeal>> {
        let state = self.state.read().await;
        Ok(state
            .deals
            .iter()
            .filter(|d| d.closed_at >= from && d.closed_at <= to)
            .cloned()
            .collect())
    }

    async fn price_series(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Candle>> {
        let state = self.state.read().await;
        if state.failing_symbols.contains(symbol) {
            return Err(Error::PartialData {
                symbol: symbol.to_string(),
                message: "no price history".to_string(),
            });
        }
        let candles = state
            .series
            .get(&(symbol.to_string(), timeframe))
            .ok_or_else(|| Error::PartialData {
                symbol: symbol.to_string(),
                message: "no price history".to_string(),
            })?;
        let skip = candles.len().saturating_sub(count);
        Ok(candles[skip..].to_vec())
    }

    async fn modify_stop_loss(&self, ticket: u64, new_sl: Decimal) -> Result<()> {
        let mut state = self.state.write().await;
        if state.reject_modifies {
            return Err(Error::ModifyRejected {
                ticket,
                message: "rejected by terminal".to_string(),
            });
        }
        let Some(position) = state.positions.iter_mut().find(|p| p.ticket == ticket) else {
            return Err(Error::ModifyRejected {
                ticket,
                message: "unknown ticket".to_string(),
            });
        };
        position.stop_loss = Some(new_sl);
        state.modifications.push((ticket, new_sl));
        Ok(())
    }

    async fn symbol_point(&self, symbol: &str) -> Result<Decimal> {
        let state = self.state.read().await;
        if state.failing_symbols.contains(symbol) {
            return Err(Error::PartialData {
                symbol: symbol.to_string(),
                message: "symbol info unavailable".to_string(),
            });
        }
        Ok(state.points.get(symbol).copied().unwrap_or(DEFAULT_POINT))
    }
}
