//! Account snapshot type.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Point-in-time view of the trading account.
///
/// Produced fresh by the terminal on every poll cycle and folded into the
/// engine's rolling state. Immutable once captured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    /// Realized account balance.
    pub balance: Decimal,
    /// Balance plus floating profit across open positions.
    pub equity: Decimal,
    /// Margin currently committed to open positions.
    pub margin: Decimal,
    /// Margin still available for new positions.
    pub free_margin: Decimal,
    /// Account leverage (e.g. 100 for 1:100).
    pub leverage: u32,
    /// Floating profit across open positions.
    pub profit: Decimal,
    /// When the terminal captured this snapshot.
    pub captured_at: DateTime<Utc>,
}

impl AccountSnapshot {
    /// Snapshot of a flat account, equity equal to balance.
    pub fn flat(balance: Decimal, captured_at: DateTime<Utc>) -> Self {
        Self {
            balance,
            equity: balance,
            margin: Decimal::ZERO,
            free_margin: balance,
            leverage: 100,
            profit: Decimal::ZERO,
            captured_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_snapshot() {
        let now = Utc::now();
        let snapshot = AccountSnapshot::flat(Decimal::new(10_000, 0), now);
        assert_eq!(snapshot.balance, snapshot.equity);
        assert_eq!(snapshot.profit, Decimal::ZERO);
        assert_eq!(snapshot.captured_at, now);
    }

    #[test]
    fn test_snapshot_serde_round_trip() {
        let snapshot = AccountSnapshot::flat(Decimal::new(5_000, 0), Utc::now());
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: AccountSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }
}
