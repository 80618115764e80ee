//! Rolling account state: high-water mark and calendar loss accumulators.

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use terminal_core::types::AccountSnapshot;
use tracing::{debug, info, warn};

/// Account-wide risk state, mutated exactly once per poll cycle.
///
/// One instance lives per account session. Deployments that poll the same
/// account from several symbol workers must share a single instance behind a
/// lock: the accumulators and high-water mark are account-wide, and two
/// independent copies would double-count or under-count losses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProtectionState {
    /// Balance at the first observed snapshot. Set once.
    pub initial_balance: Decimal,
    /// Highest equity observed since tracking began. Never decreases.
    pub max_balance: Decimal,
    /// Equity lost since the start of the calendar day.
    pub daily_loss: Decimal,
    /// Equity lost since the start of the ISO week.
    pub weekly_loss: Decimal,
    /// Equity lost since the start of the month.
    pub monthly_loss: Decimal,
    /// Previous snapshot, used to compute equity deltas.
    pub last_snapshot: Option<AccountSnapshot>,
    /// Wall clock of the last rollover check.
    pub last_check_time: Option<DateTime<Utc>>,
    /// Set when the terminal failed to supply a fresh snapshot. Predicates
    /// fail closed until the next successful update.
    pub stale: bool,
}

impl ProtectionState {
    /// Whether at least one snapshot has been observed.
    pub fn is_initialized(&self) -> bool {
        self.last_snapshot.is_some()
    }

    /// Equity of the most recent snapshot.
    pub fn equity(&self) -> Option<Decimal> {
        self.last_snapshot.as_ref().map(|s| s.equity)
    }
}

/// Folds fresh account snapshots into a [`ProtectionState`].
#[derive(Debug, Default)]
pub struct AccountStateTracker {
    state: ProtectionState,
}

impl AccountStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ProtectionState {
        &self.state
    }

    /// Fold one fresh snapshot into the state.
    ///
    /// Losses accumulate one-directionally: a drop in equity adds the full
    /// delta to all three accumulators, while a recovery subtracts nothing.
    /// This mirrors the behavior the engine was specified against; see the
    /// design notes for the open question on drift.
    pub fn update(&mut self, snapshot: AccountSnapshot) {
        self.state.stale = false;

        let Some(previous) = self.state.last_snapshot.take() else {
            info!(
                balance = %snapshot.balance,
                equity = %snapshot.equity,
                "Seeding protection state from first snapshot"
            );
            self.state.initial_balance = snapshot.balance;
            self.state.max_balance = snapshot.equity;
            self.state.last_check_time = Some(snapshot.captured_at);
            self.state.last_snapshot = Some(snapshot);
            return;
        };

        // High-water mark ratchet.
        if snapshot.equity > self.state.max_balance {
            debug!(
                old = %self.state.max_balance,
                new = %snapshot.equity,
                "New equity high-water mark"
            );
            self.state.max_balance = snapshot.equity;
        }

        if snapshot.equity < previous.equity {
            let delta = previous.equity - snapshot.equity;
            self.state.daily_loss += delta;
            self.state.weekly_loss += delta;
            self.state.monthly_loss += delta;
            debug!(
                delta = %delta,
                daily = %self.state.daily_loss,
                weekly = %self.state.weekly_loss,
                monthly = %self.state.monthly_loss,
                "Equity drop accumulated"
            );
        }

        self.roll_over(snapshot.captured_at);

        self.state.last_check_time = Some(snapshot.captured_at);
        self.state.last_snapshot = Some(snapshot);
    }

    /// Record that no fresh snapshot was available this cycle. The state is
    /// left untouched apart from the stale flag.
    pub fn mark_stale(&mut self) {
        warn!("No fresh account snapshot; protection state is stale");
        self.state.stale = true;
    }

    /// Reset each accumulator whose calendar bucket has advanced since the
    /// last check. The three buckets roll over independently.
    fn roll_over(&mut self, now: DateTime<Utc>) {
        let Some(last) = self.state.last_check_time else {
            return;
        };

        if now.date_naive() != last.date_naive() {
            info!(daily_loss = %self.state.daily_loss, "Daily loss accumulator reset");
            self.state.daily_loss = Decimal::ZERO;
        }
        if now.iso_week() != last.iso_week() {
            info!(weekly_loss = %self.state.weekly_loss, "Weekly loss accumulator reset");
            self.state.weekly_loss = Decimal::ZERO;
        }
        if (now.year(), now.month()) != (last.year(), last.month()) {
            info!(monthly_loss = %self.state.monthly_loss, "Monthly loss accumulator reset");
            self.state.monthly_loss = Decimal::ZERO;
        }
    }
}
