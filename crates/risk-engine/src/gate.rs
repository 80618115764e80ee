//! Composition of every protection predicate into one admission decision.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use terminal_core::{Result, Terminal};
use tracing::{debug, warn};

use crate::config::ProtectionConfig;
use crate::predicates::{self, PredicateKind, ProtectionCheckResult};
use crate::state::ProtectionState;

/// The combined admission decision for one poll cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeDecision {
    /// AND of every predicate's verdict.
    pub trading_allowed: bool,
    /// Reasons from every failing predicate, in invocation order.
    pub reasons: Vec<String>,
    /// Product of every predicate's volume factor.
    pub volume_factor: Decimal,
    /// Per-predicate results for observability.
    pub details: BTreeMap<PredicateKind, ProtectionCheckResult>,
}

impl CompositeDecision {
    fn open() -> Self {
        Self {
            trading_allowed: true,
            reasons: Vec::new(),
            volume_factor: Decimal::ONE,
            details: BTreeMap::new(),
        }
    }

    /// Fail-closed decision carrying a single reason.
    fn closed(reason: impl Into<String>) -> Self {
        Self {
            trading_allowed: false,
            reasons: vec![reason.into()],
            volume_factor: Decimal::ONE,
            details: BTreeMap::new(),
        }
    }

    fn record(&mut self, kind: PredicateKind, result: ProtectionCheckResult) {
        if !result.allowed {
            self.trading_allowed = false;
            if let Some(reason) = &result.reason {
                self.reasons.push(reason.clone());
            }
        }
        self.volume_factor *= result.volume_factor;
        self.details.insert(kind, result);
    }
}

/// Runs the configured predicates against the tracked state and composes
/// their results. The gate never mutates state; all mutation happens in the
/// tracker, which must have completed its update for the cycle first.
pub struct ProtectionGate {
    terminal: Arc<dyn Terminal>,
    config: ProtectionConfig,
}

impl ProtectionGate {
    /// Build a gate, rejecting invalid thresholds up front.
    pub fn new(terminal: Arc<dyn Terminal>, config: ProtectionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { terminal, config })
    }

    pub fn config(&self) -> &ProtectionConfig {
        &self.config
    }

    /// Evaluate every configured predicate for this cycle.
    ///
    /// Stale or uninitialized state fails closed. Predicates whose market
    /// data cannot be fetched are skipped and logged rather than evaluated
    /// against partial data; they are absent from the detail map.
    pub async fn evaluate(&self, state: &ProtectionState) -> CompositeDecision {
        if state.stale {
            warn!("Account state is stale; failing closed");
            return CompositeDecision::closed("account state is stale; trading disabled");
        }
        if !state.is_initialized() {
            warn!("Account state not yet initialized; failing closed");
            return CompositeDecision::closed("no account snapshot observed yet");
        }

        let mut decision = CompositeDecision::open();

        decision.record(
            PredicateKind::Breakdown,
            predicates::breakdown(state, self.config.breakdown_pct),
        );
        decision.record(
            PredicateKind::MaxDrawdown,
            predicates::max_drawdown(state, self.config.max_drawdown_pct),
        );
        decision.record(
            PredicateKind::DailyLossLimit,
            predicates::period_loss_limit(
                state.daily_loss,
                state.initial_balance,
                self.config.daily_loss_pct,
                "daily",
            ),
        );
        decision.record(
            PredicateKind::WeeklyLossLimit,
            predicates::period_loss_limit(
                state.weekly_loss,
                state.initial_balance,
                self.config.weekly_loss_pct,
                "weekly",
            ),
        );
        decision.record(
            PredicateKind::MonthlyLossLimit,
            predicates::period_loss_limit(
                state.monthly_loss,
                state.initial_balance,
                self.config.monthly_loss_pct,
                "monthly",
            ),
        );

        self.check_consecutive_losses(&mut decision).await;
        self.check_volatility(&mut decision).await;
        self.check_correlation(&mut decision).await;

        if let Some(windows) = &self.config.time_windows {
            decision.record(
                PredicateKind::TimeWindows,
                predicates::time_restrictions(Utc::now(), windows),
            );
        }

        if !decision.trading_allowed {
            warn!(reasons = ?decision.reasons, "Trading blocked by protection gate");
        } else if decision.volume_factor != Decimal::ONE {
            debug!(volume_factor = %decision.volume_factor, "Position size scaled by protections");
        }

        decision
    }

    async fn check_consecutive_losses(&self, decision: &mut CompositeDecision) {
        let now = Utc::now();
        let from = now - Duration::days(self.config.streak_lookback_days);
        match self.terminal.closed_deals(from, now).await {
            Ok(deals) => decision.record(
                PredicateKind::ConsecutiveLosses,
                predicates::consecutive_losses(
                    &deals,
                    self.config.max_consecutive_losses,
                    self.config.volume_reduction_factor,
                ),
            ),
            Err(error) => {
                warn!(error = %error, "Skipping losing-streak check; deal history unavailable");
            }
        }
    }

    async fn check_volatility(&self, decision: &mut CompositeDecision) {
        let Some(volatility) = &self.config.volatility else {
            return;
        };
        // One extra bar so the window yields `lookback` true ranges.
        let fetch = self
            .terminal
            .price_series(&volatility.symbol, volatility.timeframe, volatility.lookback + 1)
            .await;
        match fetch {
            Ok(candles) => decision.record(
                PredicateKind::VolatilitySizing,
                predicates::volatility_sizing(&candles, volatility.max_multiplier),
            ),
            Err(error) => {
                warn!(
                    symbol = %volatility.symbol,
                    error = %error,
                    "Skipping volatility sizing; price history unavailable"
                );
            }
        }
    }

    async fn check_correlation(&self, decision: &mut CompositeDecision) {
        let Some(correlation) = &self.config.correlation else {
            return;
        };

        let positions = match self.terminal.open_positions(None).await {
            Ok(positions) => positions,
            Err(error) => {
                warn!(error = %error, "Skipping correlation check; open positions unavailable");
                return;
            }
        };
        let open_symbols: HashSet<String> =
            positions.into_iter().map(|p| p.symbol).collect();

        let mut series = Vec::with_capacity(correlation.symbols.len());
        for symbol in &correlation.symbols {
            match self
                .terminal
                .price_series(symbol, correlation.timeframe, correlation.lookback)
                .await
            {
                Ok(candles) => {
                    let closes: Vec<Decimal> = candles.iter().map(|c| c.close).collect();
                    series.push((symbol.clone(), closes));
                }
                Err(error) => {
                    warn!(
                        symbol = %symbol,
                        error = %error,
                        "Excluding symbol from correlation check; price history unavailable"
                    );
                }
            }
        }

        decision.record(
            PredicateKind::Correlation,
            predicates::correlation(&series, &open_symbols, correlation.max_correlation),
        );
    }
}
