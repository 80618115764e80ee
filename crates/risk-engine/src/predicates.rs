//! Protection predicates: independent risk checks over the tracked state.
//!
//! Each predicate is a pure function of the current [`ProtectionState`],
//! pre-fetched market data, and its thresholds. Percentage comparisons treat
//! the threshold itself as a violation (`>=`); the absolute Pearson
//! correlation uses a strict `>` since it is not a percentage.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Datelike, Timelike, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use terminal_core::types::{Candle, ClosedDeal};

use crate::config::TimeWindowConfig;
use crate::state::ProtectionState;

/// Identifies a predicate in the composite decision's detail map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredicateKind {
    Breakdown,
    MaxDrawdown,
    DailyLossLimit,
    WeeklyLossLimit,
    MonthlyLossLimit,
    ConsecutiveLosses,
    VolatilitySizing,
    Correlation,
    TimeWindows,
}

/// Outcome of a single protection predicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectionCheckResult {
    /// Whether this predicate permits opening a new trade.
    pub allowed: bool,
    /// Present when the predicate blocks trading or scales the size.
    pub reason: Option<String>,
    /// Observed value, as a percentage where applicable.
    pub percentage: Option<Decimal>,
    /// Configured threshold the observation was compared against.
    pub threshold: Option<Decimal>,
    /// Position-size multiplier contributed by this predicate.
    pub volume_factor: Decimal,
}

impl ProtectionCheckResult {
    /// A passing result with a neutral volume factor.
    pub fn pass() -> Self {
        Self {
            allowed: true,
            reason: None,
            percentage: None,
            threshold: None,
            volume_factor: Decimal::ONE,
        }
    }

    /// A blocking result.
    pub fn block(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            ..Self::pass()
        }
    }

    fn with_metrics(mut self, percentage: Decimal, threshold: Decimal) -> Self {
        self.percentage = Some(percentage);
        self.threshold = Some(threshold);
        self
    }

    fn with_volume_factor(mut self, factor: Decimal, reason: impl Into<String>) -> Self {
        self.volume_factor = factor;
        self.reason = Some(reason.into());
        self
    }
}

/// Loss from the initial balance, as a percentage, against a halt threshold.
pub fn breakdown(state: &ProtectionState, threshold_pct: Decimal) -> ProtectionCheckResult {
    let Some(equity) = state.equity() else {
        return ProtectionCheckResult::pass();
    };
    let loss_pct = percent_of(state.initial_balance - equity, state.initial_balance);
    if loss_pct >= threshold_pct {
        ProtectionCheckResult::block(format!(
            "breakdown: {}% loss from initial balance (limit {threshold_pct}%)",
            loss_pct.round_dp(2)
        ))
        .with_metrics(loss_pct, threshold_pct)
    } else {
        ProtectionCheckResult::pass().with_metrics(loss_pct, threshold_pct)
    }
}

/// Decline from the equity high-water mark against a halt threshold.
pub fn max_drawdown(state: &ProtectionState, threshold_pct: Decimal) -> ProtectionCheckResult {
    let Some(equity) = state.equity() else {
        return ProtectionCheckResult::pass();
    };
    let drawdown_pct = percent_of(state.max_balance - equity, state.max_balance);
    if drawdown_pct >= threshold_pct {
        ProtectionCheckResult::block(format!(
            "max drawdown: {}% below the equity high-water mark (limit {threshold_pct}%)",
            drawdown_pct.round_dp(2)
        ))
        .with_metrics(drawdown_pct, threshold_pct)
    } else {
        ProtectionCheckResult::pass().with_metrics(drawdown_pct, threshold_pct)
    }
}

/// One of the rolling loss accumulators against its threshold.
pub fn period_loss_limit(
    accumulated_loss: Decimal,
    initial_balance: Decimal,
    threshold_pct: Decimal,
    period: &str,
) -> ProtectionCheckResult {
    let loss_pct = percent_of(accumulated_loss, initial_balance);
    if loss_pct >= threshold_pct {
        ProtectionCheckResult::block(format!(
            "{period} loss limit: {}% of initial balance lost (limit {threshold_pct}%)",
            loss_pct.round_dp(2)
        ))
        .with_metrics(loss_pct, threshold_pct)
    } else {
        ProtectionCheckResult::pass().with_metrics(loss_pct, threshold_pct)
    }
}

/// Scale position size down after a streak of losing deals.
///
/// The streak is the run of strictly negative profits walking backwards from
/// the most recent closed deal; the first non-negative deal breaks it. This
/// predicate never blocks trading, it only scales size.
pub fn consecutive_losses(
    deals: &[ClosedDeal],
    max_count: u32,
    reduction_factor: Decimal,
) -> ProtectionCheckResult {
    let mut recent: Vec<&ClosedDeal> = deals.iter().collect();
    recent.sort_by_key(|d| std::cmp::Reverse(d.closed_at));

    let mut streak: u32 = 0;
    for deal in recent {
        if deal.profit < Decimal::ZERO {
            streak += 1;
        } else {
            break;
        }
    }

    if streak >= max_count {
        ProtectionCheckResult::pass().with_volume_factor(
            reduction_factor,
            format!("{streak} consecutive losing deals; volume reduced to {reduction_factor}x"),
        )
    } else {
        ProtectionCheckResult::pass()
    }
}

/// Scale position size by recent volatility, measured as the latest True
/// Range against the rolling mean of the window.
///
/// A ratio above 1 shrinks the size by `1 / min(ratio, max_multiplier)`;
/// a quiet market scales up, capped at 1.2x. Never blocks trading.
pub fn volatility_sizing(candles: &[Candle], max_multiplier: Decimal) -> ProtectionCheckResult {
    let true_ranges = true_ranges(candles);
    let Some(current) = true_ranges.last().copied() else {
        return ProtectionCheckResult::pass();
    };
    let average: Decimal =
        true_ranges.iter().sum::<Decimal>() / Decimal::from(true_ranges.len());
    if average <= Decimal::ZERO || current <= Decimal::ZERO {
        return ProtectionCheckResult::pass();
    }

    let ratio = current / average;
    let factor = if ratio > Decimal::ONE {
        Decimal::ONE / ratio.min(max_multiplier)
    } else {
        (Decimal::ONE / ratio).min(Decimal::new(12, 1))
    };

    if factor == Decimal::ONE {
        ProtectionCheckResult::pass()
    } else {
        ProtectionCheckResult::pass().with_volume_factor(
            factor.round_dp(4),
            format!(
                "volatility ratio {}; volume scaled by {}",
                ratio.round_dp(2),
                factor.round_dp(4)
            ),
        )
    }
}

/// Block trading when two highly correlated symbols both hold open positions.
///
/// `series` carries each symbol's closing prices over the lookback window;
/// `open_symbols` is the set of symbols with at least one open position.
pub fn correlation(
    series: &[(String, Vec<Decimal>)],
    open_symbols: &HashSet<String>,
    max_correlation: f64,
) -> ProtectionCheckResult {
    let mut violations = Vec::new();

    for (i, (symbol_a, closes_a)) in series.iter().enumerate() {
        for (symbol_b, closes_b) in series.iter().skip(i + 1) {
            if !open_symbols.contains(symbol_a) || !open_symbols.contains(symbol_b) {
                continue;
            }
            let Some(coefficient) = pearson(closes_a, closes_b) else {
                continue;
            };
            if coefficient.abs() > max_correlation {
                violations.push(format!(
                    "{symbol_a}/{symbol_b} correlation {coefficient:.2} exceeds {max_correlation}"
                ));
            }
        }
    }

    if violations.is_empty() {
        ProtectionCheckResult::pass()
    } else {
        ProtectionCheckResult::block(format!(
            "correlated exposure: {}",
            violations.join("; ")
        ))
    }
}

/// Block trading outside the configured hour ranges or weekdays.
pub fn time_restrictions(
    now: DateTime<Utc>,
    windows: &TimeWindowConfig,
) -> ProtectionCheckResult {
    let hour = now.hour();
    let hour_allowed = windows.allowed_hours.is_empty()
        || windows
            .allowed_hours
            .iter()
            .any(|(start, end)| hour >= *start && hour <= *end);
    if !hour_allowed {
        return ProtectionCheckResult::block(format!(
            "hour {hour} is outside the allowed trading windows"
        ));
    }

    let weekday = now.weekday();
    let day_allowed =
        windows.allowed_weekdays.is_empty() || windows.allowed_weekdays.contains(&weekday);
    if !day_allowed {
        let days: BTreeSet<String> = windows
            .allowed_weekdays
            .iter()
            .map(|d| d.to_string())
            .collect();
        return ProtectionCheckResult::block(format!(
            "{weekday} is not an allowed trading day ({})",
            days.into_iter().collect::<Vec<_>>().join(", ")
        ));
    }

    ProtectionCheckResult::pass()
}

/// Loss as a percentage of a base, guarded against a non-positive base.
fn percent_of(loss: Decimal, base: Decimal) -> Decimal {
    if base <= Decimal::ZERO {
        Decimal::ZERO
    } else {
        loss / base * Decimal::ONE_HUNDRED
    }
}

/// True Range series over consecutive bars:
/// `max(high - low, |high - prev_close|, |low - prev_close|)`.
fn true_ranges(candles: &[Candle]) -> Vec<Decimal> {
    candles
        .windows(2)
        .map(|pair| {
            let (previous, current) = (&pair[0], &pair[1]);
            let hl = current.high - current.low;
            let hpc = (current.high - previous.close).abs();
            let lpc = (current.low - previous.close).abs();
            hl.max(hpc).max(lpc)
        })
        .collect()
}

/// Pearson correlation of two equal-length series. `None` when either series
/// is degenerate (fewer than two points or zero variance).
fn pearson(a: &[Decimal], b: &[Decimal]) -> Option<f64> {
    let n = a.len().min(b.len());
    if n < 2 {
        return None;
    }
    let xs: Vec<f64> = a[..n].iter().filter_map(|d| d.to_f64()).collect();
    let ys: Vec<f64> = b[..n].iter().filter_map(|d| d.to_f64()).collect();
    if xs.len() != n || ys.len() != n {
        return None;
    }

    let mean_x = xs.iter().sum::<f64>() / n as f64;
    let mean_y = ys.iter().sum::<f64>() / n as f64;

    let mut covariance = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs.iter().zip(&ys) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        covariance += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    let denominator = (var_x * var_y).sqrt();
    if denominator == 0.0 {
        None
    } else {
        Some(covariance / denominator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Weekday};
    use terminal_core::types::AccountSnapshot;

    fn state_with(initial: i64, max: i64, equity: i64) -> ProtectionState {
        ProtectionState {
            initial_balance: Decimal::new(initial, 0),
            max_balance: Decimal::new(max, 0),
            last_snapshot: Some(AccountSnapshot {
                equity: Decimal::new(equity, 0),
                ..AccountSnapshot::flat(Decimal::new(initial, 0), Utc::now())
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_breakdown_boundary_inclusive() {
        // 5% loss against a 10% limit: allowed.
        let state = state_with(10_000, 10_000, 9_500);
        assert!(breakdown(&state, Decimal::new(10, 0)).allowed);

        // Exactly 10% loss: blocked.
        let state = state_with(10_000, 10_000, 9_000);
        let result = breakdown(&state, Decimal::new(10, 0));
        assert!(!result.allowed);
        assert_eq!(result.percentage, Some(Decimal::new(10, 0)));

        // 15% loss: blocked.
        let state = state_with(10_000, 10_000, 8_500);
        assert!(!breakdown(&state, Decimal::new(10, 0)).allowed);
    }

    #[test]
    fn test_breakdown_guards_zero_initial_balance() {
        let mut state = state_with(10_000, 10_000, 9_000);
        state.initial_balance = Decimal::ZERO;
        let result = breakdown(&state, Decimal::new(10, 0));
        assert!(result.allowed);
        assert_eq!(result.percentage, Some(Decimal::ZERO));
    }

    #[test]
    fn test_max_drawdown_boundary_inclusive() {
        // 10% drawdown against a 15% limit: allowed.
        let state = state_with(10_000, 10_000, 9_000);
        assert!(max_drawdown(&state, Decimal::new(15, 0)).allowed);

        // Exactly 15%: blocked.
        let state = state_with(10_000, 10_000, 8_500);
        assert!(!max_drawdown(&state, Decimal::new(15, 0)).allowed);

        // 20%: blocked.
        let state = state_with(10_000, 10_000, 8_000);
        assert!(!max_drawdown(&state, Decimal::new(15, 0)).allowed);
    }

    #[test]
    fn test_period_loss_limit() {
        let initial = Decimal::new(10_000, 0);
        let threshold = Decimal::new(5, 0);

        // 3% daily loss: allowed.
        let result = period_loss_limit(Decimal::new(300, 0), initial, threshold, "daily");
        assert!(result.allowed);

        // 6% daily loss: blocked, reported as 6%.
        let result = period_loss_limit(Decimal::new(600, 0), initial, threshold, "daily");
        assert!(!result.allowed);
        assert_eq!(result.percentage, Some(Decimal::new(6, 0)));

        // Exactly 5%: blocked.
        let result = period_loss_limit(Decimal::new(500, 0), initial, threshold, "daily");
        assert!(!result.allowed);
    }

    fn deal(profit: i64, minutes_ago: i64) -> ClosedDeal {
        ClosedDeal {
            ticket: minutes_ago as u64,
            symbol: "EURUSD".to_string(),
            profit: Decimal::new(profit, 0),
            closed_at: Utc::now() - Duration::minutes(minutes_ago),
        }
    }

    #[test]
    fn test_consecutive_losses_reaches_threshold() {
        let deals = vec![deal(-5, 1), deal(-3, 2), deal(-7, 3), deal(10, 4)];
        let result = consecutive_losses(&deals, 3, Decimal::new(5, 1));
        assert!(result.allowed);
        assert_eq!(result.volume_factor, Decimal::new(5, 1));
    }

    #[test]
    fn test_consecutive_losses_streak_broken_by_win() {
        // Most recent deal is a win; older losses do not count.
        let deals = vec![deal(10, 1), deal(-5, 2), deal(-3, 3), deal(-7, 4)];
        let result = consecutive_losses(&deals, 3, Decimal::new(5, 1));
        assert_eq!(result.volume_factor, Decimal::ONE);
    }

    #[test]
    fn test_consecutive_losses_below_threshold() {
        let deals = vec![deal(-5, 1), deal(-3, 2), deal(10, 3)];
        let result = consecutive_losses(&deals, 3, Decimal::new(5, 1));
        assert_eq!(result.volume_factor, Decimal::ONE);
        assert!(result.allowed);
    }

    #[test]
    fn test_consecutive_losses_zero_profit_breaks_streak() {
        let deals = vec![deal(-5, 1), deal(0, 2), deal(-3, 3), deal(-7, 4)];
        let result = consecutive_losses(&deals, 2, Decimal::new(5, 1));
        assert_eq!(result.volume_factor, Decimal::ONE);
    }

    fn bar(high: i64, low: i64, close: i64, index: i64) -> Candle {
        Candle {
            time: Utc::now() + Duration::hours(index),
            open: Decimal::new(close, 1),
            high: Decimal::new(high, 1),
            low: Decimal::new(low, 1),
            close: Decimal::new(close, 1),
            volume: 0,
        }
    }

    #[test]
    fn test_volatility_spike_shrinks_volume() {
        // Steady 1-point ranges, then a 4-point bar.
        let candles = vec![
            bar(11, 10, 10, 0),
            bar(11, 10, 10, 1),
            bar(11, 10, 10, 2),
            bar(11, 10, 10, 3),
            bar(14, 10, 12, 4),
        ];
        let result = volatility_sizing(&candles, Decimal::new(2, 0));
        assert!(result.allowed, "volatility sizing never blocks");
        assert!(result.volume_factor < Decimal::ONE);
        // Ratio is capped at the max multiplier of 2, so the floor is 0.5x.
        assert!(result.volume_factor >= Decimal::new(5, 1));
    }

    #[test]
    fn test_volatility_calm_upscale_capped() {
        // Wide ranges first, then a narrow final bar.
        let candles = vec![
            bar(20, 10, 15, 0),
            bar(20, 10, 15, 1),
            bar(20, 10, 15, 2),
            bar(20, 10, 15, 3),
            bar(16, 15, 15, 4),
        ];
        let result = volatility_sizing(&candles, Decimal::new(2, 0));
        assert!(result.volume_factor > Decimal::ONE);
        assert!(result.volume_factor <= Decimal::new(12, 1));
    }

    #[test]
    fn test_volatility_too_few_bars_is_neutral() {
        let result = volatility_sizing(&[bar(11, 10, 10, 0)], Decimal::new(2, 0));
        assert_eq!(result.volume_factor, Decimal::ONE);
        assert!(result.allowed);
    }

    fn closes(values: &[i64]) -> Vec<Decimal> {
        values.iter().map(|v| Decimal::new(*v, 1)).collect()
    }

    #[test]
    fn test_pearson_identical_series() {
        let series = closes(&[10, 12, 11, 14, 13]);
        let coefficient = pearson(&series, &series).unwrap();
        assert!((coefficient - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_pearson_inverse_series() {
        let a = closes(&[10, 12, 11, 14, 13]);
        let b: Vec<Decimal> = a.iter().map(|v| -*v).collect();
        let coefficient = pearson(&a, &b).unwrap();
        assert!((coefficient + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_pearson_flat_series_is_none() {
        let flat = closes(&[10, 10, 10, 10]);
        let other = closes(&[10, 12, 11, 14]);
        assert!(pearson(&flat, &other).is_none());
    }

    #[test]
    fn test_correlation_blocks_when_both_open() {
        let series = vec![
            ("EURUSD".to_string(), closes(&[10, 12, 11, 14, 13])),
            ("GBPUSD".to_string(), closes(&[10, 12, 11, 14, 13])),
        ];
        let open: HashSet<String> = ["EURUSD", "GBPUSD"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let result = correlation(&series, &open, 0.7);
        assert!(!result.allowed);
        let reason = result.reason.unwrap();
        assert!(reason.contains("EURUSD"));
        assert!(reason.contains("GBPUSD"));
    }

    #[test]
    fn test_correlation_ignores_pairs_without_both_positions() {
        let series = vec![
            ("EURUSD".to_string(), closes(&[10, 12, 11, 14, 13])),
            ("GBPUSD".to_string(), closes(&[10, 12, 11, 14, 13])),
        ];
        let open: HashSet<String> = ["EURUSD"].iter().map(|s| s.to_string()).collect();

        assert!(correlation(&series, &open, 0.7).allowed);
    }

    #[test]
    fn test_time_restrictions_hour_window() {
        // 10:00 UTC on a Wednesday.
        let now = Utc.with_ymd_and_hms(2024, 3, 13, 10, 0, 0).unwrap();

        let inside = TimeWindowConfig {
            allowed_hours: vec![(8, 20)],
            allowed_weekdays: Vec::new(),
        };
        assert!(time_restrictions(now, &inside).allowed);

        let outside = TimeWindowConfig {
            allowed_hours: vec![(14, 20)],
            allowed_weekdays: Vec::new(),
        };
        assert!(!time_restrictions(now, &outside).allowed);

        // Inclusive boundary.
        let boundary = TimeWindowConfig {
            allowed_hours: vec![(10, 12)],
            allowed_weekdays: Vec::new(),
        };
        assert!(time_restrictions(now, &boundary).allowed);
    }

    #[test]
    fn test_time_restrictions_weekday() {
        // A Saturday.
        let now = Utc.with_ymd_and_hms(2024, 3, 16, 10, 0, 0).unwrap();
        let weekdays_only = TimeWindowConfig {
            allowed_hours: Vec::new(),
            allowed_weekdays: vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
            ],
        };
        assert!(!time_restrictions(now, &weekdays_only).allowed);

        let empty = TimeWindowConfig::default();
        assert!(time_restrictions(now, &empty).allowed);
    }
}
