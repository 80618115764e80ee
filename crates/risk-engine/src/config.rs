//! Threshold configuration for the protection gate.

use chrono::Weekday;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use terminal_core::types::Timeframe;
use terminal_core::{Error, Result};

/// Thresholds for the account-level protection predicates.
///
/// Validated once at gate construction; a zero or negative threshold is a
/// configuration error, never a silent pass at evaluation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectionConfig {
    /// Loss from the initial balance that halts trading (percent).
    pub breakdown_pct: Decimal,
    /// Decline from the equity high-water mark that halts trading (percent).
    pub max_drawdown_pct: Decimal,
    /// Accumulated daily loss that halts trading (percent of initial balance).
    pub daily_loss_pct: Decimal,
    /// Accumulated weekly loss that halts trading (percent of initial balance).
    pub weekly_loss_pct: Decimal,
    /// Accumulated monthly loss that halts trading (percent of initial balance).
    pub monthly_loss_pct: Decimal,
    /// Losing-streak length that triggers position-size reduction.
    pub max_consecutive_losses: u32,
    /// Volume multiplier applied once the streak threshold is reached.
    pub volume_reduction_factor: Decimal,
    /// How far back to scan closed deals for the losing streak (days).
    pub streak_lookback_days: i64,
    /// Volatility-based position sizing. Skipped when absent.
    pub volatility: Option<VolatilityConfig>,
    /// Cross-symbol correlation blocking. Skipped when absent.
    pub correlation: Option<CorrelationConfig>,
    /// Trading-calendar restrictions. Absent means all hours, all days.
    pub time_windows: Option<TimeWindowConfig>,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            breakdown_pct: Decimal::new(10, 0),
            max_drawdown_pct: Decimal::new(15, 0),
            daily_loss_pct: Decimal::new(5, 0),
            weekly_loss_pct: Decimal::new(10, 0),
            monthly_loss_pct: Decimal::new(15, 0),
            max_consecutive_losses: 3,
            volume_reduction_factor: Decimal::new(5, 1),
            streak_lookback_days: 7,
            volatility: None,
            correlation: None,
            time_windows: None,
        }
    }
}

/// Parameters for True-Range-based position sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolatilityConfig {
    /// Symbol whose volatility drives the sizing.
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Number of bars in the rolling window.
    pub lookback: usize,
    /// Cap on the volatility ratio used for downscaling.
    pub max_multiplier: Decimal,
}

/// Parameters for cross-symbol correlation blocking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationConfig {
    /// Symbols whose close series are pairwise correlated.
    pub symbols: Vec<String>,
    pub timeframe: Timeframe,
    /// Absolute Pearson correlation above which a pair blocks trading.
    pub max_correlation: f64,
    /// Number of closing prices per series.
    pub lookback: usize,
}

/// Wall-clock trading windows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeWindowConfig {
    /// Inclusive `[start, end]` hour ranges. Empty means every hour.
    pub allowed_hours: Vec<(u32, u32)>,
    /// Weekdays trading is allowed on. Empty means every day.
    pub allowed_weekdays: Vec<Weekday>,
}

impl ProtectionConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, pct) in [
            ("breakdown_pct", self.breakdown_pct),
            ("max_drawdown_pct", self.max_drawdown_pct),
            ("daily_loss_pct", self.daily_loss_pct),
            ("weekly_loss_pct", self.weekly_loss_pct),
            ("monthly_loss_pct", self.monthly_loss_pct),
        ] {
            if pct <= Decimal::ZERO {
                return Err(config_error(format!("{name} must be positive, got {pct}")));
            }
        }

        if self.max_consecutive_losses == 0 {
            return Err(config_error("max_consecutive_losses must be at least 1"));
        }
        if self.volume_reduction_factor <= Decimal::ZERO
            || self.volume_reduction_factor > Decimal::ONE
        {
            return Err(config_error(format!(
                "volume_reduction_factor must be in (0, 1], got {}",
                self.volume_reduction_factor
            )));
        }
        if self.streak_lookback_days <= 0 {
            return Err(config_error("streak_lookback_days must be positive"));
        }

        if let Some(volatility) = &self.volatility {
            if volatility.symbol.is_empty() {
                return Err(config_error("volatility symbol must not be empty"));
            }
            if volatility.lookback < 2 {
                return Err(config_error("volatility lookback must be at least 2 bars"));
            }
            if volatility.max_multiplier <= Decimal::ONE {
                return Err(config_error(
                    "volatility max_multiplier must be greater than 1",
                ));
            }
        }

        if let Some(correlation) = &self.correlation {
            if correlation.symbols.len() < 2 {
                return Err(config_error(
                    "correlation check needs at least two symbols",
                ));
            }
            if correlation.lookback < 2 {
                return Err(config_error("correlation lookback must be at least 2 bars"));
            }
            if correlation.max_correlation <= 0.0 || correlation.max_correlation > 1.0 {
                return Err(config_error(format!(
                    "max_correlation must be in (0, 1], got {}",
                    correlation.max_correlation
                )));
            }
        }

        if let Some(windows) = &self.time_windows {
            for (start, end) in &windows.allowed_hours {
                if *start > *end || *end > 23 {
                    return Err(config_error(format!(
                        "invalid hour range [{start}, {end}]"
                    )));
                }
            }
        }

        Ok(())
    }
}

fn config_error(message: impl Into<String>) -> Error {
    Error::Config {
        message: message.into(),
    }
}
