//! Per-cycle orchestration of the tracker and the gate.

use std::sync::Arc;

use terminal_core::{Result, Terminal};
use tracing::warn;

use crate::config::ProtectionConfig;
use crate::gate::{CompositeDecision, ProtectionGate};
use crate::state::{AccountStateTracker, ProtectionState};
use crate::stops::StopManager;

/// Wires one poll cycle together: snapshot refresh, state update, admission
/// decision. Stop refresh has no ordering dependency on the gate and is
/// exposed separately through [`ProtectionEngine::stops`].
///
/// The engine owns the only mutable state (via the tracker) and is driven by
/// the caller's polling loop; it never spawns tasks or sleeps.
pub struct ProtectionEngine {
    terminal: Arc<dyn Terminal>,
    tracker: AccountStateTracker,
    gate: ProtectionGate,
    stops: StopManager,
}

impl ProtectionEngine {
    /// Build the engine, validating the configuration up front.
    pub fn new(terminal: Arc<dyn Terminal>, config: ProtectionConfig) -> Result<Self> {
        let gate = ProtectionGate::new(terminal.clone(), config)?;
        Ok(Self {
            tracker: AccountStateTracker::new(),
            stops: StopManager::new(terminal.clone()),
            gate,
            terminal,
        })
    }

    pub fn state(&self) -> &ProtectionState {
        self.tracker.state()
    }

    pub fn stops(&self) -> &StopManager {
        &self.stops
    }

    /// Run one admission cycle: fetch a fresh snapshot, fold it into the
    /// state, and evaluate every protection. A snapshot failure marks the
    /// state stale and the decision fails closed.
    pub async fn poll_cycle(&mut self) -> CompositeDecision {
        match self.terminal.account_snapshot().await {
            Ok(snapshot) => self.tracker.update(snapshot),
            Err(error) => {
                warn!(error = %error, "Account snapshot unavailable this cycle");
                self.tracker.mark_stale();
            }
        }
        self.gate.evaluate(self.tracker.state()).await
    }
}
