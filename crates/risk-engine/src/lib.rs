//! Risk Engine
//!
//! Admission control and dynamic stop management for a polling trading robot.
//!
//! Each cycle the caller feeds a fresh [`terminal_core::types::AccountSnapshot`]
//! into the [`AccountStateTracker`], then asks the [`ProtectionGate`] whether a
//! new trade may be opened and by what factor its size must be scaled down.
//! Independently, the [`StopManager`] recomputes protective stops for every
//! open position, only ever tightening them. The [`ProtectionEngine`] facade
//! wires the per-cycle ordering together.

pub mod config;
pub mod engine;
pub mod gate;
pub mod predicates;
pub mod state;
pub mod stops;

pub use config::{CorrelationConfig, ProtectionConfig, TimeWindowConfig, VolatilityConfig};
pub use engine::ProtectionEngine;
pub use gate::{CompositeDecision, ProtectionGate};
pub use predicates::{PredicateKind, ProtectionCheckResult};
pub use state::{AccountStateTracker, ProtectionState};
pub use stops::{StopManager, StopUpdate};
