//! Terminal Core
//!
//! Shared domain types and the abstract broker/terminal interface consumed by
//! the risk-protection engine. Concrete terminal adapters (live broker
//! connections) implement the [`Terminal`] trait; an in-memory fake is
//! provided for tests and simulations.

pub mod error;
pub mod terminal;
pub mod types;

pub use error::{Error, Result};
pub use terminal::{MemoryTerminal, Terminal};
