//! Core domain types shared between the terminal adapters and the engine.

pub mod account;
pub mod market;
pub mod position;

pub use account::*;
pub use market::*;
pub use position::*;
