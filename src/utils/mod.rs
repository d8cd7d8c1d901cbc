//! Utility modules for the oracle node.
//!
//! - Default constants
//! - Stoppable periodic scheduler

pub mod constants;
pub mod scheduler;

pub use constants::*;
pub use scheduler::PeriodicTask;
