//! Validator coordination and consensus.
//!
//! - [`ValidatorRegistry`]: validators and stake, loaded from the chain
//! - [`LeaderElector`]: periodic stake-weighted leader selection
//! - [`ConsensusCoordinator`]: rounds, submissions and plurality finalization
//! - [`EventBus`]: typed coordinator events

pub mod coordinator;
pub mod election;
pub mod events;
pub mod round;
pub mod validator;

pub use coordinator::{ConsensusCoordinator, SubmitOutcome};
pub use election::{select_weighted, LeaderElector};
pub use events::{CoordinatorEvent, EventBus};
pub use round::{ConsensusRound, DataRequest, RoundId, RoundStatus};
pub use validator::{Validator, ValidatorRegistry};
