//! Recovery module
//!
//! - `state`: Series rebuilt by replay (RecoveredState)
//! - `controller`: Replay memory ceiling and flushing (ReplayController)
//! - `replayer`: Checkpoint load, segment replay and log repair (Replayer)

pub mod controller;
pub mod replayer;
pub mod state;

pub use controller::ReplayController;
pub use replayer::{ReplayError, ReplayStats, Replayer};
pub use state::{ApplyOutcome, RecoveredState};
