//! Replay records and deterministic re-execution of findings.

pub mod record;
pub mod replay;

pub use record::{FindingEnvelope, ProjectBundle, ReplayRecord};
pub use replay::{Replayer, RerunOutcome};
