//! devstation library
//!
//! Idempotent provisioning of a development workstation: an ordered list
//! of check-then-apply steps run by the `Sequencer` against a `Host`.

pub mod cli;
pub mod command_runner;
pub mod command_traits;
pub mod commands;
pub mod config_file;
pub mod error;
pub mod host;
pub mod logic;
pub mod process_guard;
pub mod report;
pub mod run_state;
pub mod sanity;
pub mod sequencer;
pub mod steps;
pub mod types;

// Re-export main types for convenience
pub use command_runner::{run_command_safe, CommandOutput};
pub use command_traits::CommandArgs;
pub use config_file::ProvisionConfig;
pub use error::{ProvisionError, Result};
pub use host::{Host, HostState, MemoryHost, SystemHost};
pub use process_guard::{ChildRegistry, CommandProcessGroup, ProcessGuard};
pub use run_state::{RunContext, RunStage, RunTransitionError};
pub use sequencer::{RunReport, Sequencer, StepOutcome, StepReport};
pub use steps::{Applied, Step};
pub use types::{PackageManager, PolicyPreset, StepId};
