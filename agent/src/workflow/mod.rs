//! Chart workflow: state machine, steps and progress reporting

pub mod engine;
pub mod nodes;
pub mod progress;
pub mod update;

pub use engine::{next_step, run, Step};
pub use nodes::{NodeContext, NodeDeps};
pub use progress::{calculate_progress, ChannelObserver, ProgressObserver};
pub use update::StateUpdate;
