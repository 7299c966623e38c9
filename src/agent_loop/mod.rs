//! Agent loop: memory, limits, the step state machine and run events.

pub mod agent;
pub mod events;
pub mod limits;
pub mod memory;
pub mod runner;
pub mod types;

pub use agent::Agent;
pub use events::{RunEvent, RunEventPayload, RunEventSink, RunLifecycle};
pub use limits::AgentLimits;
pub use memory::Memory;
pub use runner::{AgentRunner, RunHandle};
pub use types::{AgentState, RunId, RunResult, RunStatus, ToolObservation};
