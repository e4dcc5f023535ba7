pub mod runtime;
pub mod session;

pub use runtime::{instructions_for, Agent, AgentEvent, RunResult, RunState, DEFAULT_INSTRUCTIONS};
pub use session::{SharedSession, TurnOutcome};
