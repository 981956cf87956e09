//! Sessions: state model, reducer, ordering and the actor-backed store

pub mod actor;
pub mod reducer;
pub mod reorder;
pub mod state;
pub mod store;
pub mod tools;

pub use actor::{SessionSettings, SessionSnapshot, SubmitOutcome};
pub use reducer::{apply, replay, StateDelta};
pub use reorder::{OrderingViolation, ReorderBuffer};
pub use state::{
    Agent, AgentRole, AgentStatus, BackgroundTask, Counters, Lifespan, NewsCategory, NewsItem,
    SessionState, SessionStatus,
};
pub use store::{SessionStore, SessionSummary};
pub use tools::{categorize, ToolCategory};
