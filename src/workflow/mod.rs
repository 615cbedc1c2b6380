pub mod builder;
pub mod graph;
pub mod routing;
pub mod types;

pub use builder::WorkflowBuilder;
pub use graph::WorkflowGraph;
pub use types::{Stage, TicketOutcome, Transition, TransitionReason};
