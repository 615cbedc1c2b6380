//! 核心层：错误分类、工单状态与增量合并、工单监管

pub mod error;
pub mod state;
pub mod supervisor;

pub use error::{AgentError, CapabilityError, DispatchError, StateError, ToolError, ValidationError};
pub use state::{
    AgentInteraction, AgentKind, AgentState, NodeUpdate, Resolution, ResolutionStatus, Routing,
    TicketRequest, Urgency,
};
pub use supervisor::{TicketHandle, TicketSupervisor};
