//! The orchestration engine: state machine, per-workflow serializer, event
//! handler, and the decision authority.

mod authority;
mod handler;
mod machine;
mod serializer;

pub use authority::{
    AuthorityIdentity, DecisionAuthority, DecisionBasis, OverrideContext,
    REASON_RISK_UNAVAILABLE_PERMANENT, REASON_RISK_UNAVAILABLE_TRANSIENT,
};
pub use handler::WorkflowEventHandler;
pub use machine::{transition, MachineEvent, RiskDisposition, SideEffect, Transition};
pub use serializer::{EventHandler, WorkflowSerializer};
