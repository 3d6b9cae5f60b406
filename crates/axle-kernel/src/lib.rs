//! Axle Kernel - session lifecycle, coordinator, and cancellation
//!
//! The kernel coordinates pluggable modules (providers, tools, orchestrators,
//! context stores, hook observers) into an interactive session. A [`Session`]
//! is constructed from a [`MountPlan`](axle_core::MountPlan); `initialize`
//! populates the [`Coordinator`]'s mount table through the external loader,
//! and `execute` drives the bound orchestrator, which reaches providers,
//! tools, and context back through the coordinator.

pub mod cancel;
pub mod coordinator;
pub mod module;
pub mod session;

pub use cancel::{CancelState, CancelToken, InFlightTool};
pub use coordinator::{ContributionFn, Coordinator, INJECTION_HARD_LIMIT, INJECTION_SOFT_BUDGET};
pub use module::{
    AgentDef, ApprovalSystem, ChatStream, ContextStore, DisplaySystem, Module, ModuleFactory,
    ModuleLoader, Mounted, MountPoint, Orchestrator, Provider, Teardown, Tool,
};
pub use session::{Session, SessionInfo, SessionOptions, SessionOrigin, SessionState};
