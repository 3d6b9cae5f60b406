//! axle - the kernel of a modular agent runtime
//!
//! The kernel coordinates pluggable modules (LLM providers, tools,
//! orchestrators, context stores, hook observers) into an interactive
//! session: it drives turns through the mounted orchestrator, fans lifecycle
//! events out to hooks, mediates user approvals, and threads causality
//! identifiers through everything it emits.
//!
//! ```no_run
//! use axle::{MountPlan, Session, SessionOptions};
//! use serde_json::json;
//!
//! # async fn demo(loader: std::sync::Arc<dyn axle::ModuleLoader>) -> axle::Result<()> {
//! let plan = MountPlan::from_value(json!({
//!     "session": {"orchestrator": "agent.loop", "context": "context.memory"},
//!     "providers": [{"module": "providers.anthropic"}],
//! }))?;
//! let session = Session::with_options(
//!     plan,
//!     SessionOptions { loader: Some(loader), ..SessionOptions::default() },
//! )?;
//! let reply = session.scoped(|| async { session.execute("hello").await }).await?;
//! # let _ = reply;
//! # Ok(())
//! # }
//! ```

pub use axle_core;
pub use axle_hooks;
pub use axle_kernel;

pub use axle_core::{
    causality,
    event::{self, names, Payload},
    hook::{
        ApprovalRequest, ContextInjection, HookAction, HookResult, InjectionRole, MessageLevel,
        UserNotice,
    },
    plan::{ModuleEntry, MountPlan},
    types::{ChatRequest, ChatResponse, Message, Role, StreamDelta, ToolOutput, ToolSpec},
    KernelError, Result,
};
pub use axle_hooks::{
    hook_fn, ApprovalOutcome, ApprovalResolver, Decision, Dispatch, HandlerInfo, HookHandler,
    HookRegistry, DEFAULT_PRIORITY,
};
pub use axle_kernel::{
    AgentDef, ApprovalSystem, CancelState, CancelToken, ChatStream, ContextStore, ContributionFn,
    Coordinator, DisplaySystem, InFlightTool, Module, ModuleFactory, ModuleLoader, Mounted,
    MountPoint, Orchestrator, Provider, Session, SessionInfo, SessionOptions, SessionOrigin,
    SessionState, Teardown, Tool, INJECTION_HARD_LIMIT, INJECTION_SOFT_BUDGET,
};
