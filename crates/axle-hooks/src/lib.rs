//! Axle Hooks - deterministic, priority-ordered lifecycle event dispatch
//!
//! The registry holds named handler records; `emit` fans an event out to the
//! handlers registered for it, strictly sequentially in `(priority,
//! registration order)`, and folds their verdicts into a single reconciled
//! [`Dispatch`]. Handler failures are logged and treated as `continue` so an
//! observer can never break the session (the non-interference discipline).

pub mod dispatch;
pub mod registry;

pub use dispatch::{ApprovalOutcome, ApprovalResolver, Decision, Dispatch};
pub use registry::{hook_fn, FnHook, HandlerInfo, HookHandler, HookRegistry, DEFAULT_PRIORITY};
