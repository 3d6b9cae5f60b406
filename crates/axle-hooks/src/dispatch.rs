//! Sequential emission and verdict reconciliation
//!
//! Reconciliation folds the chain of handler verdicts into one decision:
//! `deny` short-circuits, `ask_user` suspends the chain until the resolver
//! answers (deny stops it, allow resumes it), `modify` replaces the payload
//! flowing into later handlers, `inject_context` accumulates, and handler
//! errors are logged and treated as `continue`.

use crate::registry::{HandlerEntry, HookRegistry};
use axle_core::causality;
use axle_core::event::{envelope, Payload};
use axle_core::hook::{
    ApprovalRequest, ContextInjection, HookAction, HookResult, UserNotice,
};
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

/// The reconciled decision of one emission.
#[derive(Clone, Debug, Default)]
pub enum Decision {
    #[default]
    Continue,
    /// At least one handler replaced the payload and no later handler
    /// overrode the verdict.
    Modify,
    Deny {
        reason: Option<String>,
    },
    /// A handler asked for approval and no resolver was supplied; the chain
    /// stopped at that handler.
    AskUser {
        hook_name: String,
        request: ApprovalRequest,
    },
}

impl Decision {
    pub fn is_deny(&self) -> bool {
        matches!(self, Self::Deny { .. })
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Deny { reason } => reason.as_deref(),
            _ => None,
        }
    }
}

/// Everything one emission produced.
#[derive(Debug, Default)]
pub struct Dispatch {
    pub event: String,
    pub decision: Decision,
    /// Final payload after any `modify` verdicts.
    pub payload: Payload,
    /// Accumulated `inject_context` verdicts, in handler order.
    pub injections: Vec<ContextInjection>,
    /// Accumulated `user_message` fields, in handler order.
    pub notices: Vec<UserNotice>,
}

/// How a resolved approval steers the chain.
#[derive(Clone, Debug)]
pub enum ApprovalOutcome {
    Allowed,
    Denied { reason: String },
}

/// Seam through which the coordinator answers `ask_user` verdicts mid-chain.
#[async_trait::async_trait]
pub trait ApprovalResolver: Send + Sync {
    async fn resolve(&self, hook_name: &str, request: &ApprovalRequest) -> ApprovalOutcome;
}

impl HookRegistry {
    /// Emit `event` with no approval resolver. An `ask_user` verdict
    /// short-circuits and is surfaced as [`Decision::AskUser`].
    pub async fn emit(&self, event: &str, payload: Payload) -> Dispatch {
        self.emit_with(event, payload, None).await
    }

    /// Emit `event` to every registered handler, sequentially, in
    /// `(priority, registration order)`, reconciling verdicts as they fold.
    pub async fn emit_with(
        &self,
        event: &str,
        payload: Payload,
        approvals: Option<&dyn ApprovalResolver>,
    ) -> Dispatch {
        let seq = self.next_seq();
        let mut payload = self.sealed(event, payload, seq);

        let mut dispatch = Dispatch {
            event: event.to_string(),
            ..Dispatch::default()
        };

        for entry in self.snapshot(event) {
            let result = match entry.handler.handle(event, &payload).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(event = %event, handler = %entry.name, error = %e,
                        "hook handler failed; treating as continue");
                    continue;
                }
            };

            collect_side_channels(&entry, &result, &mut dispatch);

            match result.action {
                HookAction::Continue => {}
                HookAction::InjectContext => {
                    if let Some(text) = result.context_injection {
                        dispatch.injections.push(ContextInjection {
                            text,
                            role: result.context_injection_role,
                            hook_name: entry.name.clone(),
                        });
                    }
                }
                HookAction::Modify => match result.data.map(Payload::from_value) {
                    Some(Some(replacement)) => {
                        // Same emission, same seq: the envelope is re-stamped
                        // onto the replacement so later handlers still see it.
                        payload = self.sealed(event, replacement, seq);
                        dispatch.decision = Decision::Modify;
                    }
                    _ => warn!(event = %event, handler = %entry.name,
                        "modify verdict without an object payload ignored"),
                },
                HookAction::Deny => {
                    dispatch.decision = Decision::Deny {
                        reason: result.reason,
                    };
                    dispatch.payload = payload;
                    return dispatch;
                }
                HookAction::AskUser => {
                    let request = result.approval_request().unwrap_or_default();
                    match approvals {
                        None => {
                            dispatch.decision = Decision::AskUser {
                                hook_name: entry.name.clone(),
                                request,
                            };
                            dispatch.payload = payload;
                            return dispatch;
                        }
                        Some(resolver) => {
                            match resolver.resolve(&entry.name, &request).await {
                                ApprovalOutcome::Allowed => {}
                                ApprovalOutcome::Denied { reason } => {
                                    dispatch.decision = Decision::Deny {
                                        reason: Some(reason),
                                    };
                                    dispatch.payload = payload;
                                    return dispatch;
                                }
                            }
                        }
                    }
                }
            }
        }

        dispatch.payload = payload;
        dispatch
    }

    /// Emit without reconciling: every handler sees the same sealed payload
    /// and the ordered list of raw verdicts is returned. `timeout` bounds the
    /// whole chain's wall-clock time; on expiry the verdicts collected so far
    /// are returned. An errored handler contributes a `continue` so the list
    /// stays aligned with handler order.
    pub async fn emit_and_collect(
        &self,
        event: &str,
        payload: Payload,
        timeout: Option<Duration>,
    ) -> Vec<HookResult> {
        let seq = self.next_seq();
        let payload = self.sealed(event, payload, seq);
        let deadline = timeout.map(|t| Instant::now() + t);

        let mut verdicts = Vec::new();
        for entry in self.snapshot(event) {
            let call = entry.handler.handle(event, &payload);
            let result = match deadline {
                None => call.await,
                Some(deadline) => match tokio::time::timeout_at(deadline, call).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(event = %event, handler = %entry.name,
                            "emit_and_collect timed out mid-chain");
                        break;
                    }
                },
            };
            match result {
                Ok(verdict) => verdicts.push(verdict),
                Err(e) => {
                    warn!(event = %event, handler = %entry.name, error = %e,
                        "hook handler failed; recording continue");
                    verdicts.push(HookResult::cont());
                }
            }
        }
        verdicts
    }

    /// Merge defaults and stamp the envelope. `event`, `ts`, and `seq` are
    /// always dispatcher-controlled.
    fn sealed(&self, event: &str, mut payload: Payload, seq: u64) -> Payload {
        payload.merge_defaults(&self.defaults());
        payload.set(envelope::EVENT, event);
        payload.set(envelope::TS, causality::now());
        payload.set(envelope::SEQ, seq);
        payload
    }
}

fn collect_side_channels(entry: &HandlerEntry, result: &HookResult, dispatch: &mut Dispatch) {
    if result.suppress_output {
        return;
    }
    if let Some(text) = &result.user_message {
        dispatch.notices.push(UserNotice {
            text: text.clone(),
            level: result.user_message_level,
            hook_name: entry.name.clone(),
        });
    }
}
