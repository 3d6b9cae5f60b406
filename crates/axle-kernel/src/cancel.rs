//! Two-level cooperative cancellation
//!
//! The token is a monotonic state machine: `running -> graceful ->
//! immediate`, reversible only through an explicit `reset()`. Graceful lets
//! in-flight tools finish and admits no new ones; immediate tells the
//! orchestrator to abandon work where possible. The kernel only signals and
//! tracks - it never preempts tasks or closes module-owned resources.

use crate::module::Teardown;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Token state. Transitions are monotonic until `reset()`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelState {
    Running,
    Graceful,
    Immediate,
}

impl std::fmt::Display for CancelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Graceful => write!(f, "graceful"),
            Self::Immediate => write!(f, "immediate"),
        }
    }
}

/// A tool execution currently tracked as in flight.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InFlightTool {
    pub tool_id: String,
    pub name: String,
}

struct Inner {
    state: CancelState,
    tools: Vec<InFlightTool>,
    callbacks: Vec<Teardown>,
    /// Teardown callbacks fire at most once across the token's lifetime,
    /// surviving `reset()`.
    fired: bool,
    graceful: CancellationToken,
    immediate: CancellationToken,
}

/// The session's cancellation coordinator.
///
/// All state transitions are atomic under a single lock; teardown callbacks
/// are invoked outside the lock so a callback that re-enters the token
/// cannot deadlock.
pub struct CancelToken {
    inner: Mutex<Inner>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: CancelState::Running,
                tools: Vec::new(),
                callbacks: Vec::new(),
                fired: false,
                graceful: CancellationToken::new(),
                immediate: CancellationToken::new(),
            }),
        }
    }

    pub fn state(&self) -> CancelState {
        self.inner.lock().unwrap().state
    }

    /// True in `graceful` or `immediate`.
    pub fn is_cancelled(&self) -> bool {
        self.state() != CancelState::Running
    }

    pub fn is_graceful(&self) -> bool {
        self.state() == CancelState::Graceful
    }

    pub fn is_immediate(&self) -> bool {
        self.state() == CancelState::Immediate
    }

    /// Request graceful cancellation. Returns true only when this call
    /// performed the `running -> graceful` transition; teardown callbacks
    /// run (once per token lifetime) before it returns.
    pub async fn request_graceful(&self) -> bool {
        let (signal, callbacks) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.state != CancelState::Running {
                return false;
            }
            inner.state = CancelState::Graceful;
            (inner.graceful.clone(), self.take_callbacks(&mut inner))
        };
        info!(in_flight = self.in_flight().len(), "graceful cancellation requested");
        signal.cancel();
        self.run_callbacks(callbacks).await;
        true
    }

    /// Escalate to immediate cancellation from `running` or `graceful`.
    /// Returns false (and does nothing) once already immediate. Teardown
    /// callbacks run only if the graceful transition did not already fire
    /// them.
    pub async fn request_immediate(&self) -> bool {
        let (graceful, immediate, callbacks) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.state == CancelState::Immediate {
                return false;
            }
            inner.state = CancelState::Immediate;
            (
                inner.graceful.clone(),
                inner.immediate.clone(),
                self.take_callbacks(&mut inner),
            )
        };
        info!("immediate cancellation requested");
        graceful.cancel();
        immediate.cancel();
        self.run_callbacks(callbacks).await;
        true
    }

    /// Return to `running`, clearing the in-flight tool set and re-arming
    /// fresh awaitable signals. Teardown callbacks are neither re-run nor
    /// re-armed.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = CancelState::Running;
        inner.tools.clear();
        inner.graceful = CancellationToken::new();
        inner.immediate = CancellationToken::new();
    }

    /// Track a tool execution. Returns false without tracking when the token
    /// has left `running`: no new tools are admitted once cancellation is
    /// requested.
    pub fn track_tool(&self, tool_id: impl Into<String>, name: impl Into<String>) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != CancelState::Running {
            return false;
        }
        inner.tools.push(InFlightTool {
            tool_id: tool_id.into(),
            name: name.into(),
        });
        true
    }

    /// Mark a tracked tool as finished. Returns whether it was tracked.
    pub fn complete_tool(&self, tool_id: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.tools.len();
        inner.tools.retain(|t| t.tool_id != tool_id);
        before != inner.tools.len()
    }

    /// Snapshot of in-flight tools in tracking order.
    pub fn in_flight(&self) -> Vec<InFlightTool> {
        self.inner.lock().unwrap().tools.clone()
    }

    /// Register a teardown callback, invoked at most once across the
    /// token's lifetime on the first transition out of `running`.
    pub fn on_teardown(&self, callback: Teardown) {
        self.inner.lock().unwrap().callbacks.push(callback);
    }

    /// Awaitable signal cancelled on `graceful` (and on `immediate`).
    pub fn graceful_signal(&self) -> CancellationToken {
        self.inner.lock().unwrap().graceful.clone()
    }

    /// Awaitable signal cancelled only on `immediate`.
    pub fn immediate_signal(&self) -> CancellationToken {
        self.inner.lock().unwrap().immediate.clone()
    }

    fn take_callbacks(&self, inner: &mut Inner) -> Vec<Teardown> {
        if inner.fired {
            return Vec::new();
        }
        inner.fired = true;
        std::mem::take(&mut inner.callbacks)
    }

    async fn run_callbacks(&self, callbacks: Vec<Teardown>) {
        for callback in callbacks {
            if let Err(e) = callback().await {
                warn!(error = %e, "cancellation teardown callback failed");
            }
        }
    }
}
