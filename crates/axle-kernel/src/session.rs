//! Session lifecycle - construction, initialization, turns, fork, cleanup
//!
//! A session owns its coordinator exclusively; the coordinator carries the
//! shared immutable [`SessionInfo`] instead of a back-pointer, so there is no
//! reference cycle between the two.

use crate::coordinator::Coordinator;
use crate::module::MountPoint;
use axle_core::causality;
use axle_core::event::{envelope, names, Payload};
use axle_core::{KernelError, ModuleEntry, MountPlan, Result};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// How this session came to exist; carried as `source` on `session:start`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionOrigin {
    Startup,
    Resume,
    Fork,
}

impl SessionOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Resume => "resume",
            Self::Fork => "fork",
        }
    }
}

/// Immutable identity shared between a session and its coordinator.
#[derive(Clone, Debug)]
pub struct SessionInfo {
    pub session_id: String,
    pub parent_id: Option<String>,
    pub origin: SessionOrigin,
}

/// Lifecycle state: `uninitialized -> initialized -> cleaned_up`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initialized,
    CleanedUp,
}

/// Optional construction parameters.
#[derive(Default)]
pub struct SessionOptions {
    pub loader: Option<Arc<dyn crate::module::ModuleLoader>>,
    pub session_id: Option<String>,
    pub parent_id: Option<String>,
    pub approval: Option<Arc<dyn crate::module::ApprovalSystem>>,
    pub display: Option<Arc<dyn crate::module::DisplaySystem>>,
    pub resumed: bool,
}

pub struct Session {
    info: Arc<SessionInfo>,
    coordinator: Arc<Coordinator>,
    state: Mutex<SessionState>,
}

impl Session {
    pub fn new(config: MountPlan) -> Result<Self> {
        Self::with_options(config, SessionOptions::default())
    }

    pub fn with_options(config: MountPlan, options: SessionOptions) -> Result<Self> {
        let origin = if options.resumed {
            SessionOrigin::Resume
        } else {
            SessionOrigin::Startup
        };
        Self::with_origin(config, options, origin)
    }

    fn with_origin(
        config: MountPlan,
        options: SessionOptions,
        origin: SessionOrigin,
    ) -> Result<Self> {
        config.validate()?;
        let session_id = options
            .session_id
            .unwrap_or_else(causality::new_session_id);
        let info = Arc::new(SessionInfo {
            session_id,
            parent_id: options.parent_id,
            origin,
        });
        let coordinator = Coordinator::new(
            info.clone(),
            config,
            options.loader,
            options.approval,
            options.display,
        );

        // every event this session emits carries its causality identifiers
        let hooks = coordinator.hooks();
        hooks.set_default_field(envelope::SESSION_ID, info.session_id.clone());
        hooks.set_default_field(
            envelope::PARENT_ID,
            info.parent_id
                .clone()
                .map(Value::from)
                .unwrap_or(Value::Null),
        );

        Ok(Self {
            info,
            coordinator,
            state: Mutex::new(SessionState::Uninitialized),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.info.session_id
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.info.parent_id.as_deref()
    }

    pub fn origin(&self) -> SessionOrigin {
        self.info.origin
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn config(&self) -> &MountPlan {
        self.coordinator.config()
    }

    pub async fn state(&self) -> SessionState {
        *self.state.lock().await
    }

    pub async fn is_initialized(&self) -> bool {
        self.state().await == SessionState::Initialized
    }

    /// Walk the mount plan and install every module, in dependency order:
    /// context, providers, tools, agents, hooks, orchestrator. Context and
    /// orchestrator failures are fatal; the multi-mounted kinds are logged
    /// and skipped, but at least one provider must end up mounted. Idempotent:
    /// a second call is a no-op.
    pub async fn initialize(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        match *state {
            SessionState::Initialized => return Ok(()),
            SessionState::CleanedUp => return Err(KernelError::AlreadyInitialized),
            SessionState::Uninitialized => {}
        }

        let plan = self.coordinator.config().clone();

        let context_entry = ModuleEntry::new(&plan.session.context)
            .with_config(plan.context.config.clone());
        self.mount_entry(MountPoint::Context, &context_entry).await?;
        self.coordinator
            .emit_event(
                names::DECISION_CONTEXT_RESOLUTION,
                Payload::new()
                    .with("module", plan.session.context.clone())
                    .with("outcome", "mounted"),
            )
            .await;

        for entry in &plan.providers {
            if let Err(e) = self.mount_entry(MountPoint::Providers, entry).await {
                warn!(module = %entry.module, error = %e, "provider skipped");
            }
        }
        if self.coordinator.providers().is_empty() {
            return Err(KernelError::module_load_failure(
                "providers",
                "no provider modules mounted",
            ));
        }

        for entry in &plan.tools {
            let outcome = match self.mount_entry(MountPoint::Tools, entry).await {
                Ok(()) => "mounted",
                Err(e) => {
                    warn!(module = %entry.module, error = %e, "tool skipped");
                    "skipped"
                }
            };
            self.coordinator
                .emit_event(
                    names::DECISION_TOOL_RESOLUTION,
                    Payload::new()
                        .with("module", entry.module.clone())
                        .with("name", entry.mount_name())
                        .with("outcome", outcome),
                )
                .await;
        }

        for entry in &plan.agents {
            let outcome = match self.mount_entry(MountPoint::Agents, entry).await {
                Ok(()) => "mounted",
                Err(e) => {
                    warn!(module = %entry.module, error = %e, "agent skipped");
                    "skipped"
                }
            };
            self.coordinator
                .emit_event(
                    names::DECISION_AGENT_RESOLUTION,
                    Payload::new()
                        .with("module", entry.module.clone())
                        .with("name", entry.mount_name())
                        .with("outcome", outcome),
                )
                .await;
        }

        for entry in &plan.hooks {
            if let Err(e) = self.mount_entry(MountPoint::Hooks, entry).await {
                warn!(module = %entry.module, error = %e, "hook module skipped");
            }
        }

        let orchestrator_entry = ModuleEntry::new(&plan.session.orchestrator);
        self.mount_entry(MountPoint::Orchestrator, &orchestrator_entry)
            .await?;

        *state = SessionState::Initialized;
        drop(state);

        self.coordinator
            .emit_event(
                names::SESSION_START,
                Payload::new().with("source", self.info.origin.as_str()),
            )
            .await;
        match self.info.origin {
            SessionOrigin::Fork => {
                self.coordinator
                    .emit_event(names::SESSION_FORK, Payload::new())
                    .await;
            }
            SessionOrigin::Resume => {
                self.coordinator
                    .emit_event(names::SESSION_RESUME, Payload::new())
                    .await;
            }
            SessionOrigin::Startup => {}
        }
        info!(session = %self.info.session_id, source = self.info.origin.as_str(),
            "session initialized");
        Ok(())
    }

    async fn mount_entry(&self, point: MountPoint, entry: &ModuleEntry) -> Result<()> {
        let loader = self
            .coordinator
            .loader()
            .ok_or_else(|| KernelError::module_not_found(&entry.module))?;
        let factory = loader.load(&entry.module).await?;
        self.coordinator
            .mount(point, entry.mount_name(), factory.as_ref(), entry.config.clone())
            .await
    }

    /// Run one turn: generate a turn id, reset the injection budget, emit the
    /// turn/prompt events, and hand the prompt to the mounted orchestrator.
    /// Raises [`KernelError::Cancelled`] if the token goes immediate before
    /// the orchestrator returns; `turn:end` is emitted on every path.
    pub async fn execute(&self, prompt: &str) -> Result<Value> {
        if self.state().await != SessionState::Initialized {
            return Err(KernelError::NotInitialized);
        }

        let turn_id = causality::new_turn_id();
        self.coordinator.reset_turn();
        let hooks = self.coordinator.hooks().clone();
        hooks.set_default_field(envelope::TURN_ID, turn_id.clone());

        self.coordinator
            .dispatch(names::TURN_START, Payload::new().with("prompt", prompt))
            .await;
        self.coordinator
            .dispatch(names::PROMPT_SUBMIT, Payload::new().with("prompt", prompt))
            .await;

        let result = self.run_orchestrator(prompt).await;

        match &result {
            Ok(_) => {
                self.coordinator
                    .emit_event(names::PROMPT_COMPLETE, Payload::new())
                    .await;
            }
            Err(e) => {
                self.coordinator
                    .emit_event(
                        names::TURN_ERROR,
                        Payload::new().with("error", e.to_string()),
                    )
                    .await;
                self.coordinator
                    .emit_event(
                        names::SESSION_ERROR,
                        Payload::new().with("error", e.to_string()),
                    )
                    .await;
            }
        }

        self.coordinator
            .emit_event(names::TURN_END, Payload::new())
            .await;
        hooks.clear_default_field(envelope::TURN_ID);

        result
    }

    async fn run_orchestrator(&self, prompt: &str) -> Result<Value> {
        let orchestrator = self.coordinator.orchestrator()?;
        let cancel = self.coordinator.cancellation().clone();
        let result = orchestrator
            .run(prompt, self.coordinator.clone(), cancel.clone())
            .await;
        if cancel.is_immediate() {
            return Err(KernelError::Cancelled);
        }
        result
    }

    /// Spawn a child session sharing this session's loader and external
    /// systems, with a fresh coordinator and hook registry. The child's plan
    /// is this session's with `overrides` shallow-merged on top; its life
    /// cycle is independent of the parent's.
    pub async fn fork(&self, overrides: Option<Value>) -> Result<Session> {
        let plan = match overrides {
            Some(overrides) => self.coordinator.config().merged_with(overrides)?,
            None => self.coordinator.config().clone(),
        };
        let child = Session::with_origin(
            plan,
            SessionOptions {
                loader: self.coordinator.loader(),
                session_id: None,
                parent_id: Some(self.info.session_id.clone()),
                approval: self.coordinator.approval_system(),
                display: self.coordinator.display_system(),
                resumed: false,
            },
            SessionOrigin::Fork,
        )?;
        info!(parent = %self.info.session_id, child = %child.info.session_id,
            "session forked");
        Ok(child)
    }

    /// Request cancellation through the session, emitting the cancel events
    /// around the token transition.
    pub async fn request_cancel(&self, immediate: bool) -> bool {
        let mode = if immediate { "immediate" } else { "graceful" };
        self.coordinator
            .emit_event(
                names::CANCEL_REQUESTED,
                Payload::new().with("mode", mode),
            )
            .await;
        let token = self.coordinator.cancellation();
        let changed = if immediate {
            token.request_immediate().await
        } else {
            token.request_graceful().await
        };
        if changed {
            self.coordinator
                .emit_event(
                    names::CANCEL_COMPLETED,
                    Payload::new().with("mode", mode),
                )
                .await;
        }
        changed
    }

    /// Tear the session down: request graceful cancellation, run registered
    /// cleanups (reverse registration order), emit `session:end`, and mark
    /// the lifecycle terminal. Idempotent.
    pub async fn cleanup(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if *state == SessionState::CleanedUp {
            return Ok(());
        }
        self.coordinator.cancellation().request_graceful().await;
        self.coordinator.cleanup().await;
        self.coordinator
            .emit_event(names::SESSION_END, Payload::new())
            .await;
        *state = SessionState::CleanedUp;
        info!(session = %self.info.session_id, "session cleaned up");
        Ok(())
    }

    /// Scoped acquisition: initialize, run `body`, and clean up on every
    /// path, including a failed initialize and a fatal execute error inside
    /// `body`.
    pub async fn scoped<T, F, Fut>(&self, body: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Err(e) = self.initialize().await {
            let _ = self.cleanup().await;
            return Err(e);
        }
        let result = body().await;
        let _ = self.cleanup().await;
        result
    }
}
