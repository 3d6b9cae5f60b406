//! Coordinator - the per-session registry modules discover each other through
//!
//! Holds the mount table, the capability map, the contribution channels, the
//! cleanup stack, and the per-turn injection budget. It also delegates hook
//! `ask_user` verdicts to the external approval system and hook user messages
//! to the external display system. Coordinator state is private and mutated
//! only through this API; modules mutate only their own state.

use crate::cancel::CancelToken;
use crate::module::{
    ApprovalSystem, ContextStore, DisplaySystem, Module, ModuleFactory, ModuleLoader, MountPoint,
    Orchestrator, Provider, Teardown, Tool,
};
use crate::session::SessionInfo;
use axle_core::causality;
use axle_core::event::{names, Payload};
use axle_core::hook::{ApprovalRequest, ContextInjection, InjectionRole, UserNotice};
use axle_core::types::Role;
use axle_core::{KernelError, MountPlan, Result};
use axle_hooks::{ApprovalOutcome, ApprovalResolver, Decision, Dispatch, HookRegistry};
use dashmap::DashMap;
use futures::future::{join_all, BoxFuture};
use serde_json::{json, Value};
use std::any::Any;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Hard per-injection limit in bytes; larger injections are rejected.
pub const INJECTION_HARD_LIMIT: usize = 10_240;

/// Soft per-turn injection budget in bytes; exceeding it logs a warning.
pub const INJECTION_SOFT_BUDGET: usize = 4_000;

/// A callback contributing to a named channel. Outputs of all contributors
/// are concatenated in registration order by `collect_contributions`.
pub type ContributionFn = Arc<dyn Fn() -> BoxFuture<'static, Result<Vec<Value>>> + Send + Sync>;

struct Contributor {
    name: String,
    callback: ContributionFn,
}

struct MountEntry {
    point: MountPoint,
    name: String,
    module: Module,
    cleanup_id: Option<u64>,
}

struct CleanupSlot {
    id: u64,
    callback: Option<Teardown>,
}

pub struct Coordinator {
    info: Arc<SessionInfo>,
    config: MountPlan,
    loader: Option<Arc<dyn ModuleLoader>>,
    approval: Option<Arc<dyn ApprovalSystem>>,
    display: Option<Arc<dyn DisplaySystem>>,
    hooks: Arc<HookRegistry>,
    cancel: Arc<CancelToken>,
    mounts: Mutex<Vec<MountEntry>>,
    capabilities: DashMap<String, Arc<dyn Any + Send + Sync>>,
    contributions: DashMap<String, Vec<Contributor>>,
    cleanups: Mutex<Vec<CleanupSlot>>,
    next_cleanup_id: AtomicU64,
    approval_cache: DashMap<String, String>,
    turn_injected: AtomicUsize,
}

impl Coordinator {
    pub fn new(
        info: Arc<SessionInfo>,
        config: MountPlan,
        loader: Option<Arc<dyn ModuleLoader>>,
        approval: Option<Arc<dyn ApprovalSystem>>,
        display: Option<Arc<dyn DisplaySystem>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            info,
            config,
            loader,
            approval,
            display,
            hooks: Arc::new(HookRegistry::new()),
            cancel: Arc::new(CancelToken::new()),
            mounts: Mutex::new(Vec::new()),
            capabilities: DashMap::new(),
            contributions: DashMap::new(),
            cleanups: Mutex::new(Vec::new()),
            next_cleanup_id: AtomicU64::new(0),
            approval_cache: DashMap::new(),
            turn_injected: AtomicUsize::new(0),
        })
    }

    // ── Infrastructure accessors ────────────────────────────────────────────

    pub fn session_id(&self) -> &str {
        &self.info.session_id
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.info.parent_id.as_deref()
    }

    pub fn session_info(&self) -> &Arc<SessionInfo> {
        &self.info
    }

    pub fn config(&self) -> &MountPlan {
        &self.config
    }

    pub fn loader(&self) -> Option<Arc<dyn ModuleLoader>> {
        self.loader.clone()
    }

    pub fn approval_system(&self) -> Option<Arc<dyn ApprovalSystem>> {
        self.approval.clone()
    }

    pub fn display_system(&self) -> Option<Arc<dyn DisplaySystem>> {
        self.display.clone()
    }

    pub fn hooks(&self) -> &Arc<HookRegistry> {
        &self.hooks
    }

    pub fn cancellation(&self) -> &Arc<CancelToken> {
        &self.cancel
    }

    // ── Mount table ─────────────────────────────────────────────────────────

    /// Install a module by invoking its factory's `mount` entry point with
    /// this coordinator and the module's config. Singleton mount points
    /// reject a second mount; multi mount points replace an existing module
    /// of the same name (running its teardown).
    pub async fn mount(
        self: &Arc<Self>,
        point: MountPoint,
        name: &str,
        factory: &dyn ModuleFactory,
        config: Value,
    ) -> Result<()> {
        if let Some(existing) = self.occupied_singleton(point) {
            return Err(KernelError::mount_conflict(point.as_str(), existing));
        }

        let mounted = factory
            .mount(self.clone(), config)
            .await
            .map_err(|e| KernelError::module_load_failure(name, e.to_string()))?;
        if mounted.module.kind() != point {
            return Err(KernelError::module_load_failure(
                name,
                format!(
                    "factory produced a {} module for mount point {}",
                    mounted.module.kind(),
                    point
                ),
            ));
        }

        // the teardown is registered as a cleanup slot up front; if the mount
        // loses a race below it still runs at session cleanup
        let cleanup_id = mounted.teardown.map(|t| self.push_cleanup(t));
        let replaced = {
            let mut mounts = self.mounts.lock().unwrap();
            if point.is_singleton() {
                if let Some(existing) = mounts.iter().find(|e| e.point == point) {
                    return Err(KernelError::mount_conflict(point.as_str(), existing.name.clone()));
                }
            }
            let replaced = mounts
                .iter()
                .position(|e| e.point == point && e.name == name)
                .map(|i| mounts.remove(i));
            mounts.push(MountEntry {
                point,
                name: name.to_string(),
                module: mounted.module,
                cleanup_id,
            });
            replaced
        };

        if let Some(old) = replaced {
            debug!(point = %point, name = %name, "replacing mounted module");
            self.run_entry_teardown(&old).await;
        }
        info!(point = %point, name = %name, "module mounted");
        Ok(())
    }

    fn occupied_singleton(&self, point: MountPoint) -> Option<String> {
        if !point.is_singleton() {
            return None;
        }
        let mounts = self.mounts.lock().unwrap();
        mounts
            .iter()
            .find(|e| e.point == point)
            .map(|e| e.name.clone())
    }

    /// Remove a mounted module and run any teardown it registered.
    pub async fn unmount(&self, point: MountPoint, name: &str) -> Result<()> {
        let entry = {
            let mut mounts = self.mounts.lock().unwrap();
            let index = mounts
                .iter()
                .position(|e| e.point == point && e.name == name)
                .ok_or_else(|| KernelError::module_not_found(name))?;
            mounts.remove(index)
        };
        self.run_entry_teardown(&entry).await;
        info!(point = %point, name = %name, "module unmounted");
        Ok(())
    }

    /// Retrieve a mounted module. For singleton points the name is ignored;
    /// for multi points `None` yields the first mounted module.
    pub fn get(&self, point: MountPoint, name: Option<&str>) -> Option<Module> {
        let mounts = self.mounts.lock().unwrap();
        mounts
            .iter()
            .find(|e| {
                e.point == point
                    && (point.is_singleton() || name.map_or(true, |n| e.name == n))
            })
            .map(|e| e.module.clone())
    }

    /// Mounted names at a point, in insertion order.
    pub fn mounted_names(&self, point: MountPoint) -> Vec<String> {
        let mounts = self.mounts.lock().unwrap();
        mounts
            .iter()
            .filter(|e| e.point == point)
            .map(|e| e.name.clone())
            .collect()
    }

    pub fn orchestrator(&self) -> Result<Arc<dyn Orchestrator>> {
        self.get(MountPoint::Orchestrator, None)
            .and_then(|m| m.as_orchestrator())
            .ok_or_else(|| KernelError::module_not_found("orchestrator"))
    }

    pub fn context(&self) -> Result<Arc<dyn ContextStore>> {
        self.get(MountPoint::Context, None)
            .and_then(|m| m.as_context())
            .ok_or_else(|| KernelError::module_not_found("context"))
    }

    /// Mounted providers in insertion order.
    pub fn providers(&self) -> Vec<(String, Arc<dyn Provider>)> {
        let mounts = self.mounts.lock().unwrap();
        mounts
            .iter()
            .filter(|e| e.point == MountPoint::Providers)
            .filter_map(|e| e.module.as_provider().map(|p| (e.name.clone(), p)))
            .collect()
    }

    pub fn tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.get(MountPoint::Tools, Some(name))
            .and_then(|m| m.as_tool())
    }

    // ── Capabilities ────────────────────────────────────────────────────────

    /// Register an opaque value under a capability name. Last writer wins.
    pub fn register_capability(&self, name: impl Into<String>, value: Arc<dyn Any + Send + Sync>) {
        self.capabilities.insert(name.into(), value);
    }

    /// Retrieve a capability; missing names yield a typed not-found error.
    pub fn get_capability(&self, name: &str) -> Result<Arc<dyn Any + Send + Sync>> {
        self.capabilities
            .get(name)
            .map(|v| v.clone())
            .ok_or_else(|| KernelError::CapabilityNotFound(name.to_string()))
    }

    /// Typed retrieval; a registered value of a different type is reported
    /// as not found (consumers validate their own retrievals).
    pub fn get_capability_as<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        self.get_capability(name)?
            .downcast::<T>()
            .map_err(|_| KernelError::CapabilityNotFound(format!("{} (type mismatch)", name)))
    }

    // ── Contribution channels ───────────────────────────────────────────────

    /// Append a contributor to a named channel.
    pub fn register_contributor(
        &self,
        channel: impl Into<String>,
        name: impl Into<String>,
        callback: ContributionFn,
    ) {
        self.contributions
            .entry(channel.into())
            .or_default()
            .push(Contributor {
                name: name.into(),
                callback,
            });
    }

    /// Invoke every contributor of `channel` concurrently, wait for all,
    /// drop the ones that fail (logged), and return the concatenation of
    /// successful outputs in registration order.
    pub async fn collect_contributions(&self, channel: &str) -> Vec<Value> {
        let contributors: Vec<(String, ContributionFn)> = match self.contributions.get(channel) {
            Some(list) => list
                .iter()
                .map(|c| (c.name.clone(), c.callback.clone()))
                .collect(),
            None => return Vec::new(),
        };

        let futures: Vec<_> = contributors
            .iter()
            .map(|(_, callback)| callback())
            .collect();
        let results = join_all(futures).await;

        let mut collected = Vec::new();
        for ((name, _), result) in contributors.iter().zip(results) {
            match result {
                Ok(values) => collected.extend(values),
                Err(e) => {
                    warn!(channel = %channel, contributor = %name, error = %e,
                        "contribution dropped");
                }
            }
        }
        collected
    }

    // ── Cleanup ─────────────────────────────────────────────────────────────

    /// Record a teardown to run at session cleanup, in reverse registration
    /// order.
    pub fn register_cleanup(&self, callback: Teardown) {
        self.push_cleanup(callback);
    }

    /// Run all registered cleanups in reverse registration order. A failing
    /// cleanup is logged and does not prevent the others. The mount table is
    /// emptied.
    pub async fn cleanup(&self) {
        self.mounts.lock().unwrap().clear();
        let slots: Vec<CleanupSlot> = {
            let mut cleanups = self.cleanups.lock().unwrap();
            cleanups.drain(..).rev().collect()
        };
        for slot in slots {
            if let Some(callback) = slot.callback {
                if let Err(e) = callback().await {
                    warn!(error = %e, "cleanup callback failed");
                }
            }
        }
    }

    fn push_cleanup(&self, callback: Teardown) -> u64 {
        let id = self.next_cleanup_id.fetch_add(1, Ordering::Relaxed);
        self.cleanups.lock().unwrap().push(CleanupSlot {
            id,
            callback: Some(callback),
        });
        id
    }

    fn take_cleanup(&self, id: u64) -> Option<Teardown> {
        let mut cleanups = self.cleanups.lock().unwrap();
        let index = cleanups.iter().position(|s| s.id == id)?;
        let callback = cleanups[index].callback.take();
        cleanups.remove(index);
        callback
    }

    async fn run_entry_teardown(&self, entry: &MountEntry) {
        if let Some(id) = entry.cleanup_id {
            if let Some(teardown) = self.take_cleanup(id) {
                if let Err(e) = teardown().await {
                    warn!(point = %entry.point, name = %entry.name, error = %e,
                        "module teardown failed");
                }
            }
        }
    }

    // ── Injection budget ────────────────────────────────────────────────────

    /// Zero the per-turn injection counter; called at each `execute`.
    pub fn reset_turn(&self) {
        self.turn_injected.store(0, Ordering::Relaxed);
    }

    /// Bytes of hook content successfully injected this turn.
    pub fn turn_injected_bytes(&self) -> usize {
        self.turn_injected.load(Ordering::Relaxed)
    }

    /// Apply one hook context injection: validate size, write it into the
    /// mounted context with provenance metadata, charge the turn budget,
    /// and emit `hook:context_injection`.
    pub async fn inject(&self, event: &str, injection: &ContextInjection) -> Result<()> {
        let size = injection.text.len();
        if size > INJECTION_HARD_LIMIT {
            warn!(hook = %injection.hook_name, size, limit = INJECTION_HARD_LIMIT,
                "context injection rejected");
            self.emit_event(
                names::HOOK_CONTEXT_INJECTION,
                Payload::new()
                    .with("hook_name", injection.hook_name.clone())
                    .with("source_event", event)
                    .with("accepted", false)
                    .with("size", size as u64),
            )
            .await;
            return Err(KernelError::InjectionTooLarge {
                size,
                limit: INJECTION_HARD_LIMIT,
            });
        }

        let context = self.context()?;
        let role = match injection.role {
            InjectionRole::System => Role::System,
            InjectionRole::User => Role::User,
            InjectionRole::Assistant => Role::Assistant,
        };
        let metadata = json!({
            "source": "hook",
            "hook_name": injection.hook_name,
            "event": event,
            "timestamp": causality::now(),
        });
        context
            .add_message(role, &injection.text, Some(metadata))
            .await?;

        let total = self.turn_injected.fetch_add(size, Ordering::Relaxed) + size;
        if total > INJECTION_SOFT_BUDGET {
            warn!(hook = %injection.hook_name, total, budget = INJECTION_SOFT_BUDGET,
                "per-turn injection budget exceeded");
        }
        self.emit_event(
            names::HOOK_CONTEXT_INJECTION,
            Payload::new()
                .with("hook_name", injection.hook_name.clone())
                .with("source_event", event)
                .with("accepted", true)
                .with("size", size as u64)
                .with("turn_total", total as u64),
        )
        .await;
        Ok(())
    }

    // ── Event dispatch ──────────────────────────────────────────────────────

    /// Full dispatch: emit through the hook registry with this coordinator
    /// resolving `ask_user` verdicts, then forward user messages to the
    /// display system and apply accumulated context injections.
    pub async fn dispatch(&self, event: &str, payload: Payload) -> Dispatch {
        let dispatch = self.hooks.emit_with(event, payload, Some(self)).await;
        self.deliver_notices(&dispatch.notices).await;
        for injection in &dispatch.injections {
            if let Err(e) = self.inject(event, injection).await {
                warn!(event = %event, hook = %injection.hook_name, error = %e,
                    "injection dropped");
            }
        }
        dispatch
    }

    /// Informational emission for kernel-originated events. Verdicts are
    /// observed but not acted upon; in particular no injections are applied,
    /// which keeps `hook:context_injection` and the approval events from
    /// feeding back into themselves.
    pub async fn emit_event(&self, event: &str, payload: Payload) {
        let dispatch = self.hooks.emit(event, payload).await;
        match dispatch.decision {
            Decision::Continue | Decision::Modify => {}
            other => {
                debug!(event = %event, decision = ?other,
                    "verdict on informational event ignored");
            }
        }
    }

    async fn deliver_notices(&self, notices: &[UserNotice]) {
        for notice in notices {
            self.emit_event(
                names::USER_NOTIFICATION,
                Payload::new()
                    .with("hook_name", notice.hook_name.clone())
                    .with("level", notice.level.as_str())
                    .with("text", notice.text.clone()),
            )
            .await;
            if let Some(display) = &self.display {
                let source = format!("hook:{}", notice.hook_name);
                if let Err(e) = display
                    .show_message(&notice.text, notice.level, &source)
                    .await
                {
                    warn!(source = %source, error = %e, "display system failed");
                }
            }
        }
    }
}

// ── Approval delegation ─────────────────────────────────────────────────────

#[async_trait::async_trait]
impl ApprovalResolver for Coordinator {
    /// Resolve one `ask_user` verdict: consult the session's allow-always
    /// cache, otherwise delegate to the external approval system. A timeout
    /// applies the request's default; an option outside the offered set is
    /// treated as deny. Every request and decision is emitted as an event.
    async fn resolve(&self, hook_name: &str, request: &ApprovalRequest) -> ApprovalOutcome {
        let key = request.cache_key(hook_name);
        let cached = self.approval_cache.get(&key).map(|v| v.clone());
        if let Some(cached) = cached {
            self.emit_event(
                names::APPROVAL_DECISION,
                Payload::new()
                    .with("hook_name", hook_name)
                    .with("option", cached)
                    .with("cached", true),
            )
            .await;
            return ApprovalOutcome::Allowed;
        }

        let Some(approval) = &self.approval else {
            warn!(hook = %hook_name, "ask_user verdict with no approval system");
            return ApprovalOutcome::Denied {
                reason: "no approval system available".into(),
            };
        };

        self.emit_event(
            names::APPROVAL_REQUESTED,
            Payload::new()
                .with("hook_name", hook_name)
                .with("prompt", request.prompt.clone())
                .with("options", request.options.clone()),
        )
        .await;

        let timeout = request.timeout_secs.map(Duration::from_secs_f64);
        let call = approval.request_approval(
            &request.prompt,
            &request.options,
            timeout,
            request.default.as_deref(),
        );
        let result = match timeout {
            Some(t) => match tokio::time::timeout(t, call).await {
                Ok(result) => result,
                Err(_) => Err(KernelError::ApprovalTimeout),
            },
            None => call.await,
        };

        match result {
            Ok(option) => self.decide(hook_name, request, &option).await,
            Err(KernelError::ApprovalTimeout) => {
                self.emit_event(
                    names::APPROVAL_TIMEOUT,
                    Payload::new()
                        .with("hook_name", hook_name)
                        .with("default", request.default.clone().unwrap_or_default()),
                )
                .await;
                match &request.default {
                    Some(default) => {
                        let default = default.clone();
                        match self.decide(hook_name, request, &default).await {
                            ApprovalOutcome::Allowed => ApprovalOutcome::Allowed,
                            ApprovalOutcome::Denied { .. } => ApprovalOutcome::Denied {
                                reason: format!(
                                    "approval timeout: default '{}' applied",
                                    default
                                ),
                            },
                        }
                    }
                    None => ApprovalOutcome::Denied {
                        reason: "approval timeout with no default".into(),
                    },
                }
            }
            Err(e) => {
                warn!(hook = %hook_name, error = %e, "approval system failed");
                ApprovalOutcome::Denied {
                    reason: format!("approval failed: {}", e),
                }
            }
        }
    }
}

impl Coordinator {
    async fn decide(
        &self,
        hook_name: &str,
        request: &ApprovalRequest,
        option: &str,
    ) -> ApprovalOutcome {
        if !request.options.is_empty() && !request.options.iter().any(|o| o == option) {
            warn!(hook = %hook_name, option = %option, "invalid approval option");
            self.emit_event(
                names::APPROVAL_DECISION,
                Payload::new()
                    .with("hook_name", hook_name)
                    .with("option", option)
                    .with("valid", false),
            )
            .await;
            return ApprovalOutcome::Denied {
                reason: format!("invalid approval option '{}'", option),
            };
        }

        if option == "allow-always" || option == "always" {
            self.approval_cache
                .insert(request.cache_key(hook_name), option.to_string());
        }

        self.emit_event(
            names::APPROVAL_DECISION,
            Payload::new()
                .with("hook_name", hook_name)
                .with("option", option)
                .with("cached", false),
        )
        .await;

        if option == "deny" {
            ApprovalOutcome::Denied {
                reason: format!("denied by approval: {}", request.prompt),
            }
        } else {
            ApprovalOutcome::Allowed
        }
    }
}
