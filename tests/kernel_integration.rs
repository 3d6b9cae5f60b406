//! Integration tests: a full session wired from stub modules.
//!
//! These drive the kernel end to end - mount plan through loader, hook
//! verdicts steering a tool-calling orchestrator, approval delegation,
//! injection budgets, fork lineage, and cancellation - the way an embedding
//! runtime would use it.

use axle::{
    hook_fn, AgentDef, ApprovalSystem, CancelToken, ChatRequest, ChatResponse, ContextStore,
    Coordinator, Decision, DisplaySystem, HookResult, KernelError, Message, MessageLevel, Module,
    ModuleEntry, ModuleFactory, ModuleLoader, MountPlan, Mounted, Orchestrator, Payload, Provider,
    Result, Role, Session, SessionOptions, SessionState, Tool, ToolOutput,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ===========================================================================
// Stub modules
// ===========================================================================

struct MemoryContext {
    messages: Mutex<Vec<Message>>,
}

#[async_trait::async_trait]
impl ContextStore for MemoryContext {
    async fn add_message(&self, role: Role, content: &str, metadata: Option<Value>) -> Result<()> {
        self.messages.lock().unwrap().push(Message {
            role,
            content: content.to_string(),
            metadata,
        });
        Ok(())
    }

    async fn get_messages(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }

    async fn should_compact(&self) -> bool {
        false
    }

    async fn compact(&self) -> Result<()> {
        Ok(())
    }

    async fn clear(&self) {
        self.messages.lock().unwrap().clear();
    }
}

struct EchoProvider;

#[async_trait::async_trait]
impl Provider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse> {
        let last = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(ChatResponse {
            content: format!("echo: {}", last),
            stop_reason: Some("end_turn".into()),
        })
    }
}

struct ShoutTool;

#[async_trait::async_trait]
impl Tool for ShoutTool {
    fn name(&self) -> &str {
        "shout"
    }

    fn schema(&self) -> Value {
        json!({"type": "object", "properties": {"text": {"type": "string"}}})
    }

    async fn execute(&self, input: Value) -> ToolOutput {
        match input["text"].as_str() {
            Some(text) => ToolOutput::text(text.to_uppercase()),
            None => ToolOutput::error("missing 'text'"),
        }
    }
}

struct GreeterAgent;

#[async_trait::async_trait]
impl AgentDef for GreeterAgent {
    fn name(&self) -> &str {
        "greeter"
    }

    async fn run(&self, prompt: &str, _: Arc<Coordinator>, _: Arc<CancelToken>) -> Result<Value> {
        Ok(json!(format!("hello, {}", prompt)))
    }
}

/// Orchestrator mimicking a single tool-use step: it asks the hooks for
/// permission via `tool:pre`, runs the tool if allowed, reports via
/// `tool:post`, and finishes with a provider call.
struct ToolLoopOrchestrator;

#[async_trait::async_trait]
impl Orchestrator for ToolLoopOrchestrator {
    async fn run(
        &self,
        prompt: &str,
        coordinator: Arc<Coordinator>,
        cancel: Arc<CancelToken>,
    ) -> Result<Value> {
        let context = coordinator.context()?;
        context.add_message(Role::User, prompt, None).await?;

        let mut tool_result = None;
        if let Some(tool) = coordinator.tool("shout") {
            let dispatch = coordinator
                .dispatch(
                    "tool:pre",
                    Payload::new()
                        .with("tool", "shout")
                        .with("input", json!({"text": prompt})),
                )
                .await;
            match dispatch.decision {
                Decision::Deny { reason } => {
                    context
                        .add_message(
                            Role::Tool,
                            &format!("tool denied: {}", reason.unwrap_or_default()),
                            None,
                        )
                        .await?;
                }
                _ => {
                    if cancel.track_tool("t-1", "shout") {
                        // a modify verdict may have rewritten the input
                        let input = dispatch
                            .payload
                            .get("input")
                            .cloned()
                            .unwrap_or_else(|| json!({"text": prompt}));
                        let output = tool.execute(input).await;
                        cancel.complete_tool("t-1");
                        coordinator
                            .dispatch(
                                "tool:post",
                                Payload::new()
                                    .with("tool", "shout")
                                    .with("is_error", output.is_error()),
                            )
                            .await;
                        tool_result = Some(output.to_content_string());
                    }
                }
            }
        }

        let (_, provider) = coordinator
            .providers()
            .into_iter()
            .next()
            .ok_or_else(|| KernelError::module_not_found("providers"))?;
        let response = provider
            .complete(ChatRequest {
                messages: context.get_messages().await,
                ..ChatRequest::default()
            })
            .await?;
        context
            .add_message(Role::Assistant, &response.content, None)
            .await?;

        Ok(json!({
            "response": response.content,
            "tool_result": tool_result,
        }))
    }
}

/// Hook module factory: registers an auditing handler at mount and
/// unregisters it at teardown.
struct AuditHookFactory;

#[async_trait::async_trait]
impl ModuleFactory for AuditHookFactory {
    async fn mount(&self, coordinator: Arc<Coordinator>, config: Value) -> Result<Mounted> {
        let deny_tool = config["deny_tool"].as_str().map(String::from);
        let handler = hook_fn(move |_, payload: &Payload| match (&deny_tool, payload.get_str("tool")) {
            (Some(denied), Some(tool)) if denied == tool => HookResult::deny("tool blocked by audit"),
            _ => HookResult::cont(),
        });
        coordinator
            .hooks()
            .register("tool:pre", "audit", 10, handler.clone());

        let hooks = coordinator.hooks().clone();
        Ok(Mounted::new(Module::Hook(handler)).with_teardown(Box::new(move || {
            Box::pin(async move {
                hooks.unregister("audit");
                Ok(())
            })
        })))
    }
}

enum Stub {
    Context,
    Provider,
    Tool,
    Agent,
    Orchestrator,
}

struct StubFactory(Stub);

#[async_trait::async_trait]
impl ModuleFactory for StubFactory {
    async fn mount(&self, _: Arc<Coordinator>, _: Value) -> Result<Mounted> {
        let module = match self.0 {
            Stub::Context => Module::Context(Arc::new(MemoryContext {
                messages: Mutex::new(Vec::new()),
            })),
            Stub::Provider => Module::Provider(Arc::new(EchoProvider)),
            Stub::Tool => Module::Tool(Arc::new(ShoutTool)),
            Stub::Agent => Module::Agent(Arc::new(GreeterAgent)),
            Stub::Orchestrator => Module::Orchestrator(Arc::new(ToolLoopOrchestrator)),
        };
        Ok(Mounted::new(module))
    }
}

struct StubLoader {
    factories: HashMap<String, Arc<dyn ModuleFactory>>,
}

impl StubLoader {
    fn new() -> Arc<Self> {
        let mut factories: HashMap<String, Arc<dyn ModuleFactory>> = HashMap::new();
        factories.insert("context.memory".into(), Arc::new(StubFactory(Stub::Context)));
        factories.insert("providers.echo".into(), Arc::new(StubFactory(Stub::Provider)));
        factories.insert("tools.shout".into(), Arc::new(StubFactory(Stub::Tool)));
        factories.insert("agents.greeter".into(), Arc::new(StubFactory(Stub::Agent)));
        factories.insert("agent.loop".into(), Arc::new(StubFactory(Stub::Orchestrator)));
        factories.insert("hooks.audit".into(), Arc::new(AuditHookFactory));
        Arc::new(Self { factories })
    }
}

#[async_trait::async_trait]
impl ModuleLoader for StubLoader {
    async fn load(&self, module_id: &str) -> Result<Arc<dyn ModuleFactory>> {
        self.factories
            .get(module_id)
            .cloned()
            .ok_or_else(|| KernelError::module_not_found(module_id))
    }
}

struct BlockingApproval;

#[async_trait::async_trait]
impl ApprovalSystem for BlockingApproval {
    async fn request_approval(
        &self,
        _: &str,
        _: &[String],
        _: Option<Duration>,
        _: Option<&str>,
    ) -> Result<String> {
        std::future::pending().await
    }
}

struct CountingDisplay {
    shown: AtomicUsize,
}

#[async_trait::async_trait]
impl DisplaySystem for CountingDisplay {
    async fn show_message(&self, _: &str, _: MessageLevel, _: &str) -> Result<()> {
        self.shown.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn full_plan() -> MountPlan {
    MountPlan::from_value(json!({
        "session": {"orchestrator": "agent.loop", "context": "context.memory"},
        "providers": [{"module": "providers.echo"}],
        "tools": [{"module": "tools.shout", "name": "shout"}],
        "agents": [{"module": "agents.greeter", "name": "greeter"}],
    }))
    .unwrap()
}

fn session_with(plan: MountPlan) -> Session {
    Session::with_options(
        plan,
        SessionOptions {
            loader: Some(StubLoader::new()),
            ..SessionOptions::default()
        },
    )
    .unwrap()
}

// ===========================================================================
// End-to-end lifecycle
// ===========================================================================

#[tokio::test]
async fn full_session_runs_a_tool_calling_turn() {
    let session = session_with(full_plan());
    session.initialize().await.unwrap();

    let result = session.execute("make it loud").await.unwrap();
    assert_eq!(result["tool_result"], "MAKE IT LOUD");
    assert!(result["response"].as_str().unwrap().starts_with("echo:"));

    session.cleanup().await.unwrap();
    assert_eq!(session.state().await, SessionState::CleanedUp);
}

#[tokio::test]
async fn every_emitted_event_carries_the_full_envelope() {
    let session = session_with(full_plan());
    let log: Arc<Mutex<Vec<Payload>>> = Arc::new(Mutex::new(Vec::new()));
    for event in [
        "session:start",
        "turn:start",
        "prompt:submit",
        "tool:pre",
        "tool:post",
        "prompt:complete",
        "turn:end",
        "session:end",
    ] {
        let log = log.clone();
        session.coordinator().hooks().register(
            event,
            format!("recorder-{}", event),
            -100,
            hook_fn(move |_, payload| {
                log.lock().unwrap().push(payload.clone());
                HookResult::cont()
            }),
        );
    }

    session.initialize().await.unwrap();
    session.execute("hello").await.unwrap();
    session.cleanup().await.unwrap();

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 8);
    let seqs: Vec<u64> = log.iter().map(|p| p.get_u64("seq").unwrap()).collect();
    assert!(
        seqs.windows(2).all(|w| w[0] < w[1]),
        "seq not strictly increasing: {:?}",
        seqs
    );
    for payload in log.iter() {
        assert_eq!(payload.get_str("session_id"), Some(session.session_id()));
        assert!(payload.get_str("ts").is_some());
        assert!(payload.get_str("event").is_some());
    }
}

// ===========================================================================
// Hook verdicts steering the orchestrator
// ===========================================================================

#[tokio::test]
async fn audit_hook_module_denies_the_tool() {
    let mut plan = full_plan();
    plan.hooks = vec![
        ModuleEntry::new("hooks.audit").with_config(json!({"deny_tool": "shout"})),
    ];
    let session = session_with(plan);
    session.initialize().await.unwrap();

    let result = session.execute("make it loud").await.unwrap();
    assert_eq!(result["tool_result"], Value::Null);

    let transcript = session.coordinator().context().unwrap().get_messages().await;
    assert!(transcript
        .iter()
        .any(|m| m.content.contains("tool blocked by audit")));
}

#[tokio::test]
async fn modify_verdict_rewrites_the_tool_input() {
    let session = session_with(full_plan());
    session.coordinator().hooks().register(
        "tool:pre",
        "rewriter",
        0,
        hook_fn(|_, payload| {
            let mut data = payload.fields().clone();
            data.insert("input".into(), json!({"text": "rewritten"}));
            HookResult::modify(Value::Object(data))
        }),
    );
    session.initialize().await.unwrap();

    let result = session.execute("original").await.unwrap();
    assert_eq!(result["tool_result"], "REWRITTEN");
}

#[tokio::test]
async fn prompt_submit_injection_lands_in_the_context_within_budget() {
    let session = session_with(full_plan());
    session.coordinator().hooks().register(
        "prompt:submit",
        "primer",
        0,
        hook_fn(|_, _| HookResult::inject("house rules: be brief")),
    );
    session.initialize().await.unwrap();
    session.execute("hi").await.unwrap();

    let transcript = session.coordinator().context().unwrap().get_messages().await;
    let injected = transcript
        .iter()
        .find(|m| m.content == "house rules: be brief")
        .expect("injection missing from context");
    assert_eq!(injected.role, Role::System);
    let metadata = injected.metadata.as_ref().unwrap();
    assert_eq!(metadata["source"], "hook");
    assert_eq!(metadata["hook_name"], "primer");
    assert_eq!(
        session.coordinator().turn_injected_bytes(),
        "house rules: be brief".len()
    );
}

#[tokio::test]
async fn oversized_injection_is_dropped_but_the_turn_continues() {
    let session = session_with(full_plan());
    session.coordinator().hooks().register(
        "prompt:submit",
        "flooder",
        0,
        hook_fn(|_, _| HookResult::inject("x".repeat(12_000))),
    );
    session.initialize().await.unwrap();

    let result = session.execute("hi").await.unwrap();
    assert_eq!(result["tool_result"], "HI");
    assert_eq!(session.coordinator().turn_injected_bytes(), 0);
}

#[tokio::test]
async fn ask_user_timeout_applies_the_deny_default() {
    let plan = full_plan();
    let session = Session::with_options(
        plan,
        SessionOptions {
            loader: Some(StubLoader::new()),
            approval: Some(Arc::new(BlockingApproval)),
            ..SessionOptions::default()
        },
    )
    .unwrap();
    session.coordinator().hooks().register(
        "tool:pre",
        "gate",
        0,
        hook_fn(|_, _| {
            HookResult::ask_user("allow the shout tool?", &["allow", "deny"])
                .with_timeout(0.01)
                .with_default("deny")
        }),
    );
    let timeouts: Arc<Mutex<Vec<Payload>>> = Arc::new(Mutex::new(Vec::new()));
    let t = timeouts.clone();
    session.coordinator().hooks().register(
        "approval:timeout",
        "timeout-recorder",
        0,
        hook_fn(move |_, payload| {
            t.lock().unwrap().push(payload.clone());
            HookResult::cont()
        }),
    );
    session.initialize().await.unwrap();

    let result = session.execute("loud").await.unwrap();
    // the tool was denied via the timeout default, the turn completed
    assert_eq!(result["tool_result"], Value::Null);
    assert_eq!(timeouts.lock().unwrap().len(), 1);

    let transcript = session.coordinator().context().unwrap().get_messages().await;
    assert!(transcript
        .iter()
        .any(|m| m.content.contains("timeout")));
}

#[tokio::test]
async fn hook_user_message_reaches_the_display_system() {
    let display = Arc::new(CountingDisplay {
        shown: AtomicUsize::new(0),
    });
    let session = Session::with_options(
        full_plan(),
        SessionOptions {
            loader: Some(StubLoader::new()),
            display: Some(display.clone()),
            ..SessionOptions::default()
        },
    )
    .unwrap();
    session.coordinator().hooks().register(
        "tool:post",
        "notifier",
        0,
        hook_fn(|_, _| {
            HookResult::cont().with_user_message("tool finished", MessageLevel::Info)
        }),
    );
    session.initialize().await.unwrap();
    session.execute("hi").await.unwrap();

    assert_eq!(display.shown.load(Ordering::SeqCst), 1);
}

// ===========================================================================
// Fork and cancellation
// ===========================================================================

#[tokio::test]
async fn forked_child_inherits_the_plan_and_records_lineage() {
    let parent = session_with(full_plan());
    parent.initialize().await.unwrap();

    let child = parent.fork(None).await.unwrap();
    assert_eq!(child.parent_id(), Some(parent.session_id()));

    let forks: Arc<Mutex<Vec<Payload>>> = Arc::new(Mutex::new(Vec::new()));
    let f = forks.clone();
    child.coordinator().hooks().register(
        "session:fork",
        "fork-recorder",
        0,
        hook_fn(move |_, payload| {
            f.lock().unwrap().push(payload.clone());
            HookResult::cont()
        }),
    );
    child.initialize().await.unwrap();

    let forks = forks.lock().unwrap();
    assert_eq!(forks.len(), 1);
    assert_eq!(forks[0].get_str("session_id"), Some(child.session_id()));
    assert_eq!(forks[0].get_str("parent_id"), Some(parent.session_id()));
    drop(forks);

    // the child runs turns independently of the parent
    let result = child.execute("from the child").await.unwrap();
    assert_eq!(result["tool_result"], "FROM THE CHILD");
    parent.cleanup().await.unwrap();
    assert!(child.execute("still alive").await.is_ok());
}

#[tokio::test]
async fn graceful_cancel_stops_new_tool_admissions() {
    let session = session_with(full_plan());
    session.initialize().await.unwrap();
    assert!(session.request_cancel(false).await);

    // the orchestrator checks track_tool before running the tool
    let result = session.execute("loud").await.unwrap();
    assert_eq!(result["tool_result"], Value::Null);
}

#[tokio::test]
async fn hook_module_teardown_unregisters_its_handler() {
    let mut plan = full_plan();
    plan.hooks = vec![
        ModuleEntry::new("hooks.audit").with_config(json!({"deny_tool": "shout"})),
    ];
    let session = session_with(plan);
    session.initialize().await.unwrap();
    assert!(!session
        .coordinator()
        .hooks()
        .list_handlers(Some("tool:pre"))
        .is_empty());

    session.cleanup().await.unwrap();
    assert!(session
        .coordinator()
        .hooks()
        .list_handlers(Some("tool:pre"))
        .is_empty());
}

#[tokio::test]
async fn mounted_agent_is_reachable_through_the_coordinator() {
    let session = session_with(full_plan());
    session.initialize().await.unwrap();

    let agent = session
        .coordinator()
        .get(axle::MountPoint::Agents, Some("greeter"))
        .and_then(|m| m.as_agent())
        .unwrap();
    let out = agent
        .run(
            "kernel",
            session.coordinator().clone(),
            session.coordinator().cancellation().clone(),
        )
        .await
        .unwrap();
    assert_eq!(out, json!("hello, kernel"));
}
