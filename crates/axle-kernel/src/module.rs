//! Module contracts - the interfaces the kernel consumes from the outside
//!
//! Concrete providers/tools/orchestrators/context stores live elsewhere; the
//! kernel only knows these traits. The external loader resolves opaque module
//! identifiers to factories; the kernel never interprets identifier strings.

use crate::cancel::CancelToken;
use crate::coordinator::Coordinator;
use axle_core::hook::MessageLevel;
use axle_core::types::{ChatRequest, ChatResponse, Message, Role, StreamDelta, ToolOutput};
use axle_core::Result;
use futures::future::BoxFuture;
use futures::Stream;
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Deferred teardown a module hands back at mount time, run at unmount or
/// session cleanup.
pub type Teardown = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// Stream type for provider responses.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<StreamDelta>> + Send>>;

/// The named slots of the coordinator's mount table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MountPoint {
    Orchestrator,
    Context,
    Providers,
    Tools,
    Agents,
    Hooks,
}

impl MountPoint {
    /// Singleton mount points hold exactly one module.
    pub fn is_singleton(&self) -> bool {
        matches!(self, Self::Orchestrator | Self::Context)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Orchestrator => "orchestrator",
            Self::Context => "context",
            Self::Providers => "providers",
            Self::Tools => "tools",
            Self::Agents => "agents",
            Self::Hooks => "hooks",
        }
    }
}

impl std::fmt::Display for MountPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mounted module instance, tagged by the mount point it belongs to.
///
/// Hook modules register their handlers with the coordinator's registry
/// during their own `mount`; the tagged handle here is what the mount table
/// lists and what their teardown unregisters.
#[derive(Clone)]
pub enum Module {
    Orchestrator(Arc<dyn Orchestrator>),
    Context(Arc<dyn ContextStore>),
    Provider(Arc<dyn Provider>),
    Tool(Arc<dyn Tool>),
    Agent(Arc<dyn AgentDef>),
    Hook(Arc<dyn axle_hooks::HookHandler>),
}

impl Module {
    pub fn kind(&self) -> MountPoint {
        match self {
            Self::Orchestrator(_) => MountPoint::Orchestrator,
            Self::Context(_) => MountPoint::Context,
            Self::Provider(_) => MountPoint::Providers,
            Self::Tool(_) => MountPoint::Tools,
            Self::Agent(_) => MountPoint::Agents,
            Self::Hook(_) => MountPoint::Hooks,
        }
    }

    pub fn as_orchestrator(&self) -> Option<Arc<dyn Orchestrator>> {
        match self {
            Self::Orchestrator(m) => Some(m.clone()),
            _ => None,
        }
    }

    pub fn as_context(&self) -> Option<Arc<dyn ContextStore>> {
        match self {
            Self::Context(m) => Some(m.clone()),
            _ => None,
        }
    }

    pub fn as_provider(&self) -> Option<Arc<dyn Provider>> {
        match self {
            Self::Provider(m) => Some(m.clone()),
            _ => None,
        }
    }

    pub fn as_tool(&self) -> Option<Arc<dyn Tool>> {
        match self {
            Self::Tool(m) => Some(m.clone()),
            _ => None,
        }
    }

    pub fn as_agent(&self) -> Option<Arc<dyn AgentDef>> {
        match self {
            Self::Agent(m) => Some(m.clone()),
            _ => None,
        }
    }
}

/// What a factory hands back: the instance plus an optional teardown.
pub struct Mounted {
    pub module: Module,
    pub teardown: Option<Teardown>,
}

impl Mounted {
    pub fn new(module: Module) -> Self {
        Self {
            module,
            teardown: None,
        }
    }

    pub fn with_teardown(mut self, teardown: Teardown) -> Self {
        self.teardown = Some(teardown);
        self
    }
}

/// A module's asynchronous mount entry point.
#[async_trait::async_trait]
pub trait ModuleFactory: Send + Sync {
    async fn mount(&self, coordinator: Arc<Coordinator>, config: Value) -> Result<Mounted>;
}

/// Resolves opaque module identifiers to factories. Failures surface as
/// [`ModuleNotFound`](axle_core::KernelError::ModuleNotFound), which the
/// session rethrows for orchestrator/context and logs-and-skips for
/// everything else.
#[async_trait::async_trait]
pub trait ModuleLoader: Send + Sync {
    async fn load(&self, module_id: &str) -> Result<Arc<dyn ModuleFactory>>;
}

/// The conversation driver bound at the `orchestrator` mount point.
#[async_trait::async_trait]
pub trait Orchestrator: Send + Sync {
    async fn run(
        &self,
        prompt: &str,
        coordinator: Arc<Coordinator>,
        cancel: Arc<CancelToken>,
    ) -> Result<Value>;
}

/// An LLM provider. The kernel never calls providers; orchestrators do,
/// looking them up through the coordinator.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse>;

    /// Streaming variant; the default adapts `complete` into a two-delta
    /// stream for providers that don't stream natively.
    async fn stream(&self, request: ChatRequest) -> Result<ChatStream> {
        let response = self.complete(request).await?;
        let deltas: Vec<Result<StreamDelta>> = vec![
            Ok(StreamDelta::Text(response.content)),
            Ok(StreamDelta::Done {
                stop_reason: response.stop_reason,
            }),
        ];
        Ok(Box::pin(futures::stream::iter(deltas)))
    }
}

/// A tool callable by orchestrators.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// JSON Schema describing the tool's input mapping.
    fn schema(&self) -> Value;

    async fn execute(&self, input: Value) -> ToolOutput;
}

/// The conversation context bound at the `context` mount point.
#[async_trait::async_trait]
pub trait ContextStore: Send + Sync {
    async fn add_message(&self, role: Role, content: &str, metadata: Option<Value>)
        -> Result<()>;

    async fn get_messages(&self) -> Vec<Message>;

    async fn should_compact(&self) -> bool;

    async fn compact(&self) -> Result<()>;

    async fn clear(&self);
}

/// A named sub-agent definition mounted under `agents`.
#[async_trait::async_trait]
pub trait AgentDef: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    async fn run(
        &self,
        prompt: &str,
        coordinator: Arc<Coordinator>,
        cancel: Arc<CancelToken>,
    ) -> Result<Value>;
}

/// The external approval surface. Returns the chosen option string; an
/// [`ApprovalTimeout`](axle_core::KernelError::ApprovalTimeout) is mapped to
/// the request's default by the coordinator, never re-raised.
#[async_trait::async_trait]
pub trait ApprovalSystem: Send + Sync {
    async fn request_approval(
        &self,
        prompt: &str,
        options: &[String],
        timeout: Option<Duration>,
        default: Option<&str>,
    ) -> Result<String>;
}

/// The external display surface. Fire-and-forget: failures are logged by the
/// coordinator and never raised.
#[async_trait::async_trait]
pub trait DisplaySystem: Send + Sync {
    async fn show_message(&self, text: &str, level: MessageLevel, source: &str) -> Result<()>;
}
