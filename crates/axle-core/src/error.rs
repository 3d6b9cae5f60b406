//! Error types for the Axle kernel

use thiserror::Error;

#[derive(Error, Debug)]
pub enum KernelError {
    #[error("invalid mount plan: {0}")]
    ConfigInvalid(String),

    #[error("module not found: {module}")]
    ModuleNotFound { module: String },

    #[error("module failed to mount: {module} - {reason}")]
    ModuleLoadFailure { module: String, reason: String },

    #[error("session is not initialized")]
    NotInitialized,

    #[error("session is already initialized")]
    AlreadyInitialized,

    #[error("mount point '{point}' already holds '{existing}'")]
    MountConflict { point: String, existing: String },

    #[error("context injection of {size} bytes exceeds the {limit}-byte limit")]
    InjectionTooLarge { size: usize, limit: usize },

    #[error("hook handler '{name}' failed: {reason}")]
    HookHandlerError { name: String, reason: String },

    #[error("cancelled")]
    Cancelled,

    #[error("approval request timed out")]
    ApprovalTimeout,

    #[error("capability not found: {0}")]
    CapabilityNotFound(String),

    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, KernelError>;

impl KernelError {
    pub fn config_invalid(reason: impl Into<String>) -> Self {
        Self::ConfigInvalid(reason.into())
    }

    pub fn module_not_found(module: impl Into<String>) -> Self {
        Self::ModuleNotFound {
            module: module.into(),
        }
    }

    pub fn module_load_failure(module: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ModuleLoadFailure {
            module: module.into(),
            reason: reason.into(),
        }
    }

    pub fn mount_conflict(point: impl Into<String>, existing: impl Into<String>) -> Self {
        Self::MountConflict {
            point: point.into(),
            existing: existing.into(),
        }
    }

    pub fn hook_handler_error(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::HookHandlerError {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// True for the error kinds that abort session construction or a turn.
    /// Everything else is logged and contained by the kernel.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigInvalid(_)
                | Self::NotInitialized
                | Self::MountConflict { .. }
                | Self::Cancelled
        )
    }
}
