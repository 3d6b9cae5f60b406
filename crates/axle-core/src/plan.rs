//! Mount plan - the declarative configuration a session is built from
//!
//! Module identifiers are opaque strings resolved by the external loader;
//! `${ENV}` placeholders inside config values are the caller's concern and
//! pass through untouched.

use crate::error::{KernelError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One module entry in an ordered mount list.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleEntry {
    pub module: String,
    /// Mount name; defaults to the module identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub config: Value,
}

impl ModuleEntry {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            ..Self::default()
        }
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The name this entry mounts under.
    pub fn mount_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.module)
    }
}

/// The required `session` section naming the two singleton modules.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSection {
    pub orchestrator: String,
    pub context: String,
}

/// Optional free-form configuration for the context module.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextSection {
    #[serde(default)]
    pub config: Value,
}

/// The full mount plan tree.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MountPlan {
    pub session: SessionSection,
    #[serde(default)]
    pub context: ContextSection,
    #[serde(default)]
    pub providers: Vec<ModuleEntry>,
    #[serde(default)]
    pub tools: Vec<ModuleEntry>,
    #[serde(default)]
    pub agents: Vec<ModuleEntry>,
    #[serde(default)]
    pub hooks: Vec<ModuleEntry>,
}

impl MountPlan {
    /// Parse a plan from a JSON object value.
    pub fn from_value(value: Value) -> Result<Self> {
        let plan: MountPlan = serde_json::from_value(value)
            .map_err(|e| KernelError::config_invalid(e.to_string()))?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| KernelError::config_invalid(e.to_string()))?;
        Self::from_value(value)
    }

    /// Check the required keys without consuming the plan.
    pub fn validate(&self) -> Result<()> {
        if self.session.orchestrator.is_empty() {
            return Err(KernelError::config_invalid(
                "session.orchestrator is required",
            ));
        }
        if self.session.context.is_empty() {
            return Err(KernelError::config_invalid("session.context is required"));
        }
        if self.providers.is_empty() {
            return Err(KernelError::config_invalid(
                "at least one provider is required",
            ));
        }
        for entry in self
            .providers
            .iter()
            .chain(&self.tools)
            .chain(&self.agents)
            .chain(&self.hooks)
        {
            if entry.module.is_empty() {
                return Err(KernelError::config_invalid("empty module identifier"));
            }
        }
        Ok(())
    }

    /// Derive a child plan by shallow-merging `overrides` (a JSON object)
    /// on top of this plan: top-level keys are replaced wholesale.
    pub fn merged_with(&self, overrides: Value) -> Result<Self> {
        let Value::Object(overrides) = overrides else {
            return Err(KernelError::config_invalid(
                "fork override must be a JSON object",
            ));
        };
        let mut base = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => return Err(KernelError::config_invalid("plan is not serializable")),
        };
        for (key, value) in overrides {
            base.insert(key, value);
        }
        Self::from_value(Value::Object(base))
    }
}
