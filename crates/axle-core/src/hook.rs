//! Hook verdicts - the value objects handlers return to the dispatcher
//!
//! A handler never raises to steer control flow; it returns a [`HookResult`]
//! whose tagged `action` the dispatcher reconciles (deny and ask_user
//! short-circuit, modify replaces the flowing payload, inject_context
//! accumulates).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The tagged action of a hook verdict.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookAction {
    #[default]
    Continue,
    Deny,
    Modify,
    InjectContext,
    AskUser,
}

/// Role a context injection is written under. Defaults to `system`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InjectionRole {
    #[default]
    System,
    User,
    Assistant,
}

impl InjectionRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// Severity of a user-facing message routed to the display system.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    #[default]
    Info,
    Warning,
    Error,
}

impl MessageLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

/// Parameters of an `ask_user` verdict, handed to the approval system.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub prompt: String,
    pub options: Vec<String>,
    /// Seconds to wait for the user before applying `default`.
    pub timeout_secs: Option<f64>,
    pub default: Option<String>,
}

impl ApprovalRequest {
    /// Session-scoped cache key: `(hook, prompt, options sorted)`.
    pub fn cache_key(&self, hook_name: &str) -> String {
        let mut options = self.options.clone();
        options.sort();
        format!("{}\u{1f}{}\u{1f}{}", hook_name, self.prompt, options.join(","))
    }
}

/// A context injection accumulated during one emission.
#[derive(Clone, Debug, PartialEq)]
pub struct ContextInjection {
    pub text: String,
    pub role: InjectionRole,
    pub hook_name: String,
}

/// A user-facing message accumulated during one emission.
#[derive(Clone, Debug, PartialEq)]
pub struct UserNotice {
    pub text: String,
    pub level: MessageLevel,
    pub hook_name: String,
}

/// The verdict a hook handler returns for one event.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HookResult {
    pub action: HookAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Replacement payload when `action = modify`. Must be a JSON object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_injection: Option<String>,
    #[serde(default)]
    pub context_injection_role: InjectionRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_message: Option<String>,
    #[serde(default)]
    pub user_message_level: MessageLevel,
    /// Hide this hook's own output from the transcript/display.
    #[serde(default)]
    pub suppress_output: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub approval_options: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_timeout: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_default: Option<String>,
}

impl HookResult {
    /// Non-interfering verdict; the chain proceeds unchanged.
    pub fn cont() -> Self {
        Self::default()
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            action: HookAction::Deny,
            reason: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn modify(data: Value) -> Self {
        Self {
            action: HookAction::Modify,
            data: Some(data),
            ..Self::default()
        }
    }

    pub fn inject(text: impl Into<String>) -> Self {
        Self {
            action: HookAction::InjectContext,
            context_injection: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn inject_as(text: impl Into<String>, role: InjectionRole) -> Self {
        Self {
            context_injection_role: role,
            ..Self::inject(text)
        }
    }

    pub fn ask_user(prompt: impl Into<String>, options: &[&str]) -> Self {
        Self {
            action: HookAction::AskUser,
            approval_prompt: Some(prompt.into()),
            approval_options: options.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, secs: f64) -> Self {
        self.approval_timeout = Some(secs);
        self
    }

    pub fn with_default(mut self, option: impl Into<String>) -> Self {
        self.approval_default = Some(option.into());
        self
    }

    pub fn with_user_message(mut self, text: impl Into<String>, level: MessageLevel) -> Self {
        self.user_message = Some(text.into());
        self.user_message_level = level;
        self
    }

    pub fn suppressed(mut self) -> Self {
        self.suppress_output = true;
        self
    }

    /// Assemble the approval parameters of an `ask_user` verdict.
    pub fn approval_request(&self) -> Option<ApprovalRequest> {
        if self.action != HookAction::AskUser {
            return None;
        }
        Some(ApprovalRequest {
            prompt: self.approval_prompt.clone().unwrap_or_default(),
            options: self.approval_options.clone(),
            timeout_secs: self.approval_timeout,
            default: self.approval_default.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_constructors_set_action() {
        assert_eq!(HookResult::cont().action, HookAction::Continue);
        let d = HookResult::deny("blocked");
        assert_eq!(d.action, HookAction::Deny);
        assert_eq!(d.reason.as_deref(), Some("blocked"));
        let m = HookResult::modify(json!({"tool": "bash"}));
        assert_eq!(m.action, HookAction::Modify);
        let i = HookResult::inject_as("note", InjectionRole::User);
        assert_eq!(i.action, HookAction::InjectContext);
        assert_eq!(i.context_injection_role, InjectionRole::User);
    }

    #[test]
    fn test_injection_role_defaults_to_system() {
        assert_eq!(
            HookResult::inject("x").context_injection_role,
            InjectionRole::System
        );
    }

    #[test]
    fn test_approval_request_assembly() {
        let r = HookResult::ask_user("Run rm -rf?", &["allow", "deny"])
            .with_timeout(0.5)
            .with_default("deny");
        let req = r.approval_request().unwrap();
        assert_eq!(req.prompt, "Run rm -rf?");
        assert_eq!(req.options, vec!["allow", "deny"]);
        assert_eq!(req.timeout_secs, Some(0.5));
        assert_eq!(req.default.as_deref(), Some("deny"));
        assert!(HookResult::cont().approval_request().is_none());
    }

    #[test]
    fn test_cache_key_is_option_order_insensitive() {
        let a = ApprovalRequest {
            prompt: "p".into(),
            options: vec!["allow".into(), "deny".into()],
            ..Default::default()
        };
        let b = ApprovalRequest {
            prompt: "p".into(),
            options: vec!["deny".into(), "allow".into()],
            ..Default::default()
        };
        assert_eq!(a.cache_key("h"), b.cache_key("h"));
        assert_ne!(a.cache_key("h"), a.cache_key("other"));
    }
}
