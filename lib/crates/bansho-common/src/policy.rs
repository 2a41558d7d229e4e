//! Declarative YAML policy: which roles may call which tools, and the
//! rate-limit windows that apply per API key and per tool.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::PolicyError;

pub const TOOL_WILDCARD: &str = "*";

/// A single role's tool allow-list.
///
/// `allow: ["*"]` permits every tool. Construction always collapses the
/// list to `["*"]` the moment a wildcard entry appears, and de-duplicates
/// named entries while preserving first-seen order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RoleToolPolicy {
    #[serde(default, deserialize_with = "deserialize_allow_list")]
    allow: Vec<String>,
}

/// Run a deserialized `allow` list through the same wildcard-collapse and
/// dedup normalization [`RoleToolPolicy::new`] applies, so a policy loaded
/// from YAML is normalized exactly like one built in code.
fn deserialize_allow_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Vec::<String>::deserialize(deserializer)?;
    Ok(normalize_allow_list(raw))
}

impl RoleToolPolicy {
    #[must_use]
    pub fn new(allow: Vec<String>) -> Self {
        Self {
            allow: normalize_allow_list(allow),
        }
    }

    #[must_use]
    pub fn allow(&self) -> &[String] {
        &self.allow
    }

    #[must_use]
    pub fn allows(&self, tool_name: &str) -> bool {
        let normalized = tool_name.trim();
        if normalized.is_empty() {
            return false;
        }
        self.allow.iter().any(|t| t == TOOL_WILDCARD) || self.allow.iter().any(|t| t == normalized)
    }
}

impl Default for RoleToolPolicy {
    fn default() -> Self {
        Self { allow: Vec::new() }
    }
}

fn normalize_allow_list(tools: Vec<String>) -> Vec<String> {
    let mut normalized = Vec::new();
    for tool in tools {
        let name = tool.trim();
        if name.is_empty() {
            continue;
        }
        if name == TOOL_WILDCARD {
            return vec![TOOL_WILDCARD.to_string()];
        }
        if !normalized.iter().any(|existing: &String| existing == name) {
            normalized.push(name.to_string());
        }
    }
    normalized
}

/// The three recognized roles and their tool policies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RolesPolicy {
    #[serde(default = "RolesPolicy::default_admin")]
    pub admin: RoleToolPolicy,
    #[serde(default)]
    pub user: RoleToolPolicy,
    #[serde(default)]
    pub readonly: RoleToolPolicy,
}

impl RolesPolicy {
    fn default_admin() -> RoleToolPolicy {
        RoleToolPolicy::new(vec![TOOL_WILDCARD.to_string()])
    }

    #[must_use]
    pub fn for_role(&self, role: &str) -> Option<&RoleToolPolicy> {
        match role.trim().to_lowercase().as_str() {
            "admin" => Some(&self.admin),
            "user" => Some(&self.user),
            "readonly" => Some(&self.readonly),
            _ => None,
        }
    }

    /// Every tool name named anywhere in any role's allow list, excluding
    /// the wildcard itself. Used to distinguish "unknown tool" from
    /// "known tool, not allowed for this role".
    #[must_use]
    pub fn known_tools(&self) -> Vec<String> {
        let mut tools = Vec::new();
        for policy in [&self.admin, &self.user, &self.readonly] {
            for tool in &policy.allow {
                if tool != TOOL_WILDCARD && !tools.contains(tool) {
                    tools.push(tool.clone());
                }
            }
        }
        tools
    }
}

impl Default for RolesPolicy {
    fn default() -> Self {
        Self {
            admin: Self::default_admin(),
            user: RoleToolPolicy::default(),
            readonly: RoleToolPolicy::default(),
        }
    }
}

/// A requests-per-window rate limit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RateLimitWindow {
    #[serde(default = "RateLimitWindow::default_requests")]
    pub requests: u32,
    #[serde(default = "RateLimitWindow::default_window_seconds")]
    pub window_seconds: u32,
}

impl RateLimitWindow {
    fn default_requests() -> u32 {
        60
    }

    fn default_window_seconds() -> u32 {
        60
    }

    #[must_use]
    pub fn new(requests: u32, window_seconds: u32) -> Self {
        Self {
            requests,
            window_seconds,
        }
    }

    /// §3/§4.3: `requests` and `window_seconds` are both positive
    /// integers. `path` names the offending field for the error message
    /// (e.g. `rate_limits.per_tool.overrides.read_file`).
    fn validate(&self, path: &str) -> Result<(), PolicyError> {
        if self.requests == 0 || self.window_seconds == 0 {
            return Err(PolicyError::Invalid(format!(
                "{path}: requests and window_seconds must be positive (got requests={}, window_seconds={})",
                self.requests, self.window_seconds
            )));
        }
        Ok(())
    }
}

impl Default for RateLimitWindow {
    fn default() -> Self {
        Self {
            requests: Self::default_requests(),
            window_seconds: Self::default_window_seconds(),
        }
    }
}

/// Per-tool rate limits: a default window plus named overrides.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ToolRateLimitPolicy {
    #[serde(default = "ToolRateLimitPolicy::default_window")]
    pub default: RateLimitWindow,
    #[serde(default)]
    pub overrides: HashMap<String, RateLimitWindow>,
}

impl ToolRateLimitPolicy {
    fn default_window() -> RateLimitWindow {
        RateLimitWindow::new(30, 60)
    }

    fn validate(&self) -> Result<(), PolicyError> {
        self.default.validate("rate_limits.per_tool.default")?;
        for (tool, window) in &self.overrides {
            window.validate(&format!("rate_limits.per_tool.overrides.{tool}"))?;
        }
        Ok(())
    }

    #[must_use]
    pub fn for_tool(&self, tool_name: &str) -> RateLimitWindow {
        let normalized = tool_name.trim();
        if normalized.is_empty() {
            return self.default;
        }
        self.overrides
            .get(normalized)
            .copied()
            .unwrap_or(self.default)
    }
}

impl Default for ToolRateLimitPolicy {
    fn default() -> Self {
        Self {
            default: Self::default_window(),
            overrides: HashMap::new(),
        }
    }
}

/// Top-level rate limit policy: one window per API key, one per tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RateLimitsPolicy {
    #[serde(default = "RateLimitsPolicy::default_per_api_key")]
    pub per_api_key: RateLimitWindow,
    #[serde(default)]
    pub per_tool: ToolRateLimitPolicy,
}

impl RateLimitsPolicy {
    fn default_per_api_key() -> RateLimitWindow {
        RateLimitWindow::new(120, 60)
    }

    fn validate(&self) -> Result<(), PolicyError> {
        self.per_api_key.validate("rate_limits.per_api_key")?;
        self.per_tool.validate()
    }
}

impl Default for RateLimitsPolicy {
    fn default() -> Self {
        Self {
            per_api_key: Self::default_per_api_key(),
            per_tool: ToolRateLimitPolicy::default(),
        }
    }
}

/// The full policy document loaded from `config/policies.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct Policy {
    #[serde(default)]
    pub roles: RolesPolicy,
    #[serde(default)]
    pub rate_limits: RateLimitsPolicy,
}

impl Policy {
    #[must_use]
    pub fn is_tool_allowed(&self, role: &str, tool_name: &str) -> bool {
        match self.roles.for_role(role) {
            Some(role_policy) => role_policy.allows(tool_name),
            None => false,
        }
    }

    pub fn from_yaml(source: &str) -> Result<Self, PolicyError> {
        let policy: Self = serde_yaml_ng::from_str(source)?;
        policy.rate_limits.validate()?;
        Ok(policy)
    }

    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        let contents = std::fs::read_to_string(path).map_err(|source| PolicyError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_collapses_allow_list() {
        let policy = RoleToolPolicy::new(vec![
            "foo".to_string(),
            "*".to_string(),
            "bar".to_string(),
        ]);
        assert_eq!(policy.allow(), &["*".to_string()]);
        assert!(policy.allows("anything"));
    }

    #[test]
    fn dedups_preserving_order() {
        let policy = RoleToolPolicy::new(vec![
            "foo".to_string(),
            "bar".to_string(),
            "foo".to_string(),
        ]);
        assert_eq!(policy.allow(), &["foo".to_string(), "bar".to_string()]);
    }

    #[test]
    fn empty_tool_name_never_allowed() {
        let policy = RoleToolPolicy::new(vec!["*".to_string()]);
        assert!(!policy.allows(""));
        assert!(!policy.allows("   "));
    }

    #[test]
    fn default_admin_is_wildcard_others_are_empty() {
        let roles = RolesPolicy::default();
        assert!(roles.admin.allows("anything"));
        assert!(!roles.user.allows("anything"));
        assert!(!roles.readonly.allows("anything"));
    }

    #[test]
    fn unknown_role_has_no_policy() {
        let roles = RolesPolicy::default();
        assert!(roles.for_role("superadmin").is_none());
    }

    #[test]
    fn known_tools_excludes_wildcard() {
        let mut roles = RolesPolicy::default();
        roles.user = RoleToolPolicy::new(vec!["list_things".to_string()]);
        let known = roles.known_tools();
        assert!(known.contains(&"list_things".to_string()));
        assert!(!known.contains(&"*".to_string()));
    }

    #[test]
    fn per_tool_override_falls_back_to_default() {
        let mut policy = ToolRateLimitPolicy::default();
        policy
            .overrides
            .insert("expensive_tool".to_string(), RateLimitWindow::new(5, 60));

        assert_eq!(policy.for_tool("expensive_tool"), RateLimitWindow::new(5, 60));
        assert_eq!(policy.for_tool("other_tool"), policy.default);
        assert_eq!(policy.for_tool(""), policy.default);
    }

    #[test]
    fn parses_minimal_yaml() {
        let yaml = "roles:\n  user:\n    allow: [\"list_things\"]\n";
        let policy = Policy::from_yaml(yaml).unwrap();
        assert!(policy.is_tool_allowed("user", "list_things"));
        assert!(!policy.is_tool_allowed("user", "delete_things"));
        assert!(policy.is_tool_allowed("admin", "anything"));
        assert!(!policy.is_tool_allowed("nonexistent", "list_things"));
    }

    #[test]
    fn rejects_unknown_fields() {
        let yaml = "roles:\n  user:\n    allow: []\nextra_field: true\n";
        assert!(Policy::from_yaml(yaml).is_err());
    }

    #[test]
    fn full_yaml_round_trip() {
        let yaml = r#"
roles:
  admin:
    allow: ["*"]
  user:
    allow: ["read_file", "list_dir"]
  readonly:
    allow: ["list_dir"]
rate_limits:
  per_api_key:
    requests: 100
    window_seconds: 60
  per_tool:
    default:
      requests: 20
      window_seconds: 60
    overrides:
      read_file:
        requests: 5
        window_seconds: 30
"#;
        let policy = Policy::from_yaml(yaml).unwrap();
        assert_eq!(policy.rate_limits.per_api_key, RateLimitWindow::new(100, 60));
        assert_eq!(
            policy.rate_limits.per_tool.for_tool("read_file"),
            RateLimitWindow::new(5, 30)
        );
        assert_eq!(
            policy.rate_limits.per_tool.for_tool("list_dir"),
            RateLimitWindow::new(20, 60)
        );
    }

    #[test]
    fn rejects_zero_window_seconds() {
        let yaml = "rate_limits:\n  per_api_key:\n    requests: 10\n    window_seconds: 0\n";
        let err = Policy::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, PolicyError::Invalid(_)));
    }

    #[test]
    fn rejects_zero_requests() {
        let yaml = "rate_limits:\n  per_tool:\n    default:\n      requests: 0\n      window_seconds: 60\n";
        let err = Policy::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, PolicyError::Invalid(_)));
    }

    #[test]
    fn rejects_zero_override_window() {
        let yaml = "rate_limits:\n  per_tool:\n    overrides:\n      read_file:\n        requests: 5\n        window_seconds: 0\n";
        let err = Policy::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, PolicyError::Invalid(_)));
    }

    #[test]
    fn yaml_allow_list_is_normalized_like_new() {
        let yaml = "roles:\n  user:\n    allow: [\"foo\", \"foo\", \"*\", \"bar\"]\n";
        let policy = Policy::from_yaml(yaml).unwrap();
        assert_eq!(policy.roles.user.allow(), &["*".to_string()]);
    }

    #[test]
    fn yaml_allow_list_dedups_preserving_order() {
        let yaml = "roles:\n  user:\n    allow: [\"foo\", \"bar\", \"foo\"]\n";
        let policy = Policy::from_yaml(yaml).unwrap();
        assert_eq!(
            policy.roles.user.allow(),
            &["foo".to_string(), "bar".to_string()]
        );
    }
}
