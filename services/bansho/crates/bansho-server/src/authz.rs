//! Tool authorization decision table.

use bansho_common::policy::TOOL_WILDCARD;
use bansho_common::Policy;

use crate::authn::AuthContext;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationDecision {
    pub allowed: bool,
    pub role: String,
    pub tool_name: String,
    pub reason: &'static str,
    pub matched_rule: String,
}

#[must_use]
pub fn authorize_tool(policy: &Policy, auth_ctx: &AuthContext, tool_name: &str) -> AuthorizationDecision {
    let role = auth_ctx.role.trim().to_lowercase();
    let tool = tool_name.trim().to_string();

    if tool.is_empty() {
        return AuthorizationDecision {
            allowed: false,
            role,
            tool_name: tool,
            reason: "empty_tool_name",
            matched_rule: "deny:empty_tool_name".to_string(),
        };
    }

    let Some(role_policy) = policy.roles.for_role(&role) else {
        return AuthorizationDecision {
            allowed: false,
            role,
            tool_name: tool,
            reason: "unknown_role",
            matched_rule: "deny:unknown_role".to_string(),
        };
    };

    if role_policy.allows(&tool) {
        let matched_tool = if role_policy.allow().iter().any(|t| t == TOOL_WILDCARD) {
            TOOL_WILDCARD
        } else {
            tool.as_str()
        };
        return AuthorizationDecision {
            allowed: true,
            tool_name: tool.clone(),
            reason: "allowed",
            matched_rule: format!("roles.{role}.allow:{matched_tool}"),
            role,
        };
    }

    if !policy.roles.known_tools().iter().any(|t| t == &tool) {
        return AuthorizationDecision {
            allowed: false,
            role,
            tool_name: tool,
            reason: "unknown_tool",
            matched_rule: "deny:unknown_tool".to_string(),
        };
    }

    AuthorizationDecision {
        allowed: false,
        tool_name: tool,
        reason: "tool_not_allowed_for_role",
        matched_rule: format!("roles.{role}.allow"),
        role,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bansho_common::policy::{RoleToolPolicy, RolesPolicy};

    fn policy_with_user_allow(tools: &[&str]) -> Policy {
        let mut policy = Policy::default();
        policy.roles = RolesPolicy {
            admin: RoleToolPolicy::new(vec![TOOL_WILDCARD.to_string()]),
            user: RoleToolPolicy::new(tools.iter().map(|t| t.to_string()).collect()),
            readonly: RoleToolPolicy::default(),
        };
        policy
    }

    fn ctx(role: &str) -> AuthContext {
        AuthContext {
            api_key_id: "key-1".to_string(),
            role: role.to_string(),
        }
    }

    #[test]
    fn empty_tool_name_denied() {
        let policy = policy_with_user_allow(&["read_file"]);
        let decision = authorize_tool(&policy, &ctx("user"), "  ");
        assert!(!decision.allowed);
        assert_eq!(decision.reason, "empty_tool_name");
        assert_eq!(decision.matched_rule, "deny:empty_tool_name");
    }

    #[test]
    fn unknown_role_denied() {
        let policy = policy_with_user_allow(&["read_file"]);
        let decision = authorize_tool(&policy, &ctx("superadmin"), "read_file");
        assert!(!decision.allowed);
        assert_eq!(decision.reason, "unknown_role");
    }

    #[test]
    fn allowed_tool_reports_matched_rule() {
        let policy = policy_with_user_allow(&["read_file"]);
        let decision = authorize_tool(&policy, &ctx("user"), "read_file");
        assert!(decision.allowed);
        assert_eq!(decision.reason, "allowed");
        assert_eq!(decision.matched_rule, "roles.user.allow:read_file");
    }

    #[test]
    fn wildcard_allow_reports_wildcard_matched_rule() {
        let policy = policy_with_user_allow(&["read_file"]);
        let decision = authorize_tool(&policy, &ctx("admin"), "anything");
        assert!(decision.allowed);
        assert_eq!(decision.matched_rule, "roles.admin.allow:*");
    }

    #[test]
    fn unknown_tool_denied() {
        let policy = policy_with_user_allow(&["read_file"]);
        let decision = authorize_tool(&policy, &ctx("user"), "delete_everything");
        assert!(!decision.allowed);
        assert_eq!(decision.reason, "unknown_tool");
    }

    #[test]
    fn known_tool_not_allowed_for_role() {
        let mut policy = policy_with_user_allow(&["read_file"]);
        policy.roles.readonly = RoleToolPolicy::new(vec!["list_dir".to_string()]);
        let decision = authorize_tool(&policy, &ctx("readonly"), "read_file");
        assert!(!decision.allowed);
        assert_eq!(decision.reason, "tool_not_allowed_for_role");
        assert_eq!(decision.matched_rule, "roles.readonly.allow");
    }
}
