//! RBAC domain model: roles map to permissions, optionally guarded by
//! conditions evaluated against a request context.

use serde::{Deserialize, Serialize};

/// Comparison operator for a permission condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
}

impl ConditionOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::In => "in",
        }
    }
}

/// A single condition on a permission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: ConditionOperator,
    pub value: serde_json::Value,
}

impl Condition {
    /// Evaluate against the request context. A missing field never
    /// satisfies a condition.
    pub fn evaluate(&self, context: &serde_json::Value) -> bool {
        let Some(actual) = context.get(&self.field) else {
            return false;
        };

        match self.operator {
            ConditionOperator::Eq => actual == &self.value,
            ConditionOperator::Neq => actual != &self.value,
            ConditionOperator::Lt | ConditionOperator::Lte
            | ConditionOperator::Gt | ConditionOperator::Gte => {
                match (actual.as_f64(), self.value.as_f64()) {
                    (Some(a), Some(b)) => match self.operator {
                        ConditionOperator::Lt => a < b,
                        ConditionOperator::Lte => a <= b,
                        ConditionOperator::Gt => a > b,
                        ConditionOperator::Gte => a >= b,
                        _ => unreachable!(),
                    },
                    _ => false,
                }
            }
            ConditionOperator::In => self
                .value
                .as_array()
                .is_some_and(|arr| arr.contains(actual)),
        }
    }
}

/// A grant of `action` on `resource`, optionally conditioned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permission {
    pub resource: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl Permission {
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
            conditions: Vec::new(),
        }
    }

    pub fn with_condition(
        mut self,
        field: impl Into<String>,
        operator: ConditionOperator,
        value: serde_json::Value,
    ) -> Self {
        self.conditions.push(Condition {
            field: field.into(),
            operator,
            value,
        });
        self
    }

    /// `*` wildcards match any resource or action.
    pub fn covers(&self, resource: &str, action: &str) -> bool {
        (self.resource == "*" || self.resource == resource)
            && (self.action == "*" || self.action == action)
    }
}

/// What a caller asks RBAC about.
#[derive(Debug, Clone)]
pub struct PermissionCheck {
    pub resource: String,
    pub action: String,
    pub context: Option<serde_json::Value>,
}

impl PermissionCheck {
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }
}

/// The answer, with the matched grant when permitted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PermissionDecision {
    pub granted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_permission: Option<Permission>,
}

impl PermissionDecision {
    pub fn granted(matched: Permission) -> Self {
        Self {
            granted: true,
            reason: None,
            matched_permission: Some(matched),
        }
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            granted: false,
            reason: Some(reason.into()),
            matched_permission: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_condition_eq_neq() {
        let cond = Condition {
            field: "owner".into(),
            operator: ConditionOperator::Eq,
            value: json!("u1"),
        };
        assert!(cond.evaluate(&json!({"owner": "u1"})));
        assert!(!cond.evaluate(&json!({"owner": "u2"})));
        assert!(!cond.evaluate(&json!({})));
    }

    #[test]
    fn test_condition_numeric_comparisons() {
        let cond = Condition {
            field: "budget".into(),
            operator: ConditionOperator::Lte,
            value: json!(1000),
        };
        assert!(cond.evaluate(&json!({"budget": 1000})));
        assert!(cond.evaluate(&json!({"budget": 999.5})));
        assert!(!cond.evaluate(&json!({"budget": 1001})));
        assert!(!cond.evaluate(&json!({"budget": "lots"})));
    }

    #[test]
    fn test_condition_in() {
        let cond = Condition {
            field: "env".into(),
            operator: ConditionOperator::In,
            value: json!(["dev", "staging"]),
        };
        assert!(cond.evaluate(&json!({"env": "dev"})));
        assert!(!cond.evaluate(&json!({"env": "prod"})));
    }

    #[test]
    fn test_permission_wildcards() {
        let perm = Permission::new("*", "*");
        assert!(perm.covers("tasks", "cancel"));
        let perm = Permission::new("tasks", "read");
        assert!(perm.covers("tasks", "read"));
        assert!(!perm.covers("tasks", "cancel"));
        assert!(!perm.covers("audit", "read"));
    }
}
