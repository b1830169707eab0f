//! Structured view of an infrastructure plan
//!
//! Mirrors the subset of `terraform show -json` output the policy gate reads:
//! a list of resource changes, each with its address, resource type, planned
//! actions and the before/after attribute states.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::PlanError;

/// Planned action marking a pure removal
pub const DELETE_ACTION: &str = "delete";

/// A converted plan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terraform_version: Option<String>,
    #[serde(default)]
    pub resource_changes: Vec<ResourceChange>,
}

/// One planned change to one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceChange {
    pub address: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub change: Change,
}

/// Actions plus the attribute states around them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Change {
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub before: Value,
    #[serde(default)]
    pub after: Value,
}

impl PlanDocument {
    pub fn new(resource_changes: Vec<ResourceChange>) -> Self {
        Self {
            format_version: None,
            terraform_version: None,
            resource_changes,
        }
    }

    /// Parse converter output.
    ///
    /// Malformed entries inside `resource_changes` are skipped rather than
    /// failing the whole document; a missing list means "no changes".
    pub fn from_json_slice(data: &[u8]) -> Result<Self, PlanError> {
        let value: Value =
            serde_json::from_slice(data).map_err(|e| PlanError::Parse(e.to_string()))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, PlanError> {
        let Value::Object(mut root) = value else {
            return Err(PlanError::Parse(
                "plan JSON must be an object at the top level".to_string(),
            ));
        };

        let text = |v: Option<Value>| match v {
            Some(Value::String(s)) => Some(s),
            _ => None,
        };
        let format_version = text(root.remove("format_version"));
        let terraform_version = text(root.remove("terraform_version"));

        let entries = match root.remove("resource_changes") {
            Some(Value::Array(entries)) => entries,
            _ => Vec::new(),
        };

        let mut resource_changes = Vec::with_capacity(entries.len());
        for (index, entry) in entries.into_iter().enumerate() {
            match serde_json::from_value::<ResourceChange>(entry) {
                Ok(change) => resource_changes.push(change),
                Err(e) => tracing::warn!("Skipping malformed resource change #{}: {}", index, e),
            }
        }

        Ok(Self {
            format_version,
            terraform_version,
            resource_changes,
        })
    }
}

impl ResourceChange {
    pub fn new(
        address: impl Into<String>,
        resource_type: impl Into<String>,
        actions: &[&str],
        after: Value,
    ) -> Self {
        Self {
            address: address.into(),
            resource_type: resource_type.into(),
            change: Change {
                actions: actions.iter().map(|a| a.to_string()).collect(),
                before: Value::Null,
                after,
            },
        }
    }

    /// True when the only planned action is `delete`
    pub fn is_delete_only(&self) -> bool {
        matches!(self.change.actions.as_slice(), [only] if only == DELETE_ACTION)
    }

    /// Post-change attributes; anything other than an object reads as empty.
    pub fn after_attributes(&self) -> Option<&Map<String, Value>> {
        self.change.after.as_object()
    }
}
