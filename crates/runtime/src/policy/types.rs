//! Policy evaluation data types and the built-in rule set

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One failed check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyViolation {
    /// Id of the rule that fired
    pub policy: String,
    pub message: String,
}

/// Outcome of evaluating a plan; persisted as `<plan>.policy`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyEvaluationResult {
    pub passed: bool,
    /// In evaluation order (resource, then rule)
    #[serde(default)]
    pub violations: Vec<PolicyViolation>,
}

impl PolicyEvaluationResult {
    pub fn from_violations(violations: Vec<PolicyViolation>) -> Self {
        Self {
            passed: violations.is_empty(),
            violations,
        }
    }
}

/// Rule set loading errors
#[derive(Error, Debug, Clone)]
pub enum PolicyError {
    #[error("Failed to parse rule set: {0}")]
    Parse(String),

    #[error("Invalid rule '{id}': {reason}")]
    InvalidRule { id: String, reason: String },

    #[error("Duplicate rule id: {0}")]
    DuplicateRule(String),

    #[error("IO error reading rule set: {0}")]
    Io(String),
}

/// YAML document holding a rule set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSet {
    pub rules: Vec<RuleDefinition>,
}

/// Declarative rule: which resources it targets and what it checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Empty means every resource type
    #[serde(default)]
    pub resource_types: Vec<String>,
    pub check: RuleCheck,
}

fn default_enabled() -> bool {
    true
}

/// Supported rule shapes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleCheck {
    /// A string attribute must not contain all of `needles`.
    /// Message placeholders: `{address}`, `{value}`.
    ForbiddenSubstring {
        attribute: String,
        needles: Vec<String>,
        message: String,
    },
    /// No entry of a list attribute may pair a forbidden CIDR with a forbidden port.
    /// Message placeholders: `{address}`, `{port}`, `{cidr}`.
    ForbiddenIngress {
        list_attribute: String,
        cidr_attribute: String,
        port_attribute: String,
        cidrs: Vec<String>,
        ports: Vec<u16>,
        message: String,
    },
    /// A mapping attribute must contain every key in `keys`.
    /// Message placeholders: `{address}`, `{key}`.
    RequiredKeys {
        attribute: String,
        keys: Vec<String>,
        /// Types allowed to omit the attribute entirely
        #[serde(default)]
        exempt_types: Vec<String>,
        missing_key_message: String,
        missing_attribute_message: String,
    },
}

/// Built-in security rules
pub const DEFAULT_RULES_YAML: &str = r#"
rules:
  - id: "no-public-s3"
    description: "S3 buckets must not use a public canned ACL"
    resource_types: ["aws_s3_bucket"]
    check:
      type: "forbidden_substring"
      attribute: "acl"
      needles: ["public"]
      message: "S3 bucket '{address}' has public ACL: {value}"

  - id: "no-wildcard-iam"
    description: "IAM policies must not grant wildcard actions"
    resource_types: ["aws_iam_policy"]
    check:
      type: "forbidden_substring"
      attribute: "policy"
      needles: ['"*"', '"Action"']
      message: "IAM policy '{address}' contains wildcard actions"

  - id: "no-public-ssh-rdp"
    description: "Security groups must not expose SSH or RDP to the internet"
    resource_types: ["aws_security_group", "aws_security_group_rule"]
    check:
      type: "forbidden_ingress"
      list_attribute: "ingress"
      cidr_attribute: "cidr_blocks"
      port_attribute: "from_port"
      cidrs: ["0.0.0.0/0"]
      ports: [22, 3389]
      message: "Security group '{address}' allows public access to port {port}"

  - id: "required-tags"
    description: "Every taggable resource carries ownership tags"
    check:
      type: "required_keys"
      attribute: "tags"
      keys: ["Environment", "Owner"]
      exempt_types: ["null_resource"]
      missing_key_message: "Resource '{address}' missing required tag: {key}"
      missing_attribute_message: "Resource '{address}' has no tags defined"
"#;
