//! Rule implementations
//!
//! Each rule sees one non-delete resource change at a time and returns zero
//! or more violations. Rules are compiled from [`RuleDefinition`]s; custom
//! rules can implement [`PolicyRule`] directly.

use serde_json::{Map, Value};

use super::types::{PolicyError, PolicyViolation, RuleCheck, RuleDefinition};

/// What a rule is evaluated against
#[derive(Debug, Clone, Copy)]
pub struct RuleInput<'a> {
    pub address: &'a str,
    pub resource_type: &'a str,
    /// Post-change attributes (empty when the plan has none)
    pub after: &'a Map<String, Value>,
}

/// A single policy check
pub trait PolicyRule: Send + Sync {
    fn id(&self) -> &str;

    /// Whether this rule looks at resources of `resource_type`
    fn applies_to(&self, resource_type: &str) -> bool;

    fn evaluate(&self, input: &RuleInput<'_>) -> Vec<PolicyViolation>;
}

/// Turn a declarative definition into a runnable rule
pub fn compile(definition: RuleDefinition) -> Result<Box<dyn PolicyRule>, PolicyError> {
    let invalid = |reason: &str| PolicyError::InvalidRule {
        id: definition.id.clone(),
        reason: reason.to_string(),
    };
    if definition.id.trim().is_empty() {
        return Err(invalid("rule id cannot be empty"));
    }

    let scope = Scope(definition.resource_types.clone());
    let rule: Box<dyn PolicyRule> = match definition.check {
        RuleCheck::ForbiddenSubstring {
            attribute,
            needles,
            message,
        } => {
            if needles.is_empty() {
                return Err(invalid("forbidden_substring needs at least one needle"));
            }
            Box::new(ForbiddenSubstringRule {
                id: definition.id,
                scope,
                attribute,
                needles,
                message,
            })
        }
        RuleCheck::ForbiddenIngress {
            list_attribute,
            cidr_attribute,
            port_attribute,
            cidrs,
            ports,
            message,
        } => {
            if cidrs.is_empty() || ports.is_empty() {
                return Err(invalid("forbidden_ingress needs cidrs and ports"));
            }
            Box::new(ForbiddenIngressRule {
                id: definition.id,
                scope,
                list_attribute,
                cidr_attribute,
                port_attribute,
                cidrs,
                ports,
                message,
            })
        }
        RuleCheck::RequiredKeys {
            attribute,
            keys,
            exempt_types,
            missing_key_message,
            missing_attribute_message,
        } => {
            if keys.is_empty() {
                return Err(invalid("required_keys needs at least one key"));
            }
            Box::new(RequiredKeysRule {
                id: definition.id,
                scope,
                attribute,
                keys,
                exempt_types,
                missing_key_message,
                missing_attribute_message,
            })
        }
    };
    Ok(rule)
}

struct Scope(Vec<String>);

impl Scope {
    fn contains(&self, resource_type: &str) -> bool {
        self.0.is_empty() || self.0.iter().any(|t| t == resource_type)
    }
}

fn render(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (name, value)| {
        acc.replace(&format!("{{{}}}", name), value)
    })
}

/// String attribute containing every forbidden needle
struct ForbiddenSubstringRule {
    id: String,
    scope: Scope,
    attribute: String,
    needles: Vec<String>,
    message: String,
}

impl PolicyRule for ForbiddenSubstringRule {
    fn id(&self) -> &str {
        &self.id
    }

    fn applies_to(&self, resource_type: &str) -> bool {
        self.scope.contains(resource_type)
    }

    fn evaluate(&self, input: &RuleInput<'_>) -> Vec<PolicyViolation> {
        let Some(value) = input.after.get(&self.attribute).and_then(Value::as_str) else {
            return Vec::new();
        };
        if !self.needles.iter().all(|needle| value.contains(needle.as_str())) {
            return Vec::new();
        }
        vec![PolicyViolation {
            policy: self.id.clone(),
            message: render(&self.message, &[("address", input.address), ("value", value)]),
        }]
    }
}

/// List of mappings where a forbidden CIDR meets a forbidden port
struct ForbiddenIngressRule {
    id: String,
    scope: Scope,
    list_attribute: String,
    cidr_attribute: String,
    port_attribute: String,
    cidrs: Vec<String>,
    ports: Vec<u16>,
    message: String,
}

impl PolicyRule for ForbiddenIngressRule {
    fn id(&self) -> &str {
        &self.id
    }

    fn applies_to(&self, resource_type: &str) -> bool {
        self.scope.contains(resource_type)
    }

    fn evaluate(&self, input: &RuleInput<'_>) -> Vec<PolicyViolation> {
        let Some(entries) = input.after.get(&self.list_attribute).and_then(Value::as_array) else {
            return Vec::new();
        };

        let mut violations = Vec::new();
        for entry in entries.iter().filter_map(Value::as_object) {
            let Some(port) = entry.get(&self.port_attribute).and_then(Value::as_f64) else {
                continue;
            };
            let Some(matched) = self.ports.iter().find(|p| f64::from(**p) == port) else {
                continue;
            };
            let blocks = entry
                .get(&self.cidr_attribute)
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();

            // One violation per offending CIDR block.
            for cidr in blocks.iter().filter_map(Value::as_str) {
                if self.cidrs.iter().any(|c| c == cidr) {
                    let port = matched.to_string();
                    violations.push(PolicyViolation {
                        policy: self.id.clone(),
                        message: render(
                            &self.message,
                            &[("address", input.address), ("port", port.as_str()), ("cidr", cidr)],
                        ),
                    });
                }
            }
        }
        violations
    }
}

/// Mapping attribute that must carry a fixed set of keys
struct RequiredKeysRule {
    id: String,
    scope: Scope,
    attribute: String,
    keys: Vec<String>,
    exempt_types: Vec<String>,
    missing_key_message: String,
    missing_attribute_message: String,
}

impl PolicyRule for RequiredKeysRule {
    fn id(&self) -> &str {
        &self.id
    }

    fn applies_to(&self, resource_type: &str) -> bool {
        self.scope.contains(resource_type)
    }

    fn evaluate(&self, input: &RuleInput<'_>) -> Vec<PolicyViolation> {
        match input.after.get(&self.attribute).and_then(Value::as_object) {
            Some(present) => self
                .keys
                .iter()
                .filter(|key| !present.contains_key(key.as_str()))
                .map(|key| PolicyViolation {
                    policy: self.id.clone(),
                    message: render(
                        &self.missing_key_message,
                        &[("address", input.address), ("key", key.as_str())],
                    ),
                })
                .collect(),
            None if self.exempt_types.iter().any(|t| t == input.resource_type) => Vec::new(),
            None => vec![PolicyViolation {
                policy: self.id.clone(),
                message: render(&self.missing_attribute_message, &[("address", input.address)]),
            }],
        }
    }
}
