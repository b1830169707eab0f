//! Policy evaluation over a converted plan

use serde_json::Map;
use std::collections::HashSet;
use std::path::Path;

use super::rules::{compile, PolicyRule, RuleInput};
use super::types::{PolicyError, PolicyEvaluationResult, RuleSet, DEFAULT_RULES_YAML};
use crate::plan::PlanDocument;

/// Stateless evaluator holding an ordered list of rules
pub struct PolicyEngine {
    rules: Vec<Box<dyn PolicyRule>>,
}

impl PolicyEngine {
    pub fn new(rules: Vec<Box<dyn PolicyRule>>) -> Self {
        Self { rules }
    }

    /// Engine loaded with the built-in security rules
    pub fn with_default_rules() -> Result<Self, PolicyError> {
        Self::from_yaml(DEFAULT_RULES_YAML)
    }

    /// Parse and compile a YAML rule set. Disabled rules are dropped.
    pub fn from_yaml(yaml: &str) -> Result<Self, PolicyError> {
        let set: RuleSet = serde_yaml::from_str(yaml).map_err(|e| PolicyError::Parse(e.to_string()))?;

        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(set.rules.len());
        for definition in set.rules {
            if !seen.insert(definition.id.clone()) {
                return Err(PolicyError::DuplicateRule(definition.id));
            }
            if definition.enabled {
                rules.push(compile(definition)?);
            }
        }
        Ok(Self { rules })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, PolicyError> {
        let yaml = std::fs::read_to_string(path).map_err(|e| PolicyError::Io(e.to_string()))?;
        Self::from_yaml(&yaml)
    }

    /// Append a custom rule after the existing ones
    pub fn add_rule(&mut self, rule: Box<dyn PolicyRule>) {
        self.rules.push(rule);
    }

    pub fn rule_ids(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.id()).collect()
    }

    /// Run every rule against every non-delete change.
    ///
    /// Deletions are exempt: they remove rather than introduce risk.
    pub fn evaluate(&self, plan: &PlanDocument) -> PolicyEvaluationResult {
        let empty = Map::new();
        let mut violations = Vec::new();

        for change in &plan.resource_changes {
            if change.is_delete_only() {
                continue;
            }
            let input = RuleInput {
                address: &change.address,
                resource_type: &change.resource_type,
                after: change.after_attributes().unwrap_or(&empty),
            };
            for rule in &self.rules {
                if rule.applies_to(&change.resource_type) {
                    violations.extend(rule.evaluate(&input));
                }
            }
        }

        let result = PolicyEvaluationResult::from_violations(violations);
        tracing::debug!(
            changes = plan.resource_changes.len(),
            violations = result.violations.len(),
            "Evaluated plan against {} rules",
            self.rules.len()
        );
        result
    }
}
