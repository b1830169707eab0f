//! Policy Gate Integration Tests
//!
//! Exercises the default rule set against plans parsed from the JSON a
//! planning tool emits, plus custom rule sets loaded from YAML.

use plansign_runtime::plan::{PlanDocument, ResourceChange};
use plansign_runtime::policy::PolicyEngine;
use serde_json::json;

fn engine() -> PolicyEngine {
    PolicyEngine::with_default_rules().expect("default rules compile")
}

fn tags() -> serde_json::Value {
    json!({"Environment": "prod", "Owner": "platform"})
}

fn security_group(port: u16) -> PlanDocument {
    PlanDocument::new(vec![ResourceChange::new(
        "aws_security_group.bastion",
        "aws_security_group",
        &["create"],
        json!({
            "tags": tags(),
            "ingress": [{
                "from_port": port,
                "to_port": port,
                "protocol": "tcp",
                "cidr_blocks": ["0.0.0.0/0"]
            }]
        }),
    )])
}

#[test]
fn test_public_ssh_yields_exactly_one_violation() {
    let result = engine().evaluate(&security_group(22));
    assert!(!result.passed);
    assert_eq!(result.violations.len(), 1);
    assert_eq!(result.violations[0].policy, "no-public-ssh-rdp");
    assert_eq!(
        result.violations[0].message,
        "Security group 'aws_security_group.bastion' allows public access to port 22"
    );
}

#[test]
fn test_public_http_alt_port_is_allowed() {
    let result = engine().evaluate(&security_group(8080));
    assert!(result.passed, "unexpected violations: {:?}", result.violations);
}

#[test]
fn test_each_missing_tag_is_reported() {
    let plan = PlanDocument::new(vec![ResourceChange::new(
        "aws_instance.web",
        "aws_instance",
        &["create"],
        json!({"tags": {"Name": "web"}}),
    )]);
    let result = engine().evaluate(&plan);
    let messages: Vec<_> = result.violations.iter().map(|v| v.message.as_str()).collect();
    assert_eq!(
        messages,
        vec![
            "Resource 'aws_instance.web' missing required tag: Environment",
            "Resource 'aws_instance.web' missing required tag: Owner",
        ]
    );
}

#[test]
fn test_deletions_are_never_violations() {
    let plan = PlanDocument::new(vec![
        ResourceChange::new(
            "aws_security_group.old",
            "aws_security_group",
            &["delete"],
            json!({"ingress": [{"from_port": 22, "cidr_blocks": ["0.0.0.0/0"]}]}),
        ),
        ResourceChange::new(
            "aws_s3_bucket.old",
            "aws_s3_bucket",
            &["delete"],
            json!({"acl": "public-read-write"}),
        ),
    ]);
    assert!(engine().evaluate(&plan).passed);

    // replacement is not a pure deletion
    let replace = PlanDocument::new(vec![ResourceChange::new(
        "aws_s3_bucket.old",
        "aws_s3_bucket",
        &["delete", "create"],
        json!({"acl": "public-read", "tags": tags()}),
    )]);
    assert_eq!(engine().evaluate(&replace).violations.len(), 1);
}

#[test]
fn test_plan_json_from_planning_tool() {
    let raw = br#"{
        "format_version": "1.2",
        "terraform_version": "1.7.5",
        "resource_changes": [
            {
                "address": "aws_s3_bucket.site",
                "type": "aws_s3_bucket",
                "change": {
                    "actions": ["create"],
                    "before": null,
                    "after": {"acl": "public-read", "tags": {"Environment": "dev", "Owner": "web"}}
                }
            },
            {
                "address": "aws_iam_policy.admin",
                "type": "aws_iam_policy",
                "change": {
                    "actions": ["update"],
                    "before": {},
                    "after": {
                        "policy": "{\"Statement\":[{\"Action\":\"*\",\"Effect\":\"Allow\"}]}",
                        "tags": {"Environment": "dev", "Owner": "sec"}
                    }
                }
            }
        ]
    }"#;

    let plan = PlanDocument::from_json_slice(raw).unwrap();
    assert_eq!(plan.terraform_version.as_deref(), Some("1.7.5"));

    let result = engine().evaluate(&plan);
    let policies: Vec<_> = result.violations.iter().map(|v| v.policy.as_str()).collect();
    assert_eq!(policies, vec!["no-public-s3", "no-wildcard-iam"]);
}

#[test]
fn test_custom_rule_set_extends_the_engine() {
    let yaml = r#"
rules:
  - id: "no-default-vpc"
    description: "Resources must not land in the default VPC"
    resource_types: ["aws_instance"]
    check:
      type: "forbidden_substring"
      attribute: "vpc_id"
      needles: ["default"]
      message: "Instance '{address}' uses VPC {value}"
"#;
    let engine = PolicyEngine::from_yaml(yaml).unwrap();
    let plan = PlanDocument::new(vec![ResourceChange::new(
        "aws_instance.api",
        "aws_instance",
        &["create"],
        json!({"vpc_id": "vpc-default-1"}),
    )]);

    let result = engine.evaluate(&plan);
    assert_eq!(result.violations.len(), 1);
    assert_eq!(
        result.violations[0].message,
        "Instance 'aws_instance.api' uses VPC vpc-default-1"
    );
}

#[test]
fn test_evaluation_is_stateless() {
    let engine = engine();
    let first = engine.evaluate(&security_group(22));
    let second = engine.evaluate(&security_group(22));
    assert_eq!(first, second);
    assert!(engine.evaluate(&security_group(443)).passed);
}
