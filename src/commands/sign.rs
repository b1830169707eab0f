use clap::ArgMatches;
use plansign_runtime::config::Config;
use plansign_runtime::signing::{SignOptions, SignWorkflowError};
use std::path::PathBuf;

use super::{converter, fail, plan_signer};

pub async fn run(matches: &ArgMatches, config: &Config) {
    let plan = matches
        .get_one::<PathBuf>("plan")
        .expect("plan argument is required");
    let options = SignOptions {
        key: matches.get_one::<PathBuf>("key").cloned(),
        ..SignOptions::default()
    };

    let signer = plan_signer(config, converter(config, matches.get_one::<PathBuf>("plan-json")));
    match signer.sign(plan, &options).await {
        Ok(report) => {
            println!("✓ Plan signed: {}", report.plan.display());
            if let Some(path) = &report.policy_attestation {
                println!("  Policy attestation: {}", path.display());
            }
            println!("  Provenance:         {}", report.provenance.display());
            println!("  Signature:          {}", report.signature.display());
            if let Some(bundle) = &report.bundle {
                println!("  Bundle:             {}", bundle.display());
            }
        }
        Err(SignWorkflowError::PolicyViolations { violations }) => {
            eprintln!("✗ Policy violations detected:");
            for violation in &violations {
                eprintln!("  [{}] {}", violation.policy, violation.message);
            }
            fail(format!(
                "plan failed {} policy check(s) - signing aborted",
                violations.len()
            ));
        }
        Err(e) => fail(format!("Error signing plan: {}", e)),
    }
}
