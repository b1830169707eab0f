use clap::ArgMatches;
use plansign_runtime::config::Config;
use plansign_runtime::plan::{ApplyDecision, ApplyGuard, TerraformCli, ToolRunner};
use std::sync::Arc;

use super::{fail, identity_from, pipeline};

pub async fn run(matches: &ArgMatches, config: &Config) {
    let args: Vec<String> = matches
        .get_many::<String>("args")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();

    let identity = match identity_from(matches) {
        Some(Ok(identity)) => Some(identity),
        Some(Err(e)) => fail(e),
        None => None,
    };

    let runner = Arc::new(TerraformCli::with_config(config.terraform.clone()));
    let guard = ApplyGuard::new(pipeline(config), identity, runner.clone());

    match guard.check(&args).await {
        Ok(ApplyDecision::Verified(report)) => {
            super::verify::print_report(&report);
            println!("✓ Verification passed. Proceeding with apply...");
        }
        Ok(ApplyDecision::Unverified) => {
            eprintln!("⚠ No plan file detected in arguments. Skipping verification.");
        }
        Ok(ApplyDecision::PassThrough) => {}
        Err(e) => fail(e),
    }

    // The guard has already ruled; run the tool without verifying twice.
    match runner.run(&args).await {
        Ok(code) => std::process::exit(code),
        Err(e) => fail(format!("Error executing terraform: {}", e)),
    }
}
