use clap::ArgMatches;
use plansign_runtime::config::Config;
use plansign_runtime::verification::{StageOutcome, VerificationReport};
use std::path::PathBuf;

use super::{fail, identity_from, pipeline};

pub async fn run(matches: &ArgMatches, config: &Config) {
    let plan = matches
        .get_one::<PathBuf>("plan")
        .expect("plan argument is required");
    let identity = match identity_from(matches) {
        Some(Ok(identity)) => identity,
        Some(Err(e)) => fail(e),
        None => fail("either --key or --identity is required for verification"),
    };

    println!("🔍 Verifying plan: {}", plan.display());
    let report = pipeline(config).verify(plan, &identity).await;
    print_report(&report);

    if report.passed() {
        println!("\n✓ Plan verification completed successfully");
    } else {
        match report.failure() {
            Some(failed) => fail(format!(
                "Verification failed at {}: {}",
                failed.stage,
                failed.outcome.detail()
            )),
            None => fail("Verification failed"),
        }
    }
}

pub fn print_report(report: &VerificationReport) {
    for entry in &report.stages {
        let marker = match entry.outcome {
            StageOutcome::Passed(_) => "✓",
            StageOutcome::Warning(_) => "⚠",
            StageOutcome::Failed(_) => "✗",
            StageOutcome::Skipped(_) => "-",
        };
        println!("  {} [{}] {}", marker, entry.stage, entry.outcome.detail());
    }
    if let Some(hours) = report.age_hours {
        println!("  Plan age: {:.1} hours", hours);
    }
}
