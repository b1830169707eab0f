use clap::ArgMatches;
use plansign_runtime::config::Config;
use plansign_runtime::signing::signature_path;
use plansign_runtime::WaitOutcome;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{fail, review_client};

pub async fn run(matches: &ArgMatches, config: &Config) {
    let plan = matches
        .get_one::<PathBuf>("plan")
        .expect("plan argument is required");
    let submitter = matches
        .get_one::<String>("submitter")
        .expect("submitter has a default");

    let client = review_client(config, None);

    println!("📤 Submitting plan for review...");
    let submitted = match client.submit_plan(plan, submitter).await {
        Ok(submitted) => submitted,
        Err(e) => fail(format!("Error submitting plan: {}", e)),
    };
    println!("✓ Plan submitted successfully");
    println!("Submission ID: {}", submitted.id);
    println!("\nA reviewer can inspect and approve it with:");
    println!("  plansign admin download {}", submitted.id);
    println!("  plansign admin sign {} --key <reviewer-key>", submitted.id);

    if !matches.get_flag("wait") {
        return;
    }

    let timeout = matches
        .get_one::<Duration>("timeout")
        .copied()
        .unwrap_or(config.client.wait_timeout);
    println!(
        "\n⏳ Waiting for a decision (timeout: {})...",
        humantime::format_duration(timeout)
    );

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let outcome = client
        .wait_for_decision(submitted.id, timeout, config.client.poll_interval, Some(&cancel))
        .await;

    match outcome {
        Ok(WaitOutcome::Approved(submission)) => {
            println!(
                "✓ Plan approved by {}",
                submission.reviewed_by.as_deref().unwrap_or("unknown")
            );
            let sig = signature_path(plan);
            if let Err(e) = client.download_signature(submitted.id, &sig).await {
                fail(format!("Error downloading signature: {}", e));
            }
            println!("Signature downloaded to: {}", sig.display());
        }
        Ok(WaitOutcome::Rejected(submission)) => fail(format!(
            "Plan rejected by {}: {}",
            submission.reviewed_by.as_deref().unwrap_or("unknown"),
            submission.rejection_reason.as_deref().unwrap_or("no reason given")
        )),
        Ok(WaitOutcome::TimedOut) => fail(format!(
            "Timed out after {} waiting for review of {}",
            humantime::format_duration(timeout),
            submitted.id
        )),
        Ok(WaitOutcome::Cancelled) => {
            eprintln!("Interrupted; submission {} is still pending", submitted.id);
            std::process::exit(130);
        }
        Err(e) => fail(format!("Error waiting for decision: {}", e)),
    }
}
