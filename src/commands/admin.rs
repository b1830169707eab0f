use clap::ArgMatches;
use plansign_runtime::config::Config;
use plansign_runtime::review::ReviewerRegistry;
use plansign_runtime::signing::SignOptions;
use plansign_runtime::{ReviewClient, SubmissionId};
use std::path::{Path, PathBuf};

use super::{converter, fail, plan_signer, review_client};

pub async fn run(matches: &ArgMatches, config: &Config) {
    match matches.subcommand() {
        Some(("list-pending", _)) => list_pending(&review_client(config, None)).await,
        Some(("download", sub)) => {
            let id = submission_id(sub);
            let dir = sub.get_one::<PathBuf>("dir").expect("dir has a default");
            download(&review_client(config, None), id, dir).await;
        }
        Some(("sign", sub)) => sign(sub, config).await,
        Some(("reject", sub)) => {
            let id = submission_id(sub);
            let reason = sub.get_one::<String>("reason").expect("reason is required");
            reject(&review_client(config, Some(sub)), id, reason).await;
        }
        Some(("hash-token", sub)) => {
            let token = sub.get_one::<String>("token").expect("token is required");
            match ReviewerRegistry::hash_token(token) {
                Ok(hash) => println!("{}", hash),
                Err(e) => fail(e),
            }
        }
        _ => fail("Unknown admin subcommand (see plansign admin --help)"),
    }
}

fn submission_id(matches: &ArgMatches) -> SubmissionId {
    let raw = matches.get_one::<String>("id").expect("id is required");
    match raw.parse() {
        Ok(id) => id,
        Err(_) => fail(format!("'{}' is not a valid submission ID", raw)),
    }
}

async fn list_pending(client: &ReviewClient) {
    let submissions = match client.list_pending().await {
        Ok(submissions) => submissions,
        Err(e) => fail(format!("Failed to list pending submissions: {}", e)),
    };

    if submissions.is_empty() {
        println!("No pending submissions");
        return;
    }

    println!("Found {} pending submission(s):\n", submissions.len());
    for sub in submissions {
        println!("ID: {}", sub.id);
        println!("  Submitter: {}", sub.submitter);
        println!("  Created:   {}", sub.submitted_at.to_rfc3339());
        println!("  Plan hash: {}", sub.plan_hash);
        println!("  Status:    {}", sub.status);
        println!();
    }
}

async fn download(client: &ReviewClient, id: SubmissionId, dir: &Path) {
    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        fail(format!("Failed to create {}: {}", dir.display(), e));
    }
    let plan = dir.join("tfplan");

    println!("📥 Downloading plan {}...", id);
    if let Err(e) = client.download_plan(id, &plan).await {
        fail(format!("Failed to download plan: {}", e));
    }

    println!("Plan downloaded to: {}", plan.display());
    println!("\nReview the plan with:");
    println!("  terraform show {}", plan.display());
    println!("\nIf approved, sign with:");
    println!("  plansign admin sign {} --key <reviewer-key>", id);
}

/// Download, sign locally, upload the signature. The upload is the approval.
async fn sign(matches: &ArgMatches, config: &Config) {
    let id = submission_id(matches);
    let client = review_client(config, Some(matches));

    let workdir = match tempfile::Builder::new().prefix("plansign-admin-").tempdir() {
        Ok(dir) => dir,
        Err(e) => fail(format!("Failed to create working directory: {}", e)),
    };
    let plan = workdir.path().join("tfplan");

    println!("✍ Signing plan {}...", id);
    if let Err(e) = client.download_plan(id, &plan).await {
        fail(format!("Failed to download plan: {}", e));
    }

    let plan_json = matches.get_one::<PathBuf>("plan-json");
    let options = SignOptions {
        key: matches.get_one::<PathBuf>("key").cloned(),
        // Without a pre-converted plan there is no working directory to run
        // `terraform show` in; the submitter's pipeline gates policy instead.
        skip_policy: plan_json.is_none(),
        build_started: None,
    };
    let signer = plan_signer(config, converter(config, plan_json));
    let report = match signer.sign(&plan, &options).await {
        Ok(report) => report,
        Err(e) => fail(format!("Failed to sign plan: {}", e)),
    };

    match client.upload_signature(id, &report.signature).await {
        Ok(submission) => println!(
            "✓ Plan {} approved and signed by {}",
            id,
            submission.reviewed_by.as_deref().unwrap_or("unknown")
        ),
        Err(e) => fail(format!("Failed to upload signature: {}", e)),
    }
}

async fn reject(client: &ReviewClient, id: SubmissionId, reason: &str) {
    println!("Rejecting plan {}...", id);
    match client.reject(id, reason).await {
        Ok(submission) => {
            println!(
                "✓ Plan {} rejected by {}",
                id,
                submission.reviewed_by.as_deref().unwrap_or("unknown")
            );
            println!("Reason: {}", reason);
        }
        Err(e) => fail(format!("Failed to reject plan: {}", e)),
    }
}
