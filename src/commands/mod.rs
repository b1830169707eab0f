//! Subcommand implementations
//!
//! Each module exposes `run`, prints human-readable progress to stdout and
//! exits non-zero on failure.

use clap::ArgMatches;
use plansign_runtime::config::Config;
use plansign_runtime::plan::{JsonFileConverter, PlanConverter, TerraformCli};
use plansign_runtime::policy::PolicyEngine;
use plansign_runtime::provenance::{BuilderIdentity, GitSource, ProvenanceGenerator};
use plansign_runtime::signing::{CosignCli, PlanSigner, SigningTool, VerificationIdentity};
use plansign_runtime::verification::VerificationPipeline;
use plansign_runtime::ReviewClient;
use std::path::PathBuf;
use std::sync::Arc;

pub mod admin;
pub mod lockdown;
pub mod server;
pub mod sign;
pub mod submit;
pub mod verify;
pub mod wrap;

/// Print an error and exit with status 1
pub fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("✗ {}", message);
    std::process::exit(1);
}

/// Client for the configured service, carrying `--token`/`--reviewer` when present
pub fn review_client(config: &Config, matches: Option<&ArgMatches>) -> ReviewClient {
    let mut client = match ReviewClient::new(&config.client) {
        Ok(client) => client,
        Err(e) => fail(e),
    };
    if let Some(matches) = matches {
        if let Some(token) = optional::<String>(matches, "token") {
            client = client.with_token(token);
        }
        if let Some(reviewer) = optional::<String>(matches, "reviewer") {
            client = client.with_reviewer(reviewer);
        }
    }
    client
}

/// `get_one` for arguments a subcommand may not define
fn optional<T: Clone + Send + Sync + 'static>(matches: &ArgMatches, id: &str) -> Option<T> {
    matches.try_get_one::<T>(id).ok().flatten().cloned()
}

pub fn signing_tool(config: &Config) -> Arc<dyn SigningTool> {
    Arc::new(CosignCli::with_config(config.signing.clone()))
}

pub fn pipeline(config: &Config) -> VerificationPipeline {
    VerificationPipeline::new(signing_tool(config))
        .with_freshness_threshold(config.verification.freshness_threshold)
}

/// `--plan-json` when given, otherwise `terraform show -json`
pub fn converter(config: &Config, plan_json: Option<&PathBuf>) -> Arc<dyn PlanConverter> {
    match plan_json {
        Some(path) => Arc::new(JsonFileConverter::new(path)),
        None => Arc::new(TerraformCli::with_config(config.terraform.clone())),
    }
}

pub fn plan_signer(config: &Config, converter: Arc<dyn PlanConverter>) -> PlanSigner {
    let policy = match PolicyEngine::with_default_rules() {
        Ok(engine) => engine,
        Err(e) => fail(format!("Failed to load policy rules: {}", e)),
    };
    let provenance =
        ProvenanceGenerator::new(BuilderIdentity::detect(), Box::new(GitSource::current_dir()));
    PlanSigner::new(converter, policy, provenance, signing_tool(config))
}

/// `--key` / `--identity` / `--issuer`, if any were given
pub fn identity_from(matches: &ArgMatches) -> Option<Result<VerificationIdentity, String>> {
    let key = matches.get_one::<PathBuf>("key").cloned();
    let identity = matches.get_one::<String>("identity").cloned();
    if key.is_none() && identity.is_none() {
        return None;
    }
    let issuer = matches.get_one::<String>("issuer").cloned();
    Some(VerificationIdentity::from_options(key, identity, issuer).map_err(|e| e.to_string()))
}
