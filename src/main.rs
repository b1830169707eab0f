#![allow(clippy::multiple_crate_versions)]

use clap::{value_parser, Arg, ArgAction, Command};
use plansign_runtime::{logging, Config};
use std::path::PathBuf;

mod commands;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn token_arg() -> Arg {
    Arg::new("token")
        .long("token")
        .value_name("TOKEN")
        .env("PLANSIGN_REVIEWER_TOKEN")
        .hide_env_values(true)
        .help("Reviewer bearer token")
}

fn reviewer_arg() -> Arg {
    Arg::new("reviewer")
        .long("reviewer")
        .value_name("NAME")
        .help("Reviewer name recorded when the service runs without an allow-list")
}

fn key_arg(help: &'static str) -> Arg {
    Arg::new("key")
        .short('k')
        .long("key")
        .value_name("FILE")
        .value_parser(value_parser!(PathBuf))
        .help(help)
}

fn identity_args() -> [Arg; 2] {
    [
        Arg::new("identity")
            .long("identity")
            .value_name("IDENTITY")
            .conflicts_with("key")
            .help("Expected certificate identity (keyless verification)"),
        Arg::new("issuer")
            .long("issuer")
            .value_name("URL")
            .requires("identity")
            .help("Expected OIDC issuer [default: https://github.com/login/oauth]"),
    ]
}

fn plan_json_arg() -> Arg {
    Arg::new("plan-json")
        .long("plan-json")
        .value_name("FILE")
        .value_parser(value_parser!(PathBuf))
        .help("Pre-converted plan JSON (skips `terraform show -json`)")
}

fn cli() -> Command {
    Command::new("plansign")
        .version(VERSION)
        .about("Plansign - review, sign and verify infrastructure plans")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .global(true)
                .help("Configuration file (TOML)"),
        )
        .arg(
            Arg::new("service")
                .long("service")
                .value_name("URL")
                .global(true)
                .help("Review service URL (overrides configuration)"),
        )
        .subcommand(
            Command::new("server")
                .about("Run the review service")
                .arg(Arg::new("host").long("host").value_name("HOST").help("Bind address"))
                .arg(
                    Arg::new("port")
                        .short('p')
                        .long("port")
                        .value_name("PORT")
                        .value_parser(value_parser!(u16))
                        .help("Port to bind"),
                )
                .arg(
                    Arg::new("storage")
                        .long("storage")
                        .value_name("DIR")
                        .value_parser(value_parser!(PathBuf))
                        .help("Submission storage root"),
                ),
        )
        .subcommand(
            Command::new("submit")
                .about("Submit a plan for review")
                .arg(
                    Arg::new("plan")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Plan file"),
                )
                .arg(
                    Arg::new("submitter")
                        .long("submitter")
                        .value_name("NAME")
                        .default_value("ci-pipeline")
                        .help("Submitter identifier"),
                )
                .arg(
                    Arg::new("wait")
                        .long("wait")
                        .action(ArgAction::SetTrue)
                        .help("Wait for a decision and download the signature"),
                )
                .arg(
                    Arg::new("timeout")
                        .long("timeout")
                        .value_name("DURATION")
                        .value_parser(humantime::parse_duration)
                        .help("Maximum time to wait (e.g. 30m) [default: client.wait_timeout]"),
                ),
        )
        .subcommand(
            Command::new("admin")
                .about("Reviewer commands")
                .subcommand_required(true)
                .subcommand(Command::new("list-pending").about("List pending submissions"))
                .subcommand(
                    Command::new("download")
                        .about("Download a plan for review")
                        .arg(Arg::new("id").required(true).help("Submission ID"))
                        .arg(
                            Arg::new("dir")
                                .value_parser(value_parser!(PathBuf))
                                .default_value(".")
                                .help("Output directory"),
                        ),
                )
                .subcommand(
                    Command::new("sign")
                        .about("Sign a submitted plan and upload the signature (approves it)")
                        .arg(Arg::new("id").required(true).help("Submission ID"))
                        .arg(key_arg("Private key; keyless signing when omitted"))
                        .arg(plan_json_arg())
                        .arg(token_arg())
                        .arg(reviewer_arg()),
                )
                .subcommand(
                    Command::new("reject")
                        .about("Reject a submitted plan")
                        .arg(Arg::new("id").required(true).help("Submission ID"))
                        .arg(
                            Arg::new("reason")
                                .long("reason")
                                .value_name("TEXT")
                                .required(true)
                                .help("Why the plan was rejected"),
                        )
                        .arg(token_arg())
                        .arg(reviewer_arg()),
                )
                .subcommand(
                    Command::new("hash-token")
                        .about("Print the Argon2 hash of a reviewer token for the allow-list")
                        .arg(Arg::new("token").required(true).help("Raw token")),
                ),
        )
        .subcommand(
            Command::new("sign")
                .about("Evaluate policy, record provenance and sign a plan locally")
                .arg(
                    Arg::new("plan")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Plan file"),
                )
                .arg(key_arg("Private key; keyless signing when omitted"))
                .arg(plan_json_arg()),
        )
        .subcommand(
            Command::new("verify")
                .about("Verify a signed plan")
                .arg(
                    Arg::new("plan")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Plan file"),
                )
                .arg(key_arg("Public key"))
                .args(identity_args()),
        )
        .subcommand(
            Command::new("wrap")
                .about("Run terraform, verifying the plan of every apply first")
                .arg(key_arg("Public key"))
                .args(identity_args())
                .arg(
                    Arg::new("args")
                        .num_args(1..)
                        .required(true)
                        .trailing_var_arg(true)
                        .allow_hyphen_values(true)
                        .help("Arguments passed to terraform"),
                ),
        )
        .subcommand(
            Command::new("lockdown")
                .about("Engage, lift or inspect the emergency lockdown")
                .arg(
                    Arg::new("mode")
                        .required(true)
                        .value_parser(["on", "off", "status"])
                        .help("on | off | status"),
                )
                .arg(token_arg()),
        )
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();

    let config_path = matches.get_one::<PathBuf>("config");
    let mut config = match Config::load(config_path.map(PathBuf::as_path)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("✗ Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };
    if let Some(url) = matches.get_one::<String>("service") {
        config.client.service_url = url.clone();
    }

    if let Err(e) = logging::init_tracing(&config.logging) {
        eprintln!("⚠ {}", e);
    }

    match matches.subcommand() {
        Some(("server", sub)) => commands::server::run(sub, config).await,
        Some(("submit", sub)) => commands::submit::run(sub, &config).await,
        Some(("admin", sub)) => commands::admin::run(sub, &config).await,
        Some(("sign", sub)) => commands::sign::run(sub, &config).await,
        Some(("verify", sub)) => commands::verify::run(sub, &config).await,
        Some(("wrap", sub)) => commands::wrap::run(sub, &config).await,
        Some(("lockdown", sub)) => commands::lockdown::run(sub, &config).await,
        _ => {
            println!("Plansign v{}", VERSION);
            println!("Use --help for available commands");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        cli().debug_assert();
    }

    #[test]
    fn test_wrap_keeps_terraform_flags() {
        let matches = cli()
            .try_get_matches_from([
                "plansign",
                "wrap",
                "--key",
                "cosign.pub",
                "--",
                "apply",
                "-auto-approve",
                "tfplan",
            ])
            .unwrap();
        let (_, wrap) = matches.subcommand().unwrap();
        let args: Vec<_> = wrap.get_many::<String>("args").unwrap().cloned().collect();
        assert_eq!(args, vec!["apply", "-auto-approve", "tfplan"]);
    }

    #[test]
    fn test_verify_rejects_key_and_identity_together() {
        let result = cli().try_get_matches_from([
            "plansign",
            "verify",
            "tfplan",
            "--key",
            "k.pub",
            "--identity",
            "me@example.com",
        ]);
        assert!(result.is_err());
    }
}
