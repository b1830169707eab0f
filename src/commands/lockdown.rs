use clap::ArgMatches;
use plansign_runtime::config::Config;

use super::{fail, review_client};

pub async fn run(matches: &ArgMatches, config: &Config) {
    let mode = matches
        .get_one::<String>("mode")
        .expect("mode argument is required");
    let client = review_client(config, Some(matches));

    let result = match mode.as_str() {
        "on" => client.set_lockdown(true).await,
        "off" => client.set_lockdown(false).await,
        _ => client.lockdown_status().await,
    };

    match result {
        Ok(true) => println!("🔒 Emergency lockdown is ACTIVE on {}", client.base_url()),
        Ok(false) => println!("🔓 Emergency lockdown is inactive on {}", client.base_url()),
        Err(e) => fail(format!("Lockdown request failed: {}", e)),
    }
}
