use clap::ArgMatches;
use plansign_runtime::api::HttpApiServer;
use plansign_runtime::config::Config;
use plansign_runtime::open_review_service;
use std::path::PathBuf;
use std::sync::Arc;

use super::fail;

pub async fn run(matches: &ArgMatches, mut config: Config) {
    if let Some(host) = matches.get_one::<String>("host") {
        config.server.host = host.clone();
    }
    if let Some(port) = matches.get_one::<u16>("port") {
        config.server.port = *port;
    }
    if let Some(root) = matches.get_one::<PathBuf>("storage") {
        config.storage.root = root.clone();
    }
    if let Err(e) = config.validate() {
        fail(format!("Invalid configuration: {}", e));
    }

    let service = match open_review_service(&config) {
        Ok(service) => service,
        Err(e) => fail(e),
    };

    println!("🚀 Starting plansign review service on {}", config.bind_address());
    println!("   Storage: {}", config.storage.root.display());
    if service.lockdown_active() {
        println!("   ⚠ Emergency lockdown is ACTIVE (lift with: plansign lockdown off)");
    }

    let server = HttpApiServer::new(config.server.clone(), Arc::new(service));
    if let Err(e) = server.start().await {
        fail(e);
    }
}
