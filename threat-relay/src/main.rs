/*!
Abnormal Security threat relay
*/

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Arg, ArgAction, Command};
use tracing::info;

use threat_relay::core::{config::RelayConfig, logging, tracker::ThreatRelay};

fn cli() -> Command {
    Command::new("threat-relay")
        .version(clap::crate_version!())
        .about("Relays today's Abnormal Security threats to an ingestion endpoint")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .help("TOML file with default settings; environment variables take precedence")
                .value_name("PATH"),
        )
        .arg(
            Arg::new("state-file")
                .short('s')
                .long("state-file")
                .help("Where processed threat ids are stored (overrides PROCESSED_IDS_FILE)")
                .value_name("PATH"),
        )
        .arg(
            Arg::new("once")
                .long("once")
                .help("Run a single poll cycle and exit")
                .action(ArgAction::SetTrue),
        )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; the real environment still applies.
    let _ = dotenvy::dotenv();

    let matches = cli().get_matches();

    let config_file = matches.get_one::<String>("config").map(Path::new);
    let mut config = RelayConfig::load(config_file).context("Invalid configuration")?;
    if let Some(state_file) = matches.get_one::<String>("state-file") {
        config.state.path = PathBuf::from(state_file);
    }

    logging::init(&config.log_file)?;
    info!("🚀 Starting threat relay");

    let mut relay = ThreatRelay::from_config(&config)?;

    if matches.get_flag("once") {
        relay.run_cycle().await?;
        return Ok(());
    }

    tokio::select! {
        result = relay.run() => {
            result.context("Relay stopped")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 Shutdown");
        }
    }

    Ok(())
}
