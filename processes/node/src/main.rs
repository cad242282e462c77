//! 'main' for the Tipwatch node process

use anyhow::Result;
use caryatid_process::Process;
use clap::Parser;
use config::{Config, Environment, File};
use std::sync::Arc;
use tipwatch_common::messages::Message;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

use tipwatch_module_chain_tracker::ChainTrackerModule;
use tipwatch_module_respend_observer::RespendObserverModule;

#[derive(Debug, clap::Parser)]
#[command(name = "tipwatch-node")]
struct Args {
    /// Config files, later ones overriding earlier
    #[arg(long, value_name = "PATH", default_values_t = vec!["node.toml".to_string()])]
    config: Vec<String>,
}

/// Standard main
#[tokio::main]
pub async fn main() -> Result<()> {
    let args = Args::parse();

    // Standard logging using RUST_LOG for log levels
    let fmt_layer = fmt::layer().with_filter(EnvFilter::from_default_env());
    Registry::default().with(fmt_layer).init();

    info!("Tipwatch node process");

    // Read the config
    let mut builder = Config::builder();
    for file in &args.config {
        builder = builder.add_source(File::with_name(file));
    }
    let config = Arc::new(builder.add_source(Environment::with_prefix("TIPWATCH")).build()?);

    // Create the process
    let mut process = Process::<Message>::create(config).await;

    // Register modules
    ChainTrackerModule::register(&mut process);
    RespendObserverModule::register(&mut process);

    // Run it
    process.run().await?;

    // Bye!
    info!("Exiting");

    Ok(())
}
