//! ATC simulator binary.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use atc_sim::{Args, Config, Orchestrator};

fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("atc_sim=info".parse().expect("valid directive")),
        )
        .init();

    if let Err(err) = run() {
        tracing::error!(error = %err, "fatal initialization error");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let config = Config::from_args(Args::parse());
    tracing::info!(scenario = %config.scenario.display(), "starting ATC simulator");

    let mut orchestrator = Orchestrator::new(config)?;
    orchestrator.install_io();
    orchestrator.start();
    orchestrator.run();

    Ok(())
}
