// Copyright (c) Test Tube Contributors
// SPDX-License-Identifier: Apache-2.0

//! The `testtube` binary: balances, token metadata and cached calls from the command line.

use anyhow::Result;
use clap::Parser;
use prometheus::{Encoder as _, TextEncoder};
use testtube_sdk::config::load_configuration;
use testtube_utils::metrics::Registry;
use tracing_subscriber::EnvFilter;

mod args;
mod runner;

use args::Args;
use runner::ClientCommandRunner;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_configuration(args.config.as_ref())?;

    let registry = Registry::default();
    let result = ClientCommandRunner::new(&config, &registry, args.json)?
        .run(args.command)
        .await;

    if args.metrics {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
        eprintln!("{}", String::from_utf8_lossy(&buffer));
    }
    result
}
