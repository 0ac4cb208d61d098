// Copyright (c) Test Tube Contributors
// SPDX-License-Identifier: Apache-2.0

//! The arguments of the `testtube` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use testtube_sdk::{cache::CacheExpiry, messages::Tag};

/// Queries token processes on the compute network through the Test Tube client.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Test Tube client", long_about = None)]
#[command(name = env!("CARGO_BIN_NAME"))]
#[command(rename_all = "kebab-case")]
pub(crate) struct Args {
    /// The path to the configuration file.
    ///
    /// If unset, `./testtube.yaml` and the `testtube` directory of the user configuration
    /// directory are searched, in this order. Without any file, the defaults are used.
    #[arg(short, long, verbatim_doc_comment)]
    pub config: Option<PathBuf>,
    /// Print the output as JSON.
    #[arg(long, global = true)]
    pub json: bool,
    /// Print the client metrics to stderr before exiting.
    #[arg(long, global = true)]
    pub metrics: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
#[command(rename_all = "kebab-case")]
pub(crate) enum Command {
    /// Show the balance of an address.
    Balance {
        /// The address whose balance is queried.
        address: String,
        /// The token process; defaults to the faucet token of the configuration.
        #[arg(long)]
        token: Option<String>,
        /// The number of decimals of the token; looked up if omitted.
        #[arg(long)]
        decimals: Option<u32>,
        /// The number of fractional digits shown.
        #[arg(long, default_value_t = 4)]
        display_decimals: usize,
    },
    /// Show the metadata of a token.
    Info {
        /// The token process; defaults to the faucet token of the configuration.
        #[arg(long)]
        token: Option<String>,
    },
    /// Show the raw quantity a faucet request would carry.
    FaucetQuantity {
        /// The amount of whole tokens; drawn from the configured policy if omitted.
        #[arg(long)]
        amount: Option<u64>,
    },
    /// Dry-run a call with arbitrary tags and print the response.
    Call {
        #[command(flatten)]
        call: CallArgs,
        /// Cache the response remotely with this expiry.
        #[arg(long, value_enum)]
        expiry: Option<ExpiryArg>,
    },
    /// Drop the stored responses of a call.
    Invalidate {
        #[command(flatten)]
        call: CallArgs,
    },
    /// Print the fingerprint under which a call is stored.
    Fingerprint {
        #[command(flatten)]
        call: CallArgs,
    },
}

/// Identifies a call to a process.
#[derive(clap::Args, Debug, Clone)]
pub(crate) struct CallArgs {
    /// The process receiving the call.
    pub process_id: String,
    /// A tag of the call as `NAME=VALUE`; may be repeated, order matters.
    #[arg(long = "tag", short, value_parser = parse_tag)]
    pub tags: Vec<Tag>,
    /// Distinguishes otherwise identical calls, for example by the calling address.
    #[arg(long)]
    pub discriminator: Option<String>,
}

/// The expiry of remote cache entries.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
#[value(rename_all = "kebab-case")]
pub(crate) enum ExpiryArg {
    Minute,
    TenMinutes,
    Hour,
    Day,
    Week,
    Month,
}

impl From<ExpiryArg> for CacheExpiry {
    fn from(value: ExpiryArg) -> Self {
        match value {
            ExpiryArg::Minute => CacheExpiry::Minute,
            ExpiryArg::TenMinutes => CacheExpiry::TenMinutes,
            ExpiryArg::Hour => CacheExpiry::Hour,
            ExpiryArg::Day => CacheExpiry::Day,
            ExpiryArg::Week => CacheExpiry::Week,
            ExpiryArg::Month => CacheExpiry::Month,
        }
    }
}

fn parse_tag(input: &str) -> Result<Tag, String> {
    match input.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok(Tag::new(name, value)),
        _ => Err(format!("invalid tag `{input}`, expected NAME=VALUE")),
    }
}
