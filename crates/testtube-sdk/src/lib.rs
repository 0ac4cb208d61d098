// Copyright (c) Test Tube Contributors
// SPDX-License-Identifier: Apache-2.0

//! The Test Tube SDK: resilient calls to token processes on the compute network.
//!
//! [`RemoteCallClient`] sends calls to processes, collapsing identical calls made within a short
//! window and optionally caching responses in a shared remote cache. [`FaucetClient`] builds the
//! wallet actions on top of it: balance lookups with in-flight coalescing, denomination lookups
//! and faucet requests.

pub mod actions;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod in_flight;
pub mod messages;
pub mod metrics;
pub mod network;
pub mod store;
pub mod throttle;
pub mod utils;
pub mod wallet;

pub use actions::{FaucetClient, TokenBalance};
pub use client::{CallMode, RemoteCallClient};
pub use error::ClientError;
