// Copyright (c) Test Tube Contributors
// SPDX-License-Identifier: Apache-2.0

//! Utilities shared by the Test Tube crates.

#[cfg(feature = "backoff")]
pub mod backoff;

#[cfg(feature = "config")]
pub mod config;

#[cfg(feature = "metrics")]
pub mod metrics;
