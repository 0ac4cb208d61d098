// Copyright (c) Test Tube Contributors
// SPDX-License-Identifier: Apache-2.0

//! Deterministic identifiers of remote calls, used as cache and throttle keys.

use std::fmt;

use crate::messages::Tag;

/// The prefix of every fingerprint unless configured otherwise.
pub const DEFAULT_KEY_PREFIX: &str = "test-tube:";

const THROTTLE_KEY_PREFIX: &str = "throttle_";

/// Identifies a remote call by its target, its ordered tags and an optional discriminator.
///
/// Tags are not sorted: the same tags in a different order yield a different fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallFingerprint(String);

impl CallFingerprint {
    /// Computes the fingerprint `<prefix><target>:<name>:<value>|...[-<discriminator>]`.
    ///
    /// An empty discriminator is treated like no discriminator.
    pub fn new(prefix: &str, target: &str, tags: &[Tag], discriminator: Option<&str>) -> Self {
        let tag_string = tags
            .iter()
            .map(|tag| format!("{}:{}", tag.name, tag.value))
            .collect::<Vec<_>>()
            .join("|");
        let mut fingerprint = format!("{prefix}{target}:{tag_string}");
        if let Some(discriminator) = discriminator.filter(|d| !d.is_empty()) {
            fingerprint.push('-');
            fingerprint.push_str(discriminator);
        }
        Self(fingerprint)
    }

    /// The fingerprint as a string; this is the key of the remote cache tier.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The key under which the throttle entry of this call is stored locally.
    pub fn throttle_key(&self) -> String {
        format!("{THROTTLE_KEY_PREFIX}{}", self.0)
    }
}

impl fmt::Display for CallFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
