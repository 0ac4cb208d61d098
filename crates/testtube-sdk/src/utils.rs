// Copyright (c) Test Tube Contributors
// SPDX-License-Identifier: Apache-2.0

//! Utilities for the Test Tube SDK.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::Instant;

/// The largest number of decimals a token may have.
///
/// Larger values are clamped to it by the helpers of this module.
pub const MAX_DECIMALS: u32 = 77;

fn bounded_decimals(decimals: u32) -> usize {
    usize::try_from(decimals.min(MAX_DECIMALS)).unwrap_or(usize::MAX)
}

/// Converts a raw integer amount into a decimal string with `decimals` fractional digits.
///
/// Separators (`.` and `,`) in the input are ignored, and trailing zeros of the fraction, as well
/// as a dangling decimal point, are removed. `decimals` is clamped to [`MAX_DECIMALS`].
///
/// ```
/// # use testtube_sdk::utils::adjust_decimal_string;
/// assert_eq!(adjust_decimal_string("123456", 4), "12.3456");
/// assert_eq!(adjust_decimal_string("100000000", 8), "1");
/// assert_eq!(adjust_decimal_string("5", 4), "0.0005");
/// ```
pub fn adjust_decimal_string(value: &str, decimals: u32) -> String {
    let decimals = bounded_decimals(decimals);
    let digits: String = value.chars().filter(|c| *c != '.' && *c != ',').collect();
    let digits = digits.trim_start_matches('0');

    let mut padded = "0".repeat((decimals + 1).saturating_sub(digits.len()));
    padded.push_str(digits);
    let (integer, fraction) = padded.split_at(padded.len() - decimals);

    let fraction = fraction.trim_end_matches('0');
    if fraction.is_empty() {
        integer.to_owned()
    } else {
        format!("{integer}.{fraction}")
    }
}

/// Scales a whole number of tokens to the raw integer amount expected by the token process.
///
/// `decimals` is clamped to [`MAX_DECIMALS`].
pub fn scale_to_raw_amount(amount: u64, decimals: u32) -> String {
    if amount == 0 {
        return "0".to_owned();
    }
    format!("{amount}{}", "0".repeat(bounded_decimals(decimals)))
}

/// Formats a decimal string with thousands separators and exactly `decimals` fractional digits.
///
/// Returns `"0"` for input that is not a number.
pub fn format_number(value: &str, decimals: usize) -> String {
    let Ok(number) = value.trim().parse::<f64>() else {
        return "0".to_owned();
    };
    if !number.is_finite() {
        return "0".to_owned();
    }

    let formatted = format!("{:.*}", decimals, number.abs());
    let (integer, fraction) = match formatted.split_once('.') {
        Some((integer, fraction)) => (integer, Some(fraction)),
        None => (formatted.as_str(), None),
    };

    let mut grouped = String::with_capacity(integer.len() + integer.len() / 3);
    for (index, digit) in integer.chars().enumerate() {
        if index > 0 && (integer.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let sign = if number.is_sign_negative() && formatted.chars().any(|c| matches!(c, '1'..='9')) {
        "-"
    } else {
        ""
    };
    match fraction {
        Some(fraction) => format!("{sign}{grouped}.{fraction}"),
        None => format!("{sign}{grouped}"),
    }
}

/// A wall clock in Unix milliseconds whose progress follows the tokio clock.
///
/// The clock is anchored to the system time when created and then advanced by the elapsed
/// [`tokio::time::Instant`] time, so timestamps written to persistent storage are comparable across
/// runs while tests can drive freshness windows with a paused runtime.
#[derive(Debug, Clone, Copy)]
pub struct WallClock {
    anchor_millis: u64,
    anchor: Instant,
}

impl WallClock {
    /// Creates a clock anchored at the current system time.
    pub fn new() -> Self {
        let anchor_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(duration_millis)
            .unwrap_or_default();
        Self {
            anchor_millis,
            anchor: Instant::now(),
        }
    }

    /// Returns the current time in milliseconds since the Unix epoch.
    pub fn now_millis(&self) -> u64 {
        self.anchor_millis
            .saturating_add(duration_millis(self.anchor.elapsed()))
    }

    /// Returns true if `timestamp_millis` lies less than `window` in the past.
    ///
    /// Timestamps from the future count as fresh.
    pub fn is_fresh(&self, timestamp_millis: u64, window: Duration) -> bool {
        self.now_millis().saturating_sub(timestamp_millis) < duration_millis(window)
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
