// Copyright (c) Test Tube Contributors
// SPDX-License-Identifier: Apache-2.0

//! Bounded exponential backoff for retrying fallible asynchronous operations.
//!
//! [`retry`] attempts an operation at most [`RetryConfig::max_attempts`] times in total. After
//! each failed attempt (except the last one) it sleeps for the current delay and then grows the
//! delay by [`RetryConfig::backoff_factor`], capped at [`RetryConfig::max_delay`].

use std::{fmt::Display, future::Future, time::Duration};

use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};

/// Default total number of attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Default delay before the second attempt.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(1_000);
/// Default upper bound for any single delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(10_000);
/// Default multiplicative growth of the delay between attempts.
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

/// Configuration of the retry executor.
///
/// Any field missing from a serialized configuration takes its default value.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// The total attempt budget, including the first attempt.
    pub max_attempts: u32,
    /// The delay slept after the first failure.
    #[serde(rename = "initial_delay_millis")]
    #[serde_as(as = "DurationMilliSeconds")]
    pub initial_delay: Duration,
    /// The maximum delay slept between two attempts.
    #[serde(rename = "max_delay_millis")]
    #[serde_as(as = "DurationMilliSeconds")]
    pub max_delay: Duration,
    /// The factor by which the delay grows after each failure.
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
        }
    }
}

impl RetryConfig {
    /// Returns a config with the given attempt budget and default delays.
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// The attempt budget, never lower than one.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Returns the sequence of delays slept between consecutive attempts.
    pub fn strategy(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self)
    }
}

/// Iterator over the delays between attempts.
///
/// Yields `attempts - 1` delays; the `i`-th delay is `min(initial * factor^i, max)`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    current: Duration,
    max_delay: Duration,
    factor: f64,
    remaining: u32,
}

impl ExponentialBackoff {
    /// Creates the delay sequence described by `config`.
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            current: config.initial_delay.min(config.max_delay),
            max_delay: config.max_delay,
            // Keeps the sequence non-decreasing and rejects NaN.
            factor: config.backoff_factor.max(1.0),
            remaining: config.attempts() - 1,
        }
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let delay = self.current;
        let grown = self.current.as_secs_f64() * self.factor;
        self.current = if grown >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(grown)
        };
        Some(delay)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = usize::try_from(self.remaining).unwrap_or(usize::MAX);
        (remaining, Some(remaining))
    }
}

/// The error returned once every attempt has failed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Failed after {attempts} attempts. Last error: {last_error}")]
pub struct RetryError<E> {
    /// The number of attempts that were made.
    pub attempts: u32,
    /// The error returned by the final attempt.
    pub last_error: E,
}

impl<E> RetryError<E> {
    /// Consumes the error and returns the error of the final attempt.
    pub fn into_inner(self) -> E {
        self.last_error
    }
}

/// Runs `operation` until it succeeds or the attempt budget of `config` is exhausted.
///
/// Returns the first successful result. On exhaustion, returns a [`RetryError`] carrying the
/// number of attempts and the last error.
pub async fn retry<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    retry_if(config, |_| true, operation).await
}

/// Like [`retry`], but stops as soon as `should_retry` rejects an error.
///
/// The returned [`RetryError`] then carries the number of attempts made so far, which may be
/// lower than the budget.
pub async fn retry_if<F, Fut, T, E, P>(
    config: &RetryConfig,
    mut should_retry: P,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&E) -> bool,
    E: Display,
{
    let mut delays = config.strategy();
    let mut attempts = 0;

    loop {
        attempts += 1;
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if !should_retry(&error) {
            tracing::debug!(attempts, %error, "operation failed with a permanent error");
            return Err(RetryError {
                attempts,
                last_error: error,
            });
        }

        let Some(delay) = delays.next() else {
            tracing::warn!(attempts, %error, "operation failed, no attempts left");
            return Err(RetryError {
                attempts,
                last_error: error,
            });
        };

        tracing::debug!(attempts, ?delay, %error, "operation failed, retrying after delay");
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use testtube_test_utils::{async_param_test, param_test};
    use tokio::time::Instant;

    use super::*;

    fn config(max_attempts: u32) -> RetryConfig {
        RetryConfig::with_max_attempts(max_attempts)
    }

    param_test! {
        delays_grow_and_saturate: [
            defaults: (config(5), &[1_000, 2_000, 4_000, 8_000]),
            saturates: (config(7), &[1_000, 2_000, 4_000, 8_000, 10_000, 10_000]),
            single_attempt: (config(1), &[]),
            zero_is_one_attempt: (config(0), &[]),
            initial_above_max: (
                RetryConfig {
                    initial_delay: Duration::from_millis(50_000),
                    ..config(3)
                },
                &[10_000, 10_000]
            ),
            factor_below_one: (
                RetryConfig {
                    backoff_factor: 0.5,
                    ..config(3)
                },
                &[1_000, 1_000]
            ),
        ]
    }
    fn delays_grow_and_saturate(config: RetryConfig, expected_millis: &[u64]) {
        let delays: Vec<_> = config.strategy().collect();
        let expected: Vec<_> = expected_millis
            .iter()
            .copied()
            .map(Duration::from_millis)
            .collect();
        assert_eq!(delays, expected);
    }

    async_param_test! {
        #[tokio::test(start_paused = true)]
        attempts_until_success -> (): [
            first_try: (5, 0, 1, 0),
            third_try: (5, 2, 3, 3_000),
            last_try: (5, 4, 5, 15_000),
            never: (5, u32::MAX, 5, 15_000),
            single_attempt: (1, u32::MAX, 1, 0),
        ]
    }
    async fn attempts_until_success(
        max_attempts: u32,
        failures: u32,
        expected_attempts: u32,
        expected_wait_millis: u64,
    ) {
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let result = retry(&config(max_attempts), || {
            let calls = calls.clone();
            async move {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                if call < failures {
                    Err(format!("failure {call}"))
                } else {
                    Ok(call)
                }
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), expected_attempts);
        assert_eq!(
            start.elapsed(),
            Duration::from_millis(expected_wait_millis)
        );
        match result {
            Ok(call) => assert_eq!(call, failures),
            Err(error) => {
                assert_eq!(error.attempts, expected_attempts);
                assert_eq!(error.last_error, format!("failure {}", expected_attempts - 1));
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_error_names_attempts_and_last_message() {
        let error = retry(&config(1), || async { Err::<(), _>("boom") })
            .await
            .expect_err("single attempt must fail");

        assert_eq!(
            error.to_string(),
            "Failed after 1 attempts. Last error: boom"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_stops_retrying() {
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let error = retry_if(
            &config(5),
            |error: &&str| *error != "permanent",
            || {
                let calls = calls.clone();
                async move {
                    match calls.fetch_add(1, Ordering::SeqCst) {
                        0 => Err("transient"),
                        _ => Err::<(), _>("permanent"),
                    }
                }
            },
        )
        .await
        .expect_err("operation never succeeds");

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(error.attempts, 2);
        assert_eq!(error.into_inner(), "permanent");
        assert_eq!(start.elapsed(), Duration::from_millis(1_000));
    }

    #[test]
    fn deserializes_partial_config() {
        let config: RetryConfig =
            serde_yaml::from_str("max_attempts: 3\nmax_delay_millis: 500\n").expect("valid yaml");

        assert_eq!(
            config,
            RetryConfig {
                max_attempts: 3,
                max_delay: Duration::from_millis(500),
                ..RetryConfig::default()
            }
        );
    }
}
