// Copyright (c) Test Tube Contributors
// SPDX-License-Identifier: Apache-2.0

//! Wallet actions: balances, token metadata and faucet requests.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use serde::{Deserialize, Serialize};
use testtube_utils::backoff::{RetryConfig, retry, retry_if};

use crate::{
    cache::CacheExpiry,
    client::{CallMode, RemoteCallClient},
    config::{ClientConfig, FaucetConfig, QuantityPolicy},
    error::ClientError,
    in_flight::{Acquisition, InFlightCoalescer, InFlightGuard},
    messages::{BalanceQuery, FaucetRequest, InfoQuery, ProcessRequest},
    metrics::LOCAL_TIER,
    utils::{adjust_decimal_string, scale_to_raw_amount},
    wallet::WalletSession,
};

/// The balance of an account, scaled by the token's denomination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBalance {
    /// The balance as a decimal string.
    pub balance: String,
    /// The token ticker.
    pub ticker: String,
    /// The account holding the balance.
    pub account: String,
}

/// Identifies the balance of one address for one token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BalanceKey {
    /// The account address.
    pub address: String,
    /// The token process.
    pub token: String,
}

impl BalanceKey {
    /// Creates a new key.
    pub fn new(address: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            token: token.into(),
        }
    }

    /// The key of the balance in the local cache tier.
    pub fn cache_key(&self) -> String {
        format!("balance_{}_{}", self.address, self.token)
    }
}

/// The outcome of waiting for a balance request in flight.
enum BalanceTurn {
    /// No request is in flight; this one must be performed.
    Lead(InFlightGuard<BalanceKey>),
    /// A request in flight settled and cached the balance.
    Joined,
    /// Waiting timed out; this request is performed without coalescing.
    TimedOut,
}

/// Runs the wallet actions of one user against the faucet token.
#[derive(Debug)]
pub struct FaucetClient {
    client: Arc<RemoteCallClient>,
    session: Arc<WalletSession>,
    balance_requests: InFlightCoalescer<BalanceKey>,
    retry: RetryConfig,
    faucet: FaucetConfig,
    in_flight_timeout: Option<Duration>,
}

impl FaucetClient {
    /// Creates the actions for the user of `session`, with the settings of `config`.
    pub fn new(
        client: Arc<RemoteCallClient>,
        session: Arc<WalletSession>,
        config: &ClientConfig,
    ) -> Self {
        Self {
            client,
            session,
            balance_requests: InFlightCoalescer::new(),
            retry: config.retry,
            faucet: config.faucet.clone(),
            in_flight_timeout: config.in_flight_timeout,
        }
    }

    /// The remote call client.
    pub fn client(&self) -> &Arc<RemoteCallClient> {
        &self.client
    }

    /// The wallet session of the user.
    pub fn session(&self) -> &Arc<WalletSession> {
        &self.session
    }

    /// The process of the token dispensed by the faucet.
    pub fn faucet_token(&self) -> &str {
        &self.faucet.token_process_id
    }

    /// Returns the balance of `address` for `token`, or `None` if it could not be determined.
    ///
    /// Errors are logged. See [`try_get_balance`][Self::try_get_balance].
    pub async fn get_balance(
        &self,
        address: &str,
        token: &str,
        decimals: Option<u32>,
    ) -> Option<TokenBalance> {
        self.try_get_balance(address, token, decimals)
            .await
            .inspect_err(|error| tracing::warn!(?error, "error getting token balance"))
            .ok()
            .flatten()
    }

    /// Returns the balance of `address` for `token`.
    ///
    /// A balance cached locally within the freshness window is returned directly. Otherwise,
    /// concurrent requests for the same balance are coalesced: one of them queries the token
    /// process, the others wait for it and return what it cached. The raw balance is scaled by
    /// `decimals`, or by the token's denomination if `None`.
    ///
    /// Returns `Ok(None)` if the response lacks the balance or the ticker.
    #[tracing::instrument(skip(self))]
    pub async fn try_get_balance(
        &self,
        address: &str,
        token: &str,
        decimals: Option<u32>,
    ) -> Result<Option<TokenBalance>, ClientError> {
        let key = BalanceKey::new(address, token);
        let cache_key = key.cache_key();
        let local_cache = self.client.local_cache();
        let metrics = self.client.metrics();

        if let Some(balance) = local_cache.get_fresh::<TokenBalance>(&cache_key) {
            tracing::debug!("using cached balance");
            metrics.observe_cache_lookup(LOCAL_TIER, true);
            return Ok(Some(balance));
        }
        metrics.observe_cache_lookup(LOCAL_TIER, false);

        let _guard = match self.balance_turn(&key).await {
            BalanceTurn::Lead(guard) => Some(guard),
            BalanceTurn::Joined => return Ok(local_cache.get_any_age(&cache_key)),
            BalanceTurn::TimedOut => None,
        };

        let reply = match self
            .client
            .call(
                token,
                &BalanceQuery {
                    target: address.to_owned(),
                },
                &CallMode::Simulate,
                None,
                None,
            )
            .await
        {
            Ok(reply) => reply,
            Err(error) if error.is_missing_tag() => {
                tracing::warn!(?error, "missing required balance information in response");
                return Ok(None);
            }
            Err(error) => return Err(error),
        };

        let denomination = match decimals {
            Some(decimals) => decimals,
            None => self.get_token_denomination(token).await,
        };
        let balance = TokenBalance {
            balance: adjust_decimal_string(&reply.balance, denomination),
            ticker: reply.ticker,
            account: address.to_owned(),
        };
        local_cache.set(&cache_key, &balance);
        Ok(Some(balance))
    }

    /// Waits until no other request for `key` is in flight.
    async fn balance_turn(&self, key: &BalanceKey) -> BalanceTurn {
        loop {
            let waiter = match self.balance_requests.try_acquire(key.clone()) {
                Acquisition::Leader(guard) => return BalanceTurn::Lead(guard),
                Acquisition::Follower(waiter) => waiter,
            };

            tracing::debug!("balance request already in flight, waiting");
            self.client.metrics().in_flight_joins_total.inc();
            if !waiter.wait(self.in_flight_timeout).await {
                tracing::warn!(
                    timeout = ?self.in_flight_timeout,
                    "timed out waiting for balance request in flight"
                );
                return BalanceTurn::TimedOut;
            }
            if self
                .client
                .local_cache()
                .get_any_age::<TokenBalance>(&key.cache_key())
                .is_some()
            {
                return BalanceTurn::Joined;
            }
            // The request in flight failed; try to lead the next one.
        }
    }

    /// Returns the number of decimals of `token`.
    ///
    /// The lookup is retried and cached remotely for a month. If it fails or the token reports a
    /// non-numeric or out-of-range denomination, the configured default (8 unless configured
    /// otherwise) is returned.
    pub async fn get_token_denomination(&self, token: &str) -> u32 {
        let query = InfoQuery;
        let mode = CallMode::Simulate;
        let attempts = AtomicU32::new(0);
        let result = retry(&self.retry, || {
            attempts.fetch_add(1, Ordering::Relaxed);
            self.client
                .call(token, &query, &mode, Some(CacheExpiry::Month), None)
        })
        .await;
        self.record_attempts(InfoQuery::ACTION, &attempts);

        match result {
            Ok(info) => info.denomination.unwrap_or_else(|| {
                tracing::warn!(token, "invalid denomination, using the default");
                self.faucet.default_denomination
            }),
            Err(error) => {
                tracing::warn!(token, %error, "error getting token denomination, using the default");
                self.faucet.default_denomination
            }
        }
    }

    /// Asks the faucet to dispense `quantity` raw units of its token to the connected wallet.
    ///
    /// The request is retried on transient failures. If the faucet answers with an `Error` tag,
    /// fails immediately with the tag's message and leaves every cached balance untouched.
    /// Otherwise, waits for the configured delay and returns the refreshed balance of the
    /// wallet, or `"0"` if it cannot be determined.
    #[tracing::instrument(skip(self))]
    pub async fn get_tokens(&self, quantity: &str) -> Result<String, ClientError> {
        let signer = self.session.signer()?;
        let address = self.session.address();
        let token = self.faucet.token_process_id.as_str();
        let mode = CallMode::SignedDispatch { signer };
        let request = FaucetRequest {
            quantity: quantity.to_owned(),
        };

        let attempts = AtomicU32::new(0);
        let result = retry_if(
            &self.retry,
            |error: &ClientError| !error.is_application_error(),
            || {
                attempts.fetch_add(1, Ordering::Relaxed);
                self.client
                    .call(token, &request, &mode, None, address.as_deref())
            },
        )
        .await;
        self.record_attempts(FaucetRequest::ACTION, &attempts);

        if let Err(error) = result {
            let error = if error.last_error.is_application_error() {
                error.into_inner()
            } else {
                error.into()
            };
            tracing::error!(%error, "error dispensing tokens");
            return Err(error);
        }
        tracing::info!(quantity, "tokens dispensed");

        tokio::time::sleep(self.faucet.refresh_delay).await;

        let Some(address) = address else {
            return Ok("0".to_owned());
        };
        self.forget_balance(&address, token);
        Ok(self
            .get_balance(&address, token, None)
            .await
            .map_or_else(|| "0".to_owned(), |balance| balance.balance))
    }

    /// Requests an amount of whole tokens drawn from `policy`.
    ///
    /// The amount is scaled by the token's denomination before it is sent.
    pub async fn request_tokens(&self, policy: &QuantityPolicy) -> Result<String, ClientError> {
        let amount = policy.amount();
        let denomination = self.get_token_denomination(self.faucet_token()).await;
        tracing::debug!(amount, denomination, "requesting tokens");
        self.get_tokens(&scale_to_raw_amount(amount, denomination))
            .await
    }

    /// Requests the configured amount of tokens.
    pub async fn request_default_tokens(&self) -> Result<String, ClientError> {
        let policy = self.faucet.quantity;
        self.request_tokens(&policy).await
    }

    /// Drops the locally stored balance of `address`, so the next lookup queries the process.
    fn forget_balance(&self, address: &str, token: &str) {
        let key = BalanceKey::new(address, token);
        self.client.local_cache().remove(&key.cache_key());

        let query = BalanceQuery {
            target: address.to_owned(),
        };
        let fingerprint = self.client.fingerprint(token, &query.to_tags(), None);
        self.client.throttle().forget(&fingerprint);
    }

    fn record_attempts(&self, operation: &str, attempts: &AtomicU32) {
        self.client
            .metrics()
            .retry_attempts_total
            .with_label_values(&[operation])
            .inc_by(u64::from(attempts.load(Ordering::Relaxed)));
    }
}
