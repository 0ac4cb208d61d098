// Copyright (c) Test Tube Contributors
// SPDX-License-Identifier: Apache-2.0

//! Runs the commands of the `testtube` binary.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;
use testtube_sdk::{
    CallMode,
    FaucetClient,
    RemoteCallClient,
    cache::CacheExpiry,
    config::{ClientConfig, QuantityPolicy},
    messages::InfoQuery,
    utils::{format_number, scale_to_raw_amount},
    wallet::WalletSession,
};
use testtube_utils::metrics::Registry;

use crate::args::{CallArgs, Command, ExpiryArg};

/// Runs commands against the compute network without a wallet.
#[derive(Debug)]
pub(crate) struct ClientCommandRunner {
    faucet: FaucetClient,
    default_quantity: QuantityPolicy,
    json: bool,
}

impl ClientCommandRunner {
    pub(crate) fn new(config: &ClientConfig, registry: &Registry, json: bool) -> Result<Self> {
        let client = RemoteCallClient::from_config(config, Some(registry))
            .context("failed to create the remote call client")?;
        let session = Arc::new(WalletSession::new(None));
        Ok(Self {
            faucet: FaucetClient::new(Arc::new(client), session, config),
            default_quantity: config.faucet.quantity,
            json,
        })
    }

    pub(crate) async fn run(self, command: Command) -> Result<()> {
        let result = self.run_command(command).await;
        self.faucet.client().flush().await;
        result
    }

    async fn run_command(&self, command: Command) -> Result<()> {
        match command {
            Command::Balance {
                address,
                token,
                decimals,
                display_decimals,
            } => {
                self.balance(&address, token, decimals, display_decimals)
                    .await
            }
            Command::Info { token } => self.info(token).await,
            Command::FaucetQuantity { amount } => self.faucet_quantity(amount).await,
            Command::Call { call, expiry } => self.call(call, expiry).await,
            Command::Invalidate { call } => self.invalidate(call).await,
            Command::Fingerprint { call } => {
                self.fingerprint(call);
                Ok(())
            }
        }
    }

    fn token_or_default(&self, token: Option<String>) -> String {
        token.unwrap_or_else(|| self.faucet.faucet_token().to_owned())
    }

    async fn balance(
        &self,
        address: &str,
        token: Option<String>,
        decimals: Option<u32>,
        display_decimals: usize,
    ) -> Result<()> {
        let token = self.token_or_default(token);
        let balance = self
            .faucet
            .try_get_balance(address, &token, decimals)
            .await?
            .context("the token process did not report a balance")?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&balance)?);
        } else {
            println!(
                "Balance of {}: {} {}",
                balance.account,
                format_number(&balance.balance, display_decimals),
                balance.ticker
            );
        }
        Ok(())
    }

    async fn info(&self, token: Option<String>) -> Result<()> {
        let token = self.token_or_default(token);
        let info = self
            .faucet
            .client()
            .call(
                &token,
                &InfoQuery,
                &CallMode::Simulate,
                Some(CacheExpiry::Month),
                None,
            )
            .await?;

        if self.json {
            let output = json!({
                "token": token,
                "name": info.name,
                "ticker": info.ticker,
                "denomination": info.denomination,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            println!("Token: {token}");
            println!("Name: {}", info.name.as_deref().unwrap_or("-"));
            println!("Ticker: {}", info.ticker.as_deref().unwrap_or("-"));
            match info.denomination {
                Some(denomination) => println!("Denomination: {denomination}"),
                None => println!("Denomination: not numeric"),
            }
        }
        Ok(())
    }

    async fn faucet_quantity(&self, amount: Option<u64>) -> Result<()> {
        let policy = amount.map_or(self.default_quantity, QuantityPolicy::Fixed);
        let amount = policy.amount();
        let denomination = self
            .faucet
            .get_token_denomination(self.faucet.faucet_token())
            .await;
        let quantity = scale_to_raw_amount(amount, denomination);

        if self.json {
            let output = json!({
                "amount": amount,
                "denomination": denomination,
                "quantity": quantity,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            println!("{amount} tokens with {denomination} decimals: Quantity={quantity}");
        }
        Ok(())
    }

    async fn call(&self, call: CallArgs, expiry: Option<ExpiryArg>) -> Result<()> {
        let response = self
            .faucet
            .client()
            .send_and_get_result(
                &call.process_id,
                &call.tags,
                &CallMode::Simulate,
                expiry.map(CacheExpiry::from),
                call.discriminator.as_deref(),
            )
            .await?;

        if let Some(error) = response.error_tag() {
            tracing::warn!(error, "the process answered with an error");
        }
        println!("{}", serde_json::to_string_pretty(&response)?);
        Ok(())
    }

    async fn invalidate(&self, call: CallArgs) -> Result<()> {
        let existed = self
            .faucet
            .client()
            .invalidate(&call.process_id, &call.tags, call.discriminator.as_deref())
            .await?;

        if self.json {
            println!("{}", json!({ "removed": existed }));
        } else if existed {
            println!("Removed the cached response.");
        } else {
            println!("No cached response found.");
        }
        Ok(())
    }

    fn fingerprint(&self, call: CallArgs) {
        let fingerprint = self.faucet.client().fingerprint(
            &call.process_id,
            &call.tags,
            call.discriminator.as_deref(),
        );

        if self.json {
            println!(
                "{}",
                json!({
                    "fingerprint": fingerprint.as_str(),
                    "throttle_key": fingerprint.throttle_key(),
                })
            );
        } else {
            println!("{fingerprint}");
        }
    }
}
