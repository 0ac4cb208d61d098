// Copyright (c) Test Tube Contributors
// SPDX-License-Identifier: Apache-2.0

//! Messages exchanged with processes on the compute network.
//!
//! On the wire, requests and responses carry their information as ordered lists of name/value
//! [`Tag`]s. The typed requests in this module ([`BalanceQuery`], [`InfoQuery`], [`FaucetRequest`])
//! are converted to tag lists, and their replies parsed from a [`MessageResult`], only at the
//! boundary of the [`RemoteCallClient`][crate::client::RemoteCallClient].

use serde::{Deserialize, Serialize};

use crate::{error::ClientError, utils::MAX_DECIMALS};

/// Tag names used by the token processes.
pub mod tag_names {
    /// Selects the operation of the process.
    pub const ACTION: &str = "Action";
    /// The subject address of a query.
    pub const TARGET: &str = "Target";
    /// The recipient of a transfer.
    pub const RECIPIENT: &str = "Recipient";
    /// An integer amount, already scaled by the token's denomination.
    pub const QUANTITY: &str = "Quantity";
    /// Present on failed requests; holds a human-readable message.
    pub const ERROR: &str = "Error";
    /// The raw integer balance.
    pub const BALANCE: &str = "Balance";
    /// The token ticker.
    pub const TICKER: &str = "Ticker";
    /// The token name.
    pub const NAME: &str = "Name";
    /// The number of decimal places of the token.
    pub const DENOMINATION: &str = "Denomination";
    /// The account a balance refers to.
    pub const ACCOUNT: &str = "Account";
}

/// A name/value pair attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    /// The tag name.
    pub name: String,
    /// The tag value.
    pub value: String,
}

impl Tag {
    /// Creates a new tag.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    fn action(value: &str) -> Self {
        Self::new(tag_names::ACTION, value)
    }
}

/// A single message emitted by a process while handling a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMessage {
    /// The data payload of the message.
    #[serde(rename = "Data", default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// The tags of the message, in order.
    #[serde(rename = "Tags", default)]
    pub tags: Vec<Tag>,
}

/// The outcome of a dry run or of a settled message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResult {
    /// The messages emitted by the process.
    #[serde(rename = "Messages", default)]
    pub messages: Vec<ResponseMessage>,
}

impl MessageResult {
    /// Creates a result consisting of a single message with the given tags.
    pub fn with_tags(tags: Vec<Tag>) -> Self {
        Self {
            messages: vec![ResponseMessage { data: None, tags }],
        }
    }

    /// Returns the value of the first tag called `name` on the first message.
    pub fn find_tag(&self, name: &str) -> Option<&str> {
        self.messages
            .first()?
            .tags
            .iter()
            .find(|tag| tag.name == name)
            .map(|tag| tag.value.as_str())
    }

    /// Returns the message of the `Error` tag on the first message, if any.
    pub fn error_tag(&self) -> Option<&str> {
        self.find_tag(tag_names::ERROR)
    }

    /// Returns the data payload of the first message, if any.
    pub fn first_data(&self) -> Option<&str> {
        self.messages.first()?.data.as_deref()
    }
}

/// A typed request to a token process.
pub trait ProcessRequest {
    /// The value of the `Action` tag.
    const ACTION: &'static str;

    /// The typed reply.
    type Reply;

    /// The tags following the `Action` tag, in order.
    fn parameters(&self) -> Vec<Tag>;

    /// Parses the reply from the process' response.
    fn parse_reply(result: &MessageResult) -> Result<Self::Reply, ClientError>;

    /// The full, ordered tag list sent on the wire.
    fn to_tags(&self) -> Vec<Tag> {
        let mut tags = vec![Tag::action(Self::ACTION)];
        tags.extend(self.parameters());
        tags
    }
}

/// Queries the balance of an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceQuery {
    /// The address whose balance is requested.
    pub target: String,
}

/// The raw balance of an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceReply {
    /// The balance as an integer string, not yet scaled by the denomination.
    pub balance: String,
    /// The token ticker.
    pub ticker: String,
}

impl ProcessRequest for BalanceQuery {
    const ACTION: &'static str = "Balance";
    type Reply = BalanceReply;

    fn parameters(&self) -> Vec<Tag> {
        vec![Tag::new(tag_names::TARGET, self.target.as_str())]
    }

    fn parse_reply(result: &MessageResult) -> Result<Self::Reply, ClientError> {
        let balance = result
            .find_tag(tag_names::BALANCE)
            .ok_or_else(|| ClientError::missing_tag(tag_names::BALANCE))?;
        let ticker = result
            .find_tag(tag_names::TICKER)
            .ok_or_else(|| ClientError::missing_tag(tag_names::TICKER))?;
        Ok(BalanceReply {
            balance: balance.to_owned(),
            ticker: ticker.to_owned(),
        })
    }
}

/// Queries the metadata of a token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InfoQuery;

/// Token metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    /// The number of decimals, or `None` if the process returned a non-numeric value or one
    /// above [`MAX_DECIMALS`].
    pub denomination: Option<u32>,
    /// The token ticker, if reported.
    pub ticker: Option<String>,
    /// The token name, if reported.
    pub name: Option<String>,
}

impl ProcessRequest for InfoQuery {
    const ACTION: &'static str = "Info";
    type Reply = TokenInfo;

    fn parameters(&self) -> Vec<Tag> {
        vec![]
    }

    fn parse_reply(result: &MessageResult) -> Result<Self::Reply, ClientError> {
        let denomination = result
            .find_tag(tag_names::DENOMINATION)
            .ok_or_else(|| ClientError::missing_tag(tag_names::DENOMINATION))?;
        Ok(TokenInfo {
            denomination: denomination
                .trim()
                .parse()
                .ok()
                .filter(|decimals| *decimals <= MAX_DECIMALS),
            ticker: result.find_tag(tag_names::TICKER).map(str::to_owned),
            name: result.find_tag(tag_names::NAME).map(str::to_owned),
        })
    }
}

/// Asks the faucet process to dispense tokens to the signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaucetRequest {
    /// The amount as an integer string, already scaled by the denomination.
    pub quantity: String,
}

/// Acknowledgement of a successful dispense.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaucetReceipt {
    /// The data payload of the first response message, if any.
    pub message: Option<String>,
}

impl ProcessRequest for FaucetRequest {
    const ACTION: &'static str = "Faucet";
    type Reply = FaucetReceipt;

    fn parameters(&self) -> Vec<Tag> {
        vec![Tag::new(tag_names::QUANTITY, self.quantity.as_str())]
    }

    fn parse_reply(result: &MessageResult) -> Result<Self::Reply, ClientError> {
        if let Some(message) = result.error_tag() {
            return Err(ClientError::application(message));
        }
        Ok(FaucetReceipt {
            message: result.first_data().map(str::to_owned),
        })
    }
}

#[cfg(test)]
mod tests {
    use testtube_test_utils::Result as TestResult;

    use super::*;

    #[test]
    fn deserializes_process_response() -> TestResult {
        let result: MessageResult = serde_json::from_str(
            r#"{
                "Messages": [
                    {"Data": "1500", "Tags": [
                        {"name": "Action", "value": "Balance-Notice"},
                        {"name": "Balance", "value": "1500"},
                        {"name": "Ticker", "value": "TUBE"}
                    ]},
                    {"Tags": [{"name": "Balance", "value": "ignored"}]}
                ],
                "Spawns": [],
                "Output": ""
            }"#,
        )?;

        assert_eq!(result.first_data(), Some("1500"));
        assert_eq!(result.find_tag("Balance"), Some("1500"));
        assert_eq!(result.find_tag("Denomination"), None);
        Ok(())
    }

    #[test]
    fn requests_put_action_first() {
        let query = BalanceQuery {
            target: "addr".to_owned(),
        };
        assert_eq!(
            query.to_tags(),
            vec![Tag::new("Action", "Balance"), Tag::new("Target", "addr")]
        );
        assert_eq!(InfoQuery.to_tags(), vec![Tag::new("Action", "Info")]);
    }

    #[test]
    fn balance_reply_requires_balance_and_ticker() {
        let result = MessageResult::with_tags(vec![Tag::new("Balance", "42")]);
        let error = BalanceQuery::parse_reply(&result).expect_err("ticker is missing");
        assert!(error.is_missing_tag());

        let result = MessageResult::with_tags(vec![
            Tag::new("Ticker", "TUBE"),
            Tag::new("Balance", "42"),
        ]);
        assert_eq!(
            BalanceQuery::parse_reply(&result).expect("complete reply"),
            BalanceReply {
                balance: "42".to_owned(),
                ticker: "TUBE".to_owned()
            }
        );
    }

    #[test]
    fn non_numeric_denomination_is_reported_as_unknown() {
        let result = MessageResult::with_tags(vec![Tag::new("Denomination", "lots")]);
        let info = InfoQuery::parse_reply(&result).expect("tag is present");
        assert_eq!(info.denomination, None);

        let result = MessageResult::with_tags(vec![Tag::new("Denomination", "70000")]);
        let info = InfoQuery::parse_reply(&result).expect("tag is present");
        assert_eq!(info.denomination, None);

        let result = MessageResult::with_tags(vec![Tag::new("Denomination", " 18 ")]);
        let info = InfoQuery::parse_reply(&result).expect("tag is present");
        assert_eq!(info.denomination, Some(18));

        let error = InfoQuery::parse_reply(&MessageResult::default()).expect_err("no messages");
        assert!(error.is_missing_tag());
    }

    #[test]
    fn faucet_error_tag_becomes_application_error() {
        let result = MessageResult::with_tags(vec![Tag::new("Error", "Faucet is empty")]);
        let error = FaucetRequest::parse_reply(&result).expect_err("error tag present");

        assert_eq!(error.application_message(), Some("Faucet is empty"));
        assert_eq!(error.to_string(), "Faucet is empty");
    }
}
