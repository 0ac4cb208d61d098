// Copyright (c) Test Tube Contributors
// SPDX-License-Identifier: Apache-2.0

//! Transport to the compute network.
//!
//! Reads are served by a compute unit (CU) as *dry runs*: the process evaluates the message without
//! persisting anything. Writes are signed data items posted to a messenger unit (MU); their
//! outcome is fetched from the CU once the message has been processed.

use std::{fmt, fmt::Debug};

use async_trait::async_trait;
use reqwest::{Client as ReqwestClient, Response, header};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    error::ClientError,
    messages::{MessageResult, Tag},
    wallet::{DataItemRequest, Signer},
};

/// Default URL of the compute unit.
pub const DEFAULT_COMPUTE_UNIT_URL: &str = "https://cu.ao-testnet.xyz";
/// Default URL of the messenger unit.
pub const DEFAULT_MESSENGER_UNIT_URL: &str = "https://mu.ao-testnet.xyz";

/// The identifier of a message sent to a process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The operations the SDK performs on the compute network.
#[async_trait]
pub trait ComputeNetwork: Send + Sync + Debug {
    /// Evaluates a message with `tags` against `process_id` without changing its state.
    async fn dry_run(&self, process_id: &str, tags: &[Tag]) -> Result<MessageResult, ClientError>;

    /// Signs a message with `signer` and sends it to `process_id`.
    async fn send_message(
        &self,
        process_id: &str,
        tags: &[Tag],
        data: &str,
        signer: &dyn Signer,
    ) -> Result<MessageId, ClientError>;

    /// Fetches the outcome of processing `message` by `process_id`.
    async fn result(
        &self,
        process_id: &str,
        message: &MessageId,
    ) -> Result<MessageResult, ClientError>;
}

/// Tags identifying messages sent through this SDK to the network.
fn protocol_tags() -> [Tag; 4] {
    [
        Tag::new("Data-Protocol", "ao"),
        Tag::new("Variant", "ao.TN.1"),
        Tag::new("Type", "Message"),
        Tag::new("SDK", "aoconnect"),
    ]
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct DryRunRequest<'a> {
    id: &'a str,
    target: &'a str,
    owner: &'a str,
    anchor: &'a str,
    data: &'a str,
    tags: &'a [Tag],
}

impl<'a> DryRunRequest<'a> {
    fn new(process_id: &'a str, tags: &'a [Tag]) -> Self {
        // The CU requires these fields but does not verify them for dry runs.
        Self {
            id: "1234",
            target: process_id,
            owner: "1234",
            anchor: "0",
            data: "1234",
            tags,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SendReply {
    #[serde(default)]
    id: Option<String>,
}

/// A [`ComputeNetwork`] reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpComputeNetwork {
    client: ReqwestClient,
    compute_unit: Url,
    messenger_unit: Url,
}

impl HttpComputeNetwork {
    /// Creates a transport using the given compute and messenger units.
    pub fn new(client: ReqwestClient, compute_unit: Url, messenger_unit: Url) -> Self {
        Self {
            client,
            compute_unit,
            messenger_unit,
        }
    }

    fn dry_run_url(&self, process_id: &str) -> Url {
        let mut url = endpoint(&self.compute_unit, &["dry-run"]);
        url.query_pairs_mut().append_pair("process-id", process_id);
        url
    }

    fn result_url(&self, process_id: &str, message: &MessageId) -> Url {
        let mut url = endpoint(&self.compute_unit, &["result", &message.0]);
        url.query_pairs_mut().append_pair("process-id", process_id);
        url
    }
}

#[async_trait]
impl ComputeNetwork for HttpComputeNetwork {
    #[tracing::instrument(skip_all, fields(process_id = %process_id))]
    async fn dry_run(&self, process_id: &str, tags: &[Tag]) -> Result<MessageResult, ClientError> {
        let url = self.dry_run_url(process_id);
        tracing::debug!(%url, "sending dry run");
        let response = self
            .client
            .post(url)
            .json(&DryRunRequest::new(process_id, tags))
            .send()
            .await?;
        Ok(ensure_success(response).await?.json().await?)
    }

    #[tracing::instrument(skip_all, fields(process_id = %process_id))]
    async fn send_message(
        &self,
        process_id: &str,
        tags: &[Tag],
        data: &str,
        signer: &dyn Signer,
    ) -> Result<MessageId, ClientError> {
        let mut all_tags = tags.to_vec();
        all_tags.extend(protocol_tags());
        let signed = signer
            .sign_data_item(DataItemRequest {
                data: data.as_bytes().to_vec(),
                tags: all_tags,
                target: Some(process_id.to_owned()),
                anchor: None,
            })
            .await?;

        tracing::debug!(id = %signed.id, "posting signed message");
        let response = self
            .client
            .post(self.messenger_unit.clone())
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header(header::ACCEPT, "application/json")
            .body(signed.raw)
            .send()
            .await?;
        let reply: SendReply = ensure_success(response).await?.json().await?;

        [reply.id, Some(signed.id)]
            .into_iter()
            .flatten()
            .find(|id| !id.is_empty())
            .map(MessageId)
            .ok_or_else(|| ClientError::send_failed(process_id))
    }

    #[tracing::instrument(skip_all, fields(process_id = %process_id, message = %message))]
    async fn result(
        &self,
        process_id: &str,
        message: &MessageId,
    ) -> Result<MessageResult, ClientError> {
        let response = self
            .client
            .get(self.result_url(process_id, message))
            .send()
            .await?;
        Ok(ensure_success(response).await?.json().await?)
    }
}

/// Appends `segments` to the path of `base`.
fn endpoint(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

async fn ensure_success(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    tracing::debug!(%status, body = %message, "request failed");
    Err(ClientError::status(status, message))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use mockito::{Matcher, Server};
    use serde_json::json;
    use testtube_test_utils::Result as TestResult;

    use super::*;
    use crate::wallet::{SignedDataItem, WalletError};

    /// Signs every item with the same id and remembers the last request.
    #[derive(Debug)]
    struct RecordingSigner {
        id: &'static str,
        last_request: Mutex<Option<DataItemRequest>>,
    }

    impl RecordingSigner {
        fn new(id: &'static str) -> Self {
            Self {
                id,
                last_request: Mutex::new(None),
            }
        }

        fn last_request(&self) -> Option<DataItemRequest> {
            self.last_request.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Signer for RecordingSigner {
        async fn sign_data_item(
            &self,
            request: DataItemRequest,
        ) -> Result<SignedDataItem, WalletError> {
            *self.last_request.lock().unwrap() = Some(request);
            Ok(SignedDataItem {
                id: self.id.to_owned(),
                raw: b"signed-item".to_vec(),
            })
        }
    }

    fn network_at(server: &Server) -> HttpComputeNetwork {
        let url = Url::parse(&server.url()).unwrap();
        HttpComputeNetwork::new(ReqwestClient::new(), url.clone(), url)
    }

    const NOTICE: &str = r#"{"Messages":[{"Tags":[{"name":"Action","value":"Debit-Notice"}]}]}"#;

    fn network(compute_unit: &str) -> HttpComputeNetwork {
        HttpComputeNetwork::new(
            ReqwestClient::new(),
            Url::parse(compute_unit).unwrap(),
            Url::parse(DEFAULT_MESSENGER_UNIT_URL).unwrap(),
        )
    }

    #[test]
    fn builds_endpoint_urls() {
        let default = network(DEFAULT_COMPUTE_UNIT_URL);
        assert_eq!(
            default.dry_run_url("proc").as_str(),
            "https://cu.ao-testnet.xyz/dry-run?process-id=proc"
        );
        assert_eq!(
            default
                .result_url("proc", &MessageId("msg".to_owned()))
                .as_str(),
            "https://cu.ao-testnet.xyz/result/msg?process-id=proc"
        );

        let nested = network("http://localhost:6363/cu/");
        assert_eq!(
            nested.dry_run_url("p").as_str(),
            "http://localhost:6363/cu/dry-run?process-id=p"
        );
    }

    #[test]
    fn serializes_dry_run_request() {
        let tags = [Tag::new("Action", "Info")];
        assert_eq!(
            serde_json::to_value(DryRunRequest::new("proc", &tags)).unwrap(),
            json!({
                "Id": "1234",
                "Target": "proc",
                "Owner": "1234",
                "Anchor": "0",
                "Data": "1234",
                "Tags": [{"name": "Action", "value": "Info"}],
            })
        );
    }

    #[tokio::test]
    async fn dry_run_posts_request_to_compute_unit() -> TestResult {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/dry-run")
            .match_query(Matcher::UrlEncoded("process-id".into(), "proc".into()))
            .match_body(Matcher::PartialJson(json!({
                "Target": "proc",
                "Tags": [{"name": "Action", "value": "Info"}],
            })))
            .with_header("content-type", "application/json")
            .with_body(r#"{"Messages":[{"Tags":[{"name":"Ticker","value":"TUBE"}]}]}"#)
            .expect(1)
            .create_async()
            .await;

        let result = network_at(&server)
            .dry_run("proc", &[Tag::new("Action", "Info")])
            .await?;

        assert_eq!(result.find_tag("Ticker"), Some("TUBE"));
        mock.assert_async().await;
        Ok(())
    }

    #[tokio::test]
    async fn send_message_posts_signed_item_then_result_is_fetched() -> TestResult {
        let mut server = Server::new_async().await;
        let send = server
            .mock("POST", "/")
            .match_header("content-type", "application/octet-stream")
            .match_header("accept", "application/json")
            .match_body(Matcher::Exact("signed-item".to_owned()))
            .with_body(r#"{"id":"msg-1"}"#)
            .expect(1)
            .create_async()
            .await;
        let result = server
            .mock("GET", "/result/msg-1")
            .match_query(Matcher::UrlEncoded("process-id".into(), "proc".into()))
            .with_body(NOTICE)
            .expect(1)
            .create_async()
            .await;
        let network = network_at(&server);
        let signer = RecordingSigner::new("local-id");

        let message = network
            .send_message("proc", &[Tag::new("Action", "Faucet")], "", &signer)
            .await?;
        assert_eq!(message, MessageId("msg-1".to_owned()));

        let request = signer.last_request().expect("the item was signed");
        assert_eq!(request.target.as_deref(), Some("proc"));
        assert_eq!(request.tags[0], Tag::new("Action", "Faucet"));
        assert!(request.tags.contains(&Tag::new("Data-Protocol", "ao")));

        let outcome = network.result("proc", &message).await?;
        assert_eq!(outcome.find_tag("Action"), Some("Debit-Notice"));
        send.assert_async().await;
        result.assert_async().await;
        Ok(())
    }

    #[tokio::test]
    async fn send_message_falls_back_to_signed_id() -> TestResult {
        let mut server = Server::new_async().await;
        server.mock("POST", "/").with_body("{}").create_async().await;

        let message = network_at(&server)
            .send_message("proc", &[], "", &RecordingSigner::new("local-id"))
            .await?;
        assert_eq!(message, MessageId("local-id".to_owned()));
        Ok(())
    }

    #[tokio::test]
    async fn send_message_without_any_id_fails() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/")
            .with_body(r#"{"id":""}"#)
            .create_async()
            .await;

        let error = network_at(&server)
            .send_message("proc", &[], "", &RecordingSigner::new(""))
            .await
            .expect_err("no message id is known");
        assert_eq!(error.to_string(), "failed to send message to process proc");
    }

    #[tokio::test]
    async fn error_status_is_reported_with_body() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/result/msg")
            .match_query(Matcher::Any)
            .with_status(502)
            .with_body("bad gateway")
            .create_async()
            .await;

        let error = network_at(&server)
            .result("proc", &MessageId("msg".to_owned()))
            .await
            .expect_err("the unit is unavailable");
        assert_eq!(error.http_status_code(), Some(reqwest::StatusCode::BAD_GATEWAY));
        assert!(error.to_string().contains("bad gateway"));
        assert!(!error.is_decode());
    }

    #[tokio::test]
    async fn malformed_body_is_a_decode_error() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/dry-run")
            .match_query(Matcher::Any)
            .with_header("content-type", "text/html")
            .with_body("<html>maintenance</html>")
            .create_async()
            .await;

        let error = network_at(&server)
            .dry_run("proc", &[])
            .await
            .expect_err("the body is not JSON");
        assert!(error.is_decode());
        assert_eq!(error.http_status_code(), None);
    }

    #[tokio::test]
    async fn unreachable_unit_is_a_connect_error() -> TestResult {
        let address = std::net::TcpListener::bind("127.0.0.1:0")?.local_addr()?;
        let url = Url::parse(&format!("http://{address}"))?;
        let network = HttpComputeNetwork::new(ReqwestClient::new(), url.clone(), url);

        let error = network
            .dry_run("proc", &[])
            .await
            .expect_err("nothing listens on the port");
        assert!(error.is_connect());
        Ok(())
    }
}
