//! HTTP client for the terminal's local control API.

use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::domain::{Terminal, TransactionRequest};

#[derive(Error, Debug)]
pub enum TerminalError {
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("terminal response missing required field: {0}")]
    Protocol(&'static str),

    #[error("terminal returned error: {0}")]
    Api(String),

    #[error("terminal circuit breaker open")]
    CircuitOpen,
}

/// Acknowledgement of an accepted sale/refund.
#[derive(Debug, Clone)]
pub struct InitiateAck {
    /// Identifier the terminal assigned; used for all follow-up calls.
    pub transaction_id: String,
    pub status: Option<String>,
}

/// Response from `GET /api/transactions/{id}/status`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: String,
    pub error: Option<String>,
}

/// Response from `POST /api/transactions/{id}/cancel`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub success: bool,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitiateResponse {
    transaction_id: Option<String>,
    status: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransactionBody<'a> {
    amount: i64,
    currency: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    original_transaction_id: Option<&'a str>,
}

impl<'a> TransactionBody<'a> {
    fn from_request(request: &'a TransactionRequest) -> Self {
        Self {
            amount: request.amount(),
            currency: request.currency(),
            original_transaction_id: request.original_transaction_id(),
        }
    }
}

/// Thin typed transport over the terminal control plane. Cheap to clone; the
/// terminal descriptor is supplied per call.
#[derive(Clone)]
pub struct TerminalClient {
    client: Client,
    circuit_breaker: StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>,
}

impl TerminalClient {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let client = Client::builder().timeout(timeout).build().unwrap_or_default();

        let backoff = backoff::equal_jittered(Duration::from_secs(60), Duration::from_secs(120));
        let policy = failure_policy::consecutive_failures(3, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        Self {
            client,
            circuit_breaker,
        }
    }

    /// Returns the current state of the circuit breaker.
    pub fn circuit_state(&self) -> &'static str {
        if self.circuit_breaker.is_call_permitted() {
            "closed"
        } else {
            "open"
        }
    }

    /// Opens a sale on the terminal.
    pub async fn sale(
        &self,
        terminal: &Terminal,
        request: &TransactionRequest,
    ) -> Result<InitiateAck, TerminalError> {
        self.initiate(terminal, "api/transactions/sale", request)
            .await
    }

    /// Opens a refund on the terminal.
    pub async fn refund(
        &self,
        terminal: &Terminal,
        request: &TransactionRequest,
    ) -> Result<InitiateAck, TerminalError> {
        self.initiate(terminal, "api/transactions/refund", request)
            .await
    }

    async fn initiate(
        &self,
        terminal: &Terminal,
        path: &str,
        request: &TransactionRequest,
    ) -> Result<InitiateAck, TerminalError> {
        let url = endpoint(terminal, path);
        let body = TransactionBody::from_request(request);
        let builder = authorize(self.client.post(&url), terminal).json(&body);

        self.guarded(async move {
            let response = builder.send().await?.error_for_status()?;
            let ack = response.json::<InitiateResponse>().await?;

            if let Some(error) = ack.error {
                return Err(TerminalError::Api(error));
            }

            let transaction_id = ack
                .transaction_id
                .ok_or(TerminalError::Protocol("transactionId"))?;

            Ok(InitiateAck {
                transaction_id,
                status: ack.status,
            })
        })
        .await
    }

    /// Queries the status of a terminal-side transaction.
    pub async fn status(
        &self,
        terminal: &Terminal,
        terminal_transaction_id: &str,
    ) -> Result<StatusResponse, TerminalError> {
        let url = endpoint(
            terminal,
            &format!("api/transactions/{}/status", terminal_transaction_id),
        );
        let builder = authorize(self.client.get(&url), terminal);

        self.guarded(async move {
            let response = builder.send().await?.error_for_status()?;
            Ok(response.json::<StatusResponse>().await?)
        })
        .await
    }

    /// Requests cancellation of a terminal-side transaction.
    pub async fn cancel(
        &self,
        terminal: &Terminal,
        terminal_transaction_id: &str,
    ) -> Result<CancelResponse, TerminalError> {
        let url = endpoint(
            terminal,
            &format!("api/transactions/{}/cancel", terminal_transaction_id),
        );
        let builder = authorize(self.client.post(&url), terminal);

        self.guarded(async move {
            let response = builder.send().await?.error_for_status()?;
            Ok(response.json::<CancelResponse>().await?)
        })
        .await
    }

    async fn guarded<T, F>(&self, call: F) -> Result<T, TerminalError>
    where
        F: Future<Output = Result<T, TerminalError>>,
    {
        match self.circuit_breaker.call(call).await {
            Ok(value) => Ok(value),
            Err(FailsafeError::Rejected) => Err(TerminalError::CircuitOpen),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }
}

impl Default for TerminalClient {
    fn default() -> Self {
        Self::new()
    }
}

fn endpoint(terminal: &Terminal, path: &str) -> String {
    format!(
        "{}/{}",
        terminal.base_url.as_str().trim_end_matches('/'),
        path
    )
}

fn authorize(builder: reqwest::RequestBuilder, terminal: &Terminal) -> reqwest::RequestBuilder {
    match &terminal.api_key {
        Some(key) => builder.bearer_auth(key),
        None => builder,
    }
}
