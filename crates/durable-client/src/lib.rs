//! Local Client (spec §4.H): a thin boundary that lets non-durable code
//! originate calls against the scheduler. `dispatch`/`batch_dispatch` are
//! one-way — no suspension semantics, no Poll/PollResult dance — so the
//! only real work here is retrying transient transport errors with
//! exponential backoff (spec §7), the way `journal-client`'s
//! `read::uncommitted::retry` retries a flaky read.

use durable_config::Config;
use durable_proto::{Call, DispatchRequest, DispatchResponse};
use exponential_backoff::Backoff;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("dispatch request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("scheduler rejected the dispatch: {status}: {body}")]
    Rejected { status: reqwest::StatusCode, body: String },
}

impl ClientError {
    /// Whether this failure is one spec §7 classifies as transient transport
    /// error (DNS_ERROR, TCP_ERROR, TLS_ERROR, HTTP_ERROR(5xx), TIMEOUT) and
    /// so worth retrying, versus a permanent one worth surfacing immediately.
    fn is_transient(&self) -> bool {
        match self {
            ClientError::Transport(err) => {
                err.is_timeout() || err.is_connect() || err.status().is_some_and(|status| status.is_server_error())
            }
            ClientError::Rejected { status, .. } => status.is_server_error(),
        }
    }
}

/// Issues one-way dispatch requests to the scheduler on behalf of
/// non-durable code (spec §4.H). Retries transient transport errors with
/// exponential backoff, bounded by `max_retries`; permanent errors and
/// retries exhausted both surface to the caller.
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    endpoint_url: url::Url,
    api_key: String,
    max_retries: u32,
}

impl Client {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint_url: config.endpoint_url.clone(),
            api_key: config.api_key.expose().to_string(),
            max_retries: 5,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Dispatches a single call, returning its scheduler-assigned dispatch id.
    pub async fn dispatch(&self, call: Call) -> Result<String, ClientError> {
        let mut ids = self.batch_dispatch(vec![call]).await?;
        Ok(ids.remove(0))
    }

    /// Dispatches a batch of calls, returning one dispatch id per call, in order.
    #[tracing::instrument(skip_all, fields(calls = calls.len()))]
    pub async fn batch_dispatch(&self, calls: Vec<Call>) -> Result<Vec<String>, ClientError> {
        let request = DispatchRequest { calls };
        let backoff = Backoff::new(self.max_retries, Duration::from_millis(100), Some(Duration::from_secs(30)));

        let mut attempt: u32 = 0;
        loop {
            match self.try_dispatch(&request).await {
                Ok(response) => return Ok(response.dispatch_ids),
                Err(err) if err.is_transient() => {
                    attempt += 1;
                    match backoff.next(attempt) {
                        Some(wait) => {
                            tracing::warn!(attempt, ?wait, error = %err, "retrying dispatch after transient error");
                            tokio::time::sleep(wait).await;
                        }
                        None => return Err(err),
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn try_dispatch(&self, request: &DispatchRequest) -> Result<DispatchResponse, ClientError> {
        let response = self
            .http
            .post(self.endpoint_url.clone())
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(response.json().await?)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ClientError::Rejected { status, body })
        }
    }
}
