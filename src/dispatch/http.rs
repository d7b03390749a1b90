//! HTTP executor: builds the request from the target, enforces the per-call
//! timeout, and normalizes whatever happens into an [`ExecutionResult`].

use std::time::{Duration, Instant};

use chrono::Utc;
use reqwest::{Client, Method};
use tracing::{debug, warn};

use super::classify::{classify, describe};
use super::Executor;
use crate::config::DispatchConfig;
use crate::model::{ErrorType, Execution, ExecutionResult};

pub struct HttpExecutor {
    client: Client,
    timeout: Duration,
    body_limit: usize,
}

impl HttpExecutor {
    pub fn new(config: &DispatchConfig) -> reqwest::Result<Self> {
        Self::with_limits(
            Duration::from_secs(config.request_timeout_secs),
            config.body_capture_bytes,
        )
    }

    pub fn with_limits(timeout: Duration, body_limit: usize) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("httpcron/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            timeout,
            body_limit,
        })
    }

    /// Send the request and read at most `body_limit` bytes of the body.
    async fn exchange(
        &self,
        execution: &Execution,
        method: Method,
    ) -> reqwest::Result<(u16, Option<String>)> {
        let target = &execution.target;
        let mut request = self.client.request(method, &target.url);
        for (name, value) in &target.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &target.body_template {
            request = request.body(body.clone());
        }

        let mut response = request.send().await?;
        let status = response.status().as_u16();

        let mut captured: Vec<u8> = Vec::new();
        while captured.len() < self.body_limit {
            match response.chunk().await? {
                Some(chunk) => {
                    let room = self.body_limit - captured.len();
                    captured.extend_from_slice(&chunk[..chunk.len().min(room)]);
                }
                None => break,
            }
        }

        let body = (!captured.is_empty()).then(|| String::from_utf8_lossy(&captured).into_owned());
        Ok((status, body))
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[async_trait::async_trait]
impl Executor for HttpExecutor {
    async fn execute(&self, execution: &Execution) -> ExecutionResult {
        let executed_at = Utc::now();
        let start = Instant::now();

        let method = match Method::from_bytes(execution.target.method.to_ascii_uppercase().as_bytes()) {
            Ok(method) => method,
            Err(e) => {
                warn!(method = %execution.target.method, "target has an unusable method");
                return ExecutionResult::transport_failure(
                    execution,
                    executed_at,
                    0,
                    ErrorType::Other,
                    e.to_string(),
                );
            }
        };

        // Hard bound on the whole exchange, body read included.
        let result = match tokio::time::timeout(self.timeout, self.exchange(execution, method)).await {
            Ok(Ok((status, body))) => {
                ExecutionResult::response(execution, executed_at, status, elapsed_ms(start), body)
            }
            Ok(Err(e)) => ExecutionResult::transport_failure(
                execution,
                executed_at,
                elapsed_ms(start),
                classify(&e),
                describe(&e),
            ),
            Err(_) => ExecutionResult::transport_failure(
                execution,
                executed_at,
                elapsed_ms(start),
                ErrorType::Timeout,
                format!("no complete response within {}ms", self.timeout.as_millis()),
            ),
        };

        debug!(
            url = %execution.target.url,
            outcome = result.outcome.as_str(),
            status_code = ?result.status_code,
            latency_ms = result.latency_ms,
            error_type = ?result.error_type,
            "execution finished"
        );
        result
    }
}
