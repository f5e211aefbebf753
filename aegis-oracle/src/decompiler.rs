use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use aegis_core::audit::PollState;
use aegis_core::config::DecompilerConfig;
use aegis_core::error::AuditError;
use aegis_core::wait::CancelSignal;
use async_trait::async_trait;
use serde_json::Value;

use crate::log::{AuditLog, DECOMPILER_TAG, SilentLog};
use crate::resolver::Decompiler;

const PROVIDER: &str = "decompiler";

/// One HTTP exchange with the decompiler service, reduced to what the client reads.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub reason: String,
    pub body: Value,
}

impl TransportResponse {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            reason: String::new(),
            body,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Wire access to the decompiler; swapped for a scripted double in tests.
#[async_trait]
pub trait DecompilerTransport: Send + Sync {
    /// `POST /decompile` with the un-prefixed bytecode hex.
    async fn submit(&self, bytecode_hex: &str) -> Result<TransportResponse, AuditError>;

    /// `GET /decompile/{job_id}`.
    async fn job_status(&self, job_id: &str) -> Result<TransportResponse, AuditError>;
}

pub struct HttpDecompilerTransport {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpDecompilerTransport {
    pub fn new(base_url: &str, api_key: String, timeout: Duration) -> Result<Self, AuditError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AuditError::transport(base_url, err.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn read(response: reqwest::Response) -> TransportResponse {
        let status = response.status();
        let body = response.json::<Value>().await.unwrap_or(Value::Null);
        TransportResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            body,
        }
    }
}

#[async_trait]
impl DecompilerTransport for HttpDecompilerTransport {
    async fn submit(&self, bytecode_hex: &str) -> Result<TransportResponse, AuditError> {
        let url = format!("{}/api/v2/decompile", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .json(&serde_json::json!({ "bytecode": bytecode_hex }))
            .send()
            .await
            .map_err(|err| AuditError::transport(&url, err.to_string()))?;
        Ok(Self::read(response).await)
    }

    async fn job_status(&self, job_id: &str) -> Result<TransportResponse, AuditError> {
        let url = format!("{}/api/v2/decompile/{job_id}", self.base_url);
        let response = self
            .http
            .get(&url)
            .header("x-api-key", &self.api_key)
            .send()
            .await
            .map_err(|err| AuditError::transport(&url, err.to_string()))?;
        Ok(Self::read(response).await)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecompilerSettings {
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
    pub max_output_chars: usize,
}

impl Default for DecompilerSettings {
    fn default() -> Self {
        Self::from(&DecompilerConfig::default())
    }
}

impl From<&DecompilerConfig> for DecompilerSettings {
    fn from(config: &DecompilerConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            max_poll_attempts: config.max_poll_attempts,
            max_output_chars: config.max_output_chars,
        }
    }
}

/// Submits bytecode for decompilation and waits out asynchronous jobs.
pub struct DecompilerClient {
    transport: Arc<dyn DecompilerTransport>,
    settings: DecompilerSettings,
    log: Arc<dyn AuditLog>,
}

impl DecompilerClient {
    pub fn new(transport: Arc<dyn DecompilerTransport>, settings: DecompilerSettings) -> Self {
        Self {
            transport,
            settings,
            log: Arc::new(SilentLog),
        }
    }

    pub fn with_log(mut self, log: Arc<dyn AuditLog>) -> Self {
        self.log = log;
        self
    }

    fn log(&self, message: impl AsRef<str>) {
        self.log.log(&format!("{DECOMPILER_TAG} {}", message.as_ref()));
    }

    pub async fn submit(&self, bytecode: &str, cancel: &CancelSignal) -> Result<String, AuditError> {
        let clean = validate_bytecode(bytecode)?;
        self.log(format!("Submitting {} hex chars for decompilation", clean.len()));

        let response = match self.transport.submit(clean).await {
            Ok(response) => response,
            Err(err) => {
                self.log(format!("Network error: {err}"));
                return Err(err);
            }
        };

        if !response.is_success() {
            self.log(format!("API error: HTTP {} {}", response.status, response.reason));
            return Err(AuditError::upstream(
                PROVIDER,
                response.status,
                format!("API returned {}: {}", response.status, response.reason),
            ));
        }

        let source = if response.status == 202 || is_pending(&response.body) {
            let job_id = job_id(&response.body).ok_or_else(|| {
                AuditError::upstream(PROVIDER, response.status, "pending response without job id")
            })?;
            self.log(format!("Decompilation pending (job: {job_id}), polling..."));
            self.poll(&job_id, cancel).await?
        } else {
            self.truncate(extract_source(&response.body))
        };

        self.log(format!("Decompilation complete: {} chars", source.chars().count()));
        Ok(source)
    }

    /// Poll a pending job at a fixed cadence until it yields output or the
    /// attempt budget runs out. Not-ready answers and transport errors retry.
    pub async fn poll(&self, job_id: &str, cancel: &CancelSignal) -> Result<String, AuditError> {
        let mut state = PollState::new(
            self.settings.max_poll_attempts,
            u64::try_from(self.settings.poll_interval.as_millis()).unwrap_or(u64::MAX),
        );

        while state.begin_attempt() {
            self.log(format!(
                "Poll attempt {}/{}...",
                state.attempts, state.max_attempts
            ));
            cancel
                .sleep(self.settings.poll_interval)
                .await
                .map_err(|_| AuditError::Cancelled {
                    operation: "decompilation poll".to_string(),
                })?;

            match self.transport.job_status(job_id).await {
                Ok(response) if response.is_success() => {
                    let source = extract_source(&response.body);
                    if !source.is_empty() {
                        self.log(format!("Decompilation ready after {} polls", state.attempts));
                        return Ok(self.truncate(source));
                    }
                }
                Ok(_) => {}
                Err(err) if err.is_transient() => {
                    self.log(format!("Poll transport error (retrying): {err}"))
                }
                Err(err) => self.log(format!("Poll error (retrying): {err}")),
            }
        }

        self.log(format!(
            "Decompilation timed out after {} attempts",
            state.max_attempts
        ));
        Err(AuditError::Timeout {
            operation: "decompilation".to_string(),
            attempts: state.max_attempts,
        })
    }

    fn truncate(&self, source: String) -> String {
        let original = source.chars().count();
        let truncated = truncate_output(source, self.settings.max_output_chars);
        if original > self.settings.max_output_chars {
            self.log(format!(
                "Output truncated from {original} to {} chars",
                self.settings.max_output_chars
            ));
        }
        truncated
    }
}

#[async_trait]
impl Decompiler for DecompilerClient {
    async fn decompile(&self, bytecode: &str, cancel: &CancelSignal) -> Result<String, AuditError> {
        self.submit(bytecode, cancel).await
    }
}

pub fn strip_hex_prefix(value: &str) -> &str {
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}

/// Empty input, the bare `0x` sentinel, and single-byte code carry nothing to decompile.
pub fn is_trivial_bytecode(bytecode: &str) -> bool {
    strip_hex_prefix(bytecode.trim()).len() <= 2
}

fn validate_bytecode(bytecode: &str) -> Result<&str, AuditError> {
    if is_trivial_bytecode(bytecode) {
        return Err(AuditError::input(
            "empty or invalid bytecode, nothing to decompile",
        ));
    }
    let clean = strip_hex_prefix(bytecode.trim());
    if !clean.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(AuditError::input("bytecode is not hex"));
    }
    Ok(clean)
}

/// Cut `text` to at most `max_chars` characters.
pub fn truncate_output(text: String, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => text[..byte_index].to_string(),
        None => text,
    }
}

fn extract_source(body: &Value) -> String {
    ["source", "decompiled"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
        .unwrap_or_default()
        .to_string()
}

fn job_id(body: &Value) -> Option<String> {
    ["jobId", "md5", "job_id"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

fn is_pending(body: &Value) -> bool {
    body.get("status").and_then(Value::as_str) == Some("pending")
}

/// Deterministic transport double. Unscripted status checks answer "pending".
#[derive(Default)]
pub struct ScriptedTransport {
    submits: Mutex<VecDeque<Result<TransportResponse, AuditError>>>,
    statuses: Mutex<VecDeque<Result<TransportResponse, AuditError>>>,
    submitted: Mutex<Vec<String>>,
    status_calls: AtomicU32,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_submit(self, response: Result<TransportResponse, AuditError>) -> Self {
        if let Ok(mut queue) = self.submits.lock() {
            queue.push_back(response);
        }
        self
    }

    pub fn on_status(self, response: Result<TransportResponse, AuditError>) -> Self {
        if let Ok(mut queue) = self.statuses.lock() {
            queue.push_back(response);
        }
        self
    }

    pub fn submitted(&self) -> Vec<String> {
        self.submitted
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DecompilerTransport for ScriptedTransport {
    async fn submit(&self, bytecode_hex: &str) -> Result<TransportResponse, AuditError> {
        if let Ok(mut submitted) = self.submitted.lock() {
            submitted.push(bytecode_hex.to_string());
        }
        self.submits
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front())
            .unwrap_or_else(|| Err(AuditError::transport("scripted", "no scripted submit")))
    }

    async fn job_status(&self, _job_id: &str) -> Result<TransportResponse, AuditError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.statuses
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front())
            .unwrap_or_else(|| {
                Ok(TransportResponse::json(
                    200,
                    serde_json::json!({ "status": "pending" }),
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::MemoryLog;
    use aegis_core::wait::cancel_pair;
    use serde_json::json;

    const BYTECODE: &str = "0x608060405234801561001057600080fd5b50610150806100206000396000f3fe";

    fn client(transport: Arc<ScriptedTransport>) -> DecompilerClient {
        DecompilerClient::new(transport, DecompilerSettings::default())
    }

    #[tokio::test]
    async fn trivial_bytecode_is_rejected_without_a_request() {
        let transport = Arc::new(ScriptedTransport::new());
        let client = client(transport.clone());

        for input in ["", "0x", "0x60", "  "] {
            let err = client
                .submit(input, &CancelSignal::never())
                .await
                .expect_err("trivial input");
            assert!(matches!(err, AuditError::Input { .. }), "{input:?}: {err:?}");
        }
        let err = client
            .submit("0xzz11", &CancelSignal::never())
            .await
            .expect_err("non-hex input");
        assert!(matches!(err, AuditError::Input { .. }));
        assert!(transport.submitted().is_empty());
    }

    #[tokio::test]
    async fn synchronous_success_strips_prefix() {
        let transport = Arc::new(ScriptedTransport::new().on_submit(Ok(TransportResponse::json(
            200,
            json!({ "source": "function transfer(...){...}" }),
        ))));
        let source = client(transport.clone())
            .submit(BYTECODE, &CancelSignal::never())
            .await
            .expect("decompiled");

        assert_eq!(source, "function transfer(...){...}");
        assert_eq!(transport.submitted(), vec![BYTECODE[2..].to_string()]);
        assert_eq!(transport.status_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn accepted_job_is_polled_until_ready() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .on_submit(Ok(TransportResponse::json(202, json!({ "md5": "abc123" }))))
                .on_status(Ok(TransportResponse::json(200, json!({ "status": "pending" }))))
                .on_status(Err(AuditError::transport("scripted", "reset by peer")))
                .on_status(Ok(TransportResponse::json(
                    200,
                    json!({ "decompiled": "contract Decompiled {}" }),
                ))),
        );
        let log = Arc::new(MemoryLog::default());
        let client = client(transport.clone()).with_log(log.clone());

        let source = client
            .submit(BYTECODE, &CancelSignal::never())
            .await
            .expect("decompiled after polling");

        assert_eq!(source, "contract Decompiled {}");
        assert_eq!(transport.status_calls(), 3);
        assert!(log.lines().iter().all(|l| l.starts_with(DECOMPILER_TAG)));
        assert!(log.contains("ready after 3 polls"));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_budget_exhaustion_is_a_timeout() {
        let transport = Arc::new(ScriptedTransport::new().on_submit(Ok(TransportResponse::json(
            200,
            json!({ "status": "pending", "jobId": "job-1" }),
        ))));
        let err = client(transport.clone())
            .submit(BYTECODE, &CancelSignal::never())
            .await
            .expect_err("never ready");

        assert_eq!(
            err,
            AuditError::Timeout {
                operation: "decompilation".to_string(),
                attempts: 10
            }
        );
        assert_eq!(transport.status_calls(), 10);
    }

    #[tokio::test]
    async fn error_status_is_wrapped_with_original_code() {
        let transport = Arc::new(ScriptedTransport::new().on_submit(Ok(TransportResponse {
            status: 503,
            reason: "Service Unavailable".to_string(),
            body: Value::Null,
        })));
        let err = client(transport)
            .submit(BYTECODE, &CancelSignal::never())
            .await
            .expect_err("upstream failure");
        assert_eq!(err.status_code(), 503);
        assert!(matches!(err, AuditError::Upstream { .. }));
    }

    #[tokio::test]
    async fn network_failure_reports_status_zero() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .on_submit(Err(AuditError::transport("https://api.dedaub.com", "dns"))),
        );
        let err = client(transport)
            .submit(BYTECODE, &CancelSignal::never())
            .await
            .expect_err("transport failure");
        assert_eq!(err.status_code(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_aborts_an_in_flight_poll() {
        let transport = Arc::new(ScriptedTransport::new());
        let client = Arc::new(client(transport.clone()));
        let (handle, signal) = cancel_pair();

        let poll = tokio::spawn({
            let client = client.clone();
            async move { client.poll("job-1", &signal).await }
        });
        tokio::time::sleep(Duration::from_millis(4_000)).await;
        handle.cancel();

        let err = poll.await.expect("join").expect_err("cancelled");
        assert!(matches!(err, AuditError::Cancelled { .. }));
        assert_eq!(transport.status_calls(), 1);
    }

    #[tokio::test]
    async fn long_output_is_truncated_to_limit() {
        let long = "a".repeat(20_000);
        let transport = Arc::new(
            ScriptedTransport::new()
                .on_submit(Ok(TransportResponse::json(200, json!({ "source": long })))),
        );
        let log = Arc::new(MemoryLog::default());
        let source = client(transport)
            .with_log(log.clone())
            .submit(BYTECODE, &CancelSignal::never())
            .await
            .expect("decompiled");
        assert_eq!(source.len(), 15_000);
        assert!(log.contains("truncated from 20000 to 15000"));
    }

    #[test]
    fn truncation_length_is_min_of_input_and_limit() {
        for len in [0usize, 1, 14_999, 15_000, 15_001, 40_000] {
            let text = "é".repeat(len);
            let out = truncate_output(text, 15_000);
            assert_eq!(out.chars().count(), len.min(15_000));
        }
    }
}
