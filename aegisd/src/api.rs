use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use aegis_core::audit::{AuditRequest, RiskVerdict};
use aegis_core::calldata::parse_trade_id;
use aegis_core::error::AuditError;
use aegis_core::risk::{RiskDecoding, decode_score};
use aegis_core::stream::{AuditEvent, STREAM_PROTOCOL_VERSION};
use aegis_core::wait::CancelSignal;
use aegis_oracle::{AuditPipeline, AuditStreamer};
use alloy_primitives::Address;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio_stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info};

/// Shared state for every API handler.
#[derive(Clone)]
pub struct AppState {
    pub start_time: Instant,
    pub pipeline: Arc<AuditPipeline>,
    /// Fires on daemon shutdown; every audit run observes it.
    pub shutdown: CancelSignal,
}

pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/audit", get(stream_audit).post(run_audit))
        .route("/api/risk/{score}", get(decode_risk))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    stream_protocol: u32,
    uptime_secs: u64,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        stream_protocol: STREAM_PROTOCOL_VERSION,
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

// ---------------------------------------------------------------------------
// Audits
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct AuditParams {
    pub token: String,
    pub trade_id: String,
    #[serde(default)]
    pub start_block: u64,
}

impl AuditParams {
    pub fn into_request(self) -> Result<AuditRequest, AuditError> {
        let target_token: Address = self
            .token
            .trim()
            .parse()
            .map_err(|err| AuditError::input(format!("token '{}': {err}", self.token)))?;
        if target_token == Address::ZERO {
            return Err(AuditError::input("target token is the zero address"));
        }
        let trade_id = parse_trade_id(&self.trade_id)
            .map_err(|err| AuditError::input(err.to_string()))?;
        Ok(AuditRequest {
            trade_id,
            target_token,
            start_block: self.start_block,
        })
    }
}

/// Run one audit and stream its progress events until the terminal record.
async fn stream_audit(
    State(state): State<AppState>,
    Query(params): Query<AuditParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let request = params.into_request()?;
    let (streamer, rx) = AuditStreamer::channel();

    info!(trade_id = %request.trade_id, token = %request.target_token, "streaming audit requested");
    let pipeline = state.pipeline.clone();
    let cancel = state.shutdown.clone();
    tokio::spawn(async move {
        // Failures already reached the stream as a fatal record.
        if let Err(err) = pipeline.run(&request, &streamer, &cancel).await {
            debug!(error = %err, "streamed audit ended with an error");
        }
    });

    let stream = UnboundedReceiverStream::new(rx).map(|event| Ok(sse_event(&event)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn sse_event(event: &AuditEvent) -> Event {
    match serde_json::to_string(event) {
        Ok(json) => Event::default().data(json),
        Err(err) => Event::default().event("error").data(err.to_string()),
    }
}

async fn run_audit(
    State(state): State<AppState>,
    Json(params): Json<AuditParams>,
) -> Result<Json<RiskVerdict>, ApiError> {
    let request = params.into_request()?;
    let verdict = state
        .pipeline
        .run(&request, &AuditStreamer::detached(), &state.shutdown)
        .await?;
    Ok(Json(verdict))
}

// ---------------------------------------------------------------------------
// Risk decoder
// ---------------------------------------------------------------------------

async fn decode_risk(Path(score): Path<i64>) -> Json<RiskDecoding> {
    Json(decode_score(score))
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

pub struct ApiError(AuditError);

impl From<AuditError> for ApiError {
    fn from(value: AuditError) -> Self {
        Self(value)
    }
}

pub fn http_status(err: &AuditError) -> StatusCode {
    match err {
        AuditError::Input { .. } => StatusCode::BAD_REQUEST,
        AuditError::DuplicateCommit { .. } => StatusCode::CONFLICT,
        AuditError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        AuditError::Transport { .. } | AuditError::Upstream { .. } => StatusCode::BAD_GATEWAY,
        AuditError::Cancelled { .. } => StatusCode::SERVICE_UNAVAILABLE,
        AuditError::Pipeline { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.0.to_string(),
            "status": self.0.status_code(),
        });
        (http_status(&self.0), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegis_core::risk::VerdictStatus;
    use alloy_primitives::{U256, address};

    fn params(token: &str, trade_id: &str) -> AuditParams {
        AuditParams {
            token: token.to_string(),
            trade_id: trade_id.to_string(),
            start_block: 0,
        }
    }

    #[test]
    fn audit_params_become_a_request() {
        let request = params("0x4200000000000000000000000000000000000006", "42")
            .into_request()
            .expect("request");
        assert_eq!(request.trade_id, U256::from(42u64));
        assert_eq!(
            request.target_token,
            address!("4200000000000000000000000000000000000006")
        );
    }

    #[test]
    fn bad_audit_params_are_input_errors() {
        for (token, trade_id) in [
            ("0xnope", "1"),
            ("0x0000000000000000000000000000000000000000", "1"),
            ("0x4200000000000000000000000000000000000006", "-1"),
        ] {
            let err = params(token, trade_id).into_request().expect_err("rejected");
            assert_eq!(http_status(&err), StatusCode::BAD_REQUEST, "{token} {trade_id}");
        }
    }

    #[test]
    fn transport_failures_map_to_bad_gateway() {
        let err = AuditError::transport("http://127.0.0.1:8545", "connection refused");
        assert_eq!(err.status_code(), 0);
        assert_eq!(http_status(&err), StatusCode::BAD_GATEWAY);
        assert_eq!(
            http_status(&AuditError::DuplicateCommit {
                trade_id: U256::from(1u64)
            }),
            StatusCode::CONFLICT
        );
    }

    #[tokio::test]
    async fn risk_decoder_reports_status_and_checks() {
        let Json(blocked) = decode_risk(Path(36)).await;
        assert_eq!(blocked.status, VerdictStatus::Blocked);
        assert_eq!(blocked.checks.iter().filter(|c| c.triggered).count(), 2);

        let Json(clean) = decode_risk(Path(0)).await;
        assert_eq!(clean.status, VerdictStatus::Approved);

        let Json(error) = decode_risk(Path(-1)).await;
        assert_eq!(error.status, VerdictStatus::Error);
        assert!(error.checks.is_empty());
    }
}
