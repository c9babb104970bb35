//! HTTP API of the gas station.

use alloy::primitives::Address;
use axum::{
	extract::{rejection::JsonRejection, State},
	http::StatusCode,
	response::{IntoResponse, Json, Response},
	routing::{get, post},
	Router,
};
use relayer_core::{GasStation, GasStationError};
use relayer_types::{
	parse_token_amount, AmountError, FailureCause, FlowResult, OrderKind, TransferRequest, TxHash,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
	pub station: Arc<GasStation>,
	/// Decimals of the relayed token, for parsing human-readable amounts.
	pub token_decimals: u8,
}

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health_check))
		.route("/api/gas-station/status", get(get_status))
		.route("/api/gas-station/transfer", post(transfer))
		.route(
			"/api/gas-station/transfer-after-approval",
			post(transfer_after_approval),
		)
		.route("/api/gas-station/preflight", post(preflight))
		.with_state(state)
		.layer(TraceLayer::new_for_http())
		.layer(CorsLayer::permissive())
}

pub async fn start_http_server(state: AppState, port: u16) -> anyhow::Result<()> {
	let app = router(state);
	let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

	info!("API server listening on port {}", port);

	axum::serve(listener, app).await?;

	Ok(())
}

/// Token amounts arrive either as decimal strings or as JSON numbers.
///
/// JSON numbers with a fraction or beyond `u64` have already been through a
/// float by the time they reach us, so only exact integers are accepted.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AmountInput {
	Text(String),
	Number(serde_json::Number),
}

impl AmountInput {
	fn as_text(&self) -> Result<String, AmountError> {
		match self {
			AmountInput::Text(text) => Ok(text.clone()),
			AmountInput::Number(number) => number
				.as_u64()
				.map(|whole| whole.to_string())
				.ok_or_else(|| AmountError::Invalid {
					value: number.to_string(),
					message: "fractional amounts must be sent as a decimal string".to_string(),
				}),
		}
	}
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferBody {
	user_address: Address,
	admin_address: Address,
	token_amount: AmountInput,
	#[serde(default)]
	fiat_amount: Decimal,
	order_type: OrderKind,
	chain_id: u64,
}

impl TransferBody {
	fn into_request(self, decimals: u8) -> Result<TransferRequest, AmountError> {
		let amount = parse_token_amount(&self.token_amount.as_text()?, decimals)?;
		Ok(TransferRequest::new(
			self.user_address,
			self.admin_address,
			amount,
			self.fiat_amount,
			self.order_type,
			self.chain_id,
		))
	}
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FlowResponse {
	success: bool,
	code: &'static str,
	message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	tx_hash: Option<TxHash>,
	result: FlowResult,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
	success: bool,
	code: &'static str,
	error: String,
}

fn error_response(status: StatusCode, code: &'static str, error: impl Into<String>) -> Response {
	(
		status,
		Json(ErrorResponse {
			success: false,
			code,
			error: error.into(),
		}),
	)
		.into_response()
}

fn http_status(result: &FlowResult) -> StatusCode {
	match result {
		FlowResult::TransferCompleted { .. } => StatusCode::OK,
		FlowResult::NeedsGasFunding { .. } | FlowResult::NeedsApproval { .. } => StatusCode::ACCEPTED,
		FlowResult::Failed { cause, .. } => match cause {
			FailureCause::InsufficientBalance | FailureCause::InsufficientAllowance => {
				StatusCode::BAD_REQUEST
			}
			FailureCause::RelayerUnderfunded | FailureCause::EndpointsExhausted => {
				StatusCode::SERVICE_UNAVAILABLE
			}
			_ => StatusCode::INTERNAL_SERVER_ERROR,
		},
	}
}

fn flow_response(result: FlowResult) -> Response {
	let status = http_status(&result);
	let body = FlowResponse {
		success: !matches!(result, FlowResult::Failed { .. }),
		code: result.code(),
		message: result.message(),
		tx_hash: result.tx_hash(),
		result,
	};
	(status, Json(body)).into_response()
}

fn parse_body(
	body: Result<Json<TransferBody>, JsonRejection>,
	decimals: u8,
) -> Result<TransferRequest, Response> {
	let Json(body) = body.map_err(|e| {
		warn!("Rejected malformed request body: {}", e);
		error_response(StatusCode::BAD_REQUEST, "INVALID_REQUEST", e.body_text())
	})?;
	body.into_request(decimals)
		.map_err(|e| error_response(StatusCode::BAD_REQUEST, "INVALID_AMOUNT", e.to_string()))
}

fn station_error(error: GasStationError) -> Response {
	match error {
		GasStationError::InvalidRequest(message) => {
			error_response(StatusCode::BAD_REQUEST, "INVALID_REQUEST", message)
		}
		GasStationError::Config(message) => {
			error_response(StatusCode::INTERNAL_SERVER_ERROR, "CONFIGURATION_ERROR", message)
		}
	}
}

async fn health_check() -> Json<serde_json::Value> {
	Json(serde_json::json!({
		"status": "ok",
		"timestamp": chrono::Utc::now().timestamp()
	}))
}

async fn get_status(State(state): State<AppState>) -> Response {
	let status = state.station.status().await;
	let code = if status.is_ready {
		StatusCode::OK
	} else {
		StatusCode::SERVICE_UNAVAILABLE
	};
	(code, Json(status)).into_response()
}

async fn transfer(
	State(state): State<AppState>,
	body: Result<Json<TransferBody>, JsonRejection>,
) -> Response {
	let request = match parse_body(body, state.token_decimals) {
		Ok(request) => request,
		Err(response) => return response,
	};
	match state.station.process_gasless_transfer(&request).await {
		Ok(result) => flow_response(result),
		Err(e) => station_error(e),
	}
}

async fn transfer_after_approval(
	State(state): State<AppState>,
	body: Result<Json<TransferBody>, JsonRejection>,
) -> Response {
	let request = match parse_body(body, state.token_decimals) {
		Ok(request) => request,
		Err(response) => return response,
	};
	match state.station.execute_transfer_after_approval(&request).await {
		Ok(result) => flow_response(result),
		Err(e) => station_error(e),
	}
}

async fn preflight(
	State(state): State<AppState>,
	body: Result<Json<TransferBody>, JsonRejection>,
) -> Response {
	let request = match parse_body(body, state.token_decimals) {
		Ok(request) => request,
		Err(response) => return response,
	};
	match state.station.preflight(&request).await {
		Ok(report) => Json(report).into_response(),
		Err(e) => station_error(e),
	}
}
