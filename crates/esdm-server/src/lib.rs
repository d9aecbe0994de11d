//! HTTP front end for an ESDM service.
//!
//! Serves DRNG output in the ANU QRNG API envelope, exposes the seeding
//! status, and optionally accepts entropy for the auxiliary pool.

use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use esdm_core::{Esdm, EsdmError, EsdmStatus};

/// Largest request served by `/api/v1/random`.
const MAX_LENGTH: usize = 65536;

/// Shared server state.
struct AppState {
    esdm: Esdm,
    allow_insert: bool,
}

#[derive(Deserialize)]
struct RandomParams {
    length: Option<usize>,
    #[serde(rename = "type")]
    data_type: Option<String>,
    /// `full` (default) waits for full seeding, `min` only for minimal seeding.
    mode: Option<String>,
}

#[derive(Serialize)]
struct RandomResponse {
    #[serde(rename = "type")]
    data_type: String,
    length: usize,
    data: serde_json::Value,
    success: bool,
    mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    operational: bool,
    min_seeded: bool,
    available_entropy_bits: u32,
}

#[derive(Deserialize)]
struct InsertRequest {
    /// Hex-encoded bytes.
    data: String,
    #[serde(default)]
    entropy_bits: u32,
}

#[derive(Serialize)]
struct InsertResponse {
    success: bool,
    accepted_bytes: usize,
    aux_entropy_bits: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn status_for(err: &EsdmError) -> StatusCode {
    match err {
        EsdmError::Unavailable | EsdmError::WouldBlock => StatusCode::SERVICE_UNAVAILABLE,
        EsdmError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        EsdmError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
        EsdmError::Fault(_) | EsdmError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn format_data(raw: &[u8], data_type: &str) -> serde_json::Value {
    match data_type {
        "hex16" => serde_json::Value::Array(
            raw.chunks(2)
                .filter(|c| c.len() == 2)
                .map(|c| serde_json::Value::String(format!("{:02x}{:02x}", c[0], c[1])))
                .collect(),
        ),
        "uint8" => {
            serde_json::Value::Array(raw.iter().map(|&b| serde_json::Value::from(b)).collect())
        }
        "uint16" => serde_json::Value::Array(
            raw.chunks(2)
                .filter(|c| c.len() == 2)
                .map(|c| serde_json::Value::from(u16::from_le_bytes([c[0], c[1]])))
                .collect(),
        ),
        _ => serde_json::Value::String(hex::encode(raw)),
    }
}

async fn handle_random(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RandomParams>,
) -> (StatusCode, Json<RandomResponse>) {
    let length = params.length.unwrap_or(1024).clamp(1, MAX_LENGTH);
    let data_type = params.data_type.unwrap_or_else(|| "hex16".to_string());
    let min_only = params.mode.as_deref() == Some("min");
    let mode = if min_only { "min" } else { "full" }.to_string();

    let esdm = state.esdm.clone();
    let joined = tokio::task::spawn_blocking(move || {
        let mut buf = vec![0u8; length];
        let n = if min_only {
            esdm.get_random_bytes_min(&mut buf)
        } else {
            esdm.get_random_bytes_full(&mut buf)
        }?;
        buf.truncate(n);
        Ok::<_, EsdmError>(buf)
    })
    .await;

    let failure = |status: StatusCode, msg: String| {
        (
            status,
            Json(RandomResponse {
                data_type: data_type.clone(),
                length: 0,
                data: serde_json::Value::Array(vec![]),
                success: false,
                mode: mode.clone(),
                error: Some(msg),
            }),
        )
    };

    let raw = match joined {
        Ok(Ok(raw)) => raw,
        Ok(Err(e)) => return failure(status_for(&e), e.to_string()),
        Err(e) => {
            warn!("random request worker failed: {e}");
            return failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    let data = format_data(&raw, &data_type);
    let len = match &data {
        serde_json::Value::Array(a) => a.len(),
        _ => raw.len(),
    };

    (
        StatusCode::OK,
        Json(RandomResponse {
            data_type,
            length: len,
            data,
            success: true,
            mode,
            error: None,
        }),
    )
}

async fn handle_status(State(state): State<Arc<AppState>>) -> Json<EsdmStatus> {
    Json(state.esdm.status())
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let status = state.esdm.status();
    let label = if status.operational {
        "operational"
    } else if status.min_seeded {
        "min_seeded"
    } else {
        "seeding"
    };
    Json(HealthResponse {
        status: label.to_string(),
        operational: status.operational,
        min_seeded: status.min_seeded,
        available_entropy_bits: status.available_entropy_bits,
    })
}

async fn handle_insert(
    State(state): State<Arc<AppState>>,
    Json(req): Json<InsertRequest>,
) -> (StatusCode, Json<InsertResponse>) {
    let refuse = |status: StatusCode, msg: String| {
        (
            status,
            Json(InsertResponse {
                success: false,
                accepted_bytes: 0,
                aux_entropy_bits: 0,
                error: Some(msg),
            }),
        )
    };

    if !state.allow_insert {
        return refuse(
            StatusCode::FORBIDDEN,
            "entropy insertion requires --allow-insert".to_string(),
        );
    }
    let data = match hex::decode(&req.data) {
        Some(data) if !data.is_empty() => data,
        _ => return refuse(StatusCode::BAD_REQUEST, "data must be non-empty hex".to_string()),
    };

    let esdm = state.esdm.clone();
    let accepted_bytes = data.len();
    let entropy_bits = req.entropy_bits;
    let joined =
        tokio::task::spawn_blocking(move || esdm.pool_insert(&data, entropy_bits)).await;

    match joined {
        Ok(Ok(())) => (
            StatusCode::OK,
            Json(InsertResponse {
                success: true,
                accepted_bytes,
                aux_entropy_bits: state.esdm.aux_pool().entropy(),
                error: None,
            }),
        ),
        Ok(Err(e)) => refuse(status_for(&e), e.to_string()),
        Err(e) => refuse(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn handle_index(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let source_names = state.esdm.es_manager().registry().names();

    Json(serde_json::json!({
        "name": "ESDM Server",
        "version": esdm_core::VERSION,
        "sources": source_names,
        "endpoints": {
            "/": "This API index",
            "/api/v1/random": {
                "method": "GET",
                "description": "Random bytes from the DRNG",
                "params": {
                    "length": "Number of bytes (1-65536, default: 1024)",
                    "type": "Output format: hex16, uint8, uint16, hex (default: hex16)",
                    "mode": "full (wait for full seeding, default) or min",
                }
            },
            "/api/v1/entropy": {
                "method": "POST",
                "description": "Feed the auxiliary pool",
                "enabled": state.allow_insert,
                "body": { "data": "hex string", "entropy_bits": "credited entropy" },
            },
            "/status": "Seeding state, counters and per-source entropy",
            "/health": "Health check",
        },
        "examples": {
            "bytes": "/api/v1/random?length=32&type=uint8",
            "early_boot": "/api/v1/random?length=32&mode=min",
        }
    }))
}

/// Build the axum router.
fn build_router(esdm: Esdm, allow_insert: bool) -> Router {
    let state = Arc::new(AppState { esdm, allow_insert });

    Router::new()
        .route("/", get(handle_index))
        .route("/api/v1/random", get(handle_random))
        .route("/api/v1/entropy", post(handle_insert))
        .route("/status", get(handle_status))
        .route("/health", get(handle_health))
        .with_state(state)
}

/// Run the HTTP server until it fails.
pub async fn run_server(
    esdm: Esdm,
    host: &str,
    port: u16,
    allow_insert: bool,
) -> std::io::Result<()> {
    let app = build_router(esdm, allow_insert);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on {addr}");
    axum::serve(listener, app).await
}

mod hex {
    pub fn encode(data: &[u8]) -> String {
        data.iter().map(|b| format!("{b:02x}")).collect()
    }

    pub fn decode(s: &str) -> Option<Vec<u8>> {
        let s = s.trim();
        if s.len() % 2 != 0 {
            return None;
        }
        (0..s.len())
            .step_by(2)
            .map(|i| s.get(i..i + 2).and_then(|b| u8::from_str_radix(b, 16).ok()))
            .collect()
    }
}
