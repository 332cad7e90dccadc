//! Admin HTTP surface for the search index engine.
//!
//! A thin axum server exposing health/metrics and the commit/ingest/sync
//! operations per database. The actual engine logic lives in the library
//! crate; this binary only wires configuration, the client, and routing.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::{Arg, Command};
use serde::{Deserialize, Serialize};
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use stratum_index::core::app_state::AppState;
use stratum_index::core::config::EngineConfig;
use stratum_index::db::client::Client;
use stratum_index::model::record::Record;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    stratum_index::init()?;

    let matches = Command::new("stratum-index")
        .version(stratum_index::VERSION)
        .about("Bitemporal, versioned search index engine - admin surface")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path"),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").map(|s| s.as_str());
    let config = EngineConfig::load(config_path)?;

    info!("connecting to record store and search store");
    let client = Client::connect(config.clone()).await?;
    let state = AppState::new(client, config.clone());

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/databases/:name/commit", post(commit))
        .route("/databases/:name/ingest", post(ingest))
        .route("/databases/:name/sync", post(sync))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.metrics.bind_addr).await?;
    info!(addr = %config.metrics.bind_addr, "listening");

    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .await
            .expect("admin HTTP server failed")
    });

    tokio::select! {
        _ = signal::ctrl_c() => {
            warn!("received shutdown signal");
        }
        _ = server => {
            warn!("admin server terminated unexpectedly");
        }
    }

    info!("shutdown complete");
    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok", "version": stratum_index::VERSION }))
}

async fn metrics() -> impl IntoResponse {
    let body = stratum_index::system::metrics::EngineMetrics::global().gather();
    ([("content-type", "text/plain; version=0.0.4")], body)
}

/// A single record as it arrives over the wire, before it becomes a [`Record`].
#[derive(Debug, Deserialize)]
struct RecordPayload {
    id: String,
    #[serde(default)]
    data: serde_json::Value,
}

impl From<RecordPayload> for Record {
    fn from(payload: RecordPayload) -> Self {
        Record {
            id: payload.id,
            data: payload.data,
        }
    }
}

#[derive(Debug, Deserialize)]
struct IngestRequest {
    records: Vec<RecordPayload>,
    #[serde(default = "default_true")]
    commit: bool,
    #[serde(default)]
    modified_field: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct SyncRequest {
    #[serde(default)]
    resync: bool,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn to_http_error(err: stratum_index::Error) -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody { error: err.to_string() }),
    )
}

async fn commit(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorBody>)> {
    let database = state.client.database(name);
    let version = database.commit().await.map_err(to_http_error)?;
    Ok(Json(serde_json::json!({ "version": version })))
}

async fn ingest(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<IngestRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorBody>)> {
    let database = state.client.database(name);
    let records: Vec<Record> = body.records.into_iter().map(Record::from).collect();
    let result = database
        .ingest(&records, body.commit, body.modified_field.as_deref())
        .await
        .map_err(to_http_error)?;
    Ok(Json(serde_json::json!({
        "inserted": result.inserted,
        "updated": result.updated,
        "noop": result.noop,
        "version": result.version,
    })))
}

async fn sync(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<SyncRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorBody>)> {
    let database = state.client.database(name);
    let result = database.sync(body.resync).await.map_err(to_http_error)?;
    Ok(Json(serde_json::json!({
        "indexed": result.indexed,
        "deleted": result.deleted,
        "total": result.total,
    })))
}
