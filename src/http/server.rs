//! Admin HTTP server.
//!
//! # Responsibilities
//! - Create the Axum router for the config routes
//! - Wire up middleware (tracing, timeout, request ID)
//! - Serve until the shutdown signal fires
//!
//! # Routes
//! - `GET /health`
//! - `GET /config`
//! - `GET /config/{category}/{key}`
//! - `PUT /config/{category}/{key}` with `{"value": ...}`

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::error::ConfigReply;
use crate::config::service::{ConfigService, EntryView};
use crate::http::request::{propagate_request_id_layer, set_request_id_layer, SetValueRequest};
use crate::settings::AdminSettings;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ConfigService>,
}

#[derive(Debug, Serialize)]
pub struct HealthBody {
    pub status: &'static str,
    pub revision: u64,
}

#[derive(Debug, Serialize)]
pub struct DumpBody {
    pub revision: u64,
    pub entries: Vec<EntryView>,
}

pub struct AdminServer {
    router: Router,
}

impl AdminServer {
    pub fn new(service: Arc<ConfigService>, settings: &AdminSettings) -> Self {
        let state = AppState { service };
        Self {
            router: build_router(state, Duration::from_secs(settings.request_timeout_secs)),
        }
    }

    /// The router, for in-process use (tests, embedding).
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve on `listener` until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "Admin server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("Admin server stopped");
        Ok(())
    }
}

#[allow(deprecated)]
fn build_router(state: AppState, timeout: Duration) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/config", get(dump))
        .route("/config/{category}/{key}", get(get_value).put(set_value))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(set_request_id_layer())
                .layer(TraceLayer::new_for_http())
                .layer(propagate_request_id_layer())
                .layer(TimeoutLayer::new(timeout)),
        )
}

async fn health(State(state): State<AppState>) -> Json<HealthBody> {
    Json(HealthBody {
        status: "ok",
        revision: state.service.revision(),
    })
}

async fn dump(State(state): State<AppState>) -> Json<DumpBody> {
    Json(DumpBody {
        revision: state.service.revision(),
        entries: state.service.dump(),
    })
}

async fn get_value(State(state): State<AppState>, Path((category, key)): Path<(String, String)>) -> ConfigReply {
    ConfigReply::from_get(state.service.get(&category, &key))
}

async fn set_value(
    State(state): State<AppState>,
    Path((category, key)): Path<(String, String)>,
    Json(body): Json<SetValueRequest>,
) -> Response {
    // `set` takes the writer lock and may read procfs.
    let service = Arc::clone(&state.service);
    let result = tokio::task::spawn_blocking(move || service.set(&category, &key, body.value)).await;

    match result {
        Ok(result) => ConfigReply::from_set(result).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Set task failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
