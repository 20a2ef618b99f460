mod actions;
mod activations;
mod namespaces;
mod packages;
mod rules;
mod triggers;
mod web;

use super::*;
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use whisk_controller::params;

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<Controller>,
}

/// Orchestrator errors carry their HTTP mapping; this wrapper renders the
/// user-visible failure envelope.
pub struct ApiError(pub whisk_controller::Error);

impl From<whisk_controller::Error> for ApiError {
    fn from(e: whisk_controller::Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }

        let mut body = serde_json::json!({ "error": self.0.to_string() });
        if let whisk_controller::Error::Validation {
            field: Some(field), ..
        } = &self.0
        {
            body["field"] = serde_json::json!(field);
        }
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// External parameter list form to the internal mapping form.
pub(crate) fn kv_to_map(list: Option<Vec<params::KeyValue>>) -> params::Map {
    list.map(|list| params::from_list(&list)).unwrap_or_default()
}

pub(crate) fn map_to_kv(map: &params::Map) -> serde_json::Value {
    serde_json::to_value(params::to_list(map)).unwrap_or_default()
}

async fn invokers(
    State(state): State<AppState>,
    _identity: auth::Identity,
) -> ApiResult<Json<serde_json::Value>> {
    let registry = state.controller.registry();
    let invokers = registry
        .invokers()
        .into_iter()
        .map(|(invoker_id, invoker)| {
            serde_json::json!({
                "invoker_id": invoker_id,
                "status": invoker.status.to_string(),
                "last_heartbeat": invoker.last_heartbeat.unix_timestamp(),
                "capacity": invoker.capacity,
            })
        })
        .collect::<Vec<_>>();

    Ok(Json(serde_json::json!({
        "invokers": invokers,
        "cluster": registry.cluster_capacity(),
    })))
}

pub fn router(controller: Arc<Controller>) -> Router {
    Router::new()
        .route("/api/v1/namespaces", get(namespaces::list))
        .route("/api/v1/namespaces/{ns}", get(namespaces::details))
        .route("/api/v1/namespaces/{ns}/limits", get(namespaces::limits))
        .route("/api/v1/namespaces/{ns}/packages", get(packages::list))
        .route(
            "/api/v1/namespaces/{ns}/packages/{name}",
            get(packages::details)
                .put(packages::put)
                .delete(packages::remove),
        )
        .route("/api/v1/namespaces/{ns}/actions", get(actions::list))
        .route(
            "/api/v1/namespaces/{ns}/actions/{*action}",
            get(actions::details)
                .put(actions::put)
                .delete(actions::remove)
                .post(actions::invoke),
        )
        .route("/api/v1/namespaces/{ns}/triggers", get(triggers::list))
        .route(
            "/api/v1/namespaces/{ns}/triggers/{name}",
            get(triggers::details)
                .put(triggers::put)
                .delete(triggers::remove)
                .post(triggers::fire),
        )
        .route("/api/v1/namespaces/{ns}/rules", get(rules::list))
        .route(
            "/api/v1/namespaces/{ns}/rules/{name}",
            get(rules::details)
                .put(rules::put)
                .delete(rules::remove)
                .post(rules::set_status),
        )
        .route("/api/v1/namespaces/{ns}/activations", get(activations::list))
        .route(
            "/api/v1/namespaces/{ns}/activations/{id}",
            get(activations::details),
        )
        .route(
            "/api/v1/namespaces/{ns}/activations/{id}/logs",
            get(activations::logs),
        )
        .route(
            "/api/v1/namespaces/{ns}/activations/{id}/result",
            get(activations::result),
        )
        .route("/api/v1/invokers", get(invokers))
        .route("/api/v1/web/{*path}", any(web::handle))
        .with_state(AppState { controller })
}
