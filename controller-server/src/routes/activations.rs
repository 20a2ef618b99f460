use super::*;
use axum::extract::{Path, Query};
use serde::Deserialize;
use whisk_controller::activation::{Activation, ActivationFilter};

const MAX_LIST_LIMIT: usize = 200;

pub(super) fn format_activation(record: &Activation, docs: bool) -> serde_json::Value {
    let mut value = serde_json::json!({
        "activationId": record.activation_id,
        "namespace": record.namespace,
        "name": record.name,
        "version": record.version,
        "subject": record.subject,
        "start": record.start,
        "end": record.end,
        "duration": record.duration,
        "statusCode": record.status_code,
        "publish": record.publish,
        "annotations": map_to_kv(&record.annotations),
    });
    if docs {
        value["response"] = serde_json::json!(record.response);
        value["logs"] = serde_json::json!(record.logs);
    }
    if let Some(cause) = &record.cause {
        value["cause"] = serde_json::json!(cause);
    }
    value
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub(super) struct ListQuery {
    limit: Option<usize>,
    skip: Option<usize>,
    name: Option<String>,
    since: Option<u64>,
    upto: Option<u64>,
    docs: Option<bool>,
}

pub(super) async fn list(
    State(state): State<AppState>,
    identity: auth::Identity,
    Path(ns): Path<String>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let limit = query.limit.unwrap_or(30);
    if !(1..=MAX_LIST_LIMIT).contains(&limit) {
        return Err(whisk_controller::Error::validation(
            format!("limit must be between 1 and {MAX_LIST_LIMIT}"),
            Some("limit"),
        )
        .into());
    }

    let filter = ActivationFilter {
        name: query.name,
        since: query.since,
        upto: query.upto,
        skip: query.skip.unwrap_or(0),
        limit,
    };

    let docs = query.docs.unwrap_or(false);
    let records = state
        .controller
        .store()
        .list_activations(identity.resolve(&ns)?, &filter)
        .await?;
    Ok(Json(serde_json::json!(
        records
            .iter()
            .map(|record| format_activation(record, docs))
            .collect::<Vec<_>>()
    )))
}

async fn load(
    state: &AppState,
    identity: &auth::Identity,
    ns: &str,
    id: &str,
) -> ApiResult<Activation> {
    let id = id
        .parse()
        .map_err(|_| whisk_controller::Error::not_found(format!("activation {id}")))?;
    Ok(state
        .controller
        .store()
        .activation(identity.resolve(ns)?, &id)
        .await?)
}

pub(super) async fn details(
    State(state): State<AppState>,
    identity: auth::Identity,
    Path((ns, id)): Path<(String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    let record = load(&state, &identity, &ns, &id).await?;
    Ok(Json(format_activation(&record, true)))
}

pub(super) async fn logs(
    State(state): State<AppState>,
    identity: auth::Identity,
    Path((ns, id)): Path<(String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    let record = load(&state, &identity, &ns, &id).await?;
    Ok(Json(serde_json::json!({ "logs": record.logs })))
}

pub(super) async fn result(
    State(state): State<AppState>,
    identity: auth::Identity,
    Path((ns, id)): Path<(String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    let record = load(&state, &identity, &ns, &id).await?;
    Ok(Json(serde_json::json!(record.response)))
}
