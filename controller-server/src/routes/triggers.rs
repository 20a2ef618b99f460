use super::*;
use axum::extract::{Path, Query};
use serde::Deserialize;
use whisk_controller::entity::Trigger;

fn format_trigger(trigger: &Trigger) -> serde_json::Value {
    let mut value = serde_json::json!({
        "name": trigger.name,
        "namespace": trigger.namespace,
        "version": trigger.version,
        "publish": trigger.publish,
        "parameters": map_to_kv(&trigger.parameters),
        "annotations": map_to_kv(&trigger.annotations),
    });
    if let Some(feed) = &trigger.feed {
        value["feed"] = serde_json::json!(feed);
    }
    value
}

#[derive(Deserialize)]
pub(super) struct ListQuery {
    #[serde(default)]
    skip: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

pub(super) async fn list(
    State(state): State<AppState>,
    identity: auth::Identity,
    Path(ns): Path<String>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let triggers = state
        .controller
        .store()
        .list_triggers(
            identity.resolve(&ns)?,
            query.skip.unwrap_or(0),
            query.limit.unwrap_or(30),
        )
        .await?;
    Ok(Json(serde_json::json!(
        triggers.iter().map(format_trigger).collect::<Vec<_>>()
    )))
}

pub(super) async fn details(
    State(state): State<AppState>,
    identity: auth::Identity,
    Path((ns, name)): Path<(String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    let trigger = state
        .controller
        .store()
        .trigger(identity.resolve(&ns)?, &name)
        .await?;
    Ok(Json(format_trigger(&trigger)))
}

#[derive(Deserialize)]
pub(super) struct PutQuery {
    #[serde(default)]
    overwrite: Option<bool>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub(super) struct TriggerPut {
    version: Option<String>,
    publish: Option<bool>,
    parameters: Option<Vec<params::KeyValue>>,
    annotations: Option<Vec<params::KeyValue>>,
    feed: Option<String>,
}

pub(super) async fn put(
    State(state): State<AppState>,
    identity: auth::Identity,
    Path((ns, name)): Path<(String, String)>,
    Query(query): Query<PutQuery>,
    body: Option<Json<TriggerPut>>,
) -> ApiResult<Json<serde_json::Value>> {
    let Json(body) = body.unwrap_or_default();
    let trigger = Trigger {
        namespace: identity.resolve(&ns)?.to_string(),
        name,
        version: body.version.unwrap_or_default(),
        publish: body.publish.unwrap_or(false),
        parameters: kv_to_map(body.parameters),
        annotations: kv_to_map(body.annotations),
        feed: body.feed,
    };

    let trigger = state
        .controller
        .store()
        .put_trigger(trigger, query.overwrite.unwrap_or(false))
        .await?;
    Ok(Json(format_trigger(&trigger)))
}

pub(super) async fn remove(
    State(state): State<AppState>,
    identity: auth::Identity,
    Path((ns, name)): Path<(String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .controller
        .store()
        .delete_trigger(identity.resolve(&ns)?, &name)
        .await?;
    Ok(Json(serde_json::json!({ "name": name, "deleted": true })))
}

/// Fire the trigger: merge the event payload over the trigger defaults and
/// fan out to every active rule, non-blocking.
pub(super) async fn fire(
    State(state): State<AppState>,
    identity: auth::Identity,
    Path((ns, name)): Path<(String, String)>,
    body: Option<Json<serde_json::Value>>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let params = match body {
        Some(Json(serde_json::Value::Object(map))) => map,
        Some(Json(serde_json::Value::Null)) | None => params::Map::new(),
        Some(_) => {
            return Err(whisk_controller::Error::validation(
                "trigger payload must be a JSON object",
                Some("payload"),
            )
            .into());
        }
    };

    let activation_ids = state
        .controller
        .dispatcher()
        .fire_trigger(identity.resolve(&ns)?, &name, params, &identity.subject)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "activationIds": activation_ids })),
    ))
}
