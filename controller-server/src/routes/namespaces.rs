use super::*;
use axum::extract::Path;

pub(super) async fn list(
    State(state): State<AppState>,
    identity: auth::Identity,
) -> ApiResult<Json<serde_json::Value>> {
    let mut names = state
        .controller
        .store()
        .list_namespaces(&identity.subject)
        .await?
        .into_iter()
        .map(|ns| ns.name)
        .collect::<Vec<_>>();

    // "_" always names the caller's default namespace
    names.push("_".to_string());
    Ok(Json(serde_json::json!(names)))
}

pub(super) async fn details(
    State(state): State<AppState>,
    identity: auth::Identity,
    Path(ns): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let namespace = state
        .controller
        .store()
        .namespace(identity.resolve(&ns)?)
        .await?;

    Ok(Json(serde_json::json!({
        "name": namespace.name,
        "uuid": namespace.uuid,
        "owner": namespace.owner,
        "description": namespace.description.unwrap_or_default(),
        "limits": namespace.limits,
    })))
}

pub(super) async fn limits(
    State(state): State<AppState>,
    identity: auth::Identity,
    Path(ns): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let namespace = state
        .controller
        .store()
        .namespace(identity.resolve(&ns)?)
        .await?;
    Ok(Json(serde_json::Value::Object(namespace.limits)))
}
