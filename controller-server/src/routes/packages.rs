use super::*;
use axum::extract::{Path, Query};
use serde::Deserialize;
use whisk_controller::entity::{Binding, Package};

fn format_package(package: &Package) -> serde_json::Value {
    let mut value = serde_json::json!({
        "name": package.name,
        "namespace": package.namespace,
        "version": package.version,
        "publish": package.publish,
        "parameters": map_to_kv(&package.parameters),
        "annotations": map_to_kv(&package.annotations),
    });
    if let Some(binding) = &package.binding {
        value["binding"] = serde_json::json!(binding);
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
    let packages = state
        .controller
        .store()
        .list_packages(
            identity.resolve(&ns)?,
            query.skip.unwrap_or(0),
            query.limit.unwrap_or(30),
        )
        .await?;
    Ok(Json(serde_json::json!(
        packages.iter().map(format_package).collect::<Vec<_>>()
    )))
}

pub(super) async fn details(
    State(state): State<AppState>,
    identity: auth::Identity,
    Path((ns, name)): Path<(String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    let package = state
        .controller
        .store()
        .package(identity.resolve(&ns)?, &name)
        .await?;
    Ok(Json(format_package(&package)))
}

#[derive(Deserialize)]
pub(super) struct PutQuery {
    #[serde(default)]
    overwrite: Option<bool>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub(super) struct PackagePut {
    version: Option<String>,
    publish: Option<bool>,
    parameters: Option<Vec<params::KeyValue>>,
    annotations: Option<Vec<params::KeyValue>>,
    binding: Option<Binding>,
}

pub(super) async fn put(
    State(state): State<AppState>,
    identity: auth::Identity,
    Path((ns, name)): Path<(String, String)>,
    Query(query): Query<PutQuery>,
    body: Option<Json<PackagePut>>,
) -> ApiResult<Json<serde_json::Value>> {
    let Json(body) = body.unwrap_or_default();
    let package = Package {
        namespace: identity.resolve(&ns)?.to_string(),
        name,
        version: body.version.unwrap_or_default(),
        publish: body.publish.unwrap_or(false),
        parameters: kv_to_map(body.parameters),
        annotations: kv_to_map(body.annotations),
        binding: body.binding,
    };

    let package = state
        .controller
        .store()
        .put_package(package, query.overwrite.unwrap_or(false))
        .await?;
    Ok(Json(format_package(&package)))
}

#[derive(Deserialize)]
pub(super) struct DeleteQuery {
    #[serde(default)]
    force: Option<bool>,
}

pub(super) async fn remove(
    State(state): State<AppState>,
    identity: auth::Identity,
    Path((ns, name)): Path<(String, String)>,
    Query(query): Query<DeleteQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .controller
        .store()
        .delete_package(identity.resolve(&ns)?, &name, query.force.unwrap_or(false))
        .await?;
    Ok(Json(serde_json::json!({ "name": name, "deleted": true })))
}
