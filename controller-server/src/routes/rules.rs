use super::*;
use axum::extract::{Path, Query};
use serde::Deserialize;
use whisk_controller::entity::{Rule, RuleStatus};

fn format_rule(rule: &Rule) -> serde_json::Value {
    serde_json::json!({
        "name": rule.name,
        "namespace": rule.namespace,
        "version": rule.version,
        "status": rule.status,
        "trigger": rule.trigger,
        "action": rule.action,
    })
}

/// Accept both `name` and `/namespace/name` entity references, as long as
/// the namespace matches.
fn local_ref(namespace: &str, reference: &str) -> String {
    reference
        .strip_prefix(&format!("/{namespace}/"))
        .unwrap_or(reference)
        .to_string()
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
    let rules = state
        .controller
        .store()
        .list_rules(
            identity.resolve(&ns)?,
            query.skip.unwrap_or(0),
            query.limit.unwrap_or(30),
        )
        .await?;
    Ok(Json(serde_json::json!(
        rules.iter().map(format_rule).collect::<Vec<_>>()
    )))
}

pub(super) async fn details(
    State(state): State<AppState>,
    identity: auth::Identity,
    Path((ns, name)): Path<(String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    let rule = state
        .controller
        .store()
        .rule(identity.resolve(&ns)?, &name)
        .await?;
    Ok(Json(format_rule(&rule)))
}

#[derive(Deserialize)]
pub(super) struct PutQuery {
    #[serde(default)]
    overwrite: Option<bool>,
}

#[derive(Deserialize)]
pub(super) struct RulePut {
    trigger: String,
    action: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    status: Option<RuleStatus>,
}

pub(super) async fn put(
    State(state): State<AppState>,
    identity: auth::Identity,
    Path((ns, name)): Path<(String, String)>,
    Query(query): Query<PutQuery>,
    Json(body): Json<RulePut>,
) -> ApiResult<Json<serde_json::Value>> {
    let namespace = identity.resolve(&ns)?.to_string();
    let rule = Rule {
        trigger: local_ref(&namespace, &body.trigger),
        action: local_ref(&namespace, &body.action),
        namespace,
        name,
        version: body.version.unwrap_or_default(),
        status: body.status.unwrap_or(RuleStatus::Active),
    };

    let rule = state
        .controller
        .store()
        .put_rule(rule, query.overwrite.unwrap_or(false))
        .await?;
    Ok(Json(format_rule(&rule)))
}

pub(super) async fn remove(
    State(state): State<AppState>,
    identity: auth::Identity,
    Path((ns, name)): Path<(String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .controller
        .store()
        .delete_rule(identity.resolve(&ns)?, &name)
        .await?;
    Ok(Json(serde_json::json!({ "name": name, "deleted": true })))
}

#[derive(Deserialize)]
pub(super) struct StatusPut {
    status: RuleStatus,
}

pub(super) async fn set_status(
    State(state): State<AppState>,
    identity: auth::Identity,
    Path((ns, name)): Path<(String, String)>,
    Json(body): Json<StatusPut>,
) -> ApiResult<Json<serde_json::Value>> {
    let rule = state
        .controller
        .store()
        .set_rule_status(identity.resolve(&ns)?, &name, body.status)
        .await?;
    Ok(Json(format_rule(&rule)))
}
