use super::*;
use axum::extract::{Path, Query};
use base64::prelude::*;
use serde::Deserialize;
use whisk_controller::dispatcher::{InvokeOptions, InvokeOutcome};
use whisk_controller::entity::{Action, Exec, Limits};
use whisk_controller::{Bytes, Error};

fn format_action(action: &Action, code: Option<serde_json::Value>) -> serde_json::Value {
    let mut exec = match &action.exec {
        Exec::Code {
            kind,
            main,
            binary,
            image,
        } => {
            let mut exec = serde_json::json!({ "kind": kind, "binary": binary });
            if let Some(main) = main {
                exec["main"] = serde_json::json!(main);
            }
            if let Some(image) = image {
                exec["image"] = serde_json::json!(image);
            }
            exec
        }
        Exec::Sequence { components } => serde_json::json!({
            "kind": "sequence",
            "components": components.iter().map(ToString::to_string).collect::<Vec<_>>(),
        }),
    };
    if let Some(code) = code {
        exec["code"] = code;
    }

    serde_json::json!({
        "name": action.name,
        "namespace": action.namespace,
        "package": action.package,
        "fqn": action.fqn().to_string(),
        "version": action.version,
        "publish": action.publish,
        "exec": exec,
        "limits": action.limits,
        "parameters": map_to_kv(&action.parameters),
        "annotations": map_to_kv(&action.annotations),
    })
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
    let actions = state
        .controller
        .store()
        .list_actions(
            identity.resolve(&ns)?,
            query.skip.unwrap_or(0),
            query.limit.unwrap_or(30),
        )
        .await?;
    Ok(Json(serde_json::json!(
        actions
            .iter()
            .map(|action| format_action(action, None))
            .collect::<Vec<_>>()
    )))
}

#[derive(Deserialize)]
pub(super) struct GetQuery {
    #[serde(default)]
    code: Option<bool>,
}

pub(super) async fn details(
    State(state): State<AppState>,
    identity: auth::Identity,
    Path((ns, action_path)): Path<(String, String)>,
    Query(query): Query<GetQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let action = state
        .controller
        .store()
        .resolve_action(identity.resolve(&ns)?, &action_path)
        .await?;

    // Code only travels on explicit request
    let code = if query.code.unwrap_or(false) && action.code_hash.is_some() {
        let bytes = state.controller.store().action_code(&action).await?;
        let binary = matches!(&action.exec, Exec::Code { binary: true, .. });
        Some(if binary {
            serde_json::json!(BASE64_STANDARD.encode(&bytes))
        } else {
            serde_json::json!(String::from_utf8_lossy(&bytes))
        })
    } else {
        None
    };

    Ok(Json(format_action(&action, code)))
}

#[derive(Deserialize)]
pub(super) struct PutQuery {
    #[serde(default)]
    overwrite: Option<bool>,
}

#[derive(Deserialize)]
pub(super) struct ExecPut {
    kind: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    main: Option<String>,
    #[serde(default)]
    binary: Option<bool>,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    components: Option<Vec<String>>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub(super) struct ActionPut {
    version: Option<String>,
    publish: Option<bool>,
    exec: Option<ExecPut>,
    limits: Option<Limits>,
    parameters: Option<Vec<params::KeyValue>>,
    annotations: Option<Vec<params::KeyValue>>,
}

fn build_exec(exec: ExecPut) -> Result<(Exec, Option<Bytes>), Error> {
    if exec.kind == whisk_controller::entity::SEQUENCE_KIND {
        let components = exec
            .components
            .unwrap_or_default()
            .iter()
            .map(|c| c.parse())
            .collect::<Result<Vec<_>, _>>()?;
        return Ok((Exec::Sequence { components }, None));
    }

    let binary = exec.binary.unwrap_or(false);
    let code = match exec.code {
        Some(code) if binary => Some(Bytes::from(BASE64_STANDARD.decode(code).map_err(
            |e| Error::validation(format!("invalid base64 code: {e}"), Some("exec.code")),
        )?)),
        Some(code) => Some(Bytes::from(code.into_bytes())),
        None => None,
    };

    Ok((
        Exec::Code {
            kind: exec.kind,
            main: exec.main,
            binary,
            image: exec.image,
        },
        code,
    ))
}

pub(super) async fn put(
    State(state): State<AppState>,
    identity: auth::Identity,
    Path((ns, action_path)): Path<(String, String)>,
    Query(query): Query<PutQuery>,
    body: Option<Json<ActionPut>>,
) -> ApiResult<Json<serde_json::Value>> {
    let Json(body) = body.unwrap_or_default();
    let namespace = identity.resolve(&ns)?.to_string();
    let (package, name) = whisk_controller::fqn::Fqn::split_path(&action_path)?;

    let exec = body
        .exec
        .ok_or_else(|| Error::validation("exec descriptor is required", Some("exec")))?;
    let (exec, code) = build_exec(exec)?;

    let action = Action {
        namespace,
        package: package.map(ToString::to_string),
        name: name.to_string(),
        version: body.version.unwrap_or_default(),
        publish: body.publish.unwrap_or(false),
        exec,
        limits: body.limits.unwrap_or_default(),
        parameters: kv_to_map(body.parameters),
        annotations: kv_to_map(body.annotations),
        code_hash: None,
    };

    let action = state
        .controller
        .store()
        .put_action(action, code, query.overwrite.unwrap_or(false))
        .await?;
    Ok(Json(format_action(&action, None)))
}

pub(super) async fn remove(
    State(state): State<AppState>,
    identity: auth::Identity,
    Path((ns, action_path)): Path<(String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .controller
        .store()
        .delete_action(identity.resolve(&ns)?, &action_path)
        .await?;
    Ok(Json(serde_json::json!({ "name": action_path, "deleted": true })))
}

#[derive(Deserialize)]
pub(super) struct InvokeQuery {
    #[serde(default)]
    blocking: Option<bool>,
    #[serde(default)]
    result: Option<bool>,
    #[serde(default)]
    timeout: Option<u32>,
}

pub(super) async fn invoke(
    State(state): State<AppState>,
    identity: auth::Identity,
    Path((ns, action_path)): Path<(String, String)>,
    Query(query): Query<InvokeQuery>,
    body: Option<Json<serde_json::Value>>,
) -> ApiResult<Response> {
    let params = match body {
        Some(Json(serde_json::Value::Object(map))) => map,
        Some(Json(serde_json::Value::Null)) | None => params::Map::new(),
        Some(_) => {
            return Err(Error::validation(
                "action payload must be a JSON object",
                Some("payload"),
            )
            .into());
        }
    };

    let outcome = state
        .controller
        .dispatcher()
        .invoke_action(
            identity.resolve(&ns)?,
            &action_path,
            params,
            InvokeOptions {
                blocking: query.blocking.unwrap_or(false),
                // The façade shapes the body itself, it needs the record's
                // success flag for the status code
                result_only: false,
                timeout: query.timeout,
                cause: None,
            },
            &identity.subject,
        )
        .await?;

    Ok(match outcome {
        InvokeOutcome::Accepted { activation_id } => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "activationId": activation_id })),
        )
            .into_response(),
        InvokeOutcome::Completed(record) => {
            // Application failures surface as a bad gateway with the record
            let status = if record.response.success {
                StatusCode::OK
            } else {
                StatusCode::BAD_GATEWAY
            };
            let body = if query.result.unwrap_or(false) {
                record.response.result.clone()
            } else {
                activations::format_activation(&record, true)
            };
            (status, Json(body)).into_response()
        }
        InvokeOutcome::Result(result) => (StatusCode::OK, Json(result)).into_response(),
    })
}
