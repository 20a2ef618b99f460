use super::*;
use axum::body::Bytes;
use axum::extract::Path;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Uri, header};
use base64::prelude::*;
use whisk_controller::Error;
use whisk_controller::dispatcher::{InvokeOptions, InvokeOutcome};

const EXTENSIONS: &[&str] = &["json", "html", "http", "text", "svg"];

struct WebPath {
    namespace: String,
    package: Option<String>,
    action: String,
    extension: String,
}

/// `{namespace}/{package|default}/{action}.{extension}`
fn parse_web_path(path: &str) -> Result<WebPath, Error> {
    let invalid = || Error::validation("invalid web action path", Some("path"));

    let segments = path
        .split('/')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();
    let [namespace, package, action_ext] = segments.as_slice() else {
        return Err(invalid());
    };
    let (action, extension) = action_ext.rsplit_once('.').ok_or_else(invalid)?;
    if action.is_empty() || !EXTENSIONS.contains(&extension) {
        return Err(invalid());
    }

    Ok(WebPath {
        namespace: (*namespace).to_string(),
        package: (*package != "default").then(|| (*package).to_string()),
        action: action.to_string(),
        extension: extension.to_string(),
    })
}

fn annotation_truthy(value: Option<&serde_json::Value>) -> bool {
    match value {
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::String(s)) => s == "true",
        _ => false,
    }
}

fn preflight() -> Response {
    let mut response = StatusCode::NO_CONTENT.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT, DELETE, PATCH, OPTIONS, HEAD"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization"),
    );
    headers.insert(
        header::ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static("86400"),
    );
    response
}

/// Request context handed to the action as `__ow_*` parameters.
fn ow_params(
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: &Bytes,
) -> params::Map {
    let mut params = params::Map::new();
    params.insert(
        "__ow_method".into(),
        serde_json::json!(method.as_str().to_lowercase()),
    );
    params.insert(
        "__ow_headers".into(),
        serde_json::Value::Object(
            headers
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_string(), serde_json::json!(v)))
                })
                .collect(),
        ),
    );
    params.insert("__ow_path".into(), serde_json::json!(uri.path()));

    let query: params::Map = uri
        .query()
        .map(|q| {
            q.split('&')
                .filter(|pair| !pair.is_empty())
                .map(|pair| {
                    let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                    (key.to_string(), serde_json::json!(value))
                })
                .collect()
        })
        .unwrap_or_default();
    params.insert("__ow_query".into(), serde_json::Value::Object(query));

    if !body.is_empty() {
        let is_json = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("application/json"));
        let value = if is_json {
            serde_json::from_slice(body)
                .unwrap_or_else(|_| serde_json::json!(BASE64_STANDARD.encode(body)))
        } else {
            serde_json::json!(BASE64_STANDARD.encode(body))
        };
        params.insert("__ow_body".into(), value);
    }

    params
}

fn body_as_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn text_response(
    result: &serde_json::Value,
    content_type: &'static str,
) -> Result<Response, Error> {
    let body = body_as_string(result.get("body").unwrap_or(&serde_json::Value::Null));
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .body(body.into())
        .map_err(|e| Error::Internal(e.to_string()))
}

/// Shape the action result by extension.
fn transform_response(result: &serde_json::Value, extension: &str) -> Result<Response, Error> {
    match extension {
        "html" => text_response(result, "text/html"),
        "text" => text_response(result, "text/plain"),
        "svg" => text_response(result, "image/svg+xml"),
        "http" => {
            let status = result
                .get("statusCode")
                .and_then(serde_json::Value::as_u64)
                .and_then(|code| u16::try_from(code).ok())
                .and_then(|code| StatusCode::from_u16(code).ok())
                .unwrap_or(StatusCode::OK);

            let body = result.get("body").unwrap_or(&serde_json::Value::Null);
            let json_body = body.is_object();

            let mut builder = Response::builder().status(status);
            if let Some(serde_json::Value::Object(headers)) = result.get("headers") {
                for (name, value) in headers {
                    if let (Ok(name), Ok(value)) = (
                        name.parse::<HeaderName>(),
                        HeaderValue::from_str(&body_as_string(value)),
                    ) {
                        builder = builder.header(name, value);
                    }
                }
            }
            if json_body {
                let has_content_type = builder
                    .headers_ref()
                    .is_some_and(|h| h.contains_key(header::CONTENT_TYPE));
                if !has_content_type {
                    builder = builder.header(header::CONTENT_TYPE, "application/json");
                }
            }

            builder
                .body(body_as_string(body).into())
                .map_err(|e| Error::Internal(e.to_string()))
        }
        // json, and anything parse_web_path let through
        _ => Ok(Json(result.clone()).into_response()),
    }
}

/// Unauthenticated web action endpoint.
pub(super) async fn handle(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    if method == Method::OPTIONS {
        return Ok(preflight());
    }

    let web_path = parse_web_path(&path)?;
    let namespace = state
        .controller
        .store()
        .namespace(&web_path.namespace)
        .await?;

    let action_path = match &web_path.package {
        Some(package) => format!("{package}/{}", web_path.action),
        None => web_path.action.clone(),
    };
    let action = state
        .controller
        .store()
        .resolve_action(&namespace.name, &action_path)
        .await?;

    // Only actions exported for the web are reachable here
    if !annotation_truthy(action.annotations.get("web-export")) {
        return Err(Error::Forbidden(format!(
            "action {} is not a web action",
            web_path.action
        ))
        .into());
    }

    // Optional shared-secret gate
    match action.annotations.get("require-whisk-auth") {
        None | Some(serde_json::Value::Bool(false)) => {}
        Some(expected) => {
            let provided = headers
                .get("x-require-whisk-auth")
                .and_then(|v| v.to_str().ok());
            let authorized = match expected {
                serde_json::Value::Bool(true) => provided.is_some(),
                other => provided == Some(body_as_string(other).as_str()),
            };
            if !authorized {
                return Err(Error::Auth("authentication required".into()).into());
            }
        }
    }

    let params = ow_params(&method, &uri, &headers, &body);
    let outcome = state
        .controller
        .dispatcher()
        .invoke_action(
            &namespace.name,
            &action_path,
            params,
            InvokeOptions {
                blocking: true,
                result_only: false,
                timeout: None,
                cause: None,
            },
            &namespace.owner,
        )
        .await?;

    let InvokeOutcome::Completed(record) = outcome else {
        return Err(Error::Internal("web invocation produced no record".into()).into());
    };
    if !record.response.success {
        return Ok((StatusCode::BAD_GATEWAY, Json(record.response.result.clone())).into_response());
    }

    Ok(transform_response(&record.response.result, &web_path.extension)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn web_path_parsing() {
        let parsed = parse_web_path("ns1/default/hello.json").unwrap();
        assert_eq!(parsed.namespace, "ns1");
        assert_eq!(parsed.package, None);
        assert_eq!(parsed.action, "hello");
        assert_eq!(parsed.extension, "json");

        let parsed = parse_web_path("ns1/utils/render.html").unwrap();
        assert_eq!(parsed.package.as_deref(), Some("utils"));

        assert!(parse_web_path("ns1/hello.json").is_err());
        assert!(parse_web_path("ns1/default/hello").is_err());
        assert!(parse_web_path("ns1/default/hello.exe").is_err());
    }

    #[test]
    fn http_extension_controls_status_and_headers() {
        let result = serde_json::json!({
            "statusCode": 418,
            "headers": {"x-custom": "yes"},
            "body": {"nested": true},
        });
        let response = transform_response(&result, "http").unwrap();
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(response.headers()["x-custom"], "yes");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
    }

    #[test]
    fn text_extension_serializes_body() {
        let result = serde_json::json!({"body": "<h1>hi</h1>"});
        let response = transform_response(&result, "html").unwrap();
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/html");
    }
}
