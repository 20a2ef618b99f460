use super::*;
use activation::Response;
use entity::Limits;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sentinel an invoker emits on stdout/stderr to mark the end of one
/// activation's log capture.
pub const LOG_SENTINEL: &str = "XXX_THE_END_OF_A_WHISK_ACTIVATION_XXX";

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("missing message field: {0}")]
    Missing(&'static str),

    #[error("invalid message field {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn required<'a>(
    fields: &'a HashMap<String, String>,
    name: &'static str,
) -> core::result::Result<&'a str, DecodeError> {
    fields
        .get(name)
        .map(String::as_str)
        .ok_or(DecodeError::Missing(name))
}

fn json_field<T: serde::de::DeserializeOwned>(
    fields: &HashMap<String, String>,
    name: &'static str,
) -> core::result::Result<T, DecodeError> {
    serde_json::from_str(required(fields, name)?).map_err(|e| DecodeError::Invalid {
        field: name,
        reason: e.to_string(),
    })
}

fn uuid_field(
    fields: &HashMap<String, String>,
    name: &'static str,
) -> core::result::Result<Uuid, DecodeError> {
    required(fields, name)?
        .parse()
        .map_err(|e: uuid::Error| DecodeError::Invalid {
            field: name,
            reason: e.to_string(),
        })
}

fn int_field<T: std::str::FromStr>(
    fields: &HashMap<String, String>,
    name: &'static str,
) -> core::result::Result<T, DecodeError>
where
    T::Err: std::fmt::Display,
{
    required(fields, name)?
        .parse()
        .map_err(|e: T::Err| DecodeError::Invalid {
            field: name,
            reason: e.to_string(),
        })
}

/// Where the invoker fetches the code blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeReference {
    pub bucket: String,
    pub key: String,
    pub hash: String,
    /// Presigned URL, fetchable without credentials while it lasts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Everything an invoker needs to run the action, embedded in the
/// invocation message as a JSON sub-document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDescriptor {
    /// Fully-qualified name.
    pub name: String,
    pub namespace: String,
    pub version: String,
    pub kind: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub main: Option<String>,
    #[serde(default)]
    pub binary: bool,
    #[serde(default)]
    pub code: Option<CodeReference>,
    pub limits: Limits,
    #[serde(default)]
    pub parameters: params::Map,
}

#[derive(Debug, Clone)]
pub struct InvocationMessage {
    pub activation_id: Uuid,
    pub action: ActionDescriptor,
    pub params: serde_json::Value,
    pub blocking: bool,
    pub response_channel: String,
    /// Epoch milliseconds by which the execution must have completed.
    pub deadline: u64,
    pub namespace: String,
    pub subject: String,
    pub cause: Option<Uuid>,
    pub auth_key: Option<String>,
}

impl InvocationMessage {
    pub fn to_fields(&self) -> Result<Vec<(String, String)>> {
        let mut fields = vec![
            ("activation_id".into(), self.activation_id.to_string()),
            ("action".into(), serde_json::to_string(&self.action)?),
            ("params".into(), serde_json::to_string(&self.params)?),
            ("blocking".into(), self.blocking.to_string()),
            ("response_channel".into(), self.response_channel.clone()),
            ("deadline".into(), self.deadline.to_string()),
            ("namespace".into(), self.namespace.clone()),
            ("subject".into(), self.subject.clone()),
        ];
        if let Some(cause) = &self.cause {
            fields.push(("cause".into(), cause.to_string()));
        }
        if let Some(auth_key) = &self.auth_key {
            fields.push(("auth_key".into(), auth_key.clone()));
        }
        Ok(fields)
    }

    pub fn from_fields(
        fields: &HashMap<String, String>,
    ) -> core::result::Result<Self, DecodeError> {
        Ok(Self {
            activation_id: uuid_field(fields, "activation_id")?,
            action: json_field(fields, "action")?,
            params: json_field(fields, "params")?,
            blocking: required(fields, "blocking")? == "true",
            response_channel: required(fields, "response_channel")?.into(),
            deadline: int_field(fields, "deadline")?,
            namespace: required(fields, "namespace")?.into(),
            subject: fields.get("subject").cloned().unwrap_or_default(),
            cause: match fields.get("cause") {
                Some(_) => Some(uuid_field(fields, "cause")?),
                None => None,
            },
            auth_key: fields.get("auth_key").cloned(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResultMessage {
    pub activation_id: Uuid,
    pub status_code: i64,
    pub response: Response,
    pub logs: Vec<String>,
    /// Execution duration in milliseconds, as measured by the invoker.
    pub duration: u64,
    pub invoker_id: Option<String>,
    pub annotations: params::Map,
}

impl ResultMessage {
    pub fn to_fields(&self) -> Result<Vec<(String, String)>> {
        let mut fields = vec![
            ("activation_id".into(), self.activation_id.to_string()),
            ("status_code".into(), self.status_code.to_string()),
            ("response".into(), serde_json::to_string(&self.response)?),
            ("logs".into(), serde_json::to_string(&self.logs)?),
            ("duration".into(), self.duration.to_string()),
        ];
        if let Some(invoker_id) = &self.invoker_id {
            fields.push(("invoker_id".into(), invoker_id.clone()));
        }
        if !self.annotations.is_empty() {
            fields.push((
                "annotations".into(),
                serde_json::to_string(&self.annotations)?,
            ));
        }
        Ok(fields)
    }

    pub fn from_fields(
        fields: &HashMap<String, String>,
    ) -> core::result::Result<Self, DecodeError> {
        Ok(Self {
            activation_id: uuid_field(fields, "activation_id")?,
            status_code: int_field(fields, "status_code")?,
            response: json_field(fields, "response")?,
            logs: match fields.get("logs") {
                Some(_) => json_field(fields, "logs")?,
                None => Vec::new(),
            },
            duration: int_field(fields, "duration")?,
            invoker_id: fields.get("invoker_id").cloned(),
            annotations: match fields.get("annotations") {
                Some(_) => json_field(fields, "annotations")?,
                None => params::Map::new(),
            },
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvokerStatus {
    Healthy,
    Unhealthy,
    Draining,
}

impl std::fmt::Display for InvokerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => f.write_str("healthy"),
            Self::Unhealthy => f.write_str("unhealthy"),
            Self::Draining => f.write_str("draining"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capacity {
    pub total_memory: u64,
    pub available_memory: u64,
    pub warm_containers: u32,
    pub busy_containers: u32,
    pub prewarm_containers: u32,
    pub supported_runtimes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct HeartbeatMessage {
    pub invoker_id: String,
    pub timestamp: time::OffsetDateTime,
    pub capacity: Capacity,
    pub status: InvokerStatus,
}

impl HeartbeatMessage {
    pub fn to_fields(&self) -> Result<Vec<(String, String)>> {
        let ms = self.timestamp.unix_timestamp_nanos() / 1_000_000;
        Ok(vec![
            ("invoker_id".into(), self.invoker_id.clone()),
            ("timestamp".into(), ms.to_string()),
            ("capacity".into(), serde_json::to_string(&self.capacity)?),
            ("status".into(), self.status.to_string()),
        ])
    }

    pub fn from_fields(
        fields: &HashMap<String, String>,
    ) -> core::result::Result<Self, DecodeError> {
        let raw = required(fields, "timestamp")?;

        // Invokers send either epoch milliseconds or an RFC 3339 timestamp
        let timestamp = match raw.parse::<i128>() {
            Ok(ms) => time::OffsetDateTime::from_unix_timestamp_nanos(ms * 1_000_000).map_err(
                |e| DecodeError::Invalid {
                    field: "timestamp",
                    reason: e.to_string(),
                },
            )?,
            Err(_) => time::OffsetDateTime::parse(
                raw,
                &time::format_description::well_known::Rfc3339,
            )
            .map_err(|e| DecodeError::Invalid {
                field: "timestamp",
                reason: e.to_string(),
            })?,
        };

        let status = match required(fields, "status")? {
            "healthy" => InvokerStatus::Healthy,
            "unhealthy" => InvokerStatus::Unhealthy,
            "draining" => InvokerStatus::Draining,
            other => {
                return Err(DecodeError::Invalid {
                    field: "status",
                    reason: format!("unknown status: {other}"),
                });
            }
        };

        Ok(Self {
            invoker_id: required(fields, "invoker_id")?.into(),
            timestamp,
            capacity: json_field(fields, "capacity")?,
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_map(fields: Vec<(String, String)>) -> HashMap<String, String> {
        fields.into_iter().collect()
    }

    #[test]
    fn invocation_round_trip() {
        let msg = InvocationMessage {
            activation_id: Uuid::new_v4(),
            action: ActionDescriptor {
                name: "/ns1/pkg/hello".into(),
                namespace: "ns1".into(),
                version: "0.0.1".into(),
                kind: "python:3.12".into(),
                image: None,
                main: Some("main".into()),
                binary: false,
                code: Some(CodeReference {
                    bucket: "whisk".into(),
                    key: "actions/ns1/hello/abc".into(),
                    hash: "abc".into(),
                    url: None,
                }),
                limits: Limits::default(),
                parameters: params::Map::new(),
            },
            params: json!({"name": "pat"}),
            blocking: true,
            response_channel: "activations_results".into(),
            deadline: 1_700_000_060_000,
            namespace: "ns1".into(),
            subject: "user@example.com".into(),
            cause: Some(Uuid::new_v4()),
            auth_key: None,
        };

        let decoded =
            InvocationMessage::from_fields(&as_map(msg.to_fields().unwrap())).unwrap();
        assert_eq!(decoded.activation_id, msg.activation_id);
        assert_eq!(decoded.action.name, msg.action.name);
        assert_eq!(decoded.params, msg.params);
        assert!(decoded.blocking);
        assert_eq!(decoded.deadline, msg.deadline);
        assert_eq!(decoded.cause, msg.cause);
    }

    #[test]
    fn result_round_trip() {
        let msg = ResultMessage {
            activation_id: Uuid::new_v4(),
            status_code: 200,
            response: Response::ok(json!({"greet": "pat"})),
            logs: vec!["line one".into()],
            duration: 42,
            invoker_id: Some("invoker0".into()),
            annotations: params::Map::new(),
        };
        let decoded = ResultMessage::from_fields(&as_map(msg.to_fields().unwrap())).unwrap();
        assert_eq!(decoded.activation_id, msg.activation_id);
        assert_eq!(decoded.status_code, 200);
        assert_eq!(decoded.response, msg.response);
        assert_eq!(decoded.logs, msg.logs);
        assert_eq!(decoded.duration, 42);
    }

    #[test]
    fn heartbeat_accepts_epoch_and_rfc3339() {
        let mut fields = HashMap::new();
        fields.insert("invoker_id".to_string(), "invoker0".to_string());
        fields.insert("timestamp".to_string(), "1700000000000".to_string());
        fields.insert(
            "capacity".to_string(),
            json!({"total_memory": 4096, "available_memory": 2048, "supported_runtimes": ["python:3.12"]})
                .to_string(),
        );
        fields.insert("status".to_string(), "healthy".to_string());

        let hb = HeartbeatMessage::from_fields(&fields).unwrap();
        assert_eq!(hb.capacity.available_memory, 2048);
        assert_eq!(hb.status, InvokerStatus::Healthy);

        fields.insert("timestamp".to_string(), "2024-01-01T00:00:00Z".to_string());
        assert!(HeartbeatMessage::from_fields(&fields).is_ok());

        fields.insert("status".to_string(), "offline".to_string());
        assert!(HeartbeatMessage::from_fields(&fields).is_err());
    }
}
