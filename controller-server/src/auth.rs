use super::*;
use crate::routes::{ApiError, AppState};
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use base64::prelude::*;
use whisk_controller::Error;
use whisk_controller::entity::Namespace;

/// The authenticated caller: the namespace its Basic-auth credential pair
/// (`uuid:key`) resolves to, plus the owning subject.
pub struct Identity {
    pub subject: String,
    pub namespace: Namespace,
}

impl Identity {
    /// Resolve a namespace path segment, where `_` stands for the caller's
    /// own namespace. Callers only ever see their own namespace.
    pub fn resolve(&self, namespace: &str) -> Result<&str, ApiError> {
        if namespace == "_" || namespace == self.namespace.name {
            Ok(&self.namespace.name)
        } else {
            Err(Error::Forbidden(format!("access to namespace {namespace} denied")).into())
        }
    }
}

fn parse_basic(header: &str) -> Option<(uuid::Uuid, String)> {
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = BASE64_STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (auth_uuid, auth_key) = decoded.split_once(':')?;
    Some((auth_uuid.parse().ok()?, auth_key.to_string()))
}

impl FromRequestParts<AppState> for Identity {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Error::Auth("API key required".into()))?;

        let (auth_uuid, auth_key) =
            parse_basic(header).ok_or_else(|| Error::Auth("invalid authorization header".into()))?;

        let namespace = state
            .controller
            .store()
            .authenticate(&auth_uuid, &auth_key)
            .await?;

        Ok(Self {
            subject: namespace.owner.clone(),
            namespace,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_header_parsing() {
        let auth_uuid = uuid::Uuid::new_v4();
        let header = format!(
            "Basic {}",
            BASE64_STANDARD.encode(format!("{auth_uuid}:secret"))
        );
        assert_eq!(parse_basic(&header), Some((auth_uuid, "secret".into())));

        assert_eq!(parse_basic("Bearer token"), None);
        assert_eq!(parse_basic("Basic %%%"), None);
        assert_eq!(
            parse_basic(&format!("Basic {}", BASE64_STANDARD.encode("no-colon"))),
            None
        );
    }
}
