use super::*;
use fqn::Fqn;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MAX_CODE_SIZE: usize = 48 * 1024 * 1024;

pub const SEQUENCE_KIND: &str = "sequence";

/// Runtimes an action's exec descriptor may declare, `blackbox` being a
/// user-supplied container image.
pub const SUPPORTED_KINDS: &[&str] = &[
    "nodejs:18",
    "nodejs:20",
    "python:3.9",
    "python:3.10",
    "python:3.11",
    "python:3.12",
    "python:3.13",
    "go:1.21",
    "go:1.22",
    "go:1.23",
    "java:11",
    "java:17",
    "java:21",
    "php:8.1",
    "php:8.2",
    "ruby:3.2",
    "ruby:3.3",
    "swift:5.9",
    "rust:1.75",
    "blackbox",
];

/// Unit of tenancy. Owns every other entity, carries the Basic-auth
/// credential pair (`auth_uuid:auth_key`) that authenticates its subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Namespace {
    pub name: String,
    pub uuid: Uuid,
    pub owner: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub limits: params::Map,
    pub auth_uuid: Uuid,
    pub auth_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub namespace: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub publish: bool,
    #[serde(default)]
    pub parameters: params::Map,
    #[serde(default)]
    pub annotations: params::Map,
    #[serde(default)]
    pub binding: Option<Binding>,
}

/// Resource limits of a single action execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Milliseconds, [100, 600000].
    pub timeout: u32,
    /// Megabytes, [128, 2048].
    pub memory: u32,
    /// Megabytes, [0, 10].
    pub logs: u32,
    pub concurrency: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            timeout: 60_000,
            memory: 256,
            logs: 10,
            concurrency: 1,
        }
    }
}

impl Limits {
    pub fn validate(&self) -> Result<(), Error> {
        if !(100..=600_000).contains(&self.timeout) {
            return Err(Error::validation(
                "timeout must be between 100ms and 600000ms",
                Some("limits.timeout"),
            ));
        }
        if !(128..=2048).contains(&self.memory) {
            return Err(Error::validation(
                "memory must be between 128MB and 2048MB",
                Some("limits.memory"),
            ));
        }
        if self.logs > 10 {
            return Err(Error::validation(
                "logs must be between 0MB and 10MB",
                Some("limits.logs"),
            ));
        }
        if self.concurrency == 0 {
            return Err(Error::validation(
                "concurrency must be at least 1",
                Some("limits.concurrency"),
            ));
        }
        Ok(())
    }
}

/// Exec descriptor: either runtime code or an ordered action composition.
#[derive(Debug, Clone, PartialEq)]
pub enum Exec {
    Code {
        kind: String,
        main: Option<String>,
        binary: bool,
        image: Option<String>,
    },
    Sequence {
        components: Vec<Fqn>,
    },
}

impl Exec {
    pub fn kind(&self) -> &str {
        match self {
            Self::Code { kind, .. } => kind,
            Self::Sequence { .. } => SEQUENCE_KIND,
        }
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self, Self::Sequence { .. })
    }

    pub fn validate(&self) -> Result<(), Error> {
        match self {
            Self::Code { kind, .. } => {
                if !SUPPORTED_KINDS.contains(&kind.as_str()) {
                    return Err(Error::validation(
                        format!("unsupported exec kind: {kind}"),
                        Some("exec.kind"),
                    ));
                }
                Ok(())
            }
            Self::Sequence { components } => {
                if components.is_empty() {
                    return Err(Error::validation(
                        "sequence must have at least one component",
                        Some("exec.components"),
                    ));
                }
                Ok(())
            }
        }
    }
}

// Wire form carries the discriminant in the `kind` field, where any
// non-"sequence" kind means code-bearing.
#[derive(Serialize, Deserialize)]
struct ExecRepr {
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    main: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    binary: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    components: Option<Vec<Fqn>>,
}

impl Serialize for Exec {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let repr = match self.clone() {
            Self::Code {
                kind,
                main,
                binary,
                image,
            } => ExecRepr {
                kind,
                main,
                binary,
                image,
                components: None,
            },
            Self::Sequence { components } => ExecRepr {
                kind: SEQUENCE_KIND.into(),
                main: None,
                binary: false,
                image: None,
                components: Some(components),
            },
        };
        repr.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Exec {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let repr = ExecRepr::deserialize(deserializer)?;
        if repr.kind == SEQUENCE_KIND {
            Ok(Self::Sequence {
                components: repr.components.unwrap_or_default(),
            })
        } else {
            Ok(Self::Code {
                kind: repr.kind,
                main: repr.main,
                binary: repr.binary,
                image: repr.image,
            })
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub namespace: String,
    #[serde(default)]
    pub package: Option<String>,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub publish: bool,
    pub exec: Exec,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub parameters: params::Map,
    #[serde(default)]
    pub annotations: params::Map,
    /// SHA-256 content address of the code blob. Absent for sequences.
    #[serde(default)]
    pub code_hash: Option<String>,
}

impl Action {
    pub fn fqn(&self) -> Fqn {
        Fqn::new(&self.namespace, self.package.as_deref(), &self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub namespace: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub publish: bool,
    #[serde(default)]
    pub parameters: params::Map,
    #[serde(default)]
    pub annotations: params::Map,
    /// Opaque reference to an external feed source.
    #[serde(default)]
    pub feed: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleStatus {
    Active,
    Inactive,
}

impl std::fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => f.write_str("active"),
            Self::Inactive => f.write_str("inactive"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub namespace: String,
    pub name: String,
    pub version: String,
    /// Trigger name within the rule's namespace.
    pub trigger: String,
    /// Action path (`name` or `package/name`) within the rule's namespace.
    pub action: String,
    pub status: RuleStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Package,
    Action,
    Trigger,
    Rule,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Package => f.write_str("package"),
            Self::Action => f.write_str("action"),
            Self::Trigger => f.write_str("trigger"),
            Self::Rule => f.write_str("rule"),
        }
    }
}

/// Store key of a catalog entity within its kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    pub namespace: String,
    pub package: Option<String>,
    pub name: String,
}

impl EntityKey {
    pub fn new(namespace: &str, package: Option<&str>, name: &str) -> Self {
        Self {
            namespace: namespace.into(),
            package: package.map(Into::into),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Entity {
    Package(Package),
    Action(Action),
    Trigger(Trigger),
    Rule(Rule),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Package(_) => EntityKind::Package,
            Self::Action(_) => EntityKind::Action,
            Self::Trigger(_) => EntityKind::Trigger,
            Self::Rule(_) => EntityKind::Rule,
        }
    }

    pub fn key(&self) -> EntityKey {
        match self {
            Self::Package(p) => EntityKey::new(&p.namespace, None, &p.name),
            Self::Action(a) => EntityKey::new(&a.namespace, a.package.as_deref(), &a.name),
            Self::Trigger(t) => EntityKey::new(&t.namespace, None, &t.name),
            Self::Rule(r) => EntityKey::new(&r.namespace, None, &r.name),
        }
    }

    pub fn version(&self) -> &str {
        match self {
            Self::Package(p) => &p.version,
            Self::Action(a) => &a.version,
            Self::Trigger(t) => &t.version,
            Self::Rule(r) => &r.version,
        }
    }
}

/// Initial entity version, and the patch-bump applied on overwrite when the
/// caller does not supply an explicit version.
pub const INITIAL_VERSION: &str = "0.0.1";

pub fn bump_patch(version: &str) -> String {
    let mut parts = version
        .split('.')
        .map(|p| p.parse::<u64>().unwrap_or(0))
        .collect::<Vec<_>>();
    parts.resize(3, 0);
    format!("{}.{}.{}", parts[0], parts[1], parts[2].saturating_add(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_boundaries() {
        let ok = |timeout, memory, logs| Limits {
            timeout,
            memory,
            logs,
            concurrency: 1,
        };
        assert!(ok(100, 128, 0).validate().is_ok());
        assert!(ok(600_000, 2048, 10).validate().is_ok());
        assert!(ok(99, 256, 10).validate().is_err());
        assert!(ok(600_001, 256, 10).validate().is_err());
        assert!(ok(60_000, 127, 10).validate().is_err());
        assert!(ok(60_000, 2049, 10).validate().is_err());
        assert!(ok(60_000, 256, 11).validate().is_err());
    }

    #[test]
    fn exec_serde_round_trip() {
        let code = Exec::Code {
            kind: "python:3.12".into(),
            main: Some("main".into()),
            binary: false,
            image: None,
        };
        let json = serde_json::to_value(&code).unwrap();
        assert_eq!(json["kind"], "python:3.12");
        assert_eq!(serde_json::from_value::<Exec>(json).unwrap(), code);

        let seq = Exec::Sequence {
            components: vec!["/ns1/a1".parse().unwrap(), "/ns1/p/a2".parse().unwrap()],
        };
        let json = serde_json::to_value(&seq).unwrap();
        assert_eq!(json["kind"], "sequence");
        assert_eq!(json["components"][0], "/ns1/a1");
        assert_eq!(serde_json::from_value::<Exec>(json).unwrap(), seq);
    }

    #[test]
    fn exec_validation() {
        assert!(
            Exec::Code {
                kind: "cobol:85".into(),
                main: None,
                binary: false,
                image: None,
            }
            .validate()
            .is_err()
        );
        assert!(
            Exec::Sequence { components: vec![] }.validate().is_err(),
            "empty sequence must be rejected"
        );
    }

    #[test]
    fn version_bump() {
        assert_eq!(bump_patch("0.0.1"), "0.0.2");
        assert_eq!(bump_patch("1.2.9"), "1.2.10");
        assert_eq!(bump_patch("junk"), "0.0.1");
    }
}
