use super::*;

pub const MAX_NAME_LENGTH: usize = 256;

/// Entity name rule: `[a-zA-Z0-9_@.\-]+`, at most [`MAX_NAME_LENGTH`] chars.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LENGTH
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '@' | '.' | '-'))
}

pub fn validate_name(name: &str, field: &'static str) -> Result<(), Error> {
    if name.is_empty() {
        return Err(Error::validation(
            format!("{field} cannot be empty"),
            Some(field),
        ));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(Error::validation(
            format!("{field} exceeds maximum length of {MAX_NAME_LENGTH} characters"),
            Some(field),
        ));
    }
    if !is_valid_name(name) {
        return Err(Error::validation(
            format!("{field} must contain only letters, numbers, and characters: _ @ . -"),
            Some(field),
        ));
    }
    Ok(())
}

/// Fully-qualified entity name: `/namespace/[package/]name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fqn {
    pub namespace: String,
    pub package: Option<String>,
    pub name: String,
}

impl Fqn {
    pub fn new(namespace: &str, package: Option<&str>, name: &str) -> Self {
        Self {
            namespace: namespace.into(),
            package: package.map(Into::into),
            name: name.into(),
        }
    }

    /// The `[package/]name` part, as used in entity paths under a namespace.
    pub fn path(&self) -> String {
        match &self.package {
            Some(package) => format!("{package}/{}", self.name),
            None => self.name.clone(),
        }
    }

    /// Split a `name` or `package/name` path into its components.
    pub fn split_path(path: &str) -> Result<(Option<&str>, &str), Error> {
        let mut parts = path.split('/').filter(|p| !p.is_empty());
        match (parts.next(), parts.next(), parts.next()) {
            (Some(name), None, _) => Ok((None, name)),
            (Some(package), Some(name), None) => Ok((Some(package), name)),
            _ => Err(Error::validation(
                format!("invalid entity path: {path}"),
                Some("path"),
            )),
        }
    }
}

impl std::fmt::Display for Fqn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.package {
            Some(package) => write!(f, "/{}/{package}/{}", self.namespace, self.name),
            None => write!(f, "/{}/{}", self.namespace, self.name),
        }
    }
}

impl std::str::FromStr for Fqn {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .trim_matches('/')
            .split('/')
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>();

        match parts.as_slice() {
            [namespace, name] => Ok(Self::new(namespace, None, name)),
            [namespace, package, name] => Ok(Self::new(namespace, Some(package), name)),
            _ => Err(Error::validation(
                format!("invalid fully qualified name: {s}"),
                Some("name"),
            )),
        }
    }
}

impl serde::Serialize for Fqn {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for Fqn {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
