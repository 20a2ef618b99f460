use super::*;
use serde::{Deserialize, Serialize};

/// Internal mapping form of parameters and annotations.
pub type Map = serde_json::Map<String, serde_json::Value>;

/// Parameter and annotation documents may not exceed 1 MiB of JSON.
pub const MAX_PARAMETER_SIZE: usize = 1024 * 1024;

/// External list form: `[{"key": ..., "value": ...}]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

pub fn from_list(list: &[KeyValue]) -> Map {
    list.iter()
        .map(|kv| (kv.key.clone(), kv.value.clone()))
        .collect()
}

pub fn to_list(map: &Map) -> Vec<KeyValue> {
    map.iter()
        .map(|(key, value)| KeyValue {
            key: key.clone(),
            value: value.clone(),
        })
        .collect()
}

/// Merge `overrides` over `defaults`; caller-supplied values win.
pub fn merge(defaults: &Map, overrides: &Map) -> Map {
    let mut merged = defaults.clone();
    for (key, value) in overrides {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

pub fn validate_size(map: &Map, field: &'static str) -> Result<(), Error> {
    if map.is_empty() {
        return Ok(());
    }
    let size = serde_json::to_vec(map)
        .map_err(|e| Error::Internal(format!("failed to serialize {field}: {e}")))?
        .len();
    if size > MAX_PARAMETER_SIZE {
        return Err(Error::validation(
            format!(
                "{field} size ({size} bytes) exceeds maximum of {MAX_PARAMETER_SIZE} bytes"
            ),
            Some(field),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn list_map_round_trip() {
        let list = vec![
            KeyValue {
                key: "a".into(),
                value: json!(1),
            },
            KeyValue {
                key: "b".into(),
                value: json!({"nested": true}),
            },
        ];
        let map = from_list(&list);
        let mut back = to_list(&map);
        back.sort_by(|x, y| x.key.cmp(&y.key));
        assert_eq!(back, list);
    }

    #[test]
    fn merge_overrides_win() {
        let defaults = from_list(&[
            KeyValue {
                key: "x".into(),
                value: json!(1),
            },
            KeyValue {
                key: "y".into(),
                value: json!(2),
            },
        ]);
        let overrides = from_list(&[KeyValue {
            key: "y".into(),
            value: json!(3),
        }]);
        let merged = merge(&defaults, &overrides);
        assert_eq!(merged.get("x"), Some(&json!(1)));
        assert_eq!(merged.get("y"), Some(&json!(3)));
    }

    #[test]
    fn size_cap() {
        let mut map = Map::new();
        map.insert("k".into(), json!("v"));
        assert!(validate_size(&map, "parameters").is_ok());

        let mut big = Map::new();
        big.insert("k".into(), json!("x".repeat(MAX_PARAMETER_SIZE)));
        assert!(matches!(
            validate_size(&big, "parameters"),
            Err(Error::Validation { .. })
        ));
    }
}
