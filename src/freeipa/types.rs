use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// API version sent with every call; older servers answer with a warning only.
pub const API_VERSION: &str = "2.251";

pub const ERR_NOT_FOUND: i64 = 4001;
pub const ERR_EMPTY_MODLIST: i64 = 4202;
pub const ERR_ALREADY_ACTIVE: i64 = 4204;
pub const ERR_ALREADY_INACTIVE: i64 = 4205;

const DATETIME_FORMAT: &str = "%Y%m%d%H%M%SZ";

#[derive(Debug, Serialize)]
pub struct RpcRequest<'a> {
    pub method: &'a str,
    pub params: (Vec<Value>, Map<String, Value>),
    pub id: u32,
}

#[derive(Debug, Deserialize)]
pub struct RpcReply {
    #[serde(default)]
    pub result: Option<RpcResult>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

/// Error object returned by the server in place of a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct RpcError {
    pub code: i64,
    #[serde(default)]
    pub name: String,
    pub message: String,
}

impl RpcError {
    pub fn is_not_found(&self) -> bool {
        self.code == ERR_NOT_FOUND || self.name == "NotFound"
    }

    pub fn is_empty_modlist(&self) -> bool {
        self.code == ERR_EMPTY_MODLIST || self.name == "EmptyModlist"
    }

    pub fn is_already_in_state(&self) -> bool {
        matches!(self.code, ERR_ALREADY_ACTIVE | ERR_ALREADY_INACTIVE)
            || matches!(self.name.as_str(), "AlreadyActive" | "AlreadyInactive")
    }
}

/// Payload of a successful call: `result` holds the entry, member commands
/// also report `failed` and `completed`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RpcResult {
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub failed: Value,
    #[serde(default)]
    pub completed: Option<i64>,
}

impl RpcResult {
    pub fn record(&self) -> Record {
        Record::from_value(&self.result)
    }

    /// Flattens `failed: {"member": {"user": [["ghost", "no such entry"]]}}`
    /// into `"user ghost: no such entry"` lines.
    pub fn failures(&self) -> Vec<String> {
        let mut out = Vec::new();
        let Some(sections) = self.failed.as_object() else {
            return out;
        };
        for kinds in sections.values() {
            let Some(kinds) = kinds.as_object() else {
                continue;
            };
            for (kind, entries) in kinds {
                for entry in entries.as_array().into_iter().flatten() {
                    match entry.as_array().map(Vec::as_slice) {
                        Some([name, reason, ..]) => out.push(format!(
                            "{} {}: {}",
                            kind,
                            scalar_text(name).unwrap_or_default(),
                            scalar_text(reason).unwrap_or_default()
                        )),
                        _ => out.push(format!(
                            "{} {}",
                            kind,
                            scalar_text(entry).unwrap_or_default()
                        )),
                    }
                }
            }
        }
        out
    }
}

/// Attribute map of a directory entry as returned by `*_show` / `*_add`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    attrs: Map<String, Value>,
}

impl Record {
    pub fn from_value(value: &Value) -> Self {
        Self {
            attrs: value.as_object().cloned().unwrap_or_default(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.attrs.contains_key(key)
    }

    /// All values of an attribute; single values are promoted to one-element lists.
    pub fn strings(&self, key: &str) -> Option<Vec<String>> {
        match self.attrs.get(key)? {
            Value::Null => None,
            Value::Array(items) => Some(items.iter().filter_map(scalar_text).collect()),
            other => scalar_text(other).map(|s| vec![s]),
        }
    }

    pub fn string(&self, key: &str) -> Option<String> {
        self.strings(key)?.into_iter().next()
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        self.string(key)?.trim().parse().ok()
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        let raw = self.string(key)?;
        match raw.to_ascii_uppercase().as_str() {
            "TRUE" => Some(true),
            "FALSE" => Some(false),
            _ => None,
        }
    }

    pub fn timestamp(&self, key: &str) -> Result<Option<DateTime<Utc>>, String> {
        let Some(raw) = self.string(key) else {
            return Ok(None);
        };
        parse_ipa_datetime(&raw).map(Some)
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(true) => Some("TRUE".into()),
        Value::Bool(false) => Some("FALSE".into()),
        Value::Object(obj) => ["__dns_name__", "__base64__", "__datetime__"]
            .iter()
            .find_map(|k| obj.get(*k))
            .and_then(scalar_text),
        Value::Array(items) => items.first().and_then(scalar_text),
        Value::Null => None,
    }
}

pub fn parse_ipa_datetime(raw: &str) -> Result<DateTime<Utc>, String> {
    NaiveDateTime::parse_from_str(raw, DATETIME_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| format!("cannot parse FreeIPA timestamp '{raw}': {e}"))
}

pub fn datetime_value(at: &DateTime<Utc>) -> Value {
    json!({ "__datetime__": at.format(DATETIME_FORMAT).to_string() })
}
