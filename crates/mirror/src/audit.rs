use crate::paths::MirrorPaths;
use serde_json::{Map, Value};
use std::path::PathBuf;

// Standardize audit log shape. Fields may be null depending on the event type.
const REQUIRED_KEYS: [&str; 7] = [
    "ts",
    "event",
    "address",
    "pair_key",
    "order_id",
    "result",
    "error_code",
];

pub fn utc_now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub fn normalize_entry(v: Value) -> Value {
    let mut obj = match v {
        Value::Object(m) => m,
        other @ (Value::Null
        | Value::Bool(_)
        | Value::Number(_)
        | Value::String(_)
        | Value::Array(_)) => {
            let mut m = Map::new();
            m.insert("raw".to_owned(), other);
            m
        }
    };

    if !obj.contains_key("ts") {
        obj.insert("ts".to_owned(), Value::String(utc_now_iso()));
    }

    for k in REQUIRED_KEYS {
        if !obj.contains_key(k) {
            obj.insert(k.to_owned(), Value::Null);
        }
    }

    Value::Object(obj)
}

/// Append-only JSONL trail of credential and order events. Never carries secrets.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(paths: &MirrorPaths) -> Self {
        Self {
            path: paths.audit_log(),
        }
    }

    pub fn append(&self, entry: Value) -> eyre::Result<()> {
        let entry = normalize_entry(entry);
        crate::fsutil::append_line_private(&self.path, &entry.to_string())
    }

    /// Audit failures must not fail the operation being audited.
    pub fn record(&self, entry: Value) {
        if let Err(e) = self.append(entry) {
            tracing::warn!(error = %e, "audit append failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::ContextCompat as _;
    use serde_json::json;

    #[test]
    fn normalize_fills_required_keys() -> eyre::Result<()> {
        let v = normalize_entry(json!({ "event": "unlock", "result": "ok" }));
        let obj = v.as_object().context("object")?;
        for k in REQUIRED_KEYS {
            assert!(obj.contains_key(k), "missing {k}");
        }
        assert_eq!(obj.get("address"), Some(&Value::Null));
        assert!(obj.get("ts").and_then(Value::as_str).is_some());
        Ok(())
    }

    #[test]
    fn non_object_entries_are_wrapped() -> eyre::Result<()> {
        let v = normalize_entry(json!("hello"));
        assert_eq!(v.get("raw"), Some(&json!("hello")));
        Ok(())
    }

    #[test]
    fn append_writes_one_line_per_event() -> eyre::Result<()> {
        let td = tempfile::tempdir()?;
        let paths = MirrorPaths::under(td.path());
        let log = AuditLog::new(&paths);
        log.append(json!({ "event": "create", "result": "ok" }))?;
        log.record(json!({ "event": "unlock", "result": "error", "error_code": "invalid_key" }));

        let s = std::fs::read_to_string(paths.audit_log())?;
        let lines: Vec<Value> = s
            .lines()
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?;
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines.get(1).and_then(|l| l.get("error_code")),
            Some(&json!("invalid_key"))
        );
        Ok(())
    }
}
