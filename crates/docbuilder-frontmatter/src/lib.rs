//! Canonical front matter handling: fingerprinting, deterministic
//! serialization, and the uid/alias/lastmod upserts applied by the
//! transforming stages.

use chrono::{DateTime, Utc};
use serde_yaml::{Mapping, Value};
use sha2::{Digest, Sha256};

/// Volatile keys excluded from the fingerprint input.
pub const EXCLUDED_KEYS: [&str; 4] = ["fingerprint", "lastmod", "uid", "aliases"];

#[derive(Debug, thiserror::Error)]
pub enum FrontMatterError {
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

fn key(name: &str) -> Value {
    Value::String(name.to_string())
}

/// Split a `---`-delimited front matter block off a document.
///
/// Returns the parsed mapping (if a block is present) and the body. A
/// document without an opening delimiter, or with an unterminated block,
/// is all body.
pub fn split_document(content: &str) -> Result<(Option<Mapping>, &str), FrontMatterError> {
    let Some(rest) = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))
    else {
        return Ok((None, content));
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end_matches(['\r', '\n']) == "---" {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            let fields = if yaml.trim().is_empty() {
                Mapping::new()
            } else {
                serde_yaml::from_str(yaml)?
            };
            return Ok((Some(fields), body));
        }
        offset += line.len();
    }
    Ok((None, content))
}

/// Reassemble a document. Field order is preserved as the mapping holds it.
pub fn join_document(fields: &Mapping, body: &str) -> Result<String, FrontMatterError> {
    if fields.is_empty() {
        return Ok(body.to_string());
    }
    let yaml = serde_yaml::to_string(fields)?;
    Ok(format!("---\n{yaml}---\n{body}"))
}

/// Serialize the fields in canonical form: string keys sorted
/// lexicographically, volatile keys excluded, exactly one trailing newline
/// trimmed.
pub fn canonical_serialize(fields: &Mapping) -> Result<String, FrontMatterError> {
    let mut pairs: Vec<(&str, &Value)> = fields
        .iter()
        .filter_map(|(k, v)| k.as_str().map(|k| (k, v)))
        .filter(|(k, _)| !EXCLUDED_KEYS.contains(k))
        .collect();
    pairs.sort_by_key(|(k, _)| *k);

    if pairs.is_empty() {
        return Ok(String::new());
    }
    let mut ordered = Mapping::new();
    for (k, v) in pairs {
        ordered.insert(key(k), v.clone());
    }
    let serialized = serde_yaml::to_string(&ordered)?;
    Ok(serialized
        .strip_suffix('\n')
        .unwrap_or(&serialized)
        .to_string())
}

/// Content-addressed identity of a document: SHA-256 over the canonical
/// front matter concatenated with the body bytes.
pub fn fingerprint(fields: &Mapping, body: &str) -> Result<String, FrontMatterError> {
    let serialized = canonical_serialize(fields)?;
    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    hasher.update(body.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Result of a fingerprint upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub changed: bool,
    pub fingerprint: String,
}

/// Set or refresh `fingerprint`; when it changes to a non-empty value,
/// stamp `lastmod` with the UTC date of `now`. Idempotent when the stored
/// fingerprint already matches.
pub fn upsert_fingerprint(
    fields: &mut Mapping,
    body: &str,
    now: DateTime<Utc>,
) -> Result<UpsertOutcome, FrontMatterError> {
    let value = fingerprint(fields, body)?;
    let existing = fields
        .get(&key("fingerprint"))
        .and_then(Value::as_str)
        .unwrap_or("");
    if existing == value {
        return Ok(UpsertOutcome {
            changed: false,
            fingerprint: value,
        });
    }
    fields.insert(key("fingerprint"), Value::String(value.clone()));
    if !value.is_empty() {
        fields.insert(
            key("lastmod"),
            Value::String(now.format("%Y-%m-%d").to_string()),
        );
    }
    Ok(UpsertOutcome {
        changed: true,
        fingerprint: value,
    })
}

/// Generate a `uid` (random 128-bit) only when missing. Returns the uid and
/// whether the mapping changed.
pub fn ensure_uid(fields: &mut Mapping) -> (String, bool) {
    if let Some(uid) = fields
        .get(&key("uid"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
    {
        return (uid.to_string(), false);
    }
    let uid = uuid::Uuid::new_v4().to_string();
    fields.insert(key("uid"), Value::String(uid.clone()));
    (uid, true)
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Ensure `aliases` contains `/_uid/<uid>/`, normalizing string and mixed
/// list forms into a string list. Returns whether the mapping changed.
pub fn ensure_uid_alias(fields: &mut Mapping, uid: &str) -> bool {
    let alias = format!("/_uid/{uid}/");
    let mut list: Vec<String> = match fields.get(&key("aliases")) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Sequence(items)) => items.iter().filter_map(scalar_to_string).collect(),
        Some(other) => scalar_to_string(other).into_iter().collect(),
    };
    if !list.contains(&alias) {
        list.push(alias);
    }
    let normalized = Value::Sequence(list.into_iter().map(Value::String).collect());
    let changed = fields.get(&key("aliases")) != Some(&normalized);
    if changed {
        fields.insert(key("aliases"), normalized);
    }
    changed
}
