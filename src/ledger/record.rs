//! Metadata records
//!
//! A record describes a subject (the content identifier of an archived entity)
//! on behalf of a signer (`key_id`). Records are hash-linked through `prev` into
//! one chain per (key_id, subject) pair.
//!
//! ## Canonical form
//!
//! The record hash covers exactly these fields, in this order:
//!
//! ```text
//! {"timestamp":"2017-03-01T12:00:00Z","keyId":"..","subject":"..","prev":"..","meta":{..}}
//! ```
//!
//! Object keys inside `meta` are sorted lexicographically at every depth and no
//! whitespace is emitted, so the bytes do not depend on map iteration order.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use super::LedgerError;
use crate::hash::{calc_hash, HashAlgorithm};

/// One entry of a metadata chain
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRecord {
    /// Content identifier of this record, assigned by `seal`
    #[serde(default)]
    pub(crate) hash: String,
    /// Creation time, second resolution, UTC
    pub timestamp: DateTime<Utc>,
    /// Identity of the signer
    pub key_id: String,
    /// Content identifier of the described entity
    pub subject: String,
    /// Hash of the chain predecessor, empty for the first record
    #[serde(default)]
    pub prev: String,
    /// Free-form payload
    #[serde(default)]
    pub meta: Map<String, Value>,
}

impl MetadataRecord {
    /// Start the first record of a chain
    pub fn new(key_id: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            subject: subject.into(),
            ..Default::default()
        }
    }

    /// Content identifier of the record (empty until sealed)
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Exact bytes the record hash is computed over
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = String::with_capacity(256);
        out.push_str("{\"timestamp\":");
        write_json_string(
            &mut out,
            &self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        out.push_str(",\"keyId\":");
        write_json_string(&mut out, &self.key_id);
        out.push_str(",\"subject\":");
        write_json_string(&mut out, &self.subject);
        out.push_str(",\"prev\":");
        write_json_string(&mut out, &self.prev);
        out.push_str(",\"meta\":");
        write_canonical_object(&mut out, &self.meta);
        out.push('}');
        out.into_bytes()
    }

    /// Hash the record's current contents
    pub fn compute_hash(&self, algorithm: HashAlgorithm) -> String {
        calc_hash(&self.canonical_bytes(), algorithm)
    }

    /// Stamp the record with `now` (truncated to whole seconds) and assign its hash
    pub fn seal(&mut self, now: DateTime<Utc>, algorithm: HashAlgorithm) {
        self.timestamp = now.trunc_subsecs(0);
        self.hash = self.compute_hash(algorithm);
    }

    /// Check that the stored hash matches the record contents
    ///
    /// The digest algorithm is the one named by the stored hash, so records
    /// sealed before an algorithm change still verify.
    pub fn verify(&self) -> Result<(), LedgerError> {
        let algorithm = HashAlgorithm::of_id(&self.hash).unwrap_or_default();
        let actual = self.compute_hash(algorithm);
        if actual != self.hash {
            return Err(LedgerError::Integrity {
                expected: self.hash.clone(),
                actual,
            });
        }
        Ok(())
    }

    /// Non-empty `title` string from the payload, if any
    pub fn title(&self) -> Option<&str> {
        self.meta
            .get("title")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
    }

    /// Content identifiers of each payload value
    ///
    /// Returns `key -> value id` and `value id -> value`.
    pub fn hash_maps(
        &self,
        algorithm: HashAlgorithm,
    ) -> Result<(BTreeMap<String, String>, BTreeMap<String, Value>), LedgerError> {
        if self.meta.is_empty() {
            return Err(LedgerError::Serialization(
                "record has no metadata to calculate hash maps from".to_string(),
            ));
        }

        let mut key_map = BTreeMap::new();
        let mut value_map = BTreeMap::new();
        for (key, value) in &self.meta {
            let mut bytes = String::new();
            write_canonical(&mut bytes, value);
            let id = calc_hash(bytes.as_bytes(), algorithm);
            key_map.insert(key.clone(), id.clone());
            value_map.insert(id, value.clone());
        }
        Ok((key_map, value_map))
    }
}

impl fmt::Display for MetadataRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} : {}.{}", self.hash, self.key_id, self.subject)
    }
}

fn write_json_string(out: &mut String, s: &str) {
    // Display for Value::String is infallible and applies JSON escaping
    out.push_str(&Value::String(s.to_string()).to_string());
}

fn write_canonical_object(out: &mut String, map: &Map<String, Value>) {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();

    out.push('{');
    for (i, key) in keys.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_json_string(out, key);
        out.push(':');
        write_canonical(out, &map[key.as_str()]);
    }
    out.push('}');
}

fn write_canonical(out: &mut String, value: &Value) {
    match value {
        Value::Object(map) => write_canonical_object(out, map),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(out, item);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
