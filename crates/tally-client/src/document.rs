//! Replicated vault state on top of a yrs document.
//!
//! Each collection (`accounts`, `people`, ...) is a flat root-level map
//! keyed by `{id}\u{1f}{field}`. Every record field is its own map entry, so
//! concurrent writes to different fields of the same record both survive,
//! even when both replicas create the record. An entry with an empty field
//! name marks that the record exists. Deletion is a `deletedAt` tombstone;
//! entries are never removed.

use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Any, Doc, Map, MapRef, Options, Out, ReadTxn, StateVector, Transact, Update};

use crate::error::CodecError;

/// Soft-delete marker field. 0 or absent means alive.
pub const DELETED_AT: &str = "deletedAt";

/// Root map listing every collection that has ever been written.
const COLLECTIONS_INDEX: &str = "__collections";

/// Separates record id from field name in collection map keys.
const KEY_SEP: char = '\u{1f}';

/// Which replicas' operations a document has seen, and how far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionVector(StateVector);

impl VersionVector {
    pub fn encode(&self) -> Vec<u8> {
        self.0.encode_v1()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        StateVector::decode_v1(bytes)
            .map(Self)
            .map_err(|e| CodecError::Decode(e.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if `self` includes any operation `other` has not seen.
    pub fn is_ahead_of(&self, other: &VersionVector) -> bool {
        self.0
            .iter()
            .any(|(client, clock)| *clock > other.0.get(client))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportKind {
    Snapshot,
    Updates,
}

/// Exported bytes tagged with what they are.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedState {
    pub kind: ExportKind,
    pub data: Vec<u8>,
}

/// One entity in a collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub id: String,
    pub fields: JsonMap<String, Value>,
}

impl Record {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: JsonMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Decode a record from untrusted JSON. Anything that is not an object,
    /// or carries a non-integer `deletedAt`, is rejected.
    pub fn from_json(id: impl Into<String>, value: &Value) -> Result<Self, CodecError> {
        let id = id.into();
        let Value::Object(fields) = value else {
            return Err(CodecError::InvalidRecord(format!(
                "record {id} is not an object"
            )));
        };
        let record = Self {
            id,
            fields: fields.clone(),
        };
        record.validate()?;
        Ok(record)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn deleted_at(&self) -> Option<i64> {
        self.fields
            .get(DELETED_AT)
            .and_then(Value::as_i64)
            .filter(|at| *at != 0)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at().is_some()
    }

    fn validate(&self) -> Result<(), CodecError> {
        if self.id.is_empty() {
            return Err(CodecError::InvalidRecord("empty record id".into()));
        }
        if self.id.contains(KEY_SEP) {
            return Err(CodecError::InvalidRecord(format!(
                "record id {:?} contains a reserved character",
                self.id
            )));
        }
        if let Some(name) = self
            .fields
            .keys()
            .find(|name| name.is_empty() || name.contains(KEY_SEP))
        {
            return Err(CodecError::InvalidRecord(format!(
                "record {}: invalid field name {name:?}",
                self.id
            )));
        }
        match self.fields.get(DELETED_AT) {
            None => Ok(()),
            Some(v) if v.is_i64() => Ok(()),
            Some(v) => Err(CodecError::InvalidRecord(format!(
                "record {}: deletedAt must be an integer, got {v}",
                self.id
            ))),
        }
    }
}

/// Vault state for one device. Garbage collection is off, so the full
/// history stays available for incremental export.
///
/// `Send + Sync`: share it behind an `Arc` between the sync task and editors.
pub struct VaultDocument {
    doc: Doc,
    index: MapRef,
}

impl Default for VaultDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl VaultDocument {
    pub fn new() -> Self {
        let doc = history_doc();
        let index = doc.get_or_insert_map(COLLECTIONS_INDEX);
        Self { doc, index }
    }

    /// Build a document from previously exported bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        let document = Self::new();
        document.import_data(data)?;
        Ok(document)
    }

    // ------------------------------------------------------------------
    // Export / import
    // ------------------------------------------------------------------

    /// Full state, including deleted content.
    pub fn export_snapshot(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    /// Current state re-encoded through a collecting document, so deleted
    /// content is dropped. Enough to reconstruct current values, not enough
    /// to serve incremental exports from.
    pub fn export_shallow_snapshot(&self) -> Result<Vec<u8>, CodecError> {
        let full = self.export_snapshot();
        let shallow = Doc::new();
        {
            let update = decode_update(&full)?;
            let mut txn = shallow.transact_mut();
            txn.apply_update(update)
                .map_err(|e| CodecError::Decode(e.to_string()))?;
        }
        let txn = shallow.transact();
        Ok(txn.encode_state_as_update_v1(&StateVector::default()))
    }

    /// Operations not covered by `since`; everything when `since` is `None`.
    pub fn export_updates(&self, since: Option<&VersionVector>) -> Vec<u8> {
        let base = since.map(|v| v.0.clone()).unwrap_or_default();
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&base)
    }

    /// Like [`export_updates`](Self::export_updates) but never hands out an
    /// incremental delta without a base: no `since` means a full snapshot.
    pub fn export_updates_safe(&self, since: Option<&VersionVector>) -> ExportedState {
        match since {
            None => ExportedState {
                kind: ExportKind::Snapshot,
                data: self.export_snapshot(),
            },
            Some(version) => ExportedState {
                kind: ExportKind::Updates,
                data: self.export_updates(Some(version)),
            },
        }
    }

    /// Merge a snapshot or update. Malformed bytes are rejected before the
    /// document is touched.
    pub fn import_data(&self, data: &[u8]) -> Result<(), CodecError> {
        self.import_checked(&[data])
    }

    /// Merge a batch in one transaction. One bad blob rejects the whole
    /// batch.
    pub fn import_updates(&self, blobs: &[Vec<u8>]) -> Result<usize, CodecError> {
        let blobs: Vec<&[u8]> = blobs.iter().map(Vec::as_slice).collect();
        self.import_checked(&blobs)?;
        Ok(blobs.len())
    }

    /// Bytes that decode can still reference blocks that don't exist, and
    /// yrs panics on those while integrating. Every batch is rehearsed on a
    /// scratch copy of the current state before the real document sees it.
    fn import_checked(&self, blobs: &[&[u8]]) -> Result<(), CodecError> {
        let current = self.export_snapshot();
        contain_panic(|| {
            let scratch = history_doc();
            let mut txn = scratch.transact_mut();
            apply_all(&mut txn, std::iter::once(current.as_slice()))?;
            apply_all(&mut txn, blobs.iter().copied())
        })?;
        contain_panic(|| {
            let mut txn = self.doc.transact_mut();
            apply_all(&mut txn, blobs.iter().copied())
        })
    }

    pub fn version(&self) -> VersionVector {
        VersionVector(self.doc.transact().state_vector())
    }

    pub fn version_encoded(&self) -> Vec<u8> {
        self.version().encode()
    }

    /// Version of the operation log. yrs has no detached checkout, so the
    /// visible state and the log are always at the same version.
    pub fn oplog_version(&self) -> VersionVector {
        self.version()
    }

    pub fn has_changes_since(&self, version: &VersionVector) -> bool {
        self.version().is_ahead_of(version)
    }

    pub fn is_empty(&self) -> bool {
        self.version().is_empty()
    }

    /// How many operations this replica has authored. Imports never move it.
    pub fn local_clock(&self) -> u32 {
        let txn = self.doc.transact();
        txn.state_vector().get(&self.doc.client_id())
    }

    /// Current version with this replica's own entry rolled back to
    /// `local_clock`. Exporting against it yields exactly the local
    /// operations authored after that point.
    pub fn local_base(&self, local_clock: u32) -> VersionVector {
        let mut base = self.doc.transact().state_vector();
        base.set_min(self.doc.client_id(), local_clock);
        VersionVector(base)
    }

    // ------------------------------------------------------------------
    // Records
    // ------------------------------------------------------------------

    /// Create the record or merge `record.fields` into it field by field.
    /// Fields not mentioned are left alone. Unchanged values are skipped so
    /// no-op upserts don't grow the history.
    pub fn upsert_record(&self, collection: &str, record: &Record) -> Result<(), CodecError> {
        validate_collection(collection)?;
        record.validate()?;

        let map = self.doc.get_or_insert_map(collection);
        let mut txn = self.doc.transact_mut();
        if self.index.get(&txn, collection).is_none() {
            self.index.insert(&mut txn, collection, Any::Bool(true));
        }

        let marker = field_key(&record.id, "");
        if map.get(&txn, &marker).is_none() {
            map.insert(&mut txn, marker, Any::Bool(true));
        }
        for (name, value) in &record.fields {
            let key = field_key(&record.id, name);
            let value = json_to_any(value);
            let unchanged = matches!(
                map.get(&txn, &key),
                Some(Out::Any(ref current)) if *current == value
            );
            if !unchanged {
                map.insert(&mut txn, key, value);
            }
        }
        Ok(())
    }

    pub fn set_field(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        value: impl Into<Value>,
    ) -> Result<(), CodecError> {
        self.upsert_record(collection, &Record::new(id).with_field(field, value))
    }

    /// The record as stored, tombstoned or not.
    pub fn get_record(&self, collection: &str, id: &str) -> Option<Record> {
        if !self.has_collection(collection) {
            return None;
        }
        let map = self.doc.get_or_insert_map(collection);
        let txn = self.doc.transact();
        let mut found = false;
        let mut fields = JsonMap::new();
        for (key, out) in map.iter(&txn) {
            let Some((record_id, field)) = key.split_once(KEY_SEP) else {
                continue;
            };
            if record_id != id {
                continue;
            }
            found = true;
            if !field.is_empty() {
                fields.insert(field.to_string(), out_to_json(&out));
            }
        }
        found.then(|| Record {
            id: id.to_string(),
            fields,
        })
    }

    /// Alive records, ordered by id.
    pub fn records(&self, collection: &str) -> Vec<Record> {
        self.all_records(collection)
            .into_iter()
            .filter(|r| !r.is_deleted())
            .collect()
    }

    /// Every record including tombstones, ordered by id.
    pub fn all_records(&self, collection: &str) -> Vec<Record> {
        if !self.has_collection(collection) {
            return Vec::new();
        }
        let map = self.doc.get_or_insert_map(collection);
        let txn = self.doc.transact();
        let mut grouped: BTreeMap<String, JsonMap<String, Value>> = BTreeMap::new();
        for (key, out) in map.iter(&txn) {
            let Some((id, field)) = key.split_once(KEY_SEP) else {
                continue;
            };
            let fields = grouped.entry(id.to_string()).or_default();
            if !field.is_empty() {
                fields.insert(field.to_string(), out_to_json(&out));
            }
        }
        grouped
            .into_iter()
            .map(|(id, fields)| Record { id, fields })
            .collect()
    }

    /// Mark a record deleted at `at_ms`. Returns false if it doesn't exist.
    pub fn soft_delete(&self, collection: &str, id: &str, at_ms: i64) -> Result<bool, CodecError> {
        if at_ms <= 0 {
            return Err(CodecError::InvalidRecord(format!(
                "deletedAt must be positive, got {at_ms}"
            )));
        }
        if self.get_record(collection, id).is_none() {
            return Ok(false);
        }
        self.set_field(collection, id, DELETED_AT, at_ms)?;
        Ok(true)
    }

    pub fn is_deleted(&self, collection: &str, id: &str) -> bool {
        self.get_record(collection, id)
            .is_some_and(|r| r.is_deleted())
    }

    pub fn collections(&self) -> Vec<String> {
        let txn = self.doc.transact();
        let mut names: Vec<String> = self.index.keys(&txn).map(str::to_string).collect();
        names.sort();
        names
    }

    /// `{collection: {id: {field: value}}}`, tombstones included.
    pub fn to_json(&self) -> Value {
        let mut root = JsonMap::new();
        for collection in self.collections() {
            let records: JsonMap<String, Value> = self
                .all_records(&collection)
                .into_iter()
                .map(|r| (r.id, Value::Object(r.fields)))
                .collect();
            root.insert(collection, Value::Object(records));
        }
        Value::Object(root)
    }

    fn has_collection(&self, collection: &str) -> bool {
        let txn = self.doc.transact();
        self.index.get(&txn, collection).is_some()
    }
}

fn history_doc() -> Doc {
    Doc::with_options(Options {
        skip_gc: true,
        ..Options::default()
    })
}

fn decode_update(data: &[u8]) -> Result<Update, CodecError> {
    Update::decode_v1(data).map_err(|e| CodecError::Decode(e.to_string()))
}

fn apply_all<'a>(
    txn: &mut yrs::TransactionMut<'_>,
    blobs: impl Iterator<Item = &'a [u8]>,
) -> Result<(), CodecError> {
    for blob in blobs {
        txn.apply_update(decode_update(blob)?)
            .map_err(|e| CodecError::Decode(e.to_string()))?;
    }
    Ok(())
}

/// Run an import step, turning a panic inside yrs into a decode error.
fn contain_panic<T>(f: impl FnOnce() -> Result<T, CodecError>) -> Result<T, CodecError> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| {
        tracing::warn!("update rejected: merge engine panicked while integrating it");
        Err(CodecError::Decode("update references missing or invalid blocks".into()))
    })
}

fn field_key(id: &str, field: &str) -> String {
    format!("{id}{KEY_SEP}{field}")
}

fn validate_collection(name: &str) -> Result<(), CodecError> {
    if name.is_empty() || name == COLLECTIONS_INDEX {
        return Err(CodecError::InvalidRecord(format!(
            "invalid collection name {name:?}"
        )));
    }
    Ok(())
}

/// Integers stay integers; everything else maps one to one.
pub(crate) fn json_to_any(value: &Value) -> Any {
    match value {
        Value::Null => Any::Null,
        Value::Bool(b) => Any::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Any::BigInt(i),
            None => Any::Number(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => Any::String(Arc::from(s.as_str())),
        Value::Array(items) => {
            let items: Vec<Any> = items.iter().map(json_to_any).collect();
            Any::Array(items.into())
        }
        Value::Object(fields) => {
            let fields: HashMap<String, Any> = fields
                .iter()
                .map(|(k, v)| (k.clone(), json_to_any(v)))
                .collect();
            Any::Map(Arc::new(fields))
        }
    }
}

pub(crate) fn any_to_json(value: &Any) -> Value {
    match value {
        Any::Bool(b) => Value::Bool(*b),
        Any::BigInt(i) => Value::from(*i),
        Any::Number(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Any::String(s) => Value::String(s.to_string()),
        Any::Buffer(bytes) => Value::String(STANDARD.encode(bytes)),
        Any::Array(items) => Value::Array(items.iter().map(any_to_json).collect()),
        Any::Map(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), any_to_json(v)))
                .collect(),
        ),
        _ => Value::Null,
    }
}

fn out_to_json(out: &Out) -> Value {
    match out {
        Out::Any(any) => any_to_json(any),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seeded() -> VaultDocument {
        let doc = VaultDocument::new();
        doc.upsert_record(
            "accounts",
            &Record::new("acc1")
                .with_field("name", "Checking")
                .with_field("balance", 1000),
        )
        .unwrap();
        doc.upsert_record(
            "accounts",
            &Record::new("acc2")
                .with_field("name", "Savings")
                .with_field("balance", 5000),
        )
        .unwrap();
        doc
    }

    #[test]
    fn test_upsert_and_read_back() {
        let doc = seeded();
        let acc1 = doc.get_record("accounts", "acc1").unwrap();
        assert_eq!(acc1.get("name"), Some(&json!("Checking")));
        assert_eq!(acc1.get("balance"), Some(&json!(1000)));
        assert_eq!(doc.records("accounts").len(), 2);
        assert_eq!(doc.collections(), vec!["accounts".to_string()]);
        assert!(doc.get_record("accounts", "nope").is_none());
        assert!(doc.get_record("people", "acc1").is_none());
    }

    #[test]
    fn test_upsert_merges_fields() {
        let doc = seeded();
        doc.set_field("accounts", "acc1", "balance", 1100).unwrap();
        let acc1 = doc.get_record("accounts", "acc1").unwrap();
        assert_eq!(acc1.get("balance"), Some(&json!(1100)));
        assert_eq!(acc1.get("name"), Some(&json!("Checking")));
    }

    #[test]
    fn test_nested_values_round_trip() {
        let doc = VaultDocument::new();
        let value = json!({"split": [1, 2.5, "x", null, true], "meta": {"k": "v"}});
        doc.set_field("transactions", "t1", "detail", value.clone())
            .unwrap();
        let t1 = doc.get_record("transactions", "t1").unwrap();
        assert_eq!(t1.get("detail"), Some(&value));
    }

    #[test]
    fn test_noop_upsert_does_not_advance_version() {
        let doc = seeded();
        let before = doc.version();
        doc.set_field("accounts", "acc1", "balance", 1000).unwrap();
        assert!(!doc.has_changes_since(&before));
        doc.set_field("accounts", "acc1", "balance", 1001).unwrap();
        assert!(doc.has_changes_since(&before));
    }

    #[test]
    fn test_soft_delete_keeps_tombstone() {
        let doc = seeded();
        assert!(doc.soft_delete("accounts", "acc2", 1_700_000_000_000).unwrap());
        assert!(doc.is_deleted("accounts", "acc2"));
        assert!(!doc.is_deleted("accounts", "acc1"));

        let alive: Vec<_> = doc.records("accounts").into_iter().map(|r| r.id).collect();
        assert_eq!(alive, vec!["acc1"]);
        assert_eq!(doc.all_records("accounts").len(), 2);
        assert_eq!(
            doc.to_json()["accounts"]["acc2"]["deletedAt"],
            json!(1_700_000_000_000i64)
        );

        assert!(!doc.soft_delete("accounts", "ghost", 1).unwrap());
        assert!(doc.soft_delete("accounts", "acc1", 0).is_err());
    }

    #[test]
    fn test_deleted_at_zero_is_alive() {
        let record = Record::new("a").with_field(DELETED_AT, 0);
        assert!(!record.is_deleted());
    }

    #[test]
    fn test_record_from_json_fails_closed() {
        assert!(Record::from_json("a", &json!({"name": "x"})).is_ok());
        assert!(Record::from_json("a", &json!({"deletedAt": 12})).is_ok());
        assert!(Record::from_json("a", &json!(["not", "object"])).is_err());
        assert!(Record::from_json("a", &json!("string")).is_err());
        assert!(Record::from_json("a", &json!({"deletedAt": "yesterday"})).is_err());
        assert!(Record::from_json("a", &json!({"deletedAt": 1.5})).is_err());
        assert!(Record::from_json("", &json!({})).is_err());
    }

    #[test]
    fn test_invalid_collection_rejected() {
        let doc = VaultDocument::new();
        assert!(doc.upsert_record("", &Record::new("a")).is_err());
        assert!(doc
            .upsert_record(COLLECTIONS_INDEX, &Record::new("a"))
            .is_err());
    }

    #[test]
    fn test_snapshot_round_trip() {
        let doc = seeded();
        let copy = VaultDocument::from_bytes(&doc.export_snapshot()).unwrap();
        copy.set_field("accounts", "acc1", "balance", 42).unwrap();
        copy.soft_delete("accounts", "acc2", 99).unwrap();

        doc.import_data(&copy.export_snapshot()).unwrap();
        assert_eq!(doc.to_json(), copy.to_json());
        assert_eq!(doc.version(), copy.version());
    }

    #[test]
    fn test_import_is_idempotent() {
        let doc = seeded();
        let other = VaultDocument::from_bytes(&doc.export_snapshot()).unwrap();
        let snapshot = doc.export_snapshot();
        other.import_data(&snapshot).unwrap();
        other.import_data(&snapshot).unwrap();
        assert_eq!(other.to_json(), doc.to_json());
    }

    #[test]
    fn test_concurrent_edits_converge() {
        let base = seeded().export_snapshot();
        let a = VaultDocument::from_bytes(&base).unwrap();
        let b = VaultDocument::from_bytes(&base).unwrap();
        let base_version = a.version();

        a.set_field("accounts", "acc1", "balance", 1100).unwrap();
        b.upsert_record("accounts", &Record::new("acc3").with_field("name", "Investment"))
            .unwrap();

        let from_a = a.export_updates(Some(&base_version));
        let from_b = b.export_updates(Some(&base_version));
        a.import_data(&from_b).unwrap();
        b.import_data(&from_a).unwrap();

        for doc in [&a, &b] {
            let acc1 = doc.get_record("accounts", "acc1").unwrap();
            assert_eq!(acc1.get("balance"), Some(&json!(1100)));
            let acc3 = doc.get_record("accounts", "acc3").unwrap();
            assert_eq!(acc3.get("name"), Some(&json!("Investment")));
        }
        assert_eq!(a.to_json(), b.to_json());
        assert_eq!(a.version(), b.version());
    }

    #[test]
    fn test_apply_order_does_not_matter() {
        let base = seeded().export_snapshot();
        let writer = VaultDocument::from_bytes(&base).unwrap();
        let v0 = writer.version();
        writer.set_field("people", "p1", "name", "Ana").unwrap();
        let v1 = writer.version();
        writer.set_field("tags", "t1", "label", "food").unwrap();
        let u1 = writer.export_updates(Some(&v0));
        let u2 = writer.export_updates(Some(&v1));

        let forward = VaultDocument::from_bytes(&base).unwrap();
        forward.import_data(&u1).unwrap();
        forward.import_data(&u2).unwrap();

        let reverse = VaultDocument::from_bytes(&base).unwrap();
        reverse.import_data(&u2).unwrap();
        reverse.import_data(&u1).unwrap();

        assert_eq!(forward.to_json(), writer.to_json());
        assert_eq!(reverse.to_json(), writer.to_json());
        assert_eq!(forward.version(), reverse.version());
    }

    #[test]
    fn test_export_updates_safe_without_base_is_full() {
        let doc = seeded();
        let exported = doc.export_updates_safe(None);
        assert_eq!(exported.kind, ExportKind::Snapshot);
        let fresh = VaultDocument::from_bytes(&exported.data).unwrap();
        assert_eq!(fresh.to_json(), doc.to_json());

        let version = doc.version();
        let delta = doc.export_updates_safe(Some(&version));
        assert_eq!(delta.kind, ExportKind::Updates);
    }

    #[test]
    fn test_shallow_snapshot_restores_current_values() {
        let doc = seeded();
        for balance in 0..20 {
            doc.set_field("accounts", "acc1", "balance", balance).unwrap();
        }
        let shallow = doc.export_shallow_snapshot().unwrap();
        let restored = VaultDocument::from_bytes(&shallow).unwrap();
        assert_eq!(restored.to_json(), doc.to_json());
    }

    #[test]
    fn test_malformed_import_leaves_document_untouched() {
        let doc = seeded();
        let before = doc.version();
        let json_before = doc.to_json();
        assert!(matches!(
            doc.import_data(&[0xff, 0xff, 0xff]),
            Err(CodecError::Decode(_))
        ));

        let other = VaultDocument::new();
        other.set_field("people", "p9", "name", "Zed").unwrap();
        let good = other.export_snapshot();
        let batch = vec![good, vec![0xde, 0xad]];
        assert!(doc.import_updates(&batch).is_err());

        assert_eq!(doc.version(), before);
        assert_eq!(doc.to_json(), json_before);
    }

    #[test]
    fn test_import_updates_batch() {
        let a = VaultDocument::new();
        a.set_field("people", "p1", "name", "Ana").unwrap();
        let b = VaultDocument::new();
        b.set_field("people", "p2", "name", "Bo").unwrap();

        let merged = VaultDocument::new();
        let n = merged
            .import_updates(&[a.export_snapshot(), b.export_snapshot()])
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(merged.records("people").len(), 2);
    }

    #[test]
    fn test_local_clock_ignores_imports() {
        let remote = seeded();
        let local = VaultDocument::from_bytes(&remote.export_snapshot()).unwrap();
        assert_eq!(local.local_clock(), 0);

        local.set_field("accounts", "acc1", "balance", 7).unwrap();
        let pushed = local.local_clock();
        assert!(pushed > 0);

        remote.set_field("accounts", "acc2", "balance", 8).unwrap();
        local.import_data(&remote.export_snapshot()).unwrap();
        assert_eq!(local.local_clock(), pushed);

        local.set_field("people", "p1", "name", "Ana").unwrap();
        let delta = local.export_updates(Some(&local.local_base(pushed)));

        // The delta carries only the edit made after `pushed`.
        let receiver = VaultDocument::from_bytes(&remote.export_snapshot()).unwrap();
        receiver
            .import_data(&local.export_updates(Some(&local.local_base(0))))
            .unwrap();
        receiver.import_data(&delta).unwrap();
        assert_eq!(receiver.to_json(), local.to_json());

        let partial = VaultDocument::from_bytes(&remote.export_snapshot()).unwrap();
        partial.import_data(&delta).unwrap();
        assert!(partial.records("people").is_empty());
    }

    #[test]
    fn test_version_vector_encoding() {
        let doc = seeded();
        let encoded = doc.version_encoded();
        let decoded = VersionVector::decode(&encoded).unwrap();
        assert_eq!(decoded, doc.version());
        assert_eq!(doc.oplog_version(), doc.version());
        assert!(VersionVector::default().is_empty());
        assert!(doc.version().is_ahead_of(&VersionVector::default()));
        assert!(!doc.version().is_ahead_of(&doc.version()));
    }

    #[test]
    fn test_concurrent_creates_of_same_record_merge_fields() {
        let base = seeded().export_snapshot();
        let a = VaultDocument::from_bytes(&base).unwrap();
        let b = VaultDocument::from_bytes(&base).unwrap();
        let base_version = a.version();

        a.set_field("accounts", "acc9", "name", "Brokerage").unwrap();
        b.set_field("accounts", "acc9", "balance", 250).unwrap();

        let from_a = a.export_updates(Some(&base_version));
        let from_b = b.export_updates(Some(&base_version));
        a.import_data(&from_b).unwrap();
        b.import_data(&from_a).unwrap();

        for doc in [&a, &b] {
            let acc9 = doc.get_record("accounts", "acc9").unwrap();
            assert_eq!(acc9.get("name"), Some(&json!("Brokerage")));
            assert_eq!(acc9.get("balance"), Some(&json!(250)));
        }
        assert_eq!(a.to_json(), b.to_json());
    }

    #[test]
    fn test_record_without_fields_exists() {
        let doc = VaultDocument::new();
        doc.upsert_record("tags", &Record::new("empty")).unwrap();
        let record = doc.get_record("tags", "empty").unwrap();
        assert!(record.fields.is_empty());
        assert_eq!(doc.records("tags").len(), 1);
    }

    #[test]
    fn test_reserved_separator_rejected() {
        let doc = VaultDocument::new();
        assert!(doc.set_field("accounts", "a\u{1f}b", "name", "x").is_err());
        assert!(doc.set_field("accounts", "a", "na\u{1f}me", "x").is_err());
        assert!(doc.set_field("accounts", "a", "", "x").is_err());
        assert!(doc.collections().is_empty());
    }

    #[test]
    fn test_mutated_input_is_rejected_not_panicking() {
        let source = seeded();
        source.soft_delete("accounts", "acc2", 5).unwrap();
        source.set_field("people", "p1", "name", "Ana").unwrap();
        let valid = source.export_snapshot();

        let mut state: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        };

        for round in 0..3000 {
            let mut blob = valid.clone();
            match round % 3 {
                0 => {
                    let i = next() as usize % blob.len();
                    blob[i] ^= (next() as u8) | 1;
                }
                1 => blob.truncate(next() as usize % blob.len()),
                _ => {
                    for _ in 0..4 {
                        let i = next() as usize % blob.len();
                        blob[i] = next() as u8;
                    }
                }
            }

            let target = VaultDocument::new();
            target.set_field("tags", "t1", "label", "keep").unwrap();
            let before = target.to_json();
            if target.import_data(&blob).is_err() {
                assert_eq!(target.to_json(), before, "round {round}");
            }
        }
    }
}
