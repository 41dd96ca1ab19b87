//! Typed, hierarchical key-value scratchpad shared by the steps of one flow run.
//!
//! A `Context` maps string keys to [`ContextValue`]s. Typed getters never
//! coerce: reading a key through the wrong accessor fails with
//! [`StrandError::ContextType`].
//!
//! Parallel fan-out derives isolated children with [`Context::create_child`].
//! A child remembers which keys it wrote or deleted, and [`Context::absorb`]
//! folds exactly those changes back into the parent.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn, Span};
use uuid::Uuid;

use strand_core::error::{Result, StrandError};
use strand_core::types::{MediaData, ValueKind};

/// Identity of a context instance.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ContextId(pub Uuid);

impl ContextId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A value stored in a context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum ContextValue {
    String(String),
    Bytes(Vec<u8>),
    Int(i64),
    Float(f64),
    Bool(bool),
    Array(Vec<ContextValue>),
    Object(serde_json::Value),
    Media(MediaData),
}

impl ContextValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::String(_) => ValueKind::String,
            Self::Bytes(_) => ValueKind::Bytes,
            Self::Int(_) => ValueKind::Int,
            Self::Float(_) => ValueKind::Float,
            Self::Bool(_) => ValueKind::Bool,
            Self::Array(_) => ValueKind::Array,
            Self::Object(_) => ValueKind::Object,
            Self::Media(_) => ValueKind::Media,
        }
    }

    /// Wrap arbitrary JSON as an object value without inspecting it.
    pub fn object(value: serde_json::Value) -> Self {
        Self::Object(value)
    }

    /// Convert JSON into the closest typed value.
    ///
    /// Strings, booleans and numbers map to their scalar kinds (integers that
    /// fit `i64` become `Int`, other numbers `Float`), arrays map element-wise,
    /// and objects and `null` are kept as `Object`.
    pub fn from_json(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::String(s) => Self::String(s),
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::Array(items) => Self::Array(items.into_iter().map(Self::from_json).collect()),
            other @ (Value::Object(_) | Value::Null) => Self::Object(other),
        }
    }

    /// Plain JSON rendering (no kind tags). Bytes become an array of numbers.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            Self::String(s) => Value::String(s.clone()),
            Self::Bytes(b) => Value::Array(b.iter().map(|byte| Value::from(*byte)).collect()),
            Self::Int(i) => Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::Bool(b) => Value::Bool(*b),
            Self::Array(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Object(v) => v.clone(),
            Self::Media(m) => serde_json::to_value(m).unwrap_or(Value::Null),
        }
    }
}

impl From<String> for ContextValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for ContextValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<Vec<u8>> for ContextValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<&[u8]> for ContextValue {
    fn from(v: &[u8]) -> Self {
        Self::Bytes(v.to_vec())
    }
}

impl From<i64> for ContextValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for ContextValue {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<f64> for ContextValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for ContextValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<Vec<ContextValue>> for ContextValue {
    fn from(v: Vec<ContextValue>) -> Self {
        Self::Array(v)
    }
}

impl From<MediaData> for ContextValue {
    fn from(v: MediaData) -> Self {
        Self::Media(v)
    }
}

/// Serialized form used by `serialize`/`deserialize`.
#[derive(Serialize, Deserialize)]
struct ContextSnapshot {
    id: ContextId,
    created_at: DateTime<Utc>,
    #[serde(default)]
    parent: Option<ContextId>,
    values: BTreeMap<String, ContextValue>,
}

/// The scratchpad for a single flow execution.
#[derive(Debug, Clone)]
pub struct Context {
    id: ContextId,
    created_at: DateTime<Utc>,
    parent: Option<ContextId>,
    values: BTreeMap<String, ContextValue>,
    written: BTreeSet<String>,
    deleted: BTreeSet<String>,
    span: Span,
}

impl Context {
    /// Create an empty root context with its own `context` span.
    pub fn new() -> Self {
        let id = ContextId::new();
        let span = tracing::debug_span!("context", id = %id);
        Self::with_identity(id, span)
    }

    /// Create an empty root context logging into the given span.
    pub fn with_span(span: Span) -> Self {
        Self::with_identity(ContextId::new(), span)
    }

    fn with_identity(id: ContextId, span: Span) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            parent: None,
            values: BTreeMap::new(),
            written: BTreeSet::new(),
            deleted: BTreeSet::new(),
            span,
        }
    }

    /// Build a root context from a JSON object; each field becomes a key.
    pub fn from_json_object(input: serde_json::Value, span: Span) -> Result<Self> {
        let serde_json::Value::Object(fields) = input else {
            return Err(StrandError::Validation(format!(
                "flow input must be a JSON object, got {}",
                json_type_name(&input)
            )));
        };
        let mut ctx = Self::with_span(span);
        for (key, value) in fields {
            ctx.set(key, ContextValue::from_json(value));
        }
        Ok(ctx)
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Identity of the context this one was derived from (lineage only).
    pub fn parent(&self) -> Option<ContextId> {
        self.parent
    }

    /// The span this context logs into.
    pub fn span(&self) -> &Span {
        &self.span
    }

    // ── Untyped access ──────────────────────────────────────────

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ContextValue>) {
        let key = key.into();
        self.deleted.remove(&key);
        self.written.insert(key.clone());
        self.values.insert(key, value.into());
    }

    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        self.values.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Remove a key, returning its value.
    pub fn delete(&mut self, key: &str) -> Option<ContextValue> {
        let removed = self.values.remove(key);
        if removed.is_some() {
            self.written.remove(key);
            self.deleted.insert(key.to_string());
        }
        removed
    }

    pub fn clear(&mut self) {
        let keys: Vec<String> = self.values.keys().cloned().collect();
        self.deleted.extend(keys);
        self.written.clear();
        self.values.clear();
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn lookup(&self, key: &str) -> Result<&ContextValue> {
        self.values
            .get(key)
            .ok_or_else(|| StrandError::ContextKeyNotFound(key.to_string()))
    }

    // ── Typed access ────────────────────────────────────────────

    pub fn set_string(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.set(key, ContextValue::String(value.into()));
    }

    pub fn get_string(&self, key: &str) -> Result<&str> {
        match self.lookup(key)? {
            ContextValue::String(s) => Ok(s),
            other => Err(mismatch(key, ValueKind::String, other)),
        }
    }

    pub fn set_bytes(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.set(key, ContextValue::Bytes(value.into()));
    }

    pub fn get_bytes(&self, key: &str) -> Result<&[u8]> {
        match self.lookup(key)? {
            ContextValue::Bytes(b) => Ok(b),
            other => Err(mismatch(key, ValueKind::Bytes, other)),
        }
    }

    pub fn set_int(&mut self, key: impl Into<String>, value: i64) {
        self.set(key, ContextValue::Int(value));
    }

    pub fn get_int(&self, key: &str) -> Result<i64> {
        match self.lookup(key)? {
            ContextValue::Int(i) => Ok(*i),
            other => Err(mismatch(key, ValueKind::Int, other)),
        }
    }

    pub fn set_float(&mut self, key: impl Into<String>, value: f64) {
        self.set(key, ContextValue::Float(value));
    }

    pub fn get_float(&self, key: &str) -> Result<f64> {
        match self.lookup(key)? {
            ContextValue::Float(f) => Ok(*f),
            other => Err(mismatch(key, ValueKind::Float, other)),
        }
    }

    pub fn set_bool(&mut self, key: impl Into<String>, value: bool) {
        self.set(key, ContextValue::Bool(value));
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        match self.lookup(key)? {
            ContextValue::Bool(b) => Ok(*b),
            other => Err(mismatch(key, ValueKind::Bool, other)),
        }
    }

    pub fn set_array(&mut self, key: impl Into<String>, value: Vec<ContextValue>) {
        self.set(key, ContextValue::Array(value));
    }

    pub fn get_array(&self, key: &str) -> Result<&[ContextValue]> {
        match self.lookup(key)? {
            ContextValue::Array(items) => Ok(items),
            other => Err(mismatch(key, ValueKind::Array, other)),
        }
    }

    pub fn set_object(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.set(key, ContextValue::Object(value));
    }

    pub fn get_object(&self, key: &str) -> Result<&serde_json::Value> {
        match self.lookup(key)? {
            ContextValue::Object(v) => Ok(v),
            other => Err(mismatch(key, ValueKind::Object, other)),
        }
    }

    // ── Media ───────────────────────────────────────────────────

    pub fn set_media(&mut self, key: impl Into<String>, media: MediaData) {
        self.set(key, ContextValue::Media(media));
    }

    pub fn get_media(&self, key: &str) -> Result<&MediaData> {
        match self.lookup(key)? {
            ContextValue::Media(m) => Ok(m),
            other => Err(mismatch(key, ValueKind::Media, other)),
        }
    }

    /// Media entries whose key starts with `prefix`, ordered by numeric
    /// suffix (`img_2` before `img_10`), then by key. Non-media values under
    /// the prefix are skipped.
    pub fn get_all_media(&self, prefix: &str) -> Vec<(&str, &MediaData)> {
        let mut entries: Vec<(Option<u64>, &str, &MediaData)> = self
            .values
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter_map(|(k, v)| match v {
                ContextValue::Media(m) => Some((media_index(prefix, k), k.as_str(), m)),
                _ => None,
            })
            .collect();
        entries.sort_by(|a, b| {
            (a.0.is_none(), a.0, a.1).cmp(&(b.0.is_none(), b.0, b.1))
        });
        entries.into_iter().map(|(_, k, m)| (k, m)).collect()
    }

    /// Append media to the `{prefix}_{n}` collection, continuing after the
    /// highest existing index. Returns the number of entries added.
    pub fn accumulate_media(
        &mut self,
        prefix: &str,
        items: impl IntoIterator<Item = MediaData>,
    ) -> usize {
        let mut next = self
            .values
            .keys()
            .filter_map(|k| media_index(prefix, k))
            .max()
            .map_or(Some(0), |max| max.checked_add(1));

        let mut added = 0;
        for media in items {
            let Some(index) = next else {
                warn!(prefix, added, "Media index space exhausted, dropping remaining items");
                break;
            };
            self.set_media(format!("{}_{}", prefix, index), media);
            next = index.checked_add(1);
            added += 1;
        }
        added
    }

    // ── Hierarchy ───────────────────────────────────────────────

    /// Derive an isolated child holding a copy of this context's values.
    ///
    /// The child starts with an empty change set; only keys it writes or
    /// deletes are carried back by [`Context::absorb`].
    pub fn create_child(&self) -> Context {
        let id = ContextId::new();
        let span = tracing::debug_span!(parent: &self.span, "context", id = %id);
        Context {
            id,
            created_at: Utc::now(),
            parent: Some(self.id),
            values: self.values.clone(),
            written: BTreeSet::new(),
            deleted: BTreeSet::new(),
            span,
        }
    }

    /// Right-biased merge: every key in `other` overwrites the same key here.
    pub fn merge(&mut self, other: &Context) {
        for (key, value) in &other.values {
            self.set(key.clone(), value.clone());
        }
        let _enter = self.span.enter();
        debug!(from = %other.id, keys = other.values.len(), "Merged context");
    }

    /// Fold a child's changes (writes and deletes) back into this context.
    pub fn absorb(&mut self, mut child: Context) {
        for key in &child.deleted {
            self.delete(key);
        }
        let written = std::mem::take(&mut child.written);
        for key in &written {
            if let Some(value) = child.values.remove(key) {
                self.set(key.clone(), value);
            }
        }
        let _enter = self.span.enter();
        debug!(
            child = %child.id,
            written = written.len(),
            deleted = child.deleted.len(),
            "Absorbed child context"
        );
    }

    /// Keys written since this context was created.
    pub fn written_keys(&self) -> impl Iterator<Item = &str> {
        self.written.iter().map(String::as_str)
    }

    // ── Diagnostics ─────────────────────────────────────────────

    /// Serialize identity and values as JSON bytes. Not a persistence format.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let snapshot = ContextSnapshot {
            id: self.id,
            created_at: self.created_at,
            parent: self.parent,
            values: self.values.clone(),
        };
        Ok(serde_json::to_vec(&snapshot)?)
    }

    /// Restore a context produced by [`Context::serialize`].
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let snapshot: ContextSnapshot = serde_json::from_slice(bytes)?;
        let span = tracing::debug_span!("context", id = %snapshot.id);
        Ok(Self {
            id: snapshot.id,
            created_at: snapshot.created_at,
            parent: snapshot.parent,
            values: snapshot.values,
            written: BTreeSet::new(),
            deleted: BTreeSet::new(),
            span,
        })
    }

    /// Plain JSON object of all values.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

fn mismatch(key: &str, expected: ValueKind, actual: &ContextValue) -> StrandError {
    StrandError::ContextType {
        key: key.to_string(),
        expected,
        actual: actual.kind(),
    }
}

/// Numeric suffix of `{prefix}_{n}` / `{prefix}{n}` keys.
fn media_index(prefix: &str, key: &str) -> Option<u64> {
    key.strip_prefix(prefix)
        .map(|rest| rest.trim_start_matches('_'))
        .and_then(|rest| rest.parse().ok())
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_typed_round_trips() {
        let mut ctx = Context::new();
        let media = MediaData::from_url("https://example.com/a.png");

        ctx.set_string("s", "hello");
        ctx.set_bytes("b", vec![0u8, 1, 255]);
        ctx.set_int("i", -42);
        ctx.set_float("f", 2.5);
        ctx.set_bool("t", true);
        ctx.set_array("a", vec![ContextValue::Int(1), ContextValue::from("x")]);
        ctx.set_object("o", json!({"nested": {"n": 1}}));
        ctx.set_media("m", media.clone());

        assert_eq!(ctx.get_string("s").unwrap(), "hello");
        assert_eq!(ctx.get_bytes("b").unwrap(), &[0u8, 1, 255]);
        assert_eq!(ctx.get_int("i").unwrap(), -42);
        assert_eq!(ctx.get_float("f").unwrap(), 2.5);
        assert!(ctx.get_bool("t").unwrap());
        assert_eq!(
            ctx.get_array("a").unwrap(),
            &[ContextValue::Int(1), ContextValue::String("x".into())]
        );
        assert_eq!(ctx.get_object("o").unwrap()["nested"]["n"], 1);
        assert_eq!(ctx.get_media("m").unwrap(), &media);
        assert_eq!(ctx.len(), 8);
    }

    #[test]
    fn test_type_mismatch_is_an_error() {
        let mut ctx = Context::new();
        ctx.set_string("count", "3");

        let err = ctx.get_int("count").unwrap_err();
        match err {
            StrandError::ContextType {
                key,
                expected,
                actual,
            } => {
                assert_eq!(key, "count");
                assert_eq!(expected, ValueKind::Int);
                assert_eq!(actual, ValueKind::String);
            }
            other => panic!("unexpected error: {other}"),
        }
        // Failed reads leave the value untouched.
        assert_eq!(ctx.get_string("count").unwrap(), "3");
    }

    #[test]
    fn test_missing_key() {
        let ctx = Context::new();
        assert!(matches!(
            ctx.get_string("nope"),
            Err(StrandError::ContextKeyNotFound(k)) if k == "nope"
        ));
    }

    #[test]
    fn test_has_delete_clear_keys() {
        let mut ctx = Context::new();
        ctx.set_int("b", 2);
        ctx.set_int("a", 1);
        assert!(ctx.has("a"));
        assert_eq!(ctx.keys(), vec!["a", "b"]);

        assert_eq!(ctx.delete("a"), Some(ContextValue::Int(1)));
        assert_eq!(ctx.delete("a"), None);
        assert!(!ctx.has("a"));

        ctx.clear();
        assert!(ctx.is_empty());
    }

    #[test]
    fn test_merge_is_right_biased() {
        let mut base = Context::new();
        base.set_int("x", 1);
        base.set_string("only_base", "kept");

        let mut other = Context::new();
        other.set_int("x", 2);
        other.set_bool("only_other", true);

        base.merge(&other);

        assert_eq!(base.get_int("x").unwrap(), 2);
        assert_eq!(base.get_string("only_base").unwrap(), "kept");
        assert!(base.get_bool("only_other").unwrap());
    }

    #[test]
    fn test_child_is_isolated_and_tracks_lineage() {
        let mut parent = Context::new();
        parent.set_string("input", "shared");

        let mut child = parent.create_child();
        assert_eq!(child.parent(), Some(parent.id()));
        assert_ne!(child.id(), parent.id());
        assert_eq!(child.get_string("input").unwrap(), "shared");

        child.set_string("input", "changed in child");
        child.set_int("result", 7);

        assert_eq!(parent.get_string("input").unwrap(), "shared");
        assert!(!parent.has("result"));
    }

    #[test]
    fn test_absorb_applies_only_child_changes() {
        let mut parent = Context::new();
        parent.set_string("shared", "original");
        parent.set_string("doomed", "bye");

        let mut first = parent.create_child();
        let second = parent.create_child();
        first.set_string("shared", "from first");
        first.delete("doomed");

        parent.absorb(first);
        // `second` never touched "shared"; its inherited copy must not win.
        parent.absorb(second);

        assert_eq!(parent.get_string("shared").unwrap(), "from first");
        assert!(!parent.has("doomed"));
    }

    #[test]
    fn test_absorb_in_order_resolves_collisions() {
        let mut parent = Context::new();
        let mut first = parent.create_child();
        let mut second = parent.create_child();
        first.set_int("winner", 1);
        second.set_int("winner", 2);

        parent.absorb(first);
        parent.absorb(second);
        assert_eq!(parent.get_int("winner").unwrap(), 2);
    }

    #[test]
    fn test_accumulate_and_collect_media() {
        let mut ctx = Context::new();
        ctx.set_media("frame_0", MediaData::from_url("f0.png"));
        ctx.set_string("frame_note", "not media");

        let added = ctx.accumulate_media(
            "frame",
            (1..=10).map(|i| MediaData::from_url(format!("f{i}.png"))),
        );
        assert_eq!(added, 10);
        assert!(ctx.has("frame_10"));

        let all = ctx.get_all_media("frame");
        assert_eq!(all.len(), 11);
        assert_eq!(all[0].0, "frame_0");
        assert_eq!(all[2].0, "frame_2");
        assert_eq!(all[10].0, "frame_10");
        assert_eq!(all[10].1.url, "f10.png");
    }

    #[test]
    fn test_accumulate_into_empty_collection() {
        let mut ctx = Context::new();
        ctx.accumulate_media("img", vec![MediaData::from_url("a.jpg")]);
        assert_eq!(ctx.get_media("img_0").unwrap().url, "a.jpg");
    }

    #[test]
    fn test_accumulate_stops_at_index_limit() {
        let mut ctx = Context::new();
        ctx.set_media(format!("img_{}", u64::MAX), MediaData::from_url("last.jpg"));

        let added = ctx.accumulate_media("img", vec![MediaData::from_url("a.jpg")]);
        assert_eq!(added, 0);
        assert_eq!(ctx.get_all_media("img").len(), 1);
    }

    #[test]
    fn test_clone_is_deep() {
        let mut ctx = Context::new();
        ctx.set_array("list", vec![ContextValue::Int(1)]);
        let copy = ctx.clone();
        ctx.set_array("list", vec![]);
        assert_eq!(copy.get_array("list").unwrap().len(), 1);
    }

    #[test]
    fn test_serialize_restores_values_and_identity() {
        let mut ctx = Context::new();
        ctx.set_float("score", 0.75);
        ctx.set_media("doc", MediaData::from_bytes(vec![1, 2], "application/pdf"));

        let bytes = ctx.serialize().unwrap();
        let restored = Context::deserialize(&bytes).unwrap();

        assert_eq!(restored.id(), ctx.id());
        assert_eq!(restored.get_float("score").unwrap(), 0.75);
        assert_eq!(restored.get_media("doc").unwrap().size, 2);
    }

    #[test]
    fn test_to_json_is_untagged() {
        let mut ctx = Context::new();
        ctx.set_string("name", "strand");
        ctx.set_int("n", 3);
        assert_eq!(ctx.to_json(), json!({"name": "strand", "n": 3}));
    }

    #[test]
    fn test_from_json_object() {
        let ctx = Context::from_json_object(
            json!({"in": "hello", "n": 4, "ratio": 0.5, "tags": ["a"], "meta": {"k": 1}}),
            Span::none(),
        )
        .unwrap();
        assert_eq!(ctx.get_string("in").unwrap(), "hello");
        assert_eq!(ctx.get_int("n").unwrap(), 4);
        assert_eq!(ctx.get_float("ratio").unwrap(), 0.5);
        assert_eq!(ctx.get_array("tags").unwrap().len(), 1);
        assert_eq!(ctx.get_object("meta").unwrap(), &json!({"k": 1}));

        let err = Context::from_json_object(json!([1, 2]), Span::none()).unwrap_err();
        assert!(matches!(err, StrandError::Validation(_)));
    }
}
