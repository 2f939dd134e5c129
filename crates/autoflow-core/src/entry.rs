//! Entry — one candidate item flowing through a task.
//!
//! ## Outcome state machine
//! ```text
//! undecided ──accept──▶ accepted ──fail──▶ failed
//!     │                                      ▲
//!     ├──────────reject──────▶ rejected      │
//!     └─────────────────fail─────────────────┘
//! ```
//! `rejected` and `failed` are terminal. Illegal transitions are logged and
//! ignored.
//!
//! Fields keep insertion order. A field is either concrete or lazy; reading a
//! lazy field runs its lookup once and memoizes the result in place.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RenderError;
use crate::lazy::{self, LookupId};
use crate::template::Template;

/// Outcome of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    #[default]
    Undecided,
    Accepted,
    Rejected,
    Failed,
}

impl EntryState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Failed)
    }
}

impl std::fmt::Display for EntryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Undecided => write!(f, "undecided"),
            Self::Accepted => write!(f, "accepted"),
            Self::Rejected => write!(f, "rejected"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Field storage: materialized value or a pending lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    Concrete(Value),
    Lazy(LookupId),
}

/// A candidate item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    fields: Vec<(String, FieldValue)>,
    state: EntryState,
    reason: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    snapshots: HashMap<String, Vec<(String, FieldValue)>>,
}

impl Entry {
    /// Create an entry with `title` and `url`.
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        let mut entry = Self::default();
        entry.set("title", Value::String(title.into()));
        entry.set("url", Value::String(url.into()));
        entry
    }

    /// Build an entry from a JSON object (e.g. `mock` config or list storage).
    pub fn from_map(map: Map<String, Value>) -> Self {
        let mut entry = Self::default();
        for (key, value) in map {
            entry.set(key, value);
        }
        entry
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.fields.iter().position(|(k, _)| k == key)
    }

    /// Read a field, forcing it if lazy.
    pub fn get(&mut self, key: &str) -> Option<&Value> {
        let idx = self.position(key)?;
        if let FieldValue::Lazy(id) = &self.fields[idx].1 {
            let id = id.clone();
            let value = self.evaluate(&id, key);
            self.fields[idx].1 = FieldValue::Concrete(value);
        }
        match &self.fields[idx].1 {
            FieldValue::Concrete(v) => Some(v),
            FieldValue::Lazy(_) => None,
        }
    }

    fn evaluate(&self, id: &LookupId, key: &str) -> Value {
        let Some(lookup) = lazy::resolve(id) else {
            tracing::warn!("⚠️ Lazy lookup '{id}' for field '{key}' is not registered");
            return Value::Null;
        };
        match lookup(self, key) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("⚠️ Lazy lookup '{id}' failed for field '{key}': {e}");
                Value::Null
            }
        }
    }

    /// Read a field without forcing lazy values.
    pub fn peek(&self, key: &str) -> Option<&Value> {
        match self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v) {
            Some(FieldValue::Concrete(v)) => Some(v),
            _ => None,
        }
    }

    /// Convenience: forced string field.
    pub fn get_str(&mut self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn title(&self) -> &str {
        self.peek("title").and_then(Value::as_str).unwrap_or_default()
    }

    pub fn url(&self) -> &str {
        self.peek("url").and_then(Value::as_str).unwrap_or_default()
    }

    /// Set a concrete value, keeping the original insertion position.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.put(key.into(), FieldValue::Concrete(value));
    }

    /// Declare `keys` as lazy, backed by the lookup `id`. Fields that already
    /// hold a concrete value are left alone.
    pub fn set_lazy(&mut self, keys: &[&str], id: &LookupId) {
        for key in keys {
            if self.peek(key).is_none() {
                self.put((*key).to_string(), FieldValue::Lazy(id.clone()));
            }
        }
    }

    fn put(&mut self, key: String, value: FieldValue) {
        match self.position(&key) {
            Some(idx) => self.fields[idx].1 = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    /// Whether `key` is declared lazy and not yet evaluated.
    pub fn is_lazy(&self, key: &str) -> bool {
        matches!(
            self.fields.iter().find(|(k, _)| k == key),
            Some((_, FieldValue::Lazy(_)))
        )
    }

    pub fn remove(&mut self, key: &str) -> Option<FieldValue> {
        let idx = self.position(key)?;
        Some(self.fields.remove(idx).1)
    }

    /// Field names in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    /// `title` and `url` present and non-empty.
    pub fn is_valid(&self) -> bool {
        !self.title().is_empty() && !self.url().is_empty()
    }

    // ── Outcome ─────────────────────────────────────────────

    pub fn state(&self) -> EntryState {
        self.state
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn is_undecided(&self) -> bool {
        self.state == EntryState::Undecided
    }

    pub fn is_accepted(&self) -> bool {
        self.state == EntryState::Accepted
    }

    pub fn is_rejected(&self) -> bool {
        self.state == EntryState::Rejected
    }

    pub fn is_failed(&self) -> bool {
        self.state == EntryState::Failed
    }

    /// `undecided → accepted`. Returns whether the state changed.
    pub fn accept(&mut self, reason: impl Into<String>) -> bool {
        self.transition(EntryState::Accepted, reason.into())
    }

    /// `undecided → rejected`. Returns whether the state changed.
    pub fn reject(&mut self, reason: impl Into<String>) -> bool {
        self.transition(EntryState::Rejected, reason.into())
    }

    /// `undecided | accepted → failed`. Returns whether the state changed.
    pub fn fail(&mut self, reason: impl Into<String>) -> bool {
        self.transition(EntryState::Failed, reason.into())
    }

    fn transition(&mut self, to: EntryState, reason: String) -> bool {
        let legal = matches!(
            (self.state, to),
            (EntryState::Undecided, EntryState::Accepted)
                | (EntryState::Undecided, EntryState::Rejected)
                | (EntryState::Undecided, EntryState::Failed)
                | (EntryState::Accepted, EntryState::Failed)
        );
        if !legal {
            tracing::debug!(
                "Ignoring {} → {} for '{}' ({})",
                self.state,
                to,
                self.title(),
                reason
            );
            return false;
        }
        tracing::debug!("{} '{}': {}", to, self.title(), reason);
        self.state = to;
        self.reason = Some(reason);
        true
    }

    // ── Snapshots ───────────────────────────────────────────

    /// Save the current fields under `name`.
    pub fn take_snapshot(&mut self, name: &str) {
        self.snapshots.insert(name.to_string(), self.fields.clone());
    }

    /// Restore fields from snapshot `name`; the outcome is left untouched.
    pub fn restore_snapshot(&mut self, name: &str) -> bool {
        match self.snapshots.get(name) {
            Some(fields) => {
                self.fields = fields.clone();
                true
            }
            None => false,
        }
    }

    pub fn has_snapshot(&self, name: &str) -> bool {
        self.snapshots.contains_key(name)
    }

    // ── Rendering & export ─────────────────────────────────

    /// Render `template` against this entry's fields (forcing lazy ones) and
    /// then `context`.
    pub fn render(&mut self, template: &str, context: &Map<String, Value>) -> Result<String, RenderError> {
        let parsed = Template::parse(template)?;
        for name in parsed.variables() {
            self.get(name);
        }
        let this = &*self;
        parsed.render(|name| {
            this.peek(name)
                .cloned()
                .or_else(|| context.get(name).cloned())
        })
    }

    /// Force every lazy field.
    pub fn force_all(&mut self) {
        let lazy_keys: Vec<String> = self
            .fields
            .iter()
            .filter(|(_, v)| matches!(v, FieldValue::Lazy(_)))
            .map(|(k, _)| k.clone())
            .collect();
        for key in lazy_keys {
            self.get(&key);
        }
    }

    /// Concrete fields as a JSON object; lazy fields are omitted.
    pub fn to_map(&self) -> Map<String, Value> {
        self.fields
            .iter()
            .filter_map(|(k, v)| match v {
                FieldValue::Concrete(v) => Some((k.clone(), v.clone())),
                FieldValue::Lazy(_) => None,
            })
            .collect()
    }

    /// Dump form: fields plus outcome.
    pub fn to_dump(&self) -> Value {
        let mut map = self.to_map();
        map.insert("state".into(), Value::String(self.state.to_string()));
        if let Some(reason) = &self.reason {
            map.insert("reason".into(), Value::String(reason.clone()));
        }
        Value::Object(map)
    }
}
