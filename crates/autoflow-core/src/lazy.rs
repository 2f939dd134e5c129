//! Side table of lazy field lookups.
//!
//! Entries only store a [`LookupId`] for a lazy field; the function lives here,
//! so an [`Entry`](crate::entry::Entry) stays plain, serializable data.
//! Plugins register their lookups once at startup.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entry::Entry;

/// Identifier of a registered lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LookupId(pub String);

impl LookupId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for LookupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lookup function: receives the entry (lazy fields unforced) and the field
/// name being read, returns the concrete value.
pub type LookupFn = dyn Fn(&Entry, &str) -> Result<Value, String> + Send + Sync;

static LOOKUPS: LazyLock<RwLock<HashMap<LookupId, Arc<LookupFn>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Register (or replace) a lookup under `id`.
pub fn register_lookup<F>(id: impl Into<String>, lookup: F) -> LookupId
where
    F: Fn(&Entry, &str) -> Result<Value, String> + Send + Sync + 'static,
{
    let id = LookupId::new(id);
    match LOOKUPS.write() {
        Ok(mut table) => {
            table.insert(id.clone(), Arc::new(lookup));
        }
        Err(poisoned) => {
            poisoned.into_inner().insert(id.clone(), Arc::new(lookup));
        }
    }
    id
}

/// Resolve a lookup by id.
pub fn resolve(id: &LookupId) -> Option<Arc<LookupFn>> {
    match LOOKUPS.read() {
        Ok(table) => table.get(id).cloned(),
        Err(poisoned) => poisoned.into_inner().get(id).cloned(),
    }
}

/// Whether a lookup id is registered.
pub fn is_registered(id: &LookupId) -> bool {
    resolve(id).is_some()
}
