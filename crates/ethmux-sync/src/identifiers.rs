//! The per-secondary translation maps and the outbound rewrite rules.
//!
//! All three maps are keyed by the *master's* value and valued by the
//! secondary's equivalent. Keys are canonical hex (lowercase, unprefixed,
//! no leading zeros) so that `"0xAB"`, `"0x00ab"` and `"171"` all land on
//! the same entry. Entries are added only as a side effect of observing a
//! matching request/response pair, never pre-populated, and inserts are
//! first-write-wins: nothing in the dispatch path can prove an existing
//! mapping stale, so a conflicting re-insert is logged and ignored.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use ethmux_common::hex::{canonicalize, canonicalize_value, strip_0x};

/// Translation state for one secondary client.
#[derive(Debug, Default)]
pub struct IdentifierMap {
    /// master address -> secondary address (canonical key, formatted value)
    addresses: HashMap<String, String>,
    /// master transaction hash -> secondary transaction hash
    transactions: HashMap<String, String>,
    /// master filter id -> secondary filter id (raw wire value)
    filters: HashMap<String, Value>,
}

impl IdentifierMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that the master's address corresponds to the secondary's.
    pub fn record_address(&mut self, master: &str, secondary: &str) {
        Self::record(&mut self.addresses, "address", master, secondary.to_string());
    }

    /// Records that the master's transaction hash corresponds to the
    /// secondary's.
    pub fn record_transaction(&mut self, master: &str, secondary: &str) {
        Self::record(
            &mut self.transactions,
            "transaction",
            master,
            secondary.to_string(),
        );
    }

    fn record(map: &mut HashMap<String, String>, kind: &str, master: &str, secondary: String) {
        let Some(key) = canonicalize(master) else {
            warn!(kind, master, "cannot canonicalize identifier; not recording");
            return;
        };
        match map.get(&key) {
            Some(existing) if *existing == secondary => {}
            Some(existing) => {
                warn!(
                    kind,
                    master,
                    existing = %existing,
                    proposed = %secondary,
                    "conflicting identifier mapping ignored"
                );
            }
            None => {
                debug!(kind, master, secondary = %secondary, "learned identifier mapping");
                map.insert(key, secondary);
            }
        }
    }

    /// Records a filter-id pair from a filter-creation response.
    pub fn record_filter(&mut self, master: &Value, secondary: &Value) {
        if let Some(key) = canonicalize_value(master) {
            self.filters.entry(key).or_insert_with(|| secondary.clone());
        }
    }

    /// Drops a filter mapping after a successful uninstall.
    pub fn remove_filter(&mut self, master: &Value) {
        if let Some(key) = canonicalize_value(master) {
            self.filters.remove(&key);
        }
    }

    /// The secondary's filter id for the master's, if known.
    pub fn filter_for(&self, master: &Value) -> Option<&Value> {
        self.filters.get(&canonicalize_value(master)?)
    }

    /// The secondary's value for a master-namespace scalar, if the scalar is
    /// a known address or transaction hash.
    pub fn translate_scalar(&self, value: &Value) -> Option<Value> {
        let key = canonicalize_value(value)?;
        let mapped = self
            .addresses
            .get(&key)
            .or_else(|| self.transactions.get(&key))?;
        Some(Value::String(mapped.clone()))
    }

    /// Rewrites a request's params from the master's namespace into this
    /// secondary's.
    ///
    /// - Objects, arrays, and scalars are walked recursively; any scalar
    ///   present in the address or transaction map is substituted.
    /// - A `data` field (ABI-encoded hex blob) gets a textual substring
    ///   substitution of every mapped address, because addresses are
    ///   routinely embedded as constructor or call arguments.
    /// - For filter-consuming methods the first parameter is a filter id
    ///   and is looked up in the filter map; an unknown id is logged and
    ///   left alone rather than failing the call.
    pub fn remap_params(&self, method: &str, params: &Value) -> Value {
        let mut params = params.clone();
        if consumes_filter_id(method) {
            if let Value::Array(items) = &mut params {
                if let Some(first) = items.first_mut() {
                    match self.filter_for(first) {
                        Some(mapped) => *first = mapped.clone(),
                        None => debug!(
                            method,
                            filter_id = %first,
                            "no filter mapping known; forwarding id untranslated"
                        ),
                    }
                }
            }
            return params;
        }
        self.remap_value(&mut params);
        params
    }

    fn remap_value(&self, value: &mut Value) {
        match value {
            Value::Array(items) => {
                for item in items {
                    self.remap_value(item);
                }
            }
            Value::Object(map) => self.remap_object(map),
            scalar => {
                if let Some(mapped) = self.translate_scalar(scalar) {
                    debug!(from = %scalar, to = %mapped, "translated parameter");
                    *scalar = mapped;
                }
            }
        }
    }

    fn remap_object(&self, map: &mut Map<String, Value>) {
        for (key, value) in map.iter_mut() {
            if key == "data" || key == "input" {
                if let Value::String(blob) = value {
                    *blob = self.substitute_in_blob(blob);
                }
                continue;
            }
            self.remap_value(value);
        }
    }

    /// Substitutes every mapped address, in its 20-byte hex form, wherever
    /// it occurs inside a hex blob.
    pub fn substitute_in_blob(&self, blob: &str) -> String {
        let mut body = blob.to_string();
        for (master, secondary) in &self.addresses {
            let needle = format!("{master:0>40}");
            let replacement = format!("{:0>40}", strip_0x(secondary).to_ascii_lowercase());
            if body.contains(&needle) {
                body = body.replace(&needle, &replacement);
            }
        }
        body
    }

    pub fn address_count(&self) -> usize {
        self.addresses.len()
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    pub fn filter_count(&self) -> usize {
        self.filters.len()
    }
}

/// True when the method's first parameter names an existing filter.
fn consumes_filter_id(method: &str) -> bool {
    let method = method.to_ascii_lowercase();
    method.contains("filter") && (method.contains("get") || method == "eth_uninstallfilter")
}

/// True when the method creates a filter and returns its id.
pub(crate) fn creates_filter(method: &str) -> bool {
    let method = method.to_ascii_lowercase();
    method.contains("filter") && method.contains("new")
}
