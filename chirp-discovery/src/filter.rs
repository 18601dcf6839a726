use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value};

const VALUE_JSON: &str = "value_json.";

/// Tree of the payload paths referenced by value templates.
///
/// An empty `Object` passes its whole value through. `Array` marks a path
/// segment written with an index (`rxInfo[-1]`); only the last element of
/// such an array is kept.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldFilter {
    Object(BTreeMap<String, FieldFilter>),
    Array(Box<FieldFilter>),
}

impl Default for FieldFilter {
    fn default() -> Self {
        Self::Object(BTreeMap::new())
    }
}

/// Payload paths (`object.counter`, `rxInfo[-1].rssi`) referenced by a
/// template through `value_json.`.
pub fn referenced_paths(template: &str) -> impl Iterator<Item = &str> {
    template.match_indices(VALUE_JSON).filter_map(move |(start, _)| {
        let rest = &template[start + VALUE_JSON.len()..];
        let end = rest
            .find(|c: char| !(c.is_alphanumeric() || matches!(c, '_' | '.' | '[' | ']' | '-')))
            .unwrap_or(rest.len());
        let path = rest[..end].trim_end_matches('.');
        (!path.is_empty()).then_some(path)
    })
}

impl FieldFilter {
    pub fn from_templates<'a>(templates: impl IntoIterator<Item = &'a str>) -> Self {
        let mut filter = Self::default();
        for template in templates {
            for path in referenced_paths(template) {
                filter.insert_path(path);
            }
        }
        filter
    }

    pub fn is_pass_through(&self) -> bool {
        matches!(self, Self::Object(fields) if fields.is_empty())
    }

    fn insert_path(&mut self, path: &str) {
        let mut node = self;
        for segment in path.split('.') {
            let (name, indexed) = match segment.split_once('[') {
                Some((name, _)) => (name, true),
                None => (segment, false),
            };
            if name.is_empty() {
                break;
            }
            let Self::Object(fields) = node else {
                break;
            };
            let child = fields.entry(name.to_string()).or_insert_with(|| {
                if indexed { Self::Array(Box::default()) } else { Self::default() }
            });
            node = match child {
                Self::Array(element) => element.as_mut(),
                object => object,
            };
        }
    }

    /// Joins `old` and `new` under this filter. Only absent or `null`
    /// values count as missing; the newer value wins at every leaf.
    pub fn merge(&self, old: Option<&Value>, new: Option<&Value>) -> Option<Value> {
        let old = old.filter(|v| !v.is_null());
        let new = new.filter(|v| !v.is_null());
        if old.is_none() && new.is_none() {
            return None;
        }
        match self {
            Self::Object(fields) if fields.is_empty() => new.or(old).cloned(),
            Self::Object(fields) => {
                let mut joined = Map::new();
                for (key, child) in fields {
                    let o = old.and_then(|v| v.get(key));
                    let n = new.and_then(|v| v.get(key));
                    if let Some(value) = child.merge(o, n) {
                        joined.insert(key.clone(), value);
                    }
                }
                Some(Value::Object(joined))
            }
            Self::Array(element) => {
                // Keeps the last element of each side, never the first.
                let o = old.and_then(Value::as_array).and_then(|items| items.last());
                let n = new.and_then(Value::as_array).and_then(|items| items.last());
                let last = element.merge(o, n).unwrap_or_else(|| Value::Object(Map::new()));
                Some(Value::Array(vec![last]))
            }
        }
    }

    /// Merge of a payload into a cached object; a payload that is not an
    /// object leaves the cache as it was.
    pub fn join(&self, cached: &Map<String, Value>, payload: &Value) -> Map<String, Value> {
        let old = Value::Object(cached.clone());
        match self.merge(Some(&old), Some(payload)) {
            Some(Value::Object(joined)) => joined,
            _ => cached.clone(),
        }
    }
}

/// Latest known values per device, constrained by the pass's filter.
#[derive(Debug, Default)]
pub struct ValueCache {
    filter: FieldFilter,
    entries: HashMap<String, Map<String, Value>>,
}

impl ValueCache {
    /// Drops every cached value and starts over with one empty entry per device.
    pub fn reset(&mut self, filter: FieldFilter, devices: impl IntoIterator<Item = String>) {
        self.filter = filter;
        self.entries = devices.into_iter().map(|eui| (eui, Map::new())).collect();
    }

    pub fn filter(&self) -> &FieldFilter {
        &self.filter
    }

    pub fn contains(&self, dev_eui: &str) -> bool {
        self.entries.contains_key(dev_eui)
    }

    pub fn is_empty_for(&self, dev_eui: &str) -> bool {
        self.entries.get(dev_eui).is_some_and(Map::is_empty)
    }

    /// Devices whose cache has not been filled yet.
    pub fn pending(&self) -> usize {
        self.entries.values().filter(|values| values.is_empty()).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merges `payload` into the device's entry. Unknown devices are left
    /// alone and yield `None`.
    pub fn merge(&mut self, dev_eui: &str, payload: &Value) -> Option<&Map<String, Value>> {
        let entry = self.entries.get_mut(dev_eui)?;
        *entry = self.filter.join(entry, payload);
        Some(entry)
    }

    /// Copy of the device's entry stamped with `time_stamp`; the cache
    /// itself never stores the stamp.
    pub fn snapshot(&self, dev_eui: &str, time_stamp: f64) -> Option<Map<String, Value>> {
        let mut snapshot = self.entries.get(dev_eui)?.clone();
        snapshot.insert("time_stamp".into(), Value::from(time_stamp));
        Some(snapshot)
    }
}
