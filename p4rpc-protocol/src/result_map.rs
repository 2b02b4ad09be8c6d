//! Flattened, key-addressable view of a packet.

use crate::charset::TextCodec;
use crate::packet::Field;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

/// Field whose first value always wins; some servers repeat it.
pub const FIRST_WINS_FIELD: &str = "func2";

/// A single flattened value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ResultValue {
    Text(String),
    Bytes(Vec<u8>),
}

impl ResultValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ResultValue::Text(s) => Some(s),
            ResultValue::Bytes(_) => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ResultValue::Text(s) => s.as_bytes(),
            ResultValue::Bytes(b) => b,
        }
    }
}

impl fmt::Display for ResultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultValue::Text(s) => f.write_str(s),
            ResultValue::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<String> for ResultValue {
    fn from(s: String) -> Self {
        ResultValue::Text(s)
    }
}

impl From<&str> for ResultValue {
    fn from(s: &str) -> Self {
        ResultValue::Text(s.to_owned())
    }
}

/// Insertion-ordered map of unique keys.
///
/// Repeated names are disambiguated with the first free numeric suffix:
/// `change`, `change0`, `change1`, ...
#[derive(Clone, Default)]
pub struct ResultMap {
    entries: Vec<(String, ResultValue)>,
    index: HashMap<String, usize>,
    /// Lowest suffix per base name that may still be free.
    next_suffix: HashMap<String, u32>,
}

impl ResultMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flattens packet fields, decoding values with `codec` where possible.
    /// Values the codec rejects are kept as raw bytes.
    pub fn from_fields(fields: &[Field], codec: &dyn TextCodec) -> Self {
        let mut map = Self::new();
        map.extend_fields(fields, codec);
        map
    }

    /// Flattens `fields` after the entries already present.
    pub fn extend_fields(&mut self, fields: &[Field], codec: &dyn TextCodec) {
        for field in fields {
            let value = match codec.decode(&field.value) {
                Ok(text) => ResultValue::Text(text),
                Err(_) => ResultValue::Bytes(field.value.to_vec()),
            };
            self.insert(&field.name, value);
        }
    }

    /// Adds a value under `name` following the flattening rules.
    pub fn insert(&mut self, name: &str, value: impl Into<ResultValue>) {
        let value = value.into();
        if !self.contains_key(name) {
            self.push(name.to_owned(), value);
            return;
        }
        if name.eq_ignore_ascii_case(FIRST_WINS_FIELD) {
            return;
        }

        // Keys are never removed, so suffixes below the cursor stay taken.
        let mut suffix = self.next_suffix.get(name).copied().unwrap_or(0);
        let key = loop {
            let candidate = format!("{name}{suffix}");
            suffix += 1;
            if !self.contains_key(&candidate) {
                break candidate;
            }
        };
        self.next_suffix.insert(name.to_owned(), suffix);
        self.push(key, value);
    }

    /// Sets `name` only if no value is present yet.
    pub fn insert_unique(&mut self, name: &str, value: impl Into<ResultValue>) {
        if !self.contains_key(name) {
            self.push(name.to_owned(), value.into());
        }
    }

    fn push(&mut self, key: String, value: ResultValue) {
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push((key, value));
    }

    pub fn get(&self, name: &str) -> Option<&ResultValue> {
        self.index.get(name).map(|&i| &self.entries[i].1)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(ResultValue::as_str)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ResultValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }
}

impl PartialEq for ResultMap {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl Eq for ResultMap {}

impl fmt::Debug for ResultMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl Serialize for ResultMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}
