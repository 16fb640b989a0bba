//! Hierarchical attribute documents.
//!
//! An [`Attrs`] document is an ordered key/value map plus an ordered list
//! of named child documents. It is the carrier for everything the engine
//! does not model as a typed field: unit snapshots, ability sections,
//! per-terrain tables, movement-type parents.
//!
//! The round-trip contract: any key or child section the engine does not
//! recognize passes through read→write unchanged. Both keys and children
//! keep document order, which downstream consumers rely on (ability scans,
//! the filter connective fold).

use serde::{Deserialize, Serialize};

/// A single attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Text value. Numeric delta strings like `"+20%"` live here.
    Str(String),
    /// Integer value.
    Int(i64),
    /// Boolean value.
    Bool(bool),
}

impl Value {
    /// Render the value as text.
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            Value::Int(i) => i.to_string(),
            Value::Bool(b) => if *b { "yes" } else { "no" }.to_string(),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<u64> for Value {
    fn from(i: u64) -> Self {
        // Ids fit comfortably; saturate rather than wrap on pathological input.
        Value::Int(i64::try_from(i).unwrap_or(i64::MAX))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Parse the leading integer of a string, `atoi`-style.
///
/// Accepts an optional sign followed by digits and ignores any trailing
/// text (so `"+20%"` parses as `20` with its sign applied). Returns `None`
/// when no digits are present.
#[must_use]
pub fn parse_leading_int(s: &str) -> Option<i64> {
    let s = s.trim();
    let (negative, rest) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let digits: &str = {
        let end = rest
            .as_bytes()
            .iter()
            .position(|b| !b.is_ascii_digit())
            .unwrap_or(rest.len());
        &rest[..end]
    };
    if digits.is_empty() {
        return None;
    }
    let value: i64 = digits.parse().ok()?;
    Some(if negative { -value } else { value })
}

/// Interpret a string as a boolean the way the save grammar does.
///
/// `"yes"`, `"on"`, `"true"` and non-zero numbers are true; `"no"`,
/// `"off"`, `"false"` and `"0"` are false; anything else (including the
/// empty string) yields `default`.
#[must_use]
pub fn string_bool(s: &str, default: bool) -> bool {
    match s {
        "yes" | "on" | "true" => true,
        "no" | "off" | "false" | "0" => false,
        _ => match parse_leading_int(s) {
            Some(n) => n != 0,
            None => default,
        },
    }
}

/// An ordered hierarchical key/value + nested-section document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attrs {
    /// Key/value pairs in insertion order.
    #[serde(default)]
    values: Vec<(String, Value)>,
    /// Named child documents in document order.
    #[serde(default)]
    children: Vec<(String, Attrs)>,
}

impl Attrs {
    /// Create an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the document has no values and no children.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.children.is_empty()
    }

    /// Look up a value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// True when the key is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Look up a value and render it as text; absent keys render empty.
    #[must_use]
    pub fn get_text(&self, key: &str) -> String {
        self.get(key).map(Value::to_text).unwrap_or_default()
    }

    /// Look up a string value. Non-string values yield `None`.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(Value::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Look up an integer, tolerating textual encodings.
    #[must_use]
    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        match self.get(key) {
            Some(Value::Int(i)) => *i,
            Some(Value::Str(s)) => parse_leading_int(s).unwrap_or(default),
            Some(Value::Bool(_)) | None => default,
        }
    }

    /// Look up a boolean, tolerating textual encodings.
    #[must_use]
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Str(s)) => string_bool(s, default),
            Some(Value::Int(i)) => *i != 0,
            None => default,
        }
    }

    /// Set a value, replacing any existing entry for the key in place.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        let value = value.into();
        if let Some(slot) = self.values.iter_mut().find(|(k, _)| k == key) {
            slot.1 = value;
        } else {
            self.values.push((key.to_string(), value));
        }
    }

    /// Remove a value by key.
    pub fn remove(&mut self, key: &str) {
        self.values.retain(|(k, _)| k != key);
    }

    /// Iterate over all key/value pairs in insertion order.
    pub fn values(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// First child with the given section name.
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&Attrs> {
        self.children
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c)
    }

    /// Mutable access to the first child with the given section name.
    pub fn child_mut(&mut self, name: &str) -> Option<&mut Attrs> {
        self.children
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c)
    }

    /// First child with the given name, inserting an empty one if absent.
    pub fn child_or_insert(&mut self, name: &str) -> &mut Attrs {
        let pos = match self.children.iter().position(|(n, _)| n == name) {
            Some(p) => p,
            None => {
                self.children.push((name.to_string(), Attrs::new()));
                self.children.len() - 1
            }
        };
        &mut self.children[pos].1
    }

    /// All children with the given section name, in document order.
    pub fn children<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Attrs> + 'a {
        self.children
            .iter()
            .filter(move |(n, _)| n == name)
            .map(|(_, c)| c)
    }

    /// All children regardless of name, in document order.
    pub fn all_children(&self) -> impl Iterator<Item = (&str, &Attrs)> {
        self.children.iter().map(|(n, c)| (n.as_str(), c))
    }

    /// Append a child section.
    pub fn add_child(&mut self, name: &str, child: Attrs) -> &mut Attrs {
        self.children.push((name.to_string(), child));
        let last = self.children.len() - 1;
        &mut self.children[last].1
    }

    /// Remove every child with the given section name.
    pub fn clear_children(&mut self, name: &str) {
        self.children.retain(|(n, _)| n != name);
    }

    /// Remove the `index`-th child with the given section name.
    pub fn remove_child(&mut self, name: &str, index: usize) {
        let mut seen = 0;
        if let Some(pos) = self.children.iter().position(|(n, _)| {
            if n == name {
                let hit = seen == index;
                seen += 1;
                hit
            } else {
                false
            }
        }) {
            self.children.remove(pos);
        }
    }

    /// Retain only children for which the predicate holds.
    pub fn retain_children(&mut self, mut pred: impl FnMut(&str, &Attrs) -> bool) {
        self.children.retain(|(n, c)| pred(n, c));
    }

    /// Merge another document into this one.
    ///
    /// Values overwrite. Children merge positionally per section name: the
    /// n-th `other` child named `s` merges into the n-th existing child
    /// named `s`, extras are appended.
    pub fn merge_with(&mut self, other: &Attrs) {
        for (k, v) in other.values() {
            self.set(k, v.clone());
        }
        let mut seen: Vec<(&str, usize)> = Vec::new();
        for (name, child) in other.all_children() {
            let index = match seen.iter_mut().find(|(n, _)| *n == name) {
                Some(slot) => {
                    slot.1 += 1;
                    slot.1
                }
                None => {
                    seen.push((name, 0));
                    0
                }
            };
            match self.nth_child_mut(name, index) {
                Some(existing) => existing.merge_with(child),
                None => {
                    self.children.push((name.to_string(), child.clone()));
                }
            }
        }
    }

    fn nth_child_mut(&mut self, name: &str, index: usize) -> Option<&mut Attrs> {
        self.children
            .iter_mut()
            .filter(|(n, _)| n == name)
            .map(|(_, c)| c)
            .nth(index)
    }
}
