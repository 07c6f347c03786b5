//! Canonical byte form for structured artifacts
//!
//! Provides [`Canonicalizer`], which turns a JSON tree into a deterministic
//! byte sequence:
//!
//! - object keys are sorted lexicographically (by UTF-8 bytes)
//! - array order is preserved
//! - fields matched by the [`AllowList`] are stripped first
//! - numbers use one normalized spelling with no exponent
//! - output is compact UTF-8 with no trailing whitespace
//!
//! Two artifacts that differ only in key order or in allow-listed fields
//! canonicalize to the same bytes.

use crate::hash::CanonicalHash;
use serde_json::{Map, Number, Value};
use std::fmt::{self, Display, Formatter, Write as _};
use std::str::FromStr;

/// Allow-list applied to artifacts when no other list is configured.
pub const DEFAULT_ALLOW_LIST: &[&str] = &["created_at", "_meta.*", "_replay.*"];

/// Floats with an integral value below this magnitude print as integers.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

/// One segment of a [`FieldPath`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// Exact object key
    Key(String),
    /// Any object key (`*`)
    Any,
}

impl Segment {
    fn matches(&self, key: &str) -> bool {
        match self {
            Self::Key(k) => k == key,
            Self::Any => true,
        }
    }
}

/// Dotted field path anchored at the artifact root
///
/// # Examples
/// - `created_at` strips the top-level `created_at` key
/// - `_meta.*` strips every child of `_meta`, then `_meta` itself once empty
/// - `payload.*.trace_id` strips `trace_id` one level under `payload`
///
/// Paths address object keys only; arrays are never descended.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath(Vec<Segment>);

impl FieldPath {
    /// Path consisting of a single key
    #[inline]
    #[must_use]
    pub fn key(key: impl Into<String>) -> Self {
        Self(vec![Segment::Key(key.into())])
    }

    /// Extend with an exact key, returning new path
    #[inline]
    #[must_use]
    pub fn child(mut self, key: impl Into<String>) -> Self {
        self.0.push(Segment::Key(key.into()));
        self
    }

    /// Extend with a `*` segment, returning new path
    #[inline]
    #[must_use]
    pub fn wildcard(mut self) -> Self {
        self.0.push(Segment::Any);
        self
    }

    /// Path segments from root to leaf
    #[inline]
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.0
    }
}

impl Display for FieldPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_char('.')?;
            }
            match segment {
                Segment::Key(k) => f.write_str(k)?,
                Segment::Any => f.write_char('*')?,
            }
        }
        Ok(())
    }
}

impl FromStr for FieldPath {
    type Err = CanonicalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(CanonicalError::EmptyPath);
        }

        let segments = s
            .split('.')
            .map(|seg| match seg {
                "" => Err(CanonicalError::EmptySegment(s.to_string())),
                "*" => Ok(Segment::Any),
                key => Ok(Segment::Key(key.to_string())),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self(segments))
    }
}

/// Set of field paths excluded from canonical form
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList(Vec<FieldPath>);

impl AllowList {
    /// Empty list: nothing is stripped
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// `created_at`, `_meta.*` and `_replay.*`
    #[must_use]
    pub fn artifact_default() -> Self {
        Self(vec![
            FieldPath::key("created_at"),
            FieldPath::key("_meta").wildcard(),
            FieldPath::key("_replay").wildcard(),
        ])
    }

    /// Parse a list of dotted paths
    ///
    /// # Errors
    /// Returns error on an empty path or an empty segment
    pub fn parse<I, S>(paths: I) -> Result<Self, CanonicalError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        paths
            .into_iter()
            .map(|p| p.as_ref().parse())
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    /// Add a path
    pub fn push(&mut self, path: FieldPath) {
        self.0.push(path);
    }

    /// Configured paths
    #[inline]
    #[must_use]
    pub fn paths(&self) -> &[FieldPath] {
        &self.0
    }

    /// Check if no paths are configured
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Deterministic serializer with allow-list stripping
#[derive(Debug, Clone)]
pub struct Canonicalizer {
    allow_list: AllowList,
}

impl Canonicalizer {
    /// Create canonicalizer with the given allow-list
    #[inline]
    #[must_use]
    pub fn new(allow_list: AllowList) -> Self {
        Self { allow_list }
    }

    /// Canonicalizer that strips nothing
    ///
    /// Used for history lines, which keep every field.
    #[inline]
    #[must_use]
    pub fn strict() -> Self {
        Self::new(AllowList::empty())
    }

    /// Configured allow-list
    #[inline]
    #[must_use]
    pub fn allow_list(&self) -> &AllowList {
        &self.allow_list
    }

    /// Copy of `value` with allow-listed fields removed
    #[must_use]
    pub fn strip(&self, value: &Value) -> Value {
        let mut out = value.clone();
        let patterns: Vec<&[Segment]> = self.allow_list.0.iter().map(|p| p.segments()).collect();
        if !patterns.is_empty() {
            strip_in_place(&mut out, &patterns);
        }
        out
    }

    /// Canonical UTF-8 text
    #[must_use]
    pub fn canonical_string(&self, value: &Value) -> String {
        let mut out = String::new();
        if self.allow_list.is_empty() {
            write_canonical(value, &mut out);
        } else {
            write_canonical(&self.strip(value), &mut out);
        }
        out
    }

    /// Canonical bytes
    #[inline]
    #[must_use]
    pub fn canonicalize(&self, value: &Value) -> Vec<u8> {
        self.canonical_string(value).into_bytes()
    }

    /// `Hash(Canonicalize(value))`
    #[inline]
    #[must_use]
    pub fn hash(&self, value: &Value) -> CanonicalHash {
        CanonicalHash::compute(&self.canonicalize(value))
    }
}

impl Default for Canonicalizer {
    fn default() -> Self {
        Self::new(AllowList::artifact_default())
    }
}

/// Canonical text of `value` with nothing stripped
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn strip_in_place(value: &mut Value, patterns: &[&[Segment]]) {
    let Value::Object(map) = value else {
        return;
    };

    let keys: Vec<String> = map.keys().cloned().collect();
    for key in keys {
        let matching: Vec<&[Segment]> = patterns
            .iter()
            .copied()
            .filter(|p| p.first().is_some_and(|s| s.matches(&key)))
            .collect();
        if matching.is_empty() {
            continue;
        }
        if matching.iter().any(|p| p.len() == 1) {
            map.remove(&key);
            continue;
        }

        let rest: Vec<&[Segment]> = matching.iter().map(|p| &p[1..]).collect();
        let drop_when_empty = rest.iter().any(|p| *p == [Segment::Any]);
        if let Some(child) = map.get_mut(&key) {
            // `a.*` on a scalar, array or null `a` removes `a` outright
            if drop_when_empty && !child.is_object() {
                map.remove(&key);
                continue;
            }
            strip_in_place(child, &rest);
            let emptied = matches!(child, Value::Object(m) if m.is_empty());
            if emptied && drop_when_empty {
                map.remove(&key);
            }
        }
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => write_number(n, out),
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => write_object(map, out),
    }
}

fn write_object(map: &Map<String, Value>, out: &mut String) {
    let mut entries: Vec<(&String, &Value)> = map.iter().collect();
    entries.sort_unstable_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

    out.push('{');
    for (i, (key, value)) in entries.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_string(key, out);
        out.push(':');
        write_canonical(value, out);
    }
    out.push('}');
}

#[allow(clippy::cast_possible_truncation)]
fn write_number(n: &Number, out: &mut String) {
    if let Some(i) = n.as_i64() {
        let _ = write!(out, "{i}");
    } else if let Some(u) = n.as_u64() {
        let _ = write!(out, "{u}");
    } else if let Some(f) = n.as_f64() {
        if f.fract() == 0.0 && f.abs() < MAX_SAFE_INTEGER {
            let _ = write!(out, "{}", f as i64);
        } else {
            // f64 Display is the shortest round-trip form and never uses an exponent.
            let _ = write!(out, "{f}");
        }
    }
}

fn write_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

/// Errors from canonicalization configuration
#[derive(Debug, thiserror::Error)]
pub enum CanonicalError {
    /// Allow-list entry is empty
    #[error("field path is empty")]
    EmptyPath,

    /// Allow-list entry contains `..` or a leading/trailing dot
    #[error("field path '{0}' contains an empty segment")]
    EmptySegment(String),
}
