//! Binding Module - paths into the data model
//!
//! A [`Binding`] is an immutable, normalized sequence of path segments.
//! Bindings produced by one [`BindingParser`] are interned: equal normalized
//! paths give the same `Arc`, so identity comparison is pointer equality.
//!
//! - `grammar`: raw path → binding AST (`foo.bar[0]`, `foo[name='x']`, `{{nested}}`, `` `exp` ``)
//! - `parser`: AST resolution against the model, interning, query updates
//!
//! Data flow:
//! ```text
//! "foo[key='a'].{{b}}" → grammar::parse → BindingAst
//!                                            ↓
//!                           resolve against model (get/evaluate)
//!                                            ↓
//!                                 Binding("foo.0.bar")
//! ```

mod grammar;
mod parser;

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Serialize, Serializer};
use serde_json::Value;

pub use grammar::{parse as parse_binding_ast, BindingAst};
pub use parser::{BindingParser, ParseOptions, PathResolver};

// ═══════════════════════════════════════════════════════════════
// Path segments
// ═══════════════════════════════════════════════════════════════

/// One step of a binding path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl PathSegment {
    /// Convert a raw segment, turning canonical non-negative integers into indices
    ///
    /// `"3"` becomes `Index(3)`, `"03"` and `"-1"` stay keys.
    pub fn parse(raw: &str) -> Self {
        match raw.parse::<usize>() {
            Ok(index) if index.to_string() == raw => PathSegment::Index(index),
            _ => PathSegment::Key(raw.to_string()),
        }
    }

    pub fn as_index(&self) -> Option<usize> {
        match self {
            PathSegment::Index(i) => Some(*i),
            PathSegment::Key(_) => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            PathSegment::Key(k) => Value::String(k.clone()),
            PathSegment::Index(i) => Value::from(*i),
        }
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(k) => f.write_str(k),
            PathSegment::Index(i) => write!(f, "{i}"),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(raw: &str) -> Self {
        PathSegment::parse(raw)
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}

// ═══════════════════════════════════════════════════════════════
// Binding
// ═══════════════════════════════════════════════════════════════

struct BindingInner {
    segments: Vec<PathSegment>,
    joined: String,
}

/// A normalized path in the data model
#[derive(Clone)]
pub struct Binding(Arc<BindingInner>);

impl Binding {
    pub fn new(segments: Vec<PathSegment>) -> Self {
        let joined = segments
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(".");
        Self(Arc::new(BindingInner { segments, joined }))
    }

    /// The empty path addressing the whole model
    pub fn root() -> Self {
        Self::new(Vec::new())
    }

    /// Split a plain dotted path without going through a parser
    pub fn from_dotted(path: &str) -> Self {
        if path.is_empty() {
            return Self::root();
        }
        Self::new(path.split('.').map(PathSegment::parse).collect())
    }

    pub fn as_array(&self) -> &[PathSegment] {
        &self.0.segments
    }

    pub fn as_string(&self) -> &str {
        &self.0.joined
    }

    pub fn len(&self) -> usize {
        self.0.segments.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.segments.is_empty()
    }

    /// True when `other` is this path or a sub-path of it
    pub fn contains(&self, other: &Binding) -> bool {
        let theirs = other.as_array();
        let ours = self.as_array();
        theirs.len() >= ours.len() && ours.iter().zip(theirs).all(|(a, b)| a == b)
    }

    /// Segments of `self` below `ancestor`
    pub fn relative(&self, ancestor: &Binding) -> Vec<PathSegment> {
        self.as_array()
            .get(ancestor.len()..)
            .map(<[PathSegment]>::to_vec)
            .unwrap_or_default()
    }

    pub fn parent(&self) -> Binding {
        let segments = self.as_array();
        let end = segments.len().saturating_sub(1);
        Binding::new(segments[..end].to_vec())
    }

    pub fn key(&self) -> Option<&PathSegment> {
        self.as_array().last()
    }

    pub fn descendent(&self, relative: &[PathSegment]) -> Binding {
        let mut segments = self.as_array().to_vec();
        segments.extend_from_slice(relative);
        Binding::new(segments)
    }

    /// Pointer identity (interned bindings from one parser)
    pub fn ptr_eq(a: &Binding, b: &Binding) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

impl PartialEq for Binding {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.segments == other.0.segments
    }
}

impl Eq for Binding {}

impl Hash for Binding {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.segments.hash(state);
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Binding({:?})", self.as_string())
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_string())
    }
}

impl Serialize for Binding {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_string())
    }
}

// ═══════════════════════════════════════════════════════════════
// BindingLike
// ═══════════════════════════════════════════════════════════════

/// Anything a parser can turn into a [`Binding`]
#[derive(Debug, Clone)]
pub enum BindingLike {
    Raw(String),
    Segments(Vec<PathSegment>),
    Binding(Binding),
}

impl From<&str> for BindingLike {
    fn from(raw: &str) -> Self {
        BindingLike::Raw(raw.to_string())
    }
}

impl From<String> for BindingLike {
    fn from(raw: String) -> Self {
        BindingLike::Raw(raw)
    }
}

impl From<&String> for BindingLike {
    fn from(raw: &String) -> Self {
        BindingLike::Raw(raw.clone())
    }
}

impl From<Binding> for BindingLike {
    fn from(binding: Binding) -> Self {
        BindingLike::Binding(binding)
    }
}

impl From<&Binding> for BindingLike {
    fn from(binding: &Binding) -> Self {
        BindingLike::Binding(binding.clone())
    }
}

impl From<Vec<PathSegment>> for BindingLike {
    fn from(segments: Vec<PathSegment>) -> Self {
        BindingLike::Segments(segments)
    }
}

// ═══════════════════════════════════════════════════════════════
// Utilities
// ═══════════════════════════════════════════════════════════════

/// Index of the first object whose `key` loosely equals `value`
///
/// Numbers and booleans compare by their string form, so `[id=1]` matches
/// both `{"id": 1}` and `{"id": "1"}`. A missing value matches a missing or
/// null property.
pub fn find_in_array(array: &[Value], key: &str, value: Option<&str>) -> Option<usize> {
    array.iter().position(|item| {
        let Some(obj) = item.as_object() else {
            return false;
        };
        match (obj.get(key), value) {
            (None | Some(Value::Null), None) => true,
            (Some(Value::String(s)), Some(v)) => s == v,
            (Some(Value::Number(n)), Some(v)) => n.to_string() == v,
            (Some(Value::Bool(b)), Some(v)) => b.to_string() == v,
            _ => false,
        }
    })
}

/// Remove `binding` and everything under it from a binding-keyed map
///
/// When the binding ends in an array index, entries for later siblings are
/// shifted down by one so they keep tracking the same elements after a splice.
pub fn remove_binding_and_children_from_map<V>(
    map: HashMap<Binding, V>,
    binding: &Binding,
) -> HashMap<Binding, V> {
    let parent = binding.parent();
    let removed_index = binding.key().and_then(PathSegment::as_index);

    map.into_iter()
        .filter(|(key, _)| !binding.contains(key))
        .map(|(key, value)| {
            let Some(removed) = removed_index else {
                return (key, value);
            };
            if !parent.contains(&key) || key.len() <= parent.len() {
                return (key, value);
            }
            match key.as_array()[parent.len()] {
                PathSegment::Index(i) if i > removed => {
                    let mut segments = key.as_array().to_vec();
                    segments[parent.len()] = PathSegment::Index(i - 1);
                    (Binding::new(segments), value)
                }
                _ => (key, value),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn segments_convert_canonical_numbers_only() {
        assert_eq!(PathSegment::parse("3"), PathSegment::Index(3));
        assert_eq!(PathSegment::parse("0"), PathSegment::Index(0));
        assert_eq!(PathSegment::parse("03"), PathSegment::Key("03".into()));
        assert_eq!(PathSegment::parse("-1"), PathSegment::Key("-1".into()));
        assert_eq!(PathSegment::parse("foo"), PathSegment::Key("foo".into()));
    }

    #[test]
    fn contains_checks_whole_segments() {
        let foo_bar = Binding::from_dotted("foo.bar");
        let foo_ba = Binding::from_dotted("foo.ba");
        let child = Binding::from_dotted("foo.bar.baz");

        assert!(foo_bar.contains(&child));
        assert!(foo_bar.contains(&foo_bar));
        assert!(!foo_ba.contains(&child));
        assert!(!child.contains(&foo_bar));
        assert!(Binding::root().contains(&child));
    }

    #[test]
    fn relative_parent_key_descendent() {
        let b = Binding::from_dotted("foo.bar.0.baz");

        assert_eq!(
            b.relative(&Binding::from_dotted("foo.bar")),
            vec![PathSegment::Index(0), PathSegment::Key("baz".into())]
        );
        assert_eq!(b.parent().as_string(), "foo.bar.0");
        assert_eq!(b.key(), Some(&PathSegment::Key("baz".into())));
        assert_eq!(
            b.parent().descendent(&[PathSegment::Key("qux".into())]).as_string(),
            "foo.bar.0.qux"
        );
        assert!(Binding::root().parent().is_root());
    }

    #[test]
    fn find_in_array_matches_loosely() {
        let items = vec![json!({"id": "a"}), json!({"id": 2}), json!("x"), json!({"other": 1})];

        assert_eq!(find_in_array(&items, "id", Some("a")), Some(0));
        assert_eq!(find_in_array(&items, "id", Some("2")), Some(1));
        assert_eq!(find_in_array(&items, "id", Some("zzz")), None);
        assert_eq!(find_in_array(&items, "id", None), Some(3));
    }

    #[test]
    fn remove_from_map_shifts_later_indices() {
        let mut map = HashMap::new();
        map.insert(Binding::from_dotted("list.0.name"), "zero");
        map.insert(Binding::from_dotted("list.1.name"), "one");
        map.insert(Binding::from_dotted("list.1"), "one-root");
        map.insert(Binding::from_dotted("list.2.name"), "two");
        map.insert(Binding::from_dotted("other"), "other");

        let map = remove_binding_and_children_from_map(map, &Binding::from_dotted("list.1"));

        assert_eq!(map.len(), 3);
        assert_eq!(map.get(&Binding::from_dotted("list.0.name")), Some(&"zero"));
        assert_eq!(map.get(&Binding::from_dotted("list.1.name")), Some(&"two"));
        assert_eq!(map.get(&Binding::from_dotted("other")), Some(&"other"));
    }
}
