//! traced value representation
//!
//! Every piece of data in a warehouse is a [Traceable]: a [Value] plus the
//! [Position] it was read from. Values form the usual YAML shapes
//! - scalar (always kept as its source string)
//! - sequence
//! - mapping (order-preserving)
//!
//! Equality and matching ignore positions: two values loaded from different
//! files compare equal when their contents do. Position data is side
//! information for error reporting and provenance queries only.
//!
//! [Kv] is the dotted-path key/value tree a graph vertex owns. Keys like
//! `net.dns.fqdn` address nested mappings one segment per dot.
use indexmap::IndexMap;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::Serializer;

/// Source location of a value: file, 1-based line and column, 0-based byte
/// offset.
///
/// `line == 0 && column == 0` means "untracked" and must never be observable
/// on a value reachable from a loaded warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Position {
    pub file: String,
    pub line: u64,
    pub column: u64,
    pub byte: u64,
}

impl Position {
    pub fn new(file: impl Into<String>, line: u64, column: u64, byte: u64) -> Self {
        Self {
            file: file.into(),
            line,
            column,
            byte,
        }
    }

    /// Position of a value synthesized for `file` as a whole, e.g. the
    /// loader-generated `pallet.*` keys of a pallet directory.
    pub fn whole_file(file: impl Into<String>) -> Self {
        Self::new(file, 1, 1, 0)
    }

    pub fn is_tracked(&self) -> bool {
        self.line != 0 || self.column != 0
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (line {}, column {})", self.file, self.line, self.column)
    }
}

/// All possible value shapes
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(String),
    Sequence(Vec<Traceable>),
    Mapping(IndexMap<String, Traceable>),
}

/// A value annotated with the source position it came from
#[derive(Debug, Clone)]
pub struct Traceable {
    pub value: Value,
    pub position: Position,
}

impl Traceable {
    pub fn scalar(value: impl Into<String>, position: Position) -> Self {
        Self {
            value: Value::Scalar(value.into()),
            position,
        }
    }

    pub fn sequence(items: Vec<Traceable>, position: Position) -> Self {
        Self {
            value: Value::Sequence(items),
            position,
        }
    }

    pub fn mapping(entries: IndexMap<String, Traceable>, position: Position) -> Self {
        Self {
            value: Value::Mapping(entries),
            position,
        }
    }

    pub fn as_scalar(&self) -> Option<&str> {
        match &self.value {
            Value::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Traceable]> {
        match &self.value {
            Value::Sequence(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&IndexMap<String, Traceable>> {
        match &self.value {
            Value::Mapping(entries) => Some(entries),
            _ => None,
        }
    }
}

// Logical identity is the value alone; positions are side information.
impl PartialEq for Traceable {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl PartialEq<str> for Traceable {
    fn eq(&self, other: &str) -> bool {
        self.as_scalar() == Some(other)
    }
}

/// Dotted-path key/value tree owned by one graph vertex
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Kv {
    root: IndexMap<String, Traceable>,
}

impl Kv {
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    pub fn root(&self) -> &IndexMap<String, Traceable> {
        &self.root
    }

    /// Read the value at a dotted key path, walking nested mappings.
    pub fn get(&self, key: &str) -> Option<&Traceable> {
        let mut segments = key.split('.');
        let mut current = self.root.get(segments.next()?)?;

        for segment in segments {
            current = current.as_mapping()?.get(segment)?;
        }

        Some(current)
    }

    /// Store a value at a dotted key path.
    ///
    /// Intermediate mappings are created as needed and stamped with the
    /// position of the value being stored.
    pub fn set(&mut self, key: &str, value: Traceable) {
        let position = value.position.clone();
        let mut segments: Vec<&str> = key.split('.').collect();
        let leaf = segments.pop().expect("split yields at least one segment");

        let mut entries = &mut self.root;
        for segment in segments {
            let slot = entries
                .entry(segment.to_string())
                .or_insert_with(|| Traceable::mapping(IndexMap::new(), position.clone()));

            if !matches!(slot.value, Value::Mapping(_)) {
                tracing::trace!(key, segment, "replacing non-mapping on key path");
                *slot = Traceable::mapping(IndexMap::new(), position.clone());
            }

            let Value::Mapping(inner) = &mut slot.value else {
                unreachable!("slot was just made a mapping");
            };
            entries = inner;
        }

        entries.insert(leaf.to_string(), value);
    }

    /// Merge a parsed mapping into this tree.
    ///
    /// Nested mappings merge recursively; scalars and sequences are
    /// last-write-wins.
    pub fn merge(&mut self, entries: IndexMap<String, Traceable>) {
        merge_into(&mut self.root, entries);
    }
}

fn merge_into(dst: &mut IndexMap<String, Traceable>, src: IndexMap<String, Traceable>) {
    for (key, incoming) in src {
        match (dst.get_mut(&key), incoming) {
            (
                Some(Traceable {
                    value: Value::Mapping(existing),
                    ..
                }),
                Traceable {
                    value: Value::Mapping(entries),
                    ..
                },
            ) => merge_into(existing, entries),
            (Some(slot), incoming) => {
                tracing::trace!(key, "overwriting earlier value");
                *slot = incoming;
            }
            (None, incoming) => {
                dst.insert(key, incoming);
            }
        }
    }
}

impl serde::ser::Serialize for Traceable {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match &self.value {
            Value::Scalar(value) => serializer.serialize_str(value),
            Value::Sequence(items) => {
                let mut ser = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    ser.serialize_element(item)?;
                }
                ser.end()
            }
            Value::Mapping(entries) => {
                let mut ser = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    ser.serialize_entry(key, value)?;
                }
                ser.end()
            }
        }
    }
}

impl serde::ser::Serialize for Kv {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut ser = serializer.serialize_map(Some(self.root.len()))?;
        for (key, value) in &self.root {
            ser.serialize_entry(key, value)?;
        }
        ser.end()
    }
}

/// Serialization wrapper that suffixes every scalar with its position.
///
/// YAML emitters cannot write comments, so the provenance rides inside the
/// scalar itself, separated by ` @ `. Meant for humans debugging a
/// warehouse, not for machine consumption.
pub struct WithPositions<'a>(pub &'a Traceable);

/// [WithPositions], but for a whole [Kv] tree.
pub struct KvWithPositions<'a>(pub &'a Kv);

impl serde::ser::Serialize for WithPositions<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match &self.0.value {
            Value::Scalar(value) => {
                serializer.serialize_str(&format!("{value} @ {}", self.0.position))
            }
            Value::Sequence(items) => {
                let mut ser = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    ser.serialize_element(&WithPositions(item))?;
                }
                ser.end()
            }
            Value::Mapping(entries) => {
                let mut ser = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    ser.serialize_entry(key, &WithPositions(value))?;
                }
                ser.end()
            }
        }
    }
}

impl serde::ser::Serialize for KvWithPositions<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut ser = serializer.serialize_map(Some(self.0 .root.len()))?;
        for (key, value) in &self.0.root {
            ser.serialize_entry(key, &WithPositions(value))?;
        }
        ser.end()
    }
}
