//! directed acyclic graph substrate
//!
//! [Graph] stores vertices that each own a [Kv] tree, plus directed,
//! labeled edges. Edges point from a dependent towards the vertex it
//! inherits from: a hierarchical child points at its parent (`_parent`),
//! a pallet with a symlink points at the link target (`reference`).
//!
//! Duplicate edges between the same pair are legal; two symlinks to the
//! same target are two distinct relations with distinct metadata.
use crate::value::{Kv, Traceable};
use indexmap::IndexMap;
use std::collections::{HashSet, VecDeque};

/// Index of a vertex inside one [Graph]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexId(usize);

impl VertexId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeLabel {
    /// Directory-hierarchy parent, written `_parent` on disk formats
    Parent,
    /// Symlink reference
    Reference,
}

/// A directed, labeled edge with a small metadata mapping describing the
/// relation (e.g. which symlink file produced it).
#[derive(derive_new::new, Debug, Clone, PartialEq)]
pub struct Edge {
    pub label: EdgeLabel,
    pub target: VertexId,
    pub metadata: IndexMap<String, String>,
}

#[derive(Debug, Default)]
pub struct Graph {
    vertices: Vec<Kv>,
    edges: Vec<Vec<Edge>>,
}

impl Graph {
    pub fn add_vertex(&mut self) -> VertexId {
        self.vertices.push(Kv::default());
        self.edges.push(Vec::new());
        VertexId(self.vertices.len() - 1)
    }

    pub fn add_edge(
        &mut self,
        from: VertexId,
        to: VertexId,
        label: EdgeLabel,
        metadata: IndexMap<String, String>,
    ) {
        self.edges[from.0].push(Edge::new(label, to, metadata));
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = VertexId> {
        (0..self.vertices.len()).map(VertexId)
    }

    pub fn kv(&self, vertex: VertexId) -> &Kv {
        &self.vertices[vertex.0]
    }

    pub fn kv_mut(&mut self, vertex: VertexId) -> &mut Kv {
        &mut self.vertices[vertex.0]
    }

    /// Outgoing edges of `vertex`, in insertion order.
    pub fn edges(&self, vertex: VertexId) -> &[Edge] {
        &self.edges[vertex.0]
    }

    /// Read `key` on `vertex`.
    ///
    /// A shallow lookup reads only the vertex's own tree. A deep lookup
    /// additionally consults reachable inheritance sources, depth-first and
    /// first match wins, in a fixed order: the `_parent` subtree before any
    /// `reference` subtree, references in declaration order.
    pub fn lookup_key(&self, vertex: VertexId, key: &str, shallow: bool) -> Option<&Traceable> {
        if shallow {
            return self.vertices[vertex.0].get(key);
        }

        let mut visited = HashSet::new();
        self.lookup_inherited(vertex, key, &mut visited)
    }

    fn lookup_inherited<'g>(
        &'g self,
        vertex: VertexId,
        key: &str,
        visited: &mut HashSet<VertexId>,
    ) -> Option<&'g Traceable> {
        if !visited.insert(vertex) {
            return None;
        }

        if let Some(value) = self.vertices[vertex.0].get(key) {
            return Some(value);
        }

        let by_label = |label: EdgeLabel| {
            self.edges[vertex.0]
                .iter()
                .filter(move |edge| edge.label == label)
        };

        for edge in by_label(EdgeLabel::Parent).chain(by_label(EdgeLabel::Reference)) {
            if let Some(value) = self.lookup_inherited(edge.target, key, visited) {
                return Some(value);
            }
        }

        None
    }

    /// Linearize the graph so that every vertex appears before every vertex
    /// it has an edge to.
    ///
    /// Read forward, dependents come first; read in reverse, inheritance
    /// sources (hierarchy parents, symlink targets) come before everything
    /// that depends on them. The reverse order is what the transform engine
    /// consumes.
    pub fn topological_order(&self) -> Result<Vec<VertexId>, CycleError> {
        let mut indegree = vec![0usize; self.vertices.len()];
        for edges in &self.edges {
            for edge in edges {
                indegree[edge.target.0] += 1;
            }
        }

        let mut ready: VecDeque<usize> = (0..self.vertices.len())
            .filter(|&v| indegree[v] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.vertices.len());

        while let Some(vertex) = ready.pop_front() {
            order.push(VertexId(vertex));
            for edge in &self.edges[vertex] {
                indegree[edge.target.0] -= 1;
                if indegree[edge.target.0] == 0 {
                    ready.push_back(edge.target.0);
                }
            }
        }

        if order.len() != self.vertices.len() {
            let stuck = (0..self.vertices.len()).find(|&v| indegree[v] > 0);
            return Err(CycleError {
                at: stuck.map(|v| self.describe(VertexId(v))).unwrap_or_default(),
            });
        }

        Ok(order)
    }

    /// Vertices whose key/value trees satisfy `filter`.
    pub fn query(&self, filter: &Filter) -> Vec<VertexId> {
        self.ids().filter(|&v| filter.matches(self, v)).collect()
    }

    fn describe(&self, vertex: VertexId) -> String {
        self.kv(vertex)
            .get("pallet.full_name")
            .and_then(Traceable::as_scalar)
            .map(str::to_string)
            .unwrap_or_else(|| format!("vertex {}", vertex.0))
    }
}

/// The graph is not acyclic.
///
/// Raised either by [Graph::topological_order] or by the loader when pallet
/// construction re-enters a pallet that is still being built.
#[derive(thiserror::Error, Debug)]
#[error("dependency cycle detected at {at}")]
pub struct CycleError {
    pub at: String,
}

/// Per-key predicate over a vertex's key/value tree.
///
/// Each term names a dotted key and either an exact scalar value or a
/// regular expression. All terms must match; lookups are deep, so a filter
/// can match on inherited values.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    terms: Vec<(String, Match)>,
}

#[derive(Debug, Clone)]
pub enum Match {
    Exact(String),
    Pattern(regex::Regex),
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `key` to hold exactly `value`.
    pub fn key(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.terms.push((key.into(), Match::Exact(value.into())));
        self
    }

    /// Require `key` to match `pattern`.
    pub fn key_matches(mut self, key: impl Into<String>, pattern: regex::Regex) -> Self {
        self.terms.push((key.into(), Match::Pattern(pattern)));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn matches(&self, graph: &Graph, vertex: VertexId) -> bool {
        self.terms.iter().all(|(key, matcher)| {
            let Some(value) = graph
                .lookup_key(vertex, key, false)
                .and_then(Traceable::as_scalar)
            else {
                return false;
            };

            match matcher {
                Match::Exact(expected) => value == expected,
                Match::Pattern(pattern) => pattern.is_match(value),
            }
        })
    }
}

impl std::fmt::Display for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.terms.is_empty() {
            return f.write_str("<any>");
        }

        for (index, (key, matcher)) in self.terms.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            match matcher {
                Match::Exact(value) => write!(f, "{key}={value}")?,
                Match::Pattern(pattern) => write!(f, "{key}~={pattern}")?,
            }
        }

        Ok(())
    }
}
