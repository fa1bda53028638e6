//! warehouse loader
//!
//! A warehouse is a directory tree:
//!
//! ```text
//! <root>/transforms.yaml        global transform rules
//! <root>/<kind>/<name>/         one pallet per directory
//!     *.yaml                    box files, merged in file name order
//!     <link> -> ../../k/n       reference to another pallet
//!     <subdir>/                 hierarchical child pallet
//! ```
//!
//! [Warehouse::load] reads the whole tree into a [Graph], one vertex per
//! pallet, then runs the transform rules over every vertex. Loading is
//! deterministic: directory entries are visited in lexical order, so box
//! merge order, reference order and transform results never depend on
//! readdir order.
//!
//! Pallet construction is memoized by normalized directory path. A pallet
//! reached twice (once by enumeration, once through a symlink) is built
//! once; a pallet that is reached again *while it is still being built* is
//! a reference cycle and fails the load.
use crate::graph::{CycleError, EdgeLabel, Filter, Graph, VertexId};
use crate::identity::{self, Identity, InvalidIdentityError};
use crate::pallet::{self, Pallet};
use crate::transform::{Reader, RuleError, RuleSet, Writer};
use crate::value::{Position, Traceable};
use crate::yaml::{self, YamlError};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum WarehouseError {
    #[error("{root} has no transforms.yaml: not a warehouse?")]
    NotAWarehouse { root: PathBuf },
    #[error("no pallet at {path}")]
    NotFound { path: PathBuf },
    #[error("symlink {link} points at {target}, which is not a pallet directory")]
    BrokenLink { link: PathBuf, target: PathBuf },
    #[error("box file {file} is not a mapping")]
    BoxNotMapping { file: String },
    #[error(transparent)]
    Cycle(#[from] CycleError),
    #[error(transparent)]
    InvalidIdentity(#[from] InvalidIdentityError),
    #[error(transparent)]
    Yaml(#[from] YamlError),
    #[error(transparent)]
    Rule(#[from] RuleError),
    #[error("unable to read warehouse directory")]
    Io(#[from] std::io::Error),
}

/// A query filter matched more or fewer pallets than the one requested.
#[derive(thiserror::Error, Debug)]
#[error("{filter} matched {matched} pallets")]
pub struct AmbiguousQueryError {
    pub filter: String,
    pub matched: usize,
}

enum Slot {
    InProgress,
    Ready(VertexId),
}

pub struct Warehouse {
    root: PathBuf,
    graph: Graph,
    slots: HashMap<PathBuf, Slot>,
    reader: Reader,
    writer: Writer,
}

impl Warehouse {
    /// Load the warehouse rooted at `root` and apply its transform rules.
    pub fn load(root: impl AsRef<Path>) -> Result<Self, WarehouseError> {
        let root = std::fs::canonicalize(root.as_ref())?;

        let rules_path = root.join("transforms.yaml");
        if !rules_path.is_file() {
            return Err(WarehouseError::NotAWarehouse { root });
        }
        let rules = RuleSet::parse(&yaml::load_file(&rules_path, "transforms.yaml")?)?;
        tracing::debug!(root = %root.display(), rules = rules.len(), "loading warehouse");

        let mut warehouse = Self {
            root,
            graph: Graph::default(),
            slots: HashMap::new(),
            reader: Reader::new(rules.clone()),
            writer: Writer::new(rules),
        };

        for kind_dir in sorted_directories(&warehouse.root)? {
            for name_dir in sorted_directories(&kind_dir)? {
                let identity = Identity::from_path(&warehouse.root, &name_dir)?;
                warehouse.pallet_by_identity(identity)?;
            }
        }

        warehouse.writer.transform_all(&mut warehouse.graph)?;
        tracing::info!(pallets = warehouse.graph.len(), "warehouse loaded");
        Ok(warehouse)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Rule reader for splitting concatenated values back into sequences.
    pub fn reader(&self) -> &Reader {
        &self.reader
    }

    /// All pallets, in load order.
    pub fn pallets(&self) -> impl Iterator<Item = Pallet<'_>> {
        self.graph.ids().map(|id| Pallet::new(&self.graph, id))
    }

    /// Look up one pallet by kind and hierarchical name.
    pub fn pallet(&self, kind: &str, full_name: &str) -> Option<Pallet<'_>> {
        let identity = Identity::from_path(&self.root, &self.root.join(kind).join(full_name)).ok()?;
        match self.slots.get(&identity.path) {
            Some(Slot::Ready(vertex)) => Some(Pallet::new(&self.graph, *vertex)),
            _ => None,
        }
    }

    /// All pallets matching `filter`.
    pub fn query(&self, filter: &Filter) -> Vec<Pallet<'_>> {
        self.graph
            .query(filter)
            .into_iter()
            .map(|id| Pallet::new(&self.graph, id))
            .collect()
    }

    /// The single pallet matching `filter`.
    pub fn fetch(&self, filter: &Filter) -> Result<Pallet<'_>, AmbiguousQueryError> {
        let matched = self.query(filter);
        if matched.len() != 1 {
            return Err(AmbiguousQueryError {
                filter: filter.to_string(),
                matched: matched.len(),
            });
        }
        Ok(matched[0])
    }

    /// Re-run the transform rules over every pallet. Transforms are
    /// idempotent, so this only matters after external graph edits.
    pub fn transform_all(&mut self) -> Result<(), CycleError> {
        self.writer.transform_all(&mut self.graph)
    }

    fn pallet_by_identity(&mut self, identity: Identity) -> Result<VertexId, WarehouseError> {
        match self.slots.get(&identity.path) {
            Some(Slot::Ready(vertex)) => return Ok(*vertex),
            Some(Slot::InProgress) => {
                return Err(CycleError {
                    at: format!("{}/{}", identity.kind, identity.full_name),
                }
                .into())
            }
            None => {}
        }

        if !identity.path.is_dir() {
            return Err(WarehouseError::NotFound {
                path: identity.path,
            });
        }

        self.slots.insert(identity.path.clone(), Slot::InProgress);
        let vertex = self.build(&identity)?;
        self.slots.insert(identity.path.clone(), Slot::Ready(vertex));
        Ok(vertex)
    }

    /// Construct one pallet vertex: merge its box files, wire up reference
    /// and parent edges (building their targets first), then stamp the
    /// `pallet.*` identity keys on top.
    fn build(&mut self, identity: &Identity) -> Result<VertexId, WarehouseError> {
        let vertex = self.graph.add_vertex();
        let tag_base = format!("{}/{}", identity.kind, identity.full_name);
        tracing::debug!(pallet = %tag_base, "building pallet");

        let mut boxes = Vec::new();
        for entry in sorted_entries(&identity.path)? {
            let name = entry_name(&entry)?;
            let file_type = std::fs::symlink_metadata(&entry)?.file_type();

            if file_type.is_symlink() {
                let link = std::fs::read_link(&entry)?;
                let resolved = if link.is_absolute() {
                    identity::normalize(&link)
                } else {
                    identity::normalize(&identity.path.join(&link))
                };
                if !resolved.is_dir() {
                    return Err(WarehouseError::BrokenLink {
                        link: entry.clone(),
                        target: resolved,
                    });
                }

                let target = Identity::from_path(&self.root, &resolved)?;
                let metadata =
                    IndexMap::from([(name.to_string(), target.full_name.clone())]);
                let target_vertex = self.pallet_by_identity(target)?;
                self.graph
                    .add_edge(vertex, target_vertex, EdgeLabel::Reference, metadata);
            } else if file_type.is_dir() {
                let child_identity = Identity::from_path(&self.root, &entry)?;
                let child = self.pallet_by_identity(child_identity)?;
                self.graph
                    .add_edge(child, vertex, EdgeLabel::Parent, IndexMap::new());
            } else if name.ends_with(".yaml") {
                let tag = format!("{tag_base}/{name}");
                let document = yaml::load_file(&entry, &tag)?;
                let Some(entries) = document.as_mapping() else {
                    return Err(WarehouseError::BoxNotMapping { file: tag });
                };
                self.graph.kv_mut(vertex).merge(entries.clone());
                boxes.push(name.to_string());
            }
        }

        let position = Position::whole_file(&tag_base);
        let kv = self.graph.kv_mut(vertex);
        kv.set(
            pallet::keys::KIND,
            Traceable::scalar(&identity.kind, position.clone()),
        );
        kv.set(
            pallet::keys::FULL_NAME,
            Traceable::scalar(&identity.full_name, position.clone()),
        );
        kv.set(
            pallet::keys::LEAF_NAME,
            Traceable::scalar(&identity.leaf_name, position.clone()),
        );
        if let Some(parent_name) = &identity.parent_name {
            kv.set(
                pallet::keys::PARENT_NAME,
                Traceable::scalar(parent_name, position.clone()),
            );
        }
        kv.set(
            pallet::keys::BOXES,
            Traceable::sequence(
                boxes
                    .into_iter()
                    .map(|name| Traceable::scalar(name, position.clone()))
                    .collect(),
                position,
            ),
        );

        Ok(vertex)
    }
}

/// Directory entries of `dir` in lexical order, dotfiles skipped.
fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        entries.push(entry.path());
    }
    entries.sort();
    Ok(entries)
}

/// Subdirectories of `dir` in lexical order. Symlinks do not count; at the
/// kind and name levels only real directories define pallets.
fn sorted_directories(dir: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut entries = sorted_entries(dir)?;
    entries.retain(|path| {
        std::fs::symlink_metadata(path)
            .map(|meta| meta.file_type().is_dir())
            .unwrap_or(false)
    });
    Ok(entries)
}

fn entry_name(path: &Path) -> Result<&str, WarehouseError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            InvalidIdentityError::NotUtf8 {
                path: path.to_path_buf(),
            }
            .into()
        })
}
