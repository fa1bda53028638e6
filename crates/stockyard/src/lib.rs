//! # stockyard - a hierarchical configuration warehouse
//!
//! `stockyard` reads a directory tree of small YAML files into one queryable
//! key/value graph, where values inherit along the directory hierarchy and
//! across symlinks, and missing values can be derived from existing ones by
//! declarative rules.
//!
//! ## Introduction for developers
//!
//! Read this to understand how `stockyard` works internally.
//!
//! ### Warehouse terms
//!
//! - a `warehouse` is the root directory of a configuration tree
//! - a `kind` is a top-level directory under the root: a category such as
//!   `domain`, `system` or `service`
//! - a `pallet` is a directory under a kind: one named configuration object
//! - a `box` is a YAML file inside a pallet directory: one facet of the
//!   pallet's data
//!
//! This is a valid warehouse:
//! ```text
//! warehouse/
//!   transforms.yaml
//!   domain/
//!     example.com/
//!       dns.yaml
//!       services.yaml
//!   system/
//!     vmhost1/
//!       chassis.yaml
//!       domain -> ../../domain/example.com
//! ```
//!
//! ### Loading
//!
//! [warehouse::Warehouse::load] walks the tree in lexical order and builds
//! one [graph::Graph] vertex per pallet. Box files are parsed by the
//! [yaml] front-end, which keeps every scalar as its source string and
//! stamps every value with a [value::Position] (file, line, column, byte).
//! Boxes merge into the vertex's [value::Kv] in file name order, later
//! files winning on conflicts.
//!
//! Two kinds of edges come out of the directory structure:
//! - a subdirectory of a pallet is a hierarchical child; the child gets a
//!   parent edge pointing at the pallet it sits inside
//! - a symlink in a pallet directory is a reference; the pallet gets a
//!   reference edge pointing at the link target
//!
//! Both edge kinds mean "look here when a key is missing":
//! [graph::Graph::lookup_key] falls back depth-first through the parent
//! subtree, then through each reference subtree in declaration order.
//!
//! The loader finally merges the pallet's own address under the `pallet.*`
//! keys (see [pallet::keys]), so identity is queryable like any other data.
//!
//! ### Transforms
//!
//! After the whole graph is loaded, the rules in `transforms.yaml` run over
//! every pallet, inheritance sources before dependents
//! ([transform::Writer::transform_all]). Rules derive new values from
//! existing ones - pasting keys together, pulling substrings out with
//! regexps, or deferring to inherited values. Derived values carry the
//! position of their rule, so provenance stays honest: the value did not
//! come from any box file.
//!
//! ### Queries
//!
//! A [graph::Filter] is a conjunction of per-key terms, exact or regexp.
//! [warehouse::Warehouse::query] returns every matching [pallet::Pallet];
//! [warehouse::Warehouse::fetch] insists on exactly one match. Pallets
//! serialize via [serde] as their merged key/value tree, optionally with
//! the source position of every scalar appended
//! ([pallet::Pallet::with_positions]).
pub mod graph;
pub mod identity;
pub mod pallet;
pub mod transform;
pub mod value;
pub mod warehouse;
pub mod yaml;
