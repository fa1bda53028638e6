//! pallet read handle
//!
//! A [Pallet] is a borrowed view of one graph vertex: the merged key/value
//! record of one warehouse directory. The loader stores the pallet's own
//! identity under the `pallet.*` keys defined in [keys], so identity takes
//! part in the same query and transform surface as warehouse-authored data.
use crate::graph::{Filter, Graph, VertexId};
use crate::value::{Kv, KvWithPositions, Traceable};
use serde::{Serialize, Serializer};

/// Keys the loader merges into every pallet after its box files.
pub mod keys {
    pub const KIND: &str = "pallet.kind";
    pub const FULL_NAME: &str = "pallet.full_name";
    pub const LEAF_NAME: &str = "pallet.leaf_name";
    pub const PARENT_NAME: &str = "pallet.parent_name";
    pub const BOXES: &str = "pallet.boxes";
}

/// Filter matching exactly one pallet by its kind and leaf name.
pub fn identity_filter(kind: &str, name: &str) -> Filter {
    Filter::new().key(keys::KIND, kind).key(keys::LEAF_NAME, name)
}

#[derive(derive_new::new, Debug, Clone, Copy)]
pub struct Pallet<'w> {
    graph: &'w Graph,
    id: VertexId,
}

impl<'w> Pallet<'w> {
    pub fn id(&self) -> VertexId {
        self.id
    }

    pub fn kind(&self) -> &'w str {
        self.identity_key(keys::KIND)
    }

    pub fn full_name(&self) -> &'w str {
        self.identity_key(keys::FULL_NAME)
    }

    pub fn leaf_name(&self) -> &'w str {
        self.identity_key(keys::LEAF_NAME)
    }

    pub fn parent_name(&self) -> Option<&'w str> {
        self.get_shallow(keys::PARENT_NAME)?.as_scalar()
    }

    /// Names of the box files merged into this pallet, in merge order.
    pub fn boxes(&self) -> Vec<&'w str> {
        self.get_shallow(keys::BOXES)
            .and_then(Traceable::as_sequence)
            .map(|items| items.iter().filter_map(Traceable::as_scalar).collect())
            .unwrap_or_default()
    }

    /// Read `key`, consulting inherited values from hierarchy parents and
    /// symlink referents.
    pub fn get(&self, key: &str) -> Option<&'w Traceable> {
        self.graph.lookup_key(self.id, key, false)
    }

    /// Read `key` from this pallet's own data only.
    pub fn get_shallow(&self, key: &str) -> Option<&'w Traceable> {
        self.graph.lookup_key(self.id, key, true)
    }

    pub fn data(&self) -> &'w Kv {
        self.graph.kv(self.id)
    }

    /// Serialization view with source positions appended to every scalar.
    pub fn with_positions(&self) -> KvWithPositions<'w> {
        KvWithPositions(self.data())
    }

    fn identity_key(&self, key: &str) -> &'w str {
        self.get_shallow(key)
            .and_then(Traceable::as_scalar)
            .expect("identity keys are set by the loader before a pallet is published")
    }
}

// Pallets are ephemeral views; their natural serialization is the merged
// key/value tree.
impl Serialize for Pallet<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.data().serialize(serializer)
    }
}
