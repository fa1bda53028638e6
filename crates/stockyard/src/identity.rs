//! pallet identity derivation
//!
//! An [Identity] is the address of one pallet, derived purely from its
//! filesystem path relative to the warehouse root:
//!
//! ```text
//! <warehouse>/<kind>/<name...>    e.g. <warehouse>/domain/example.com/sub
//! kind        = "domain"
//! full_name   = "example.com/sub"
//! leaf_name   = "sub"
//! parent_name = Some("example.com")
//! ```
//!
//! Two identities are equal exactly when their absolute paths are equal;
//! the path is also the deduplication key for the loader's pallet cache.
use std::path::{Component, Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum InvalidIdentityError {
    #[error("path {path} is outside the warehouse {warehouse}")]
    OutsideWarehouse { path: PathBuf, warehouse: PathBuf },
    #[error("path {path} does not name a pallet (expected <kind>/<name>)")]
    NotAPallet { path: PathBuf },
    #[error("path {path} is not valid utf-8")]
    NotUtf8 { path: PathBuf },
}

#[derive(Debug, Clone)]
pub struct Identity {
    /// Warehouse root this identity is relative to
    pub warehouse: PathBuf,
    /// Absolute, normalized path of the pallet directory
    pub path: PathBuf,
    /// Top-level category, the first component under the root
    pub kind: String,
    /// Hierarchical name, all remaining components slash-joined
    pub full_name: String,
    /// Last component of `full_name`
    pub leaf_name: String,
    /// `full_name` minus its last component, absent for top-level pallets
    pub parent_name: Option<String>,
}

impl Identity {
    /// Derive the identity of the pallet at `path` inside `warehouse`.
    ///
    /// `path` may be relative (to the warehouse root) or absolute; `..` and
    /// `.` components are resolved lexically, so symlink targets written
    /// relative to their link keep their meaning.
    pub fn from_path(warehouse: &Path, path: &Path) -> Result<Self, InvalidIdentityError> {
        let absolute = if path.is_absolute() {
            normalize(path)
        } else {
            normalize(&warehouse.join(path))
        };

        let relative = absolute
            .strip_prefix(warehouse)
            .map_err(|_| InvalidIdentityError::OutsideWarehouse {
                path: absolute.clone(),
                warehouse: warehouse.to_path_buf(),
            })?;

        let mut parts = Vec::new();
        for component in relative.components() {
            let Component::Normal(part) = component else {
                return Err(InvalidIdentityError::NotAPallet {
                    path: absolute.clone(),
                });
            };
            let part = part
                .to_str()
                .ok_or_else(|| InvalidIdentityError::NotUtf8 {
                    path: absolute.clone(),
                })?;
            parts.push(part.to_string());
        }

        if parts.len() < 2 {
            return Err(InvalidIdentityError::NotAPallet { path: absolute });
        }

        let kind = parts.remove(0);
        let full_name = parts.join("/");
        let leaf_name = parts.last().expect("at least one name component").clone();
        let parent_name = (parts.len() > 1).then(|| parts[..parts.len() - 1].join("/"));

        Ok(Self {
            warehouse: warehouse.to_path_buf(),
            path: absolute,
            kind,
            full_name,
            leaf_name,
            parent_name,
        })
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for Identity {}

impl std::hash::Hash for Identity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

/// Lexically resolve `.` and `..` components without touching the
/// filesystem.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component);
                }
            }
            other => normalized.push(other),
        }
    }

    normalized
}
