use std::collections::BTreeMap;

use sd_tensor::Tensor;

use crate::error::{DecodeError, Result};

/// Reserved key suffix marking a cache position index leaf.
pub const INDEX_SUFFIX: &str = "_index";

/// How the decoding loops treat a cache leaf when they restructure the
/// batch dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeafKind {
    /// Per-row state (attention keys/values); always transformed.
    Data,
    /// Per-row write position; transformed only when a transform asks for
    /// index leaves too.
    Index,
    /// State shared by every row (e.g. a relative position bias or a global
    /// position counter); never transformed.
    Shared,
}

impl LeafKind {
    /// Infers the kind from a leaf name: names ending in [`INDEX_SUFFIX`]
    /// are index leaves, everything else is data.
    pub fn infer(name: &str) -> LeafKind {
        if name.ends_with(INDEX_SUFFIX) {
            LeafKind::Index
        } else {
            LeafKind::Data
        }
    }

    fn is_mapped(self, apply_to_index: bool) -> bool {
        match self {
            LeafKind::Data => true,
            LeafKind::Index => apply_to_index,
            LeafKind::Shared => false,
        }
    }
}

/// A tensor stored in the cache together with its kind.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheLeaf {
    pub kind: LeafKind,
    pub value: Tensor,
}

/// One entry of a [`Cache`]: a tensor leaf or a nested sub-cache.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheNode {
    Leaf(CacheLeaf),
    Branch(Cache),
}

/// Nested decoder state carried between step-function calls.
///
/// The decoding loops never interpret the tensors; they forward the cache
/// to the step function unchanged and only rewrite the leading (row)
/// dimension of its leaves when expanding or reordering rows. Entries are
/// kept in name order so traversal is deterministic.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Cache {
    entries: BTreeMap<String, CacheNode>,
}

impl Cache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of direct entries (leaves and branches).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert a per-row data leaf.
    pub fn insert_data(&mut self, name: impl Into<String>, value: Tensor) {
        self.insert_leaf(name, LeafKind::Data, value);
    }

    /// Insert a per-row index leaf.
    pub fn insert_index(&mut self, name: impl Into<String>, value: Tensor) {
        self.insert_leaf(name, LeafKind::Index, value);
    }

    /// Insert a leaf shared by every row.
    pub fn insert_shared(&mut self, name: impl Into<String>, value: Tensor) {
        self.insert_leaf(name, LeafKind::Shared, value);
    }

    /// Insert a leaf whose kind is inferred from its name, see
    /// [`LeafKind::infer`].
    pub fn insert_inferred(&mut self, name: impl Into<String>, value: Tensor) {
        let name = name.into();
        let kind = LeafKind::infer(&name);
        self.insert_leaf(name, kind, value);
    }

    /// Insert a leaf of an explicit kind, replacing any previous entry.
    pub fn insert_leaf(&mut self, name: impl Into<String>, kind: LeafKind, value: Tensor) {
        self.entries
            .insert(name.into(), CacheNode::Leaf(CacheLeaf { kind, value }));
    }

    /// Insert a nested sub-cache.
    pub fn insert_branch(&mut self, name: impl Into<String>, branch: Cache) {
        self.entries.insert(name.into(), CacheNode::Branch(branch));
    }

    /// Looks up a direct entry.
    pub fn get(&self, name: &str) -> Option<&CacheNode> {
        self.entries.get(name)
    }

    /// Looks up a leaf by its path of names, e.g. `["layers_0", "cached_key"]`.
    pub fn get_path(&self, path: &[&str]) -> Option<&CacheLeaf> {
        let (last, parents) = path.split_last()?;
        let mut node = self;
        for name in parents {
            match node.entries.get(*name)? {
                CacheNode::Branch(sub) => node = sub,
                CacheNode::Leaf(_) => return None,
            }
        }
        match node.entries.get(*last)? {
            CacheNode::Leaf(leaf) => Some(leaf),
            CacheNode::Branch(_) => None,
        }
    }

    /// Every leaf with its `/`-joined path, in depth-first name order.
    pub fn leaves(&self) -> Vec<(String, &CacheLeaf)> {
        let mut out = Vec::new();
        self.collect_leaves("", &mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a CacheLeaf)>) {
        for (name, node) in &self.entries {
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", prefix, name)
            };
            match node {
                CacheNode::Leaf(leaf) => out.push((path, leaf)),
                CacheNode::Branch(sub) => sub.collect_leaves(&path, out),
            }
        }
    }

    /// Total number of leaves at any depth.
    pub fn leaf_count(&self) -> usize {
        self.entries
            .values()
            .map(|node| match node {
                CacheNode::Leaf(_) => 1,
                CacheNode::Branch(sub) => sub.leaf_count(),
            })
            .sum()
    }

    /// Checks that every leaf a row transform would touch has `rows` rows.
    /// Scalars carry no row dimension and always pass.
    pub fn check_rows(&self, rows: usize, apply_to_index: bool) -> Result<()> {
        for (path, leaf) in self.leaves() {
            if !leaf.kind.is_mapped(apply_to_index) {
                continue;
            }
            let dims = leaf.value.shape().dims();
            if let Some(&leading) = dims.first() {
                if leading != rows {
                    return Err(DecodeError::shape(
                        format!("cache leaf {}", path),
                        &[rows],
                        &[leading],
                    ));
                }
            }
        }
        Ok(())
    }

    /// Leaf paths with their kinds, in traversal order. Two caches with equal
    /// layouts have the same structure.
    pub fn layout(&self) -> Vec<(String, LeafKind)> {
        self.leaves()
            .into_iter()
            .map(|(path, leaf)| (path, leaf.kind))
            .collect()
    }

    /// True if both caches have the same names at every level, the same
    /// leaf/branch layout, and the same leaf kinds. Tensor contents and
    /// shapes are not compared.
    pub fn same_structure(&self, other: &Cache) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .zip(other.entries.iter())
                .all(|((na, a), (nb, b))| {
                    na == nb
                        && match (a, b) {
                            (CacheNode::Leaf(la), CacheNode::Leaf(lb)) => la.kind == lb.kind,
                            (CacheNode::Branch(sa), CacheNode::Branch(sb)) => sa.same_structure(sb),
                            _ => false,
                        }
                })
    }
}

/// Applies `f` to every data leaf of `cache`, and to index leaves too when
/// `apply_to_index` is set; shared leaves are always copied unchanged.
///
/// Returns a new cache with exactly the same nesting, names and leaf kinds;
/// `cache` itself is not modified. The first error returned by `f` aborts
/// the traversal.
pub fn cache_map<F>(mut f: F, cache: &Cache, apply_to_index: bool) -> Result<Cache>
where
    F: FnMut(&Tensor) -> Result<Tensor>,
{
    map_cache(&mut f, cache, apply_to_index)
}

fn map_cache<F>(f: &mut F, cache: &Cache, apply_to_index: bool) -> Result<Cache>
where
    F: FnMut(&Tensor) -> Result<Tensor>,
{
    let mut entries = BTreeMap::new();
    for (name, node) in &cache.entries {
        let mapped = match node {
            CacheNode::Branch(sub) => CacheNode::Branch(map_cache(f, sub, apply_to_index)?),
            CacheNode::Leaf(leaf) => {
                let value = if leaf.kind.is_mapped(apply_to_index) {
                    f(&leaf.value)?
                } else {
                    leaf.value.clone()
                };
                CacheNode::Leaf(CacheLeaf {
                    kind: leaf.kind,
                    value,
                })
            }
        };
        entries.insert(name.clone(), mapped);
    }
    Ok(Cache { entries })
}
