//! Eager loading: one closure statement for many roots.
//!
//! The initial leg is seeded with the whole root set and every closure row
//! carries the root it was reached from, so the flat result can be split
//! back into per-root groups. Root sets larger than `max_keys_per_query`
//! are sent in chunks; each chunk is a complete statement, so chunking
//! never changes a root's group.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::ClosureError;
use crate::record::{Key, Record};
use crate::storage::Storage;

/// A relation that can be evaluated for many roots at once.
pub trait EagerLoad {
    /// Column of the parent records holding the root key.
    fn parent_key_column(&self) -> &str;

    /// Limit applied to each root's group.
    fn per_root_limit(&self) -> Option<u64>;

    fn max_keys_per_query(&self) -> usize;

    /// Rows for `roots`, each tagged with its root, in the relation's
    /// order. No limit is applied.
    fn eager_rows<S: Storage + ?Sized>(
        &self,
        storage: &mut S,
        roots: &[Key],
    ) -> Result<Vec<(Key, Record)>, ClosureError>;
}

pub struct BatchLoader;

impl BatchLoader {
    /// Group the relation's rows by root. Every requested root is a key of
    /// the result, with an empty group when nothing matched. A failed
    /// round-trip fails the whole load.
    pub fn load_for<S, R>(
        storage: &mut S,
        roots: &[Key],
        relation: &R,
    ) -> Result<BTreeMap<Key, Vec<Record>>, ClosureError>
    where
        S: Storage + ?Sized,
        R: EagerLoad,
    {
        let mut unique: Vec<Key> = Vec::with_capacity(roots.len());
        let mut groups: BTreeMap<Key, Vec<Record>> = BTreeMap::new();
        for &root in roots {
            if groups.insert(root, Vec::new()).is_none() {
                unique.push(root);
            }
        }

        let limit = relation.per_root_limit();
        let chunk_size = relation.max_keys_per_query().max(1);
        let mut total = 0usize;
        for chunk in unique.chunks(chunk_size) {
            for (root, record) in relation.eager_rows(storage, chunk)? {
                let Some(group) = groups.get_mut(&root) else {
                    return Err(ClosureError::InternalError(format!(
                        "eager load returned a row for unrequested root {root}"
                    )));
                };
                if limit.is_none_or(|n| (group.len() as u64) < n) {
                    group.push(record);
                    total += 1;
                }
            }
        }

        debug!(
            roots = unique.len(),
            chunks = unique.len().div_ceil(chunk_size),
            rows = total,
            "eager load"
        );
        Ok(groups)
    }

    /// Load the relation for every parent and attach each group under
    /// `name`.
    pub fn eager_load<S, R>(
        storage: &mut S,
        parents: &mut [Record],
        name: &str,
        relation: &R,
    ) -> Result<(), ClosureError>
    where
        S: Storage + ?Sized,
        R: EagerLoad,
    {
        let key_column = relation.parent_key_column();
        let keys = parents
            .iter()
            .map(|p| p.key(key_column))
            .collect::<Result<Vec<_>, _>>()?;
        let mut groups = Self::load_for(storage, &keys, relation)?;

        // Parents sharing a key get clones; the last one takes the group.
        let mut remaining: BTreeMap<Key, usize> = BTreeMap::new();
        for &key in &keys {
            *remaining.entry(key).or_default() += 1;
        }
        for (parent, key) in parents.iter_mut().zip(&keys) {
            let left = remaining.entry(*key).or_default();
            *left = left.saturating_sub(1);
            let group = if *left == 0 {
                groups.remove(key).unwrap_or_default()
            } else {
                groups.get(key).cloned().unwrap_or_default()
            };
            parent.set_relation(name, group);
        }
        Ok(())
    }
}
