//! Read-only lookup from scanned hash-sets to canonical items.
//!
//! Canonical items describing the same content collapse into one [`Target`];
//! a scanned entry matches a target when every digest populated on both
//! sides agrees and at least one is shared. Built once, then shared by
//! every matching worker without locking.

use crate::checksums::{Checksums, HashKind};
use crate::item::{Item, ItemKind};
use crate::merge::same_content;
use crate::manifest::{BucketKey, Manifest};
use rustc_hash::FxHashMap;

/// One distinct piece of expected content and every item that wants it.
#[derive(Clone, Debug)]
pub struct Target {
    pub checksums: Checksums,
    pub items: Vec<Item>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MatchOutcome {
    Matched(usize),
    /// More than one target is consistent; never resolved by picking one.
    Ambiguous(Vec<usize>),
    Unmatched,
}

impl MatchOutcome {
    pub fn target(&self) -> Option<usize> {
        match self {
            Self::Matched(target) => Some(*target),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct CanonicalIndex {
    targets: Vec<Target>,
    by_key: FxHashMap<BucketKey, Vec<usize>>,
    by_size: FxHashMap<Option<u64>, Vec<usize>>,
}

impl CanonicalIndex {
    /// Blank placeholders and hashless items are left out; nothing can match them.
    ///
    /// An item joins an earlier target of its kind when both describe the
    /// same content and no digest populated on both sides disagrees. The
    /// target then carries the union of their digests.
    pub fn build(manifest: &Manifest) -> Self {
        let mut index = Self::default();
        let mut exact: FxHashMap<Checksums, usize> = FxHashMap::default();
        let mut by_digest: FxHashMap<(HashKind, String), Vec<usize>> = FxHashMap::default();

        for item in manifest.items() {
            if item.kind == ItemKind::Blank || !item.checksums.has_any_hash() {
                continue;
            }
            let joined = exact.get(&item.checksums).copied().or_else(|| {
                let mut candidates: Vec<usize> = item
                    .checksums
                    .populated()
                    .filter_map(|(kind, value)| by_digest.get(&(kind, value.to_string())))
                    .flatten()
                    .copied()
                    .collect();
                candidates.sort_unstable();
                candidates.dedup();
                candidates.into_iter().find(|id| {
                    let target = &index.targets[*id];
                    target.items[0].kind == item.kind
                        && same_content(item.kind, &target.checksums, &item.checksums)
                        && !target.checksums.conflicts_with(&item.checksums)
                })
            });

            let target = match joined {
                Some(target) => {
                    index.targets[target].checksums.absorb(&item.checksums);
                    index.targets[target].items.push(item.clone());
                    target
                }
                None => {
                    index.targets.push(Target {
                        checksums: item.checksums.clone(),
                        items: vec![item.clone()],
                    });
                    index.targets.len() - 1
                }
            };
            exact.entry(item.checksums.clone()).or_insert(target);
            for (kind, value) in index.targets[target].checksums.populated() {
                let ids = by_digest.entry((kind, value.to_string())).or_default();
                if !ids.contains(&target) {
                    ids.push(target);
                }
            }
        }

        for (id, target) in index.targets.iter().enumerate() {
            index
                .by_key
                .entry(BucketKey::of(&target.checksums))
                .or_default()
                .push(id);
            index
                .by_size
                .entry(target.checksums.size)
                .or_default()
                .push(id);
        }
        index
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn target(&self, id: usize) -> &Target {
        &self.targets[id]
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    fn candidates(&self, query: &Checksums) -> Vec<usize> {
        let mut candidates: Vec<usize> = match (&query.crc32, query.size) {
            (Some(_), _) => BucketKey::of(query)
                .widened()
                .iter()
                .filter_map(|key| self.by_key.get(key))
                .flatten()
                .copied()
                .collect(),
            (None, Some(size)) => [Some(size), None]
                .iter()
                .filter_map(|size| self.by_size.get(size))
                .flatten()
                .copied()
                .collect(),
            (None, None) => (0..self.targets.len()).collect(),
        };
        candidates.sort_unstable();
        candidates.dedup();
        candidates
    }

    pub fn lookup(&self, query: &Checksums) -> MatchOutcome {
        if !query.has_any_hash() {
            return MatchOutcome::Unmatched;
        }
        let consistent: Vec<usize> = self
            .candidates(query)
            .into_iter()
            .filter(|id| self.targets[*id].checksums.is_consistent_with(query))
            .collect();
        match consistent.as_slice() {
            [] => MatchOutcome::Unmatched,
            [only] => MatchOutcome::Matched(*only),
            _ => MatchOutcome::Ambiguous(consistent),
        }
    }
}
