//! Identity resolution: sort, compare against the last kept record, fold.
//!
//! The scan only ever compares an item with the immediately preceding kept
//! item, so the sort order established by [`sort_for_merge`] is what makes
//! the result deterministic.

use crate::checksums::{Checksums, HashKind};
use crate::item::{DupeClass, Item, ItemKind};
use crate::manifest::{Header, Manifest};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// How far a merge pass reaches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupScope {
    /// One pass over the whole manifest, ignoring machine boundaries.
    Full,
    /// Merge only among items of the same machine.
    PerMachine,
    /// Concatenate without merging.
    #[default]
    None,
}

impl Display for DedupScope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::PerMachine => write!(f, "machine"),
            Self::None => write!(f, "none"),
        }
    }
}

impl FromStr for DedupScope {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "machine" | "per-machine" | "game" => Ok(Self::PerMachine),
            "none" => Ok(Self::None),
            other => Err(format!("unknown dedup scope: {}", other)),
        }
    }
}

/// Ascending `(size, crc32, input, tag, md5, sha1)`; unknown sorts first.
pub fn merge_order(left: &Item, right: &Item) -> Ordering {
    let (a, b) = (&left.checksums, &right.checksums);
    a.size
        .cmp(&b.size)
        .then_with(|| a.crc32.cmp(&b.crc32))
        .then_with(|| left.origin.input.cmp(&right.origin.input))
        .then_with(|| left.origin.tag.cmp(&right.origin.tag))
        .then_with(|| a.md5.cmp(&b.md5))
        .then_with(|| a.sha1.cmp(&b.sha1))
}

/// Stable, so equal keys keep their input order.
pub fn sort_for_merge(items: &mut [Item]) {
    items.sort_by(merge_order);
}

/// Whether `incoming` describes the same content as `kept`.
///
/// Roms need equal sizes (or both unknown) and one equal digest populated
/// on both sides. Disks ignore size and need an equal MD5 or SHA-1. A
/// single shared digest is accepted even if another populated digest
/// differs; records without any digest never match.
pub fn is_same_identity(kept: &Item, incoming: &Item) -> bool {
    kept.kind == incoming.kind && same_content(kept.kind, &kept.checksums, &incoming.checksums)
}

/// The content rule behind [`is_same_identity`] for two hash-sets of one kind.
pub fn same_content(kind: ItemKind, left: &Checksums, right: &Checksums) -> bool {
    match kind {
        ItemKind::Rom => left.size == right.size && left.shares_hash_with(right),
        ItemKind::Disk => left.shares_hash_among(right, &[HashKind::Md5, HashKind::Sha1]),
        ItemKind::Blank => false,
    }
}

fn classify(kept: &Item, incoming: &Item) -> DupeClass {
    if kept.origin.input == incoming.origin.input {
        DupeClass::InternalDupe
    } else {
        DupeClass::ExternalDupe
    }
}

/// Collapses duplicates, enriching the kept record with the duplicate's
/// missing digests and recording its origin. The kept record's class is
/// raised to the most severe duplicate it absorbed.
pub fn merge(mut items: Vec<Item>, presorted: bool) -> Vec<Item> {
    if !presorted {
        sort_for_merge(&mut items);
    }

    let mut kept: Vec<Item> = Vec::with_capacity(items.len());
    for item in items {
        match kept.last_mut() {
            Some(last) if is_same_identity(last, &item) => fold_into(last, item),
            _ => kept.push(item),
        }
    }
    kept
}

fn fold_into(kept: &mut Item, mut duplicate: Item) {
    let class = classify(kept, &duplicate);
    duplicate.dupe = duplicate.dupe.max(class);
    kept.dupe = kept.dupe.max(class);
    kept.checksums.absorb(&duplicate.checksums);
    for origin in std::iter::once(duplicate.origin).chain(duplicate.merged_from) {
        if !kept.origins().any(|existing| *existing == origin) {
            kept.merged_from.push(origin);
        }
    }
}

/// Applies `scope` to a whole manifest.
pub fn dedup(manifest: Manifest, scope: DedupScope) -> Manifest {
    if scope == DedupScope::None {
        return manifest;
    }
    let (mut header, machines, items) = manifest.into_parts();
    let merged = match scope {
        DedupScope::Full => merge(items, false),
        DedupScope::PerMachine => {
            let mut grouped: BTreeMap<String, Vec<Item>> = BTreeMap::new();
            for item in items {
                grouped.entry(item.machine.clone()).or_default().push(item);
            }
            grouped
                .into_values()
                .flat_map(|group| merge(group, false))
                .collect()
        }
        DedupScope::None => items,
    };
    header.dedup = scope;
    Manifest::from_parts(header, machines, merged)
}

/// Concatenates inputs, stamping each item with its input's origin.
pub fn union(inputs: Vec<Manifest>) -> Vec<Item> {
    let mut items = Vec::new();
    for (index, mut manifest) in inputs.into_iter().enumerate() {
        let origin = crate::item::Origin::new(index, manifest.header.name.clone());
        manifest.tag_origin(&origin);
        items.extend(manifest.into_items());
    }
    items
}

/// Unions several manifests into one under `header` and applies `scope`.
pub fn merge_manifests(header: Header, inputs: Vec<Manifest>, scope: DedupScope) -> Manifest {
    let mut machines = Vec::new();
    for input in &inputs {
        machines.extend(input.machine_info().cloned());
    }
    let combined = Manifest::from_parts(header, machines, union(inputs));
    dedup(combined, scope)
}

/// Merges through an identity index instead of sort adjacency, so two
/// identical records are folded even when unrelated records sort between
/// them. Input is still sorted first; the earliest identical kept record
/// wins.
pub fn merge_global(mut items: Vec<Item>) -> Vec<Item> {
    sort_for_merge(&mut items);
    let mut index = IdentityIndex::new();
    for item in items {
        match index.position(&item) {
            Some(position) => index.fold(position, item),
            None => {
                index.insert(item);
            }
        }
    }
    index.into_items()
}

/// Finds items identical to a query without relying on sort adjacency.
///
/// Identity needs at least one shared digest, so every digest value is an
/// index key and candidates are confirmed with [`is_same_identity`].
#[derive(Default)]
pub struct IdentityIndex {
    items: Vec<Item>,
    by_hash: FxHashMap<(HashKind, String), Vec<usize>>,
}

impl IdentityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items(items: impl IntoIterator<Item = Item>) -> Self {
        let mut index = Self::new();
        for item in items {
            index.insert(item);
        }
        index
    }

    pub fn insert(&mut self, item: Item) -> usize {
        let position = self.items.len();
        self.index_hashes(position, &item);
        self.items.push(item);
        position
    }

    fn index_hashes(&mut self, position: usize, item: &Item) {
        for (kind, value) in item.checksums.populated() {
            let slots = self.by_hash.entry((kind, value.to_string())).or_default();
            if !slots.contains(&position) {
                slots.push(position);
            }
        }
    }

    pub fn position(&self, query: &Item) -> Option<usize> {
        query
            .checksums
            .populated()
            .filter_map(|(kind, value)| self.by_hash.get(&(kind, value.to_string())))
            .flatten()
            .copied()
            .find(|position| is_same_identity(&self.items[*position], query))
    }

    pub fn find(&self, query: &Item) -> Option<&Item> {
        self.position(query).map(|position| &self.items[position])
    }

    pub fn contains(&self, query: &Item) -> bool {
        self.position(query).is_some()
    }

    /// Folds `duplicate` into the record at `position`, indexing any digests it gained.
    pub fn fold(&mut self, position: usize, duplicate: Item) {
        fold_into(&mut self.items[position], duplicate);
        let kept = self.items[position].clone();
        self.index_hashes(position, &kept);
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn into_items(self) -> Vec<Item> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
