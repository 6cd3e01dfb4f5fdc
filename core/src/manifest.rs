//! The canonical manifest ("DAT") model and its bucketing scheme.
//!
//! Items are accumulated into buckets keyed by `(size, crc32)`. Insertion
//! never deduplicates and preserves order within a bucket; identity is
//! resolved later by [`crate::merge`].

use crate::checksums::Checksums;
use crate::item::{Item, Origin};
use crate::merge::DedupScope;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Coarse candidate key. Items with the same content always share a key;
/// different content may collide and is separated by full comparison.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BucketKey {
    /// `None` means the size is unknown.
    pub size: Option<u64>,
    /// `None` is the sentinel for a missing CRC32.
    pub crc32: Option<String>,
}

impl BucketKey {
    pub fn of(checksums: &Checksums) -> Self {
        Self {
            size: checksums.size,
            crc32: checksums.crc32.clone(),
        }
    }

    /// Keys under which a record compatible with this one could be filed:
    /// itself plus every variant with the size or CRC forgotten.
    pub fn widened(&self) -> Vec<BucketKey> {
        let mut keys = vec![self.clone()];
        if self.crc32.is_some() {
            keys.push(BucketKey {
                size: self.size,
                crc32: None,
            });
        }
        if self.size.is_some() {
            keys.push(BucketKey {
                size: None,
                crc32: self.crc32.clone(),
            });
            if self.crc32.is_some() {
                keys.push(BucketKey::default());
            }
        }
        keys
    }
}

/// Packing hint carried in a manifest header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Packing {
    #[default]
    Default,
    Zip,
    Unzip,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub dedup: DedupScope,
    #[serde(default)]
    pub packing: Packing,
}

impl Header {
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            description: name.clone(),
            name,
            ..Self::default()
        }
    }

    /// Fills an empty date with today's UTC date.
    pub fn stamped(mut self) -> Self {
        if self.date.is_empty() {
            self.date = time::OffsetDateTime::now_utc().date().to_string();
        }
        self
    }

    /// A header for a manifest derived from this one.
    pub fn derived(&self, suffix: &str) -> Self {
        Self {
            name: format!("{} ({})", self.name, suffix),
            description: format!("{} ({})", self.description, suffix),
            ..self.clone()
        }
    }
}

/// Optional descriptive tags for a machine. Identity is the name alone.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl Machine {
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            description: name.clone(),
            name,
            parent: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Manifest {
    pub header: Header,
    machines: BTreeMap<String, Machine>,
    buckets: BTreeMap<BucketKey, Vec<Item>>,
    len: usize,
}

impl Manifest {
    pub fn new(header: Header) -> Self {
        Self {
            header,
            ..Self::default()
        }
    }

    pub fn from_items(header: Header, items: impl IntoIterator<Item = Item>) -> Self {
        let mut manifest = Self::new(header);
        manifest.extend(items);
        manifest
    }

    pub fn from_parts(
        header: Header,
        machines: impl IntoIterator<Item = Machine>,
        items: impl IntoIterator<Item = Item>,
    ) -> Self {
        let mut manifest = Self::from_items(header, items);
        for machine in machines {
            manifest.describe_machine(machine);
        }
        manifest
    }

    /// Appends `item` to its bucket, creating the bucket if needed.
    pub fn insert(&mut self, item: Item) {
        self.buckets.entry(item.bucket_key()).or_default().push(item);
        self.len += 1;
    }

    pub fn extend(&mut self, items: impl IntoIterator<Item = Item>) {
        for item in items {
            self.insert(item);
        }
    }

    /// Records descriptive tags for a machine; items need not exist yet.
    pub fn describe_machine(&mut self, machine: Machine) {
        self.machines.insert(machine.name.clone(), machine);
    }

    pub fn machine(&self, name: &str) -> Option<&Machine> {
        self.machines.get(name)
    }

    pub fn machine_info(&self) -> impl Iterator<Item = &Machine> {
        self.machines.values()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bucket(&self, key: &BucketKey) -> &[Item] {
        self.buckets.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn buckets(&self) -> impl Iterator<Item = (&BucketKey, &[Item])> {
        self.buckets.iter().map(|(key, items)| (key, items.as_slice()))
    }

    /// Items in bucket order, insertion order within a bucket.
    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.buckets.values().flatten()
    }

    pub fn into_items(self) -> Vec<Item> {
        self.buckets.into_values().flatten().collect()
    }

    /// Splits into header, machine tags and items.
    pub fn into_parts(self) -> (Header, Vec<Machine>, Vec<Item>) {
        let items = self.buckets.into_values().flatten().collect();
        (self.header, self.machines.into_values().collect(), items)
    }

    /// Stamps every item with the given origin, clearing prior merge state.
    pub fn tag_origin(&mut self, origin: &Origin) {
        for item in self.buckets.values_mut().flatten() {
            item.origin = origin.clone();
            item.merged_from.clear();
        }
    }

    /// Items grouped by machine name then sorted by item name. This is the
    /// order every artifact is emitted in, independent of discovery order.
    pub fn by_machine(&self) -> BTreeMap<&str, Vec<&Item>> {
        let mut grouped: BTreeMap<&str, Vec<&Item>> = BTreeMap::new();
        for item in self.items() {
            grouped.entry(item.machine.as_str()).or_default().push(item);
        }
        for items in grouped.values_mut() {
            items.sort_by(|left, right| {
                left.name
                    .cmp(&right.name)
                    .then_with(|| left.kind.cmp(&right.kind))
            });
        }
        grouped
    }

    /// Machine names in sorted order, including described machines with no items.
    pub fn machine_names(&self) -> Vec<String> {
        let mut names: Vec<String> =
            self.by_machine().keys().map(|name| name.to_string()).collect();
        for name in self.machines.keys() {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names.sort();
        names
    }

    /// Carries machine tags from `other` for every machine this manifest uses.
    pub fn adopt_machines(&mut self, other: &Manifest) {
        let used: Vec<String> = self.by_machine().keys().map(|name| name.to_string()).collect();
        for name in used {
            if let Some(machine) = other.machine(&name) {
                self.machines.entry(name).or_insert_with(|| machine.clone());
            }
        }
    }
}
