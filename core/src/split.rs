//! Partitioning one manifest into several by a single criterion.

use crate::item::{Item, ItemKind};
use crate::manifest::Manifest;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitCriterion {
    /// One output per item kind.
    Kind,
    /// Items whose name ends in one of the extensions, and the rest.
    Extension(Vec<String>),
    /// One output per strongest available digest, plus one for hashless items.
    Hash,
    /// Items below the threshold (or of unknown size), and the rest.
    Size(u64),
}

fn partition(
    manifest: Manifest,
    mut label: impl FnMut(&Item) -> String,
) -> Vec<Manifest> {
    let (header, machines, items) = manifest.into_parts();
    let reference = Manifest::from_parts(header.clone(), machines, []);
    let mut groups: BTreeMap<String, Vec<Item>> = BTreeMap::new();
    for item in items {
        groups.entry(label(&item)).or_default().push(item);
    }
    groups
        .into_iter()
        .map(|(label, items)| {
            let mut part = Manifest::from_items(header.derived(&label), items);
            part.adopt_machines(&reference);
            part
        })
        .collect()
}

fn has_extension(name: &str, extensions: &[String]) -> bool {
    let lower = name.to_ascii_lowercase();
    extensions.iter().any(|extension| {
        let extension = extension.trim_start_matches('.').to_ascii_lowercase();
        lower
            .rsplit_once('.')
            .map(|(_, found)| found == extension)
            .unwrap_or(false)
    })
}

/// Splits `manifest`; empty partitions are not produced.
pub fn split(manifest: Manifest, criterion: &SplitCriterion) -> Vec<Manifest> {
    match criterion {
        SplitCriterion::Kind => partition(manifest, |item| match item.kind {
            ItemKind::Rom => String::from("roms"),
            ItemKind::Disk => String::from("disks"),
            ItemKind::Blank => String::from("blanks"),
        }),
        SplitCriterion::Extension(extensions) => partition(manifest, |item| {
            if has_extension(&item.name, extensions) {
                format!("ext {}", extensions.join(","))
            } else {
                String::from("other")
            }
        }),
        SplitCriterion::Hash => partition(manifest, |item| {
            item.checksums
                .best_hash()
                .map(|(kind, _)| kind.name().to_string())
                .unwrap_or_else(|| String::from("nohash"))
        }),
        SplitCriterion::Size(threshold) => partition(manifest, |item| match item.checksums.size {
            Some(size) if size >= *threshold => format!("at least {}", threshold),
            _ => format!("below {}", threshold),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksums::{Checksums, HashKind};
    use crate::manifest::Header;

    fn sample() -> Manifest {
        Manifest::from_items(
            Header::named("Set"),
            vec![
                Item::rom(
                    "Game",
                    "a.bin",
                    Checksums::with_size(10).with_hash(HashKind::Crc32, "0000000a"),
                ),
                Item::rom(
                    "Game",
                    "b.CUE",
                    Checksums::with_size(5000)
                        .with_hash(HashKind::Sha1, "da39a3ee5e6b4b0d3255bfef95601890afd80709"),
                ),
                Item::disk(
                    "Game",
                    "disc",
                    Checksums::default().with_hash(HashKind::Md5, "d41d8cd98f00b204e9800998ecf8427e"),
                ),
                Item::blank("Empty"),
            ],
        )
    }

    fn names(manifests: &[Manifest]) -> Vec<String> {
        manifests.iter().map(|manifest| manifest.header.name.clone()).collect()
    }

    #[test]
    fn split_by_kind() {
        let parts = split(sample(), &SplitCriterion::Kind);
        assert_eq!(names(&parts), vec!["Set (blanks)", "Set (disks)", "Set (roms)"]);
        assert_eq!(parts[2].len(), 2);
    }

    #[test]
    fn split_by_extension_is_case_insensitive() {
        let parts = split(sample(), &SplitCriterion::Extension(vec![String::from(".cue")]));
        assert_eq!(names(&parts), vec!["Set (ext .cue)", "Set (other)"]);
        assert_eq!(parts[0].len(), 1);
    }

    #[test]
    fn split_by_best_hash() {
        let parts = split(sample(), &SplitCriterion::Hash);
        assert_eq!(
            names(&parts),
            vec!["Set (crc32)", "Set (md5)", "Set (nohash)", "Set (sha1)"]
        );
    }

    #[test]
    fn split_by_size_puts_unknown_below() {
        let parts = split(sample(), &SplitCriterion::Size(1000));
        assert_eq!(names(&parts), vec!["Set (at least 1000)", "Set (below 1000)"]);
        assert_eq!(parts[0].len(), 1);
        assert_eq!(parts[1].len(), 3);
    }
}
