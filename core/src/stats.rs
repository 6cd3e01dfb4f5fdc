use crate::checksums::HashKind;
use crate::item::ItemKind;
use crate::manifest::Manifest;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Counts describing one manifest.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub name: String,
    pub machines: usize,
    pub items: usize,
    pub roms: usize,
    pub disks: usize,
    pub blanks: usize,
    pub nodump: usize,
    /// Sum of every known item size.
    pub total_size: u64,
    pub unknown_size: usize,
    /// How many items carry each digest.
    pub hashes: BTreeMap<HashKind, usize>,
}

impl Stats {
    pub fn of(manifest: &Manifest) -> Self {
        let mut stats = Stats {
            name: manifest.header.name.clone(),
            machines: manifest.machine_names().len(),
            items: manifest.len(),
            ..Stats::default()
        };
        for item in manifest.items() {
            match item.kind {
                ItemKind::Rom => stats.roms += 1,
                ItemKind::Disk => stats.disks += 1,
                ItemKind::Blank => stats.blanks += 1,
            }
            if item.checksums.nodump {
                stats.nodump += 1;
            }
            match item.checksums.size {
                Some(size) => stats.total_size += size,
                None if item.kind != ItemKind::Blank => stats.unknown_size += 1,
                None => {}
            }
            for (kind, _) in item.checksums.populated() {
                *stats.hashes.entry(kind).or_default() += 1;
            }
        }
        stats
    }
}

impl Display for Stats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.name)?;
        writeln!(f, "  machines:     {}", self.machines)?;
        writeln!(
            f,
            "  items:        {} ({} roms, {} disks, {} blanks)",
            self.items, self.roms, self.disks, self.blanks
        )?;
        writeln!(f, "  total size:   {} bytes", self.total_size)?;
        writeln!(f, "  unknown size: {}", self.unknown_size)?;
        writeln!(f, "  nodump:       {}", self.nodump)?;
        for kind in HashKind::ALL {
            let count = self.hashes.get(&kind).copied().unwrap_or(0);
            writeln!(f, "  {:<13} {}", format!("{}:", kind), count)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksums::Checksums;
    use crate::item::Item;
    use crate::manifest::Header;

    #[test]
    fn counts_kinds_sizes_and_hashes() {
        let mut nodump = Item::rom("Game2", "missing.bin", Checksums::default());
        nodump.checksums.nodump = true;
        let manifest = Manifest::from_items(
            Header::named("Set"),
            vec![
                Item::rom(
                    "Game1",
                    "a.bin",
                    Checksums::with_size(10).with_hash(HashKind::Crc32, "0000000a"),
                ),
                Item::rom(
                    "Game1",
                    "b.bin",
                    Checksums::with_size(20)
                        .with_hash(HashKind::Crc32, "00000014")
                        .with_hash(HashKind::Md5, "d41d8cd98f00b204e9800998ecf8427e"),
                ),
                nodump,
                Item::blank("Empty"),
            ],
        );

        let stats = Stats::of(&manifest);
        assert_eq!(stats.machines, 3);
        assert_eq!(stats.items, 4);
        assert_eq!(stats.roms, 3);
        assert_eq!(stats.blanks, 1);
        assert_eq!(stats.nodump, 1);
        assert_eq!(stats.total_size, 30);
        assert_eq!(stats.unknown_size, 1);
        assert_eq!(stats.hashes[&HashKind::Crc32], 2);
        assert_eq!(stats.hashes[&HashKind::Md5], 1);
        assert!(stats.to_string().contains("machines:     3"));
    }
}
