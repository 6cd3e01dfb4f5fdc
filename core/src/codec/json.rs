use crate::checksums::{normalize_hex, Checksums, HashKind};
use crate::error::CodecError;
use crate::item::{DupeClass, Item, ItemKind, Origin};
use crate::manifest::{Header, Machine, Manifest};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Serialize, Deserialize)]
struct Document {
    header: Header,
    #[serde(default)]
    machines: Vec<MachineDocument>,
}

#[derive(Serialize, Deserialize)]
struct MachineDocument {
    name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent: Option<String>,
    #[serde(default)]
    items: Vec<ItemDocument>,
}

#[derive(Serialize, Deserialize)]
struct ItemDocument {
    #[serde(default)]
    name: String,
    #[serde(default)]
    kind: ItemKind,
    #[serde(flatten)]
    checksums: Checksums,
    /// Contributing input first, then every origin merged into the record.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    sources: Vec<Origin>,
    #[serde(default, skip_serializing_if = "is_unique")]
    dupe: DupeClass,
}

fn is_unique(dupe: &DupeClass) -> bool {
    *dupe == DupeClass::Unique
}

impl ItemDocument {
    fn of(item: &Item) -> Self {
        let attributed = item.origin != Origin::default() || !item.merged_from.is_empty();
        Self {
            name: item.name.clone(),
            kind: item.kind,
            checksums: item.checksums.clone(),
            sources: if attributed {
                item.origins().cloned().collect()
            } else {
                Vec::new()
            },
            dupe: item.dupe,
        }
    }

    fn into_item(self, machine: &str) -> Item {
        let mut item = Item::new(self.kind, machine, self.name, normalized(self.checksums));
        let mut sources = self.sources.into_iter();
        if let Some(origin) = sources.next() {
            item.origin = origin;
        }
        item.merged_from = sources.collect();
        item.dupe = self.dupe;
        item
    }
}

/// Re-normalises digests so hand-edited files compare like scanned ones.
fn normalized(mut checksums: Checksums) -> Checksums {
    for kind in HashKind::ALL {
        let value = checksums.get(kind).and_then(|value| normalize_hex(kind, value));
        checksums.set(kind, value);
    }
    checksums
}

pub fn parse(bytes: &[u8], path: &Path) -> Result<Manifest, CodecError> {
    let document: Document = serde_json::from_slice(bytes).map_err(|source| CodecError::Json {
        source,
        path: path.to_path_buf(),
    })?;

    let mut manifest = Manifest::new(document.header);
    for machine in document.machines {
        for item in machine.items {
            manifest.insert(item.into_item(&machine.name));
        }
        if !machine.description.is_empty() || machine.parent.is_some() {
            manifest.describe_machine(Machine {
                name: machine.name,
                description: machine.description,
                parent: machine.parent,
            });
        }
    }
    Ok(manifest)
}

pub fn serialize(manifest: &Manifest) -> Result<Vec<u8>, CodecError> {
    let grouped = manifest.by_machine();
    let machines = manifest
        .machine_names()
        .into_iter()
        .map(|name| {
            let info = manifest.machine(&name);
            MachineDocument {
                description: info.map(|machine| machine.description.clone()).unwrap_or_default(),
                parent: info.and_then(|machine| machine.parent.clone()),
                items: grouped
                    .get(name.as_str())
                    .map(|items| {
                        items
                            .iter()
                            .map(|item| ItemDocument::of(item))
                            .collect()
                    })
                    .unwrap_or_default(),
                name,
            }
        })
        .collect();

    let document = Document {
        header: manifest.header.clone(),
        machines,
    };
    serde_json::to_vec_pretty(&document).map_err(|source| CodecError::Json {
        source,
        path: PathBuf::from(&manifest.header.name),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_keeps_items_and_machine_tags() {
        let mut manifest = Manifest::from_items(
            Header::named("Set"),
            vec![
                Item::rom(
                    "Game",
                    "a.bin",
                    Checksums::with_size(3)
                        .with_hash(HashKind::Crc32, "352441c2")
                        .with_hash(HashKind::Sha1, "a9993e364706816aba3e25717850c26c9cd0d89d"),
                ),
                Item::disk(
                    "Game",
                    "disc",
                    Checksums::default().with_hash(HashKind::Md5, "d41d8cd98f00b204e9800998ecf8427e"),
                ),
                Item::blank("Empty"),
            ],
        );
        manifest.describe_machine(Machine {
            name: String::from("Game"),
            description: String::from("The Game"),
            parent: Some(String::from("Parent")),
        });

        let bytes = serialize(&manifest).unwrap();
        let parsed = parse(&bytes, Path::new("set.json")).unwrap();
        assert_eq!(parsed.header, manifest.header);
        assert_eq!(parsed.by_machine(), manifest.by_machine());
        assert_eq!(parsed.machine("Game"), manifest.machine("Game"));
    }

    #[test]
    fn merge_attribution_survives_a_round_trip() {
        let rom = |tag: &str| {
            let sums = Checksums::with_size(100).with_hash(HashKind::Crc32, "aaaaaaaa");
            Manifest::from_items(Header::named(tag), vec![Item::rom("Game1", "rom1", sums)])
        };
        let merged = crate::merge::merge_manifests(
            Header::named("Merged"),
            vec![rom("A"), rom("B")],
            crate::merge::DedupScope::Full,
        );
        let record = merged.items().next().unwrap();
        assert_eq!(record.dupe, DupeClass::ExternalDupe);

        let bytes = serialize(&merged).unwrap();
        let parsed = parse(&bytes, Path::new("merged.json")).unwrap();
        let restored = parsed.items().next().unwrap();
        let tags: Vec<_> = restored.origins().map(|origin| origin.tag.as_str()).collect();
        assert_eq!(tags, vec!["A", "B"]);
        assert_eq!(restored.dupe, DupeClass::ExternalDupe);
        assert_eq!(restored, record);
    }

    #[test]
    fn unattributed_items_carry_no_source_fields() {
        let manifest = Manifest::from_items(
            Header::named("Set"),
            vec![Item::rom("G", "a", Checksums::with_size(1).with_hash(HashKind::Crc32, "00000001"))],
        );
        let text = String::from_utf8(serialize(&manifest).unwrap()).unwrap();
        assert!(!text.contains("sources"));
        assert!(!text.contains("dupe"));
    }

    #[test]
    fn hand_written_hashes_are_normalised() {
        let text = br#"{
            "header": {"name": "Set"},
            "machines": [{"name": "G", "items": [{"name": "a", "size": 1, "crc32": "ABCD"}]}]
        }"#;
        let parsed = parse(text, Path::new("set.json")).unwrap();
        let item = parsed.items().next().unwrap();
        assert_eq!(item.checksums.crc32.as_deref(), Some("0000abcd"));
        assert_eq!(item.kind, ItemKind::Rom);
    }

    #[test]
    fn invalid_json_is_a_codec_error() {
        assert!(matches!(
            parse(b"{", Path::new("bad.json")),
            Err(CodecError::Json { .. })
        ));
    }
}
