use crate::checksums::{normalize_hex, Checksums, HashKind};
use crate::codec::header_for;
use crate::error::CodecError;
use crate::item::{Item, ItemKind};
use crate::manifest::{Machine, Manifest};
use csv::{ReaderBuilder, Trim, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Row {
    machine: String,
    #[serde(default)]
    description: String,
    kind: ItemKind,
    #[serde(default)]
    name: String,
    size: Option<u64>,
    crc32: Option<String>,
    md5: Option<String>,
    sha1: Option<String>,
    sha256: Option<String>,
    sha384: Option<String>,
    sha512: Option<String>,
    nodump: Option<String>,
}

impl Row {
    fn from_item(item: &Item, description: &str) -> Self {
        let checksums = &item.checksums;
        Row {
            machine: item.machine.clone(),
            description: description.to_string(),
            kind: item.kind,
            name: item.name.clone(),
            size: checksums.size,
            crc32: checksums.crc32.clone(),
            md5: checksums.md5.clone(),
            sha1: checksums.sha1.clone(),
            sha256: checksums.sha256.clone(),
            sha384: checksums.sha384.clone(),
            sha512: checksums.sha512.clone(),
            nodump: checksums.nodump.then(|| String::from("yes")),
        }
    }

    fn checksums(&self) -> Checksums {
        let mut checksums = Checksums {
            size: self.size,
            ..Checksums::default()
        };
        let columns = [
            (HashKind::Crc32, &self.crc32),
            (HashKind::Md5, &self.md5),
            (HashKind::Sha1, &self.sha1),
            (HashKind::Sha256, &self.sha256),
            (HashKind::Sha384, &self.sha384),
            (HashKind::Sha512, &self.sha512),
        ];
        for (kind, value) in columns {
            checksums.set(kind, value.as_deref().and_then(|value| normalize_hex(kind, value)));
        }
        checksums.nodump = matches!(
            self.nodump.as_deref().map(str::to_ascii_lowercase).as_deref(),
            Some("yes" | "true" | "1")
        );
        checksums
    }
}

pub fn parse(bytes: &[u8], path: &Path) -> Result<Manifest, CodecError> {
    let csv_error = |source| CodecError::Csv {
        source,
        path: path.to_path_buf(),
    };
    let mut reader = ReaderBuilder::new().trim(Trim::All).from_reader(bytes);

    let mut manifest = Manifest::new(header_for(path));
    for record in reader.deserialize::<Row>() {
        let row = record.map_err(csv_error)?;
        if !row.description.is_empty() && manifest.machine(&row.machine).is_none() {
            manifest.describe_machine(Machine {
                name: row.machine.clone(),
                description: row.description.clone(),
                parent: None,
            });
        }
        let checksums = row.checksums();
        manifest.insert(Item::new(row.kind, row.machine, row.name, checksums));
    }
    Ok(manifest)
}

pub fn serialize(manifest: &Manifest) -> Result<Vec<u8>, CodecError> {
    let path = Path::new("<memory>");
    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    for (machine, items) in manifest.by_machine() {
        let description = manifest
            .machine(machine)
            .map(|info| info.description.as_str())
            .unwrap_or_default();
        for item in items {
            writer
                .serialize(Row::from_item(item, description))
                .map_err(|source| CodecError::Csv {
                    source,
                    path: path.to_path_buf(),
                })?;
        }
    }
    writer.into_inner().map_err(|error| CodecError::Io {
        source: error.into_error(),
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Header;

    #[test]
    fn rows_round_trip_with_machine_descriptions() {
        let mut nodump = Item::rom("Game", "bad.bin", Checksums::with_size(4));
        nodump.checksums.nodump = true;
        let mut manifest = Manifest::from_items(
            Header::named("set"),
            vec![
                Item::rom(
                    "Game",
                    "a.bin",
                    Checksums::with_size(3)
                        .with_hash(HashKind::Crc32, "352441c2")
                        .with_hash(HashKind::Md5, "900150983cd24fb0d6963f7d28e17f72"),
                ),
                nodump,
                Item::blank("Empty"),
            ],
        );
        manifest.describe_machine(Machine {
            name: String::from("Game"),
            description: String::from("Game, the"),
            parent: None,
        });

        let bytes = serialize(&manifest).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.starts_with("machine,description,kind,name,size,crc32"));

        let parsed = parse(&bytes, Path::new("set.csv")).unwrap();
        assert_eq!(parsed.header.name, "set");
        assert_eq!(parsed.by_machine(), manifest.by_machine());
        assert_eq!(
            parsed.machine("Game").map(|machine| machine.description.as_str()),
            Some("Game, the")
        );
    }

    #[test]
    fn bad_size_is_reported() {
        let text = b"machine,description,kind,name,size,crc32,md5,sha1,sha256,sha384,sha512,nodump\n\
G,,rom,a,notanumber,,,,,,,\n";
        assert!(matches!(
            parse(text, Path::new("bad.csv")),
            Err(CodecError::Csv { .. })
        ));
    }
}
