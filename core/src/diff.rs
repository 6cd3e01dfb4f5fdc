//! Set differences across several manifests.
//!
//! Every mode is a single-threaded pass over fully materialised item lists.
//! Given the same inputs in the same order the outputs are identical; no
//! classification step looks at the clock or at scan order.

use crate::error::{ConfigError, DatResult, ReferentialError};
use crate::item::{DupeClass, Item};
use crate::manifest::{Header, Manifest};
use crate::merge::{merge_global, union, IdentityIndex};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiffMode {
    /// Unique / duplicate / per-input families from the classified union.
    All,
    /// Each output holds only what earlier inputs did not already have.
    Cascade,
    /// Cascade over the reversed input order.
    ReverseCascade,
    /// Each input minus a fixed baseline.
    AgainstBase,
}

impl Display for DiffMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Cascade => write!(f, "cascade"),
            Self::ReverseCascade => write!(f, "reverse-cascade"),
            Self::AgainstBase => write!(f, "base"),
        }
    }
}

impl FromStr for DiffMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "cascade" => Ok(Self::Cascade),
            "reverse-cascade" | "reverse" => Ok(Self::ReverseCascade),
            "base" | "against-base" => Ok(Self::AgainstBase),
            other => Err(format!("unknown diff mode: {}", other)),
        }
    }
}

/// The three families produced by [`all_diffs`].
#[derive(Debug, Clone)]
pub struct AllDiffs {
    /// Items seen in exactly one input overall.
    pub no_duplicates: Manifest,
    /// Items seen in more than one input.
    pub duplicates: Manifest,
    /// For each input, the items of `no_duplicates` it contributed.
    pub per_input: Vec<Manifest>,
}

/// A labelled derived manifest, ready to be written out.
#[derive(Debug, Clone)]
pub struct DiffOutput {
    pub label: String,
    pub manifest: Manifest,
}

fn combined_header(headers: &[Header]) -> Header {
    let names: Vec<&str> = headers.iter().map(|header| header.name.as_str()).collect();
    Header::named(names.join(" + "))
}

/// Unions and classifies every input, then splits by duplicate class.
/// Attribution to an input uses each item's recorded origin.
pub fn all_diffs(inputs: Vec<Manifest>) -> Result<AllDiffs, ReferentialError> {
    let headers: Vec<Header> = inputs.iter().map(|input| input.header.clone()).collect();
    let reference: Vec<Manifest> = inputs
        .iter()
        .map(|input| Manifest::from_parts(Header::default(), input.machine_info().cloned(), []))
        .collect();
    let classified = merge_global(union(inputs));

    let combined = combined_header(&headers);
    let mut no_duplicates = Manifest::new(combined.derived("No Duplicates"));
    let mut duplicates = Manifest::new(combined.derived("Duplicates"));
    let mut per_input: Vec<Manifest> = headers
        .iter()
        .map(|header| Manifest::new(header.derived("Unique")))
        .collect();

    for item in classified {
        if item.dupe < DupeClass::ExternalDupe {
            let input = item.origin.input;
            let target = per_input
                .get_mut(input)
                .ok_or_else(|| ReferentialError::UnknownInput {
                    item: item.location(),
                    input,
                    available: headers.len(),
                })?;
            target.insert(item.clone());
            no_duplicates.insert(item);
        } else {
            duplicates.insert(item);
        }
    }

    for (manifest, machines) in per_input.iter_mut().zip(&reference) {
        manifest.adopt_machines(machines);
    }
    for machines in &reference {
        no_duplicates.adopt_machines(machines);
        duplicates.adopt_machines(machines);
    }

    debug!(
        unique = no_duplicates.len(),
        duplicated = duplicates.len(),
        "classified union of {} inputs",
        headers.len()
    );
    Ok(AllDiffs {
        no_duplicates,
        duplicates,
        per_input,
    })
}

/// Output `i` holds the items of input `i` not identical to anything in
/// inputs `0..i`. Output 0 is input 0 in full.
pub fn cascade(inputs: Vec<Manifest>) -> Vec<Manifest> {
    let mut seen = IdentityIndex::new();
    let mut outputs = Vec::with_capacity(inputs.len());

    for (position, input) in inputs.into_iter().enumerate() {
        let (header, machines, items) = input.into_parts();
        let mut fresh = Vec::new();
        let mut repeated = Vec::new();
        for item in items {
            if seen.contains(&item) {
                repeated.push(item);
            } else {
                fresh.push(item);
            }
        }
        debug!(
            input = position,
            new = fresh.len(),
            already_seen = repeated.len(),
            "cascade step"
        );
        for item in fresh.iter().cloned().chain(repeated) {
            seen.insert(item);
        }
        outputs.push(Manifest::from_parts(header, machines, fresh));
    }
    outputs
}

/// Cascade over the reversed sequence, re-associated to the original order.
pub fn reverse_cascade(mut inputs: Vec<Manifest>) -> Vec<Manifest> {
    inputs.reverse();
    let mut outputs = cascade(inputs);
    outputs.reverse();
    outputs
}

/// Subtracts the merged baseline from each input independently.
pub fn against_base(bases: Vec<Manifest>, inputs: Vec<Manifest>) -> Vec<Manifest> {
    let baseline = IdentityIndex::from_items(merge_global(union(bases)));
    inputs
        .into_iter()
        .map(|input| {
            let (header, machines, items) = input.into_parts();
            let remaining: Vec<Item> = items
                .into_iter()
                .filter(|item| !baseline.contains(item))
                .collect();
            Manifest::from_parts(header, machines, remaining)
        })
        .collect()
}

/// `NN-<name>`; the input position keeps labels distinct when several
/// inputs share a header name.
fn positional_label(position: usize, manifest: &Manifest) -> String {
    format!("{:02}-{}", position, manifest.header.name)
}

/// Runs `mode` and labels every output for writing. Labels are unique
/// within one call.
pub fn diff(mode: DiffMode, inputs: Vec<Manifest>, bases: Vec<Manifest>) -> DatResult<Vec<DiffOutput>> {
    let labelled = |manifests: Vec<Manifest>| -> Vec<DiffOutput> {
        manifests
            .into_iter()
            .enumerate()
            .map(|(position, manifest)| DiffOutput {
                label: positional_label(position, &manifest),
                manifest,
            })
            .collect()
    };

    Ok(match mode {
        DiffMode::All => {
            let AllDiffs {
                no_duplicates,
                duplicates,
                per_input,
            } = all_diffs(inputs)?;
            let mut outputs = vec![
                DiffOutput {
                    label: String::from("no-duplicates"),
                    manifest: no_duplicates,
                },
                DiffOutput {
                    label: String::from("duplicates"),
                    manifest: duplicates,
                },
            ];
            outputs.extend(labelled(per_input));
            outputs
        }
        DiffMode::Cascade => labelled(cascade(inputs)),
        DiffMode::ReverseCascade => labelled(reverse_cascade(inputs)),
        DiffMode::AgainstBase => {
            if bases.is_empty() {
                return Err(ConfigError::MissingInput(String::from(
                    "a base manifest is required to diff against base",
                ))
                .into());
            }
            labelled(against_base(bases, inputs))
        }
    })
}
