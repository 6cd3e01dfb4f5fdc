use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use datsmith_core::{DedupScope, DiffMode, ManifestFormat, OutputFormat};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    version,
    about = "Catalog, merge, diff, verify and rebuild collections against DAT manifests"
)]
pub struct Opts {
    /// Settings file; defaults to datsmith.toml here, then in the user config dir.
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Increase verbosity (-v, -vv, -vvv).
    #[arg(short = 'v', action = ArgAction::Count, global = true)]
    pub verbose: u8,
    /// Decrease verbosity.
    #[arg(short = 'q', action = ArgAction::Count, global = true)]
    pub quiet: u8,
    /// Scan and match on the calling thread only.
    #[arg(long, global = true)]
    pub no_thread: bool,
    /// Hide progress bars.
    #[arg(long, global = true)]
    pub no_progress: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Build a manifest from one or more directories
    Dir2dat(Dir2DatArgs),
    /// Union manifests, optionally deduplicating
    Merge(MergeArgs),
    /// Derive difference manifests from several inputs
    Diff(DiffArgs),
    /// Check directories against a manifest and write a fixdat of what is missing
    Verify(VerifyArgs),
    /// Copy matching content out of directories into a normalised layout
    #[command(visible_alias = "sort")]
    Rebuild(RebuildArgs),
    /// Partition a manifest by one criterion
    Split(SplitArgs),
    /// Print counts for manifests
    Stats(StatsArgs),
}

#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Take member hashes from container metadata instead of reading content.
    #[arg(long)]
    pub quick: bool,
}

#[derive(Debug, Args)]
pub struct Dir2DatArgs {
    #[arg(required = true)]
    pub roots: Vec<PathBuf>,
    #[arg(short, long)]
    pub output: PathBuf,
    /// Manifest name; defaults to the first root's directory name.
    #[arg(long)]
    pub name: Option<String>,
    /// Output format; inferred from the output extension when omitted.
    #[arg(long)]
    pub format: Option<ManifestFormat>,
    /// Record empty directories as blank items.
    #[arg(long)]
    pub blanks: bool,
    #[command(flatten)]
    pub scan: ScanArgs,
}

#[derive(Debug, Args)]
pub struct MergeArgs {
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,
    #[arg(short, long)]
    pub output: PathBuf,
    #[arg(long, default_value = "merged")]
    pub name: String,
    /// full, machine or none.
    #[arg(long, default_value_t = DedupScope::Full)]
    pub dedup: DedupScope,
    #[arg(long)]
    pub format: Option<ManifestFormat>,
}

#[derive(Debug, Args)]
pub struct DiffArgs {
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,
    /// all, cascade, reverse-cascade or base.
    #[arg(long, default_value_t = DiffMode::All)]
    pub mode: DiffMode,
    /// Base manifests for `--mode base`.
    #[arg(long = "base")]
    pub bases: Vec<PathBuf>,
    /// Directory the derived manifests are written into.
    #[arg(short, long)]
    pub output: PathBuf,
    #[arg(long, default_value_t = ManifestFormat::Json)]
    pub format: ManifestFormat,
}

#[derive(Debug, Args)]
pub struct VerifyArgs {
    pub manifest: PathBuf,
    #[arg(required = true)]
    pub roots: Vec<PathBuf>,
    /// Where the manifest of missing items is written.
    #[arg(long)]
    pub fixdat: Option<PathBuf>,
    /// Write the verification report as JSON.
    #[arg(long)]
    pub report: Option<PathBuf>,
    #[command(flatten)]
    pub scan: ScanArgs,
}

#[derive(Debug, Args)]
pub struct RebuildArgs {
    pub manifest: PathBuf,
    #[arg(required = true)]
    pub roots: Vec<PathBuf>,
    /// Output directory; a depot rebuild falls back to the configured depot root.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// dir, zip, tar or depot; defaults to the configured format.
    #[arg(long)]
    pub format: Option<OutputFormat>,
    /// Write what did not match instead of what did.
    #[arg(long)]
    pub inverse: bool,
    /// Delete sources once everything taken from them was written.
    #[arg(long)]
    pub delete: bool,
    #[arg(long)]
    pub report: Option<PathBuf>,
    #[command(flatten)]
    pub scan: ScanArgs,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SplitBy {
    Kind,
    Ext,
    Hash,
    Size,
}

#[derive(Debug, Args)]
pub struct SplitArgs {
    pub input: PathBuf,
    #[arg(long, value_enum)]
    pub by: SplitBy,
    /// Extensions for `--by ext`.
    #[arg(long = "ext", value_delimiter = ',')]
    pub extensions: Vec<String>,
    /// Size threshold in bytes for `--by size`.
    #[arg(long)]
    pub threshold: Option<u64>,
    #[arg(short, long)]
    pub output: PathBuf,
    #[arg(long, default_value_t = ManifestFormat::Json)]
    pub format: ManifestFormat,
}

#[derive(Debug, Args)]
pub struct StatsArgs {
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,
    /// Print JSON instead of text.
    #[arg(long)]
    pub json: bool,
}
