mod cli;

use anyhow::{bail, Context, Result};
use clap::Parser;
use cli::{
    Command, DiffArgs, Dir2DatArgs, MergeArgs, Opts, RebuildArgs, SplitArgs, SplitBy, StatsArgs,
    VerifyArgs,
};
use datsmith_core::{
    diff, manifest_from_scan, merge_manifests, print_diff, print_rebuild, print_summary,
    print_verify, progress, read_manifest, rebuild, scan_roots, split, verify, write_json,
    write_manifest, Header, Manifest, ManifestFormat, NoLookup, OutputFormat, RebuildOptions,
    RunContext, RunSummary, ScanResult, Settings, SplitCriterion, Stats, ThreadingMode, Warning,
};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{info, subscriber::set_global_default, Level};
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8, quiet: u8) {
    let level = match i16::from(verbose) - i16::from(quiet) {
        i16::MIN..=-1 => Level::ERROR,
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let env_filter = EnvFilter::from_default_env().add_directive(level.into());
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .finish();

    let _ = set_global_default(subscriber);
}

fn main() {
    let opts = Opts::parse();
    init_tracing(opts.verbose, opts.quiet);
    match run(opts) {
        Ok(code) => std::process::exit(code),
        Err(error) => {
            eprintln!("error: {:#}", error);
            std::process::exit(2);
        }
    }
}

fn load_settings(opts: &Opts) -> Result<Settings> {
    let mut settings = match &opts.config {
        Some(path) => Settings::load(path)?,
        None => Settings::load_or_default()?,
    };
    if opts.no_thread {
        settings.threading = ThreadingMode::Sequential;
    }
    Ok(settings)
}

fn run(opts: Opts) -> Result<i32> {
    let mut context = RunContext::new(load_settings(&opts)?);
    let show_progress = !opts.no_progress;
    let summary = match opts.command {
        Command::Dir2dat(args) => run_dir2dat(&mut context, args, show_progress)?,
        Command::Merge(args) => run_merge(args)?,
        Command::Diff(args) => run_diff(args)?,
        Command::Verify(args) => run_verify(&mut context, args, show_progress)?,
        Command::Rebuild(args) => run_rebuild(&mut context, args, show_progress)?,
        Command::Split(args) => run_split(args)?,
        Command::Stats(args) => run_stats(args)?,
    };
    Ok(summary.exit_code())
}

/// Reads every input; an undecodable one becomes a warning and is skipped.
fn read_inputs(paths: &[PathBuf], summary: &mut RunSummary) -> Vec<Manifest> {
    let mut manifests = Vec::new();
    for path in paths {
        match read_manifest(path, None) {
            Ok(manifest) => manifests.push(manifest),
            Err(error) => summary.warn(Warning::Codec {
                location: path.display().to_string(),
                message: error.to_string(),
            }),
        }
    }
    manifests
}

fn scan_with_progress(context: &RunContext, roots: &[PathBuf], show_progress: bool) -> ScanResult {
    let progress_bar = progress::scan_bar(roots, show_progress);
    let config = context.settings.scan_config();
    let cancel = context.cancel_flag();
    let result = scan_roots(roots, &config, &progress_bar, Some(cancel.as_ref()));
    progress_bar.finish_with_message("Scan complete");
    result
}

/// A file name for `label` not yet in `taken`, compared case-insensitively.
/// Repeats get ` (n)` appended before the extension.
fn part_file_name(label: &str, format: ManifestFormat, taken: &mut BTreeSet<String>) -> String {
    let stem = label.replace(['/', '\\'], "_");
    let mut candidate = format!("{}.{}", stem, format.extension());
    let mut counter = 1;
    while !taken.insert(candidate.to_lowercase()) {
        candidate = format!("{} ({}).{}", stem, counter, format.extension());
        counter += 1;
    }
    candidate
}

/// Writes one derived manifest per labelled part into `directory`.
fn write_parts<'a>(
    parts: impl IntoIterator<Item = (String, &'a Manifest)>,
    directory: &Path,
    format: ManifestFormat,
    summary: &mut RunSummary,
) {
    let mut taken = BTreeSet::new();
    for (label, manifest) in parts {
        let path = directory.join(part_file_name(&label, format, &mut taken));
        match write_manifest(manifest, &path, format) {
            Ok(()) => {
                info!(path = %path.display(), items = manifest.len(), "manifest written");
                summary.succeed();
            }
            Err(error) => summary.fail(error.to_string()),
        }
    }
}

fn run_dir2dat(
    context: &mut RunContext,
    args: Dir2DatArgs,
    show_progress: bool,
) -> Result<RunSummary> {
    context.settings.quick |= args.scan.quick;
    context.settings.include_blanks |= args.blanks;

    let scan = scan_with_progress(context, &args.roots, show_progress);
    let name = match args.name {
        Some(name) => name,
        None => args
            .roots
            .first()
            .and_then(|root| root.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| String::from("dir2dat")),
    };
    let manifest = manifest_from_scan(
        Header::named(name),
        &scan,
        &context.settings.remap,
        &NoLookup,
    );

    let mut summary = RunSummary::default();
    for warning in scan.warnings {
        summary.warn(warning);
    }
    let format = args
        .format
        .or_else(|| ManifestFormat::from_path(&args.output))
        .unwrap_or(ManifestFormat::Json);
    write_manifest(&manifest, &args.output, format)
        .with_context(|| format!("writing {}", args.output.display()))?;
    summary.succeed();
    println!(
        "Wrote {} items in {} machines to {}",
        manifest.len(),
        manifest.machine_names().len(),
        args.output.display()
    );
    print_summary(&summary);
    Ok(summary)
}

fn run_merge(args: MergeArgs) -> Result<RunSummary> {
    let mut summary = RunSummary::default();
    let inputs = read_inputs(&args.inputs, &mut summary);
    if inputs.is_empty() {
        print_summary(&summary);
        bail!("no readable input manifests");
    }
    let merged = merge_manifests(Header::named(args.name).stamped(), inputs, args.dedup);
    let format = args
        .format
        .or_else(|| ManifestFormat::from_path(&args.output))
        .unwrap_or(ManifestFormat::Json);
    write_manifest(&merged, &args.output, format)
        .with_context(|| format!("writing {}", args.output.display()))?;
    summary.succeed();
    println!("Merged {} items into {}", merged.len(), args.output.display());
    print_summary(&summary);
    Ok(summary)
}

fn run_diff(args: DiffArgs) -> Result<RunSummary> {
    let mut summary = RunSummary::default();
    let inputs = read_inputs(&args.inputs, &mut summary);
    let bases = read_inputs(&args.bases, &mut summary);
    let outputs = diff(args.mode, inputs, bases)?;

    let parts = outputs
        .iter()
        .map(|output| (output.label.clone(), &output.manifest));
    write_parts(parts, &args.output, args.format, &mut summary);
    print_diff(&outputs);
    print_summary(&summary);
    Ok(summary)
}

fn run_verify(
    context: &mut RunContext,
    args: VerifyArgs,
    show_progress: bool,
) -> Result<RunSummary> {
    context.settings.quick |= args.scan.quick;
    let manifest = read_manifest(&args.manifest, None)
        .with_context(|| format!("reading {}", args.manifest.display()))?;
    let scan = scan_with_progress(context, &args.roots, show_progress);
    let mut report = verify(&manifest, &scan, context.settings.threading);

    if !report.is_complete() {
        let path = args
            .fixdat
            .unwrap_or_else(|| PathBuf::from(format!("{}.json", report.fixdat.header.name)));
        let format = ManifestFormat::from_path(&path).unwrap_or(ManifestFormat::Json);
        match write_manifest(&report.fixdat, &path, format) {
            Ok(()) => println!("Fixdat written to {}", path.display()),
            Err(error) => report.summary.fail(error.to_string()),
        }
    }
    if let Some(path) = &args.report {
        if let Err(error) = write_json(&report, path) {
            report.summary.fail(error.to_string());
        }
    }
    print_verify(&report);
    Ok(report.summary)
}

fn run_rebuild(
    context: &mut RunContext,
    args: RebuildArgs,
    show_progress: bool,
) -> Result<RunSummary> {
    context.settings.quick |= args.scan.quick;
    let format = args.format.unwrap_or(context.settings.output_format);
    let output = match args.output {
        Some(output) => output,
        None if format == OutputFormat::Depot => context
            .settings
            .depot
            .root
            .clone()
            .context("no output given and no depot root configured")?,
        None => bail!("an output directory is required for {} rebuilds", format),
    };
    let manifest = read_manifest(&args.manifest, None)
        .with_context(|| format!("reading {}", args.manifest.display()))?;
    let scan = scan_with_progress(context, &args.roots, show_progress);

    let options = RebuildOptions::new(output, format)
        .with_inverse(args.inverse)
        .with_delete_source(args.delete)
        .with_depot(context.settings.depot.depth, context.settings.depot.reverify);
    let progress_bar = progress::output_bar(show_progress);
    let threading = context.settings.threading;
    let mut report = rebuild(&manifest, &scan, &options, threading, &progress_bar);
    progress_bar.finish_with_message("Rebuild complete");

    if let Some(path) = &args.report {
        if let Err(error) = write_json(&report, path) {
            report.summary.fail(error.to_string());
        }
    }
    print_rebuild(&report);
    Ok(report.summary)
}

fn run_split(args: SplitArgs) -> Result<RunSummary> {
    let criterion = match args.by {
        SplitBy::Kind => SplitCriterion::Kind,
        SplitBy::Hash => SplitCriterion::Hash,
        SplitBy::Ext if args.extensions.is_empty() => bail!("--by ext needs at least one --ext"),
        SplitBy::Ext => SplitCriterion::Extension(args.extensions),
        SplitBy::Size => {
            SplitCriterion::Size(args.threshold.context("--by size needs --threshold")?)
        }
    };
    let manifest = read_manifest(&args.input, None)
        .with_context(|| format!("reading {}", args.input.display()))?;

    let mut summary = RunSummary::default();
    let parts = split(manifest, &criterion);
    write_parts(
        parts.iter().map(|part| (part.header.name.clone(), part)),
        &args.output,
        args.format,
        &mut summary,
    );
    print_summary(&summary);
    Ok(summary)
}

fn run_stats(args: StatsArgs) -> Result<RunSummary> {
    let mut summary = RunSummary::default();
    let stats: Vec<Stats> = read_inputs(&args.inputs, &mut summary)
        .iter()
        .map(Stats::of)
        .collect();
    for _ in &stats {
        summary.succeed();
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        for entry in &stats {
            print!("{}", entry);
        }
    }
    print_summary(&summary);
    Ok(summary)
}
