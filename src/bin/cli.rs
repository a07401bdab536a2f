//! Binary entry point for the phrase index administrative CLI.
#![forbid(unsafe_code)]

#[path = "cli/config.rs"]
mod config;

use std::error::Error;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use phrase_index::admin::{
    collect_garbage, compact, open_index, stats, verify, AdminOpenOptions, VerifyLevel,
};
use phrase_index::index::{CorpusEntry, Sample, UpdateBatch};
use phrase_index::{Side, WordId};

use config::CliConfig;

#[derive(Parser, Debug)]
#[command(
    name = "phrase-index",
    version,
    about = "Administrative CLI for phrase indexes",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(flatten)]
    open: OpenArgs,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct OpenArgs {
    #[arg(long, global = true, value_name = "FILE", help = "TOML config file")]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "Prefix length the index was built with")]
    prefix_length: Option<u8>,

    #[arg(long, global = true, help = "Skip fsync after each commit")]
    no_sync: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Report store, storage and stream statistics")]
    Stats {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },

    #[command(about = "Check corpus segments and, at full level, every posting")]
    Verify {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
        #[arg(long, value_enum, default_value_t = VerifyLevelArg::Fast)]
        level: VerifyLevelArg,
    },

    #[command(about = "Count occurrences of a phrase")]
    Count {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
        #[arg(value_name = "WORD", required = true)]
        words: Vec<WordId>,
        #[arg(long, help = "Count target n-grams instead of source phrases")]
        target: bool,
    },

    #[command(about = "Sample sentence pairs containing a source phrase")]
    Sample {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
        #[arg(value_name = "WORD", required = true)]
        words: Vec<WordId>,
        #[arg(long, default_value_t = 10, help = "Maximum samples (0 = all)")]
        limit: usize,
        #[arg(long, help = "Seed for reproducible draws")]
        seed: Option<u64>,
    },

    #[command(about = "Print index entries in key order")]
    Dump {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
        #[arg(long, help = "Stop after this many entries")]
        limit: Option<usize>,
    },

    #[command(about = "Ingest JSON-lines updates into an index")]
    Ingest {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
        #[arg(long, value_name = "FILE", help = "JSON-lines file of entries and deletions")]
        input: PathBuf,
        #[arg(long, default_value_t = 1024, help = "Updates per committed batch")]
        batch_size: usize,
        #[arg(long, help = "Create the index directory if it does not exist")]
        create: bool,
    },

    #[command(about = "Snapshot the store, finalizing bulk loads")]
    Compact {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },

    #[command(about = "Reclaim deleted domains synchronously")]
    Gc {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
        #[arg(long, help = "Compact after reclaiming")]
        compact: bool,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum VerifyLevelArg {
    Fast,
    Full,
}

impl From<VerifyLevelArg> for VerifyLevel {
    fn from(level: VerifyLevelArg) -> Self {
        match level {
            VerifyLevelArg::Fast => VerifyLevel::Fast,
            VerifyLevelArg::Full => VerifyLevel::Full,
        }
    }
}

/// One line of an ingest file.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum UpdateLine {
    Add {
        #[serde(default)]
        channel: u16,
        position: i64,
        domain: u32,
        source: Vec<WordId>,
        target: Vec<WordId>,
        #[serde(default)]
        alignment: Vec<(u16, u16)>,
    },
    Delete {
        #[serde(default)]
        channel: u16,
        position: i64,
        domain: u32,
    },
}

#[derive(Debug, Serialize)]
struct IngestReport {
    lines: u64,
    accepted: u64,
    stale: u64,
    batches: u64,
}

#[derive(Debug, Serialize)]
struct CountReport {
    side: &'static str,
    words: Vec<WordId>,
    count: u64,
}

#[derive(Debug, Serialize)]
struct DumpLine {
    side: &'static str,
    domain: Option<u32>,
    words: Vec<WordId>,
    count: i64,
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let open_opts = build_open_options(&cli.open)?;

    match cli.command {
        Command::Stats { dir } => {
            let report = stats(&dir, &open_opts)?;
            emit(&cli.format, &report, || {
                let index = &report.index;
                println!(
                    "Index: prefix_length={} keys={} last_seq={} log_bytes={} bulk_pending={}",
                    index.prefix_length, index.keys, index.last_seq, index.log_bytes, index.bulk_pending
                );
                println!(
                    "Storage: segments={} bytes={} pending_deletions={:?}",
                    index.segments, index.storage_bytes, index.pending_deletions
                );
                for stream in &report.streams {
                    println!("Stream {}: position={}", stream.channel, stream.position);
                }
                println!(
                    "Filesystem: index_dir={} storage_dir={} path={}",
                    report.filesystem.index_dir_bytes,
                    report.filesystem.storage_dir_bytes,
                    report.filesystem.path
                );
            })?;
        }
        Command::Verify { dir, level } => {
            let report = verify(&dir, &open_opts, level.into())?;
            emit(&cli.format, &report, || {
                println!(
                    "Verify ({:?}) => success={} records={} segments={} source_keys={} postings={} target_keys={}",
                    report.level,
                    report.success,
                    report.counts.records,
                    report.counts.segments,
                    report.counts.source_keys,
                    report.counts.postings,
                    report.counts.target_keys,
                );
                for finding in &report.findings {
                    println!("- {:?}: {}", finding.severity, finding.message);
                }
            })?;
            if !report.success {
                std::process::exit(2);
            }
        }
        Command::Count { dir, words, target } => {
            let side = if target { Side::Target } else { Side::Source };
            let index = open_index(&dir, &open_opts)?;
            let count = index.count_occurrences(side, &words)?;
            index.close()?;
            let report = CountReport {
                side: side_name(side),
                words,
                count,
            };
            emit(&cli.format, &report, || println!("{}", report.count))?;
        }
        Command::Sample {
            dir,
            words,
            limit,
            seed,
        } => {
            let index = open_index(&dir, &open_opts)?;
            let mut collector = index.new_collector(None, false)?;
            if let Some(seed) = seed {
                collector = collector.with_seed(seed);
            }
            let samples = collector.extend(&words, limit)?;
            drop(collector);
            index.close()?;
            emit(&cli.format, &SampleList::from(&samples), || {
                for sample in &samples {
                    println!(
                        "domain={} offsets={:?} source={:?} target={:?}",
                        sample.domain, sample.offsets, sample.source, sample.target
                    );
                }
            })?;
        }
        Command::Dump { dir, limit } => {
            let index = open_index(&dir, &open_opts)?;
            let mut lines = Vec::new();
            for entry in index.new_iterator()?.take(limit.unwrap_or(usize::MAX)) {
                let entry = entry?;
                lines.push(DumpLine {
                    side: side_name(entry.side),
                    domain: entry.domain.map(u32::from),
                    words: entry.words,
                    count: entry.count,
                });
            }
            index.close()?;
            emit(&cli.format, &lines, || {
                for line in &lines {
                    match line.domain {
                        Some(domain) => {
                            println!("{} {:?} domain={} count={}", line.side, line.words, domain, line.count)
                        }
                        None => println!("{} {:?} count={}", line.side, line.words, line.count),
                    }
                }
            })?;
        }
        Command::Ingest {
            dir,
            input,
            batch_size,
            create,
        } => {
            let mut opts = open_opts.clone();
            opts.create_if_missing = create;
            let report = run_ingest(&dir, &input, batch_size.max(1), &opts)?;
            emit(&cli.format, &report, || {
                println!(
                    "Ingested {} of {} updates in {} batches ({} stale)",
                    report.accepted, report.lines, report.batches, report.stale
                );
            })?;
        }
        Command::Compact { dir } => {
            let report = compact(&dir, &open_opts)?;
            emit(&cli.format, &report, || {
                println!(
                    "Compaction finished in {:.2} ms (keys {} -> {}, log {} -> {} bytes)",
                    report.duration_ms,
                    report.keys_before,
                    report.keys_after,
                    report.log_bytes_before,
                    report.log_bytes_after
                );
            })?;
        }
        Command::Gc { dir, compact } => {
            let report = collect_garbage(&dir, &open_opts, compact)?;
            emit(&cli.format, &report, || {
                println!(
                    "Reclaimed {} domains in {:.2} ms (pending before: {:?}, compacted={})",
                    report.reclaimed, report.duration_ms, report.pending_before, report.compacted
                );
            })?;
        }
    }

    Ok(())
}

fn build_open_options(args: &OpenArgs) -> Result<AdminOpenOptions, Box<dyn Error>> {
    let mut opts = AdminOpenOptions::default();
    CliConfig::load(args.config.as_deref())?.apply(&mut opts)?;
    if let Some(prefix_length) = args.prefix_length {
        opts.prefix_length = prefix_length;
    }
    if args.no_sync {
        opts.sync_writes = false;
    }
    Ok(opts)
}

fn run_ingest(
    dir: &Path,
    input: &Path,
    batch_size: usize,
    opts: &AdminOpenOptions,
) -> Result<IngestReport, Box<dyn Error>> {
    let index = open_index(dir, opts)?;
    let reader = BufReader::new(File::open(input)?);
    let mut report = IngestReport {
        lines: 0,
        accepted: 0,
        stale: 0,
        batches: 0,
    };
    let mut batch = UpdateBatch::new(&index.streams());
    let mut queued = 0usize;
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        report.lines += 1;
        let update: UpdateLine = serde_json::from_str(&line)
            .map_err(|err| format!("{}:{}: {err}", input.display(), lineno + 1))?;
        let accepted = match update {
            UpdateLine::Add {
                channel,
                position,
                domain,
                source,
                target,
                alignment,
            } => batch.add(
                channel,
                position,
                CorpusEntry::new(domain, source, target, alignment),
            ),
            UpdateLine::Delete {
                channel,
                position,
                domain,
            } => batch.delete(channel, position, domain),
        };
        if accepted {
            report.accepted += 1;
            queued += 1;
        } else {
            report.stale += 1;
        }
        if queued >= batch_size {
            let streams = index.put_batch(&batch)?;
            report.batches += 1;
            batch = UpdateBatch::new(&streams);
            queued = 0;
        }
    }
    if queued > 0 {
        index.put_batch(&batch)?;
        report.batches += 1;
    }
    index.close()?;
    Ok(report)
}

#[derive(Debug, Serialize)]
struct SampleLine<'a> {
    domain: u32,
    offsets: &'a [u16],
    source: &'a [WordId],
    target: &'a [WordId],
    alignment: &'a [(u16, u16)],
}

#[derive(Debug, Serialize)]
struct SampleList<'a>(Vec<SampleLine<'a>>);

impl<'a> From<&'a Vec<Sample>> for SampleList<'a> {
    fn from(samples: &'a Vec<Sample>) -> Self {
        SampleList(
            samples
                .iter()
                .map(|s| SampleLine {
                    domain: s.domain.into(),
                    offsets: &s.offsets,
                    source: &s.source,
                    target: &s.target,
                    alignment: &s.alignment,
                })
                .collect(),
        )
    }
}

fn side_name(side: Side) -> &'static str {
    match side {
        Side::Source => "source",
        Side::Target => "target",
    }
}

fn emit<T, F>(format: &OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: Serialize,
    F: Fn(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(),
    }
    Ok(())
}
