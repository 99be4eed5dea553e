use std::path::PathBuf;

use anyhow::{Context, Result};
use binlex_core::disassembler::{Disassembler, DisassemblerBuilder};
use binlex_core::{
    Architecture, ByteSource, ExtractionConfig, FileSource, Format, Mode, Sink, WriteSummary,
};
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Extract normalized block and function traits from binaries as JSON Lines.
///
/// This CLI is a thin wrapper around `binlex-core` (exposed in code as
/// `binlex_core`). Traits go to stdout unless `--output` is given; logs go
/// to stderr.
#[derive(Parser, Debug)]
#[command(name = "binlex", version, about = "Binary trait extractor", long_about = None)]
pub struct Args {
    /// Binary or shellcode file to analyze.
    #[arg(short, long)]
    pub input: PathBuf,

    /// Container format (auto, raw, pe, elf, macho).
    #[arg(short, long, default_value = "auto")]
    pub format: String,

    /// Instruction set (x86, x86_64, arm, arm64). Detected from the container when omitted.
    #[arg(short, long)]
    pub arch: Option<String>,

    /// Trait granularity (block, function).
    #[arg(short, long)]
    pub mode: Option<String>,

    /// Worker threads.
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Corpus name stamped on every trait.
    #[arg(short, long)]
    pub corpus: Option<String>,

    /// Tag stamped on every trait; repeat for several.
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    /// Write traits to this file instead of stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// YAML or JSON extraction config; flags override its values.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

/// `auto` means sniff the container; anything else forces a format.
pub fn parse_format(name: &str) -> Result<Option<Format>> {
    if name.eq_ignore_ascii_case("auto") {
        return Ok(None);
    }
    let format = name.parse::<Format>().with_context(|| format!("Invalid --format {name}"))?;
    Ok(Some(format))
}

/// Start from the config file (or defaults) and apply command-line overrides.
pub fn build_config(args: &Args) -> Result<ExtractionConfig> {
    let mut config = match &args.config {
        Some(path) => ExtractionConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ExtractionConfig::default(),
    };

    if let Some(threads) = args.threads {
        config = config.with_threads(threads).context("Invalid --threads")?;
    }
    if let Some(corpus) = &args.corpus {
        config = config.with_corpus(corpus.clone());
    }
    if !args.tags.is_empty() {
        config = config.with_tags(args.tags.iter().cloned()).context("Invalid --tag")?;
    }
    if let Some(mode) = &args.mode {
        config = config.with_mode(mode.parse::<Mode>().context("Invalid --mode")?);
    }
    if let Some(arch) = &args.arch {
        config =
            config.with_architecture(arch.parse::<Architecture>().context("Invalid --arch")?);
    }
    Ok(config)
}

/// Frontend and library versions, logged at startup.
pub fn version_banner() -> String {
    format!("binlex {} (binlex-core {})", env!("CARGO_PKG_VERSION"), binlex_core::version())
}

/// `RUST_LOG` wins; otherwise `--verbose` selects debug over info.
pub fn env_filter(verbose: bool) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if verbose {
        EnvFilter::new("binlex=debug,binlex_core=debug")
    } else {
        EnvFilter::new("binlex=info,binlex_core=info")
    }
}

/// Load the input, extract every trait and write it to the selected sink.
pub fn run(args: &Args) -> Result<WriteSummary> {
    let config = build_config(args)?;
    let format = parse_format(&args.format)?;

    let source = FileSource::open(&args.input)
        .with_context(|| format!("Failed to load input {}", args.input.display()))?;
    debug!(path = %args.input.display(), bytes = source.size(), "Loaded input");

    let mut builder = DisassemblerBuilder::new(&source).config(config);
    if let Some(format) = format {
        builder = builder.format(format);
    }
    let disassembler = builder
        .build()
        .with_context(|| format!("Failed to prepare {}", args.input.display()))?;

    let sink = args.output.clone().map(Sink::File).unwrap_or_default();
    let mut writer = sink.open().context("Failed to open output")?;
    let summary = disassembler
        .write_traits(&mut writer)
        .context("Failed to write traits")?;

    info!(
        format = %disassembler.format(),
        written = summary.written,
        skipped_regions = summary.skipped_regions,
        "Wrote traits"
    );
    Ok(summary)
}
