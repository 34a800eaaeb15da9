use anyhow::Result;
use clap::{Parser, Subcommand};
use dictfilter::config::{DEFAULT_INPUT, DEFAULT_SCHEMA, DEFAULT_TAG_FIELD, DEFAULT_TAG_VALUE};
use dictfilter::io::compression::DEFAULT_STORE_CODEC;
use dictfilter::sink::store::DEFAULT_BATCH_SIZE;
use dictfilter::{OutputMode, PipelineConfig, Runner, TagFilter};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    version,
    about = "Filter a dictionary JSONL extract down to a schema's fields"
)]
struct Cli {
    /// Stop after writing this many entries (default: whole input)
    #[arg(short = 'n', long)]
    limit: Option<u64>,
    /// Input JSONL file, optionally compressed (.gz, .zst, .bz2, .xz)
    #[arg(long, default_value = DEFAULT_INPUT)]
    input: PathBuf,
    /// Reference schema (loose JSON)
    #[arg(long, default_value = DEFAULT_SCHEMA)]
    schema: PathBuf,
    /// Keep only entries whose tag field equals this value
    #[arg(long, default_value = DEFAULT_TAG_VALUE)]
    lang: String,
    /// Field compared against --lang
    #[arg(long, default_value = DEFAULT_TAG_FIELD)]
    tag_field: String,
    /// Log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
    /// Print the run summary as JSON on stderr instead of plain text
    #[arg(long)]
    json_summary: bool,
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Write JSON Lines to a file, or to stdout
    Stream {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Write a SQLite database with prefix and substring indexes on `word`
    Store {
        #[arg(long)]
        db: PathBuf,
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,
        /// Compress the finished database and delete the original
        #[arg(long, num_args = 0..=1, default_missing_value = DEFAULT_STORE_CODEC, value_name = "CODEC")]
        compress: Option<String>,
    },
}

impl Cli {
    fn into_config(self) -> PipelineConfig {
        let output = match self.mode {
            Mode::Stream { output } => OutputMode::Stream { output },
            Mode::Store {
                db,
                batch_size,
                compress,
            } => OutputMode::Store {
                db,
                batch_size,
                compress,
            },
        };
        PipelineConfig::new(output)
            .with_limit(self.limit)
            .with_input(self.input)
            .with_schema(self.schema)
            .with_filter(TagFilter::new(self.tag_field, self.lang))
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let json_summary = cli.json_summary;
    let summary = Runner::new(cli.into_config()).run()?;

    if json_summary {
        eprintln!("{}", serde_json::to_string(&summary)?);
        return Ok(());
    }
    eprintln!(
        "\nRead {} lines, output {} entries",
        summary.lines_read, summary.records_written
    );
    if let Some(report) = &summary.compression {
        eprintln!("Compressed {report}");
    }
    Ok(())
}
