//! # Paper Harness CLI (`pharness`)
//!
//! ## Usage
//!
//! ```bash
//! pharness --config ./config/pharness.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pharness ingest` | Extract metadata, references and images for every PDF in the input folder |
//! | `pharness index` | Chunk and embed the input PDFs into a named vector index |
//! | `pharness indexes` | List persisted indexes |
//! | `pharness ask "<question>"` | Answer one question from an index |
//! | `pharness chat` | Multi-turn conversation over stdin |
//! | `pharness completions <shell>` | Print a shell completion script |
//!
//! Without a config file every setting takes its default. Logs go to stderr
//! (`RUST_LOG` overrides the level); results go to stdout.

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use tracing_subscriber::EnvFilter;

use paper_harness::answer::{AskOptions, Granularity};
use paper_harness::chat::{self, Presentation};
use paper_harness::config;
use paper_harness::index_cmd;
use paper_harness::ingest;
use paper_harness::progress::ProgressMode;

const DEFAULT_CONFIG: &str = "./config/pharness.toml";

/// Paper Harness: ask cited questions over a folder of PDF papers.
#[derive(Parser)]
#[command(
    name = "pharness",
    about = "Paper Harness: ingest PDF papers and ask cited questions against them",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// A missing file at the default location means "all defaults".
    #[arg(long, global = true, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Progress output on stderr. Defaults to human when stderr is a
    /// terminal, otherwise off.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum StreamArg {
    Char,
    Fragment,
}

impl From<StreamArg> for Granularity {
    fn from(arg: StreamArg) -> Self {
        match arg {
            StreamArg::Char => Granularity::Char,
            StreamArg::Fragment => Granularity::Fragment,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Process every PDF in the input folder.
    ///
    /// Writes, per document, a metadata JSON named by its content hash, a
    /// references file, a copy of the PDF and its embedded images.
    Ingest {
        /// Rename input PDFs to their sanitized names first.
        #[arg(long)]
        rename: bool,

        /// Never query the remote bibliographic API.
        #[arg(long)]
        local_references: bool,
    },

    /// Build a vector index from the input PDFs (skipped if it exists).
    Index {
        /// Index name (default: `[retrieval].index_name`).
        #[arg(long)]
        name: Option<String>,
    },

    /// List persisted indexes.
    Indexes,

    /// Answer a single question.
    Ask {
        question: String,

        #[command(flatten)]
        query: QueryArgs,
    },

    /// Interactive multi-turn chat.
    Chat {
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Print a completion script for `shell`.
    Completions { shell: Shell },
}

#[derive(clap::Args)]
struct QueryArgs {
    /// Index name (default: `[retrieval].index_name`).
    #[arg(long)]
    index: Option<String>,

    /// Number of passages to retrieve (default: `[retrieval].top_k`).
    #[arg(long)]
    top_k: Option<usize>,

    /// Retrieve with a broader stepback question.
    #[arg(long)]
    stepback: bool,

    /// Stream the answer as it is generated.
    #[arg(long, value_enum, num_args = 0..=1, default_missing_value = "char")]
    stream: Option<StreamArg>,

    /// Print the retrieved passages after the answer.
    #[arg(long)]
    show_context: bool,
}

impl QueryArgs {
    fn options(&self, cfg: &config::Config) -> anyhow::Result<AskOptions> {
        let mut options = AskOptions::from_config(&cfg.retrieval);
        if let Some(k) = self.top_k {
            if k == 0 {
                anyhow::bail!("--top-k must be >= 1");
            }
            options.top_k = k;
        }
        options.stepback |= self.stepback;
        Ok(options)
    }

    fn presentation(&self) -> Presentation {
        Presentation {
            stream: self.stream.map(Granularity::from),
            show_context: self.show_context,
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("paper_harness=info,warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "pharness", &mut std::io::stdout());
        return Ok(());
    }

    init_tracing();

    // Only the default location may be absent.
    let cfg = if cli.config.exists() || cli.config != PathBuf::from(DEFAULT_CONFIG) {
        config::load_config(&cli.config)?
    } else {
        config::Config::minimal()
    };

    let progress = match cli.progress {
        Some(ProgressArg::Off) => ProgressMode::Off,
        Some(ProgressArg::Human) => ProgressMode::Human,
        Some(ProgressArg::Json) => ProgressMode::Json,
        None => ProgressMode::default_for_tty(),
    }
    .reporter();

    match cli.command {
        Commands::Ingest {
            rename,
            local_references,
        } => {
            ingest::run_ingest(&cfg, rename, local_references, progress.as_ref()).await?;
        }
        Commands::Index { name } => {
            index_cmd::run_index(&cfg, name.as_deref(), progress.as_ref()).await?;
        }
        Commands::Indexes => {
            index_cmd::run_list_indexes(&cfg).await?;
        }
        Commands::Ask { question, query } => {
            let options = query.options(&cfg)?;
            chat::run_ask(
                &cfg,
                &question,
                query.index.as_deref(),
                options,
                query.presentation(),
            )
            .await?;
        }
        Commands::Chat { query } => {
            let options = query.options(&cfg)?;
            chat::run_chat(&cfg, query.index.as_deref(), options, query.presentation()).await?;
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}
