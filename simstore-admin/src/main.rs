mod commands;
mod config;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use config::AdminOverrides;
use simstore_core::{Backend, PartitionKind, Result, SimilarityStore, StoreMaintenance};
use tracing::{error, info};

/// Inspect and maintain bucketed similarity datasets.
#[derive(Parser, Debug)]
#[command(name = "simstore-admin", version)]
struct Cli {
    /// Store root directory (overrides SIMSTORE_ROOT)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Comma separated cutoffs for new datasets (overrides SIMSTORE_CUTOFFS)
    #[arg(long, global = true)]
    cutoffs: Option<String>,

    /// Backend for new datasets: zlib or lz4 (overrides SIMSTORE_BACKEND)
    #[arg(long, global = true)]
    backend: Option<Backend>,

    /// Union-find variant for clustering (overrides SIMSTORE_PARTITION)
    #[arg(long, global = true)]
    partition: Option<PartitionKind>,

    /// Corpora processed concurrently by batch commands (overrides SIMSTORE_WORKERS)
    #[arg(long, global = true)]
    workers: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List corpora with a dataset
    List,
    /// Pairs per bucket and size on disk
    Stats {
        /// Corpora to report; all when omitted
        corpus_ids: Vec<u64>,
    },
    /// Rewrite one corpus into another backend
    Convert {
        corpus_id: u64,
        #[arg(long)]
        from: Backend,
        #[arg(long)]
        to: Backend,
    },
    /// Convert many corpora in parallel
    BatchConvert {
        #[arg(long)]
        from: Backend,
        #[arg(long)]
        to: Backend,
        #[arg(required = true)]
        corpus_ids: Vec<u64>,
    },
    /// Drop every pair touching the given documents
    RemoveDocs {
        #[arg(long = "corpus", required = true, num_args = 1..)]
        corpus_ids: Vec<u64>,
        #[arg(long = "doc", required = true, num_args = 1..)]
        doc_ids: Vec<u32>,
    },
    /// Repair an interrupted rewrite and clear locks of exited writers
    Recover { corpus_id: u64 },
    /// Remove a corpus's writer lock regardless of its holder
    BreakLock { corpus_id: u64 },
    /// Delete a corpus's dataset
    Drop { corpus_id: u64 },
    /// Pack corpora and extra files into one archive
    Archive {
        #[arg(long, short)]
        output: PathBuf,
        /// Extra file to carry, as NAME=PATH
        #[arg(long = "blob")]
        blobs: Vec<String>,
        #[arg(required = true)]
        corpus_ids: Vec<u64>,
    },
    /// Unpack an archive into the store
    Restore {
        input: PathBuf,
        /// Where to write the archive's extra files
        #[arg(long)]
        blob_dir: Option<PathBuf>,
    },
    /// Print the cluster hierarchy of a corpus as treemap JSON
    Cluster {
        corpus_id: u64,
        /// Whitespace separated vertex ids; defaults to ids seen in stored pairs
        #[arg(long)]
        vertices: Option<PathBuf>,
        #[arg(long)]
        pruning_size: Option<usize>,
    },
}

fn run(cli: Cli) -> Result<serde_json::Value> {
    let overrides = AdminOverrides {
        root: cli.root,
        cutoffs: cli.cutoffs,
        backend: cli.backend,
        partition: cli.partition,
        workers: cli.workers,
    };
    let store_config = config::load_store_config(&overrides)?;
    info!("Using store at {}", store_config.root.display());
    let store = SimilarityStore::open(store_config)?;
    let maintenance = StoreMaintenance::new(store.clone());

    match cli.command {
        Command::List => commands::list(&store),
        Command::Stats { corpus_ids } => commands::stats(&store, &corpus_ids),
        Command::Convert { corpus_id, from, to } => commands::convert(&maintenance, corpus_id, from, to),
        Command::BatchConvert { from, to, corpus_ids } => {
            commands::batch_convert(&maintenance, &corpus_ids, from, to)
        }
        Command::RemoveDocs { corpus_ids, doc_ids } => {
            commands::remove_docs(&maintenance, &corpus_ids, &doc_ids)
        }
        Command::Recover { corpus_id } => commands::recover(&maintenance, corpus_id),
        Command::BreakLock { corpus_id } => commands::break_lock(&maintenance, corpus_id),
        Command::Drop { corpus_id } => commands::drop_corpus(&maintenance, corpus_id),
        Command::Archive { output, blobs, corpus_ids } => {
            commands::archive(&maintenance, &corpus_ids, &blobs, &output)
        }
        Command::Restore { input, blob_dir } => {
            commands::restore(&maintenance, &input, blob_dir.as_deref())
        }
        Command::Cluster { corpus_id, vertices, pruning_size } => {
            commands::cluster(&store, corpus_id, vertices.as_deref(), pruning_size)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_logging();

    match run(cli) {
        Ok(value) => match serde_json::to_string_pretty(&value) {
            Ok(text) => {
                println!("{}", text);
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("Failed to render output: {}", e);
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            error!(code = e.code().as_str(), "{}", e);
            ExitCode::FAILURE
        }
    }
}
