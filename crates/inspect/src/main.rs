use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use vectordb_core::IndexType;

mod commands;

#[derive(Parser)]
#[command(
    name = "vectordb-inspect",
    version,
    about = "Inspect, verify and convert vectordb snapshot and WAL files"
)]
struct Args {
    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the snapshot header and database statistics
    Info {
        snapshot: PathBuf,
    },
    /// Dump the records of a WAL file
    Wal {
        wal: PathBuf,
        /// Print at most this many records (0 = all)
        #[arg(long, default_value_t = 0)]
        limit: usize,
        /// Include vector payloads and metadata
        #[arg(long, default_value_t = false)]
        full: bool,
    },
    /// Check snapshot CRC and structure, and the companion WAL if present
    Verify {
        snapshot: PathBuf,
    },
    /// Export live records (snapshot plus WAL) as NDJSON
    Export {
        snapshot: PathBuf,
        output: PathBuf,
    },
    /// Import NDJSON records into a database, creating it if needed, then save
    Import {
        snapshot: PathBuf,
        input: PathBuf,
        /// Dimension for a new database
        #[arg(long)]
        dim: Option<usize>,
        /// Index type for a new database (kdtree, hnsw, ivfpq, sparse, flat, ivfflat, pq, lsh)
        #[arg(long, default_value = "hnsw")]
        index: IndexType,
    },
    /// Compact a database offline and checkpoint it
    Compact {
        snapshot: PathBuf,
    },
    /// Suggest an index type for a collection size
    Suggest {
        #[arg(long)]
        dim: usize,
        #[arg(long)]
        count: usize,
    },
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("vectordb_core=info,vectordb_inspect=info")
    });
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.log_json);

    match args.command {
        Command::Info { snapshot } => commands::info(&snapshot)?,
        Command::Wal { wal, limit, full } => commands::wal(&wal, limit, full)?,
        Command::Verify { snapshot } => commands::verify(&snapshot)?,
        Command::Export { snapshot, output } => commands::export(&snapshot, &output)?,
        Command::Import {
            snapshot,
            input,
            dim,
            index,
        } => commands::import(&snapshot, &input, dim, index)?,
        Command::Compact { snapshot } => commands::compact(&snapshot)?,
        Command::Suggest { dim, count } => {
            let suggested = IndexType::suggest(dim, count);
            println!("{suggested}");
        }
    }
    Ok(())
}
