use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use chronicle_temporal::{Order, Period, TemporalStore, WriteBatch, MASTER};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "chronicle-temporal", version, about = "Inspect and edit a temporal store")]
struct Cli {
    /// Store root directory
    #[arg(long, default_value = "./data")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List branches with their fork point and latest commit
    Branches,
    /// Create a branch from a parent
    Branch {
        name: String,
        #[arg(long, default_value = MASTER)]
        parent: String,
        /// Branching timestamp; defaults to the parent's latest commit
        #[arg(long)]
        at: Option<i64>,
    },
    /// List the chunks of a branch
    Chunks {
        #[arg(long, default_value = MASTER)]
        branch: String,
    },
    /// Read a key at a timestamp
    Get {
        keyspace: String,
        key: String,
        #[arg(long, default_value = MASTER)]
        branch: String,
        /// Defaults to the branch's latest commit
        #[arg(long)]
        at: Option<i64>,
    },
    /// Write a key in its own commit
    Put {
        keyspace: String,
        key: String,
        value: String,
        #[arg(long, default_value = MASTER)]
        branch: String,
    },
    /// Commit timestamps at which a key changed
    History {
        keyspace: String,
        key: String,
        #[arg(long, default_value = MASTER)]
        branch: String,
        #[arg(long)]
        newest_first: bool,
    },
    /// Close the active chunk of a branch
    Rollover {
        #[arg(long, default_value = MASTER)]
        branch: String,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let store = TemporalStore::open(&cli.root)
        .with_context(|| format!("opening store at {}", cli.root.display()))?;
    let mut out = io::BufWriter::new(io::stdout());

    match cli.command {
        Commands::Branches => {
            for info in store.branches()? {
                writeln!(
                    out,
                    "{:<20} parent={:<12} fork={:<15} now={}",
                    info.name,
                    info.parent.as_deref().unwrap_or("-"),
                    info.branching_timestamp,
                    info.now
                )?;
            }
        }
        Commands::Branch { name, parent, at } => {
            let info = store.create_branch(&name, &parent, at)?;
            writeln!(out, "created {} from {} at {}", info.name, parent, info.branching_timestamp)?;
        }
        Commands::Chunks { branch } => {
            for chunk in store.chunks(&branch)? {
                let end = chunk
                    .valid_to
                    .map_or_else(|| "open".to_string(), |end| end.to_string());
                writeln!(out, "{:>6}  {:>15}  {:>15}", chunk.index, chunk.valid_from, end)?;
            }
        }
        Commands::Get {
            keyspace,
            key,
            branch,
            at,
        } => {
            let at = match at {
                Some(at) => at,
                None => store.branch(&branch)?.now,
            };
            let result = store.get(&branch, &keyspace, &key, at)?;
            match result.value {
                Some(value) => writeln!(out, "{}  {}", String::from_utf8_lossy(&value), result.period)?,
                None => writeln!(out, "(absent)  {}", result.period)?,
            }
        }
        Commands::Put {
            keyspace,
            key,
            value,
            branch,
        } => {
            let mut batch = WriteBatch::new();
            batch.put(keyspace, key, value);
            let timestamp = store.commit(&branch, &batch)?;
            writeln!(out, "committed at {timestamp}")?;
        }
        Commands::History {
            keyspace,
            key,
            branch,
            newest_first,
        } => {
            let order = if newest_first {
                Order::Descending
            } else {
                Order::Ascending
            };
            for timestamp in store.history(&branch, &keyspace, &key, &Period::eternal(), order)? {
                writeln!(out, "{timestamp}")?;
            }
        }
        Commands::Rollover { branch } => {
            let chunk = store.rollover(&branch)?;
            writeln!(out, "rolled {branch} over to chunk {} at {}", chunk.index, chunk.valid_from)?;
        }
    }
    out.flush()?;
    store.close();
    Ok(())
}
