//! revbridge — inspection tool for bridge state.
//!
//! Operates on the revision map database that a bridge instance maintains
//! for one source repository / target path pair.
//!
//! # Usage
//!
//! ```bash
//! # Summarize a revision map
//! revbridge info state/map.db
//!
//! # Resolve a revision or commit
//! revbridge lookup state/map.db --revision 42
//! revbridge lookup state/map.db --commit abc123...
//!
//! # Verify map consistency
//! revbridge check state/map.db
//!
//! # Export / restore as JSON
//! revbridge export state/map.db map.json
//! revbridge import state/map.db map.json
//! ```

use anyhow::{Context, Result, anyhow};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use revbridge_core::{ObjectId, RevisionMap};

#[derive(Parser, Debug)]
#[command(name = "revbridge")]
#[command(author = "RevBridge Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Inspect and maintain revision map state")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Display a summary of the revision map
    Info {
        /// Path to the map database
        map: PathBuf,
    },

    /// Look up one side of a mapping
    Lookup {
        /// Path to the map database
        map: PathBuf,
        /// Revision to resolve (nearest previous mapped revision is
        /// reported when the revision itself is unmapped)
        #[arg(short, long)]
        revision: Option<u64>,
        /// Commit id (hex) to resolve
        #[arg(short, long)]
        commit: Option<String>,
    },

    /// Verify map consistency
    Check {
        /// Path to the map database
        map: PathBuf,
    },

    /// Export the map as JSON
    Export {
        /// Path to the map database
        map: PathBuf,
        /// Output JSON file
        output: PathBuf,
    },

    /// Import a JSON export into an empty map database
    Import {
        /// Path to the map database
        map: PathBuf,
        /// Input JSON file
        input: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Info { map } => info(&map),
        Commands::Lookup {
            map,
            revision,
            commit,
        } => lookup(&map, revision, commit),
        Commands::Check { map } => check(&map),
        Commands::Export { map, output } => {
            let map = open(&map)?;
            map.export_json(&output)
                .with_context(|| format!("failed to export to {:?}", output))?;
            println!("Exported {} entries to {}", map.len()?, output.display());
            Ok(())
        }
        Commands::Import { map, input } => {
            let mut map = open(&map)?;
            map.import_json(&input)
                .with_context(|| format!("failed to import from {:?}", input))?;
            println!("Imported {} entries", map.len()?);
            Ok(())
        }
    }
}

fn open(path: &Path) -> Result<RevisionMap> {
    tracing::debug!(path = %path.display(), "opening revision map");
    RevisionMap::open(path).with_context(|| format!("failed to open revision map at {:?}", path))
}

fn info(path: &Path) -> Result<()> {
    let map = open(path)?;
    let count = map.len()?;
    println!("Revision map: {}", path.display());
    println!("Entries:      {}", count);
    if let Some((revision, commit)) = map.last_mapped()? {
        let entries = map.entries()?;
        let first = entries.first().expect("non-empty map has a first entry");
        println!("First mapped: r{} -> {}", first.revision, first.commit);
        println!("Last mapped:  r{} -> {}", revision, commit);
        if let Some(at) = Utc.timestamp_opt(entries.last().map(|e| e.recorded_at).unwrap_or(0), 0).single() {
            println!("Last record:  {}", at.to_rfc3339());
        }
    } else {
        println!("Map is empty");
    }
    Ok(())
}

fn lookup(path: &Path, revision: Option<u64>, commit: Option<String>) -> Result<()> {
    let map = open(path)?;
    match (revision, commit) {
        (Some(revision), None) => {
            match map.commit_for(revision)? {
                Some(commit) => println!("r{} -> {}", revision, commit),
                None => match map.nearest_previous_mapped(revision)? {
                    Some((nearest, commit)) => {
                        println!("r{} is not mapped; nearest previous is r{} -> {}", revision, nearest, commit)
                    }
                    None => println!("r{} is not mapped and nothing precedes it", revision),
                },
            }
            Ok(())
        }
        (None, Some(hex)) => {
            let id = ObjectId::from_hex(&hex).map_err(|e| anyhow!("invalid commit id: {}", e))?;
            match map.revision_for(id)? {
                Some(revision) => println!("{} -> r{}", id, revision),
                None => println!("{} is not mapped", id),
            }
            Ok(())
        }
        _ => Err(anyhow!("pass exactly one of --revision or --commit")),
    }
}

fn check(path: &Path) -> Result<()> {
    let map = open(path)?;
    let entries = map.entries()?;
    let mut commits = HashSet::new();
    let mut previous: Option<u64> = None;
    let mut gaps = 0u64;
    for entry in &entries {
        if !commits.insert(entry.commit.clone()) {
            return Err(anyhow!(
                "commit {} is mapped to more than one revision",
                entry.commit
            ));
        }
        if let Some(previous) = previous {
            if entry.revision <= previous {
                return Err(anyhow!("revisions are not strictly increasing at r{}", entry.revision));
            }
            gaps += entry.revision - previous - 1;
        }
        previous = Some(entry.revision);
    }
    println!(
        "OK: {} entries, {} unmapped revisions inside the range",
        entries.len(),
        gaps
    );
    Ok(())
}
