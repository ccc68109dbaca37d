//! JSONBLite CLI
//!
//! Thin command-line wrapper over [`jsonblite::Db`]. Values are entered and
//! printed as JSON; `set` falls back to treating a non-JSON argument as a
//! plain string, so `jsonblite set name alice` works without quoting.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use jsonblite::{Db, Options};

#[derive(Parser, Debug)]
#[command(name = "jsonblite")]
#[command(about = "Single-file CBOR key-value store")]
#[command(version)]
struct Args {
    /// Path to the database file
    #[arg(short, long, default_value = "jsonblite.db")]
    db: PathBuf,

    /// Enable informational logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the value stored under a key
    Get {
        /// The key to look up
        key: String,
    },

    /// Store a value under a key
    Set {
        /// The key to store under
        key: String,

        /// The value, as JSON (bare words are stored as strings)
        value: String,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// List all keys in insertion order
    Keys,

    /// Dump the whole store as a JSON document
    Dump {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Compact the file, reclaiming dead bytes
    Vacuum,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
            .init();
    }

    let mut db = Db::open_with(
        &args.db,
        Options {
            verbose: args.verbose,
        },
    )?;

    match args.command {
        Commands::Get { key } => match db.read::<serde_json::Value>(&key)? {
            Some(value) => println!("{value}"),
            None => println!("(nil)"),
        },
        Commands::Set { key, value } => {
            let value: serde_json::Value = serde_json::from_str(&value)
                .unwrap_or_else(|_| serde_json::Value::String(value));
            db.write(&key, &value)?;
            println!("OK");
        }
        Commands::Del { key } => {
            db.delete(&key)?;
            println!("OK");
        }
        Commands::Keys => {
            for key in db.keys()? {
                println!("{key}");
            }
        }
        Commands::Dump { out } => match out {
            Some(path) => db.dump_to_file(path)?,
            None => println!("{}", db.dump()?),
        },
        Commands::Vacuum => {
            db.vacuum()?;
            println!("OK");
        }
    }

    Ok(())
}
