//! webofdata - command line access to an embedded entity store
//!
//! Usage:
//!   webofdata --data-dir ./data/store import people people.json
//!   webofdata --data-dir ./data/store get http://example.org/people/alice
//!   webofdata --data-dir ./data/store changes people --take 100

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::fs::File;
use std::io::{self, BufReader, Write};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};
use webofdata::{
    storage::{DatasetCopier, Pipe},
    Store, StoreConfig,
};

#[derive(Parser, Debug)]
#[command(name = "webofdata")]
#[command(about = "Embedded graph-entity store", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "./data/store", global = true)]
    data_dir: String,

    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest a JSON array of entities from a file, or stdin with `-`
    Import { dataset: String, file: String },

    /// Print an entity merged across datasets
    Get {
        id: String,
        #[arg(short = 's', long = "dataset")]
        datasets: Vec<String>,
    },

    /// Print the entities `id` references, or that reference it with --inverse
    Related {
        id: String,
        #[arg(long)]
        property: Option<String>,
        #[arg(long)]
        inverse: bool,
        #[arg(long, default_value_t = 0)]
        skip: usize,
        #[arg(long)]
        take: Option<usize>,
        #[arg(short = 's', long = "dataset")]
        datasets: Vec<String>,
    },

    /// List the entities of a dataset
    Entities {
        dataset: String,
        #[arg(long)]
        token: Option<String>,
        #[arg(long)]
        take: Option<usize>,
    },

    /// Read the change feed of a dataset
    Changes {
        dataset: String,
        #[arg(long)]
        token: Option<String>,
        #[arg(long)]
        take: Option<usize>,
    },

    /// List datasets
    Datasets,

    /// Delete a dataset and all of its data
    Delete { dataset: String },

    /// Copy every change of one dataset into another
    Copy { source: String, target: String },
}

fn print_listing(context: Value, items: Vec<Value>, next_token: Option<String>) -> io::Result<()> {
    let mut out = io::stdout().lock();
    let mut body = vec![context];
    body.extend(items);
    if let Some(token) = next_token {
        body.push(json!({"@id": "@continuation", "wod:next-data": token}));
    }
    serde_json::to_writer_pretty(&mut out, &body)?;
    writeln!(out)
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(Store::open(StoreConfig::with_path(&cli.data_dir))?);

    match cli.command {
        Command::Import { dataset, file } => {
            let count = if file == "-" {
                store.store_entity_stream(&dataset, io::stdin().lock())?
            } else {
                store.store_entity_stream(&dataset, BufReader::new(File::open(&file)?))?
            };
            info!(dataset = %dataset, count, "import finished");
            println!("{} entities imported into '{}'", count, dataset);
        }
        Command::Get { id, datasets } => {
            let rid = store.resource_id(&id)?;
            let entity = store.get_entity(&rid, &datasets)?;
            print_listing(store.namespaces_context(), vec![entity], None)?;
        }
        Command::Related { id, property, inverse, skip, take, datasets } => {
            let rid = store.resource_id(&id)?;
            let related = store.get_related(&rid, property.as_deref(), inverse, skip, take, &datasets)?;
            print_listing(store.namespaces_context(), related, None)?;
        }
        Command::Entities { dataset, token, take } => {
            let page = store.scan_entities_from_token(&dataset, token.as_deref(), take)?;
            print_listing(store.namespaces_context(), page.items, page.next_token)?;
        }
        Command::Changes { dataset, token, take } => {
            let page = store.scan_changes_from_token(&dataset, token.as_deref(), take)?;
            if page.full_resync {
                eprintln!("token generation changed, feed restarted from the beginning");
            }
            print_listing(store.namespaces_context(), page.items, Some(page.next_token))?;
        }
        Command::Datasets => {
            for dataset in store.datasets() {
                println!("{}\t{}\t{}", dataset.id(), dataset.name(), dataset.last_sequence());
            }
        }
        Command::Delete { dataset } => {
            store.delete_dataset(&dataset)?;
            println!("dataset '{}' deleted", dataset);
        }
        Command::Copy { source, target } => {
            store.require_dataset(&source)?;
            let copier = DatasetCopier::new(Arc::clone(&store), target.clone());
            let pipe = Pipe::new(format!("{}->{}", source, target), source, Box::new(copier));
            let position = pipe.run_once(&store, None)?.unwrap_or_default();
            println!("copied changes up to sequence {} into '{}'", position, target);
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_writer(io::stderr).compact().init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
