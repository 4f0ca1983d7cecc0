//! # nl2mongo CLI
//!
//! ## Usage
//!
//! ```bash
//! nl2mongo --config ./config/nl2mongo.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `nl2mongo serve` | Start the HTTP server |
//! | `nl2mongo ask "<query>"` | Translate and execute one query, print the response |
//! | `nl2mongo exec "<command>"` | Execute a literal shell-style command, skipping the model |
//! | `nl2mongo prompt` | Print the instructions sent to the model |
//!
//! ## Examples
//!
//! ```bash
//! # Start the server
//! nl2mongo serve --config ./config/nl2mongo.toml
//!
//! # One-off query
//! nl2mongo ask "users older than 30"
//!
//! # Check how a command would be interpreted, without a database
//! nl2mongo exec "db.users.find({name: 'John'})" --memory
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use nl2mongo::config::{self, Config};
use nl2mongo::generator::{create_generator, StaticGenerator, TextGenerator};
use nl2mongo::store::memory::MemoryStore;
use nl2mongo::store::mongo::MongoStore;
use nl2mongo::store::DocumentStore;
use nl2mongo::translate::{Translator, INSTRUCTIONS};
use nl2mongo::{logging, server};

/// nl2mongo: translate natural-language requests into MongoDB operations.
#[derive(Parser)]
#[command(
    name = "nl2mongo",
    about = "Translate natural-language requests into MongoDB operations and run them",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/nl2mongo.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    ///
    /// Binds to `[server].bind` and serves `POST /query` and `GET /health`.
    Serve,

    /// Translate and execute a single query, printing the response as JSON.
    Ask {
        /// The natural-language request.
        query: String,
    },

    /// Execute a literal command such as `db.users.find({})`.
    ///
    /// Skips the language model. Useful for checking how a generated command
    /// is interpreted.
    Exec {
        /// The shell-style command.
        command: String,

        /// Run against an empty in-memory store instead of MongoDB.
        #[arg(long)]
        memory: bool,
    },

    /// Print the instructions sent to the language model.
    Prompt,
}

async fn connect_store(cfg: &Config) -> anyhow::Result<Arc<dyn DocumentStore>> {
    let store = MongoStore::connect(&cfg.store.resolved_uri(), &cfg.store.database).await?;
    tracing::info!(database = %cfg.store.database, "connected to MongoDB");
    Ok(Arc::new(store))
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let cli = Cli::parse();

    // Commands that don't require config
    match &cli.command {
        Commands::Prompt => {
            print!("{}", INSTRUCTIONS);
            return Ok(());
        }
        Commands::Exec {
            command,
            memory: true,
        } => {
            let translator = Translator::new(
                Arc::new(StaticGenerator::new(command.clone())),
                Arc::new(MemoryStore::new("memory")),
            );
            print_json(&translator.run_command(command).await)?;
            return Ok(());
        }
        _ => {}
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            let generator: Arc<dyn TextGenerator> = Arc::from(create_generator(&cfg.generator)?);
            let store = connect_store(&cfg).await?;
            let translator = Arc::new(Translator::new(generator, store));
            server::run_server(&cfg.server.bind, translator).await?;
        }
        Commands::Ask { query } => {
            let generator: Arc<dyn TextGenerator> = Arc::from(create_generator(&cfg.generator)?);
            let store = connect_store(&cfg).await?;
            let translator = Translator::new(generator, store);
            let envelope = translator.translate(&query).await?;
            print_json(&envelope)?;
        }
        Commands::Exec { command, .. } => {
            let store = connect_store(&cfg).await?;
            let translator = Translator::new(Arc::new(StaticGenerator::new(command.clone())), store);
            print_json(&translator.run_command(&command).await)?;
        }
        Commands::Prompt => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
