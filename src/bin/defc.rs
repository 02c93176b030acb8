//! Definition compiler CLI
//!
//! Usage:
//!   cargo run --bin defc -- compile ./definitions --kind case
//!   cargo run --bin defc -- compile ./definitions --kind case --persist --store defc-store.json
//!   cargo run --bin defc -- compile ./templates --kind template --flat --json
//!   cargo run --bin defc -- config
//!
//! Without `--persist` the run decides revisions against the store but
//! writes nothing back.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};

use defc::adapters::{
    FsContent, FsSourceProvider, InMemoryDictionary, InMemoryStore, StandardCallback,
    StructuralSchemaValidator,
};
use defc::{CompileOutcome, CompilerContext, ConfigLoader, DefinitionCompiler};
use defc_core::{DefinitionKind, Severity};

#[derive(Parser, Debug)]
#[command(name = "defc")]
#[command(about = "Compile hierarchical object-type definitions")]
struct Cli {
    /// Config file (default: $DEFC_CONFIG, then ./defc.yaml)
    #[arg(long, global = true, env = "DEFC_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile every source of one kind under a directory
    Compile {
        /// Source root; holds one subdirectory per kind unless --flat
        dir: PathBuf,

        /// Definition kind (case, document, task, workflow, generic, template)
        #[arg(long, short = 'k', default_value = "generic")]
        kind: String,

        /// Treat DIR itself as the kind directory
        #[arg(long)]
        flat: bool,

        /// Write new revisions back to the store
        #[arg(long, short = 'p')]
        persist: bool,

        /// JSON snapshot of persisted definitions
        #[arg(long, short = 's', default_value = "defc-store.json")]
        store: PathBuf,

        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let loader = match cli.config {
        Some(path) => ConfigLoader::new(path),
        None => ConfigLoader::from_env(),
    };
    let config = loader.load()?;

    match cli.command {
        Command::Config => {
            print!("{}", serde_yaml::to_string(&config)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Compile {
            dir,
            kind,
            flat,
            persist,
            store,
            json,
        } => {
            let kind = DefinitionKind::parse(&kind).ok_or_else(|| anyhow!("unknown definition kind: {kind}"))?;

            let dictionary = Arc::new(InMemoryDictionary::new());
            dictionary.load_json(&store).await?;

            let sources: Arc<FsSourceProvider> = Arc::new(if flat {
                FsSourceProvider::flat(&dir)
            } else {
                FsSourceProvider::new(&dir)
            });
            let compiler = DefinitionCompiler::new(
                Arc::new(CompilerContext::new(config)),
                sources,
                Arc::new(FsContent),
                Arc::new(StructuralSchemaValidator::new()),
                dictionary.clone(),
                Arc::new(InMemoryStore::new()),
            );
            let callback = Arc::new(StandardCallback::new(kind, dictionary.clone()));

            let outcome = compiler
                .compile_kind(None, callback, persist)
                .await
                .with_context(|| format!("Compilation of {} failed", dir.display()))?;

            if persist {
                dictionary.save_json(&store).await?;
            }
            print_outcome(&outcome, json)?;
            let failed = outcome.errors().next().is_some();
            outcome.background.join().await;

            Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
        }
    }
}

fn print_outcome(outcome: &CompileOutcome, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&outcome.report())?);
        return Ok(());
    }

    for def in &outcome.definitions {
        let status = if outcome.skipped.contains(&def.key()) {
            "unchanged"
        } else if outcome.persisted.contains(&def.key()) {
            "persisted"
        } else {
            "compiled"
        };
        println!("{:<40} rev {:<4} {status}", def.key(), def.revision);
    }
    for message in &outcome.messages {
        if message.severity != Severity::Info {
            println!("{message}");
        }
    }
    for key in &outcome.removal_candidates {
        println!("removal candidate: {key}");
    }
    println!(
        "{} compiled, {} unchanged, {} errors",
        outcome.definitions.len(),
        outcome.skipped.len(),
        outcome.errors().count()
    );
    Ok(())
}
