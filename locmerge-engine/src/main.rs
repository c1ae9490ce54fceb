//! locmerge - maintenance commands for the consolidation state folder
//!
//! Passes are run by the host application through the library. This binary
//! inspects and repairs what they leave behind: adjacency data, the stored
//! pass and the recorded reviewer decisions.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use locmerge_common::config::{resolve_state_dir, StatePaths, TomlConfig};
use locmerge_engine::store::{open_stores, ExclusionStore, SeriesRelation, WorkStore};
use locmerge_engine::{AdjacencyGraph, EngineSettings};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for locmerge
#[derive(Parser, Debug)]
#[command(name = "locmerge")]
#[command(about = "Locality consolidation maintenance")]
#[command(version)]
struct Args {
    /// TOML config file
    #[arg(short, long, env = "LOCMERGE_CONFIG")]
    config: Option<PathBuf>,

    /// Folder holding the work and exclusion keyspaces
    #[arg(short, long, env = "LOCMERGE_STATE_DIR")]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check an adjacency file for one-way entries
    ValidateAdjacency {
        /// JSON file with entities and adjacency lists
        file: PathBuf,
    },
    /// Show the stored pass, if any
    Status,
    /// Drop the stored pass; reviewer decisions are kept
    Abandon,
    /// List recorded decisions for a phonetic series
    Exclusions {
        /// Phonetic codes of the series, any order
        #[arg(required = true)]
        codes: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let toml_config = TomlConfig::load_or_default(args.config.as_deref());

    // Initialize tracing; RUST_LOG wins over the config file
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| toml_config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Command::ValidateAdjacency { file } = &args.command {
        return validate_adjacency(file);
    }

    let state_dir = resolve_state_dir(args.state_dir.as_deref(), &toml_config);
    let settings = EngineSettings::resolve(&toml_config);
    let paths = StatePaths::new(state_dir);
    info!("State folder: {}", paths.root.display());

    let (work, exclusions) = open_stores(&paths, settings.max_lock_wait_ms)
        .await
        .context("Failed to open keyspaces")?;

    match args.command {
        Command::Status => show_status(&work).await?,
        Command::Abandon => abandon(&work).await?,
        Command::Exclusions { codes } => show_decisions(&exclusions, codes).await?,
        Command::ValidateAdjacency { .. } => {}
    }
    Ok(ExitCode::SUCCESS)
}

fn validate_adjacency(file: &Path) -> Result<ExitCode> {
    let graph = AdjacencyGraph::load_json(file)
        .with_context(|| format!("Failed to load adjacency file {}", file.display()))?;

    let violations = graph.validate_symmetry();
    for v in &violations {
        println!("{} lists {} as a neighbor, but {} does not list {}", v.from, v.to, v.to, v.from);
    }

    if violations.is_empty() {
        println!("{} entities, adjacency is symmetric", graph.entity_count());
        Ok(ExitCode::SUCCESS)
    } else {
        println!("{} asymmetric entries", violations.len());
        Ok(ExitCode::FAILURE)
    }
}

async fn show_status(work: &WorkStore) -> Result<()> {
    let Some(pass) = work.load_pass().await? else {
        println!("No pass in progress");
        return Ok(());
    };
    let worklist = work.load_worklist().await?.unwrap_or_default();
    let resident_localities = work.resident_locality_count().await?;

    println!("Pass {} ({})", pass.pass_id, pass.domain);
    println!("  started:     {}", pass.started_at.to_rfc3339());
    println!("  coder:       {}", pass.coder);
    println!(
        "  regions:     {}/{} ({:.1}%)",
        pass.regions_finished,
        pass.regions_total,
        pass.percent_complete()
    );
    println!("  unprocessed: {}", worklist.unprocessed.len());
    println!(
        "  resident:    {} regions, {} localities",
        worklist.loaded.len(),
        resident_localities
    );
    println!("  proposals:   {}", pass.proposals_offered);
    println!("  merges:      {}", pass.merges);
    println!("  exclusions:  {}", pass.exclusions_recorded);
    println!("  resumes:     {}", pass.resumes);
    Ok(())
}

async fn abandon(work: &WorkStore) -> Result<()> {
    match work.load_pass().await? {
        Some(pass) => {
            work.clear().await?;
            info!(pass_id = %pass.pass_id, "Pass abandoned");
            println!("Abandoned pass {}", pass.pass_id);
        }
        None => println!("No pass in progress"),
    }
    Ok(())
}

async fn show_decisions(exclusions: &ExclusionStore, mut codes: Vec<String>) -> Result<()> {
    codes.sort();
    let key = codes.join(" ");

    let links = exclusions.links_for_key(&key).await?;
    if links.is_empty() {
        println!("No decisions recorded for [{}]", key);
    }
    for link in links {
        let relation = match link.relation {
            SeriesRelation::Synonym => "same as",
            SeriesRelation::Excluded => "different from",
        };
        println!("\"{}\" {} {}", link.words.join(" "), relation, link.peer);
    }
    Ok(())
}
