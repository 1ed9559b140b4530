//! Transfer Workflow CLI
//!
//! Inspect and exercise a catalog without a database:
//!
//!   cargo run --features cli --bin transfer-workflow -- validate
//!   cargo run --features cli --bin transfer-workflow -- edges UNDER_SCRUTINY
//!   cargo run --features cli --bin transfer-workflow -- simulate \
//!     --attach SALE_AGREEMENT --attach SITE_PLAN --to UNDER_SCRUTINY
//!
//! The catalog path defaults to TRANSFER_CATALOG_PATH (or config/catalog).

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};

use transfer_workflow::case::{Actor, NewCase};
use transfer_workflow::config::EngineConfig;
use transfer_workflow::store::MemoryCaseStore;
use transfer_workflow::workflow::{
    CatalogDefinition, CatalogLoader, GuardRegistry, LoggingDocumentService, TransitionGraph,
    TransitionRequest, WorkflowOrchestrator,
};

#[derive(Parser)]
#[command(name = "transfer-workflow")]
#[command(version)]
#[command(about = "Validate and simulate property-transfer workflow catalogs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Catalog file, or directory of catalogs
    #[arg(long, short = 'c', global = true)]
    catalog: Option<PathBuf>,

    /// Catalog id when the path is a directory holding several catalogs
    #[arg(long, global = true)]
    catalog_id: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the catalog and report errors and warnings
    Validate,

    /// List the outgoing edges of a stage with their guards
    Edges {
        /// Stage code
        stage: String,
    },

    /// Open a demo case in memory and dry-run its transitions
    Simulate {
        /// Attachment types to add before evaluating (repeatable)
        #[arg(long)]
        attach: Vec<String>,

        /// Attempt a commit to this stage after the dry-run
        #[arg(long)]
        to: Option<String>,

        /// Role of the acting user
        #[arg(long, default_value = "SCRUTINY_OFFICER")]
        role: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = EngineConfig::from_env()?;
    let path = cli.catalog.clone().unwrap_or_else(|| config.catalog_path.clone());
    let def = load_catalog(&path, cli.catalog_id.as_deref())?;

    match cli.command {
        Commands::Validate => validate(&def, cli.json),
        Commands::Edges { stage } => edges(&def, &stage, cli.json),
        Commands::Simulate { attach, to, role } => {
            simulate(&def, config, &attach, to, &role, cli.json).await
        }
    }
}

fn load_catalog(path: &Path, catalog_id: Option<&str>) -> Result<CatalogDefinition> {
    if path.is_file() {
        return CatalogLoader::load_from_file(path)
            .with_context(|| format!("loading catalog {}", path.display()));
    }

    let mut catalogs = CatalogLoader::load_from_dir(path)
        .with_context(|| format!("loading catalogs from {}", path.display()))?;
    match catalog_id {
        Some(id) => catalogs
            .remove(id)
            .ok_or_else(|| anyhow!("no catalog {} in {}", id, path.display())),
        None if catalogs.len() == 1 => catalogs
            .into_values()
            .next()
            .ok_or_else(|| anyhow!("no catalogs in {}", path.display())),
        None if catalogs.is_empty() => bail!("no catalogs in {}", path.display()),
        None => bail!(
            "{} catalogs in {}, choose one with --catalog-id",
            catalogs.len(),
            path.display()
        ),
    }
}

fn validate(def: &CatalogDefinition, json: bool) -> Result<()> {
    let graph = TransitionGraph::build(def)?;
    let registry = GuardRegistry::from_catalog(def)?;

    let unconfigured: Vec<&str> = graph
        .transitions()
        .iter()
        .filter(|t| !registry.resolve(&t.guard).is_configured())
        .map(|t| t.guard.as_str())
        .collect();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "catalog": def.catalog,
                "version": def.version,
                "stages": graph.stages().len(),
                "transitions": graph.transitions().len(),
                "warnings": graph.warnings(),
                "unconfigured_guards": unconfigured,
            }))?
        );
        return Ok(());
    }

    println!(
        "{} v{}: {} stages, {} transitions, {} guards",
        def.catalog,
        def.version,
        graph.stages().len(),
        graph.transitions().len(),
        registry.guard_names().len()
    );
    for warning in graph.warnings() {
        println!("  warning: {}", warning);
    }
    for guard in unconfigured {
        println!("  warning: guard {} is not configured and will always block", guard);
    }
    Ok(())
}

fn edges(def: &CatalogDefinition, stage: &str, json: bool) -> Result<()> {
    let orchestrator = WorkflowOrchestrator::from_catalog(
        def,
        Arc::new(MemoryCaseStore::new()),
        Arc::new(LoggingDocumentService),
        EngineConfig::default(),
    )?;
    let edges = orchestrator.evaluator().describe_from(stage)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&edges)?);
        return Ok(());
    }

    if edges.is_empty() {
        println!("{} has no outgoing transitions", stage);
    }
    for edge in edges {
        let auto = if edge.auto { " [auto]" } else { "" };
        println!(
            "{} -> {} ({}) guard {}{}",
            edge.from_stage, edge.to_stage, edge.to_stage_name, edge.guard_name, auto
        );
    }
    Ok(())
}

async fn simulate(
    def: &CatalogDefinition,
    config: EngineConfig,
    attach: &[String],
    to: Option<String>,
    role: &str,
    json: bool,
) -> Result<()> {
    let orchestrator = WorkflowOrchestrator::from_catalog(
        def,
        Arc::new(MemoryCaseStore::new()),
        Arc::new(LoggingDocumentService),
        config,
    )?;
    let actor = Actor::new("cli", role);

    let case = orchestrator
        .open_case(
            NewCase {
                reference: "SIM-0001".to_string(),
                seller_id: "seller".to_string(),
                buyer_id: "buyer".to_string(),
                plot_id: "plot".to_string(),
            },
            &actor,
        )
        .await?;
    for document_type in attach {
        orchestrator
            .add_attachment(case.case_id, document_type, "simulated", &actor)
            .await?;
    }

    let options = orchestrator.dry_run(case.case_id, &actor).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&options)?);
    } else {
        println!("Case {} in {}", case.reference, case.current_stage);
        for option in &options {
            let mark = if option.result.can_transition { "allowed" } else { "blocked" };
            println!(
                "  -> {} [{}] {}: {}",
                option.to_stage, option.guard_name, mark, option.result.reason
            );
        }
    }

    if let Some(to_stage) = to {
        match orchestrator
            .commit(TransitionRequest::new(case.case_id, to_stage, actor))
            .await
        {
            Ok(outcome) if json => println!("{}", serde_json::to_string_pretty(&outcome)?),
            Ok(outcome) => println!(
                "Committed {} -> {}, now in {}",
                outcome.from_stage,
                outcome.to_stage,
                outcome.final_stage()
            ),
            Err(e) => println!("Not committed ({}): {}", e.code(), e),
        }
    }

    Ok(())
}
