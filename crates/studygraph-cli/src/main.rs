//! Studygraph CLI - workspace knowledge graphs over a resource catalog

use clap::{Parser, Subcommand};
use std::time::Duration;
use studygraph_core::config::Config;
use studygraph_core::domain::{ExtractionJob, JobMode, Resource};
use studygraph_core::graph::{GraphQuery, GraphScope};
use studygraph_core::registry::{SyncReport, UploadRequest};
use studygraph_core::service::GraphService;
use studygraph_core::storage::Database;

#[derive(Parser)]
#[command(name = "studygraph")]
#[command(author, version, about = "Workspace knowledge graphs over a resource catalog", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Acting user id recorded on writes
    #[arg(long, global = true, default_value_t = 1)]
    actor: i64,
}

#[derive(Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl OutputFormat {
    fn is_json(self) -> bool {
        matches!(self, Self::Json)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Manage workspaces
    Workspace {
        #[command(subcommand)]
        action: WorkspaceAction,
    },

    /// Manage the local resource projection
    Resources {
        #[command(subcommand)]
        action: ResourceAction,
    },

    /// Manage workspace sources
    Sources {
        #[command(subcommand)]
        action: SourceAction,
    },

    /// Run and inspect extraction jobs
    Extract {
        #[command(subcommand)]
        action: ExtractAction,
    },

    /// Refresh a workspace when its graph is stale
    Bootstrap {
        /// Workspace ID
        workspace: i64,
        /// Refresh even when the graph looks fresh
        #[arg(short, long)]
        force: bool,
        /// Block until the triggered job finishes
        #[arg(short, long)]
        wait: bool,
    },

    /// Assemble the workspace graph
    Graph {
        /// Workspace ID
        workspace: i64,
        /// Title/tag filter
        #[arg(short = 'Q', long, default_value = "")]
        query: String,
        /// Maximum sources to include (1-500)
        #[arg(short, long, default_value_t = 200)]
        limit: i64,
        /// Visibility scope (public or mixed)
        #[arg(short, long, default_value = "mixed")]
        scope: String,
        /// Skip the per-section format grouping nodes
        #[arg(long)]
        no_format_nodes: bool,
        /// Emit one node per source instead of collapsing variants
        #[arg(long)]
        no_dedupe: bool,
        /// Omit the variant listing from resource node metadata
        #[arg(long)]
        no_variants: bool,
    },

    /// Rank workspace sources against a query
    Search {
        /// Workspace ID
        workspace: i64,
        /// Search query
        query: String,
        /// Results to return (1-20)
        #[arg(short = 'k', long, default_value_t = 10)]
        top_k: usize,
        /// Include results below the confidence threshold
        #[arg(long)]
        all: bool,
    },

    /// Ask a question grounded in workspace evidence
    Ask {
        /// Workspace ID
        workspace: i64,
        /// Question text
        question: String,
    },

    /// Q&A history
    Qa {
        #[command(subcommand)]
        action: QaAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Run health check
    Doctor,
}

#[derive(Subcommand)]
enum WorkspaceAction {
    /// Create a workspace
    Create {
        /// Workspace name
        name: String,
        /// Education stage (e.g. junior, senior)
        #[arg(long)]
        stage: String,
        /// Subject the workspace is scoped to
        #[arg(long)]
        subject: String,
        /// Optional description
        #[arg(short, long)]
        description: Option<String>,
    },
    /// List all workspaces
    List,
    /// Show workspace details
    Show { id: i64 },
}

#[derive(Subcommand)]
enum ResourceAction {
    /// Import catalog resources from a JSON file
    Import {
        /// Path to a JSON array of resources
        file: String,
        /// Sync the imported resources into matching workspaces
        #[arg(long)]
        sync: bool,
    },
    /// Sync catalog changes into matching workspaces
    Sync {
        /// Resource IDs to sync
        ids: Vec<i64>,
    },
}

#[derive(Subcommand)]
enum SourceAction {
    /// List active sources in a workspace
    List { workspace: i64 },
    /// Bind eligible catalog resources into a workspace
    Bind {
        workspace: i64,
        /// Restrict binding to these resource IDs
        #[arg(short, long, value_delimiter = ',')]
        resources: Option<Vec<i64>>,
    },
    /// Register a private upload
    Upload {
        workspace: i64,
        /// Display title
        title: String,
        /// Storage object key
        #[arg(long)]
        object_key: Option<String>,
        /// File format (ppt, pdf, video, ...)
        #[arg(long)]
        file_format: Option<String>,
        /// Summary text used for ranking and extraction
        #[arg(long)]
        summary: Option<String>,
        /// Comma-separated tags
        #[arg(short, long, value_delimiter = ',')]
        tags: Vec<String>,
    },
    /// Promote an upload to a published catalog resource
    Publish {
        workspace: i64,
        /// Source ID of the upload
        source: i64,
        /// Catalog resource ID it became
        resource: i64,
    },
    /// Deactivate sources whose resource is gone or ineligible
    Prune { workspace: i64 },
}

#[derive(Subcommand)]
enum ExtractAction {
    /// Start an extraction job
    Start {
        workspace: i64,
        /// Extraction mode (quick or full)
        #[arg(short, long, default_value = "quick")]
        mode: String,
        /// Restrict the job to these source IDs
        #[arg(short, long, value_delimiter = ',')]
        sources: Option<Vec<i64>>,
        /// Block until the job finishes
        #[arg(short, long)]
        wait: bool,
    },
    /// Show job status
    Status {
        workspace: i64,
        /// Job ID
        job: String,
    },
    /// List recent jobs
    Jobs {
        workspace: i64,
        #[arg(short, long, default_value_t = 10)]
        limit: i64,
    },
    /// Show per-source failures for a job
    Errors {
        workspace: i64,
        /// Job ID
        job: String,
        #[arg(long, default_value_t = 1)]
        page: i64,
        #[arg(long, default_value_t = 20)]
        page_size: i64,
    },
}

#[derive(Subcommand)]
enum QaAction {
    /// List recent Q&A exchanges
    Logs {
        workspace: i64,
        #[arg(short, long, default_value_t = 20)]
        limit: i64,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("studygraph=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let get_service = || async {
        let db = Database::default().await?;
        let config = Config::load()?;
        anyhow::Ok(GraphService::new(db, config)?)
    };

    match cli.command {
        Commands::Workspace { action } => {
            let service = get_service().await?;
            cmd_workspace(&service, action, cli.actor, cli.quiet).await
        }

        Commands::Resources { action } => {
            let service = get_service().await?;
            cmd_resources(&service, action, cli.actor, cli.quiet).await
        }

        Commands::Sources { action } => {
            let service = get_service().await?;
            cmd_sources(&service, action, cli.actor, cli.quiet).await
        }

        Commands::Extract { action } => {
            let service = get_service().await?;
            cmd_extract(&service, action, cli.format, cli.quiet).await
        }

        Commands::Bootstrap {
            workspace,
            force,
            wait,
        } => {
            let service = get_service().await?;
            cmd_bootstrap(&service, workspace, force, wait, cli.quiet).await
        }

        Commands::Graph {
            workspace,
            query,
            limit,
            scope,
            no_format_nodes,
            no_dedupe,
            no_variants,
        } => {
            let service = get_service().await?;
            // Configured defaults first, then the explicit flags on top
            let mut graph_query = service.default_graph_query();
            graph_query.q = query;
            graph_query.limit = limit;
            graph_query.scope = GraphScope::parse_or(&scope, GraphScope::Mixed);
            graph_query.include_format_nodes = !no_format_nodes;
            if no_dedupe {
                graph_query.dedupe = false;
            }
            if no_variants {
                graph_query.include_variants = false;
            }
            cmd_graph(&service, workspace, &graph_query, cli.format).await
        }

        Commands::Search {
            workspace,
            query,
            top_k,
            all,
        } => {
            let service = get_service().await?;
            cmd_search(&service, workspace, &query, top_k, all, cli.format).await
        }

        Commands::Ask {
            workspace,
            question,
        } => {
            let service = get_service().await?;
            cmd_ask(&service, workspace, &question, cli.actor, cli.format).await
        }

        Commands::Qa { action } => {
            let service = get_service().await?;
            cmd_qa(&service, action, cli.format).await
        }

        Commands::Config { action } => cmd_config(action, cli.quiet),

        Commands::Doctor => cmd_doctor(cli.quiet).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn cmd_workspace(
    service: &GraphService,
    action: WorkspaceAction,
    actor: i64,
    quiet: bool,
) -> anyhow::Result<()> {
    match action {
        WorkspaceAction::Create {
            name,
            stage,
            subject,
            description,
        } => {
            let workspace = service
                .create_workspace(&stage, &subject, &name, description.as_deref(), actor)
                .await?;
            if !quiet {
                println!("Workspace created!");
                println!("  ID: {}", workspace.id);
                println!("  Name: {}", workspace.name);
                println!("  Stage/subject: {}/{}", workspace.stage, workspace.subject);
                println!("\nNext steps:");
                println!("  1. Run `studygraph sources bind {}` to pull in catalog resources", workspace.id);
                println!("  2. Run `studygraph bootstrap {}` to build the graph", workspace.id);
            }
        }
        WorkspaceAction::List => {
            let workspaces = service.list_workspaces().await?;
            if workspaces.is_empty() {
                if !quiet {
                    println!("No workspaces found.");
                    println!("\nCreate one with: studygraph workspace create <name> --stage <stage> --subject <subject>");
                }
            } else {
                if !quiet {
                    println!("Workspaces:");
                }
                for w in workspaces {
                    println!("  {} - {} ({}/{})", w.id, w.name, w.stage, w.subject);
                }
            }
        }
        WorkspaceAction::Show { id } => {
            let w = service.get_workspace(id).await?;
            println!("Workspace: {}", w.name);
            println!("  ID: {}", w.id);
            println!("  Stage: {}", w.stage);
            println!("  Subject: {}", w.subject);
            if let Some(desc) = &w.description {
                println!("  Description: {}", desc);
            }
            println!("  Created: {}", w.created_at.format("%Y-%m-%d %H:%M:%S"));
            println!("  Updated: {}", w.updated_at.format("%Y-%m-%d %H:%M:%S"));
        }
    }
    Ok(())
}

async fn cmd_resources(
    service: &GraphService,
    action: ResourceAction,
    actor: i64,
    quiet: bool,
) -> anyhow::Result<()> {
    match action {
        ResourceAction::Import { file, sync } => {
            let raw = std::fs::read_to_string(&file)?;
            let resources: Vec<Resource> = serde_json::from_str(&raw)
                .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", file, e))?;
            let ids: Vec<i64> = resources.iter().map(|r| r.id).collect();
            for resource in &resources {
                service.upsert_resource(resource).await?;
            }
            if !quiet {
                println!("Imported {} resources.", ids.len());
            }
            if sync {
                let report = service.sync_resources(&ids, actor, "import").await?;
                print_sync_report(&report, quiet);
            } else if !quiet {
                println!("\nRun `studygraph resources sync <ids>` to propagate them into workspaces.");
            }
        }
        ResourceAction::Sync { ids } => {
            let report = service.sync_resources(&ids, actor, "manual").await?;
            print_sync_report(&report, quiet);
        }
    }
    Ok(())
}

async fn cmd_sources(
    service: &GraphService,
    action: SourceAction,
    actor: i64,
    quiet: bool,
) -> anyhow::Result<()> {
    match action {
        SourceAction::List { workspace } => {
            let sources = service.list_sources(workspace).await?;
            if sources.is_empty() {
                if !quiet {
                    println!("No active sources.");
                    println!("\nBind catalog resources with: studygraph sources bind {}", workspace);
                }
            } else {
                if !quiet {
                    println!("Sources:");
                }
                for s in sources {
                    println!(
                        "  {} - {} [{}] {} ({})",
                        s.id,
                        s.title,
                        s.status.as_str(),
                        s.canonical_key,
                        s.variant_kind.as_str()
                    );
                }
            }
        }
        SourceAction::Bind {
            workspace,
            resources,
        } => {
            let report = service
                .bind_resources(workspace, resources.as_deref(), actor)
                .await?;
            print_sync_report(&report, quiet);
        }
        SourceAction::Upload {
            workspace,
            title,
            object_key,
            file_format,
            summary,
            tags,
        } => {
            let source = service
                .register_upload(
                    workspace,
                    UploadRequest {
                        title,
                        object_key,
                        file_format,
                        summary_text: summary,
                        tags,
                    },
                    actor,
                )
                .await?;
            if !quiet {
                println!("Upload registered!");
                println!("  Source ID: {}", source.id);
                println!("  Title: {}", source.title);
                println!("  Canonical key: {}", source.canonical_key);
            }
        }
        SourceAction::Publish {
            workspace,
            source,
            resource,
        } => {
            let published = service.publish_source(workspace, source, resource).await?;
            if !quiet {
                println!(
                    "Source {} published as resource {} ({}).",
                    published.id, resource, published.canonical_key
                );
            }
        }
        SourceAction::Prune { workspace } => {
            let pruned = service.prune_invalid_sources(workspace).await?;
            if !quiet {
                println!("Deactivated {} invalid sources.", pruned);
            }
        }
    }
    Ok(())
}

async fn cmd_extract(
    service: &GraphService,
    action: ExtractAction,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    match action {
        ExtractAction::Start {
            workspace,
            mode,
            sources,
            wait,
        } => {
            let mode = JobMode::parse(&mode)
                .ok_or_else(|| anyhow::anyhow!("Unknown mode '{}'. Use quick or full.", mode))?;
            let job = service.start_extraction(workspace, mode, sources).await?;
            if !quiet {
                println!("Job {} queued ({} mode).", job.id, job.mode.as_str());
            }
            if wait {
                let finished = wait_for_job(service, workspace, &job.id).await?;
                print_job(&finished, format);
            } else if !quiet {
                println!("\nCheck progress with: studygraph extract status {} {}", workspace, job.id);
            }
        }
        ExtractAction::Status { workspace, job } => {
            let job = service.job_status(workspace, &job).await?;
            print_job(&job, format);
        }
        ExtractAction::Jobs { workspace, limit } => {
            let jobs = service.list_jobs(workspace, limit).await?;
            if format.is_json() {
                println!("{}", serde_json::to_string_pretty(&jobs)?);
            } else if jobs.is_empty() {
                println!("No jobs found.");
            } else {
                println!("Jobs:");
                for j in jobs {
                    println!(
                        "  {} - {} [{}] {} sources, {} failed ({})",
                        j.id,
                        j.mode.as_str(),
                        j.status.as_str(),
                        j.stats.processed_sources,
                        j.stats.failed_sources_count,
                        j.created_at.format("%Y-%m-%d %H:%M:%S")
                    );
                }
            }
        }
        ExtractAction::Errors {
            workspace,
            job,
            page,
            page_size,
        } => {
            let (failures, total) = service.job_errors(workspace, &job, page, page_size).await?;
            if format.is_json() {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "total": total,
                        "page": page,
                        "items": failures,
                    }))?
                );
            } else if failures.is_empty() {
                println!("No failures recorded ({} total).", total);
            } else {
                println!("Failures (page {}, {} total):", page, total);
                for f in failures {
                    match f.source_id {
                        Some(id) => println!("  source {} [{}]: {}", id, f.stage, f.message),
                        None => println!("  job [{}]: {}", f.stage, f.message),
                    }
                }
            }
        }
    }
    Ok(())
}

async fn cmd_bootstrap(
    service: &GraphService,
    workspace: i64,
    force: bool,
    wait: bool,
    quiet: bool,
) -> anyhow::Result<()> {
    let outcome = service.bootstrap(workspace, force).await?;
    if outcome.triggered {
        let job_id = outcome
            .job_id
            .ok_or_else(|| anyhow::anyhow!("Bootstrap triggered but no job was returned"))?;
        if !quiet {
            println!("Refresh started (reason: {}).", outcome.reason);
            println!("  Job: {}", job_id);
        }
        if wait {
            let job = wait_for_job(service, workspace, &job_id).await?;
            if !quiet {
                println!(
                    "Job finished: {} ({} sources, {} failed)",
                    job.status.as_str(),
                    job.stats.processed_sources,
                    job.stats.failed_sources_count
                );
            }
        }
    } else if !quiet {
        match outcome.active_job_id {
            Some(active) => println!("Refresh already running: job {}", active),
            None => println!("Graph is fresh (reason: {}), nothing to do.", outcome.reason),
        }
    }
    Ok(())
}

async fn cmd_graph(
    service: &GraphService,
    workspace: i64,
    query: &GraphQuery,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let graph = service.graph(workspace, query).await?;
    if format.is_json() {
        println!("{}", serde_json::to_string_pretty(&graph)?);
        return Ok(());
    }

    println!(
        "Graph: {} nodes, {} edges",
        graph.nodes.len(),
        graph.edges.len()
    );
    println!(
        "  Sources: {} total ({} public, {} private)",
        graph.stats.total_sources, graph.stats.public_sources, graph.stats.private_sources
    );
    println!(
        "  Hierarchy: {} chapters, {} sections, {} format groups",
        graph.stats.chapter_nodes, graph.stats.section_nodes, graph.stats.format_nodes
    );
    println!(
        "  Overlay: {} entities, {} relations",
        graph.stats.entity_nodes, graph.stats.relation_edges
    );
    println!("\nUse --format json for the full node/edge payload.");
    Ok(())
}

async fn cmd_search(
    service: &GraphService,
    workspace: i64,
    query: &str,
    top_k: usize,
    all: bool,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let response = service.search(workspace, query, top_k, !all).await?;
    if format.is_json() {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    if response.items.is_empty() {
        println!("No results above threshold. Re-run with --all to see every candidate.");
        return Ok(());
    }
    println!(
        "Results (profile {}, threshold {}):",
        response.profile, response.threshold
    );
    for item in &response.items {
        // Sub-threshold rows only show up under --all
        let marker = if item.score >= response.threshold { " " } else { "?" };
        println!(
            "{} {:.6}  {} (#{})",
            marker, item.score, item.title, item.source_id
        );
    }
    Ok(())
}

async fn cmd_ask(
    service: &GraphService,
    workspace: i64,
    question: &str,
    actor: i64,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let answer = service.ask(workspace, question, actor).await?;
    if format.is_json() {
        println!("{}", serde_json::to_string_pretty(&answer)?);
        return Ok(());
    }

    println!("{}", answer.answer);
    if !answer.citations.is_empty() {
        println!("\nCitations:");
        for c in &answer.citations {
            println!("  [{}] {} ({:.4})", c.source_id, c.title, c.score);
        }
    }
    if !answer.highlight.nodes.is_empty() {
        println!("\nHighlighted nodes: {}", answer.highlight.nodes.join(", "));
    }
    Ok(())
}

async fn cmd_qa(service: &GraphService, action: QaAction, format: OutputFormat) -> anyhow::Result<()> {
    match action {
        QaAction::Logs { workspace, limit } => {
            let logs = service.qa_logs(workspace, limit).await?;
            if format.is_json() {
                println!("{}", serde_json::to_string_pretty(&logs)?);
            } else if logs.is_empty() {
                println!("No Q&A history.");
            } else {
                for log in logs {
                    println!(
                        "[{}] #{} {}",
                        log.created_at.format("%Y-%m-%d %H:%M:%S"),
                        log.id,
                        log.question
                    );
                    println!("  {}", log.answer.lines().next().unwrap_or(""));
                }
            }
        }
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            for (key, value) in config.list()? {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

async fn cmd_doctor(quiet: bool) -> anyhow::Result<()> {
    if !quiet {
        println!("Studygraph Health Check");
        println!("=======================");
        println!();
    }

    let mut all_ok = true;

    match Config::load() {
        Ok(config) => {
            if !quiet {
                println!("[OK] Configuration: Valid");
            }
            match config.ai.resolved_api_key() {
                Ok(Some(_)) => {
                    if !quiet {
                        let redacted = config.ai.redacted_api_key()?.unwrap_or_default();
                        println!("[OK] API Key: Configured ({})", redacted);
                    }
                }
                Ok(None) => {
                    if !quiet {
                        println!("[--] API Key: Not configured (lexical ranking and template answers only)");
                        println!("     Set STUDYGRAPH_API_KEY or OPENAI_API_KEY to enable embeddings");
                    }
                }
                Err(e) => {
                    all_ok = false;
                    if !quiet {
                        println!("[!!] API Key: Error - {}", e);
                    }
                }
            }
        }
        Err(e) => {
            all_ok = false;
            if !quiet {
                println!("[!!] Configuration: Error - {}", e);
            }
        }
    }

    if !quiet {
        match Config::config_path() {
            Ok(path) => {
                if path.exists() {
                    println!("[OK] Config file: {}", path.display());
                } else {
                    println!("[--] Config file: {} (using defaults)", path.display());
                }
            }
            Err(e) => {
                println!("[!!] Config file: Error - {}", e);
            }
        }
    }

    match Database::default().await {
        Ok(db) => {
            match db.health_check().await {
                Ok(()) => {
                    if !quiet {
                        println!("[OK] Database: Connected");
                        println!("     Path: {}", db.path().display());
                    }
                    match db.migration_status().await {
                        Ok(status) => {
                            if !quiet {
                                if status.needs_migration {
                                    println!(
                                        "[!!] Database: Migrations pending (v{} -> v{})",
                                        status.current_version, status.target_version
                                    );
                                } else {
                                    println!("[OK] Database: Schema v{}", status.current_version);
                                }
                            }
                        }
                        Err(e) => {
                            all_ok = false;
                            if !quiet {
                                println!("[!!] Database: Migration check failed - {}", e);
                            }
                        }
                    }
                }
                Err(e) => {
                    all_ok = false;
                    if !quiet {
                        println!("[!!] Database: Health check failed - {}", e);
                    }
                }
            }
            db.close().await;
        }
        Err(e) => {
            all_ok = false;
            if !quiet {
                println!("[!!] Database: Failed to initialize - {}", e);
            }
        }
    }

    if !quiet {
        println!();
        if all_ok {
            println!("All checks passed!");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }

    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn print_sync_report(report: &SyncReport, quiet: bool) {
    if quiet {
        return;
    }
    if let Some(reason) = &report.reason {
        println!("Sync skipped: {}", reason);
        return;
    }
    println!("Sync complete ({} requested):", report.requested);
    println!(
        "  created {}, reactivated {}, updated {}, deactivated {}, skipped {}",
        report.created, report.reactivated, report.updated, report.deactivated, report.skipped
    );
}

fn print_job(job: &ExtractionJob, format: OutputFormat) {
    if format.is_json() {
        match serde_json::to_string_pretty(job) {
            Ok(json) => println!("{}", json),
            Err(e) => println!("Failed to serialize job: {}", e),
        }
        return;
    }
    println!("Job: {}", job.id);
    println!("  Mode: {}", job.mode.as_str());
    println!("  Status: {}", job.status.as_str());
    println!(
        "  Sources: {} processed, {} succeeded, {} failed",
        job.stats.processed_sources, job.stats.succeeded_sources, job.stats.failed_sources_count
    );
    println!(
        "  Created: {} entities, {} relations, {} evidences",
        job.stats.entities_created, job.stats.relations_created, job.stats.evidences_created
    );
    if let Some(reason) = &job.stats.reason {
        println!("  Reason: {}", reason);
    }
    println!("  Started: {}", job.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("  Updated: {}", job.updated_at.format("%Y-%m-%d %H:%M:%S"));
}

/// Poll a job until it leaves the active states
async fn wait_for_job(
    service: &GraphService,
    workspace: i64,
    job_id: &str,
) -> anyhow::Result<ExtractionJob> {
    loop {
        let job = service.job_status(workspace, job_id).await?;
        if !job.status.is_active() {
            return Ok(job);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}
