use anyhow::{Context as AnyhowContext, Result};
use clap::{Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use log::info;
use std::env;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use peyote::client::ApiClient;
use peyote::context::AppContext;
use peyote::embedder::EmbeddingProvider as _;
use peyote::mcp::{run_mcp_server, ContextTools};
use peyote::server::ApiServer;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Workspace holding the .peyote directory (defaults to current directory)
    #[arg(short, long, global = true)]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API (POST /ingest, GET /jobs)
    Serve {
        /// Address to listen on (overrides config)
        #[arg(long)]
        bind: Option<String>,
        /// Only record jobs; do not run the ingestion pipeline
        #[arg(long)]
        record_only: bool,
    },
    /// Run the MCP tool server on stdio
    Mcp,
    /// Ingest a GitHub repository or a local directory into the chunk store
    Ingest {
        /// Repository URL to clone
        #[arg(required_unless_present = "path", conflicts_with = "path")]
        repo_url: Option<String>,
        /// Local directory to ingest instead of cloning
        #[arg(short, long)]
        path: Option<PathBuf>,
    },
    /// Search the chunk store with natural language or code
    Query {
        /// Search query
        query: String,
        /// Maximum number of results (overrides config)
        #[arg(short = 'n', long)]
        match_count: Option<i64>,
        /// Minimum similarity (overrides config)
        #[arg(short, long)]
        threshold: Option<f64>,
    },
    /// Submit a repository to a running API
    Submit {
        repo_url: String,
        #[command(flatten)]
        remote: Remote,
    },
    /// List the jobs submitted with a token
    Jobs {
        #[command(flatten)]
        remote: Remote,
    },
}

#[derive(clap::Args)]
struct Remote {
    /// Base URL of the API
    #[arg(long, env = "PEYOTE_API_URL", default_value = "http://127.0.0.1:3000")]
    api_url: String,
    /// Bearer token issued by the auth provider
    #[arg(long, env = "PEYOTE_TOKEN")]
    token: String,
}

fn init_logging() -> Result<MultiProgress> {
    let logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).build();
    let level = logger.filter();
    let multi = MultiProgress::new();
    LogWrapper::new(multi.clone(), logger)
        .try_init()
        .context("Failed to initialize logger")?;
    log::set_max_level(level);
    Ok(multi)
}

async fn serve(ctx: AppContext, bind: Option<String>, record_only: bool) -> Result<()> {
    let mut server_config = ctx.config().server.clone();
    if let Some(bind) = bind {
        server_config.bind_addr = bind;
    }

    let pipeline = if ctx.config().ingest.process_jobs && !record_only {
        Some(Arc::new(ctx.pipeline()?))
    } else {
        info!("Job processing disabled; submissions are only recorded");
        None
    };

    ApiServer::new(
        server_config,
        Arc::clone(&ctx.db),
        ctx.authenticator()?,
        pipeline,
    )
    .serve()
    .await
}

async fn ingest(
    ctx: AppContext,
    multi: MultiProgress,
    repo_url: Option<String>,
    path: Option<PathBuf>,
) -> Result<()> {
    let bar = multi.add(ProgressBar::new(0));
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{bar:40}] {pos}/{len} chunks ({elapsed})")?
            .progress_chars("=> "),
    );
    let pipeline = ctx.pipeline()?.with_progress(bar);

    let summary = match (repo_url, path) {
        (Some(url), _) => pipeline.ingest_repository(&url).await?,
        (None, Some(path)) => pipeline.ingest_local(&path).await?,
        (None, None) => unreachable!("clap requires a repository URL or --path"),
    };

    println!(
        "Ingested {} chunks from {} files.",
        summary.chunks, summary.files
    );
    Ok(())
}

async fn query(
    ctx: AppContext,
    query: String,
    match_count: Option<i64>,
    threshold: Option<f64>,
) -> Result<()> {
    let retrieval = &ctx.config().retrieval;
    let match_count = match_count.unwrap_or(retrieval.match_count);
    let threshold = threshold.unwrap_or(retrieval.similarity_threshold);

    let embedding = ctx.embedder()?.embed_query(&query).await?;
    let results = ctx
        .db
        .lock()
        .await
        .match_code_chunks(&embedding.0, match_count, threshold)?;

    if results.is_empty() {
        eprintln!("No similar code found.");
        return Ok(());
    }

    let mut stdout = StandardStream::stdout(ColorChoice::Auto);
    for result in results {
        stdout.set_color(ColorSpec::new().set_fg(Some(Color::Cyan)).set_bold(true))?;
        write!(stdout, "{}", result.file_path)?;
        stdout.set_color(ColorSpec::new().set_fg(Some(Color::Yellow)))?;
        writeln!(stdout, " ({:.4})", result.similarity)?;
        stdout.reset()?;
        writeln!(stdout, "{}\n", result.content)?;
    }
    Ok(())
}

async fn submit(remote: Remote, repo_url: String) -> Result<()> {
    let response = ApiClient::new(&remote.api_url, &remote.token)
        .submit(&repo_url)
        .await?;
    println!("{} (job {})", response.message, response.job_id);
    Ok(())
}

async fn list_jobs(remote: Remote) -> Result<()> {
    let jobs = ApiClient::new(&remote.api_url, &remote.token)
        .list_jobs()
        .await?;
    if jobs.is_empty() {
        println!("No jobs submitted yet.");
    }
    for job in jobs {
        println!(
            "{}  {:<10} {:>6} chunks  {}  {}",
            job.id,
            format!("{:?}", job.status).to_lowercase(),
            job.chunks_ingested,
            job.created_at.format("%Y-%m-%d %H:%M"),
            job.repo_url
        );
        if let Some(error) = job.error {
            println!("    error: {}", error);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let multi = init_logging()?;

    let workspace = match cli.workspace {
        Some(path) => path,
        None => env::current_dir().context("Failed to get current directory")?,
    };

    match cli.command {
        Commands::Serve { bind, record_only } => {
            serve(AppContext::new(&workspace)?, bind, record_only).await
        }
        Commands::Mcp => {
            let ctx = AppContext::new(&workspace)?;
            let tools = ContextTools::new(Arc::new(ctx.retriever()?));
            run_mcp_server(tools).await
        }
        Commands::Ingest { repo_url, path } => {
            ingest(AppContext::new(&workspace)?, multi, repo_url, path).await
        }
        Commands::Query {
            query: text,
            match_count,
            threshold,
        } => query(AppContext::new(&workspace)?, text, match_count, threshold).await,
        Commands::Submit { repo_url, remote } => submit(remote, repo_url).await,
        Commands::Jobs { remote } => list_jobs(remote).await,
    }
}
