use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use simforge::job::BatchRequest;
use simforge::renderer::StdioLauncher;
use simforge::scheduler::{BatchIndex, Orchestrator, ProgressReporter};
use simforge::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "simforge")]
#[command(version)]
#[command(about = "Render labeled simulation datasets on a pool of renderer processes")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run a batch request
    Run(RunArgs),

    /// Print the job specifications a batch request expands to
    Expand {
        /// Path to the batch request (JSON)
        request: PathBuf,
    },
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Path to the batch request (JSON)
    request: PathBuf,

    /// Override the output root
    #[arg(long)]
    output: Option<PathBuf>,

    /// Maximum number of jobs executing at once
    #[arg(long)]
    concurrency: Option<usize>,

    /// Retries per job after the first attempt
    #[arg(long)]
    max_retries: Option<u32>,

    /// Number of renderer processes
    #[arg(long)]
    pool_size: Option<usize>,

    /// Leases a renderer process serves before it is respawned
    #[arg(long)]
    recycle_threshold: Option<u32>,

    /// Renderer executable
    #[arg(long)]
    renderer: Option<String>,

    /// Argument passed to the renderer (repeatable)
    #[arg(long = "renderer-arg", allow_hyphen_values = true)]
    renderer_args: Vec<String>,

    /// Interval between progress log lines
    #[arg(long, default_value = "5000")]
    progress_interval_ms: u64,

    /// Summary format
    #[arg(long, short = 'o', default_value = "table")]
    output_format: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

fn apply_overrides(request: &mut BatchRequest, args: &RunArgs) {
    if let Some(output) = &args.output {
        request.output_root = output.clone();
    }
    if let Some(concurrency) = args.concurrency {
        request.concurrency = concurrency;
    }
    if let Some(max_retries) = args.max_retries {
        request.retry.max_retries = max_retries;
    }
    if let Some(size) = args.pool_size {
        request.pool.size = size;
    }
    if let Some(threshold) = args.recycle_threshold {
        request.pool.recycle_threshold = threshold;
    }
    if let Some(program) = &args.renderer {
        request.pool.renderer.program = program.clone();
    }
    if !args.renderer_args.is_empty() {
        request.pool.renderer.args = args.renderer_args.clone();
    }
}

fn print_summary(index: &BatchIndex, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(index)?),
        OutputFormat::Table => {
            println!("Batch {}", index.batch_id);
            println!(
                "  total: {}  completed: {}  failed: {}  cancelled: {}  elapsed: {:.1}s",
                index.total, index.completed, index.failed, index.cancelled, index.elapsed_secs
            );
            println!();
            println!("{:<32} {:<20} {:<10} {:>7}  PATH", "JOB", "PRESET", "STATE", "RETRIES");
            for job in &index.jobs {
                println!(
                    "{:<32} {:<20} {:<10} {:>7}  {}",
                    job.id,
                    job.preset,
                    job.state.to_string(),
                    job.retry_count,
                    job.path
                );
            }
        }
    }
    Ok(())
}

async fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut request = BatchRequest::load(&args.request).await?;
    apply_overrides(&mut request, &args);

    let cancel = install_shutdown_handler();
    let launcher = Arc::new(StdioLauncher::new(request.pool.renderer.clone()));
    let reporter = ProgressReporter::new(args.progress_interval_ms);
    let index = Orchestrator::execute(&request, launcher, cancel, Some(reporter)).await?;

    print_summary(&index, &args.output_format)?;
    if index.failed > 0 || index.cancelled > 0 {
        std::process::exit(1);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Run(run_args) => run(run_args).await?,
        Commands::Expand { request } => {
            let request = BatchRequest::load(&request).await?;
            let jobs = request.jobs()?;
            println!("{}", serde_json::to_string_pretty(&jobs)?);
        }
    }

    Ok(())
}
