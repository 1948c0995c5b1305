use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use dompilot::mcp::{serve_stdio, PilotServer};
use dompilot::{
    ActionQueue, BrowserConfig, Config, CoreEvent, DrainOutcome, FileStore, MemoryStore, Session,
    StateStore,
};

#[derive(Parser)]
#[command(name = "dompilot")]
#[command(about = "Best-effort DOM automation pipeline")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet mode (only errors)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run a YAML action file against a live page
    Run {
        /// Action file to run
        config: PathBuf,

        /// Run in headless mode (overrides config)
        #[arg(long)]
        headless: bool,

        /// Validate the file without launching a browser
        #[arg(long)]
        check: bool,
    },

    /// Print the persisted queue
    Status {
        /// State document path
        #[arg(long, default_value = "dompilot-state.json")]
        state: PathBuf,
    },

    /// Clear the persisted queue
    Clear {
        /// State document path
        #[arg(long, default_value = "dompilot-state.json")]
        state: PathBuf,
    },

    /// Serve the pipeline as an MCP server on stdio
    Mcp {
        /// Run the browser headless
        #[arg(long)]
        headless: bool,

        /// Persist queue state to this path (in-memory when omitted)
        #[arg(long)]
        state: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.quiet {
        Level::ERROR
    } else {
        match cli.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            _ => Level::DEBUG,
        }
    };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    match cli.command {
        Command::Run {
            config,
            headless,
            check,
        } => run(config, headless, check).await,
        Command::Status { state } => status(state).await,
        Command::Clear { state } => clear(state).await,
        Command::Mcp { headless, state } => {
            let browser = BrowserConfig {
                headless,
                ..Default::default()
            };
            serve_stdio(PilotServer::new(browser, Default::default(), state)).await
        }
    }
}

async fn run(path: PathBuf, headless: bool, check: bool) -> anyhow::Result<()> {
    let mut config = Config::load(&path)?;

    if check {
        println!("Config valid: {}", config.name);
        println!("  Target: {}", config.target.url);
        println!("  Actions: {}", config.actions.len());
        for spec in &config.actions {
            println!("    - {}", spec.kind.summary());
        }
        println!("  Failure policy: {:?}", config.pipeline.failure_policy);
        return Ok(());
    }

    if headless {
        config.browser.headless = true;
    }

    println!("Running: {}", config.name);

    let store: Arc<dyn StateStore> = match config.state_path {
        Some(ref p) => Arc::new(FileStore::new(p)),
        None => Arc::new(MemoryStore::new()),
    };
    let session =
        Session::launch_with_store(config.browser.clone(), config.pipeline.clone(), store).await?;

    session.open(&config.target.url).await?;
    session.enqueue(config.actions.clone()).await?;

    let outcome = session.drive_to_completion().await?;

    println!();
    let mut failures = 0;
    for event in session.poll_events().await {
        match event {
            CoreEvent::ActionCompleted { action_data } => {
                println!("✓ {}", action_data.kind.summary());
            }
            CoreEvent::ActionFailed { action_data, error } => {
                failures += 1;
                println!("✗ {} — {}", action_data.kind.summary(), error);
            }
            CoreEvent::ProductClickResult { message, .. } => {
                println!("  {}", message);
            }
            _ => {}
        }
    }
    println!("Queue drained: {:?}", outcome);

    if failures > 0 || outcome == DrainOutcome::Halted {
        std::process::exit(1);
    }
    Ok(())
}

async fn status(state: PathBuf) -> anyhow::Result<()> {
    let queue = ActionQueue::open(Arc::new(FileStore::new(state)), 2).await?;
    let pending = queue.pending().await;
    println!("Queue length: {}", pending.len());
    for action in pending {
        println!(
            "  {} {} (retries {}/{}, enqueued {})",
            action.id,
            action.kind.summary(),
            action.retry_count,
            action.max_retries,
            action.enqueued_at
        );
    }
    Ok(())
}

async fn clear(state: PathBuf) -> anyhow::Result<()> {
    let queue = ActionQueue::open(Arc::new(FileStore::new(state)), 2).await?;
    queue.clear().await?;
    println!("Queue cleared");
    Ok(())
}
