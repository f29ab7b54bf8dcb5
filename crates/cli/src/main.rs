//! benchdash
//!
//! Launch, watch and manage benchmark runs from the terminal.

mod cmd_auth;
mod cmd_dashboard;
mod cmd_runs;
mod cmd_status;
mod cmd_watch;
mod render;

use std::collections::HashSet;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use benchdash_client::logging::{init_logging, LoggingHandle};
use benchdash_client::{ClientConfig, DataDir, LiveSettings, RestClient, Session};
use benchdash_protocol::RunStatus;
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(name = "benchdash", version, about = "Benchmark dashboard client", long_about = None)]
struct Cli {
    /// Server base URL (overrides config and BENCHDASH_SERVER_URL)
    #[arg(long, global = true, value_name = "URL")]
    server: Option<String>,

    /// Data directory (overrides BENCHDASH_DATA_DIR)
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Save an API token for later requests
    Login {
        #[arg(long, value_name = "TOKEN")]
        token: String,
    },
    /// Forget the saved token
    Logout,
    /// Check the server and show local settings
    Status,
    /// List runs
    Runs {
        #[command(flatten)]
        filters: Filters,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Start a run and watch it
    Start(StartArgs),
    /// Follow a run's logs and progress until it finishes
    Watch {
        run_id: String,
    },
    /// Cancel a queued or running run
    Cancel {
        run_id: String,
    },
    /// Delete runs
    Delete {
        #[arg(required = true)]
        run_ids: Vec<String>,
    },
    /// Export run summaries as JSON
    Export {
        /// Runs to export; every listed run when omitted
        run_ids: Vec<String>,

        #[command(flatten)]
        filters: Filters,
    },
    /// Live-updating run list
    Dashboard {
        #[command(flatten)]
        filters: Filters,

        /// Refetch only, no live channel
        #[arg(long)]
        no_live: bool,
    },
    /// Print a shell completion script
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Login { .. } => "login",
            Commands::Logout => "logout",
            Commands::Status => "status",
            Commands::Runs { .. } => "runs",
            Commands::Start(_) => "start",
            Commands::Watch { .. } => "watch",
            Commands::Cancel { .. } => "cancel",
            Commands::Delete { .. } => "delete",
            Commands::Export { .. } => "export",
            Commands::Dashboard { .. } => "dashboard",
            Commands::Completions { .. } => "completions",
        }
    }
}

#[derive(Debug, Clone, Default, Args)]
pub struct Filters {
    #[arg(long, value_name = "STATUS")]
    pub status: Option<RunStatus>,

    #[arg(long, value_name = "NAME")]
    pub benchmark: Option<String>,

    #[arg(long, value_name = "TEXT")]
    pub search: Option<String>,

    #[arg(long, value_name = "TAG")]
    pub tag: Option<String>,

    #[arg(long, value_name = "N")]
    pub limit: Option<u32>,
}

impl Filters {
    pub fn query(&self) -> benchdash_protocol::ListRunsQuery {
        benchdash_protocol::ListRunsQuery {
            limit: self.limit,
            search: self.search.clone(),
            status: self.status,
            benchmark: self.benchmark.clone(),
            tag: self.tag.clone(),
        }
    }
}

#[derive(Debug, Args)]
pub struct StartArgs {
    #[arg(long)]
    pub benchmark: String,

    #[arg(long)]
    pub model: String,

    /// Max samples to evaluate
    #[arg(long)]
    pub limit: Option<u32>,

    #[arg(long)]
    pub temperature: Option<f64>,

    #[arg(long)]
    pub epochs: Option<u32>,

    /// Print the run id and exit
    #[arg(long)]
    pub no_watch: bool,
}

/// Everything a command needs, resolved once from flags, env and files.
pub struct Context {
    pub data_dir: DataDir,
    pub config: ClientConfig,
    pub session: Session,
}

impl Context {
    fn load(cli: &Cli) -> Result<Self> {
        let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
        let mut config = ClientConfig::load_with_env(&data_dir.config_path())
            .with_context(|| format!("Failed to load {}", data_dir.config_path().display()))?;
        config.override_server_url(cli.server.clone());
        let session = Session::load(data_dir.session_path()).context("Failed to load session")?;
        Ok(Self {
            data_dir,
            config,
            session,
        })
    }

    pub fn rest(&self) -> Result<RestClient> {
        let base = self.config.server_url()?;
        let client =
            RestClient::with_timeout(base, self.session.clone(), self.config.request_timeout())?;
        Ok(client)
    }

    pub fn api(&self) -> Result<Arc<RestClient>> {
        Ok(Arc::new(self.rest()?))
    }

    pub fn live(&self) -> Result<LiveSettings> {
        Ok(self.config.live_settings()?)
    }
}

/// Drop repeated ids, keeping first-seen order.
pub fn unique(run_ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    run_ids
        .into_iter()
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

fn init(ctx: &Context) -> Result<LoggingHandle> {
    ctx.data_dir
        .ensure_dirs()
        .with_context(|| format!("Failed to create {}", ctx.data_dir.root().display()))?;
    Ok(init_logging(&ctx.data_dir)?)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e:#}", console::style("error:").red().bold());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    if let Commands::Completions { shell } = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "benchdash", &mut io::stdout());
        return Ok(ExitCode::SUCCESS);
    }

    let mut ctx = Context::load(&cli)?;
    let _logging = init(&ctx)?;
    tracing::info!(
        component = "cli",
        event = "cli.command.started",
        command = cli.command.name(),
        server = %ctx.config.server_url,
        "Running command"
    );

    match cli.command {
        Commands::Login { token } => cmd_auth::login(&mut ctx, token)?,
        Commands::Logout => cmd_auth::logout(&mut ctx)?,
        Commands::Status => return cmd_status::run(&ctx).await,
        Commands::Runs { filters, json } => cmd_runs::list(&ctx, &filters, json).await?,
        Commands::Start(args) => return cmd_watch::start(&ctx, args).await,
        Commands::Watch { run_id } => return cmd_watch::watch(&ctx, run_id).await,
        Commands::Cancel { run_id } => cmd_runs::cancel(&ctx, &run_id).await?,
        Commands::Delete { run_ids } => return cmd_runs::delete(&ctx, run_ids).await,
        Commands::Export { run_ids, filters } => {
            return cmd_dashboard::export(&ctx, run_ids, &filters).await
        }
        Commands::Dashboard { filters, no_live } => {
            cmd_dashboard::run(&ctx, &filters, !no_live).await?
        }
        Commands::Completions { .. } => {}
    }
    Ok(ExitCode::SUCCESS)
}
