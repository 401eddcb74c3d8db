use anyhow::Result;
use buildflow::cancellation::CancellationToken;
use buildflow::config::{parse_env_pair, OrchestratorConfig};
use buildflow::events::{EventSink, LoggingEventSink};
use buildflow::process::SystemProcessRunner;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

mod commands;

use commands::{OutputFormat, Selection};

#[derive(Parser)]
#[command(name = "orchestrate")]
#[command(about = "Run build stages in dependency order, skipping work that is already done", long_about = None)]
struct Cli {
    /// Stage descriptor file
    #[arg(long, global = true)]
    stages_file: Option<PathBuf>,

    /// Run ledger location
    #[arg(long, global = true)]
    ledger_path: Option<PathBuf>,

    /// Print machine-readable JSON and log as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute stages and their dependencies
    Run(RunArgs),

    /// Print the resolved execution order without running anything
    Plan {
        #[command(flatten)]
        selection: SelectionArgs,
    },

    /// Print the run ledger
    Status,

    /// List declared stages
    List,
}

#[derive(Args)]
struct SelectionArgs {
    /// Stage to run (repeatable); dependencies are included
    #[arg(long = "stage", value_name = "ID", conflicts_with = "all")]
    stages: Vec<String>,

    /// Select every declared stage
    #[arg(long)]
    all: bool,
}

impl From<SelectionArgs> for Selection {
    fn from(args: SelectionArgs) -> Self {
        Self {
            stages: args.stages,
            all: args.all,
        }
    }
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    selection: SelectionArgs,

    /// Run stages even when their checks are satisfied
    #[arg(long)]
    force: bool,

    /// Maximum number of stages running at once
    #[arg(short, long)]
    parallelism: Option<usize>,

    /// Directory commands run in
    #[arg(long)]
    target_dir: Option<PathBuf>,

    /// Environment variables for every command (KEY=VALUE)
    #[arg(short, long, value_name = "KEY=VALUE")]
    env: Vec<String>,

    /// Seconds in-flight commands may finish after Ctrl-C
    #[arg(long)]
    grace_secs: Option<u64>,
}

impl Cli {
    fn config(&self) -> Result<OrchestratorConfig> {
        let mut config = OrchestratorConfig::from_env()?;
        if let Some(path) = &self.stages_file {
            config = config.with_stages_file(path);
        }
        if let Some(path) = &self.ledger_path {
            config = config.with_ledger_path(path);
        }
        if self.json {
            config = config.with_json_logs(true);
        }

        if let Commands::Run(args) = &self.command {
            if let Some(dir) = &args.target_dir {
                config = config.with_target_dir(dir);
            }
            if let Some(parallelism) = args.parallelism {
                config = config.with_parallelism(parallelism);
            }
            if let Some(secs) = args.grace_secs {
                config = config.with_grace_secs(secs);
            }
            if args.force {
                config = config.with_force(true);
            }
            for pair in &args.env {
                let (key, value) = parse_env_pair(pair)?;
                config = config.with_env(key, value);
            }
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            if let Some(hint) = commands::hint_for(&err) {
                eprintln!("hint: {hint}");
            }
            commands::exit_code_for(&err)
        }
    };
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

async fn dispatch(cli: Cli) -> Result<i32> {
    let config = cli.config()?;
    if let Err(err) = buildflow::observability::init_tracing(&config.log_filter, config.json_logs) {
        eprintln!("warning: logging not initialised: {err}");
    }

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };
    let mut stdout = std::io::stdout().lock();

    match cli.command {
        Commands::Run(args) => {
            let cancel = Arc::new(CancellationToken::new());
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupted, letting running commands finish");
                    on_signal.cancel("interrupted by Ctrl-C");
                }
            });

            let events: Arc<dyn EventSink> = Arc::new(LoggingEventSink::default());
            let runner = Arc::new(SystemProcessRunner::new(events.clone()));
            let selection = Selection::from(args.selection);
            commands::run::run(&config, &selection, runner, events, cancel, format, &mut stdout)
                .await
        }
        Commands::Plan { selection } => {
            let selection = Selection::from(selection);
            commands::plan::plan(&config, &selection, format, &mut stdout).await
        }
        Commands::Status => commands::status::status(&config, format, &mut stdout).await,
        Commands::List => commands::list::list(&config, format, &mut stdout).await,
    }
}
