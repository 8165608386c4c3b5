use clap::{Parser, Subcommand};
use llmops::{demo, init_logging, serve, AppState, Settings};
use model::{ModelProvider, SimulatedProvider};
use stack_builder::{detect_compose, FileOutcome, MonitoringStack, StackError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "llmops")]
#[command(about = "LLM operations service: model registry, prompts, monitoring and evaluation")]
struct Cli {
    /// TOML settings file; environment variables and .env override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run the offline walkthrough
    Demo,
    /// Show effective settings and monitoring stack state
    Status {
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
    /// Manage the local Prometheus/Grafana/MLflow stack
    Monitoring {
        #[command(subcommand)]
        action: MonitoringAction,
    },
    /// Print effective settings as TOML with secrets masked
    Config,
}

#[derive(Subcommand)]
enum MonitoringAction {
    /// Write the stack files if missing and start the containers
    Up {
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
    /// Stop the containers
    Down {
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
    /// Show container state
    Status {
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
    /// Only write the stack files
    Init {
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logging depends on settings, so a load failure is reported after init
    let loaded = Settings::load(cli.config.as_deref());
    let settings = match &loaded {
        Ok(settings) => settings.clone(),
        Err(_) => Settings::default(),
    };
    if let Err(e) = init_logging(&settings) {
        eprintln!("{}", e);
    }
    if let Err(e) = &loaded {
        warn!(error = %e, "failed to load settings, using defaults");
    }

    if let Err(e) = run(cli.command, settings).await {
        error!(error = %e, "command failed");
        eprintln!("Error: {}", e);
        std::process::exit(exit_code(e.as_ref()));
    }
}

/// Wrapped compose failures keep their own exit code
fn exit_code(e: &(dyn std::error::Error + 'static)) -> i32 {
    e.downcast_ref::<StackError>().map_or(1, StackError::exit_code)
}

async fn run(command: Commands, settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Serve { host, port } => {
            let host = host.unwrap_or_else(|| settings.api_host.clone());
            let port = port.unwrap_or(settings.api_port);
            info!(
                environment = %settings.environment,
                demo_mode = settings.demo_mode,
                "starting LLM-Ops API"
            );
            let state = build_state(settings)?;
            serve(state, &host, port).await?;
        }
        Commands::Demo => {
            let state = build_state(settings)?;
            let mut stdout = std::io::stdout();
            demo::run(&state, &mut stdout).await?;
        }
        Commands::Status { dir } => {
            print_status(&settings, &dir);
        }
        Commands::Monitoring { action } => {
            monitoring(action)?;
        }
        Commands::Config => {
            print!("{}", settings.to_toml()?);
        }
    }

    Ok(())
}

fn build_state(settings: Settings) -> Result<AppState, Box<dyn std::error::Error>> {
    let provider: Arc<dyn ModelProvider> = Arc::new(SimulatedProvider::demo());
    Ok(AppState::new(settings, provider)?)
}

fn print_status(settings: &Settings, dir: &Path) {
    println!("LLM-Ops status");
    println!("  environment:      {}", settings.environment);
    println!("  demo mode:        {}", settings.demo_mode);
    println!("  default model:    {}", settings.default_model);
    println!("  api:              {}:{}", settings.api_host, settings.api_port);
    println!("  mlflow:           {}", settings.mlflow_tracking_uri);
    println!("  grafana:          {}", settings.grafana_url);
    println!("  cost alert (USD): {:.2}", settings.cost_alert_threshold);
    println!("  a/b testing:      {}", settings.ab_test_enabled);

    let stack = MonitoringStack::new(dir);
    if !stack.compose_path().is_file() {
        println!(
            "  monitoring stack: not initialized (run `llmops monitoring init --dir {}`)",
            dir.display()
        );
        return;
    }
    match detect_compose().and_then(|compose| stack.status(&compose)) {
        Ok(state) => {
            println!("  monitoring stack:");
            for line in state.lines() {
                println!("    {}", line);
            }
        }
        Err(e) => println!("  monitoring stack: unavailable ({})", e),
    }
}

fn describe(outcome: FileOutcome) -> &'static str {
    match outcome {
        FileOutcome::Created => "created",
        FileOutcome::Kept => "kept",
    }
}

fn monitoring(action: MonitoringAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        MonitoringAction::Init { dir } => {
            std::fs::create_dir_all(&dir)?;
            let stack = MonitoringStack::new(&dir);
            let report = stack.ensure_files()?;
            println!("{}: {}", stack.compose_path().display(), describe(report.compose));
            println!(
                "{}: {}",
                stack.prometheus_path().display(),
                describe(report.prometheus)
            );
        }
        MonitoringAction::Up { dir } => {
            std::fs::create_dir_all(&dir)?;
            let stack = MonitoringStack::new(&dir);
            let compose = detect_compose()?;
            let report = stack.up(&compose)?;
            if report.created_any() {
                println!("Wrote monitoring stack files to {}", dir.display());
            }
            println!("Monitoring stack started");
            println!("  Prometheus: http://localhost:9090");
            println!("  Grafana:    http://localhost:3000 (admin/admin)");
            println!("  MLflow:     http://localhost:5000");
        }
        MonitoringAction::Down { dir } => {
            let compose = detect_compose()?;
            MonitoringStack::new(&dir).down(&compose)?;
            println!("Monitoring stack stopped");
        }
        MonitoringAction::Status { dir } => {
            let compose = detect_compose()?;
            print!("{}", MonitoringStack::new(&dir).status(&compose)?);
        }
    }
    Ok(())
}
